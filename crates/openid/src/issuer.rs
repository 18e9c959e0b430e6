//! # Issuance Types
//!
//! Flow and step tags, transport-agnostic request/response shapes, verified
//! identity data, and the persisted security primitives (nonces, PIN retry
//! counters). The per-variant step tables live with the flow state machine,
//! not here: these are plain tags.

use std::collections::HashMap;
use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use pid_crypto::PublicKeyJwk;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Trust-model variant of an issuance flow.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlowVariant {
    /// Device-bound holder key, issuer-signed credential.
    #[default]
    Device,

    /// Device-bound holder key, issuer-signed credential, with refresh-token
    /// re-issuance.
    DeviceRefresh,

    /// Device-bound holder key, designated-verifier-signed credential.
    AuthChannel,

    /// PIN-protected device key with seed-credential re-issuance.
    PinSeed,
}

impl Display for FlowVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Device => "device",
            Self::DeviceRefresh => "device-refresh",
            Self::AuthChannel => "auth-channel",
            Self::PinSeed => "pin-seed",
        };
        f.write_str(name)
    }
}

/// A protocol step. Every session stores exactly one step as its
/// `next_expected_step`; any other inbound step fails the order check.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Pushed authorization request.
    #[default]
    PushedAuthorization,

    /// Authorization request referencing the pushed request.
    Authorization,

    /// Completion of authorization after external identification.
    FinishAuthorization,

    /// Exchange of the authorization code for an access token.
    Token,

    /// Re-issuance of an access token from a refresh token.
    RefreshToken,

    /// Credential issuance.
    Credential,

    /// Seed-credential issuance against a PIN-protected device key.
    SeedCredential,

    /// Exchange of a seed credential plus PIN proof for an access token.
    SeedToken,

    /// Designated-verifier signing of a presentation hash.
    PresentationSigning,
}

impl Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PushedAuthorization => "pushed-authorization",
            Self::Authorization => "authorization",
            Self::FinishAuthorization => "finish-authorization",
            Self::Token => "token",
            Self::RefreshToken => "refresh-token",
            Self::Credential => "credential",
            Self::SeedCredential => "seed-credential",
            Self::SeedToken => "seed-credential-token",
            Self::PresentationSigning => "presentation-signing",
        };
        f.write_str(name)
    }
}

/// A transport-agnostic step request: method, headers, form/query parameters
/// and an optional JSON body. The HTTP layer maps its request into this shape
/// without the core knowing transport details.
#[derive(Clone, Debug, Default)]
pub struct StepRequest {
    /// Request method, uppercase.
    pub method: String,

    /// Header list. Lookup is case-insensitive.
    pub headers: Vec<(String, String)>,

    /// Form or query parameters.
    pub params: HashMap<String, String>,

    /// JSON body, for steps that carry one.
    pub body: Option<Value>,
}

impl StepRequest {
    /// Create a request with the given method.
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self { method: method.into(), ..Self::default() }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Set the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parameter lookup.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Parameter lookup failing with `invalid_request` when absent or blank.
    pub fn require_param(&self, name: &str) -> crate::Result<&str> {
        self.param(name)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| crate::Error::invalid_request(format!("{name} is missing")))
    }

    /// Body field lookup failing with `invalid_request` when absent.
    pub fn require_body_field(&self, name: &str) -> crate::Result<&Value> {
        self.body
            .as_ref()
            .and_then(|body| body.get(name))
            .ok_or_else(|| crate::Error::invalid_request(format!("{name} is missing")))
    }
}

/// Accumulates the response fragments appended by step handlers.
#[derive(Clone, Debug, Default)]
pub struct ResponseBuilder {
    body: Map<String, Value>,
    headers: Vec<(String, String)>,
}

impl ResponseBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a body field.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.body.insert(name.into(), value.into());
    }

    /// Append a response header.
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Whether a body field has already been appended.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.body.contains_key(name)
    }

    /// Finish the response.
    #[must_use]
    pub fn build(self) -> StepResponse {
        StepResponse { body: Value::Object(self.body), headers: self.headers }
    }
}

/// The outcome of a successfully processed step.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct StepResponse {
    /// JSON body.
    pub body: Value,

    /// Response headers (e.g. `Location` for redirect steps).
    pub headers: Vec<(String, String)>,
}

impl StepResponse {
    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Verified identity attributes delivered by the identity-proofing service
/// and embedded into issued credentials.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PidData {
    /// Given name.
    pub given_name: String,

    /// Family name.
    pub family_name: String,

    /// Date of birth, ISO 8601.
    pub birth_date: String,

    /// Family name at birth, when it differs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_family_name: Option<String>,

    /// Place of birth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_of_birth: Option<String>,

    /// Nationality, ISO 3166-1 alpha-2.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nationality: Option<String>,

    /// Residence address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// A structured residence address.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Address {
    /// Street and house number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street_address: Option<String>,

    /// City or municipality.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,

    /// Postal code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,

    /// Country, ISO 3166-1 alpha-2.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// The payload recovered from a seed credential: the identity data it was
/// issued over plus the device and PIN-derived keys it is bound to.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SeedData {
    /// Verified identity attributes.
    pub pid: PidData,

    /// The PIN-protected device key.
    pub device_key: PublicKeyJwk,

    /// The key derived from the wallet PIN.
    pub pin_derived_key: PublicKeyJwk,

    /// Identifier of the issuer that produced the seed.
    pub issuer_id: String,

    /// Issuance time.
    pub issued_at: DateTime<Utc>,

    /// Expiration time.
    pub expires_at: DateTime<Utc>,
}

/// A registered wallet client and the key its attestations are verified
/// against.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct RegisteredClient {
    /// Client identifier.
    pub client_id: String,

    /// Public key verifying the client's attestation JWTs.
    pub attestation_key: PublicKeyJwk,
}

/// A single-use anti-replay token.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Nonce {
    /// The random value; 22 characters over the alphanumeric alphabet.
    pub value: String,

    /// Expiration time.
    pub expires_at: DateTime<Utc>,

    /// Whether the nonce has been consumed.
    pub used: bool,
}

impl Nonce {
    /// Whether the nonce is past its expiration at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Brute-force counter for a PIN-protected device key, keyed by the digest of
/// that key.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PinRetryCounter {
    /// Digest identifying the bound device key.
    pub digest: String,

    /// Failed-attempt count.
    pub value: u32,

    /// Expiration time.
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let request = StepRequest::new("POST").with_header("DPoP", "proof-jwt");
        assert_eq!(request.header("dpop"), Some("proof-jwt"));
        assert_eq!(request.header("Authorization"), None);
    }

    #[test]
    fn require_param_rejects_blank() {
        let request = StepRequest::new("POST").with_param("client_id", "  ");
        assert!(request.require_param("client_id").is_err());
        assert!(request.require_param("missing").is_err());
    }

    #[test]
    fn response_builder_accumulates() {
        let mut builder = ResponseBuilder::new();
        builder.set("access_token", "abc");
        builder.set("expires_in", 3600);
        builder.header("Cache-Control", "no-store");

        let response = builder.build();
        assert_eq!(response.body, json!({"access_token": "abc", "expires_in": 3600}));
        assert_eq!(response.header("cache-control"), Some("no-store"));
    }

    #[test]
    fn step_names_are_stable() {
        assert_eq!(Step::PushedAuthorization.to_string(), "pushed-authorization");
        assert_eq!(Step::SeedToken.to_string(), "seed-credential-token");
    }
}
