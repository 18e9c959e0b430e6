//! # Session
//!
//! The store-backed protocol session shared by all workers. A session is a
//! bag of named string parameters plus the flow variant and the single step
//! the protocol will accept next. Typed accessors parse instants, JWKs and
//! JSON values out of the string map; a missing or malformed parameter that a
//! handler depends on is a server-side defect, not client input, and maps to
//! a server error.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use chrono::{DateTime, TimeDelta, Utc};
use pid_crypto::PublicKeyJwk;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::issuer::{FlowVariant, Step};
use crate::{Error, Result};

/// Names of session parameters.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionKey {
    /// The wallet's client id.
    ClientId,
    /// Redirect URI registered in the pushed authorization request.
    RedirectUri,
    /// OAuth `state` passthrough value.
    State,
    /// Requested scope.
    Scope,
    /// PKCE code challenge (S256).
    CodeChallenge,
    /// Pushed-authorization request URI.
    RequestUri,
    /// Expiration of the request URI.
    RequestUriExpiry,
    /// Correlation id handed to the identity-proofing service.
    IssuerState,
    /// One-time authorization code.
    AuthorizationCode,
    /// Expiration of the authorization code.
    AuthorizationCodeExpiry,
    /// Bearer/DPoP access token.
    AccessToken,
    /// Expiration of the access token.
    AccessTokenExpiry,
    /// Digest of the refresh token; the raw token is never persisted.
    RefreshTokenDigest,
    /// Proof-of-possession challenge for key proofs.
    CNonce,
    /// Expiration of the challenge.
    CNonceExpiry,
    /// Public key bound via DPoP.
    DpopKey,
    /// Holder-binding key proven in the credential request.
    HolderKey,
    /// Designated verifier's public key (auth-channel variants).
    VerifierKey,
    /// Key derived from the wallet PIN.
    PinDerivedKey,
    /// Verified identity attributes, JSON-encoded.
    IdentityData,
    /// Issuer session id handed out with a seed credential.
    IssuerSessionId,
    /// Expiration of the issuer session id.
    IssuerSessionIdExpiry,
    /// Marker recording that the credential side effect completed.
    CredentialIssuedAt,
}

impl SessionKey {
    /// The snake_case name, as persisted.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientId => "client_id",
            Self::RedirectUri => "redirect_uri",
            Self::State => "state",
            Self::Scope => "scope",
            Self::CodeChallenge => "code_challenge",
            Self::RequestUri => "request_uri",
            Self::RequestUriExpiry => "request_uri_expiry",
            Self::IssuerState => "issuer_state",
            Self::AuthorizationCode => "authorization_code",
            Self::AuthorizationCodeExpiry => "authorization_code_expiry",
            Self::AccessToken => "access_token",
            Self::AccessTokenExpiry => "access_token_expiry",
            Self::RefreshTokenDigest => "refresh_token_digest",
            Self::CNonce => "c_nonce",
            Self::CNonceExpiry => "c_nonce_expiry",
            Self::DpopKey => "dpop_key",
            Self::HolderKey => "holder_key",
            Self::VerifierKey => "verifier_key",
            Self::PinDerivedKey => "pin_derived_key",
            Self::IdentityData => "identity_data",
            Self::IssuerSessionId => "issuer_session_id",
            Self::IssuerSessionIdExpiry => "issuer_session_id_expiry",
            Self::CredentialIssuedAt => "credential_issued_at",
        }
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single-use correlation values a session can be looked up by. Each is
/// unique across live sessions; every step resolves its session by exactly
/// one of them.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationKey {
    /// Pushed-authorization request URI.
    RequestUri,
    /// Identity-proofing correlation id.
    IssuerState,
    /// Authorization code.
    AuthorizationCode,
    /// Access token.
    AccessToken,
    /// Refresh token digest.
    RefreshTokenDigest,
    /// Issuer session id from seed issuance.
    IssuerSessionId,
}

impl CorrelationKey {
    /// All correlation keys, for store-side index maintenance.
    pub const ALL: [Self; 6] = [
        Self::RequestUri,
        Self::IssuerState,
        Self::AuthorizationCode,
        Self::AccessToken,
        Self::RefreshTokenDigest,
        Self::IssuerSessionId,
    ];

    /// The session parameter holding this correlation value.
    #[must_use]
    pub const fn session_key(self) -> SessionKey {
        match self {
            Self::RequestUri => SessionKey::RequestUri,
            Self::IssuerState => SessionKey::IssuerState,
            Self::AuthorizationCode => SessionKey::AuthorizationCode,
            Self::AccessToken => SessionKey::AccessToken,
            Self::RefreshTokenDigest => SessionKey::RefreshTokenDigest,
            Self::IssuerSessionId => SessionKey::IssuerSessionId,
        }
    }
}

/// A protocol session.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Session {
    /// Session identity.
    pub id: Uuid,

    /// Trust-model variant the session runs under.
    pub flow_variant: FlowVariant,

    /// The only step the protocol will accept next.
    pub next_expected_step: Step,

    parameters: BTreeMap<SessionKey, String>,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Expiration time. Terminated sessions have `expires_at <= now` and are
    /// removed lazily by the housekeeping sweep.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session expecting `first_step`.
    #[must_use]
    pub fn new(
        flow_variant: FlowVariant, first_step: Step, now: DateTime<Utc>, lifetime: TimeDelta,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow_variant,
            next_expected_step: first_step,
            parameters: BTreeMap::new(),
            created_at: now,
            expires_at: now + lifetime,
        }
    }

    /// Set a parameter.
    pub fn put(&mut self, key: SessionKey, value: impl Into<String>) {
        self.parameters.insert(key, value.into());
    }

    /// Set an instant parameter, RFC 3339 encoded.
    pub fn put_instant(&mut self, key: SessionKey, value: DateTime<Utc>) {
        self.parameters.insert(key, value.to_rfc3339());
    }

    /// Set a JSON-encoded parameter.
    pub fn put_json<T: Serialize>(&mut self, key: SessionKey, value: &T) -> Result<()> {
        let encoded = serde_json::to_string(value)
            .map_err(|e| Error::server(format!("{key} not serializable: {e}")))?;
        self.parameters.insert(key, encoded);
        Ok(())
    }

    /// Whether a parameter is set.
    #[must_use]
    pub fn contains(&self, key: SessionKey) -> bool {
        self.parameters.contains_key(&key)
    }

    /// Read a parameter.
    #[must_use]
    pub fn param(&self, key: SessionKey) -> Option<&str> {
        self.parameters.get(&key).map(String::as_str)
    }

    /// Read a parameter that a previous step must have set.
    pub fn checked_param(&self, key: SessionKey) -> Result<&str> {
        self.param(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::server(format!("{key} not found")))
    }

    /// Read an instant parameter.
    pub fn instant(&self, key: SessionKey) -> Result<Option<DateTime<Utc>>> {
        self.param(key)
            .map(|v| {
                DateTime::parse_from_rfc3339(v)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| Error::server(format!("{key} not an instant: {e}")))
            })
            .transpose()
    }

    /// Read an instant parameter that a previous step must have set.
    pub fn checked_instant(&self, key: SessionKey) -> Result<DateTime<Utc>> {
        self.instant(key)?.ok_or_else(|| Error::server(format!("{key} not found")))
    }

    /// Read a JWK parameter that a previous step must have set.
    pub fn checked_jwk(&self, key: SessionKey) -> Result<PublicKeyJwk> {
        let value = self.checked_param(key)?;
        PublicKeyJwk::from_json(value).map_err(|e| Error::server(format!("{key}: {e}")))
    }

    /// Read a JSON-encoded parameter that a previous step must have set.
    pub fn checked_json<T: DeserializeOwned>(&self, key: SessionKey) -> Result<T> {
        let value = self.checked_param(key)?;
        serde_json::from_str(value).map_err(|e| Error::server(format!("{key} not parsable: {e}")))
    }

    /// Remove a parameter, returning its previous value.
    pub fn remove(&mut self, key: SessionKey) -> Option<String> {
        self.parameters.remove(&key)
    }

    /// The correlation value currently set for `key`, when any.
    #[must_use]
    pub fn correlation_value(&self, key: CorrelationKey) -> Option<&str> {
        self.param(key.session_key())
    }

    /// Whether the session is past its expiration at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Refresh the expiration to `now + lifetime`.
    pub fn touch(&mut self, now: DateTime<Utc>, lifetime: TimeDelta) {
        self.expires_at = now + lifetime;
    }

    /// Terminate the session: expiration becomes `now`, deletion is left to
    /// the housekeeping sweep.
    pub fn terminate(&mut self, now: DateTime<Utc>) {
        self.expires_at = now;
    }
}
