//! # Wallet attestation
//!
//! Dual-JWT device-binding validation. The wallet presents an issuer-chain
//! attestation JWT (naming the bound device key in its `cnf` claim) and a
//! proof-of-possession JWT signed with that device key. Both shapes share one
//! claim bag; presence, temporal, binding and signature checks run in that
//! order. Whatever fails, the externally visible error stays coarse while
//! the specific cause is kept for audit logging.

use chrono::{DateTime, Utc};
use pid_crypto::PublicKeyJwk;
use serde::Deserialize;

use pid_openid::provider::ClientRegistry;
use pid_openid::{Error, Result};

use crate::jwt::{check_time_window, Jwt, TimeWindow};

/// JWT audience: a single value or a list.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    /// A single audience.
    One(String),

    /// Multiple audiences.
    Many(Vec<String>),
}

impl Audience {
    /// Whether `value` is among the audiences.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::One(aud) => aud == value,
            Self::Many(auds) => auds.iter().any(|aud| aud == value),
        }
    }
}

/// The `cnf` claim binding a token to a key.
#[derive(Clone, Debug, Deserialize)]
pub struct Cnf {
    /// The bound public key.
    pub jwk: PublicKeyJwk,
}

/// One claim bag for both attestation JWT shapes: the common temporal claims
/// plus the attestation-specific (`sub`, `cnf`) and proof-of-possession
/// specific (`jti`, `aud`) optional members.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AttestationClaims {
    /// Issuer.
    pub iss: Option<String>,

    /// Subject.
    pub sub: Option<String>,

    /// Expiration.
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub exp: Option<DateTime<Utc>>,

    /// Not before.
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub nbf: Option<DateTime<Utc>>,

    /// Issued at.
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub iat: Option<DateTime<Utc>>,

    /// Token id.
    pub jti: Option<String>,

    /// Audience list.
    pub aud: Option<Audience>,

    /// Bound device key.
    pub cnf: Option<Cnf>,
}

/// Validate a wallet attestation pair for `client_id`, returning the device
/// key named in the attestation's `cnf` claim.
///
/// The checks, in order: required-claim presence on both JWTs, temporal
/// checks against the shared window, binding checks (attestation issuer
/// registered, attestation subject and PoP issuer equal the asserted client
/// id, PoP audience containing `expected_audience`), then signatures: the
/// attestation against the registered client key, the PoP against the device
/// key from `cnf`.
pub async fn validate(
    registry: &impl ClientRegistry, window: &TimeWindow, attestation_jwt: &str, pop_jwt: &str,
    client_id: &str, expected_audience: &str,
) -> Result<PublicKeyJwk> {
    let attestation: Jwt<AttestationClaims> = attestation_jwt
        .parse()
        .map_err(|e: Error| Error::attestation_malformed(describe(&e, "client attestation")))?;
    let pop: Jwt<AttestationClaims> = pop_jwt
        .parse()
        .map_err(|e: Error| Error::attestation_malformed(describe(&e, "client attestation PoP")))?;

    let now = Utc::now();
    let device_key = validate_attestation(registry, window, &attestation, client_id, now).await?;
    validate_pop(window, &pop, &device_key, client_id, expected_audience, now)?;

    tracing::debug!("wallet attestation for client {client_id} is valid");
    Ok(device_key)
}

async fn validate_attestation(
    registry: &impl ClientRegistry, window: &TimeWindow, jwt: &Jwt<AttestationClaims>,
    client_id: &str, now: DateTime<Utc>,
) -> Result<PublicKeyJwk> {
    let claims = &jwt.claims;
    let iss = require(claims.iss.as_deref(), "iss")?;
    let sub = require(claims.sub.as_deref(), "sub")?;
    let exp = claims.exp.ok_or_else(|| Error::attestation_claim_missing("exp"))?;
    let cnf = claims.cnf.as_ref().ok_or_else(|| Error::attestation_claim_missing("cnf"))?;

    check_time_window(exp, claims.nbf, claims.iat, now, window)
        .map_err(|violation| Error::attestation_time(format!("client attestation {violation}")))?;

    let client = registry
        .client(iss)
        .await
        .map_err(|e| Error::server(format!("issue loading client: {e}")))?
        .ok_or_else(|| {
            Error::attestation_binding(format!("issuer '{iss}' is not a registered client"))
        })?;
    if !sub.eq_ignore_ascii_case(client_id) {
        return Err(Error::attestation_binding(format!(
            "subject '{sub}' does not match the client id '{client_id}'"
        )));
    }

    jwt.verify_signature(&client.attestation_key).map_err(|e| {
        Error::attestation_signature(describe(&e, "client attestation signature"))
    })?;
    Ok(cnf.jwk.clone())
}

fn validate_pop(
    window: &TimeWindow, jwt: &Jwt<AttestationClaims>, device_key: &PublicKeyJwk, client_id: &str,
    expected_audience: &str, now: DateTime<Utc>,
) -> Result<()> {
    let claims = &jwt.claims;
    let iss = require(claims.iss.as_deref(), "iss")?;
    let exp = claims.exp.ok_or_else(|| Error::attestation_claim_missing("exp"))?;
    require(claims.jti.as_deref(), "jti")?;
    let aud = claims.aud.as_ref().ok_or_else(|| Error::attestation_claim_missing("aud"))?;

    check_time_window(exp, claims.nbf, claims.iat, now, window).map_err(|violation| {
        Error::attestation_time(format!("client attestation PoP {violation}"))
    })?;

    if !iss.eq_ignore_ascii_case(client_id) {
        return Err(Error::attestation_binding(format!(
            "PoP issuer '{iss}' does not match the client id '{client_id}'"
        )));
    }
    if !aud.contains(expected_audience) {
        return Err(Error::attestation_binding(format!(
            "PoP audience does not contain '{expected_audience}'"
        )));
    }

    jwt.verify_signature(device_key)
        .map_err(|e| Error::attestation_signature(describe(&e, "client attestation PoP signature")))
}

fn require<'a>(value: Option<&'a str>, claim: &str) -> Result<&'a str> {
    value.filter(|v| !v.trim().is_empty()).ok_or_else(|| Error::attestation_claim_missing(claim))
}

fn describe(error: &Error, context: &str) -> String {
    error
        .internal_message()
        .map_or_else(|| format!("{context}: {error}"), |detail| format!("{context}: {detail}"))
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use pid_openid::ErrorKind;
    use serde_json::{json, Value};
    use test_utils::provider::Provider;
    use test_utils::{keys, CLIENT_ID, CREDENTIAL_ISSUER};

    use super::*;

    fn window() -> TimeWindow {
        TimeWindow { tolerance: TimeDelta::seconds(30), validity: TimeDelta::seconds(300) }
    }

    fn attestation_claims() -> Value {
        let now = Utc::now().timestamp();
        json!({
            "iss": CLIENT_ID,
            "sub": CLIENT_ID,
            "exp": now + 120,
            "iat": now,
            "cnf": {"jwk": keys::jwk(&keys::device_key())},
        })
    }

    fn pop_claims() -> Value {
        let now = Utc::now().timestamp();
        json!({
            "iss": CLIENT_ID,
            "exp": now + 120,
            "iat": now,
            "jti": "pop-1",
            "aud": [CREDENTIAL_ISSUER],
        })
    }

    fn attestation_jwt(claims: &Value) -> String {
        keys::es256_jwt(json!({"alg": "ES256"}), claims, &keys::client_key())
    }

    fn pop_jwt(claims: &Value) -> String {
        keys::es256_jwt(json!({"alg": "ES256"}), claims, &keys::device_key())
    }

    async fn run(attestation: &str, pop: &str) -> Result<PublicKeyJwk> {
        let provider = Provider::new();
        validate(&provider, &window(), attestation, pop, CLIENT_ID, CREDENTIAL_ISSUER).await
    }

    #[tokio::test]
    async fn valid_pair_passes() {
        let device_key = run(&attestation_jwt(&attestation_claims()), &pop_jwt(&pop_claims()))
            .await
            .expect("attestation is valid");
        assert_eq!(device_key, keys::jwk(&keys::device_key()));
    }

    #[tokio::test]
    async fn missing_issuer_claim_fails() {
        let mut claims = attestation_claims();
        claims.as_object_mut().expect("object").remove("iss");

        let err = run(&attestation_jwt(&claims), &pop_jwt(&pop_claims())).await.expect_err("fails");
        assert_eq!(err.kind(), ErrorKind::AttestationClaimMissing);
        assert_eq!(err.internal_message(), Some("iss claim is missing"));
        assert_eq!(err.public_message(), "client attestation verification failed");
    }

    #[tokio::test]
    async fn missing_cnf_claim_fails() {
        let mut claims = attestation_claims();
        claims.as_object_mut().expect("object").remove("cnf");

        let err = run(&attestation_jwt(&claims), &pop_jwt(&pop_claims())).await.expect_err("fails");
        assert_eq!(err.kind(), ErrorKind::AttestationClaimMissing);
        assert_eq!(err.internal_message(), Some("cnf claim is missing"));
    }

    #[tokio::test]
    async fn subject_mismatch_fails() {
        let mut claims = attestation_claims();
        claims["sub"] = json!("someone-else");

        let err = run(&attestation_jwt(&claims), &pop_jwt(&pop_claims())).await.expect_err("fails");
        assert_eq!(err.kind(), ErrorKind::AttestationBindingMismatch);
    }

    #[tokio::test]
    async fn unknown_attestation_issuer_fails() {
        let mut claims = attestation_claims();
        claims["iss"] = json!("unregistered-client");

        let err = run(&attestation_jwt(&claims), &pop_jwt(&pop_claims())).await.expect_err("fails");
        assert_eq!(err.kind(), ErrorKind::AttestationBindingMismatch);
    }

    #[tokio::test]
    async fn pop_audience_missing_issuer_fails() {
        let mut claims = pop_claims();
        claims["aud"] = json!(["https://somewhere.else"]);

        let err =
            run(&attestation_jwt(&attestation_claims()), &pop_jwt(&claims)).await.expect_err("fails");
        assert_eq!(err.kind(), ErrorKind::AttestationBindingMismatch);
    }

    #[tokio::test]
    async fn expired_attestation_fails() {
        let mut claims = attestation_claims();
        claims["exp"] = json!(Utc::now().timestamp() - 120);

        let err = run(&attestation_jwt(&claims), &pop_jwt(&pop_claims())).await.expect_err("fails");
        assert_eq!(err.kind(), ErrorKind::AttestationTimeWindowViolation);
    }

    #[tokio::test]
    async fn future_issued_at_fails() {
        let mut claims = pop_claims();
        claims["iat"] = json!(Utc::now().timestamp() + 120);

        let err =
            run(&attestation_jwt(&attestation_claims()), &pop_jwt(&claims)).await.expect_err("fails");
        assert_eq!(err.kind(), ErrorKind::AttestationTimeWindowViolation);
    }

    #[tokio::test]
    async fn wrong_signature_key_fails() {
        // attestation signed by the device key instead of the client key
        let forged = keys::es256_jwt(json!({"alg": "ES256"}), &attestation_claims(), &keys::device_key());

        let err = run(&forged, &pop_jwt(&pop_claims())).await.expect_err("fails");
        assert_eq!(err.kind(), ErrorKind::SignatureVerification);
    }

    #[tokio::test]
    async fn pop_signed_by_wrong_device_key_fails() {
        let forged = keys::es256_jwt(json!({"alg": "ES256"}), &pop_claims(), &keys::client_key());

        let err = run(&attestation_jwt(&attestation_claims()), &forged).await.expect_err("fails");
        assert_eq!(err.kind(), ErrorKind::SignatureVerification);
    }
}
