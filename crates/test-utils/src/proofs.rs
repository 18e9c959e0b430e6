//! Proof and attestation JWT builders for driving the protocol in tests.

use chrono::Utc;
use serde_json::json;

use crate::{keys, CLIENT_ID};

/// A DPoP proof over the given method and URI, optionally carrying a server
/// nonce, signed with `key`.
#[must_use]
pub fn dpop_proof(htm: &str, htu: &str, nonce: Option<&str>, key: &p256::SecretKey) -> String {
    let mut claims = json!({
        "htm": htm,
        "htu": htu,
        "iat": Utc::now().timestamp(),
        "jti": uuid::Uuid::new_v4().to_string(),
    });
    if let Some(nonce) = nonce {
        claims["nonce"] = json!(nonce);
    }
    keys::es256_proof_jwt("dpop+jwt", &claims, key)
}

/// A holder-binding key proof over the issuer's challenge.
#[must_use]
pub fn key_proof(audience: &str, nonce: &str, key: &p256::SecretKey) -> String {
    let claims = json!({
        "iss": CLIENT_ID,
        "aud": audience,
        "iat": Utc::now().timestamp(),
        "nonce": nonce,
    });
    keys::es256_proof_jwt("openid4vci-proof+jwt", &claims, key)
}

/// A PIN-derived key proof over the given challenge.
#[must_use]
pub fn pin_pop(nonce: &str, key: &p256::SecretKey) -> String {
    let claims = json!({
        "iat": Utc::now().timestamp(),
        "nonce": nonce,
    });
    keys::es256_proof_jwt("pin_derived_eph_key_pop+jwt", &claims, key)
}

/// The `client_assertion` value for wallet attestation: the attestation JWT
/// and its proof of possession, tilde-separated.
#[must_use]
pub fn client_assertion(audience: &str) -> String {
    let now = Utc::now().timestamp();
    let attestation = keys::es256_jwt(
        json!({"alg": "ES256"}),
        &json!({
            "iss": CLIENT_ID,
            "sub": CLIENT_ID,
            "exp": now + 120,
            "iat": now,
            "cnf": {"jwk": keys::jwk(&keys::device_key())},
        }),
        &keys::client_key(),
    );
    let pop = keys::es256_jwt(
        json!({"alg": "ES256"}),
        &json!({
            "iss": CLIENT_ID,
            "exp": now + 120,
            "iat": now,
            "jti": uuid::Uuid::new_v4().to_string(),
            "aud": [audience],
        }),
        &keys::device_key(),
    );
    format!("{attestation}~{pop}")
}
