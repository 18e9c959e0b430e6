//! Deterministic test keys and compact ES256 JWT building.

use base64ct::{Base64UrlUnpadded, Encoding};
use p256::ecdsa::signature::Signer as _;
use pid_crypto::PublicKeyJwk;
use serde_json::{json, Value};

fn secret(tag: u8) -> p256::SecretKey {
    p256::SecretKey::from_slice(&[tag; 32]).expect("fixed bytes form a valid scalar")
}

/// The registered wallet client's attestation signing key.
#[must_use]
pub fn client_key() -> p256::SecretKey {
    secret(0x11)
}

/// The wallet device key.
#[must_use]
pub fn device_key() -> p256::SecretKey {
    secret(0x22)
}

/// The key derived from the wallet PIN.
#[must_use]
pub fn pin_derived_key() -> p256::SecretKey {
    secret(0x33)
}

/// The designated verifier's key pair.
#[must_use]
pub fn verifier_key() -> p256::SecretKey {
    secret(0x44)
}

/// The issuer's DVS private key.
#[must_use]
pub fn issuer_dvs_key() -> p256::SecretKey {
    secret(0x55)
}

/// The public JWK of a key.
#[must_use]
pub fn jwk(key: &p256::SecretKey) -> PublicKeyJwk {
    PublicKeyJwk::from_p256(&key.public_key())
}

/// Build a compact ES256 JWS from arbitrary header and claims JSON.
#[must_use]
pub fn es256_jwt(header: Value, claims: &Value, key: &p256::SecretKey) -> String {
    let header = Base64UrlUnpadded::encode_string(header.to_string().as_bytes());
    let payload = Base64UrlUnpadded::encode_string(claims.to_string().as_bytes());
    let signing_input = format!("{header}.{payload}");
    let signature: p256::ecdsa::Signature =
        p256::ecdsa::SigningKey::from(key).sign(signing_input.as_bytes());
    format!("{signing_input}.{}", Base64UrlUnpadded::encode_string(&signature.to_bytes()))
}

/// Build a self-signed proof JWT: the header carries the given `typ` and the
/// signer's public JWK.
#[must_use]
pub fn es256_proof_jwt(typ: &str, claims: &Value, key: &p256::SecretKey) -> String {
    es256_jwt(json!({"alg": "ES256", "typ": typ, "jwk": jwk(key)}), claims, key)
}
