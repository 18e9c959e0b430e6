//! # JSON Web Key (JWK)
//!
//! A simplified JWK ([RFC7517]) model covering the key types accepted for
//! wallet attestation and holder binding, together with signature
//! verification selected by key type and the [RFC7638] thumbprint used to
//! identify keys without persisting them.
//!
//! [RFC7517]: https://www.rfc-editor.org/rfc/rfc7517
//! [RFC7638]: https://www.rfc-editor.org/rfc/rfc7638

use base64ct::{Base64UrlUnpadded, Encoding};
use p256::ecdsa::signature::Verifier as _;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::signature::Verifier as _;
use rsa::BigUint;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::digest::sha256_b64;
use crate::{CryptoError, Result};

/// JWK key type.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum KeyType {
    /// Elliptic curve (P-256).
    #[default]
    #[serde(rename = "EC")]
    Ec,

    /// RSA.
    #[serde(rename = "RSA")]
    Rsa,

    /// Octet key pair (Ed25519).
    #[serde(rename = "OKP")]
    Okp,
}

/// Simplified public JSON Web Key.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PublicKeyJwk {
    /// Key identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Key type.
    pub kty: KeyType,

    /// Curve name, for `EC` and `OKP` keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// X coordinate (`EC`) or public key bytes (`OKP`), base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// Y coordinate (`EC` only), base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// Modulus (`RSA` only), base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// Public exponent (`RSA` only), base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// Algorithm intended for use with the key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
}

impl PublicKeyJwk {
    /// Parse a JWK from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| CryptoError::Configuration(format!("unparsable jwk: {e}")))
    }

    /// Build a `P-256` JWK from a public key.
    #[must_use]
    pub fn from_p256(key: &p256::PublicKey) -> Self {
        let point = key.to_encoded_point(false);
        let x = point.x().expect("uncompressed point has x");
        let y = point.y().expect("uncompressed point has y");
        Self {
            kty: KeyType::Ec,
            crv: Some("P-256".into()),
            x: Some(Base64UrlUnpadded::encode_string(x)),
            y: Some(Base64UrlUnpadded::encode_string(y)),
            ..Self::default()
        }
    }

    /// Interpret the JWK as a `P-256` public key.
    pub fn to_p256(&self) -> Result<p256::PublicKey> {
        if self.kty != KeyType::Ec || self.crv.as_deref() != Some("P-256") {
            return Err(CryptoError::Configuration("not a P-256 key".into()));
        }
        let x = decode_field(self.x.as_deref(), "x")?;
        let y = decode_field(self.y.as_deref(), "y")?;
        let mut sec1 = Vec::with_capacity(1 + x.len() + y.len());
        sec1.push(0x04);
        sec1.extend_from_slice(&x);
        sec1.extend_from_slice(&y);
        p256::PublicKey::from_sec1_bytes(&sec1)
            .map_err(|_| CryptoError::Configuration("invalid P-256 coordinates".into()))
    }

    /// The [RFC7638] JWK thumbprint: SHA-256 over the canonical JSON of the
    /// required members, base64url-encoded.
    ///
    /// [RFC7638]: https://www.rfc-editor.org/rfc/rfc7638
    pub fn thumbprint(&self) -> Result<String> {
        let canonical = match self.kty {
            KeyType::Ec => json!({
                "crv": required(self.crv.as_deref(), "crv")?,
                "kty": "EC",
                "x": required(self.x.as_deref(), "x")?,
                "y": required(self.y.as_deref(), "y")?,
            }),
            KeyType::Okp => json!({
                "crv": required(self.crv.as_deref(), "crv")?,
                "kty": "OKP",
                "x": required(self.x.as_deref(), "x")?,
            }),
            KeyType::Rsa => json!({
                "e": required(self.e.as_deref(), "e")?,
                "kty": "RSA",
                "n": required(self.n.as_deref(), "n")?,
            }),
        };
        Ok(sha256_b64(canonical.to_string().as_bytes()))
    }

    /// Verify a JWS signature over `signing_input`, selecting the verifier by
    /// key type: ES256 for `EC`, RS256 for `RSA`, EdDSA for `OKP`.
    pub fn verify(&self, signing_input: &[u8], signature: &[u8]) -> Result<()> {
        match self.kty {
            KeyType::Ec => self.verify_es256(signing_input, signature),
            KeyType::Rsa => self.verify_rs256(signing_input, signature),
            KeyType::Okp => self.verify_eddsa(signing_input, signature),
        }
    }

    fn verify_es256(&self, signing_input: &[u8], signature: &[u8]) -> Result<()> {
        let key = p256::ecdsa::VerifyingKey::from(&self.to_p256()?);
        let sig = p256::ecdsa::Signature::from_slice(signature)
            .map_err(|_| CryptoError::Verification)?;
        key.verify(signing_input, &sig).map_err(|_| CryptoError::Verification)
    }

    fn verify_rs256(&self, signing_input: &[u8], signature: &[u8]) -> Result<()> {
        let n = BigUint::from_bytes_be(&decode_field(self.n.as_deref(), "n")?);
        let e = BigUint::from_bytes_be(&decode_field(self.e.as_deref(), "e")?);
        let key = rsa::RsaPublicKey::new(n, e)
            .map_err(|e| CryptoError::Configuration(format!("invalid RSA key: {e}")))?;
        let key = rsa::pkcs1v15::VerifyingKey::<sha2::Sha256>::new(key);
        let sig = rsa::pkcs1v15::Signature::try_from(signature)
            .map_err(|_| CryptoError::Verification)?;
        key.verify(signing_input, &sig).map_err(|_| CryptoError::Verification)
    }

    fn verify_eddsa(&self, signing_input: &[u8], signature: &[u8]) -> Result<()> {
        if self.crv.as_deref() != Some("Ed25519") {
            return Err(CryptoError::Configuration("not an Ed25519 key".into()));
        }
        let x = decode_field(self.x.as_deref(), "x")?;
        let bytes: [u8; 32] = x
            .try_into()
            .map_err(|_| CryptoError::Configuration("invalid Ed25519 key length".into()))?;
        let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|_| CryptoError::Configuration("invalid Ed25519 key".into()))?;
        let sig = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|_| CryptoError::Verification)?;
        key.verify_strict(signing_input, &sig).map_err(|_| CryptoError::Verification)
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value.ok_or_else(|| CryptoError::Configuration(format!("jwk is missing '{name}'")))
}

fn decode_field(value: Option<&str>, name: &str) -> Result<Vec<u8>> {
    Base64UrlUnpadded::decode_vec(required(value, name)?)
        .map_err(|_| CryptoError::Configuration(format!("jwk member '{name}' is not base64url")))
}
