//! # Designated verifier signatures
//!
//! An issuer holding `(sk_issuer, pk_verifier)` and a verifier holding
//! `(sk_verifier, pk_issuer)` derive the same 32-byte MAC key via ECDH and
//! HKDF-SHA256. A credential signed with that key is authenticated by the
//! issuer yet verifiable only by the designated verifier, never by a third
//! party observing the wallet's public key.

use std::collections::BTreeSet;

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{CryptoError, Result};

/// JWS algorithm identifier of the DVS scheme. The only value accepted by
/// [`DvsSigner`] and [`DvsVerifier`].
pub const DVS_P256_SHA256_HS256: &str = "DVS-P256-SHA256-HS256";

type HmacSha256 = Hmac<Sha256>;

/// A symmetric MAC key derived from one ECDH key agreement.
///
/// Derivation is symmetric by construction:
/// `derive(sk_a, pk_b) == derive(sk_b, pk_a)`.
#[derive(Clone)]
pub struct DvsKey([u8; 32]);

impl DvsKey {
    /// Derive the MAC key: P-256 ECDH shared secret, expanded with
    /// HKDF-SHA256 (no salt, the algorithm identifier as context) to
    /// 32 bytes.
    pub fn derive(private_key: &p256::SecretKey, public_key: &p256::PublicKey) -> Result<Self> {
        let shared =
            p256::ecdh::diffie_hellman(private_key.to_nonzero_scalar(), public_key.as_affine());
        let hkdf = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes());

        let mut okm = [0u8; 32];
        hkdf.expand(DVS_P256_SHA256_HS256.as_bytes(), &mut okm)
            .map_err(|_| CryptoError::Configuration("hkdf output length invalid".into()))?;
        Ok(Self(okm))
    }

    /// The raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for DvsKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DvsKey(..)")
    }
}

/// Produces DVS MACs over JWS signing input.
#[derive(Clone, Debug)]
pub struct DvsSigner {
    key: DvsKey,
}

impl DvsSigner {
    /// Create a signer from a derived key.
    #[must_use]
    pub const fn new(key: DvsKey) -> Self {
        Self { key }
    }

    /// The algorithm identifier to place in the JWS header.
    #[must_use]
    pub const fn algorithm(&self) -> &'static str {
        DVS_P256_SHA256_HS256
    }

    /// HMAC-SHA256 over `signing_input`.
    #[must_use]
    pub fn sign(&self, signing_input: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.key.0).expect("hmac accepts any key length");
        mac.update(signing_input);
        mac.finalize().into_bytes().to_vec()
    }
}

/// Verifies DVS MACs, honoring the JWS critical-header policy: a header
/// listing critical parameters the verifier has not agreed to defer is
/// rejected before any MAC is computed.
#[derive(Clone, Debug)]
pub struct DvsVerifier {
    key: DvsKey,
    deferred_critical: BTreeSet<String>,
}

impl DvsVerifier {
    /// Create a verifier that rejects every critical header parameter.
    #[must_use]
    pub const fn new(key: DvsKey) -> Self {
        Self { key, deferred_critical: BTreeSet::new() }
    }

    /// Create a verifier deferring the given critical header parameters to
    /// the application.
    #[must_use]
    pub fn with_deferred_critical(
        key: DvsKey, deferred: impl IntoIterator<Item = String>,
    ) -> Self {
        Self { key, deferred_critical: deferred.into_iter().collect() }
    }

    /// Verify `tag` over `signing_input` in constant time.
    ///
    /// `alg` and `crit` come from the JWS header: an unexpected algorithm or
    /// an unresolved critical parameter fails verification without touching
    /// the MAC.
    #[must_use]
    pub fn verify(&self, alg: &str, crit: &[String], signing_input: &[u8], tag: &[u8]) -> bool {
        if alg != DVS_P256_SHA256_HS256 {
            return false;
        }
        if crit.iter().any(|name| !self.deferred_critical.contains(name)) {
            return false;
        }
        let mut mac = HmacSha256::new_from_slice(&self.key.0).expect("hmac accepts any key length");
        mac.update(signing_input);
        mac.verify_slice(tag).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    fn keypair() -> (p256::SecretKey, p256::PublicKey) {
        let sk = p256::SecretKey::random(&mut OsRng);
        let pk = sk.public_key();
        (sk, pk)
    }

    #[test]
    fn derivation_is_symmetric() {
        let (sk_issuer, pk_issuer) = keypair();
        let (sk_verifier, pk_verifier) = keypair();

        let issuer_side = DvsKey::derive(&sk_issuer, &pk_verifier).expect("derive");
        let verifier_side = DvsKey::derive(&sk_verifier, &pk_issuer).expect("derive");

        assert_eq!(issuer_side.as_bytes(), verifier_side.as_bytes());
    }

    #[test]
    fn sign_verify_round_trip() {
        let (sk_issuer, pk_issuer) = keypair();
        let (sk_verifier, pk_verifier) = keypair();

        let signer = DvsSigner::new(DvsKey::derive(&sk_issuer, &pk_verifier).expect("derive"));
        let verifier = DvsVerifier::new(DvsKey::derive(&sk_verifier, &pk_issuer).expect("derive"));

        let tag = signer.sign(b"credential signing input");
        assert!(verifier.verify(DVS_P256_SHA256_HS256, &[], b"credential signing input", &tag));
        assert!(!verifier.verify(DVS_P256_SHA256_HS256, &[], b"altered signing input", &tag));
    }

    #[test]
    fn other_verifier_cannot_verify() {
        let (sk_issuer, pk_issuer) = keypair();
        let (_, pk_verifier) = keypair();
        let (sk_other, _) = keypair();

        let signer = DvsSigner::new(DvsKey::derive(&sk_issuer, &pk_verifier).expect("derive"));
        let other = DvsVerifier::new(DvsKey::derive(&sk_other, &pk_issuer).expect("derive"));

        let tag = signer.sign(b"credential signing input");
        assert!(!other.verify(DVS_P256_SHA256_HS256, &[], b"credential signing input", &tag));
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let (sk_issuer, _) = keypair();
        let (_, pk_verifier) = keypair();

        let key = DvsKey::derive(&sk_issuer, &pk_verifier).expect("derive");
        let signer = DvsSigner::new(key.clone());
        let verifier = DvsVerifier::new(key);

        let tag = signer.sign(b"input");
        assert!(!verifier.verify("HS256", &[], b"input", &tag));
    }

    #[test]
    fn unresolved_critical_header_is_rejected() {
        let (sk_issuer, _) = keypair();
        let (_, pk_verifier) = keypair();

        let key = DvsKey::derive(&sk_issuer, &pk_verifier).expect("derive");
        let signer = DvsSigner::new(key.clone());
        let tag = signer.sign(b"input");

        let strict = DvsVerifier::new(key.clone());
        assert!(!strict.verify(DVS_P256_SHA256_HS256, &["b64".into()], b"input", &tag));

        let deferring = DvsVerifier::with_deferred_critical(key, ["b64".to_string()]);
        assert!(deferring.verify(DVS_P256_SHA256_HS256, &["b64".into()], b"input", &tag));
    }
}
