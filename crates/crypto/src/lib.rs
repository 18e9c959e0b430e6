//! # PID Crypto
//!
//! Cryptographic primitives shared by the PID issuance core: a designated
//! verifier signature (DVS) scheme, a JSON Web Key model with signature
//! verification by key type, secure random generation, and digest helpers.
//!
//! All operations are CPU-bound and synchronous; nothing in this crate blocks
//! on I/O.

pub mod digest;
pub mod dvs;
pub mod jwk;
pub mod rng;

pub use digest::sha256_b64;
pub use dvs::{DvsKey, DvsSigner, DvsVerifier, DVS_P256_SHA256_HS256};
pub use jwk::{KeyType, PublicKeyJwk};
pub use rng::SecureRandom;

/// Errors arising from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Key material or algorithm parameters are unusable.
    #[error("crypto configuration error: {0}")]
    Configuration(String),

    /// A signature or MAC did not verify.
    #[error("signature verification failed")]
    Verification,
}

/// Result type for cryptographic operations.
pub type Result<T, E = CryptoError> = std::result::Result<T, E>;
