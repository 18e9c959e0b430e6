//! # Digest helpers
//!
//! SHA-256 digests in base64url form, used to persist refresh tokens and to
//! key PIN retry counters without storing the underlying secret.

use base64ct::{Base64UrlUnpadded, Encoding};
use sha2::{Digest, Sha256};

/// SHA-256 over `data`, base64url-encoded without padding.
#[must_use]
pub fn sha256_b64(data: &[u8]) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable() {
        assert_eq!(sha256_b64(b"abc"), sha256_b64(b"abc"));
        assert_ne!(sha256_b64(b"abc"), sha256_b64(b"abd"));
    }

    #[test]
    fn digest_is_urlsafe() {
        let digest = sha256_b64(b"some refresh token");
        assert_eq!(digest.len(), 43);
        assert!(!digest.contains('='));
        assert!(!digest.contains('+'));
        assert!(!digest.contains('/'));
    }
}
