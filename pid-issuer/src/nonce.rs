//! # Nonce issuer
//!
//! Single-use anti-replay tokens backed by the shared store. Consumption is
//! one atomic store operation; two requests racing on the same value can
//! never both succeed.

use chrono::{TimeDelta, Utc};
use pid_crypto::rng::{self, SecureRandom};
use pid_openid::issuer::Nonce;
use pid_openid::provider::{NonceStore, StoreError};
use pid_openid::{Error, Result};

// A store-level collision at ~131 bits of entropy means something else is
// wrong; give up after a few attempts instead of looping.
const MAX_CREATE_ATTEMPTS: usize = 3;

/// Create a fresh nonce with the given time to live, retrying generation on
/// a store-level uniqueness collision.
pub async fn create(store: &impl NonceStore, rng: &SecureRandom, ttl: TimeDelta) -> Result<Nonce> {
    for _ in 0..MAX_CREATE_ATTEMPTS {
        let nonce = Nonce { value: rng.token(), expires_at: Utc::now() + ttl, used: false };
        match store.insert(&nonce).await {
            Ok(()) => return Ok(nonce),
            Err(StoreError::Duplicate) => {}
            Err(e) => return Err(Error::server(format!("issue saving nonce: {e}"))),
        }
    }
    Err(Error::server("nonce generation kept colliding"))
}

/// Atomically validate and consume a nonce: absent or expired values fail as
/// expired, a second consumption fails as replayed, otherwise the nonce is
/// marked used and returned.
pub async fn validate_and_consume(store: &impl NonceStore, value: &str) -> Result<Nonce> {
    if !rng::is_well_formed(value) {
        return Err(Error::expired_nonce("nonce value is malformed"));
    }
    match store.consume(value, Utc::now()).await {
        Ok(nonce) => Ok(nonce),
        Err(StoreError::NotFound) => Err(Error::expired_nonce("nonce is unknown")),
        Err(StoreError::Expired) => Err(Error::expired_nonce("nonce is expired")),
        Err(StoreError::Replayed) => Err(Error::replayed_nonce("nonce was already used")),
        Err(e) => Err(Error::server(format!("issue consuming nonce: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use pid_openid::ErrorKind;
    use test_utils::provider::Provider;

    use super::*;

    #[tokio::test]
    async fn consume_at_most_once() {
        let provider = Provider::new();
        let rng = SecureRandom::new();

        let nonce =
            create(&provider, &rng, TimeDelta::seconds(60)).await.expect("nonce is created");

        let consumed =
            validate_and_consume(&provider, &nonce.value).await.expect("first consumption");
        assert!(consumed.used);

        let replay = validate_and_consume(&provider, &nonce.value)
            .await
            .expect_err("second consumption fails");
        assert_eq!(replay.kind(), ErrorKind::ReplayedNonce);
    }

    #[tokio::test]
    async fn expired_nonce_is_rejected() {
        let provider = Provider::new();
        let rng = SecureRandom::new();

        let nonce =
            create(&provider, &rng, TimeDelta::seconds(-1)).await.expect("nonce is created");

        let err = validate_and_consume(&provider, &nonce.value).await.expect_err("expired");
        assert_eq!(err.kind(), ErrorKind::ExpiredNonce);
    }

    #[tokio::test]
    async fn unknown_nonce_is_rejected() {
        let provider = Provider::new();

        let err = validate_and_consume(&provider, "ABCDEFGHIJKLMNOPQRSTU0")
            .await
            .expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::ExpiredNonce);
    }

    #[tokio::test]
    async fn malformed_value_never_reaches_the_store() {
        let provider = Provider::new();

        let err = validate_and_consume(&provider, "not a nonce").await.expect_err("malformed");
        assert_eq!(err.kind(), ErrorKind::ExpiredNonce);
    }
}
