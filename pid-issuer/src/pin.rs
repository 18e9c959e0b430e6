//! # PIN retry guard
//!
//! A race-safe brute-force counter keyed by the digest of a PIN-protected
//! device key. Increments follow an optimistic-concurrency contract: the
//! caller submits the value it expects to write, and a stale writer loses.
//! The maximum-attempts ceiling is enforced by the caller before it attempts
//! an increment.

use chrono::{TimeDelta, Utc};
use pid_openid::issuer::PinRetryCounter;
use pid_openid::provider::{PinCounterStore, StoreError};
use pid_openid::{Error, Result};

/// Create or reset the counter for `digest` to zero with a fresh expiration.
/// Used when a PIN-derived key is (re-)registered.
pub async fn reset(
    store: &impl PinCounterStore, digest: &str, validity: TimeDelta,
) -> Result<PinRetryCounter> {
    let counter =
        PinRetryCounter { digest: digest.into(), value: 0, expires_at: Utc::now() + validity };
    store
        .put_counter(&counter)
        .await
        .map_err(|e| Error::server(format!("issue saving pin retry counter: {e}")))?;
    Ok(counter)
}

/// Load the live counter for `digest`.
pub async fn load(store: &impl PinCounterStore, digest: &str) -> Result<PinRetryCounter> {
    match store.find_counter(digest, Utc::now()).await {
        Ok(counter) => Ok(counter),
        Err(StoreError::NotFound | StoreError::Expired) => {
            Err(Error::invalid_grant("PIN is not registered")
                .with_internal(format!("no live pin retry counter for digest {digest}")))
        }
        Err(e) => Err(Error::server(format!("issue loading pin retry counter: {e}"))),
    }
}

/// Record a failed attempt by incrementing `counter` to `counter.value + 1`.
/// Succeeds only while the persisted value still equals `counter.value`; a
/// concurrent writer that got there first turns this into a stale increment.
pub async fn increment(
    store: &impl PinCounterStore, counter: &PinRetryCounter,
) -> Result<PinRetryCounter> {
    let expected_next = counter.value + 1;
    match store.increment_counter(&counter.digest, expected_next, Utc::now()).await {
        Ok(counter) => Ok(counter),
        Err(StoreError::Conflict) => Err(Error::pin_stale_increment(format!(
            "pin retry counter for digest {} no longer holds {}",
            counter.digest, counter.value
        ))),
        Err(StoreError::NotFound | StoreError::Expired) => {
            Err(Error::invalid_grant("PIN is not registered")
                .with_internal(format!("no live pin retry counter for digest {}", counter.digest)))
        }
        Err(e) => Err(Error::server(format!("issue incrementing pin retry counter: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use pid_openid::ErrorKind;
    use test_utils::provider::Provider;

    use super::*;

    const DIGEST: &str = "device-key-digest";

    #[tokio::test]
    async fn increment_sequence() {
        let provider = Provider::new();

        let counter = reset(&provider, DIGEST, TimeDelta::seconds(60)).await.expect("reset");
        assert_eq!(counter.value, 0);

        let one = increment(&provider, &counter).await.expect("first increment");
        assert_eq!(one.value, 1);

        // the same stale snapshot cannot increment again
        let stale = increment(&provider, &counter).await.expect_err("stale increment");
        assert_eq!(stale.kind(), ErrorKind::PinRetryInvalidIncrement);

        let two = increment(&provider, &one).await.expect("second increment");
        assert_eq!(two.value, 2);
    }

    #[tokio::test]
    async fn reset_starts_over() {
        let provider = Provider::new();

        let counter = reset(&provider, DIGEST, TimeDelta::seconds(60)).await.expect("reset");
        let one = increment(&provider, &counter).await.expect("increment");
        assert_eq!(one.value, 1);

        let fresh = reset(&provider, DIGEST, TimeDelta::seconds(60)).await.expect("reset again");
        assert_eq!(fresh.value, 0);
        assert_eq!(load(&provider, DIGEST).await.expect("load").value, 0);
    }

    #[tokio::test]
    async fn unknown_digest_is_invalid_grant() {
        let provider = Provider::new();

        let err = load(&provider, "unknown").await.expect_err("missing counter");
        assert_eq!(err.kind(), ErrorKind::InvalidGrant);
    }
}
