//! # Provider
//!
//! Traits implementers use to plug storage, client configuration, identity
//! proofing, and credential encoding into the issuance core. Storage
//! operations carry compare-and-set contracts: the read-check-advance of a
//! session step, nonce consumption, and PIN counter increments are each one
//! atomic operation at the store, never read-then-write in the caller.

use std::future::Future;

use chrono::{DateTime, Utc};
use pid_crypto::{DvsSigner, PublicKeyJwk};

use crate::issuer::{Nonce, PidData, PinRetryCounter, RegisteredClient, SeedData, Step};
use crate::session::{CorrelationKey, Session};

/// Outcomes of a storage operation the core needs to distinguish.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record matches, or the record is past its expiration.
    #[error("record not found")]
    NotFound,

    /// A uniqueness constraint was violated on insert.
    #[error("record already exists")]
    Duplicate,

    /// A compare-and-set guard did not match the stored value.
    #[error("concurrent modification")]
    Conflict,

    /// The record exists but is past its expiration.
    #[error("record expired")]
    Expired,

    /// A single-use record was already consumed.
    #[error("record already used")]
    Replayed,

    /// The store itself failed.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for storage operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Provider is implemented by issuance environments: storage, client
/// configuration, identity proofing and credential encoding in one bundle.
pub trait Provider:
    SessionStore
    + NonceStore
    + PinCounterStore
    + ClientRegistry
    + IdentityProofing
    + CredentialEncoder
    + Clone
    + Send
    + Sync
{
}

/// Durable session storage shared by all workers.
pub trait SessionStore: Send + Sync {
    /// Insert a fresh session. Fails with [`StoreError::Duplicate`] when any
    /// of its correlation values collides with a live session.
    fn create(&self, session: &Session) -> impl Future<Output = Result<()>> + Send;

    /// Look up the live session holding `value` under the given correlation
    /// key. Expired sessions are treated as absent.
    fn find(&self, key: CorrelationKey, value: &str)
        -> impl Future<Output = Result<Session>> + Send;

    /// Persist a mutated session. Succeeds only while the stored
    /// `next_expected_step` still equals `guard`; of two concurrent writers
    /// exactly one wins, the other fails with [`StoreError::Conflict`].
    fn update(&self, session: &Session, guard: Step)
        -> impl Future<Output = Result<()>> + Send;

    /// Remove sessions expired at `now`. Returns the number removed.
    fn purge_expired_sessions(&self, now: DateTime<Utc>)
        -> impl Future<Output = Result<u64>> + Send;
}

/// Durable storage for single-use nonces.
pub trait NonceStore: Send + Sync {
    /// Insert a fresh nonce. Fails with [`StoreError::Duplicate`] when the
    /// value already exists.
    fn insert(&self, nonce: &Nonce) -> impl Future<Output = Result<()>> + Send;

    /// Atomically validate and consume a nonce: [`StoreError::NotFound`]
    /// when absent, [`StoreError::Expired`] when past expiration,
    /// [`StoreError::Replayed`] when already used; otherwise the nonce is
    /// marked used and returned.
    fn consume(&self, value: &str, now: DateTime<Utc>)
        -> impl Future<Output = Result<Nonce>> + Send;

    /// Remove nonces expired at `now`. Returns the number removed.
    fn purge_expired_nonces(&self, now: DateTime<Utc>)
        -> impl Future<Output = Result<u64>> + Send;
}

/// Durable storage for PIN retry counters.
pub trait PinCounterStore: Send + Sync {
    /// Create or reset the counter for a digest to zero with a fresh
    /// expiration.
    fn put_counter(&self, counter: &PinRetryCounter)
        -> impl Future<Output = Result<()>> + Send;

    /// Look up a live counter by digest.
    fn find_counter(&self, digest: &str, now: DateTime<Utc>)
        -> impl Future<Output = Result<PinRetryCounter>> + Send;

    /// Atomically increment the counter to `expected_next`. Succeeds only
    /// while the stored value equals `expected_next - 1`; a stale writer
    /// fails with [`StoreError::Conflict`].
    fn increment_counter(&self, digest: &str, expected_next: u32, now: DateTime<Utc>)
        -> impl Future<Output = Result<PinRetryCounter>> + Send;

    /// Remove counters expired at `now`. Returns the number removed.
    fn purge_expired_pin_counters(&self, now: DateTime<Utc>)
        -> impl Future<Output = Result<u64>> + Send;
}

/// Registered wallet clients and their attestation keys.
pub trait ClientRegistry: Send + Sync {
    /// The registered client for `client_id`, when one exists.
    fn client(&self, client_id: &str)
        -> impl Future<Output = anyhow::Result<Option<RegisteredClient>>> + Send;
}

/// The external identity-proofing service.
pub trait IdentityProofing: Send + Sync {
    /// Start an identification process correlated by `issuer_state`.
    /// Returns the URL the wallet user agent is redirected to; the service
    /// later reports the result through the identification callback.
    fn begin_identification(&self, issuer_state: &str, redirect_url: &str)
        -> impl Future<Output = anyhow::Result<String>> + Send;
}

/// Selects how an issued credential is signed.
#[derive(Clone, Debug)]
pub enum CredentialSigner<'a> {
    /// Publicly verifiable issuer signature.
    Issuer,

    /// Designated-verifier MAC; only the intended verifier can check it.
    DesignatedVerifier(&'a DvsSigner),
}

/// The external credential encoder. Receives verified identity attributes and
/// holder-binding key material; returns an opaque compact credential string.
pub trait CredentialEncoder: Send + Sync {
    /// Encode a PID credential bound to `holder_key`.
    fn issue_credential(
        &self, data: &PidData, holder_key: &PublicKeyJwk, signer: CredentialSigner<'_>,
    ) -> impl Future<Output = anyhow::Result<String>> + Send;

    /// Encode a seed credential over the given seed payload.
    fn issue_seed(&self, seed: &SeedData) -> impl Future<Output = anyhow::Result<String>> + Send;

    /// Decode and authenticate a previously issued seed credential.
    fn decode_seed(&self, seed: &str) -> impl Future<Output = anyhow::Result<SeedData>> + Send;
}
