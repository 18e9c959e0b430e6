//! # PID Issuer
//!
//! The issuance core for government-identity (PID) credentials over an
//! `OpenID4VC`-style protocol, across several trust-model variants:
//! device-bound or cloud-bound holder keys, issuer-signed or
//! designated-verifier-signed credentials.
//!
//! # Design
//!
//! The library is architected around a per-variant [`FlowController`]
//! dispatching nine transport-agnostic protocol steps. Each step resolves
//! its session by a single-use correlation value, runs an ordered pipeline
//! of handlers, and persists the advanced session in one guarded store
//! write. The compare-and-set on the session's expected step is what makes
//! retries and races safe.
//!
//! The security primitives the pipeline draws on live beside it: single-use
//! nonces ([`nonce`]), the race-safe PIN retry guard ([`pin`]), the
//! designated-verifier-signature scheme (`pid_crypto::dvs`), and the
//! dual-JWT wallet-attestation validator ([`attestation`]).
//!
//! Implementers plug in storage, client configuration, identity proofing
//! and credential encoding through the [`provider`] traits. The library is
//! transport-neutral: HTTP servers map their requests onto
//! [`issuer::StepRequest`] and surface [`Error`] at the boundary.
//!
//! ```rust,ignore
//! let controller = FlowController::device(config, SecureRandom::new());
//! let response = controller.handle(&provider, Step::PushedAuthorization, &request).await?;
//! ```

pub mod attestation;
pub mod config;
pub mod dpop;
mod flow;
mod handlers;
pub mod identification;
pub mod jwt;
pub mod nonce;
pub mod pin;
pub mod state;

use chrono::{DateTime, Utc};

pub use config::Config;
pub use flow::{FlowController, StepContext, StepHandler};
pub use pid_crypto::SecureRandom;
pub use pid_openid::{issuer, provider, session, Error, ErrorKind, Result};

use pid_openid::provider::{NonceStore, PinCounterStore, Provider, SessionStore};

/// Counts of records removed by one housekeeping sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    /// Expired sessions removed.
    pub sessions: u64,

    /// Expired nonces removed.
    pub nonces: u64,

    /// Expired PIN retry counters removed.
    pub pin_counters: u64,
}

/// Reap expired sessions, nonces and PIN retry counters. Runs out-of-band;
/// request handling relies on lazy expiration only.
pub async fn purge_expired(
    provider: &impl Provider, now: DateTime<Utc>,
) -> Result<HousekeepingReport> {
    let sessions = SessionStore::purge_expired_sessions(provider, now)
        .await
        .map_err(|e| Error::server(format!("issue purging sessions: {e}")))?;
    let nonces = NonceStore::purge_expired_nonces(provider, now)
        .await
        .map_err(|e| Error::server(format!("issue purging nonces: {e}")))?;
    let pin_counters = PinCounterStore::purge_expired_pin_counters(provider, now)
        .await
        .map_err(|e| Error::server(format!("issue purging pin counters: {e}")))?;

    tracing::info!(sessions, nonces, pin_counters, "housekeeping sweep finished");
    Ok(HousekeepingReport { sessions, nonces, pin_counters })
}
