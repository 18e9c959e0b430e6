//! # Identification callback
//!
//! The identity-proofing service reports its result asynchronously against
//! the issuer-assigned correlation id. A successful result stores the
//! verified identity data the finish-authorization step requires; a failed
//! one terminates the session.

use chrono::Utc;
use pid_crypto::rng;

use pid_openid::issuer::{PidData, Step};
use pid_openid::provider::{SessionStore, StoreError};
use pid_openid::session::{CorrelationKey, SessionKey};
use pid_openid::{Error, Result};

/// Outcome reported by the identity-proofing service.
#[derive(Clone, Debug)]
pub enum IdentificationOutcome {
    /// Identification succeeded with the given verified attributes.
    Success(PidData),

    /// Identification failed or was aborted.
    Failure {
        /// Service-side reason, kept for audit logging.
        reason: String,
    },
}

/// Apply an identification result to the session correlated by
/// `issuer_state`. The write is guarded like any step: a racing protocol
/// request makes the callback lose with an order violation.
pub async fn callback(
    store: &impl SessionStore, issuer_state: &str, outcome: IdentificationOutcome,
) -> Result<()> {
    if !rng::is_well_formed(issuer_state) {
        return Err(Error::invalid_request("invalid issuer_state"));
    }

    let mut session = match store.find(CorrelationKey::IssuerState, issuer_state).await {
        Ok(session) => session,
        Err(StoreError::NotFound) => return Err(Error::session_not_found()),
        Err(e) => return Err(Error::server(format!("issue loading session: {e}"))),
    };
    let guard = session.next_expected_step;
    if guard != Step::FinishAuthorization {
        return Err(Error::order_violation("identification-result"));
    }

    match outcome {
        IdentificationOutcome::Success(data) => {
            session.put_json(SessionKey::IdentityData, &data)?;
        }
        IdentificationOutcome::Failure { reason } => {
            tracing::warn!(issuer_state, reason, "identification failed, terminating session");
            session.terminate(Utc::now());
        }
    }

    store.update(&session, guard).await.map_err(|e| match e {
        StoreError::Conflict => Error::order_violation("identification-result"),
        StoreError::NotFound => Error::session_not_found(),
        e => Error::server(format!("issue saving session: {e}")),
    })
}
