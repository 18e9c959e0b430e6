//! # Protocol Errors
//!
//! One tagged error value for the whole issuance core. The `kind` selects a
//! stable machine-readable wire code, the public message is safe to return to
//! a wallet, and the internal message carries the diagnostic detail retained
//! for audit logging. Extra headers let an error transport response
//! artifacts such as a fresh `DPoP-Nonce`.
//!
//! Security-sensitive failures (attestation, nonces, PIN retries) are
//! deliberately coarse on the public side so the endpoint cannot be used as a
//! verification oracle.

use std::fmt::{self, Display};

use serde_json::{json, Value};

/// Discriminates protocol failures. Matched once at the transport boundary to
/// choose a status code; internal consumers match on it to branch on cause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request is malformed: missing or invalid parameters.
    InvalidRequest,

    /// Client authentication failed.
    InvalidClient,

    /// The presented grant (code, token, PIN proof) is invalid.
    InvalidGrant,

    /// The requested scope is not served.
    InvalidScope,

    /// Missing or unusable access token.
    Unauthorized,

    /// The step arrived while the session expects a different one.
    ProtocolOrderViolation,

    /// No live session matches the presented correlation value.
    SessionNotFound,

    /// The step is not part of the active flow variant.
    UnsupportedOperationForFlow,

    /// A single-use nonce was presented a second time.
    ReplayedNonce,

    /// The nonce is unknown or past its expiration.
    ExpiredNonce,

    /// The request must be retried with the nonce carried in the
    /// accompanying `DPoP-Nonce` header.
    UseDpopNonce,

    /// A PIN retry increment raced with another writer and went stale.
    PinRetryInvalidIncrement,

    /// The PIN retry ceiling has been reached; the binding attempt is over.
    PinRetryExhausted,

    /// Key material or algorithm parameters are unusable.
    CryptoConfiguration,

    /// A signature or MAC did not verify.
    SignatureVerification,

    /// A required attestation claim is absent.
    AttestationClaimMissing,

    /// An attestation claim falls outside the tolerance/validity window.
    AttestationTimeWindowViolation,

    /// An attestation claim does not bind to the asserted client or issuer.
    AttestationBindingMismatch,

    /// The server failed; the request cannot be processed.
    ServerError,
}

impl ErrorKind {
    /// The stable machine-readable wire code for this kind.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidRequest | Self::ProtocolOrderViolation => "invalid_request",
            Self::InvalidClient
            | Self::SignatureVerification
            | Self::AttestationClaimMissing
            | Self::AttestationTimeWindowViolation
            | Self::AttestationBindingMismatch => "invalid_client",
            Self::InvalidGrant | Self::PinRetryInvalidIncrement | Self::PinRetryExhausted => {
                "invalid_grant"
            }
            Self::InvalidScope => "invalid_scope",
            Self::Unauthorized => "invalid_token",
            Self::SessionNotFound => "invalid_session",
            Self::UnsupportedOperationForFlow => "unsupported_operation",
            Self::ReplayedNonce | Self::ExpiredNonce => "invalid_nonce",
            Self::UseDpopNonce => "use_dpop_nonce",
            Self::CryptoConfiguration | Self::ServerError => "server_error",
        }
    }
}

/// A protocol error: kind, public message, optional internal diagnostic, and
/// response headers to attach at the transport boundary.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    public_message: String,
    internal_message: Option<String>,
    headers: Vec<(String, String)>,
}

impl Error {
    /// Create an error with a public message.
    #[must_use]
    pub fn new(kind: ErrorKind, public_message: impl Into<String>) -> Self {
        Self {
            kind,
            public_message: public_message.into(),
            internal_message: None,
            headers: Vec::new(),
        }
    }

    /// Attach an internal diagnostic retained for audit logging.
    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    /// Attach a response header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The stable wire code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// The externally visible message.
    #[must_use]
    pub fn public_message(&self) -> &str {
        &self.public_message
    }

    /// The internal diagnostic, when one was recorded.
    #[must_use]
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Headers the transport boundary should attach to the response.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The wire body: `{"error": code, "error_description": public message}`.
    #[must_use]
    pub fn to_body(&self) -> Value {
        json!({"error": self.code(), "error_description": self.public_message})
    }

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// A malformed request.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    /// Client authentication failure.
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidClient, message)
    }

    /// An invalid grant.
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidGrant, message)
    }

    /// An unserved scope.
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidScope, message)
    }

    /// Missing or unusable access token; `scheme` names the expected
    /// authorization scheme.
    pub fn unauthorized(scheme: &str, internal: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, format!("{scheme} authorization required"))
            .with_internal(internal)
    }

    /// A step arrived out of order. Cheap to retry; never mutates state.
    pub fn order_violation(step: impl Display) -> Self {
        Self::new(
            ErrorKind::ProtocolOrderViolation,
            format!("{step} is not the allowed next request"),
        )
    }

    /// No live session for the presented correlation value.
    #[must_use]
    pub fn session_not_found() -> Self {
        Self::new(ErrorKind::SessionNotFound, "session not found")
    }

    /// The step is outside the active flow variant.
    pub fn unsupported_operation(variant: impl Display, step: impl Display) -> Self {
        Self::new(
            ErrorKind::UnsupportedOperationForFlow,
            format!("{step} is not supported by the {variant} flow"),
        )
    }

    /// A nonce was consumed twice. Public message stays coarse.
    pub fn replayed_nonce(internal: impl Into<String>) -> Self {
        Self::new(ErrorKind::ReplayedNonce, "nonce is not valid").with_internal(internal)
    }

    /// A nonce is unknown or expired. Public message stays coarse.
    pub fn expired_nonce(internal: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExpiredNonce, "nonce is not valid").with_internal(internal)
    }

    /// The caller must retry with the fresh nonce in the `DPoP-Nonce` header.
    pub fn use_dpop_nonce(nonce: impl Into<String>) -> Self {
        Self::new(ErrorKind::UseDpopNonce, "authorization server requires nonce in DPoP proof")
            .with_header("DPoP-Nonce", nonce)
    }

    /// A stale PIN retry increment.
    pub fn pin_stale_increment(internal: impl Into<String>) -> Self {
        Self::new(ErrorKind::PinRetryInvalidIncrement, "PIN verification failed")
            .with_internal(internal)
    }

    /// The PIN retry ceiling is reached.
    #[must_use]
    pub fn pin_locked() -> Self {
        Self::new(ErrorKind::PinRetryExhausted, "PIN locked")
    }

    /// Unusable key material or algorithm parameters.
    pub fn crypto(internal: impl Into<String>) -> Self {
        Self::new(ErrorKind::CryptoConfiguration, "the request cannot be processed")
            .with_internal(internal)
    }

    /// A signature did not verify.
    pub fn signature(internal: impl Into<String>) -> Self {
        Self::new(ErrorKind::SignatureVerification, "signature verification failed")
            .with_internal(internal)
    }

    /// An attestation token that could not be parsed at all.
    pub fn attestation_malformed(internal: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidClient, ATTESTATION_PUBLIC_MSG).with_internal(internal)
    }

    /// A required attestation claim is missing. The public message is shared
    /// by all attestation failures.
    pub fn attestation_claim_missing(claim: &str) -> Self {
        Self::new(ErrorKind::AttestationClaimMissing, ATTESTATION_PUBLIC_MSG)
            .with_internal(format!("{claim} claim is missing"))
    }

    /// An attestation claim violates the temporal window.
    pub fn attestation_time(internal: impl Into<String>) -> Self {
        Self::new(ErrorKind::AttestationTimeWindowViolation, ATTESTATION_PUBLIC_MSG)
            .with_internal(internal)
    }

    /// An attestation claim fails a binding check.
    pub fn attestation_binding(internal: impl Into<String>) -> Self {
        Self::new(ErrorKind::AttestationBindingMismatch, ATTESTATION_PUBLIC_MSG)
            .with_internal(internal)
    }

    /// An attestation signature did not verify.
    pub fn attestation_signature(internal: impl Into<String>) -> Self {
        Self::new(ErrorKind::SignatureVerification, ATTESTATION_PUBLIC_MSG)
            .with_internal(internal)
    }

    /// An internal failure.
    pub fn server(internal: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, "the request cannot be processed")
            .with_internal(internal)
    }
}

const ATTESTATION_PUBLIC_MSG: &str = "client attestation verification failed";

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.public_message)
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn body_shape() {
        let err = Error::invalid_request("bad request");
        assert_eq!(
            err.to_body(),
            json!({"error": "invalid_request", "error_description": "bad request"})
        );
    }

    #[test]
    fn internal_detail_stays_internal() {
        let err = Error::attestation_claim_missing("cnf");
        assert_eq!(err.public_message(), "client attestation verification failed");
        assert_eq!(err.internal_message(), Some("cnf claim is missing"));
        assert_eq!(err.code(), "invalid_client");
    }

    #[test]
    fn dpop_nonce_header_is_carried() {
        let err = Error::use_dpop_nonce("fresh-nonce");
        assert_eq!(err.headers(), &[("DPoP-Nonce".to_string(), "fresh-nonce".to_string())]);
        assert_eq!(err.code(), "use_dpop_nonce");
    }

    #[test]
    fn order_violation_is_distinct_from_not_found() {
        assert_ne!(Error::order_violation("token").kind(), Error::session_not_found().kind());
    }
}
