//! # PID `OpenID` Types
//!
//! Types and logic shared across the PID issuance core: the protocol error
//! taxonomy, session and step models, transport-agnostic request/response
//! shapes, and the provider traits implementers use to plug in storage,
//! client configuration, identity proofing, and credential encoding.
//!
//! The crate is for internal use within the PID issuer project; public types
//! are re-exported through the top-level `pid-issuer` crate.

mod error;
pub mod issuer;
pub mod provider;
pub mod session;

pub use self::error::{Error, ErrorKind};

/// Result type for PID issuance operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
