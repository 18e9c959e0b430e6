//! # Test Utilities
//!
//! Hard-coded provider trait implementations, deterministic keys, and proof
//! JWT builders for testing the PID issuance core.
//!
//! This crate provides common utilities for the project's own tests and is
//! not intended to be used directly.

pub mod keys;
pub mod proofs;
pub mod provider;
pub mod sample;

/// Client id of the registered test wallet.
pub const CLIENT_ID: &str = "96bfb9cb-0513-7d64-5532-bed74c48f9ab";

/// Credential-issuer identifier of the device flow under the default
/// configuration.
pub const CREDENTIAL_ISSUER: &str = "https://issuer.example.com/c";

/// Redirect URI the test wallet registers.
pub const REDIRECT_URI: &str = "http://localhost:3000/callback";
