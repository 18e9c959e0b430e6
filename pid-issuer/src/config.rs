//! # Configuration
//!
//! Lifetimes, tolerances and identifiers for the issuance core. Loaded by the
//! embedding process (file, environment); defaults are suitable for tests.

use chrono::TimeDelta;
use serde::Deserialize;

use pid_openid::issuer::FlowVariant;

use crate::state;

/// Issuance configuration. Durations are given in seconds.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Public base URL of the issuer.
    pub base_url: String,

    /// Authorization scheme access tokens are presented under.
    pub authorization_scheme: String,

    /// Lifetime of a pushed-authorization request URI.
    pub request_uri_lifetime_secs: i64,

    /// Lifetime of an authorization code.
    pub authorization_code_lifetime_secs: i64,

    /// Lifetime of an access token.
    pub access_token_lifetime_secs: i64,

    /// Lifetime of a proof-of-possession challenge (`c_nonce`).
    pub c_nonce_lifetime_secs: i64,

    /// Lifetime of a DPoP nonce.
    pub dpop_nonce_lifetime_secs: i64,

    /// Lifetime of the issuer session id handed out with a seed credential.
    pub issuer_session_id_lifetime_secs: i64,

    /// Lifetime of a protocol session.
    pub session_lifetime_secs: i64,

    /// Validity of a PIN retry counter.
    pub pin_retry_counter_validity_secs: i64,

    /// Clock tolerance applied to proof and attestation time claims.
    pub proof_time_tolerance_secs: i64,

    /// Accepted age of proof and attestation time claims.
    pub proof_validity_secs: i64,

    /// Failed PIN attempts after which the binding attempt is over.
    pub max_pin_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://issuer.example.com".into(),
            authorization_scheme: "DPoP".into(),
            request_uri_lifetime_secs: 600,
            authorization_code_lifetime_secs: 60,
            access_token_lifetime_secs: 3600,
            c_nonce_lifetime_secs: 3600,
            dpop_nonce_lifetime_secs: 300,
            issuer_session_id_lifetime_secs: 30 * 24 * 3600,
            session_lifetime_secs: 24 * 3600,
            pin_retry_counter_validity_secs: 365 * 24 * 3600,
            proof_time_tolerance_secs: 30,
            proof_validity_secs: 300,
            max_pin_retries: 3,
        }
    }
}

impl Config {
    /// Lifetime of a pushed-authorization request URI.
    #[must_use]
    pub fn request_uri_lifetime(&self) -> TimeDelta {
        TimeDelta::seconds(self.request_uri_lifetime_secs)
    }

    /// Lifetime of an authorization code.
    #[must_use]
    pub fn authorization_code_lifetime(&self) -> TimeDelta {
        TimeDelta::seconds(self.authorization_code_lifetime_secs)
    }

    /// Lifetime of an access token.
    #[must_use]
    pub fn access_token_lifetime(&self) -> TimeDelta {
        TimeDelta::seconds(self.access_token_lifetime_secs)
    }

    /// Lifetime of a proof-of-possession challenge.
    #[must_use]
    pub fn c_nonce_lifetime(&self) -> TimeDelta {
        TimeDelta::seconds(self.c_nonce_lifetime_secs)
    }

    /// Lifetime of a DPoP nonce.
    #[must_use]
    pub fn dpop_nonce_lifetime(&self) -> TimeDelta {
        TimeDelta::seconds(self.dpop_nonce_lifetime_secs)
    }

    /// Lifetime of the issuer session id handed out with a seed credential.
    #[must_use]
    pub fn issuer_session_id_lifetime(&self) -> TimeDelta {
        TimeDelta::seconds(self.issuer_session_id_lifetime_secs)
    }

    /// Lifetime of a protocol session.
    #[must_use]
    pub fn session_lifetime(&self) -> TimeDelta {
        TimeDelta::seconds(self.session_lifetime_secs)
    }

    /// Validity of a PIN retry counter.
    #[must_use]
    pub fn pin_retry_counter_validity(&self) -> TimeDelta {
        TimeDelta::seconds(self.pin_retry_counter_validity_secs)
    }

    /// Clock tolerance applied to proof and attestation time claims.
    #[must_use]
    pub fn proof_time_tolerance(&self) -> TimeDelta {
        TimeDelta::seconds(self.proof_time_tolerance_secs)
    }

    /// Accepted age of proof and attestation time claims.
    #[must_use]
    pub fn proof_validity(&self) -> TimeDelta {
        TimeDelta::seconds(self.proof_validity_secs)
    }

    /// The credential-issuer identifier of a flow variant: the base URL plus
    /// the variant's path segment.
    #[must_use]
    pub fn credential_issuer(&self, variant: FlowVariant) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/{}", state::path_segment(variant))
    }

    /// The absolute URL of a step endpoint under a flow variant, as bound
    /// into DPoP proofs.
    #[must_use]
    pub fn step_url(&self, variant: FlowVariant, step: pid_openid::issuer::Step) -> String {
        format!("{}/{}", self.credential_issuer(variant), state::step_path(step))
    }
}
