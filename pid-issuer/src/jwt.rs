//! # JWT support
//!
//! Compact JWS parsing and signature verification for the proof and
//! attestation tokens the protocol consumes, plus the shared temporal-claim
//! checks every JWT shape goes through. Claims are deserialized into
//! shape-specific structs; the temporal fields are validated through the free
//! functions here rather than through a common base type.

use std::str::FromStr;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, TimeDelta, Utc};
use pid_crypto::PublicKeyJwk;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use pid_openid::{Error, Result};

/// A JWS protected header.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Header {
    /// Signature algorithm identifier.
    pub alg: String,

    /// Token type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,

    /// Key identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Embedded public key, for self-signed proofs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<PublicKeyJwk>,

    /// Critical header parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crit: Option<Vec<String>>,
}

/// A parsed, not-yet-verified JWT.
#[derive(Clone, Debug)]
pub struct Jwt<T> {
    /// The protected header.
    pub header: Header,

    /// The claims set.
    pub claims: T,

    signing_input: String,
    signature: Vec<u8>,
}

impl<T: DeserializeOwned> FromStr for Jwt<T> {
    type Err = Error;

    fn from_str(compact: &str) -> Result<Self> {
        let parts: Vec<&str> = compact.split('.').collect();
        if parts.len() != 3 {
            return Err(Error::invalid_request("malformed JWT")
                .with_internal("compact JWS must have three parts"));
        }

        let header: Header = decode_part(parts[0], "header")?;
        let claims: T = decode_part(parts[1], "claims")?;
        let signature = Base64UrlUnpadded::decode_vec(parts[2]).map_err(|_| {
            Error::invalid_request("malformed JWT").with_internal("signature is not base64url")
        })?;

        Ok(Self {
            header,
            claims,
            signing_input: format!("{}.{}", parts[0], parts[1]),
            signature,
        })
    }
}

impl<T> Jwt<T> {
    /// The bytes the signature covers.
    #[must_use]
    pub fn signing_input(&self) -> &str {
        &self.signing_input
    }

    /// The decoded signature.
    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Verify the signature against `jwk`, selecting the verifier by key
    /// type.
    pub fn verify_signature(&self, jwk: &PublicKeyJwk) -> Result<()> {
        jwk.verify(self.signing_input.as_bytes(), &self.signature).map_err(|e| match e {
            pid_crypto::CryptoError::Configuration(detail) => Error::crypto(detail),
            pid_crypto::CryptoError::Verification => {
                Error::signature("JWT signature verification failed")
            }
        })
    }
}

fn decode_part<T: DeserializeOwned>(part: &str, what: &str) -> Result<T> {
    let raw = Base64UrlUnpadded::decode_vec(part).map_err(|_| {
        Error::invalid_request("malformed JWT").with_internal(format!("{what} is not base64url"))
    })?;
    serde_json::from_slice(&raw).map_err(|e| {
        Error::invalid_request("malformed JWT").with_internal(format!("{what} is not valid: {e}"))
    })
}

/// The shared tolerance and validity window temporal claims are checked
/// against.
#[derive(Clone, Copy, Debug)]
pub struct TimeWindow {
    /// Accepted clock skew in either direction.
    pub tolerance: TimeDelta,

    /// Accepted age and forward validity of the token.
    pub validity: TimeDelta,
}

/// A temporal-claim violation. The display form is the internal diagnostic;
/// callers prefix the token kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeViolation {
    /// `exp` is in the past beyond tolerance.
    Expired,
    /// `exp` lies further ahead than validity plus tolerance allow.
    ExpiryTooFar,
    /// `nbf` is in the future beyond tolerance.
    NotYetValid,
    /// `iat` is in the future beyond tolerance.
    IssuedInFuture,
    /// `iat` is older than tolerance plus validity.
    IssuedTooOld,
}

impl std::fmt::Display for TimeViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Expired => "is expired",
            Self::ExpiryTooFar => "expiration date is too far in the future",
            Self::NotYetValid => "is not yet valid",
            Self::IssuedInFuture => "is issued in the future",
            Self::IssuedTooOld => "issuance is too old",
        };
        f.write_str(text)
    }
}

/// Check `exp`/`nbf`/`iat` against the window at `now`.
pub fn check_time_window(
    exp: DateTime<Utc>, nbf: Option<DateTime<Utc>>, iat: Option<DateTime<Utc>>,
    now: DateTime<Utc>, window: &TimeWindow,
) -> Result<(), TimeViolation> {
    if exp + window.tolerance < now {
        return Err(TimeViolation::Expired);
    }
    if exp > now + window.validity + window.tolerance {
        return Err(TimeViolation::ExpiryTooFar);
    }
    if let Some(nbf) = nbf {
        if now + window.tolerance < nbf {
            return Err(TimeViolation::NotYetValid);
        }
    }
    if let Some(iat) = iat {
        check_issued_at(iat, now, window)?;
    }
    Ok(())
}

/// Check an `iat` claim alone against the window at `now`.
pub fn check_issued_at(
    iat: DateTime<Utc>, now: DateTime<Utc>, window: &TimeWindow,
) -> Result<(), TimeViolation> {
    if iat > now + window.tolerance {
        return Err(TimeViolation::IssuedInFuture);
    }
    if iat < now - window.tolerance - window.validity {
        return Err(TimeViolation::IssuedTooOld);
    }
    Ok(())
}
