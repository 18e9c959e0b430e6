//! Credential issuance: holder-binding key proof validation and invocation
//! of the external credential encoder, issuer-signed or designated-verifier
//! signed depending on the flow variant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pid_crypto::{DvsKey, DvsSigner, PublicKeyJwk};
use serde::Deserialize;

use pid_openid::issuer::{PidData, ResponseBuilder, StepRequest};
use pid_openid::provider::{CredentialEncoder, CredentialSigner, Provider};
use pid_openid::session::{Session, SessionKey};
use pid_openid::{Error, Result};

use crate::flow::{StepContext, StepHandler};
use crate::jwt::Jwt;

const PROOF_JWT_TYP: &str = "openid4vci-proof+jwt";

/// Claims of a holder-binding key proof JWT.
#[derive(Clone, Debug, Deserialize)]
pub struct ProofClaims {
    /// The client that created the proof.
    pub iss: Option<String>,

    /// Intended receiver, the credential issuer identifier.
    pub aud: Option<String>,

    /// Issuance time.
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub iat: Option<DateTime<Utc>>,

    /// The issuer-provided challenge.
    pub nonce: Option<String>,
}

/// Validates a key-proof JWT against the session's challenge and returns the
/// proven key.
pub(crate) fn verify_key_proof(
    session: &Session, compact: &str, expected_typ: &str, expected_audience: Option<&str>,
) -> Result<PublicKeyJwk> {
    let jwt: Jwt<ProofClaims> = compact.parse()?;
    if jwt.header.typ.as_deref() != Some(expected_typ) {
        return Err(Error::invalid_request(format!("proof typ must be '{expected_typ}'")));
    }
    let Some(key) = jwt.header.jwk.clone() else {
        return Err(Error::invalid_request("proof carries no key"));
    };
    jwt.verify_signature(&key)?;

    let challenge = session.checked_param(SessionKey::CNonce)?;
    if jwt.claims.nonce.as_deref() != Some(challenge) {
        return Err(Error::invalid_grant("proof nonce is invalid"));
    }
    if session.checked_instant(SessionKey::CNonceExpiry)? <= Utc::now() {
        return Err(Error::invalid_grant("proof nonce is expired"));
    }
    if let Some(expected) = expected_audience {
        if jwt.claims.aud.as_deref() != Some(expected) {
            return Err(Error::invalid_grant("proof audience is invalid"));
        }
    }
    Ok(key)
}

/// Requires a holder-binding key proof in the credential request and records
/// the proven key in the session.
pub struct KeyProofHandler;

#[async_trait]
impl<P: Provider> StepHandler<P> for KeyProofHandler {
    async fn on_credential(
        &self, ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let proof = request.require_body_field("proof")?;
        if proof.get("proof_type").and_then(|v| v.as_str()) != Some("jwt") {
            return Err(Error::invalid_request("proof_type must be 'jwt'"));
        }
        let Some(compact) = proof.get("jwt").and_then(|v| v.as_str()) else {
            return Err(Error::invalid_request("proof jwt is missing"));
        };

        let audience = ctx.config.credential_issuer(ctx.variant);
        let key = verify_key_proof(session, compact, PROOF_JWT_TYP, Some(&audience))?;
        session.put_json(SessionKey::HolderKey, &key)
    }
}

/// How the issued credential is signed.
pub enum SigningMode {
    /// Publicly verifiable issuer signature.
    Issuer,

    /// Designated-verifier MAC derived from the issuer private key and the
    /// wallet-supplied verifier key.
    DesignatedVerifier(p256::SecretKey),
}

/// Builds the credential and appends it to the response. Terminal effect:
/// the issuance marker is persisted in the same atomic session update, so a
/// retried request fails the order check instead of issuing twice.
pub struct CredentialHandler {
    mode: SigningMode,
}

impl CredentialHandler {
    /// Create the handler with the given signing mode.
    #[must_use]
    pub const fn new(mode: SigningMode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl<P: Provider> StepHandler<P> for CredentialHandler {
    async fn on_credential(
        &self, ctx: &StepContext<'_, P>, request: &StepRequest, response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let data: PidData = session.checked_json(SessionKey::IdentityData)?;

        let credential = match &self.mode {
            SigningMode::Issuer => {
                let holder_key = session.checked_jwk(SessionKey::HolderKey)?;
                ctx.provider
                    .issue_credential(&data, &holder_key, CredentialSigner::Issuer)
                    .await
                    .map_err(|e| Error::server(format!("issue building credential: {e}")))?
            }
            SigningMode::DesignatedVerifier(private_key) => {
                let verifier_value = request.require_body_field("verifier_pub")?;
                let verifier_key: PublicKeyJwk = serde_json::from_value(verifier_value.clone())
                    .map_err(|_| Error::invalid_request("verifier_pub is not a valid jwk"))?;
                let verifier_pub = verifier_key
                    .to_p256()
                    .map_err(|_| Error::invalid_request("verifier_pub is no valid ec key"))?;

                let key = DvsKey::derive(private_key, &verifier_pub)
                    .map_err(|e| Error::crypto(e.to_string()))?;
                let signer = DvsSigner::new(key);

                session.put_json(SessionKey::VerifierKey, &verifier_key)?;
                ctx.provider
                    .issue_credential(
                        &data,
                        &verifier_key,
                        CredentialSigner::DesignatedVerifier(&signer),
                    )
                    .await
                    .map_err(|e| Error::server(format!("issue building credential: {e}")))?
            }
        };

        session.put_instant(SessionKey::CredentialIssuedAt, Utc::now());
        response.set("credential", credential);
        Ok(())
    }
}
