//! Seed credentials: issuance of a PIN-bound seed credential after the
//! proofing flow, and its later redemption for an access token under the PIN
//! retry guard.

use async_trait::async_trait;
use chrono::Utc;

use pid_openid::issuer::{PidData, ResponseBuilder, SeedData, StepRequest};
use pid_openid::provider::{CredentialEncoder, Provider};
use pid_openid::session::{Session, SessionKey};
use pid_openid::{Error, Result};

use crate::flow::{StepContext, StepHandler};
use crate::handlers::credential::verify_key_proof;
use crate::{nonce, pin};

const PROOF_JWT_TYP: &str = "openid4vci-proof+jwt";
const PIN_POP_JWT_TYP: &str = "pin_derived_eph_key_pop+jwt";

/// Issues the seed credential: proofs over both the device key and the
/// PIN-derived key, a reset retry counter, the encoded seed, and the issuer
/// session id its redemption is correlated by.
pub struct SeedCredentialHandler;

#[async_trait]
impl<P: Provider> StepHandler<P> for SeedCredentialHandler {
    async fn on_seed_credential(
        &self, ctx: &StepContext<'_, P>, request: &StepRequest, response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let device_proof = request
            .require_body_field("device_key_proof")?
            .as_str()
            .ok_or_else(|| Error::invalid_request("device_key_proof must be a JWT"))?
            .to_owned();
        let pin_pop = request
            .require_body_field("pin_derived_key_pop")?
            .as_str()
            .ok_or_else(|| Error::invalid_request("pin_derived_key_pop must be a JWT"))?
            .to_owned();

        let issuer_id = ctx.config.credential_issuer(ctx.variant);
        let device_key = verify_key_proof(session, &device_proof, PROOF_JWT_TYP, Some(&issuer_id))?;
        let pin_derived_key = verify_key_proof(session, &pin_pop, PIN_POP_JWT_TYP, None)?;

        // a fresh PIN registration starts with a clean counter
        let digest = device_key.thumbprint().map_err(|e| Error::crypto(e.to_string()))?;
        pin::reset(ctx.provider, &digest, ctx.config.pin_retry_counter_validity()).await?;

        session.put_json(SessionKey::HolderKey, &device_key)?;
        session.put_json(SessionKey::PinDerivedKey, &pin_derived_key)?;

        let now = Utc::now();
        let seed = SeedData {
            pid: session.checked_json::<PidData>(SessionKey::IdentityData)?,
            device_key,
            pin_derived_key,
            issuer_id,
            issued_at: now,
            expires_at: now + ctx.config.issuer_session_id_lifetime(),
        };
        let credential = ctx
            .provider
            .issue_seed(&seed)
            .await
            .map_err(|e| Error::server(format!("issue building seed credential: {e}")))?;

        let session_id =
            nonce::create(ctx.provider, ctx.rng, ctx.config.issuer_session_id_lifetime()).await?;

        session.put_instant(SessionKey::CredentialIssuedAt, now);
        response.set("credential", credential);
        response.set("pid_issuer_session_id", session_id.value);
        Ok(())
    }
}

/// Redeems a seed credential: decodes and checks the seed, verifies the PIN
/// proof under the retry guard, and loads the seed's identity data into the
/// redemption session. A failed PIN proof increments the counter through the
/// optimistic contract; reaching the ceiling ends the binding attempt.
pub struct SeedTokenHandler;

#[async_trait]
impl<P: Provider> StepHandler<P> for SeedTokenHandler {
    async fn on_seed_token(
        &self, ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let seed_credential = request.require_param("seed_credential")?;
        let pin_pop = request.require_param("pin_derived_key_pop")?.to_owned();

        let seed = ctx
            .provider
            .decode_seed(seed_credential)
            .await
            .map_err(|e| Error::invalid_grant("seed credential is invalid").with_internal(e.to_string()))?;
        if seed.issuer_id != ctx.config.credential_issuer(ctx.variant) {
            return Err(Error::invalid_grant("seed credential is invalid")
                .with_internal(format!("seed issued by '{}'", seed.issuer_id)));
        }
        if seed.expires_at <= Utc::now() {
            return Err(Error::invalid_grant("seed credential is expired"));
        }

        let digest = seed.device_key.thumbprint().map_err(|e| Error::crypto(e.to_string()))?;
        let counter = pin::load(ctx.provider, &digest).await?;
        if counter.value >= ctx.config.max_pin_retries {
            return Err(Error::pin_locked());
        }

        if let Err(cause) = verify_pin_pop(session, &pin_pop, &seed) {
            let incremented = pin::increment(ctx.provider, &counter).await?;
            if incremented.value >= ctx.config.max_pin_retries {
                return Err(Error::pin_locked());
            }
            return Err(cause);
        }

        session.put_json(SessionKey::IdentityData, &seed.pid)?;
        session.put_json(SessionKey::HolderKey, &seed.device_key)?;
        session.put_json(SessionKey::PinDerivedKey, &seed.pin_derived_key)?;
        Ok(())
    }
}

// The PIN proof is signed with the PIN-derived key from the seed and carries
// the issuer session id as its challenge.
fn verify_pin_pop(session: &Session, compact: &str, seed: &SeedData) -> Result<()> {
    let jwt: crate::jwt::Jwt<crate::handlers::credential::ProofClaims> = compact.parse()?;
    if jwt.header.typ.as_deref() != Some(PIN_POP_JWT_TYP) {
        return Err(Error::invalid_grant("PIN verification failed")
            .with_internal("pin pop typ is invalid"));
    }
    jwt.verify_signature(&seed.pin_derived_key).map_err(|e| {
        Error::invalid_grant("PIN verification failed")
            .with_internal(e.internal_message().unwrap_or("pin pop signature invalid").to_owned())
    })?;

    let challenge = session.checked_param(SessionKey::IssuerSessionId)?;
    if jwt.claims.nonce.as_deref() != Some(challenge) {
        return Err(Error::invalid_grant("PIN verification failed")
            .with_internal("pin pop challenge mismatch"));
    }
    Ok(())
}
