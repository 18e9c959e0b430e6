//! # DPoP
//!
//! Validation of DPoP proof JWTs ([RFC9449]): a self-signed token binding a
//! request to a key, a method and URI, and a store-backed single-use server
//! nonce. A proof without a nonce (or with a stale one) is answered with a
//! fresh nonce in the `DPoP-Nonce` header and the `use_dpop_nonce` code; a
//! replayed nonce is a hard failure.
//!
//! [RFC9449]: https://www.rfc-editor.org/rfc/rfc9449

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use pid_crypto::{PublicKeyJwk, SecureRandom};
use serde::Deserialize;

use pid_openid::issuer::{ResponseBuilder, Step, StepRequest};
use pid_openid::provider::{NonceStore, Provider};
use pid_openid::session::{Session, SessionKey};
use pid_openid::{Error, ErrorKind, Result};

use crate::flow::{StepContext, StepHandler};
use crate::jwt::{check_issued_at, Jwt, TimeWindow};
use crate::nonce;

const DPOP_HEADER: &str = "DPoP";
const DPOP_JWT_TYP: &str = "dpop+jwt";

/// Claims of a DPoP proof JWT.
#[derive(Clone, Debug, Deserialize)]
pub struct DpopClaims {
    /// Bound request method.
    pub htm: String,

    /// Bound request URI.
    pub htu: String,

    /// Issuance time.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub iat: DateTime<Utc>,

    /// Token id.
    pub jti: String,

    /// Server-issued single-use nonce.
    pub nonce: Option<String>,
}

/// Validate the DPoP proof carried by `request` and return the proven key.
///
/// The proof must be signed with the key embedded in its header, bind the
/// request method and `expected_url`, carry a fresh `iat`, and present a
/// consumable server nonce.
pub async fn verify_proof(
    store: &impl NonceStore, rng: &SecureRandom, request: &StepRequest, expected_url: &str,
    window: &TimeWindow, nonce_ttl: TimeDelta,
) -> Result<PublicKeyJwk> {
    let Some(compact) = request.header(DPOP_HEADER) else {
        return Err(Error::invalid_request("DPoP proof is missing"));
    };

    let jwt: Jwt<DpopClaims> = compact.parse()?;
    if jwt.header.typ.as_deref() != Some(DPOP_JWT_TYP) {
        return Err(Error::invalid_request("DPoP proof typ is invalid"));
    }
    let Some(key) = jwt.header.jwk.clone() else {
        return Err(Error::invalid_request("DPoP proof carries no key"));
    };
    jwt.verify_signature(&key)?;

    if !jwt.claims.htm.eq_ignore_ascii_case(&request.method) {
        return Err(Error::invalid_request("DPoP proof is bound to a different method"));
    }
    if jwt.claims.htu != expected_url {
        return Err(Error::invalid_request("DPoP proof is bound to a different URI")
            .with_internal(format!("htu '{}', expected '{expected_url}'", jwt.claims.htu)));
    }
    check_issued_at(jwt.claims.iat, Utc::now(), window)
        .map_err(|violation| Error::invalid_request(format!("DPoP proof {violation}")))?;

    match &jwt.claims.nonce {
        None => Err(challenge(store, rng, nonce_ttl).await?),
        Some(value) => match nonce::validate_and_consume(store, value).await {
            Ok(_) => Ok(key),
            // an expired or unknown nonce is answered with a fresh challenge;
            // a replayed one is a hard failure
            Err(e) if e.kind() == ErrorKind::ExpiredNonce => {
                Err(challenge(store, rng, nonce_ttl).await?)
            }
            Err(e) => Err(e),
        },
    }
}

// Issue a fresh DPoP nonce and wrap it into the `use_dpop_nonce` error.
async fn challenge(
    store: &impl NonceStore, rng: &SecureRandom, nonce_ttl: TimeDelta,
) -> Result<Error> {
    let fresh = nonce::create(store, rng, nonce_ttl).await?;
    Ok(Error::use_dpop_nonce(fresh.value))
}

/// Pipeline stage enforcing DPoP on token-protected steps. The token step
/// binds the proven key into the session; every later step must prove the
/// same key again.
pub struct DpopHandler;

impl DpopHandler {
    async fn proven_key<P: Provider>(
        ctx: &StepContext<'_, P>, request: &StepRequest, step: Step,
    ) -> Result<PublicKeyJwk> {
        let url = ctx.config.step_url(ctx.variant, step);
        let window = TimeWindow {
            tolerance: ctx.config.proof_time_tolerance(),
            validity: ctx.config.proof_validity(),
        };
        verify_proof(ctx.provider, ctx.rng, request, &url, &window, ctx.config.dpop_nonce_lifetime())
            .await
    }

    fn bind(session: &mut Session, key: &PublicKeyJwk) -> Result<()> {
        session.put_json(SessionKey::DpopKey, key)
    }

    fn ensure_bound_key<P: Provider>(
        ctx: &StepContext<'_, P>, session: &Session, key: &PublicKeyJwk,
    ) -> Result<()> {
        let bound = session.checked_jwk(SessionKey::DpopKey)?;
        let same = match (bound.thumbprint(), key.thumbprint()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if same {
            Ok(())
        } else {
            Err(Error::unauthorized(
                &ctx.config.authorization_scheme,
                "DPoP proof key differs from the bound key",
            ))
        }
    }
}

#[async_trait]
impl<P: Provider> StepHandler<P> for DpopHandler {
    async fn on_token(
        &self, ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let key = Self::proven_key(ctx, request, Step::Token).await?;
        Self::bind(session, &key)
    }

    async fn on_seed_token(
        &self, ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let key = Self::proven_key(ctx, request, Step::SeedToken).await?;
        Self::bind(session, &key)
    }

    async fn on_refresh_token(
        &self, ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let key = Self::proven_key(ctx, request, Step::RefreshToken).await?;
        Self::ensure_bound_key(ctx, session, &key)
    }

    async fn on_credential(
        &self, ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let key = Self::proven_key(ctx, request, Step::Credential).await?;
        Self::ensure_bound_key(ctx, session, &key)
    }

    async fn on_seed_credential(
        &self, ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let key = Self::proven_key(ctx, request, Step::SeedCredential).await?;
        Self::ensure_bound_key(ctx, session, &key)
    }

    async fn on_presentation_signing(
        &self, ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let key = Self::proven_key(ctx, request, Step::PresentationSigning).await?;
        Self::ensure_bound_key(ctx, session, &key)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_utils::provider::Provider;
    use test_utils::{keys, proofs};

    use super::*;

    const URL: &str = "https://issuer.example.com/c/token";

    fn window() -> TimeWindow {
        TimeWindow { tolerance: TimeDelta::seconds(30), validity: TimeDelta::seconds(300) }
    }

    fn request(proof: &str) -> StepRequest {
        StepRequest::new("POST").with_header(DPOP_HEADER, proof)
    }

    async fn issued_nonce(provider: &Provider) -> String {
        nonce::create(provider, &SecureRandom::new(), TimeDelta::seconds(60))
            .await
            .expect("nonce is created")
            .value
    }

    #[tokio::test]
    async fn missing_nonce_is_challenged() {
        let provider = Provider::new();
        let proof = proofs::dpop_proof("POST", URL, None, &keys::device_key());

        let err = verify_proof(
            &provider,
            &SecureRandom::new(),
            &request(&proof),
            URL,
            &window(),
            TimeDelta::seconds(60),
        )
        .await
        .expect_err("challenge");

        assert_eq!(err.kind(), ErrorKind::UseDpopNonce);
        let (name, value) = &err.headers()[0];
        assert_eq!(name, "DPoP-Nonce");

        // the challenged nonce is immediately consumable
        let proof = proofs::dpop_proof("POST", URL, Some(value), &keys::device_key());
        let key = verify_proof(
            &provider,
            &SecureRandom::new(),
            &request(&proof),
            URL,
            &window(),
            TimeDelta::seconds(60),
        )
        .await
        .expect("proof is valid");
        assert_eq!(key, keys::jwk(&keys::device_key()));
    }

    #[tokio::test]
    async fn nonce_replay_is_rejected() {
        let provider = Provider::new();
        let value = issued_nonce(&provider).await;
        let proof = proofs::dpop_proof("POST", URL, Some(&value), &keys::device_key());

        verify_proof(
            &provider,
            &SecureRandom::new(),
            &request(&proof),
            URL,
            &window(),
            TimeDelta::seconds(60),
        )
        .await
        .expect("first use");

        let replay = proofs::dpop_proof("POST", URL, Some(&value), &keys::device_key());
        let err = verify_proof(
            &provider,
            &SecureRandom::new(),
            &request(&replay),
            URL,
            &window(),
            TimeDelta::seconds(60),
        )
        .await
        .expect_err("replay");
        assert_eq!(err.kind(), ErrorKind::ReplayedNonce);
    }

    #[tokio::test]
    async fn foreign_uri_is_rejected() {
        let provider = Provider::new();
        let value = issued_nonce(&provider).await;
        let proof =
            proofs::dpop_proof("POST", "https://other.example.com/token", Some(&value), &keys::device_key());

        let err = verify_proof(
            &provider,
            &SecureRandom::new(),
            &request(&proof),
            URL,
            &window(),
            TimeDelta::seconds(60),
        )
        .await
        .expect_err("wrong htu");
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn stale_issued_at_is_rejected() {
        let provider = Provider::new();
        let value = issued_nonce(&provider).await;
        let iat = Utc::now().timestamp() - 3600;
        let claims = json!({
            "htm": "POST", "htu": URL, "iat": iat, "jti": "jti-1", "nonce": value,
        });
        let proof = keys::es256_proof_jwt(DPOP_JWT_TYP, &claims, &keys::device_key());

        let err = verify_proof(
            &provider,
            &SecureRandom::new(),
            &request(&proof),
            URL,
            &window(),
            TimeDelta::seconds(60),
        )
        .await
        .expect_err("stale iat");
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }
}
