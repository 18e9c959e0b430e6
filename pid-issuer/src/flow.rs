//! # Flow state machine
//!
//! Dispatches the nine protocol steps for one flow variant. A step resolves
//! its session by the step's correlation key, runs an ordered pipeline of
//! handlers against an in-memory copy, and persists the advanced session in a
//! single guarded store write. Two requests racing on the same session can
//! never both advance it: the compare-and-set on `next_expected_step` makes
//! exactly one of them lose.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use pid_crypto::{rng, sha256_b64, SecureRandom};

use pid_openid::issuer::{FlowVariant, ResponseBuilder, Step, StepRequest, StepResponse};
use pid_openid::provider::{Provider, SessionStore, StoreError};
use pid_openid::session::{CorrelationKey, Session, SessionKey};
use pid_openid::{Error, Result};

use crate::config::Config;
use crate::handlers::{
    AuthorizationHandler, ClientAttestationHandler, ClientIdMatchHandler, CredentialHandler,
    ExpirationValidationHandler, FinishAuthorizationHandler, KeyProofHandler, NonceIssuanceHandler,
    ParHandler, PkceHandler, PresentationSigningHandler, RedirectUriHandler,
    RefreshTokenRotationHandler, RequestOrderHandler, ScopeHandler, SeedCredentialHandler,
    SeedTokenHandler, SigningMode, StateHandler, TokenHandler,
};
use crate::{dpop, nonce, state};

/// Shared context step handlers run under.
pub struct StepContext<'a, P> {
    /// The issuance environment.
    pub provider: &'a P,

    /// Issuance configuration.
    pub config: &'a Config,

    /// Process-wide random source.
    pub rng: &'a SecureRandom,

    /// The active flow variant.
    pub variant: FlowVariant,
}

/// One stage of a step pipeline. A handler implements the steps it
/// participates in; the rest pass through. Handlers mutate only the
/// in-memory session and response; nothing is persisted until every handler
/// in the pipeline succeeded.
#[async_trait]
pub trait StepHandler<P: Provider>: Send + Sync {
    /// Pushed authorization request.
    async fn on_pushed_authorization(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        _session: &mut Session,
    ) -> Result<()> {
        Ok(())
    }

    /// Authorization request.
    async fn on_authorization(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        _session: &mut Session,
    ) -> Result<()> {
        Ok(())
    }

    /// Finish-authorization request.
    async fn on_finish_authorization(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        _session: &mut Session,
    ) -> Result<()> {
        Ok(())
    }

    /// Token request.
    async fn on_token(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        _session: &mut Session,
    ) -> Result<()> {
        Ok(())
    }

    /// Refresh-token request.
    async fn on_refresh_token(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        _session: &mut Session,
    ) -> Result<()> {
        Ok(())
    }

    /// Credential request.
    async fn on_credential(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        _session: &mut Session,
    ) -> Result<()> {
        Ok(())
    }

    /// Seed-credential request.
    async fn on_seed_credential(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        _session: &mut Session,
    ) -> Result<()> {
        Ok(())
    }

    /// Seed-credential-token request.
    async fn on_seed_token(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        _session: &mut Session,
    ) -> Result<()> {
        Ok(())
    }

    /// Presentation-signing request.
    async fn on_presentation_signing(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        _session: &mut Session,
    ) -> Result<()> {
        Ok(())
    }
}

/// The step dispatcher for one flow variant.
pub struct FlowController<P: Provider> {
    variant: FlowVariant,
    config: Arc<Config>,
    rng: SecureRandom,
    handlers: Vec<Box<dyn StepHandler<P>>>,
}

impl<P: Provider + 'static> FlowController<P> {
    /// The device-bound, issuer-signed flow.
    #[must_use]
    pub fn device(config: Arc<Config>, rng: SecureRandom) -> Self {
        let mut handlers = Self::common_handlers();
        handlers.push(Box::new(TokenHandler));
        handlers.push(Box::new(KeyProofHandler));
        handlers.push(Box::new(CredentialHandler::new(SigningMode::Issuer)));
        handlers.push(Box::new(NonceIssuanceHandler));
        Self { variant: FlowVariant::Device, config, rng, handlers }
    }

    /// The device-bound, issuer-signed flow with refresh-token re-issuance.
    #[must_use]
    pub fn device_refresh(config: Arc<Config>, rng: SecureRandom) -> Self {
        let mut handlers = Self::common_handlers();
        handlers.push(Box::new(TokenHandler));
        handlers.push(Box::new(RefreshTokenRotationHandler));
        handlers.push(Box::new(KeyProofHandler));
        handlers.push(Box::new(CredentialHandler::new(SigningMode::Issuer)));
        handlers.push(Box::new(NonceIssuanceHandler));
        Self { variant: FlowVariant::DeviceRefresh, config, rng, handlers }
    }

    /// The designated-verifier-signed (auth-channel) flow.
    #[must_use]
    pub fn auth_channel(
        config: Arc<Config>, rng: SecureRandom, dvs_private_key: p256::SecretKey,
    ) -> Self {
        let mut handlers = Self::common_handlers();
        handlers.push(Box::new(TokenHandler));
        handlers.push(Box::new(CredentialHandler::new(SigningMode::DesignatedVerifier(
            dvs_private_key.clone(),
        ))));
        handlers.push(Box::new(PresentationSigningHandler::new(dvs_private_key)));
        handlers.push(Box::new(NonceIssuanceHandler));
        Self { variant: FlowVariant::AuthChannel, config, rng, handlers }
    }

    /// The PIN-protected seed-credential flow.
    #[must_use]
    pub fn pin_seed(config: Arc<Config>, rng: SecureRandom) -> Self {
        let mut handlers = Self::common_handlers();
        handlers.push(Box::new(SeedTokenHandler));
        handlers.push(Box::new(TokenHandler));
        handlers.push(Box::new(SeedCredentialHandler));
        handlers.push(Box::new(CredentialHandler::new(SigningMode::Issuer)));
        handlers.push(Box::new(NonceIssuanceHandler));
        Self { variant: FlowVariant::PinSeed, config, rng, handlers }
    }

    // Validation stages shared by every variant, in pipeline order.
    fn common_handlers() -> Vec<Box<dyn StepHandler<P>>> {
        vec![
            Box::new(ClientIdMatchHandler),
            Box::new(RedirectUriHandler),
            Box::new(RequestOrderHandler),
            Box::new(ExpirationValidationHandler),
            Box::new(StateHandler),
            Box::new(PkceHandler),
            Box::new(ScopeHandler),
            Box::new(ClientAttestationHandler),
            Box::new(dpop::DpopHandler),
            Box::new(ParHandler),
            Box::new(AuthorizationHandler),
            Box::new(FinishAuthorizationHandler),
        ]
    }

    /// The flow variant this controller serves.
    #[must_use]
    pub const fn variant(&self) -> FlowVariant {
        self.variant
    }

    /// Process one protocol step. All-or-nothing: a handler failure anywhere
    /// in the pipeline leaves previously committed session state untouched.
    #[tracing::instrument(level = "debug", skip(self, provider, request), fields(variant = %self.variant, step = %step))]
    pub async fn handle(
        &self, provider: &P, step: Step, request: &StepRequest,
    ) -> Result<StepResponse> {
        let result = self.process(provider, step, request).await;
        if let Err(e) = &result {
            tracing::warn!(code = e.code(), internal = e.internal_message(), "step failed");
        }
        result
    }

    async fn process(
        &self, provider: &P, step: Step, request: &StepRequest,
    ) -> Result<StepResponse> {
        if !state::supports(self.variant, step) {
            return Err(Error::unsupported_operation(self.variant, step));
        }

        let (mut session, created) = self.resolve_session(provider, step, request).await?;
        let guard = session.next_expected_step;

        let ctx = StepContext {
            provider,
            config: &self.config,
            rng: &self.rng,
            variant: self.variant,
        };
        let mut response = ResponseBuilder::new();
        for handler in &self.handlers {
            dispatch(handler.as_ref(), step, &ctx, request, &mut response, &mut session).await?;
        }

        let now = Utc::now();
        match state::successor(self.variant, step) {
            Some(next) => {
                session.next_expected_step = next;
                session.touch(now, self.config.session_lifetime());
            }
            None => session.terminate(now),
        }

        if created {
            provider.create(&session).await.map_err(|e| match e {
                StoreError::Duplicate => Error::server("correlation value collision on create"),
                e => Error::server(format!("issue saving session: {e}")),
            })?;
        } else {
            provider.update(&session, guard).await.map_err(|e| match e {
                StoreError::Conflict => Error::order_violation(step),
                StoreError::NotFound => Error::session_not_found(),
                e => Error::server(format!("issue saving session: {e}")),
            })?;
        }

        Ok(response.build())
    }

    // Resolve the step's session: create one for the first protocol step,
    // load by the designated correlation key otherwise. A seed-token request
    // whose issuer session id is not yet a session consumes the session-id
    // nonce and opens the redemption session.
    async fn resolve_session(
        &self, provider: &P, step: Step, request: &StepRequest,
    ) -> Result<(Session, bool)> {
        let now = Utc::now();
        let Some(key) = state::correlation(step) else {
            let session = Session::new(self.variant, step, now, self.config.session_lifetime());
            return Ok((session, true));
        };

        let value = self.correlation_value(key, request)?;
        match provider.find(key, &value).await {
            Ok(session) => {
                if session.flow_variant == self.variant {
                    Ok((session, false))
                } else {
                    Err(Error::session_not_found()
                        .with_internal("session belongs to a different flow variant"))
                }
            }
            Err(StoreError::NotFound) if step == Step::SeedToken => {
                let consumed = nonce::validate_and_consume(provider, &value).await?;
                let mut session =
                    Session::new(self.variant, Step::SeedToken, now, self.config.session_lifetime());
                session.put(SessionKey::IssuerSessionId, &consumed.value);
                session.put_instant(SessionKey::IssuerSessionIdExpiry, consumed.expires_at);
                // persisted right away: a failed PIN attempt must leave the
                // redemption session addressable for the next attempt
                provider
                    .create(&session)
                    .await
                    .map_err(|e| Error::server(format!("issue saving session: {e}")))?;
                Ok((session, false))
            }
            Err(StoreError::NotFound) => Err(Error::session_not_found()),
            Err(e) => Err(Error::server(format!("issue loading session: {e}"))),
        }
    }

    // Extract and validate the correlation value the step looks its session
    // up by.
    fn correlation_value(&self, key: CorrelationKey, request: &StepRequest) -> Result<String> {
        match key {
            CorrelationKey::RequestUri => {
                let value = request.require_param("request_uri")?;
                let token = value.strip_prefix("urn:ietf:params:oauth:request_uri:");
                if !token.is_some_and(rng::is_well_formed) {
                    return Err(Error::invalid_request("invalid request_uri")
                        .with_internal(format!("invalid request_uri: {value}")));
                }
                Ok(value.into())
            }
            CorrelationKey::IssuerState => {
                let value = request.require_param("issuer_state")?;
                if !rng::is_well_formed(value) {
                    return Err(Error::invalid_request("invalid issuer_state")
                        .with_internal(format!("invalid issuer_state: {value}")));
                }
                Ok(value.into())
            }
            CorrelationKey::AuthorizationCode => {
                let value = request.require_param("code")?;
                if !rng::is_well_formed(value) {
                    return Err(Error::invalid_grant("invalid authorization code"));
                }
                Ok(value.into())
            }
            CorrelationKey::AccessToken => {
                let scheme = &self.config.authorization_scheme;
                let authorization = request
                    .header("Authorization")
                    .ok_or_else(|| Error::unauthorized(scheme, "authorization header missing"))?;
                let token = authorization
                    .strip_prefix(scheme.as_str())
                    .and_then(|rest| rest.strip_prefix(' '))
                    .ok_or_else(|| Error::unauthorized(scheme, "unexpected authorization scheme"))?;
                if !rng::is_well_formed(token) {
                    return Err(Error::unauthorized(scheme, "invalid_token"));
                }
                Ok(token.into())
            }
            CorrelationKey::RefreshTokenDigest => {
                let token = request.require_param("refresh_token")?;
                Ok(sha256_b64(token.as_bytes()))
            }
            CorrelationKey::IssuerSessionId => {
                let value = request.require_param("session_id")?;
                if !rng::is_well_formed(value) {
                    return Err(Error::invalid_request("session id is invalid"));
                }
                Ok(value.into())
            }
        }
    }
}

async fn dispatch<P: Provider>(
    handler: &dyn StepHandler<P>, step: Step, ctx: &StepContext<'_, P>, request: &StepRequest,
    response: &mut ResponseBuilder, session: &mut Session,
) -> Result<()> {
    match step {
        Step::PushedAuthorization => {
            handler.on_pushed_authorization(ctx, request, response, session).await
        }
        Step::Authorization => handler.on_authorization(ctx, request, response, session).await,
        Step::FinishAuthorization => {
            handler.on_finish_authorization(ctx, request, response, session).await
        }
        Step::Token => handler.on_token(ctx, request, response, session).await,
        Step::RefreshToken => handler.on_refresh_token(ctx, request, response, session).await,
        Step::Credential => handler.on_credential(ctx, request, response, session).await,
        Step::SeedCredential => handler.on_seed_credential(ctx, request, response, session).await,
        Step::SeedToken => handler.on_seed_token(ctx, request, response, session).await,
        Step::PresentationSigning => {
            handler.on_presentation_signing(ctx, request, response, session).await
        }
    }
}
