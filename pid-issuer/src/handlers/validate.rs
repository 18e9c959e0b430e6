//! Validation stages shared by every flow variant.

use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use sha2::{Digest, Sha256};

use pid_openid::issuer::{ResponseBuilder, Step, StepRequest};
use pid_openid::provider::{ClientRegistry, Provider};
use pid_openid::session::{Session, SessionKey};
use pid_openid::{Error, Result};

use crate::attestation;
use crate::flow::{StepContext, StepHandler};
use crate::jwt::TimeWindow;

const PID_SCOPE: &str = "pid";
const CLIENT_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-client-attestation";

/// Requires a registered `client_id` on the first step and a matching one on
/// the steps that repeat it.
pub struct ClientIdMatchHandler;

impl ClientIdMatchHandler {
    fn ensure_match(session: &Session, request: &StepRequest, mismatch: Error) -> Result<()> {
        match request.param("client_id") {
            None => Ok(()),
            Some(asserted) => {
                if session.param(SessionKey::ClientId) == Some(asserted) {
                    Ok(())
                } else {
                    Err(mismatch)
                }
            }
        }
    }
}

#[async_trait]
impl<P: Provider> StepHandler<P> for ClientIdMatchHandler {
    async fn on_pushed_authorization(
        &self, ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let client_id = request.require_param("client_id")?;
        let registered = ctx
            .provider
            .client(client_id)
            .await
            .map_err(|e| Error::server(format!("issue loading client: {e}")))?;
        if registered.is_none() {
            return Err(Error::invalid_client("client is not registered")
                .with_internal(format!("unknown client_id: {client_id}")));
        }
        session.put(SessionKey::ClientId, client_id);
        Ok(())
    }

    async fn on_authorization(
        &self, _ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::ensure_match(session, request, Error::invalid_request("client_id mismatch"))
    }

    async fn on_token(
        &self, _ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::ensure_match(
            session,
            request,
            Error::invalid_grant("client_id differs from authorized one"),
        )
    }

    async fn on_refresh_token(
        &self, _ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::ensure_match(
            session,
            request,
            Error::invalid_grant("client_id differs from authorized one"),
        )
    }
}

/// Registers the redirect URI at PAR and pins later repetitions to it.
pub struct RedirectUriHandler;

#[async_trait]
impl<P: Provider> StepHandler<P> for RedirectUriHandler {
    async fn on_pushed_authorization(
        &self, _ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let redirect_uri = request.require_param("redirect_uri")?;
        session.put(SessionKey::RedirectUri, redirect_uri);
        Ok(())
    }

    async fn on_token(
        &self, _ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        match request.param("redirect_uri") {
            None => Ok(()),
            Some(asserted) => {
                if session.param(SessionKey::RedirectUri) == Some(asserted) {
                    Ok(())
                } else {
                    Err(Error::invalid_grant("redirect_uri differs from authorized one"))
                }
            }
        }
    }
}

/// Rejects any step the session does not expect next. Never mutates state;
/// a retry against an already-advanced session fails here instead of
/// double-applying effects.
pub struct RequestOrderHandler;

impl RequestOrderHandler {
    fn check(session: &Session, step: Step) -> Result<()> {
        if session.next_expected_step == step {
            Ok(())
        } else {
            Err(Error::order_violation(step))
        }
    }
}

#[async_trait]
impl<P: Provider> StepHandler<P> for RequestOrderHandler {
    async fn on_pushed_authorization(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::check(session, Step::PushedAuthorization)
    }

    async fn on_authorization(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::check(session, Step::Authorization)
    }

    async fn on_finish_authorization(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::check(session, Step::FinishAuthorization)
    }

    async fn on_token(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::check(session, Step::Token)
    }

    async fn on_refresh_token(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::check(session, Step::RefreshToken)
    }

    async fn on_credential(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::check(session, Step::Credential)
    }

    async fn on_seed_credential(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::check(session, Step::SeedCredential)
    }

    async fn on_seed_token(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::check(session, Step::SeedToken)
    }

    async fn on_presentation_signing(
        &self, _ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::check(session, Step::PresentationSigning)
    }
}

/// Rejects access-token-protected steps once the token lifetime has passed.
pub struct ExpirationValidationHandler;

impl ExpirationValidationHandler {
    fn check<P: Provider>(ctx: &StepContext<'_, P>, session: &Session) -> Result<()> {
        let expires_at = session.checked_instant(SessionKey::AccessTokenExpiry)?;
        if expires_at <= Utc::now() {
            return Err(Error::unauthorized(
                &ctx.config.authorization_scheme,
                "access token expired",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl<P: Provider> StepHandler<P> for ExpirationValidationHandler {
    async fn on_credential(
        &self, ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::check(ctx, session)
    }

    async fn on_seed_credential(
        &self, ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::check(ctx, session)
    }

    async fn on_presentation_signing(
        &self, ctx: &StepContext<'_, P>, _request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::check(ctx, session)
    }
}

/// Carries the wallet's opaque `state` value through to the redirect.
pub struct StateHandler;

#[async_trait]
impl<P: Provider> StepHandler<P> for StateHandler {
    async fn on_pushed_authorization(
        &self, _ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        if let Some(state) = request.param("state") {
            session.put(SessionKey::State, state);
        }
        Ok(())
    }
}

/// PKCE (S256 only): challenge at PAR, verifier at token.
pub struct PkceHandler;

#[async_trait]
impl<P: Provider> StepHandler<P> for PkceHandler {
    async fn on_pushed_authorization(
        &self, _ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let challenge = request.require_param("code_challenge")?;
        let method = request.require_param("code_challenge_method")?;
        if method != "S256" {
            return Err(Error::invalid_request("code_challenge_method must be S256"));
        }
        session.put(SessionKey::CodeChallenge, challenge);
        Ok(())
    }

    async fn on_token(
        &self, _ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let verifier = request.require_param("code_verifier")?;
        let challenge = Base64UrlUnpadded::encode_string(&Sha256::digest(verifier));
        if session.param(SessionKey::CodeChallenge) == Some(challenge.as_str()) {
            Ok(())
        } else {
            Err(Error::invalid_grant("code_verifier is invalid"))
        }
    }
}

/// Requires the PID scope.
pub struct ScopeHandler;

#[async_trait]
impl<P: Provider> StepHandler<P> for ScopeHandler {
    async fn on_pushed_authorization(
        &self, _ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let scope = request.require_param("scope")?;
        if scope != PID_SCOPE {
            return Err(Error::invalid_scope(format!("scope must be '{PID_SCOPE}'")));
        }
        session.put(SessionKey::Scope, scope);
        Ok(())
    }
}

/// Verifies the dual-JWT wallet attestation presented with the pushed
/// authorization request.
pub struct ClientAttestationHandler;

#[async_trait]
impl<P: Provider> StepHandler<P> for ClientAttestationHandler {
    async fn on_pushed_authorization(
        &self, ctx: &StepContext<'_, P>, request: &StepRequest, _response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let assertion_type = request.param("client_assertion_type").unwrap_or_default();
        if assertion_type != CLIENT_ASSERTION_TYPE {
            return Err(Error::invalid_client("client assertion type is missing or not supported")
                .with_internal(format!("client_assertion_type: '{assertion_type}'")));
        }
        let assertion = request.require_param("client_assertion").map_err(|_| {
            Error::invalid_client("client assertion is missing")
        })?;
        let Some((attestation_jwt, pop_jwt)) = assertion.split_once('~') else {
            return Err(Error::invalid_client(
                "client assertion must contain an attestation and a proof of possession",
            ));
        };

        let client_id = session.checked_param(SessionKey::ClientId)?;
        let window = TimeWindow {
            tolerance: ctx.config.proof_time_tolerance(),
            validity: ctx.config.proof_validity(),
        };
        attestation::validate(
            ctx.provider,
            &window,
            attestation_jwt,
            pop_jwt,
            client_id,
            &ctx.config.credential_issuer(ctx.variant),
        )
        .await?;
        Ok(())
    }
}
