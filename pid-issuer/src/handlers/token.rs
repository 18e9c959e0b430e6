//! Token issuance: authorization-code exchange, refresh-token rotation, and
//! the proof-of-possession challenge (`c_nonce`) appended to token-shaped
//! responses.

use async_trait::async_trait;
use chrono::Utc;
use pid_crypto::sha256_b64;

use pid_openid::issuer::{ResponseBuilder, StepRequest};
use pid_openid::provider::Provider;
use pid_openid::session::{Session, SessionKey};
use pid_openid::{Error, Result};

use crate::flow::{StepContext, StepHandler};

/// Exchanges grants for access tokens.
pub struct TokenHandler;

impl TokenHandler {
    fn issue_access_token<P: Provider>(
        ctx: &StepContext<'_, P>, response: &mut ResponseBuilder, session: &mut Session,
    ) {
        let access_token = ctx.rng.token();
        let lifetime = ctx.config.access_token_lifetime();

        session.put(SessionKey::AccessToken, &access_token);
        session.put_instant(SessionKey::AccessTokenExpiry, Utc::now() + lifetime);

        response.set("access_token", access_token);
        response.set("token_type", ctx.config.authorization_scheme.as_str());
        response.set("expires_in", lifetime.num_seconds());
    }
}

#[async_trait]
impl<P: Provider> StepHandler<P> for TokenHandler {
    async fn on_token(
        &self, ctx: &StepContext<'_, P>, request: &StepRequest, response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let grant_type = request.require_param("grant_type")?;
        if grant_type != "authorization_code" {
            return Err(Error::invalid_grant(format!(
                "grant_type '{grant_type}' is not supported here"
            )));
        }
        let code_expiry = session.checked_instant(SessionKey::AuthorizationCodeExpiry)?;
        if code_expiry <= Utc::now() {
            return Err(Error::invalid_grant("the authorization code has expired"));
        }

        Self::issue_access_token(ctx, response, session);
        Ok(())
    }

    async fn on_refresh_token(
        &self, ctx: &StepContext<'_, P>, request: &StepRequest, response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let grant_type = request.require_param("grant_type")?;
        if grant_type != "refresh_token" {
            return Err(Error::invalid_grant(format!(
                "grant_type '{grant_type}' is not supported here"
            )));
        }

        Self::issue_access_token(ctx, response, session);
        Ok(())
    }

    async fn on_seed_token(
        &self, ctx: &StepContext<'_, P>, _request: &StepRequest, response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::issue_access_token(ctx, response, session);
        Ok(())
    }
}

/// Issues a refresh token at token time and rotates it on every refresh.
/// Only the digest is persisted.
pub struct RefreshTokenRotationHandler;

impl RefreshTokenRotationHandler {
    fn rotate<P: Provider>(
        ctx: &StepContext<'_, P>, response: &mut ResponseBuilder, session: &mut Session,
    ) {
        let refresh_token = ctx.rng.token();
        session.put(SessionKey::RefreshTokenDigest, sha256_b64(refresh_token.as_bytes()));
        response.set("refresh_token", refresh_token);
    }
}

#[async_trait]
impl<P: Provider> StepHandler<P> for RefreshTokenRotationHandler {
    async fn on_token(
        &self, ctx: &StepContext<'_, P>, _request: &StepRequest, response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::rotate(ctx, response, session);
        Ok(())
    }

    async fn on_refresh_token(
        &self, ctx: &StepContext<'_, P>, _request: &StepRequest, response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::rotate(ctx, response, session);
        Ok(())
    }
}

/// Appends a fresh proof-of-possession challenge to token-shaped responses.
pub struct NonceIssuanceHandler;

impl NonceIssuanceHandler {
    fn issue<P: Provider>(
        ctx: &StepContext<'_, P>, response: &mut ResponseBuilder, session: &mut Session,
    ) {
        let c_nonce = ctx.rng.token();
        let lifetime = ctx.config.c_nonce_lifetime();

        session.put(SessionKey::CNonce, &c_nonce);
        session.put_instant(SessionKey::CNonceExpiry, Utc::now() + lifetime);

        response.set("c_nonce", c_nonce);
        response.set("c_nonce_expires_in", lifetime.num_seconds());
    }
}

#[async_trait]
impl<P: Provider> StepHandler<P> for NonceIssuanceHandler {
    async fn on_token(
        &self, ctx: &StepContext<'_, P>, _request: &StepRequest, response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::issue(ctx, response, session);
        Ok(())
    }

    async fn on_refresh_token(
        &self, ctx: &StepContext<'_, P>, _request: &StepRequest, response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::issue(ctx, response, session);
        Ok(())
    }

    async fn on_seed_token(
        &self, ctx: &StepContext<'_, P>, _request: &StepRequest, response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        Self::issue(ctx, response, session);
        Ok(())
    }
}
