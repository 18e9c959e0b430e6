//! Authorization and finish-authorization: the authorization step hands the
//! user agent to the external identity-proofing service; once the proofing
//! result has been reported back, finish-authorization issues the
//! authorization code and redirects to the wallet.

use async_trait::async_trait;
use chrono::Utc;

use pid_openid::issuer::{ResponseBuilder, StepRequest};
use pid_openid::provider::{IdentityProofing, Provider};
use pid_openid::session::{Session, SessionKey};
use pid_openid::{Error, Result};

use crate::flow::{StepContext, StepHandler};

/// Starts the external identification process and redirects the user agent
/// to it.
pub struct AuthorizationHandler;

#[async_trait]
impl<P: Provider> StepHandler<P> for AuthorizationHandler {
    async fn on_authorization(
        &self, ctx: &StepContext<'_, P>, _request: &StepRequest, response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let request_uri_expiry = session.checked_instant(SessionKey::RequestUriExpiry)?;
        if request_uri_expiry <= Utc::now() {
            return Err(Error::invalid_request("request_uri is expired"));
        }

        let issuer_state = ctx.rng.token();
        session.put(SessionKey::IssuerState, &issuer_state);

        let finish_url =
            ctx.config.step_url(ctx.variant, pid_openid::issuer::Step::FinishAuthorization);
        let proofing_url = ctx
            .provider
            .begin_identification(&issuer_state, &finish_url)
            .await
            .map_err(|e| Error::server(format!("issue starting identification: {e}")))?;

        response.header("Location", proofing_url);
        Ok(())
    }
}

/// Issues the one-time authorization code once identification has finished,
/// redirecting back to the wallet.
pub struct FinishAuthorizationHandler;

#[async_trait]
impl<P: Provider> StepHandler<P> for FinishAuthorizationHandler {
    async fn on_finish_authorization(
        &self, ctx: &StepContext<'_, P>, _request: &StepRequest, response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        if !session.contains(SessionKey::IdentityData) {
            return Err(Error::invalid_grant("identification has not finished"));
        }

        let code = ctx.rng.token();
        session.put(SessionKey::AuthorizationCode, &code);
        session.put_instant(
            SessionKey::AuthorizationCodeExpiry,
            Utc::now() + ctx.config.authorization_code_lifetime(),
        );

        let redirect_uri = session.checked_param(SessionKey::RedirectUri)?;
        let mut location = format!("{redirect_uri}?code={code}");
        if let Some(wallet_state) = session.param(SessionKey::State) {
            location.push_str("&state=");
            location.push_str(wallet_state);
        }
        response.header("Location", location);
        Ok(())
    }
}
