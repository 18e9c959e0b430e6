//! Pushed authorization request ([RFC9126]): the wallet pushes its
//! authorization parameters and receives a request URI for the subsequent
//! authorization step.
//!
//! [RFC9126]: https://www.rfc-editor.org/rfc/rfc9126

use async_trait::async_trait;
use chrono::Utc;

use pid_openid::issuer::{ResponseBuilder, StepRequest};
use pid_openid::provider::Provider;
use pid_openid::session::{Session, SessionKey};
use pid_openid::Result;

use crate::flow::{StepContext, StepHandler};

/// Issues the request URI the authorization step is correlated by.
pub struct ParHandler;

#[async_trait]
impl<P: Provider> StepHandler<P> for ParHandler {
    async fn on_pushed_authorization(
        &self, ctx: &StepContext<'_, P>, _request: &StepRequest, response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let request_uri =
            format!("urn:ietf:params:oauth:request_uri:{}", ctx.rng.token());
        let lifetime = ctx.config.request_uri_lifetime();

        session.put(SessionKey::RequestUri, &request_uri);
        session.put_instant(SessionKey::RequestUriExpiry, Utc::now() + lifetime);

        response.set("request_uri", request_uri);
        response.set("expires_in", lifetime.num_seconds());
        Ok(())
    }
}
