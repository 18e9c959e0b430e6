//! Presentation signing: the terminal auth-channel step producing a
//! designated-verifier MAC over the wallet-supplied presentation hash.

use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use pid_crypto::{DvsKey, DvsSigner};

use pid_openid::issuer::{ResponseBuilder, StepRequest};
use pid_openid::provider::Provider;
use pid_openid::session::{Session, SessionKey};
use pid_openid::{Error, Result};

use crate::flow::{StepContext, StepHandler};

/// Signs a presentation hash with the key agreed with the designated
/// verifier during credential issuance.
pub struct PresentationSigningHandler {
    dvs_private_key: p256::SecretKey,
}

impl PresentationSigningHandler {
    /// Create the handler with the issuer's DVS private key.
    #[must_use]
    pub const fn new(dvs_private_key: p256::SecretKey) -> Self {
        Self { dvs_private_key }
    }
}

#[async_trait]
impl<P: Provider> StepHandler<P> for PresentationSigningHandler {
    async fn on_presentation_signing(
        &self, _ctx: &StepContext<'_, P>, request: &StepRequest, response: &mut ResponseBuilder,
        session: &mut Session,
    ) -> Result<()> {
        let encoded = request
            .require_body_field("hash_bytes")?
            .as_str()
            .ok_or_else(|| Error::invalid_request("hash_bytes must be a base64url string"))?;
        let hash = Base64UrlUnpadded::decode_vec(encoded)
            .map_err(|_| Error::invalid_request("hash_bytes is not base64url"))?;

        let verifier_key = session.checked_jwk(SessionKey::VerifierKey)?;
        let verifier_pub = verifier_key
            .to_p256()
            .map_err(|e| Error::crypto(format!("stored verifier key is unusable: {e}")))?;

        let key = DvsKey::derive(&self.dvs_private_key, &verifier_pub)
            .map_err(|e| Error::crypto(e.to_string()))?;
        let tag = DvsSigner::new(key).sign(&hash);

        response.set("signature_bytes", Base64UrlUnpadded::encode_string(&tag));
        Ok(())
    }
}
