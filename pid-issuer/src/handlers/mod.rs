//! # Step handlers
//!
//! The pipeline stages flow controllers are assembled from. Validation
//! stages run first and are shared by every variant; the flow stages (PAR,
//! authorization, token, credential, seed, presentation signing) implement
//! the steps themselves.

mod authorize;
mod credential;
mod par;
mod presentation;
mod seed;
mod token;
mod validate;

pub use authorize::{AuthorizationHandler, FinishAuthorizationHandler};
pub use credential::{CredentialHandler, KeyProofHandler, SigningMode};
pub use par::ParHandler;
pub use presentation::PresentationSigningHandler;
pub use seed::{SeedCredentialHandler, SeedTokenHandler};
pub use token::{NonceIssuanceHandler, RefreshTokenRotationHandler, TokenHandler};
pub use validate::{
    ClientAttestationHandler, ClientIdMatchHandler, ExpirationValidationHandler, PkceHandler,
    RedirectUriHandler, RequestOrderHandler, ScopeHandler, StateHandler,
};
