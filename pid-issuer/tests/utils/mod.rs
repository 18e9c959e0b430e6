//! Shared harness driving flow controllers against the in-memory provider.

#![allow(dead_code)]

use std::sync::Arc;

use base64ct::{Base64UrlUnpadded, Encoding};
use serde_json::json;
use sha2::{Digest, Sha256};

use pid_issuer::identification::{self, IdentificationOutcome};
use pid_issuer::issuer::{FlowVariant, Step, StepRequest, StepResponse};
use pid_issuer::{Config, ErrorKind, FlowController, SecureRandom};
use test_utils::provider::Provider;
use test_utils::{keys, proofs, sample, CLIENT_ID, REDIRECT_URI};

pub const CLIENT_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-client-attestation";
pub const PKCE_VERIFIER: &str = "ABCDEF12345-secret-pkce-verifier";

pub struct Harness {
    pub provider: Provider,
    pub config: Arc<Config>,
    pub controller: FlowController<Provider>,
}

impl Harness {
    pub fn device() -> Self {
        let config = Arc::new(Config::default());
        let controller = FlowController::device(config.clone(), SecureRandom::new());
        Self { provider: Provider::new(), config, controller }
    }

    pub fn device_refresh() -> Self {
        let config = Arc::new(Config::default());
        let controller = FlowController::device_refresh(config.clone(), SecureRandom::new());
        Self { provider: Provider::new(), config, controller }
    }

    pub fn auth_channel() -> Self {
        let config = Arc::new(Config::default());
        let controller = FlowController::auth_channel(
            config.clone(),
            SecureRandom::new(),
            keys::issuer_dvs_key(),
        );
        Self { provider: Provider::new(), config, controller }
    }

    pub fn pin_seed() -> Self {
        let config = Arc::new(Config::default());
        let controller = FlowController::pin_seed(config.clone(), SecureRandom::new());
        Self { provider: Provider::new(), config, controller }
    }

    pub fn variant(&self) -> FlowVariant {
        self.controller.variant()
    }

    pub fn issuer_id(&self) -> String {
        self.config.credential_issuer(self.variant())
    }

    pub async fn handle(
        &self, step: Step, request: &StepRequest,
    ) -> pid_issuer::Result<StepResponse> {
        self.controller.handle(&self.provider, step, request).await
    }

    /// Run a DPoP-protected step, answering the server's nonce challenge.
    pub async fn handle_with_dpop(
        &self, step: Step, make: impl Fn(Option<&str>) -> StepRequest,
    ) -> pid_issuer::Result<StepResponse> {
        match self.handle(step, &make(None)).await {
            Err(e) if e.kind() == ErrorKind::UseDpopNonce => {
                let nonce = e
                    .headers()
                    .iter()
                    .find(|(name, _)| name == "DPoP-Nonce")
                    .map(|(_, value)| value.clone())
                    .expect("challenge carries a nonce");
                self.handle(step, &make(Some(&nonce))).await
            }
            other => other,
        }
    }

    // ------------------------------------------------------------------
    // Canonical step requests
    // ------------------------------------------------------------------

    pub fn par_request(&self) -> StepRequest {
        StepRequest::new("POST")
            .with_param("client_id", CLIENT_ID)
            .with_param("redirect_uri", REDIRECT_URI)
            .with_param("state", "wallet-state-1")
            .with_param("scope", "pid")
            .with_param("code_challenge", pkce_challenge())
            .with_param("code_challenge_method", "S256")
            .with_param("client_assertion_type", CLIENT_ASSERTION_TYPE)
            .with_param("client_assertion", proofs::client_assertion(&self.issuer_id()))
    }

    pub async fn par(&self) -> String {
        let response =
            self.handle(Step::PushedAuthorization, &self.par_request()).await.expect("par succeeds");
        response.body["request_uri"].as_str().expect("request_uri is returned").to_owned()
    }

    /// Authorization step; returns the issuer state handed to the proofing
    /// service.
    pub async fn authorize(&self, request_uri: &str) -> String {
        let request = StepRequest::new("GET")
            .with_param("request_uri", request_uri)
            .with_param("client_id", CLIENT_ID);
        let response =
            self.handle(Step::Authorization, &request).await.expect("authorization succeeds");
        assert!(response.header("Location").is_some(), "redirects to the proofing service");

        self.provider.begun_identifications().last().expect("identification started").clone()
    }

    pub async fn report_identified(&self, issuer_state: &str) {
        identification::callback(
            &self.provider,
            issuer_state,
            IdentificationOutcome::Success(sample::pid_data()),
        )
        .await
        .expect("callback is accepted");
    }

    /// Finish-authorization; returns the authorization code from the
    /// redirect.
    pub async fn finish(&self, issuer_state: &str) -> String {
        let request = StepRequest::new("GET").with_param("issuer_state", issuer_state);
        let response =
            self.handle(Step::FinishAuthorization, &request).await.expect("finish succeeds");

        let location = response.header("Location").expect("redirects to the wallet");
        let (_, query) = location.split_once("?code=").expect("code is in the redirect");
        query.split('&').next().expect("code value").to_owned()
    }

    fn token_request(&self, code: &str, dpop_nonce: Option<&str>) -> StepRequest {
        let url = self.config.step_url(self.variant(), Step::Token);
        StepRequest::new("POST")
            .with_param("grant_type", "authorization_code")
            .with_param("code", code)
            .with_param("code_verifier", PKCE_VERIFIER)
            .with_param("client_id", CLIENT_ID)
            .with_header("DPoP", proofs::dpop_proof("POST", &url, dpop_nonce, &keys::device_key()))
    }

    /// Token step with the DPoP nonce dance; returns (`access_token`,
    /// `c_nonce`).
    pub async fn token(&self, code: &str) -> (String, String) {
        let response = self
            .handle_with_dpop(Step::Token, |nonce| self.token_request(code, nonce))
            .await
            .expect("token succeeds");

        let access_token = response.body["access_token"].as_str().expect("access token").to_owned();
        let c_nonce = response.body["c_nonce"].as_str().expect("c_nonce").to_owned();
        assert_eq!(response.body["token_type"], json!("DPoP"));
        (access_token, c_nonce)
    }

    /// Walk PAR → authorization → identification → finish → token.
    pub async fn authorized_token(&self) -> (String, String) {
        let request_uri = self.par().await;
        let issuer_state = self.authorize(&request_uri).await;
        self.report_identified(&issuer_state).await;
        let code = self.finish(&issuer_state).await;
        self.token(&code).await
    }

    pub fn bearer(&self, step: Step, access_token: &str, dpop_nonce: Option<&str>) -> StepRequest {
        let url = self.config.step_url(self.variant(), step);
        StepRequest::new("POST")
            .with_header("Authorization", format!("DPoP {access_token}"))
            .with_header("DPoP", proofs::dpop_proof("POST", &url, dpop_nonce, &keys::device_key()))
    }
}

pub fn pkce_challenge() -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(PKCE_VERIFIER))
}
