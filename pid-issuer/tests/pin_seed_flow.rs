//! End-to-end tests for the PIN-protected seed-credential flow: seed
//! issuance with a fresh retry counter, redemption under the retry guard,
//! and the brute-force ceiling.

mod utils;

use serde_json::json;

use pid_issuer::issuer::{Step, StepRequest};
use pid_issuer::session::CorrelationKey;
use pid_issuer::ErrorKind;
use test_utils::{keys, proofs};
use utils::Harness;

struct SeedGrant {
    seed_credential: String,
    session_id: String,
}

async fn issue_seed(harness: &Harness) -> SeedGrant {
    let (access_token, c_nonce) = harness.authorized_token().await;

    let response = harness
        .handle_with_dpop(Step::SeedCredential, |dpop_nonce| {
            harness.bearer(Step::SeedCredential, &access_token, dpop_nonce).with_body(json!({
                "device_key_proof": proofs::key_proof(&harness.issuer_id(), &c_nonce, &keys::device_key()),
                "pin_derived_key_pop": proofs::pin_pop(&c_nonce, &keys::pin_derived_key()),
            }))
        })
        .await
        .expect("seed credential is issued");

    SeedGrant {
        seed_credential: response.body["credential"].as_str().expect("seed").to_owned(),
        session_id: response.body["pid_issuer_session_id"]
            .as_str()
            .expect("session id")
            .to_owned(),
    }
}

fn seed_token_request<'a>(
    harness: &'a Harness, grant: &'a SeedGrant, pin_key: &'a p256::SecretKey,
) -> impl Fn(Option<&str>) -> StepRequest + 'a {
    move |dpop_nonce| {
        let url = harness.config.step_url(harness.variant(), Step::SeedToken);
        StepRequest::new("POST")
            .with_param("session_id", &grant.session_id)
            .with_param("seed_credential", &grant.seed_credential)
            .with_param("pin_derived_key_pop", proofs::pin_pop(&grant.session_id, pin_key))
            .with_header("DPoP", proofs::dpop_proof("POST", &url, dpop_nonce, &keys::device_key()))
    }
}

#[tokio::test]
async fn seed_is_issued_and_redeemable() {
    let harness = Harness::pin_seed();

    let grant = issue_seed(&harness).await;
    assert!(grant.seed_credential.starts_with("seed."));

    let response = harness
        .handle_with_dpop(
            Step::SeedToken,
            seed_token_request(&harness, &grant, &keys::pin_derived_key()),
        )
        .await
        .expect("seed is redeemed");

    let access_token = response.body["access_token"].as_str().expect("access token").to_owned();

    // the redemption session now serves the credential step
    let stored = harness
        .provider
        .session_snapshot(CorrelationKey::AccessToken, &access_token)
        .expect("redemption session is live");
    assert_eq!(stored.next_expected_step, Step::Credential);

    let response = harness
        .handle_with_dpop(Step::Credential, |dpop_nonce| {
            harness.bearer(Step::Credential, &access_token, dpop_nonce).with_body(json!({
                "format": "vc+sd-jwt",
            }))
        })
        .await
        .expect("credential is issued");
    let credential = response.body["credential"].as_str().expect("credential");
    assert!(credential.ends_with(".issuer-signed"));
}

#[tokio::test]
async fn session_id_is_single_use() {
    let harness = Harness::pin_seed();

    let grant = issue_seed(&harness).await;
    harness
        .handle_with_dpop(
            Step::SeedToken,
            seed_token_request(&harness, &grant, &keys::pin_derived_key()),
        )
        .await
        .expect("seed is redeemed");

    // the redemption session advanced, so a replayed seed-token request
    // fails the order check rather than opening a second session
    let err = harness
        .handle_with_dpop(
            Step::SeedToken,
            seed_token_request(&harness, &grant, &keys::pin_derived_key()),
        )
        .await
        .expect_err("replay fails");
    assert_eq!(err.kind(), ErrorKind::ProtocolOrderViolation);
}

#[tokio::test]
async fn wrong_pin_counts_up_and_locks() {
    let harness = Harness::pin_seed();
    let grant = issue_seed(&harness).await;

    // keys::verifier_key stands in for a key derived from a wrong PIN
    let wrong_pin = keys::verifier_key();

    for _ in 0..2 {
        let err = harness
            .handle_with_dpop(Step::SeedToken, seed_token_request(&harness, &grant, &wrong_pin))
            .await
            .expect_err("wrong PIN");
        assert_eq!(err.kind(), ErrorKind::InvalidGrant);
    }

    // the third failure reaches the ceiling
    let err = harness
        .handle_with_dpop(Step::SeedToken, seed_token_request(&harness, &grant, &wrong_pin))
        .await
        .expect_err("locked");
    assert_eq!(err.kind(), ErrorKind::PinRetryExhausted);

    // even the correct PIN is refused now
    let err = harness
        .handle_with_dpop(
            Step::SeedToken,
            seed_token_request(&harness, &grant, &keys::pin_derived_key()),
        )
        .await
        .expect_err("still locked");
    assert_eq!(err.kind(), ErrorKind::PinRetryExhausted);
}

#[tokio::test]
async fn failed_pin_attempt_keeps_the_redemption_session_addressable() {
    let harness = Harness::pin_seed();
    let grant = issue_seed(&harness).await;

    let err = harness
        .handle_with_dpop(Step::SeedToken, seed_token_request(&harness, &grant, &keys::verifier_key()))
        .await
        .expect_err("wrong PIN");
    assert_eq!(err.kind(), ErrorKind::InvalidGrant);

    // the next attempt with the right PIN succeeds against the same id
    harness
        .handle_with_dpop(
            Step::SeedToken,
            seed_token_request(&harness, &grant, &keys::pin_derived_key()),
        )
        .await
        .expect("retry succeeds");
}

#[tokio::test]
async fn tampered_seed_is_rejected() {
    let harness = Harness::pin_seed();
    let grant = issue_seed(&harness).await;
    let tampered = SeedGrant {
        seed_credential: "seed.bm90LXZhbGlkLWpzb24".into(),
        session_id: grant.session_id,
    };

    let err = harness
        .handle_with_dpop(
            Step::SeedToken,
            seed_token_request(&harness, &tampered, &keys::pin_derived_key()),
        )
        .await
        .expect_err("rejected");
    assert_eq!(err.kind(), ErrorKind::InvalidGrant);
}

#[tokio::test]
async fn unknown_session_id_is_rejected() {
    let harness = Harness::pin_seed();
    let grant = issue_seed(&harness).await;
    let unknown = SeedGrant {
        seed_credential: grant.seed_credential,
        session_id: "ABCDEFGHIJKLMNOPQRSTU0".into(),
    };

    let err = harness
        .handle_with_dpop(
            Step::SeedToken,
            seed_token_request(&harness, &unknown, &keys::pin_derived_key()),
        )
        .await
        .expect_err("rejected");
    assert_eq!(err.kind(), ErrorKind::ExpiredNonce);
}
