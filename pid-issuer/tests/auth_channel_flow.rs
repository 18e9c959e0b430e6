//! End-to-end tests for the designated-verifier-signed (auth-channel) flow:
//! the issued credential carries a MAC only the designated verifier can
//! check, and presentation signing produces MACs over wallet-supplied
//! hashes.

mod utils;

use base64ct::{Base64UrlUnpadded, Encoding};
use pid_crypto::{DvsKey, DvsVerifier, DVS_P256_SHA256_HS256};
use serde_json::json;

use pid_issuer::issuer::{Step, StepRequest};
use pid_issuer::session::CorrelationKey;
use pid_issuer::ErrorKind;
use test_utils::keys;
use utils::Harness;

// The key the designated verifier derives on its side of the agreement.
fn verifier_side_key() -> DvsKey {
    DvsKey::derive(&keys::verifier_key(), &keys::issuer_dvs_key().public_key())
        .expect("derivation succeeds")
}

fn credential_request<'a>(harness: &'a Harness, access_token: &'a str) -> impl Fn(Option<&str>) -> StepRequest + 'a {
    let access_token = access_token.to_owned();
    move |dpop_nonce| {
        harness
            .bearer(Step::Credential, &access_token, dpop_nonce)
            .with_body(json!({
                "format": "vc+sd-jwt",
                "verifier_pub": keys::jwk(&keys::verifier_key()),
            }))
    }
}

#[tokio::test]
async fn credential_is_verifiable_only_by_the_designated_verifier() {
    let harness = Harness::auth_channel();

    let (access_token, _) = harness.authorized_token().await;
    let response = harness
        .handle_with_dpop(Step::Credential, credential_request(&harness, &access_token))
        .await
        .expect("credential is issued");

    let credential = response.body["credential"].as_str().expect("credential is returned");
    let (payload, tag) = credential.rsplit_once('.').expect("payload and tag");
    let tag = Base64UrlUnpadded::decode_vec(tag).expect("tag is base64url");

    let verifier = DvsVerifier::new(verifier_side_key());
    assert!(verifier.verify(DVS_P256_SHA256_HS256, &[], payload.as_bytes(), &tag));
    assert!(!verifier.verify(DVS_P256_SHA256_HS256, &[], b"tampered payload", &tag));

    // a different verifier key pair derives a different MAC key
    let other = DvsVerifier::new(
        DvsKey::derive(&keys::device_key(), &keys::issuer_dvs_key().public_key())
            .expect("derivation succeeds"),
    );
    assert!(!other.verify(DVS_P256_SHA256_HS256, &[], payload.as_bytes(), &tag));
}

#[tokio::test]
async fn presentation_signing_is_terminal() {
    let harness = Harness::auth_channel();

    let (access_token, _) = harness.authorized_token().await;
    harness
        .handle_with_dpop(Step::Credential, credential_request(&harness, &access_token))
        .await
        .expect("credential is issued");

    let hash = Base64UrlUnpadded::encode_string(b"presentation-hash-32-bytes-long!");
    let response = harness
        .handle_with_dpop(Step::PresentationSigning, |dpop_nonce| {
            harness
                .bearer(Step::PresentationSigning, &access_token, dpop_nonce)
                .with_body(json!({"hash_bytes": hash}))
        })
        .await
        .expect("presentation is signed");

    let signature = response.body["signature_bytes"].as_str().expect("signature is returned");
    let tag = Base64UrlUnpadded::decode_vec(signature).expect("signature is base64url");
    let verifier = DvsVerifier::new(verifier_side_key());
    assert!(verifier.verify(
        DVS_P256_SHA256_HS256,
        &[],
        b"presentation-hash-32-bytes-long!",
        &tag
    ));

    // terminal: the session expired in the same write
    assert!(harness
        .provider
        .session_snapshot(CorrelationKey::AccessToken, &access_token)
        .is_none());
}

#[tokio::test]
async fn credential_requires_a_valid_verifier_key() {
    let harness = Harness::auth_channel();

    let (access_token, _) = harness.authorized_token().await;
    let err = harness
        .handle_with_dpop(Step::Credential, |dpop_nonce| {
            harness
                .bearer(Step::Credential, &access_token, dpop_nonce)
                .with_body(json!({"verifier_pub": {"kty": "EC", "crv": "P-256"}}))
        })
        .await
        .expect_err("rejected");
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn refresh_token_is_not_part_of_this_flow() {
    let harness = Harness::auth_channel();

    let err = harness
        .handle(Step::RefreshToken, &StepRequest::new("POST"))
        .await
        .expect_err("unsupported");
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperationForFlow);
}
