//! # Step tables
//!
//! The per-variant protocol order as data: which steps a flow variant serves,
//! which step follows which, how a step resolves its session, and the path
//! segments used to build issuer identifiers and DPoP URIs. Kept apart from
//! the `FlowVariant`/`Step` tags so the tags stay plain values.

use pid_openid::issuer::{FlowVariant, Step};
use pid_openid::session::CorrelationKey;

/// URL path segment of a flow variant.
#[must_use]
pub const fn path_segment(variant: FlowVariant) -> &'static str {
    match variant {
        FlowVariant::Device => "c",
        FlowVariant::DeviceRefresh => "c1",
        FlowVariant::AuthChannel => "c2",
        FlowVariant::PinSeed => "b1",
    }
}

/// URL path segment of a step endpoint.
#[must_use]
pub const fn step_path(step: Step) -> &'static str {
    match step {
        Step::PushedAuthorization => "par",
        Step::Authorization => "authorize",
        Step::FinishAuthorization => "finish-authorization",
        // a refresh grant arrives at the token endpoint
        Step::Token | Step::RefreshToken => "token",
        Step::Credential => "credential",
        Step::SeedCredential => "seed-credential",
        Step::SeedToken => "seed-token",
        Step::PresentationSigning => "presentation-signing",
    }
}

/// Whether `variant` serves `step` at all. A request for an unserved step
/// fails before any session is resolved.
#[must_use]
pub const fn supports(variant: FlowVariant, step: Step) -> bool {
    match step {
        Step::PushedAuthorization
        | Step::Authorization
        | Step::FinishAuthorization
        | Step::Token
        | Step::Credential => true,
        Step::RefreshToken => matches!(variant, FlowVariant::DeviceRefresh),
        Step::SeedCredential | Step::SeedToken => matches!(variant, FlowVariant::PinSeed),
        Step::PresentationSigning => matches!(variant, FlowVariant::AuthChannel),
    }
}

/// The step a session advances to after `step` completes under `variant`.
/// `None` terminates the session.
#[must_use]
pub const fn successor(variant: FlowVariant, step: Step) -> Option<Step> {
    match step {
        Step::PushedAuthorization => Some(Step::Authorization),
        Step::Authorization => Some(Step::FinishAuthorization),
        Step::FinishAuthorization => Some(Step::Token),
        Step::Token => match variant {
            FlowVariant::PinSeed => Some(Step::SeedCredential),
            _ => Some(Step::Credential),
        },
        Step::RefreshToken | Step::SeedToken => Some(Step::Credential),
        Step::Credential => match variant {
            FlowVariant::DeviceRefresh => Some(Step::RefreshToken),
            FlowVariant::AuthChannel => Some(Step::PresentationSigning),
            FlowVariant::Device | FlowVariant::PinSeed => None,
        },
        Step::SeedCredential | Step::PresentationSigning => None,
    }
}

/// How a step resolves its session. `None` means the step creates a session
/// instead of loading one.
#[must_use]
pub const fn correlation(step: Step) -> Option<CorrelationKey> {
    match step {
        Step::PushedAuthorization => None,
        Step::Authorization => Some(CorrelationKey::RequestUri),
        Step::FinishAuthorization => Some(CorrelationKey::IssuerState),
        Step::Token => Some(CorrelationKey::AuthorizationCode),
        Step::RefreshToken => Some(CorrelationKey::RefreshTokenDigest),
        Step::Credential | Step::SeedCredential | Step::PresentationSigning => {
            Some(CorrelationKey::AccessToken)
        }
        Step::SeedToken => Some(CorrelationKey::IssuerSessionId),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(FlowVariant::Device, Step::RefreshToken)]
    #[case(FlowVariant::Device, Step::SeedCredential)]
    #[case(FlowVariant::Device, Step::PresentationSigning)]
    #[case(FlowVariant::DeviceRefresh, Step::SeedToken)]
    #[case(FlowVariant::AuthChannel, Step::RefreshToken)]
    #[case(FlowVariant::PinSeed, Step::PresentationSigning)]
    fn unsupported_steps(#[case] variant: FlowVariant, #[case] step: Step) {
        assert!(!supports(variant, step));
    }

    #[test]
    fn device_flow_terminates_at_credential() {
        assert_eq!(successor(FlowVariant::Device, Step::Credential), None);
    }

    #[test]
    fn auth_channel_appends_presentation_signing() {
        assert_eq!(
            successor(FlowVariant::AuthChannel, Step::Credential),
            Some(Step::PresentationSigning)
        );
        assert_eq!(successor(FlowVariant::AuthChannel, Step::PresentationSigning), None);
    }

    #[test]
    fn refresh_cycles_back_to_credential() {
        assert_eq!(successor(FlowVariant::DeviceRefresh, Step::Credential), Some(Step::RefreshToken));
        assert_eq!(successor(FlowVariant::DeviceRefresh, Step::RefreshToken), Some(Step::Credential));
    }

    #[test]
    fn pin_seed_issues_seed_after_token() {
        assert_eq!(successor(FlowVariant::PinSeed, Step::Token), Some(Step::SeedCredential));
        assert_eq!(successor(FlowVariant::PinSeed, Step::SeedCredential), None);
        assert_eq!(successor(FlowVariant::PinSeed, Step::SeedToken), Some(Step::Credential));
    }

    #[test]
    fn every_loading_step_has_one_correlation_key() {
        for step in [
            Step::Authorization,
            Step::FinishAuthorization,
            Step::Token,
            Step::RefreshToken,
            Step::Credential,
            Step::SeedCredential,
            Step::SeedToken,
            Step::PresentationSigning,
        ] {
            assert!(correlation(step).is_some(), "{step} must resolve a session");
        }
        assert!(correlation(Step::PushedAuthorization).is_none());
    }
}
