/*!
 * Tests for error classification
 */

use linewise::errors::{AppError, ProviderError, TranslationError, TranslationErrorKind};

#[test]
fn test_providerError_fromStatus_shouldClassify() {
    assert!(matches!(
        ProviderError::from_status(401, "bad key"),
        ProviderError::AuthenticationError(_)
    ));
    assert!(matches!(
        ProviderError::from_status(429, "slow down"),
        ProviderError::RateLimitExceeded(_)
    ));
    assert!(matches!(
        ProviderError::from_status(400, "too many tokens in prompt"),
        ProviderError::ContextOverflow(_)
    ));
    assert!(matches!(
        ProviderError::from_status(500, "boom"),
        ProviderError::ApiError { status_code: 500, .. }
    ));
}

/// Provider failures map onto the engine's own taxonomy
#[test]
fn test_translationError_fromProvider_shouldPickKind() {
    let cases = [
        (ProviderError::ConnectionError("refused".into()), TranslationErrorKind::ServiceUnavailable),
        (ProviderError::AuthenticationError("denied".into()), TranslationErrorKind::ServiceUnavailable),
        (ProviderError::ContextOverflow("full".into()), TranslationErrorKind::ContextOverflow),
        (ProviderError::StreamInterrupted("cut".into()), TranslationErrorKind::TransientService),
        (ProviderError::RateLimitExceeded("wait".into()), TranslationErrorKind::TransientService),
    ];

    for (provider_error, kind) in cases {
        assert_eq!(TranslationError::from(provider_error).kind(), kind);
    }
}

#[test]
fn test_translationError_retryAndFatal_shouldFollowKind() {
    let transient = TranslationError::TransientService("503".into());
    let rejected = TranslationError::QualityRejected { rejected: vec![1], total: 4 };
    let unavailable = TranslationError::ServiceUnavailable("down".into());

    assert!(transient.is_retryable() && !transient.is_fatal());
    assert!(!rejected.is_retryable() && !rejected.is_fatal());
    assert!(unavailable.is_retryable() && unavailable.is_fatal());
    assert_eq!(rejected.to_string(), "Quality gate rejected 1 of 4 lines");
}

#[test]
fn test_appError_isFatal_shouldStopOnlyForServiceLoss() {
    assert!(AppError::from(TranslationError::ServiceUnavailable("down".into())).is_fatal());
    assert!(AppError::from(ProviderError::AuthenticationError("denied".into())).is_fatal());
    assert!(!AppError::from(TranslationError::ContextOverflow("full".into())).is_fatal());
    assert!(!AppError::File("missing".into()).is_fatal());
}
