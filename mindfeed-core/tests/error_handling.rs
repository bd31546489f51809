use mindfeed_core::{
    ConfigError, CoreError, DatabaseError, EmbeddingError, ErrorExt, ErrorReporter, FeedApiError,
};
use std::time::Duration;

#[test]
fn test_error_codes() {
    let feed_error = CoreError::FeedApi(FeedApiError::InvalidToken);
    assert_eq!(feed_error.error_code(), "FEED_API");

    let db_error = CoreError::Database(DatabaseError::DatabaseLocked);
    assert_eq!(db_error.error_code(), "DATABASE");

    let embedding_error = CoreError::Embedding(EmbeddingError::ModelNotFound {
        model_name: "all-MiniLM-L6-v2".to_string(),
    });
    assert_eq!(embedding_error.error_code(), "EMBEDDING");

    let config_error = CoreError::Config(ConfigError::MissingField {
        field: "api.base_url".to_string(),
    });
    assert_eq!(config_error.error_code(), "CONFIG");

    assert_eq!(CoreError::Cancelled.error_code(), "CANCELLED");
    assert_eq!(
        FeedApiError::ServerError { status_code: 502 }.error_code(),
        "FEED_SERVER_ERROR"
    );
}

#[test]
fn test_retryable_errors() {
    let retryable_error = CoreError::FeedApi(FeedApiError::RateLimitExceeded { retry_after: 60 });
    assert!(retryable_error.is_retryable());

    let server_error = CoreError::FeedApi(FeedApiError::ServerError { status_code: 503 });
    assert!(server_error.is_retryable());

    let non_retryable_error = CoreError::Config(ConfigError::MissingField {
        field: "api.base_url".to_string(),
    });
    assert!(!non_retryable_error.is_retryable());
    assert!(!CoreError::Cancelled.is_retryable());
}

#[test]
fn test_retry_after() {
    let rate_limit_error = CoreError::FeedApi(FeedApiError::RateLimitExceeded { retry_after: 60 });
    assert_eq!(rate_limit_error.retry_after(), Some(Duration::from_secs(60)));

    let timeout_error = CoreError::Timeout { seconds: 30 };
    assert_eq!(timeout_error.retry_after(), Some(Duration::from_secs(30)));

    assert_eq!(CoreError::Cancelled.retry_after(), None);
}

#[test]
fn test_classification() {
    assert!(CoreError::Cancelled.is_cancelled());
    assert!(CoreError::FeedApi(FeedApiError::InvalidToken).is_unauthenticated());
    assert!(CoreError::FeedApi(FeedApiError::AuthenticationFailed {
        reason: "no session".to_string()
    })
    .is_unauthenticated());
    assert!(!CoreError::FeedApi(FeedApiError::RequestTimeout).is_unauthenticated());

    assert!(CoreError::Embedding(EmbeddingError::ModelNotFound {
        model_name: "bert".to_string()
    })
    .is_embedding_unavailable());
    assert!(!CoreError::Embedding(EmbeddingError::EmptyInput).is_embedding_unavailable());
}

#[test]
fn test_user_friendly_messages() {
    let feed_error = CoreError::FeedApi(FeedApiError::InvalidToken);
    let message = feed_error.user_friendly_message();
    assert!(message.contains("session is invalid"));

    let config_error = CoreError::Config(ConfigError::MissingField {
        field: "api.base_url".to_string(),
    });
    let message = config_error.user_friendly_message();
    assert!(message.contains("api.base_url"));

    let model_error = CoreError::Embedding(EmbeddingError::ModelNotFound {
        model_name: "all-MiniLM-L6-v2".to_string(),
    });
    assert!(model_error.user_friendly_message().contains("fetch-model"));
}

#[test]
fn test_error_reporter() {
    let reporter = ErrorReporter::new()
        .with_error_reporting(true)
        .with_warning_reporting(true);
    let error = CoreError::FeedApi(FeedApiError::InvalidToken);

    reporter.report_error(&error);
    reporter.report_warning(&error);
}
