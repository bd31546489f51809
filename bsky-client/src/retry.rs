use mindfeed_core::{CoreError, FeedApiError};
use std::time::Duration;

/// Page-level retry settings. Delays are fixed, not exponential.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per page, including the first
    pub max_attempts: u32,
    pub delay: Duration,
    /// Upper bound for server-requested waits (429 retry-after)
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry after the configured delay
    Retry,
    /// Retry after a server-specified delay
    RetryWithDelay(Duration),
    /// Permanent failure for this request
    NoRetry,
}

pub fn get_retry_strategy(error: &CoreError) -> RetryStrategy {
    match error {
        CoreError::FeedApi(api_error) => match api_error {
            FeedApiError::RateLimitExceeded { retry_after } => {
                RetryStrategy::RetryWithDelay(Duration::from_secs(*retry_after))
            }
            FeedApiError::ServerError { .. } => RetryStrategy::Retry,
            FeedApiError::RequestTimeout => RetryStrategy::Retry,
            FeedApiError::InvalidResponse { .. } => RetryStrategy::Retry,
            FeedApiError::AuthenticationFailed { .. } => RetryStrategy::NoRetry,
            FeedApiError::InvalidToken => RetryStrategy::NoRetry,
            FeedApiError::Forbidden { .. } => RetryStrategy::NoRetry,
            FeedApiError::FeedNotFound { .. } => RetryStrategy::NoRetry,
            FeedApiError::MalformedRecord { .. } => RetryStrategy::NoRetry,
        },
        CoreError::Network(reqwest_error) => {
            if reqwest_error.is_timeout() || reqwest_error.is_connect() || reqwest_error.is_body()
            {
                RetryStrategy::Retry
            } else {
                RetryStrategy::NoRetry
            }
        }
        CoreError::Timeout { .. } | CoreError::Io(_) => RetryStrategy::Retry,
        _ => RetryStrategy::NoRetry,
    }
}

/// Delay before the next attempt, or `None` when the error is not worth retrying.
pub fn calculate_delay(strategy: &RetryStrategy, config: &RetryConfig) -> Option<Duration> {
    match strategy {
        RetryStrategy::Retry => Some(config.delay),
        RetryStrategy::RetryWithDelay(requested) => Some((*requested).min(config.max_delay)),
        RetryStrategy::NoRetry => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_classification() {
        let rate_limited = CoreError::FeedApi(FeedApiError::RateLimitExceeded { retry_after: 30 });
        assert_eq!(
            get_retry_strategy(&rate_limited),
            RetryStrategy::RetryWithDelay(Duration::from_secs(30))
        );

        let server = CoreError::FeedApi(FeedApiError::ServerError { status_code: 502 });
        assert_eq!(get_retry_strategy(&server), RetryStrategy::Retry);

        let auth = CoreError::FeedApi(FeedApiError::InvalidToken);
        assert_eq!(get_retry_strategy(&auth), RetryStrategy::NoRetry);

        assert_eq!(
            get_retry_strategy(&CoreError::Cancelled),
            RetryStrategy::NoRetry
        );
    }

    #[test]
    fn test_fixed_delay() {
        let config = RetryConfig::fixed(3, Duration::from_millis(1000));
        assert_eq!(
            calculate_delay(&RetryStrategy::Retry, &config),
            Some(Duration::from_millis(1000))
        );
        assert_eq!(calculate_delay(&RetryStrategy::NoRetry, &config), None);
    }

    #[test]
    fn test_server_delay_is_capped() {
        let config = RetryConfig::default();
        let delay = calculate_delay(
            &RetryStrategy::RetryWithDelay(Duration::from_secs(3600)),
            &config,
        );
        assert_eq!(delay, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_fixed_clamps_attempts() {
        assert_eq!(RetryConfig::fixed(0, Duration::ZERO).max_attempts, 1);
    }
}
