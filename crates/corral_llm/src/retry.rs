//! Retry with exponential backoff for provider HTTP calls.
//!
//! Retries on transient failures (429 rate limit, 5xx, 408, network errors)
//! and fails fast on client errors (400, 401, 403, 404), classifying each
//! outcome into a typed `LlmError`.

use crate::gateway::LlmError;
use reqwest::{Response, StatusCode};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::INTERNAL_SERVER_ERROR
        || status == StatusCode::BAD_GATEWAY
        || status == StatusCode::SERVICE_UNAVAILABLE
        || status == StatusCode::GATEWAY_TIMEOUT
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Map a final (non-retryable or retries-exhausted) HTTP status to an error.
pub fn classify_status(provider: &str, status: StatusCode, body: &str) -> LlmError {
    let detail = format!("{} ({}): {}", provider, status, truncate(body, 300));
    match status.as_u16() {
        401 | 403 => LlmError::Authentication(detail),
        429 => LlmError::RateLimit(detail),
        408 => LlmError::Timeout(detail),
        400 | 404 | 422 => LlmError::InvalidRequest(detail),
        500..=599 => LlmError::Communication(detail),
        _ => LlmError::Unknown(detail),
    }
}

fn classify_network(provider: &str, err: &reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout(format!("{}: {}", provider, err))
    } else {
        LlmError::Communication(format!("{}: {}", provider, err))
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Execute an HTTP operation with retries. Returns the successful response
/// or the classified error of the last attempt.
pub async fn with_retry<F, Fut>(
    config: &RetryConfig,
    provider: &str,
    operation: F,
) -> Result<Response, LlmError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<Response, reqwest::Error>>,
{
    let mut delay = config.initial_delay;
    let mut last_error = LlmError::Unknown(format!("{}: no attempts made", provider));

    for attempt in 1..=config.max_attempts {
        match operation().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    if attempt > 1 {
                        tracing::info!("{} succeeded on attempt {}", provider, attempt);
                    }
                    return Ok(response);
                }

                let body = response.text().await.unwrap_or_default();
                let classified = classify_status(provider, status, &body);

                if !is_retryable_status(status) {
                    return Err(classified);
                }

                tracing::warn!(
                    "{} returned {} on attempt {}/{}: {}",
                    provider,
                    status,
                    attempt,
                    config.max_attempts,
                    truncate(&body, 200)
                );
                last_error = classified;
            }
            Err(e) => {
                tracing::warn!(
                    "{} network error on attempt {}/{}: {}",
                    provider,
                    attempt,
                    config.max_attempts,
                    e
                );
                last_error = classify_network(provider, &e);
            }
        }

        if attempt < config.max_attempts {
            let sleep_time = delay + Duration::from_millis(rand_jitter());
            tracing::info!(
                "{} retrying in {:.1}s (attempt {}/{})",
                provider,
                sleep_time.as_secs_f64(),
                attempt + 1,
                config.max_attempts
            );
            tokio::time::sleep(sleep_time).await;
            delay = Duration::from_secs_f64(
                (delay.as_secs_f64() * config.backoff_factor).min(config.max_delay.as_secs_f64()),
            );
        }
    }

    Err(last_error)
}

/// Simple jitter: 0-500ms derived from the clock's subsecond nanos.
fn rand_jitter() -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 500) as u64
}
