// Retry policy for the playback-transfer call
// Bounded attempts with backoff, honoring Retry-After on 429

use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::{Response, StatusCode};
use std::future::Future;
use std::time::Duration;

use crate::error::ApiError;

/// Total attempt budget, including the first try
pub const MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (milliseconds)
const BASE_DELAY_MS: u64 = 350;

/// Upper bound on any computed delay (milliseconds)
const MAX_DELAY_MS: u64 = 2000;

/// Whether a status is worth retrying.
///
/// 404 is included: the player endpoint returns it for momentary
/// device-state mismatches, which resolve themselves. Client-side and
/// authorization errors (400/401/403) never spend retry budget.
pub fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 404 | 429 | 500..=504)
}

/// Exponential backoff after a failed attempt (1-indexed), clamped
fn backoff_delay(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let delay = BASE_DELAY_MS.saturating_mul(1u64 << shift);
    Duration::from_millis(delay.min(MAX_DELAY_MS))
}

/// Delay implied by a Retry-After header: integer seconds first, else an
/// HTTP date. Clamped; non-positive or unparseable values yield None so the
/// caller falls through to the exponential policy.
fn retry_after_delay(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;

    let millis = if let Ok(secs) = value.trim().parse::<i64>() {
        secs.checked_mul(1000)?
    } else {
        let date = chrono::DateTime::parse_from_rfc2822(value.trim()).ok()?;
        (date.with_timezone(&Utc) - Utc::now()).num_milliseconds()
    };

    if millis <= 0 {
        return None;
    }

    Some(Duration::from_millis((millis as u64).min(MAX_DELAY_MS)))
}

/// Run `make_request` with up to three attempts.
///
/// Retryable error statuses sleep and try again; everything else returns to
/// the caller on the first attempt. When the budget is exhausted the last
/// received response is returned for the caller to interpret, unless every
/// attempt failed with an error, in which case the last error propagates.
pub async fn with_retry<F, Fut>(mut make_request: F) -> Result<Response, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Response, ApiError>>,
{
    for attempt in 1..=MAX_ATTEMPTS {
        match make_request().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() || !is_retryable(status) || attempt == MAX_ATTEMPTS {
                    return Ok(response);
                }

                let delay = if status == StatusCode::TOO_MANY_REQUESTS {
                    retry_after_delay(response.headers())
                        .unwrap_or_else(|| backoff_delay(attempt))
                } else {
                    backoff_delay(attempt)
                };

                tracing::warn!(
                    "Received {}, retrying after {}ms (attempt {}/{})",
                    status,
                    delay.as_millis(),
                    attempt,
                    MAX_ATTEMPTS
                );
                tokio::time::sleep(delay).await;
            }

            Err(e) => {
                // No status to inspect: treat as transient up to the budget
                if attempt == MAX_ATTEMPTS {
                    return Err(e);
                }

                let delay = backoff_delay(attempt);
                tracing::warn!(
                    "Request failed: {}, retrying after {}ms (attempt {}/{})",
                    e,
                    delay.as_millis(),
                    attempt,
                    MAX_ATTEMPTS
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("retry loop returns within the attempt budget")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn response_with(status: u16) -> Response {
        Response::from(
            http::Response::builder()
                .status(status)
                .body(String::new())
                .unwrap(),
        )
    }

    fn response_429_with_retry_after(value: &str) -> Response {
        Response::from(
            http::Response::builder()
                .status(429)
                .header("Retry-After", value)
                .body(String::new())
                .unwrap(),
        )
    }

    #[test]
    fn test_retryable_statuses() {
        for code in [404u16, 429, 500, 501, 502, 503, 504] {
            assert!(is_retryable(StatusCode::from_u16(code).unwrap()), "{}", code);
        }
        for code in [200u16, 204, 400, 401, 403, 410, 505] {
            assert!(!is_retryable(StatusCode::from_u16(code).unwrap()), "{}", code);
        }
    }

    #[test]
    fn test_backoff_doubles_then_clamps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(350));
        assert_eq!(backoff_delay(2), Duration::from_millis(700));
        assert_eq!(backoff_delay(3), Duration::from_millis(1400));
        assert_eq!(backoff_delay(4), Duration::from_millis(2000));
        assert_eq!(backoff_delay(10), Duration::from_millis(2000));
    }

    #[test]
    fn test_retry_after_integer_seconds() {
        let resp = response_429_with_retry_after("1");
        assert_eq!(
            retry_after_delay(resp.headers()),
            Some(Duration::from_millis(1000))
        );

        // Clamp boundary
        let resp = response_429_with_retry_after("2");
        assert_eq!(
            retry_after_delay(resp.headers()),
            Some(Duration::from_millis(2000))
        );

        // Beyond the clamp
        let resp = response_429_with_retry_after("30");
        assert_eq!(
            retry_after_delay(resp.headers()),
            Some(Duration::from_millis(2000))
        );
    }

    #[test]
    fn test_retry_after_http_date() {
        let future = (Utc::now() + chrono::Duration::seconds(30)).to_rfc2822();
        let resp = response_429_with_retry_after(&future);
        // 30 seconds out clamps to the 2000ms maximum
        assert_eq!(
            retry_after_delay(resp.headers()),
            Some(Duration::from_millis(2000))
        );
    }

    #[test]
    fn test_retry_after_past_date_falls_through() {
        let past = (Utc::now() - chrono::Duration::seconds(30)).to_rfc2822();
        let resp = response_429_with_retry_after(&past);
        assert_eq!(retry_after_delay(resp.headers()), None);
    }

    #[test]
    fn test_retry_after_unparseable_falls_through() {
        let resp = response_429_with_retry_after("soon");
        assert_eq!(retry_after_delay(resp.headers()), None);

        let resp = response_429_with_retry_after("0");
        assert_eq!(retry_after_delay(resp.headers()), None);

        let resp = response_429_with_retry_after("-5");
        assert_eq!(retry_after_delay(resp.headers()), None);

        let resp = response_with(429);
        assert_eq!(retry_after_delay(resp.headers()), None);
    }

    proptest! {
        #[test]
        fn prop_computed_delays_never_exceed_clamp(attempt in 1u32..1000, secs in 0i64..100_000) {
            prop_assert!(backoff_delay(attempt) <= Duration::from_millis(2000));

            let resp = response_429_with_retry_after(&secs.to_string());
            if let Some(delay) = retry_after_delay(resp.headers()) {
                prop_assert!(delay <= Duration::from_millis(2000));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_takes_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let response = with_retry(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(response_with(200)) }
        })
        .await
        .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_returns_immediately() {
        for code in [400u16, 401, 403] {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();
            let start = tokio::time::Instant::now();

            let response = with_retry(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(response_with(code)) }
            })
            .await
            .unwrap();

            assert_eq!(response.status(), code);
            assert_eq!(calls.load(Ordering::SeqCst), 1, "no retry budget on {}", code);
            assert_eq!(start.elapsed(), Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_returns_last_response() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let start = tokio::time::Instant::now();

        let response = with_retry(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(response_with(404)) }
        })
        .await
        .unwrap();

        assert_eq!(response.status(), 404);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 350ms after attempt 1, 700ms after attempt 2
        assert!(start.elapsed() >= Duration::from_millis(1050));
        assert!(start.elapsed() < Duration::from_millis(1200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_honors_retry_after() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let start = tokio::time::Instant::now();

        let response = with_retry(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(response_429_with_retry_after("1"))
                } else {
                    Ok(response_with(200))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert!(start.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_without_header_uses_exponential() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let start = tokio::time::Instant::now();

        let response = with_retry(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(response_with(429))
                } else {
                    Ok(response_with(200))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(response.status(), 200);
        assert!(start.elapsed() >= Duration::from_millis(350));
        assert!(start.elapsed() < Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_transient_until_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let response = with_retry(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ApiError::Internal(anyhow::anyhow!("connection reset")))
                } else {
                    Ok(response_with(200))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_errors_propagates_last() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = with_retry(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<Response, _>(ApiError::Internal(anyhow::anyhow!("connection reset"))) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::Internal(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
