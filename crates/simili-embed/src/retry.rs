use std::future::Future;
use std::time::Duration;

use crate::error::EmbedError;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

/// Exponential backoff: `base * 2^attempt`, capped at 30s.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1_u32 << attempt.min(16)).min(MAX_BACKOFF)
}

/// Honor a numeric `Retry-After` header, falling back to exponential backoff.
fn retry_delay(response: &reqwest::Response, policy: &RetryPolicy, attempt: u32) -> Duration {
    if let Some(val) = response.headers().get("retry-after")
        && let Ok(s) = val.to_str()
        && let Ok(secs) = s.parse::<u64>()
    {
        return Duration::from_secs(secs).min(MAX_BACKOFF);
    }
    backoff_delay(policy.base_backoff, attempt)
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

/// Send an HTTP request, retrying connection failures, timeouts, 429 and 5xx
/// responses up to `policy.max_retries` times.
///
/// Returns the first response that is neither rate-limited nor a server
/// error; the caller interprets its status.
///
/// # Errors
///
/// Returns `EmbedError::RetriesExhausted` once all attempts fail, or
/// `EmbedError::Http` for errors that retrying cannot fix.
pub(crate) async fn send_with_retry<F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    mut f: F,
) -> Result<reqwest::Response, EmbedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut last = String::new();
    for attempt in 0..=policy.max_retries {
        let delay = match f().await {
            Ok(response) if is_retryable_status(response.status()) => {
                last = format!("status {}", response.status());
                retry_delay(&response, policy, attempt)
            }
            Ok(response) => return Ok(response),
            Err(e) if is_retryable_error(&e) => {
                last = e.to_string();
                backoff_delay(policy.base_backoff, attempt)
            }
            Err(e) => return Err(EmbedError::Http(e)),
        };

        if attempt == policy.max_retries {
            break;
        }
        tracing::warn!(
            "{label} request failed ({last}), retrying in {}ms ({}/{})",
            delay.as_millis(),
            attempt + 1,
            policy.max_retries
        );
        tokio::time::sleep(delay).await;
    }

    Err(EmbedError::RetriesExhausted {
        attempts: policy.max_retries + 1,
        last,
    })
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/ok", server.uri());
        let response = send_with_retry("test", &fast_policy(3), || client.get(&url).send())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/flaky", server.uri());
        let response = send_with_retry("test", &fast_policy(3), || client.get(&url).send())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn exhausts_retries_on_persistent_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .expect(2)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/limited", server.uri());
        let err = send_with_retry("test", &fast_policy(1), || client.get(&url).send())
            .await
            .unwrap_err();
        assert!(
            matches!(err, EmbedError::RetriesExhausted { attempts: 2, .. }),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn client_errors_are_returned_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/bad", server.uri());
        let response = send_with_retry("test", &fast_policy(3), || client.get(&url).send())
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn connection_refused_exhausts_retries() {
        let client = reqwest::Client::new();
        let err = send_with_retry("test", &fast_policy(1), || {
            client.get("http://127.0.0.1:1/unreachable").send()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, EmbedError::RetriesExhausted { .. }));
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn backoff_never_exceeds_cap(base_ms in 0u64..10_000, attempt in 0u32..64) {
            let delay = backoff_delay(Duration::from_millis(base_ms), attempt);
            prop_assert!(delay <= MAX_BACKOFF);
        }

        #[test]
        fn backoff_is_monotonic(base_ms in 1u64..1_000, attempt in 0u32..20) {
            let base = Duration::from_millis(base_ms);
            prop_assert!(backoff_delay(base, attempt + 1) >= backoff_delay(base, attempt));
        }
    }
}
