use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::PlatformError;

const MAX_RETRIES: u32 = 4;

/// Shared retry loop for platform API calls (spec-mandated policy: up to 4
/// retries, honour `Retry-After` on 429, exponential backoff on 5xx/transport
/// errors, no retry on other 4xx).
pub async fn with_retries<T, F, Fut>(operation_name: &str, mut call: F) -> Result<T, PlatformError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PlatformError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_RETRIES && err.is_retryable() => {
                let delay = retry_after_override(&err)
                    .unwrap_or_else(|| Duration::from_secs(2u64.pow(attempt)));
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "retrying platform API call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn retry_after_override(err: &PlatformError) -> Option<Duration> {
    match err {
        PlatformError::ApiError { status: 429, body } => body
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs >= 1)
            .map(Duration::from_secs),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, PlatformError>(42) }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_4xx() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<i32, _>(PlatformError::ApiError {
                    status: 400,
                    body: "bad request".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_5xx_until_exhausted() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<i32, _>(PlatformError::ApiError {
                    status: 503,
                    body: "".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }
}
