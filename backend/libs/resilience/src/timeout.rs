/// Timeout wrapper for async operations
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("operation timed out after {0:?}")]
    Elapsed(Duration),
    #[error("{0}")]
    Inner(E),
}

impl<E> TimeoutError<E> {
    pub fn is_elapsed(&self) -> bool {
        matches!(self, TimeoutError::Elapsed(_))
    }
}

/// Execute a future with timeout
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, TimeoutError<()>>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| TimeoutError::Elapsed(duration))
}

/// Execute a fallible future with timeout, keeping the operation's own error
pub async fn with_timeout_result<F, T, E>(
    duration: Duration,
    future: F,
) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout(duration, future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(TimeoutError::Inner(e)),
        Err(_) => Err(TimeoutError::Elapsed(duration)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_timeout_elapsed() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert!(result.unwrap_err().is_elapsed());
    }

    #[tokio::test]
    async fn test_timeout_result_keeps_inner_error() {
        let result = with_timeout_result(Duration::from_secs(1), async {
            Err::<i32, _>("row locked")
        })
        .await;

        match result {
            Err(TimeoutError::Inner(e)) => assert_eq!(e, "row locked"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
