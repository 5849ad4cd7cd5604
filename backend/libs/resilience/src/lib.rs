/// Resilience helpers for storage-bound batch work
///
/// - **Retry**: exponential backoff with jitter, optionally restricted to
///   errors a caller classifies as transient
/// - **Timeout**: time limit on a single storage call, keeping the inner error
///
/// # Example: retried write with a deadline
///
/// ```rust,no_run
/// use resilience::{with_retry_if, with_timeout_result, RetryConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let config = RetryConfig::default();
///
///     let result = with_retry_if(&config, |e: &String| e.contains("reset"), || async {
///         with_timeout_result(Duration::from_secs(5), async {
///             // Your UPDATE here
///             Ok::<_, String>(())
///         })
///         .await
///         .map_err(|e| e.to_string())
///     })
///     .await;
///     assert!(result.is_ok());
/// }
/// ```

pub mod retry;
pub mod timeout;

pub use retry::{with_retry, with_retry_if, RetryConfig, RetryError};
pub use timeout::{with_timeout, with_timeout_result, TimeoutError};
