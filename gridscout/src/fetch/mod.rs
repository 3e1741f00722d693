//! Request execution with timeout and classified retry.
//!
//! [`RequestExecutor::execute`] performs the attempts for one key: each
//! attempt is bounded by the per-attempt timeout, failures are classified,
//! and only retryable kinds are retried with doubling backoff. The
//! executor holds no queue or priority state; admission is the scheduler's
//! concern and deduplication the single-flight resolver's.

use crate::config::RetryConfig;
use crate::error::{is_retryable, ErrorKind, FetchError};
use crate::profile::DriverProfile;
use crate::provider::ProfileProvider;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Successful resolution of one key.
#[derive(Debug, Clone)]
pub struct FetchSuccess {
    pub profile: Arc<DriverProfile>,
    /// Attempts spent, first try included.
    pub attempts: u32,
}

/// Unsuccessful end of one key's resolution.
#[derive(Debug, Clone)]
pub enum FetchFailure {
    /// All applicable attempts failed; the classified error is attached.
    Terminal { error: FetchError, attempts: u32 },
    /// The global cancellation signal fired; not a per-key failure.
    Aborted,
}

/// Executes one key's attempts against a provider.
pub struct RequestExecutor<P> {
    provider: Arc<P>,
    config: RetryConfig,
}

impl<P> RequestExecutor<P>
where
    P: ProfileProvider,
{
    pub fn new(provider: Arc<P>, config: RetryConfig) -> Self {
        Self { provider, config }
    }

    /// Resolves `key` with the executor's default retry configuration.
    pub async fn execute(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchSuccess, FetchFailure> {
        self.execute_with(key, cancel, self.config).await
    }

    /// Resolves `key`, retrying transient failures.
    ///
    /// Attempt n (1-based) that fails retryably waits
    /// `backoff_base * 2^(n-1)` before attempt n+1. Cancellation is
    /// honored between attempts, during the network call, and during
    /// backoff. The per-call `config` lets work items carry their own
    /// deadline and retry budget.
    pub async fn execute_with(
        &self,
        key: &str,
        cancel: &CancellationToken,
        config: RetryConfig,
    ) -> Result<FetchSuccess, FetchFailure> {
        let max = config.max_retries.max(1);
        let mut attempt = 1u32;

        loop {
            if cancel.is_cancelled() {
                return Err(FetchFailure::Aborted);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchFailure::Aborted),
                result = tokio::time::timeout(
                    config.request_timeout,
                    self.provider.fetch_profile(key),
                ) => result,
            };

            let (error, status) = match outcome {
                Ok(Ok(profile)) => {
                    debug!(key, attempt, provider = self.provider.name(), "Profile fetched");
                    return Ok(FetchSuccess {
                        profile: Arc::new(profile),
                        attempts: attempt,
                    });
                }
                Ok(Err(raw)) => {
                    let status = raw.status();
                    (FetchError::from_provider(&raw), status)
                }
                Err(_) => (
                    FetchError {
                        kind: ErrorKind::Timeout,
                        message: format!("attempt timed out after {:?}", config.request_timeout),
                    },
                    None,
                ),
            };

            if !is_retryable(error.kind, status) || attempt == max {
                info!(
                    key,
                    attempt,
                    kind = %error.kind,
                    error = %error.message,
                    "Profile fetch failed terminally"
                );
                return Err(FetchFailure::Terminal {
                    error,
                    attempts: attempt,
                });
            }

            let backoff = config.backoff_base * 2u32.pow(attempt - 1);
            debug!(
                key,
                attempt,
                kind = %error.kind,
                backoff_ms = backoff.as_millis() as u64,
                "Retryable failure, backing off"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchFailure::Aborted),
                _ = tokio::time::sleep(backoff) => {}
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::error::ProviderError;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Provider that replays a scripted sequence of outcomes; the last
    /// outcome repeats once the script is exhausted.
    pub struct ScriptedProvider {
        script: Mutex<Vec<Result<DriverProfile, ProviderError>>>,
        pub calls: AtomicU32,
    }

    impl ScriptedProvider {
        pub fn new(script: Vec<Result<DriverProfile, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            }
        }

        pub fn succeeding(name: &str) -> Self {
            Self::new(vec![Ok(DriverProfile::from_value(
                json!({ "display_name": name }),
            ))])
        }
    }

    impl ProfileProvider for ScriptedProvider {
        async fn fetch_profile(&self, _key: &str) -> Result<DriverProfile, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Provider whose requests never complete, for timeout tests.
    pub struct HangingProvider;

    impl ProfileProvider for HangingProvider {
        async fn fetch_profile(&self, _key: &str) -> Result<DriverProfile, ProviderError> {
            futures::future::pending().await
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    fn retry_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }

    fn transient() -> ProviderError {
        ProviderError::Status {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let provider = Arc::new(ScriptedProvider::succeeding("Alice"));
        let executor = RequestExecutor::new(Arc::clone(&provider), retry_config());

        let success = executor
            .execute("alice", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(success.attempts, 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_schedule_is_one_then_two_seconds() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(transient()),
            Err(transient()),
            Ok(DriverProfile::from_value(json!({"display_name": "Alice"}))),
        ]));
        let executor = RequestExecutor::new(Arc::clone(&provider), retry_config());

        let started = tokio::time::Instant::now();
        let success = executor
            .execute("alice", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(success.attempts, 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        // Backoffs of exactly 1s then 2s; the mock attempts take no time.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fourth_attempt_never_occurs() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(transient())]));
        let executor = RequestExecutor::new(Arc::clone(&provider), retry_config());

        let failure = executor
            .execute("alice", &CancellationToken::new())
            .await
            .unwrap_err();

        match failure {
            FetchFailure::Terminal { error, attempts } => {
                assert_eq!(attempts, 3);
                assert_eq!(error.kind, ErrorKind::Api);
            }
            FetchFailure::Aborted => panic!("expected terminal failure"),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_without_retry() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Status {
            status: 404,
            message: "not found".to_string(),
        })]));
        let executor = RequestExecutor::new(Arc::clone(&provider), retry_config());

        let failure = executor
            .execute("alice", &CancellationToken::new())
            .await
            .unwrap_err();

        match failure {
            FetchFailure::Terminal { error, attempts } => {
                assert_eq!(attempts, 1);
                assert_eq!(error.kind, ErrorKind::Api);
            }
            FetchFailure::Aborted => panic!("expected terminal failure"),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_data_error_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Malformed(
            "bad payload".to_string(),
        ))]));
        let executor = RequestExecutor::new(Arc::clone(&provider), retry_config());

        let failure = executor
            .execute("alice", &CancellationToken::new())
            .await
            .unwrap_err();
        match failure {
            FetchFailure::Terminal { error, .. } => assert_eq!(error.kind, ErrorKind::Data),
            FetchFailure::Aborted => panic!("expected terminal failure"),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_classified_as_timeout() {
        let executor = RequestExecutor::new(
            Arc::new(HangingProvider),
            RetryConfig {
                max_retries: 1,
                backoff_base: Duration::from_secs(1),
                request_timeout: Duration::from_millis(100),
            },
        );

        let failure = executor
            .execute("alice", &CancellationToken::new())
            .await
            .unwrap_err();
        match failure {
            FetchFailure::Terminal { error, .. } => assert_eq!(error.kind, ErrorKind::Timeout),
            FetchFailure::Aborted => panic!("expected terminal failure"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff_aborts() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(transient())]));
        let executor = RequestExecutor::new(provider, retry_config());

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel_clone.cancel();
        });

        let failure = executor.execute("alice", &cancel).await.unwrap_err();
        assert!(matches!(failure, FetchFailure::Aborted));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_aborts() {
        let provider = Arc::new(ScriptedProvider::succeeding("Alice"));
        let executor = RequestExecutor::new(Arc::clone(&provider), retry_config());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let failure = executor.execute("alice", &cancel).await.unwrap_err();
        assert!(matches!(failure, FetchFailure::Aborted));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
