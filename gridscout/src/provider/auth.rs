//! Bearer-token supply for the members API.
//!
//! The API authenticates with short-lived OAuth bearer tokens. The
//! provider asks a [`TokenSource`] for the current token before each
//! authorized request and asks it to refresh once when a request comes
//! back 401, so an expired token costs one extra round trip instead of a
//! failed resolution.

use crate::error::ProviderError;
use std::future::Future;

/// Supplies bearer tokens for authorized requests.
pub trait TokenSource: Send + Sync {
    /// Returns the current token.
    fn token(&self) -> impl Future<Output = Result<String, ProviderError>> + Send;

    /// Obtains a fresh token after an authorization failure.
    fn refresh(&self) -> impl Future<Output = Result<String, ProviderError>> + Send;
}

/// Token source holding one fixed token.
///
/// Suitable when token refresh is handled outside the process; `refresh`
/// hands back the same token.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<String, ProviderError> {
        Ok(self.token.clone())
    }

    async fn refresh(&self) -> Result<String, ProviderError> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Token source that counts refreshes and hands out generation-stamped
    /// tokens.
    pub struct CountingTokenSource {
        pub refreshes: AtomicUsize,
    }

    impl CountingTokenSource {
        pub fn new() -> Self {
            Self {
                refreshes: AtomicUsize::new(0),
            }
        }
    }

    impl TokenSource for CountingTokenSource {
        async fn token(&self) -> Result<String, ProviderError> {
            Ok(format!("token-{}", self.refreshes.load(Ordering::SeqCst)))
        }

        async fn refresh(&self) -> Result<String, ProviderError> {
            let generation = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("token-{}", generation))
        }
    }

    #[tokio::test]
    async fn test_static_source_refresh_returns_same_token() {
        let source = StaticTokenSource::new("abc");
        assert_eq!(source.token().await.unwrap(), "abc");
        assert_eq!(source.refresh().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_counting_source_advances_on_refresh() {
        let source = CountingTokenSource::new();
        assert_eq!(source.token().await.unwrap(), "token-0");
        assert_eq!(source.refresh().await.unwrap(), "token-1");
        assert_eq!(source.token().await.unwrap(), "token-1");
    }
}
