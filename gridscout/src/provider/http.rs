//! HTTP client abstraction for testability.
//!
//! The provider talks to the members API through this trait so tests can
//! inject scripted responses instead of a live endpoint.

use crate::error::ProviderError;
use std::future::Future;
use tracing::{trace, warn};

/// Asynchronous HTTP GET client.
pub trait AsyncHttpClient: Send + Sync {
    /// Performs a GET request with the given headers, returning the body.
    ///
    /// A non-success HTTP status is reported as
    /// [`ProviderError::Status`]; the body is only returned for 2xx.
    fn get_with_headers(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> impl Future<Output = Result<Vec<u8>, ProviderError>> + Send;

    /// Performs a plain GET request.
    fn get(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, ProviderError>> + Send {
        self.get_with_headers(url, &[])
    }
}

/// Default User-Agent for requests against the members API.
const DEFAULT_USER_AGENT: &str = "gridscout/0.4";

/// Production client backed by `reqwest`.
///
/// Connection pooling is tuned for many small JSON requests against one
/// host. The client carries a generous safety-net timeout; the per-attempt
/// deadline is enforced upstream by the request executor.
#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Creates a client with default configuration.
    pub fn new() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .user_agent(DEFAULT_USER_AGENT)
            .pool_max_idle_per_host(16)
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ProviderError::Connect(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl AsyncHttpClient for ReqwestHttpClient {
    async fn get_with_headers(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Vec<u8>, ProviderError> {
        trace!(url, "HTTP GET starting");

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await.map_err(|e| {
            warn!(url, error = %e, is_connect = e.is_connect(), is_timeout = e.is_timeout(), "HTTP request failed");
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Connect(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "HTTP error status");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message: format!("HTTP {} from {}", status, url),
            });
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Connect(format!("failed to read response: {}", e))
            }
        })?;

        trace!(url, bytes = bytes.len(), "HTTP response body read");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted HTTP client for tests.
    ///
    /// Responses are matched by substring against the request URL; a
    /// fragment may carry a sequence of responses, consumed one per
    /// request with the last one repeating. Every request is recorded so
    /// tests can assert on call patterns.
    pub struct ScriptedHttpClient {
        responses: Mutex<HashMap<String, Vec<Result<Vec<u8>, ProviderError>>>>,
        pub requests: Mutex<Vec<String>>,
    }

    impl ScriptedHttpClient {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Registers the response for any URL containing `url_fragment`.
        pub fn respond(&self, url_fragment: &str, response: Result<Vec<u8>, ProviderError>) {
            self.respond_seq(url_fragment, vec![response]);
        }

        /// Registers a sequence of responses for a fragment; the last
        /// response repeats once the sequence is exhausted.
        pub fn respond_seq(
            &self,
            url_fragment: &str,
            responses: Vec<Result<Vec<u8>, ProviderError>>,
        ) {
            self.responses
                .lock()
                .unwrap()
                .insert(url_fragment.to_string(), responses);
        }

        /// Number of recorded requests whose URL contains `fragment`.
        pub fn request_count(&self, fragment: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|u| u.contains(fragment))
                .count()
        }
    }

    impl AsyncHttpClient for ScriptedHttpClient {
        async fn get_with_headers(
            &self,
            url: &str,
            _headers: &[(&str, &str)],
        ) -> Result<Vec<u8>, ProviderError> {
            self.requests.lock().unwrap().push(url.to_string());

            let mut responses = self.responses.lock().unwrap();
            for (fragment, seq) in responses.iter_mut() {
                if url.contains(fragment.as_str()) {
                    return if seq.len() > 1 {
                        seq.remove(0)
                    } else {
                        seq[0].clone()
                    };
                }
            }
            Err(ProviderError::Status {
                status: 404,
                message: format!("no scripted response for {}", url),
            })
        }
    }

    #[tokio::test]
    async fn test_scripted_client_matches_fragment() {
        let client = ScriptedHttpClient::new();
        client.respond("profile", Ok(vec![1, 2, 3]));

        let body = client
            .get("https://example.com/data/member/profile?cust_id=1")
            .await
            .unwrap();
        assert_eq!(body, vec![1, 2, 3]);
        assert_eq!(client.request_count("profile"), 1);
    }

    #[tokio::test]
    async fn test_scripted_client_unmatched_is_404() {
        let client = ScriptedHttpClient::new();
        let err = client.get("https://example.com/other").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }
}
