//! Error taxonomy and classification.
//!
//! Every failure that comes out of a profile resolution is mapped onto a
//! small fixed taxonomy ([`ErrorKind`]). The retry loop, the metrics
//! histogram, and the error messages delivered to consumers all consult the
//! same classification, so retry behavior can never drift from what is
//! reported.
//!
//! # Classification rules
//!
//! - connection-level failures → `Network` (retryable)
//! - request deadline exceeded → `Timeout` (retryable)
//! - HTTP 429 or 5xx → `Api` (retryable)
//! - other 4xx → `Api` (not retryable)
//! - malformed payload → `Data` (not retryable)
//! - anything else → `Unknown` (not retryable, conservative default)

use thiserror::Error;

/// Raw failure surfaced by a [`ProfileProvider`](crate::provider::ProfileProvider).
///
/// This is the "opaque" error the engine receives from the remote
/// resolution factory. It carries just enough structure for
/// [`classify`] to do its job.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Connection could not be established or was dropped mid-request.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// The endpoint answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body could not be interpreted.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Anything the other variants don't cover.
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// HTTP status code, if this failure carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// The fixed failure taxonomy shared by retry logic, metrics, and delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection-level failure (DNS, refused, reset).
    Network,
    /// Deadline exceeded.
    Timeout,
    /// The endpoint answered, but with an error status.
    Api,
    /// The endpoint answered 2xx, but the payload was unusable.
    Data,
    /// Unclassifiable failure.
    Unknown,
}

impl ErrorKind {
    /// Stable lowercase label for metrics and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Api => "api",
            ErrorKind::Data => "data",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a raw provider failure onto the taxonomy.
pub fn classify(raw: &ProviderError) -> ErrorKind {
    match raw {
        ProviderError::Connect(_) => ErrorKind::Network,
        ProviderError::Timeout => ErrorKind::Timeout,
        ProviderError::Status { .. } => ErrorKind::Api,
        ProviderError::Malformed(_) => ErrorKind::Data,
        ProviderError::Other(_) => ErrorKind::Unknown,
    }
}

/// Whether a failure of the given kind is worth retrying.
///
/// `Api` failures are retryable only for rate limiting (429) and server
/// errors (5xx); client errors are permanent.
pub fn is_retryable(kind: ErrorKind, status: Option<u16>) -> bool {
    match kind {
        ErrorKind::Network | ErrorKind::Timeout => true,
        ErrorKind::Api => match status {
            Some(429) => true,
            Some(s) => (500..600).contains(&s),
            None => false,
        },
        ErrorKind::Data | ErrorKind::Unknown => false,
    }
}

/// A classified, terminal failure for one key.
///
/// This is what consumers receive when a key fails terminally: a
/// structured kind plus a human-readable message, never a raw error.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("profile fetch failed ({kind}): {message}")]
pub struct FetchError {
    /// Taxonomy bucket this failure was classified into.
    pub kind: ErrorKind,
    /// Human-readable description, safe to show to a consumer.
    pub message: String,
}

impl FetchError {
    /// Classifies a raw provider error into a terminal fetch error.
    pub fn from_provider(raw: &ProviderError) -> Self {
        Self {
            kind: classify(raw),
            message: raw.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_connect_is_network() {
        let err = ProviderError::Connect("connection refused".to_string());
        assert_eq!(classify(&err), ErrorKind::Network);
        assert!(is_retryable(classify(&err), err.status()));
    }

    #[test]
    fn test_classify_timeout_is_retryable() {
        let err = ProviderError::Timeout;
        assert_eq!(classify(&err), ErrorKind::Timeout);
        assert!(is_retryable(ErrorKind::Timeout, None));
    }

    #[test]
    fn test_classify_server_errors_retryable() {
        for status in [500, 502, 503, 599] {
            let err = ProviderError::Status {
                status,
                message: "server error".to_string(),
            };
            assert_eq!(classify(&err), ErrorKind::Api);
            assert!(
                is_retryable(ErrorKind::Api, err.status()),
                "status {} should be retryable",
                status
            );
        }
    }

    #[test]
    fn test_classify_rate_limit_retryable() {
        assert!(is_retryable(ErrorKind::Api, Some(429)));
    }

    #[test]
    fn test_classify_client_errors_not_retryable() {
        for status in [400, 401, 403, 404, 422, 499] {
            assert!(
                !is_retryable(ErrorKind::Api, Some(status)),
                "status {} should not be retryable",
                status
            );
        }
    }

    #[test]
    fn test_classify_malformed_is_data() {
        let err = ProviderError::Malformed("expected JSON object".to_string());
        assert_eq!(classify(&err), ErrorKind::Data);
        assert!(!is_retryable(ErrorKind::Data, None));
    }

    #[test]
    fn test_classify_other_is_unknown_and_permanent() {
        let err = ProviderError::Other("something odd".to_string());
        assert_eq!(classify(&err), ErrorKind::Unknown);
        assert!(!is_retryable(ErrorKind::Unknown, None));
    }

    #[test]
    fn test_api_without_status_not_retryable() {
        assert!(!is_retryable(ErrorKind::Api, None));
    }

    #[test]
    fn test_fetch_error_from_provider() {
        let raw = ProviderError::Status {
            status: 503,
            message: "maintenance".to_string(),
        };
        let err = FetchError::from_provider(&raw);
        assert_eq!(err.kind, ErrorKind::Api);
        assert!(err.message.contains("503"));
    }

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError {
            kind: ErrorKind::Timeout,
            message: "request timed out".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "profile fetch failed (timeout): request timed out"
        );
    }
}
