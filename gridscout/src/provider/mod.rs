//! Remote profile resolution.
//!
//! [`ProfileProvider`] is the seam between the engine and the outside
//! world: one call, one logical network resolution, raw errors out. The
//! production implementation talks to the members data API, which answers
//! every data request with a short-lived signed link that must be followed
//! for the actual payload:
//!
//! ```text
//! GET /data/member/profile?cust_id=N   (Authorization: Bearer ...)
//!   -> { "link": "https://cdn..../profile.json" }
//! GET https://cdn..../profile.json     (no auth; the link is pre-signed)
//!   -> { "cust_id": N, "display_name": ..., ... }
//! ```
//!
//! Keys may be numeric customer ids or driver display names; names are
//! resolved through the lookup endpoint first and the mapping memoized.

pub mod auth;
pub mod http;

pub use auth::{StaticTokenSource, TokenSource};
pub use http::{AsyncHttpClient, ReqwestHttpClient};

use crate::error::ProviderError;
use crate::profile::DriverProfile;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tracing::{debug, info};

/// Resolves one key to a profile with a single logical network round trip.
///
/// Implementations surface failures as raw [`ProviderError`]s; retry and
/// classification happen upstream in the request executor.
pub trait ProfileProvider: Send + Sync {
    /// Fetches the profile for `key` (customer id or display name).
    fn fetch_profile(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<DriverProfile, ProviderError>> + Send;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Endpoint configuration for the members data API.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL, no trailing slash.
    pub base_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://members-ng.iracing.com".to_string(),
        }
    }
}

/// Production provider for the members data API.
///
/// Generic over the HTTP client and token source so tests can script both.
pub struct MemberProfileProvider<C, T> {
    http: C,
    tokens: T,
    config: ProviderConfig,
    /// Memoized display-name → customer-id resolutions.
    cust_ids: Mutex<HashMap<String, u64>>,
}

impl<C, T> MemberProfileProvider<C, T>
where
    C: AsyncHttpClient,
    T: TokenSource,
{
    pub fn new(http: C, tokens: T, config: ProviderConfig) -> Self {
        Self {
            http,
            tokens,
            config,
            cust_ids: Mutex::new(HashMap::new()),
        }
    }

    /// GET with a bearer token, refreshing the token once on a 401.
    async fn get_authorized(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let token = self.tokens.token().await?;
        let auth = format!("Bearer {}", token);

        match self
            .http
            .get_with_headers(url, &[("Authorization", auth.as_str())])
            .await
        {
            Err(ProviderError::Status { status: 401, .. }) => {
                info!(url, "Authorization rejected, refreshing token");
                let token = self.tokens.refresh().await?;
                let auth = format!("Bearer {}", token);
                self.http
                    .get_with_headers(url, &[("Authorization", auth.as_str())])
                    .await
            }
            other => other,
        }
    }

    /// Follows the API's link indirection: the first response body names a
    /// pre-signed URL carrying the real payload.
    async fn get_linked(&self, url: &str) -> Result<Value, ProviderError> {
        let envelope = parse_json(&self.get_authorized(url).await?)?;

        let link = envelope
            .get("link")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderError::Malformed("missing link field in API response".to_string())
            })?;

        // The link is pre-signed; no Authorization header.
        parse_json(&self.http.get(link).await?)
    }

    /// Resolves a key to a customer id, going through the lookup endpoint
    /// for display names.
    async fn resolve_cust_id(&self, key: &str) -> Result<u64, ProviderError> {
        if let Ok(id) = key.parse::<u64>() {
            return Ok(id);
        }

        if let Some(&id) = self.cust_ids.lock().unwrap().get(key) {
            return Ok(id);
        }

        let url = format!(
            "{}/data/lookup/drivers?search_term={}",
            self.config.base_url,
            encode_query(key)
        );
        let drivers = self.get_linked(&url).await?;

        let drivers = drivers.as_array().ok_or_else(|| {
            ProviderError::Malformed("lookup response is not an array".to_string())
        })?;

        // Prefer an exact display-name match; fall back to the first hit.
        let matched = drivers
            .iter()
            .find(|d| d.get("display_name").and_then(Value::as_str) == Some(key))
            .or_else(|| drivers.first());

        let id = matched
            .and_then(|d| d.get("cust_id"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        if id == 0 {
            return Err(ProviderError::Status {
                status: 404,
                message: format!("no driver matched search term: {}", key),
            });
        }

        debug!(key, cust_id = id, "Resolved driver name to customer id");
        self.cust_ids.lock().unwrap().insert(key.to_string(), id);
        Ok(id)
    }
}

impl<C, T> ProfileProvider for MemberProfileProvider<C, T>
where
    C: AsyncHttpClient,
    T: TokenSource,
{
    async fn fetch_profile(&self, key: &str) -> Result<DriverProfile, ProviderError> {
        let cust_id = self.resolve_cust_id(key).await?;

        let url = format!(
            "{}/data/member/profile?cust_id={}",
            self.config.base_url, cust_id
        );
        let payload = self.get_linked(&url).await?;

        Ok(DriverProfile::from_value(payload))
    }

    fn name(&self) -> &str {
        "members-api"
    }
}

/// Decodes a JSON body, mapping decode failures to `Malformed`.
fn parse_json(body: &[u8]) -> Result<Value, ProviderError> {
    serde_json::from_slice(body)
        .map_err(|e| ProviderError::Malformed(format!("invalid JSON payload: {}", e)))
}

/// Percent-encodes a query value (RFC 3986 unreserved characters pass
/// through).
fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
