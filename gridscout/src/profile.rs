//! Driver profile domain type.

use serde_json::Value;

/// A resolved driver profile.
///
/// The remote endpoint returns a free-form JSON document; the engine keeps
/// the full payload and lifts out only the fields it needs for keying and
/// display. Parsing is lenient on purpose — an unexpected shape is still a
/// usable profile as long as it is valid JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverProfile {
    /// Customer id, when the payload carries one.
    pub cust_id: Option<u64>,
    /// Display name, when the payload carries one.
    pub display_name: Option<String>,
    /// The complete payload as received.
    pub raw: Value,
}

impl DriverProfile {
    /// Builds a profile from a decoded JSON payload.
    ///
    /// Looks for `cust_id` and `display_name` at the top level and under
    /// the `member_info` object the members API nests them in.
    pub fn from_value(raw: Value) -> Self {
        let lookup = |field: &str| -> Option<&Value> {
            raw.get(field)
                .or_else(|| raw.get("member_info").and_then(|m| m.get(field)))
        };

        let cust_id = lookup("cust_id").and_then(Value::as_u64);
        let display_name = lookup("display_name")
            .and_then(Value::as_str)
            .map(str::to_owned);

        Self {
            cust_id,
            display_name,
            raw,
        }
    }
}
