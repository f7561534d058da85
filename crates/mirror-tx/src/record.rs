//! Decoding of the nested inbound traffic record.
//!
//! ```json
//! {
//!   "request":  {"url": "...", "method": "GET", "headers": "{...}", "body": "..."},
//!   "response": {"headers": "{...}", "body": "...", "statusCode": 200},
//!   "info":     {"ip": "1.2.3.4", "dateTime": 1700000000000, "responseTime": 12}
//! }
//! ```

use crate::extract::Fields;
use crate::uri;
use mirror_core::BridgeError;
use serde_json::Value;

/// Decodes the raw payload. Only a top-level JSON object is accepted.
pub fn decode(bytes: &[u8]) -> Result<Value, BridgeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| BridgeError::Parse(e.to_string()))?;
    if !value.is_object() {
        return Err(BridgeError::Parse(format!(
            "expected a JSON object, found {}",
            kind(&value)
        )));
    }
    Ok(value)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Fields pulled out of one decoded record, shared by both output schemas.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Traffic<'a> {
    pub url: &'a str,
    pub path: String,
    pub method: &'a str,
    pub request_headers: &'a str,
    pub request_body: &'a str,
    pub response_headers: &'a str,
    pub response_body: &'a str,
    pub status_code: i64,
    pub ip: &'a str,
    /// Epoch seconds.
    pub time: i64,
    /// Milliseconds.
    pub response_time: i64,
}

impl<'a> Traffic<'a> {
    pub fn extract(value: &'a Value) -> Self {
        let root = Fields::new(value);
        let request = root.object(&["request"]);
        let response = root.object(&["response"]);
        let info = root.object(&["info"]);

        let url = request.str(&["url"]);
        Self {
            url,
            path: uri::path_and_query(url),
            method: request.str(&["method"]),
            request_headers: request.str(&["headers"]),
            request_body: request.str(&["body"]),
            response_headers: response.str(&["headers"]),
            response_body: response.str(&["body"]),
            status_code: response.i64(&["statusCode"]),
            ip: info.str(&["ip"]),
            time: info.i64(&["dateTime"]) / 1000,
            response_time: info.i64(&["responseTime"]),
        }
    }
}
