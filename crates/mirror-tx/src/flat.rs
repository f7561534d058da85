//! The flat output schema: one JSON object of string-ish fields, with both
//! header sets kept as their original encoded strings.

use crate::headers::parse_headers;
use crate::record::{decode, Traffic};
use mirror_core::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Constant origin tag carried by every output record.
pub const SOURCE_TAG: &str = "MIRRORING";

/// Protocol tag carried by every output record.
pub const PROTOCOL_TYPE: &str = "HTTP/1.1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatRecord {
    pub path: String,
    pub method: String,
    pub request_headers: String,
    pub request_payload: String,
    #[serde(rename = "type")]
    pub protocol: String,
    pub response_headers: String,
    pub response_payload: String,
    pub status_code: String,
    pub status: String,
    pub content_type: String,
    pub ip: String,
    /// Epoch seconds as a decimal string.
    pub time: String,
    #[serde(rename = "akto_account_id")]
    pub akto_account_id: String,
    /// Milliseconds.
    pub response_time: i64,
    pub source: String,
}

impl FlatRecord {
    /// Wire form published to the destination stream.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// The record as a generic JSON object.
    pub fn to_json_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Converts one nested inbound record into the flat schema.
pub fn to_flat(bytes: &[u8], client_id: &str) -> Result<FlatRecord, BridgeError> {
    let value = decode(bytes)?;
    let traffic = Traffic::extract(&value);

    let content_type = parse_headers(traffic.response_headers)
        .remove("content-type")
        .and_then(|values| values.into_iter().next())
        .unwrap_or_default();

    let record = FlatRecord {
        path: traffic.path,
        method: traffic.method.to_string(),
        request_headers: traffic.request_headers.to_string(),
        request_payload: traffic.request_body.to_string(),
        protocol: PROTOCOL_TYPE.to_string(),
        response_headers: traffic.response_headers.to_string(),
        response_payload: traffic.response_body.to_string(),
        status_code: traffic.status_code.to_string(),
        status: status_phrase(traffic.status_code).to_string(),
        content_type,
        ip: traffic.ip.to_string(),
        time: traffic.time.to_string(),
        akto_account_id: client_id.to_string(),
        response_time: traffic.response_time,
        source: SOURCE_TAG.to_string(),
    };

    debug!(
        client_id,
        method = %record.method,
        path = %record.path,
        status = %record.status_code,
        "flattened inbound record"
    );
    Ok(record)
}

/// Reason phrase for the status codes the downstream consumers recognise.
pub fn status_phrase(code: i64) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Vec<u8> {
        json!({
            "request": {
                "url": "https://api.x.com/v1/users?id=5",
                "method": "GET",
                "headers": "{\"Accept\":\"application/json\"}",
                "body": ""
            },
            "response": {
                "headers": "{\"Content-Type\":[\"application/json\"]}",
                "body": "{\"id\":5}",
                "statusCode": 201
            },
            "info": {
                "ip": "1.2.3.4",
                "dateTime": 1700000000000_i64,
                "responseTime": 37
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn flattens_a_complete_record() {
        let record = to_flat(&sample(), "acct-42").unwrap();

        assert_eq!(record.path, "/v1/users?id=5");
        assert_eq!(record.method, "GET");
        assert_eq!(record.status_code, "201");
        assert_eq!(record.status, "Created");
        assert_eq!(record.ip, "1.2.3.4");
        assert_eq!(record.time, "1700000000");
        assert_eq!(record.akto_account_id, "acct-42");
        assert_eq!(record.source, "MIRRORING");
        assert_eq!(record.protocol, "HTTP/1.1");
        assert_eq!(record.response_time, 37);
        assert_eq!(record.content_type, "application/json");
        assert_eq!(record.request_headers, "{\"Accept\":\"application/json\"}");
        assert_eq!(record.response_payload, "{\"id\":5}");
    }

    #[test]
    fn wire_field_names() {
        let map = to_flat(&sample(), "acct-42").unwrap().to_json_map();

        for key in [
            "path",
            "method",
            "requestHeaders",
            "requestPayload",
            "type",
            "responseHeaders",
            "responsePayload",
            "statusCode",
            "status",
            "contentType",
            "ip",
            "time",
            "akto_account_id",
            "responseTime",
            "source",
        ] {
            assert!(map.contains_key(key), "missing {key}");
        }
        assert_eq!(map["statusCode"], json!("201"));
        assert_eq!(map["responseTime"], json!(37));
    }

    #[test]
    fn same_input_gives_identical_bytes() {
        let a = to_flat(&sample(), "acct-42").unwrap().to_json_bytes().unwrap();
        let b = to_flat(&sample(), "acct-42").unwrap().to_json_bytes().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_request_headers_and_body_default_to_empty() {
        let bytes = br#"{"request":{"url":"/ping","method":"HEAD"},"response":{"statusCode":204}}"#;
        let record = to_flat(bytes, "acct-1").unwrap();

        assert_eq!(record.request_headers, "");
        assert_eq!(record.request_payload, "");
        assert_eq!(record.status, "No Content");
        assert_eq!(record.time, "0");
        assert_eq!(record.content_type, "");
    }

    #[test]
    fn malformed_payload_is_a_parse_error() {
        assert!(matches!(
            to_flat(b"definitely not json", "acct-1"),
            Err(BridgeError::Parse(_))
        ));
    }

    #[test]
    fn status_table() {
        assert_eq!(status_phrase(200), "OK");
        assert_eq!(status_phrase(404), "Not Found");
        assert_eq!(status_phrase(503), "Service Unavailable");
        assert_eq!(status_phrase(777), "Unknown");
        assert_eq!(status_phrase(0), "Unknown");
    }
}
