//! The binary output schema, encoded as protobuf.
//!
//! Same content as [`FlatRecord`](crate::FlatRecord), but headers are proper
//! multimaps and numeric fields are integers.

use crate::extract::Fields;
use crate::flat::{status_phrase, PROTOCOL_TYPE, SOURCE_TAG};
use crate::headers::{parse_headers, HeaderMultimap};
use crate::record::{decode, Traffic};
use crate::uri;
use mirror_core::BridgeError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Placeholder VXLAN id; mirrored traffic carries none.
pub const DEFAULT_VXLAN_ID: &str = "0";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StringList {
    #[prost(string, repeated, tag = "1")]
    pub values: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpResponseParam {
    #[prost(string, tag = "1")]
    pub method: String,
    #[prost(string, tag = "2")]
    pub path: String,
    #[prost(string, tag = "3")]
    pub r#type: String,
    #[prost(btree_map = "string, message", tag = "4")]
    pub request_headers: BTreeMap<String, StringList>,
    #[prost(string, tag = "5")]
    pub request_payload: String,
    #[prost(int32, tag = "7")]
    pub status_code: i32,
    #[prost(string, tag = "8")]
    pub status: String,
    #[prost(btree_map = "string, message", tag = "9")]
    pub response_headers: BTreeMap<String, StringList>,
    #[prost(string, tag = "10")]
    pub response_payload: String,
    /// Epoch seconds.
    #[prost(int32, tag = "11")]
    pub time: i32,
    #[prost(string, tag = "12")]
    pub akto_account_id: String,
    #[prost(string, tag = "13")]
    pub ip: String,
    #[prost(string, tag = "14")]
    pub dest_ip: String,
    #[prost(string, tag = "15")]
    pub direction: String,
    #[prost(bool, tag = "16")]
    pub is_pending: bool,
    #[prost(string, tag = "17")]
    pub source: String,
    #[prost(string, tag = "18")]
    pub akto_vxlan_id: String,
}

impl HttpResponseParam {
    /// Header values for `name` on the request side, if present.
    pub fn request_header(&self, name: &str) -> Option<&[String]> {
        self.request_headers.get(name).map(|l| l.values.as_slice())
    }
}

fn to_proto_headers(headers: HeaderMultimap) -> BTreeMap<String, StringList> {
    headers
        .into_iter()
        .map(|(name, values)| (name, StringList { values }))
        .collect()
}

fn clamp_i32(n: i64) -> i32 {
    n.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Converts one nested inbound record into the binary schema.
///
/// A `host` request header is synthesized from the URL when it has one.
pub fn to_binary(bytes: &[u8], client_id: &str) -> Result<HttpResponseParam, BridgeError> {
    let value = decode(bytes)?;
    let traffic = Traffic::extract(&value);

    let mut request_headers = parse_headers(traffic.request_headers);
    if let Some(host) = uri::host(traffic.url) {
        request_headers.insert("host".to_string(), vec![host]);
    }

    let record = HttpResponseParam {
        method: traffic.method.to_string(),
        path: traffic.path,
        r#type: PROTOCOL_TYPE.to_string(),
        request_headers: to_proto_headers(request_headers),
        request_payload: traffic.request_body.to_string(),
        status_code: clamp_i32(traffic.status_code),
        status: status_phrase(traffic.status_code).to_string(),
        response_headers: to_proto_headers(parse_headers(traffic.response_headers)),
        response_payload: traffic.response_body.to_string(),
        time: clamp_i32(traffic.time),
        akto_account_id: client_id.to_string(),
        ip: traffic.ip.to_string(),
        dest_ip: String::new(),
        direction: String::new(),
        is_pending: false,
        source: SOURCE_TAG.to_string(),
        akto_vxlan_id: DEFAULT_VXLAN_ID.to_string(),
    };

    debug!(
        client_id,
        method = %record.method,
        path = %record.path,
        status = record.status_code,
        "built binary traffic record"
    );
    Ok(record)
}

/// Re-derives the binary schema from an already flattened record.
///
/// Every field is read with the soft-default policy, so this never fails.
/// Numeric fields may arrive as numbers or decimal strings.
pub fn to_binary_from_flat(flat: &Map<String, Value>) -> HttpResponseParam {
    let fields = Fields::from_map(flat);
    let text = |key: &str| fields.str(&[key]).to_string();

    HttpResponseParam {
        method: text("method"),
        path: text("path"),
        r#type: text("type"),
        request_headers: to_proto_headers(parse_headers(fields.str(&["requestHeaders"]))),
        request_payload: text("requestPayload"),
        status_code: clamp_i32(fields.lenient_i64(&["statusCode"])),
        status: text("status"),
        response_headers: to_proto_headers(parse_headers(fields.str(&["responseHeaders"]))),
        response_payload: text("responsePayload"),
        time: clamp_i32(fields.lenient_i64(&["time"])),
        akto_account_id: text("akto_account_id"),
        ip: text("ip"),
        dest_ip: String::new(),
        direction: String::new(),
        is_pending: false,
        source: text("source"),
        akto_vxlan_id: DEFAULT_VXLAN_ID.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flat::to_flat;
    use prost::Message;
    use serde_json::json;

    fn sample() -> Vec<u8> {
        json!({
            "request": {
                "url": "https://api.x.com:8443/v1/users?id=5",
                "method": "POST",
                "headers": "{\"X-A\":\"v1\",\"x-b\":[\"v2\",\"v3\"]}",
                "body": "{\"name\":\"n\"}"
            },
            "response": {
                "headers": "{\"Content-Type\":\"application/json\"}",
                "body": "{}",
                "statusCode": 404
            },
            "info": {"ip": "10.1.1.1", "dateTime": 1700000000000_i64}
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn builds_typed_record_with_host_header() {
        let record = to_binary(&sample(), "acct-7").unwrap();

        assert_eq!(record.method, "POST");
        assert_eq!(record.path, "/v1/users?id=5");
        assert_eq!(record.r#type, "HTTP/1.1");
        assert_eq!(record.status_code, 404);
        assert_eq!(record.status, "Not Found");
        assert_eq!(record.time, 1_700_000_000);
        assert_eq!(record.akto_account_id, "acct-7");
        assert_eq!(record.akto_vxlan_id, "0");
        assert_eq!(record.source, "MIRRORING");
        assert!(!record.is_pending);
        assert!(record.dest_ip.is_empty() && record.direction.is_empty());

        assert_eq!(
            record.request_header("host"),
            Some(&["api.x.com:8443".to_string()][..])
        );
        assert_eq!(record.request_header("x-a"), Some(&["v1".to_string()][..]));
        assert_eq!(record.request_header("x-b").map(|v| v.len()), Some(2));
        assert!(record.response_headers.contains_key("content-type"));
    }

    #[test]
    fn bare_path_gets_no_host_header() {
        let bytes = br#"{"request":{"url":"/a/b","headers":""},"response":{"statusCode":777}}"#;
        let record = to_binary(bytes, "acct-7").unwrap();

        assert!(record.request_headers.is_empty());
        assert_eq!(record.status, "Unknown");
    }

    #[test]
    fn from_flat_matches_direct_conversion_apart_from_host() {
        let direct = to_binary(&sample(), "acct-7").unwrap();
        let flat = to_flat(&sample(), "acct-7").unwrap();
        let mut via_flat = to_binary_from_flat(&flat.to_json_map());

        via_flat.request_headers.insert(
            "host".to_string(),
            StringList {
                values: vec!["api.x.com:8443".to_string()],
            },
        );
        assert_eq!(direct, via_flat);
    }

    #[test]
    fn from_flat_tolerates_missing_and_mistyped_fields() {
        let flat = json!({"statusCode": 200, "time": "oops", "method": 5});
        let record = to_binary_from_flat(flat.as_object().unwrap());

        assert_eq!(record.status_code, 200);
        assert_eq!(record.time, 0);
        assert_eq!(record.method, "");
        assert!(record.request_headers.is_empty());
    }

    #[test]
    fn encodes_and_decodes_as_protobuf() {
        let record = to_binary(&sample(), "acct-7").unwrap();
        let bytes = record.encode_to_vec();
        let decoded = HttpResponseParam::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn malformed_payload_is_a_parse_error() {
        assert!(matches!(
            to_binary(b"{", "acct-7"),
            Err(BridgeError::Parse(_))
        ));
    }
}
