use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Lower-cased header name to its values in capture order.
pub type HeaderMultimap = BTreeMap<String, Vec<String>>;

/// Parses the JSON-encoded header object captured alongside a request or
/// response.
///
/// Each value may be a string or a list; non-string list elements are
/// dropped. Names differing only in case are merged. An empty or unparsable
/// input yields an empty map and a warning.
pub fn parse_headers(encoded: &str) -> HeaderMultimap {
    let mut headers = HeaderMultimap::new();
    if encoded.trim().is_empty() {
        return headers;
    }

    let raw: Map<String, Value> = match serde_json::from_str(encoded) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "failed to parse encoded headers, treating as empty");
            return headers;
        }
    };

    for (name, value) in raw {
        let values = headers.entry(name.to_lowercase()).or_default();
        match value {
            Value::String(s) => values.push(s),
            Value::Array(items) => values.extend(items.into_iter().filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })),
            _ => {}
        }
    }
    headers
}
