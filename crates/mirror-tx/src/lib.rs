//! # Mirror TX - traffic record transformation
//!
//! Pure conversions from the nested mirrored-traffic record into the two
//! schemas the destination understands:
//!
//! - [`to_flat`] produces a [`FlatRecord`], published as a JSON object
//! - [`to_binary`] produces an [`HttpResponseParam`], published as protobuf
//! - [`to_binary_from_flat`] re-derives the binary schema from a flat record
//!
//! All conversions are stateless. Only a payload that is not a JSON object
//! fails (with [`BridgeError::Parse`](mirror_core::BridgeError::Parse));
//! every missing or mistyped field inside it degrades to an empty value.
//!
//! ```rust
//! let bytes = br#"{"request":{"url":"http://host/a/b?x=1","method":"GET"},
//!                  "response":{"statusCode":200},
//!                  "info":{"dateTime":1700000000000}}"#;
//! let flat = mirror_tx::to_flat(bytes, "acct-42").unwrap();
//! assert_eq!(flat.path, "/a/b?x=1");
//! assert_eq!(flat.status, "OK");
//! assert_eq!(flat.time, "1700000000");
//! ```

pub mod binary;
pub mod extract;
pub mod flat;
pub mod headers;
pub mod record;
pub mod uri;

pub use binary::{to_binary, to_binary_from_flat, HttpResponseParam, StringList};
pub use extract::Fields;
pub use flat::{status_phrase, to_flat, FlatRecord, PROTOCOL_TYPE, SOURCE_TAG};
pub use headers::{parse_headers, HeaderMultimap};
pub use record::decode;
