//! Payload serialization by content format
//!
//! Maps content-format codes to payload codecs. JSON is the baseline;
//! text/plain, link-format, and CBOR ship by default and plugins may
//! register additional codecs at runtime.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::message::content_format;

/// Encode/decode between payload bytes and the dynamic JSON value model.
pub trait PayloadCodec: Send + Sync {
    /// Content-format code this codec serves.
    fn code(&self) -> u16;

    /// Media type, e.g. `application/json`.
    fn mime(&self) -> &str;

    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// Runtime registry of payload codecs, keyed by content-format code.
pub struct ContentCodecs {
    codecs: RwLock<HashMap<u16, Arc<dyn PayloadCodec>>>,
}

impl ContentCodecs {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            codecs: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the baseline codecs: text/plain (0),
    /// application/link-format (40), application/json (50),
    /// application/cbor (60).
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(TextCodec));
        registry.register(Arc::new(LinkFormatCodec));
        registry.register(Arc::new(JsonCodec));
        registry.register(Arc::new(CborCodec));
        registry
    }

    pub fn register(&self, codec: Arc<dyn PayloadCodec>) {
        self.codecs.write().insert(codec.code(), codec);
    }

    pub fn supports(&self, code: u16) -> bool {
        self.codecs.read().contains_key(&code)
    }

    pub fn mime_for(&self, code: u16) -> Option<String> {
        self.codecs.read().get(&code).map(|c| c.mime().to_string())
    }

    pub fn encode(&self, code: u16, value: &Value) -> Result<Vec<u8>> {
        let codec = self
            .codecs
            .read()
            .get(&code)
            .cloned()
            .ok_or(Error::UnknownFormat(code))?;
        codec.encode(value)
    }

    pub fn decode(&self, code: u16, bytes: &[u8]) -> Result<Value> {
        let codec = self
            .codecs
            .read()
            .get(&code)
            .cloned()
            .ok_or(Error::UnknownFormat(code))?;
        codec.decode(bytes)
    }
}

impl Default for ContentCodecs {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// application/json via serde_json
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn code(&self) -> u16 {
        content_format::JSON
    }

    fn mime(&self) -> &str {
        "application/json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}

/// text/plain;charset=utf-8. Strings pass through; other values render
/// as their JSON text.
pub struct TextCodec;

impl PayloadCodec for TextCodec {
    fn code(&self) -> u16 {
        content_format::TEXT_PLAIN
    }

    fn mime(&self) -> &str {
        "text/plain;charset=utf-8"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            other => Ok(other.to_string().into_bytes()),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let text = std::str::from_utf8(bytes).map_err(|e| Error::Decode(e.to_string()))?;
        Ok(Value::String(text.to_string()))
    }
}

/// application/link-format (RFC 6690). The link body is already a rendered
/// string by the time it reaches the codec.
pub struct LinkFormatCodec;

impl PayloadCodec for LinkFormatCodec {
    fn code(&self) -> u16 {
        content_format::LINK_FORMAT
    }

    fn mime(&self) -> &str {
        "application/link-format"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(Error::Encode("link-format payload must be a string".into())),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let text = std::str::from_utf8(bytes).map_err(|e| Error::Decode(e.to_string()))?;
        Ok(Value::String(text.to_string()))
    }
}

/// application/cbor via ciborium
pub struct CborCodec;

impl PayloadCodec for CborCodec {
    fn code(&self) -> u16 {
        content_format::CBOR
    }

    fn mime(&self) -> &str {
        "application/cbor"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(value, &mut out).map_err(|e| Error::Encode(e.to_string()))?;
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        ciborium::from_reader(bytes).map_err(|e: ciborium::de::Error<std::io::Error>| {
            Error::Decode(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_round_trip() {
        let codecs = ContentCodecs::with_defaults();
        let value = json!({"message": "Pong", "n": 3});
        let bytes = codecs.encode(content_format::JSON, &value).unwrap();
        assert_eq!(codecs.decode(content_format::JSON, &bytes).unwrap(), value);
    }

    #[test]
    fn test_text_passthrough() {
        let codecs = ContentCodecs::with_defaults();
        let bytes = codecs
            .encode(content_format::TEXT_PLAIN, &json!("hello"))
            .unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn test_cbor_round_trip() {
        let codecs = ContentCodecs::with_defaults();
        let value = json!({"temp": 21.5});
        let bytes = codecs.encode(content_format::CBOR, &value).unwrap();
        assert_eq!(codecs.decode(content_format::CBOR, &bytes).unwrap(), value);
    }

    #[test]
    fn test_unknown_format() {
        let codecs = ContentCodecs::with_defaults();
        assert!(matches!(
            codecs.encode(9999, &json!(null)),
            Err(Error::UnknownFormat(9999))
        ));
    }

    #[test]
    fn test_live_registration() {
        struct UpperCodec;
        impl PayloadCodec for UpperCodec {
            fn code(&self) -> u16 {
                65000
            }
            fn mime(&self) -> &str {
                "application/x-upper"
            }
            fn encode(&self, value: &Value) -> Result<Vec<u8>> {
                Ok(value.to_string().to_uppercase().into_bytes())
            }
            fn decode(&self, bytes: &[u8]) -> Result<Value> {
                Ok(Value::String(String::from_utf8_lossy(bytes).to_string()))
            }
        }

        let codecs = ContentCodecs::with_defaults();
        assert!(!codecs.supports(65000));
        codecs.register(Arc::new(UpperCodec));
        assert!(codecs.supports(65000));
    }
}
