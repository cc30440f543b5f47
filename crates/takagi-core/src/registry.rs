//! Runtime protocol-constant registries
//!
//! A single source of truth for protocol numbers: methods, response codes,
//! options, content formats, and TCP signaling codes. Registration is live,
//! so constants added by plugins are honored by subsequent encode/decode
//! and negotiation decisions.

use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::hook::HookSink;
use crate::message::{code, content_format, csm_option, method, option, signaling};

/// One registered protocol constant. The value is the identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub value: u16,
    pub name: String,
    pub symbol: Option<String>,
    pub rfc: Option<String>,
}

#[derive(Default)]
struct Tables {
    by_value: HashMap<u16, RegistryEntry>,
    by_name: HashMap<String, u16>,
    by_symbol: HashMap<String, u16>,
}

/// A mutex-protected name/value table for one constant space.
pub struct Registry {
    kind: &'static str,
    tables: Mutex<Tables>,
    hooks: RwLock<Option<Arc<dyn HookSink>>>,
}

impl Registry {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            tables: Mutex::new(Tables::default()),
            hooks: RwLock::new(None),
        }
    }

    /// Which constant space this registry covers (`"method"`, `"response"`, ...).
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn set_hook_sink(&self, sink: Arc<dyn HookSink>) {
        *self.hooks.write() = Some(sink);
    }

    /// Insert a constant. Idempotent on an exact duplicate; re-registering a
    /// value with a different symbol is a conflict.
    pub fn register(
        &self,
        value: u16,
        name: &str,
        symbol: Option<&str>,
        rfc: Option<&str>,
    ) -> Result<()> {
        let entry = RegistryEntry {
            value,
            name: name.to_string(),
            symbol: symbol.map(str::to_string),
            rfc: rfc.map(str::to_string),
        };

        {
            let mut tables = self.tables.lock();
            if let Some(existing) = tables.by_value.get(&value) {
                if *existing == entry {
                    return Ok(());
                }
                if existing.symbol != entry.symbol {
                    return Err(Error::RegistryConflict {
                        value,
                        existing: existing.name.clone(),
                    });
                }
            }
            tables.by_name.insert(entry.name.clone(), value);
            if let Some(sym) = &entry.symbol {
                tables.by_symbol.insert(sym.clone(), value);
            }
            tables.by_value.insert(value, entry);
        }

        if let Some(hooks) = self.hooks.read().as_ref() {
            hooks.emit(
                "coap_registry_registered",
                json!({ "registry": self.kind, "value": value, "name": name }),
            );
        }
        Ok(())
    }

    pub fn name_for(&self, value: u16) -> Option<String> {
        self.tables
            .lock()
            .by_value
            .get(&value)
            .map(|e| e.name.clone())
    }

    /// Look a value up by name or by symbol.
    pub fn value_for(&self, key: &str) -> Option<u16> {
        let tables = self.tables.lock();
        tables
            .by_name
            .get(key)
            .or_else(|| tables.by_symbol.get(key))
            .copied()
    }

    pub fn rfc_for(&self, value: u16) -> Option<String> {
        self.tables
            .lock()
            .by_value
            .get(&value)
            .and_then(|e| e.rfc.clone())
    }

    pub fn contains(&self, value: u16) -> bool {
        self.tables.lock().by_value.contains_key(&value)
    }

    /// Snapshot of the registered values, ascending.
    pub fn values(&self) -> Vec<u16> {
        let mut values: Vec<u16> = self.tables.lock().by_value.keys().copied().collect();
        values.sort_unstable();
        values
    }

    /// Snapshot of every entry, ascending by value.
    pub fn all(&self) -> Vec<RegistryEntry> {
        let mut entries: Vec<RegistryEntry> =
            self.tables.lock().by_value.values().cloned().collect();
        entries.sort_by_key(|e| e.value);
        entries
    }

    /// Iterate a snapshot of the registered values.
    pub fn each_value<F: FnMut(u16)>(&self, mut f: F) {
        for value in self.values() {
            f(value);
        }
    }
}

/// An option number is critical when its low bit is set (RFC 7252 §5.4.1).
pub const fn is_critical_option(number: u16) -> bool {
    number & 1 == 1
}

/// The five protocol registries, seeded with the RFC defaults.
pub struct Registries {
    pub methods: Registry,
    pub responses: Registry,
    pub options: Registry,
    pub content_formats: Registry,
    pub signaling: Registry,
}

impl Registries {
    /// Empty registries with no seeded constants.
    pub fn empty() -> Self {
        Self {
            methods: Registry::new("method"),
            responses: Registry::new("response"),
            options: Registry::new("option"),
            content_formats: Registry::new("content_format"),
            signaling: Registry::new("signaling"),
        }
    }

    /// Registries seeded with the RFC 7252 / 8132 / 8323 constants.
    pub fn coap() -> Self {
        let r = Self::empty();
        r.seed();
        r
    }

    pub fn install_hook_sink(&self, sink: Arc<dyn HookSink>) {
        self.methods.set_hook_sink(sink.clone());
        self.responses.set_hook_sink(sink.clone());
        self.options.set_hook_sink(sink.clone());
        self.content_formats.set_hook_sink(sink.clone());
        self.signaling.set_hook_sink(sink);
    }

    fn seed(&self) {
        let m = &self.methods;
        let _ = m.register(method::GET as u16, "GET", Some("get"), Some("RFC 7252"));
        let _ = m.register(method::POST as u16, "POST", Some("post"), Some("RFC 7252"));
        let _ = m.register(method::PUT as u16, "PUT", Some("put"), Some("RFC 7252"));
        let _ = m.register(method::DELETE as u16, "DELETE", Some("delete"), Some("RFC 7252"));
        let _ = m.register(method::FETCH as u16, "FETCH", Some("fetch"), Some("RFC 8132"));
        let _ = m.register(method::PATCH as u16, "PATCH", Some("patch"), Some("RFC 8132"));
        let _ = m.register(method::IPATCH as u16, "iPATCH", Some("ipatch"), Some("RFC 8132"));

        let resp: &[(u8, &str, &str)] = &[
            (code::CREATED, "Created", "created"),
            (code::DELETED, "Deleted", "deleted"),
            (code::VALID, "Valid", "valid"),
            (code::CHANGED, "Changed", "changed"),
            (code::CONTENT, "Content", "content"),
            (code::CONTINUE, "Continue", "continue"),
            (code::BAD_REQUEST, "Bad Request", "bad_request"),
            (code::UNAUTHORIZED, "Unauthorized", "unauthorized"),
            (code::BAD_OPTION, "Bad Option", "bad_option"),
            (code::FORBIDDEN, "Forbidden", "forbidden"),
            (code::NOT_FOUND, "Not Found", "not_found"),
            (code::METHOD_NOT_ALLOWED, "Method Not Allowed", "method_not_allowed"),
            (code::NOT_ACCEPTABLE, "Not Acceptable", "not_acceptable"),
            (code::PRECONDITION_FAILED, "Precondition Failed", "precondition_failed"),
            (code::REQUEST_ENTITY_TOO_LARGE, "Request Entity Too Large", "request_entity_too_large"),
            (
                code::UNSUPPORTED_CONTENT_FORMAT,
                "Unsupported Content-Format",
                "unsupported_content_format",
            ),
            (code::INTERNAL_SERVER_ERROR, "Internal Server Error", "internal_server_error"),
            (code::NOT_IMPLEMENTED, "Not Implemented", "not_implemented"),
            (code::BAD_GATEWAY, "Bad Gateway", "bad_gateway"),
            (code::SERVICE_UNAVAILABLE, "Service Unavailable", "service_unavailable"),
            (code::GATEWAY_TIMEOUT, "Gateway Timeout", "gateway_timeout"),
            (code::PROXYING_NOT_SUPPORTED, "Proxying Not Supported", "proxying_not_supported"),
        ];
        for &(value, name, symbol) in resp {
            let rfc = if value == code::CONTINUE {
                "RFC 7959"
            } else {
                "RFC 7252"
            };
            let dotted = crate::message::Code(value).dotted();
            let _ = self.responses.register(
                value as u16,
                &format!("{dotted} {name}"),
                Some(symbol),
                Some(rfc),
            );
        }

        let opts: &[(u16, &str, &str, &str)] = &[
            (option::IF_MATCH, "If-Match", "if_match", "RFC 7252"),
            (option::URI_HOST, "Uri-Host", "uri_host", "RFC 7252"),
            (option::ETAG, "ETag", "etag", "RFC 7252"),
            (option::IF_NONE_MATCH, "If-None-Match", "if_none_match", "RFC 7252"),
            (option::OBSERVE, "Observe", "observe", "RFC 7641"),
            (option::URI_PORT, "Uri-Port", "uri_port", "RFC 7252"),
            (option::LOCATION_PATH, "Location-Path", "location_path", "RFC 7252"),
            (option::URI_PATH, "Uri-Path", "uri_path", "RFC 7252"),
            (option::CONTENT_FORMAT, "Content-Format", "content_format", "RFC 7252"),
            (option::MAX_AGE, "Max-Age", "max_age", "RFC 7252"),
            (option::URI_QUERY, "Uri-Query", "uri_query", "RFC 7252"),
            (option::ACCEPT, "Accept", "accept", "RFC 7252"),
            (option::LOCATION_QUERY, "Location-Query", "location_query", "RFC 7252"),
            (option::BLOCK2, "Block2", "block2", "RFC 7959"),
            (option::BLOCK1, "Block1", "block1", "RFC 7959"),
            (option::SIZE2, "Size2", "size2", "RFC 7959"),
            (option::PROXY_URI, "Proxy-Uri", "proxy_uri", "RFC 7252"),
            (option::PROXY_SCHEME, "Proxy-Scheme", "proxy_scheme", "RFC 7252"),
            (option::SIZE1, "Size1", "size1", "RFC 7252"),
        ];
        for &(value, name, symbol, rfc) in opts {
            let _ = self.options.register(value, name, Some(symbol), Some(rfc));
        }

        let formats: &[(u16, &str, &str)] = &[
            (content_format::TEXT_PLAIN, "text/plain;charset=utf-8", "text"),
            (content_format::LINK_FORMAT, "application/link-format", "link_format"),
            (content_format::XML, "application/xml", "xml"),
            (content_format::OCTET_STREAM, "application/octet-stream", "octet_stream"),
            (content_format::EXI, "application/exi", "exi"),
            (content_format::JSON, "application/json", "json"),
            (content_format::CBOR, "application/cbor", "cbor"),
        ];
        for &(value, name, symbol) in formats {
            let _ = self
                .content_formats
                .register(value, name, Some(symbol), Some("RFC 7252"));
        }

        let sigs: &[(u8, &str, &str)] = &[
            (signaling::CSM, "7.01 CSM", "csm"),
            (signaling::PING, "7.02 Ping", "ping"),
            (signaling::PONG, "7.03 Pong", "pong"),
            (signaling::RELEASE, "7.04 Release", "release"),
            (signaling::ABORT, "7.05 Abort", "abort"),
        ];
        for &(value, name, symbol) in sigs {
            let _ = self
                .signaling
                .register(value as u16, name, Some(symbol), Some("RFC 8323"));
        }
        let _ = self.signaling.register(
            csm_option::MAX_MESSAGE_SIZE,
            "Max-Message-Size",
            Some("max_message_size"),
            Some("RFC 8323"),
        );
        let _ = self.signaling.register(
            csm_option::BLOCK_WISE_TRANSFER,
            "Block-Wise-Transfer",
            Some("block_wise_transfer"),
            Some("RFC 8323"),
        );
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::coap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let reg = Registry::new("test");
        reg.register(99, "Ninety-Nine", Some("nn"), Some("RFC 0")).unwrap();

        assert_eq!(reg.name_for(99).as_deref(), Some("Ninety-Nine"));
        assert_eq!(reg.value_for("Ninety-Nine"), Some(99));
        assert_eq!(reg.value_for("nn"), Some(99));
        assert_eq!(reg.rfc_for(99).as_deref(), Some("RFC 0"));
    }

    #[test]
    fn test_duplicate_idempotent_conflict_errors() {
        let reg = Registry::new("test");
        reg.register(7, "Seven", Some("seven"), None).unwrap();
        // Exact duplicate is fine.
        reg.register(7, "Seven", Some("seven"), None).unwrap();
        // Same value, different symbol is not.
        assert!(matches!(
            reg.register(7, "Seven", Some("vii"), None),
            Err(Error::RegistryConflict { value: 7, .. })
        ));
    }

    #[test]
    fn test_seeded_response_names() {
        let regs = Registries::coap();
        assert_eq!(regs.responses.name_for(69).as_deref(), Some("2.05 Content"));
        assert_eq!(regs.responses.name_for(132).as_deref(), Some("4.04 Not Found"));
        assert_eq!(regs.responses.value_for("not_found"), Some(132));
    }

    #[test]
    fn test_critical_option() {
        assert!(is_critical_option(option::URI_PATH)); // 11
        assert!(!is_critical_option(option::OBSERVE)); // 6
        assert!(is_critical_option(option::ACCEPT)); // 17
    }

    #[test]
    fn test_values_sorted_snapshot() {
        let regs = Registries::coap();
        let values = regs.methods.values();
        assert_eq!(values[0], method::GET as u16);
        assert!(values.windows(2).all(|w| w[0] < w[1]));
    }
}
