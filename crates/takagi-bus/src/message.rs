//! Bus message envelope and distribution scopes

use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

/// Distribution scope for a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// This instance only.
    #[default]
    Local,
    /// Reserved for future cluster distribution.
    Cluster,
    /// Local delivery plus the external CoAP observer bridge.
    Global,
}

impl Scope {
    /// Parse a scope name. Unknown scopes normalize to LOCAL.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "CLUSTER" => Scope::Cluster,
            "GLOBAL" => Scope::Global,
            _ => Scope::Local,
        }
    }
}

/// One message traveling on the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub address: String,
    pub body: Value,
    pub headers: HashMap<String, String>,
    pub scope: Scope,
    /// Address a consumer should reply to, for request-reply sends.
    pub reply_to: Option<String>,
    pub sent_at: Instant,
}

impl BusMessage {
    pub fn new(address: impl Into<String>, body: Value) -> Self {
        Self {
            address: address.into(),
            body,
            headers: HashMap::new(),
            scope: Scope::Local,
            reply_to: None,
            sent_at: Instant::now(),
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }
}

/// Match a dotted address against a pattern. `*` matches exactly one
/// segment; segment counts must agree.
pub fn address_matches(pattern: &str, address: &str) -> bool {
    let pat: Vec<&str> = pattern.split('.').collect();
    let addr: Vec<&str> = address.split('.').collect();
    if pat.len() != addr.len() {
        return false;
    }
    pat.iter()
        .zip(addr.iter())
        .all(|(p, a)| *p == "*" || p == a)
}
