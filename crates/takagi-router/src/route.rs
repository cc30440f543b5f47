//! Route entries and path pattern matching
//!
//! Routes are keyed by (method, path pattern). Pattern segments starting
//! with `:` capture the matching request segment into a named parameter.
//! Matching is segment-by-segment; exact patterns win over parametric ones
//! and ties between parametric patterns break lexicographically so
//! dispatch is deterministic regardless of registration order.

use std::collections::HashMap;
use std::sync::Arc;

use crate::response::{Context, HandlerResult};

/// Captured path parameters, by name.
pub type Params = HashMap<String, String>;

/// A route handler.
pub type Handler = Arc<dyn Fn(&Context) -> HandlerResult + Send + Sync>;

/// CoRE Link Format attributes attached to a route (RFC 6690).
#[derive(Debug, Clone, Default)]
pub struct LinkAttrs {
    /// Resource type (`rt`)
    pub rt: Option<String>,
    /// Interface description (`if`)
    pub interface: Option<String>,
    /// Content format hint (`ct`)
    pub ct: Option<u16>,
    /// Observable flag (`obs`)
    pub obs: bool,
    /// Maximum size estimate (`sz`)
    pub sz: Option<u64>,
    /// Human-readable title
    pub title: Option<String>,
}

/// Per-route configuration beyond the handler itself.
#[derive(Clone)]
pub struct RouteOptions {
    pub attrs: LinkAttrs,
    /// Content formats this route may respond with, in preference order.
    pub allowed_formats: Vec<u16>,
    /// Format forced regardless of the request's Accept option.
    pub force_format: Option<u16>,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            attrs: LinkAttrs::default(),
            allowed_formats: vec![takagi_core::message::content_format::JSON],
            force_format: None,
        }
    }
}

/// One registered route.
#[derive(Clone)]
pub struct RouteEntry {
    pub method: String,
    pub path: String,
    pub options: RouteOptions,
    pub handler: Handler,
}

/// Collapse duplicate and trailing slashes: `/a//b/` becomes `/a/b`,
/// the root stays `/`.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::new();
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        normalized.push('/');
        normalized.push_str(seg);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Match a normalized request path against a pattern, capturing `:name`
/// segments. Returns `None` when the pattern does not match.
pub fn match_pattern(pattern: &str, path: &str) -> Option<Params> {
    let pattern_segs: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if pattern_segs.len() != path_segs.len() {
        return None;
    }

    let mut params = Params::new();
    for (pat, seg) in pattern_segs.iter().zip(path_segs.iter()) {
        if let Some(name) = pat.strip_prefix(':') {
            params.insert(name.to_string(), seg.to_string());
        } else if pat != seg {
            return None;
        }
    }
    Some(params)
}

/// Whether a pattern contains `:param` segments.
pub fn is_parametric(pattern: &str) -> bool {
    pattern.split('/').any(|s| s.starts_with(':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_path("/a//b"), "/a/b");
        assert_eq!(normalize_path("/a/b/"), "/a/b");
        assert_eq!(normalize_path("a/b"), "/a/b");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn test_static_match() {
        assert_eq!(match_pattern("/x", "/x"), Some(Params::new()));
        assert_eq!(match_pattern("/x", "/y"), None);
        assert_eq!(match_pattern("/x", "/x/y"), None);
    }

    #[test]
    fn test_param_capture() {
        let params = match_pattern("/users/:id/posts/:pid", "/users/7/posts/42").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("7"));
        assert_eq!(params.get("pid").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_param_segment_count_must_match() {
        assert!(match_pattern("/users/:id", "/users").is_none());
        assert!(match_pattern("/users/:id", "/users/7/posts").is_none());
    }

    #[test]
    fn test_is_parametric() {
        assert!(is_parametric("/users/:id"));
        assert!(!is_parametric("/users/all"));
    }
}
