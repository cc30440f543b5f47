//! CoRE Link Format discovery (RFC 6690)
//!
//! Renders the router's route metadata as an `application/link-format`
//! body for `GET /.well-known/core`: a comma-separated list of
//! `</path>;attr=value` entries, one per path, sorted for deterministic
//! output.

use std::collections::BTreeMap;

use crate::route::LinkAttrs;
use crate::router::Router;

/// Render every route's CoRE metadata as a link-format body.
pub fn link_format(router: &Router) -> String {
    // Merge per-method entries for the same path into one link.
    let mut by_path: BTreeMap<String, LinkAttrs> = BTreeMap::new();
    for entry in router.routes_snapshot() {
        let merged = by_path.entry(entry.path.clone()).or_default();
        merge(merged, &entry.options.attrs);
    }

    let links: Vec<String> = by_path
        .iter()
        .map(|(path, attrs)| render_link(path, attrs))
        .collect();
    links.join(",")
}

fn merge(into: &mut LinkAttrs, from: &LinkAttrs) {
    if into.rt.is_none() {
        into.rt = from.rt.clone();
    }
    if into.interface.is_none() {
        into.interface = from.interface.clone();
    }
    if into.ct.is_none() {
        into.ct = from.ct;
    }
    if into.sz.is_none() {
        into.sz = from.sz;
    }
    if into.title.is_none() {
        into.title = from.title.clone();
    }
    into.obs |= from.obs;
}

fn render_link(path: &str, attrs: &LinkAttrs) -> String {
    let mut link = format!("<{path}>");
    if let Some(rt) = &attrs.rt {
        link.push_str(&format!(";rt=\"{rt}\""));
    }
    if let Some(interface) = &attrs.interface {
        link.push_str(&format!(";if=\"{interface}\""));
    }
    if let Some(title) = &attrs.title {
        link.push_str(&format!(";title=\"{title}\""));
    }
    if let Some(ct) = attrs.ct {
        link.push_str(&format!(";ct={ct}"));
    }
    if let Some(sz) = attrs.sz {
        link.push_str(&format!(";sz={sz}"));
    }
    if attrs.obs {
        link.push_str(";obs");
    }
    link
}
