//! Route table and terminal dispatch
//!
//! The router owns the (method, path) route map. Lookup prefers an exact
//! path key, then scans parametric patterns in lexicographic order so
//! dispatch stays deterministic when several patterns match.

use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tracing::{debug, error};

use takagi_core::{ContentCodecs, HookSink, Inbound, Outbound};

use crate::discovery;
use crate::error::{Result, RouterError};
use crate::response::{internal_error_response, not_found_response, Abort, Context, HandlerResult};
use crate::route::{
    is_parametric, match_pattern, normalize_path, Handler, LinkAttrs, Params, RouteEntry,
    RouteOptions,
};
use crate::OBSERVE_METHOD;

use takagi_core::message::content_format;

type RouteKey = (String, String);

/// Route table plus the terminal dispatch step of the middleware chain.
pub struct Router {
    routes: RwLock<HashMap<RouteKey, Arc<RouteEntry>>>,
    codecs: Arc<ContentCodecs>,
    hooks: RwLock<Option<Arc<dyn HookSink>>>,
}

impl Router {
    /// Router with the built-in routes: `GET /.well-known/core`,
    /// `GET /ping`, and `POST /echo`.
    pub fn new(codecs: Arc<ContentCodecs>) -> Arc<Self> {
        let router = Arc::new(Self::bare(codecs));
        router.register_builtins();
        router
    }

    /// Router without built-in routes.
    pub fn bare(codecs: Arc<ContentCodecs>) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            codecs,
            hooks: RwLock::new(None),
        }
    }

    pub fn codecs(&self) -> &Arc<ContentCodecs> {
        &self.codecs
    }

    pub fn set_hook_sink(&self, sink: Arc<dyn HookSink>) {
        *self.hooks.write() = Some(sink);
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a route. (method, path) must be unique within the router.
    pub fn route<F>(&self, method: &str, path: &str, options: RouteOptions, handler: F) -> Result<()>
    where
        F: Fn(&Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(method, path, options, Arc::new(handler))
    }

    fn insert(&self, method: &str, path: &str, options: RouteOptions, handler: Handler) -> Result<()> {
        let path = normalize_path(path);
        let key = (method.to_string(), path.clone());

        {
            let mut routes = self.routes.write();
            if routes.contains_key(&key) {
                return Err(RouterError::DuplicateRoute {
                    method: method.to_string(),
                    path,
                });
            }
            routes.insert(
                key,
                Arc::new(RouteEntry {
                    method: method.to_string(),
                    path: path.clone(),
                    options,
                    handler,
                }),
            );
        }

        debug!("route added: {} {}", method, path);
        if let Some(hooks) = self.hooks.read().as_ref() {
            hooks.emit(
                "router_route_added",
                json!({ "method": method, "path": path }),
            );
        }
        Ok(())
    }

    pub fn get<F>(&self, path: &str, handler: F) -> Result<()>
    where
        F: Fn(&Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route("GET", path, RouteOptions::default(), handler)
    }

    pub fn post<F>(&self, path: &str, handler: F) -> Result<()>
    where
        F: Fn(&Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route("POST", path, RouteOptions::default(), handler)
    }

    pub fn put<F>(&self, path: &str, handler: F) -> Result<()>
    where
        F: Fn(&Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route("PUT", path, RouteOptions::default(), handler)
    }

    pub fn delete<F>(&self, path: &str, handler: F) -> Result<()>
    where
        F: Fn(&Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route("DELETE", path, RouteOptions::default(), handler)
    }

    /// Register an observable resource. The handler serves the initial
    /// GET; notifications go through the observe registry.
    pub fn observable<F>(&self, path: &str, handler: F) -> Result<()>
    where
        F: Fn(&Context) -> HandlerResult + Send + Sync + 'static,
    {
        let options = RouteOptions {
            attrs: LinkAttrs {
                rt: Some("core#observable".to_string()),
                interface: Some("takagi.observe".to_string()),
                obs: true,
                ..LinkAttrs::default()
            },
            ..RouteOptions::default()
        };
        self.route(OBSERVE_METHOD, path, options, handler)
    }

    // =========================================================================
    // Lookup and dispatch
    // =========================================================================

    /// Find the route for (method, path): exact key first, then the
    /// lexicographically first matching parametric pattern.
    pub fn lookup(&self, method: &str, path: &str) -> Option<(Arc<RouteEntry>, Params)> {
        let path = normalize_path(path);
        let routes = self.routes.read();

        if let Some(entry) = routes.get(&(method.to_string(), path.clone())) {
            return Some((entry.clone(), Params::new()));
        }

        let mut candidates: Vec<&Arc<RouteEntry>> = routes
            .iter()
            .filter(|((m, p), _)| m == method && is_parametric(p))
            .map(|(_, entry)| entry)
            .collect();
        candidates.sort_by(|a, b| a.path.cmp(&b.path));

        for entry in candidates {
            if let Some(params) = match_pattern(&entry.path, &path) {
                return Some((entry.clone(), params));
            }
        }
        None
    }

    /// Snapshot of every registered route, sorted by path then method.
    pub fn routes_snapshot(&self) -> Vec<Arc<RouteEntry>> {
        let mut entries: Vec<Arc<RouteEntry>> = self.routes.read().values().cloned().collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.method.cmp(&b.method)));
        entries
    }

    /// Terminal dispatch: route lookup, handler invocation, and error
    /// conversion. Missing routes produce `4.04 Not Found`; handler
    /// failures produce `5.00`.
    pub fn dispatch(&self, request: Inbound) -> Outbound {
        let path = normalize_path(&request.path());
        match self.lookup(request.method(), &path) {
            Some((entry, params)) => self.dispatch_entry(&entry, request, params),
            None => not_found_response(&request, &self.codecs),
        }
    }

    /// Invoke a specific route entry's handler for a request.
    pub fn dispatch_entry(
        &self,
        entry: &RouteEntry,
        request: Inbound,
        params: Params,
    ) -> Outbound {
        let ctx = Context::new(
            request,
            params,
            self.codecs.clone(),
            entry.options.allowed_formats.clone(),
            entry.options.force_format,
        );

        let outcome =
            std::panic::catch_unwind(AssertUnwindSafe(|| (entry.handler)(&ctx)));

        match outcome {
            Ok(Ok(out)) => out,
            Ok(Err(Abort::Halt(out))) => out,
            Ok(Err(Abort::Error(e))) => {
                error!("handler error on {} {}: {}", entry.method, entry.path, e);
                internal_error_response(ctx.request(), &self.codecs)
            }
            Err(_) => {
                error!("handler panicked on {} {}", entry.method, entry.path);
                internal_error_response(ctx.request(), &self.codecs)
            }
        }
    }

    // =========================================================================
    // Built-ins
    // =========================================================================

    fn register_builtins(self: &Arc<Self>) {
        let _ = self.get("/ping", |ctx| ctx.json(json!({ "message": "Pong" })));

        let _ = self.post("/echo", |ctx| {
            let body = ctx.request().json().unwrap_or(json!({}));
            let message = body.get("message").cloned().unwrap_or(serde_json::Value::Null);
            ctx.json(json!({ "echo": message }))
        });

        let weak: Weak<Router> = Arc::downgrade(self);
        let options = RouteOptions {
            attrs: LinkAttrs {
                rt: Some("core.discovery".to_string()),
                ct: Some(content_format::LINK_FORMAT),
                ..LinkAttrs::default()
            },
            allowed_formats: vec![content_format::LINK_FORMAT],
            force_format: Some(content_format::LINK_FORMAT),
        };
        let _ = self.route("GET", "/.well-known/core", options, move |ctx| {
            let Some(router) = weak.upgrade() else {
                return ctx.internal_server_error();
            };
            ctx.link_format(discovery::link_format(&router))
        });
    }
}
