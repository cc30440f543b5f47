//! Middleware chain
//!
//! An ordered list of request→response transformers wrapping the terminal
//! router dispatch. Each middleware may short-circuit by returning without
//! calling [`Next::run`]. The chain composes right-to-left: the first
//! middleware pushed is the outermost.

use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use takagi_core::{Inbound, Outbound};

use crate::router::Router;

/// One request/response transformer.
pub trait Middleware: Send + Sync {
    fn call(&self, request: Inbound, next: Next<'_>) -> Outbound;
}

/// Continuation into the rest of the chain.
pub struct Next<'a> {
    stack: &'a [Arc<dyn Middleware>],
    router: &'a Router,
}

impl Next<'_> {
    /// Run the remaining middleware, ending in the router dispatch.
    pub fn run(self, request: Inbound) -> Outbound {
        match self.stack.split_first() {
            Some((head, rest)) => head.call(
                request,
                Next {
                    stack: rest,
                    router: self.router,
                },
            ),
            None => self.router.dispatch(request),
        }
    }
}

/// The composed chain shared by every transport.
pub struct MiddlewareChain {
    stack: Vec<Arc<dyn Middleware>>,
    router: Arc<Router>,
}

impl MiddlewareChain {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            stack: Vec::new(),
            router,
        }
    }

    /// Append a middleware; it wraps everything pushed after it.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.stack.push(middleware);
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Run a request through the chain down to the router.
    pub fn handle(&self, request: Inbound) -> Outbound {
        Next {
            stack: &self.stack,
            router: &self.router,
        }
        .run(request)
    }
}

/// Logs one line per request: method, path, response code, elapsed time.
pub struct RequestLogger;

impl Middleware for RequestLogger {
    fn call(&self, request: Inbound, next: Next<'_>) -> Outbound {
        let method = request.method();
        let path = request.path();
        let started = Instant::now();

        let response = next.run(request);

        info!(
            "{} {} -> {} ({:?})",
            method,
            path,
            response.code(),
            started.elapsed()
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use takagi_core::message::{code, method};
    use takagi_core::{ContentCodecs, Message, MessageType};

    fn request(method_code: u8, path: &str) -> Inbound {
        let mut msg = Message::request(MessageType::Con, method_code).with_message_id(1);
        msg.set_path(path);
        Inbound::new(msg, None)
    }

    #[test]
    fn test_chain_reaches_router() {
        let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
        let chain = MiddlewareChain::new(router);

        let out = chain.handle(request(method::GET, "/ping"));
        assert_eq!(out.code().0, code::CONTENT);
    }

    #[test]
    fn test_missing_route_is_404() {
        let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
        let chain = MiddlewareChain::new(router);

        let out = chain.handle(request(method::GET, "/missing"));
        assert_eq!(out.code().0, code::NOT_FOUND);
    }

    #[test]
    fn test_middleware_order_and_short_circuit() {
        struct Tagger {
            calls: Arc<AtomicUsize>,
        }
        impl Middleware for Tagger {
            fn call(&self, request: Inbound, next: Next<'_>) -> Outbound {
                self.calls.fetch_add(1, Ordering::SeqCst);
                next.run(request)
            }
        }

        struct Gate;
        impl Middleware for Gate {
            fn call(&self, request: Inbound, _next: Next<'_>) -> Outbound {
                // Short-circuit without invoking the rest of the chain.
                Outbound::for_request(&request).with_code(code::FORBIDDEN)
            }
        }

        let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut chain = MiddlewareChain::new(router);
        chain.push(Arc::new(Tagger { calls: calls.clone() }));
        chain.push(Arc::new(Gate));

        let out = chain.handle(request(method::GET, "/ping"));
        assert_eq!(out.code().0, code::FORBIDDEN);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_panic_becomes_500() {
        let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
        router.get("/explode", |_| panic!("boom")).unwrap();
        let chain = MiddlewareChain::new(router);

        let out = chain.handle(request(method::GET, "/explode"));
        assert_eq!(out.code().0, code::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_slice(out.payload()).unwrap();
        assert_eq!(body, json!({ "error": "Internal Server Error" }));
    }
}
