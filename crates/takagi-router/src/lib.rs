//! Takagi Router
//!
//! The request/response pipeline of the framework:
//! - Route table with static and `:param` path matching ([`Router`])
//! - Ordered middleware chain wrapping the terminal dispatch
//!   ([`MiddlewareChain`])
//! - Content-format negotiation and response construction ([`Context`])
//! - Server-push subscriptions with sequence numbers and delta filtering
//!   ([`ObserveRegistry`])
//! - `/.well-known/core` link-format discovery ([`discovery`])

pub mod discovery;
pub mod error;
pub mod middleware;
pub mod observe;
pub mod response;
pub mod route;
pub mod router;

pub use error::{Result, RouterError};
pub use middleware::{Middleware, MiddlewareChain, Next, RequestLogger};
pub use observe::{NotificationSink, ObserveMiddleware, ObserveRegistry, Subscription};
pub use response::{halt, Abort, Context, HandlerResult};
pub use route::{normalize_path, LinkAttrs, Params, RouteEntry, RouteOptions};
pub use router::Router;

/// Synthetic method key observable routes register under. Never on the wire.
pub const OBSERVE_METHOD: &str = "OBSERVE";
