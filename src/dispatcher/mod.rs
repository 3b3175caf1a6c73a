//! # Dispatcher Module
//!
//! Drives one request from route lookup to a single response, or to an
//! explicit abandonment with no response at all.
//!
//! ## Request Flow
//!
//! 1. The route table resolves method and path to a route (or a 404/405)
//! 2. Path, query and body parameters are bound and type-checked (or a 400)
//! 3. The route's [`Middleware`] runs, then the handler is invoked;
//!    immediate and suspended handlers share one completion contract
//!    through the [`bridge`](Invocation). A route with a cache rate may
//!    answer from its last response instead
//! 4. A legal handler response is sent as-is; anything else becomes a
//!    [`Failure`](crate::error::Failure) rendered through the error registry
//! 5. WebSocket upgrade attempts are checked by the handshake guard; a
//!    rejected handshake bypasses the error registry and tears the
//!    connection down
//!
//! ## Error Handling
//!
//! - Handler panics are caught and become 500 failures
//! - Error handlers that fail produce a bare 500; the failure is logged
//! - Every failed dispatch is reported to the diagnostic sink
//!
//! ## Example
//!
//! ```rust
//! use view_dispatch::app::AppBuilder;
//! use view_dispatch::dispatcher::{immediate, CancelToken, Dispatcher, HandlerResponse, IncomingRequest};
//! use view_dispatch::router::RouteDecl;
//!
//! let mut builder = AppBuilder::new();
//! builder
//!     .route(RouteDecl::get("/hello", immediate(|_req| {
//!         Ok(HandlerResponse::ok(serde_json::json!({"hello": "world"})))
//!     })))
//!     .unwrap();
//! let dispatcher = Dispatcher::new(builder.build());
//!
//! let done = dispatcher.dispatch(IncomingRequest::get("/hello"), &CancelToken::new());
//! assert_eq!(done.disposition.status(), Some(200));
//! assert!(done.called);
//! ```

mod bridge;
mod context;
mod core;
mod handler;
mod middleware;

pub use bridge::{panic_message, CancelReason, CancelToken, Completion, Invocation, PendingCall, Watchdog};
pub use context::{DispatchState, Outcome, RequestContext, RequestId};
pub use core::{Dispatched, Dispatcher, Disposition, IncomingRequest, Rendered};
pub use handler::{
    immediate, suspended, validate_response, Handler, HandlerError, HandlerRequest, HandlerResponse,
    HandlerResult, HeaderVec, Immediate, Suspended, MAX_INLINE_HEADERS,
};
pub use middleware::{Middleware, RequireHeader, StaticHeader};
