//! # view-dispatch
//!
//! **view-dispatch** routes HTTP requests to view handlers and turns every
//! failure along the way into exactly one response, rendered by
//! user-supplied error handlers keyed by status code.
//!
//! ## Overview
//!
//! An application is declared once (routes, typed parameters, error
//! handlers), frozen into an `Arc<Application>`, and then served on the
//! `may` coroutine runtime through `may_minihttp`. Handlers are either
//! immediate or suspended; suspended handlers run in their own coroutine
//! and can be cancelled, in which case nothing is written.
//!
//! ## Architecture
//!
//! - **[`router`]** - Path patterns with typed captures, first-match route table
//! - **[`dispatcher`]** - Request lifecycle, handler invocation, cancellation bridge
//! - **[`status`]** - Status classification into the error tables
//! - **[`registry`]** - Error handler tables, per application and per route
//! - **[`handshake`]** - WebSocket upgrade validation
//! - **[`app`]** - Load-phase builder and the frozen application
//! - **[`server`]** - `may_minihttp` transport adapter
//! - **[`config`]**, **[`logging`]**, **[`runtime_config`]** - Configuration and tracing setup
//! - **[`diagnostics`]** - Per-failure route log entries
//!
//! ### Request Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Server as server::AppService
//!     participant Dispatcher
//!     participant Router as router::RouteTable
//!     participant Handler
//!     participant Registry as registry::ErrorRegistry
//!
//!     Client->>Server: HTTP request
//!     Server->>Dispatcher: dispatch(IncomingRequest)
//!     Dispatcher->>Router: match_route(method, path)
//!     alt matched and parameters bound
//!         Dispatcher->>Handler: invoke(HandlerRequest)
//!         Handler-->>Dispatcher: HandlerResult
//!     end
//!     opt failure
//!         Dispatcher->>Registry: resolve(route, status)
//!         Registry-->>Dispatcher: error handler or default
//!     end
//!     Dispatcher-->>Server: Disposition
//!     Server-->>Client: HTTP response (or nothing when abandoned)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use serde_json::json;
//! use view_dispatch::app::{AppBuilder, ErrorTarget};
//! use view_dispatch::dispatcher::{immediate, CancelToken, Dispatcher, HandlerError, HandlerResponse, IncomingRequest};
//! use view_dispatch::registry::{error_handler, ErrorKey};
//! use view_dispatch::router::RouteDecl;
//!
//! let mut builder = AppBuilder::new();
//! builder
//!     .route(RouteDecl::get("/admin", immediate(|_req| Err(HandlerError::forbidden("no")))))
//!     .unwrap();
//! builder
//!     .load_errors(
//!         ErrorTarget::App,
//!         [(ErrorKey::Status(403), error_handler(|_ctx| {
//!             Ok(HandlerResponse::json(403, json!({"error": "go away"})))
//!         }))],
//!     )
//!     .unwrap();
//!
//! let dispatcher = Dispatcher::new(builder.build());
//! let done = dispatcher.dispatch(IncomingRequest::get("/admin"), &CancelToken::new());
//! let resp = done.disposition.response().unwrap();
//! assert_eq!(resp.status, 403);
//! assert_eq!(resp.body["error"], "go away");
//! ```

pub mod app;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod logging;
pub mod registry;
pub mod router;
pub mod runtime_config;
pub mod server;
pub mod status;

pub use app::{AppBuilder, Application, ErrorTarget};
pub use error::{Failure, FailureKind, ParameterError, RegistrationError};
