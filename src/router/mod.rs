//! # Router Module
//!
//! Path pattern compilation, route declarations, and the route table used by
//! the dispatcher to resolve a request to a handler.
//!
//! ## Architecture
//!
//! Routing runs in two phases:
//!
//! 1. **Compilation** (load phase): a [`RouteDecl`] is compiled into an
//!    immutable [`Route`]. The pattern is split into literal segments and
//!    typed captures, parameters are checked against the handler's declared
//!    inputs, and ambiguous registrations are rejected.
//!
//! 2. **Matching** (serving phase): [`RouteTable::match_route`] walks the
//!    routes in registration order and returns a [`Lookup`]. Path captures
//!    are percent-decoded and converted to their declared types on the way
//!    out; a conversion failure is a [`ParameterError`](crate::error::ParameterError).
//!
//! ## Example
//!
//! ```rust
//! use http::Method;
//! use view_dispatch::dispatcher::{immediate, HandlerResponse};
//! use view_dispatch::router::{Lookup, RouteDecl, RouteTable};
//!
//! let mut table = RouteTable::new();
//! table
//!     .register(RouteDecl::get("/items/{id: int}", immediate(|_req| {
//!         Ok(HandlerResponse::ok(serde_json::json!({"ok": true})))
//!     })))
//!     .unwrap();
//!
//! match table.match_route(&Method::GET, "/items/42").unwrap() {
//!     Lookup::Matched(m) => assert_eq!(m.get_path_param("id"), Some(&serde_json::json!(42))),
//!     other => panic!("unexpected lookup: {other:?}"),
//! }
//! ```

mod cache;
mod core;
mod pattern;
mod route;

use std::sync::Arc;

use serde_json::Value;
use smallvec::SmallVec;

/// Maximum number of bound parameters before heap allocation.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Bound parameters in declaration order. Names are shared with the route.
pub type ParamVec = SmallVec<[(Arc<str>, Value); MAX_INLINE_PARAMS]>;

pub use cache::ResponseCache;
pub use core::{Lookup, MethodVec, RouteMatch, RouteTable};
pub use pattern::{CaptureVec, PathPattern, Segment};
pub use route::{ParamSource, ParamSpec, ParamType, Route, RouteDecl, WebSocketSpec};
