//! Transport adapter over `may_minihttp`.
//!
//! Converts raw requests into [`IncomingRequest`](crate::dispatcher::IncomingRequest)s,
//! runs them through the [`Dispatcher`](crate::dispatcher::Dispatcher), and
//! writes the resulting disposition back to the connection.

pub mod http_server;
pub mod request;
pub mod response;
pub mod service;

pub use http_server::{HttpServer, ServerHandle};
pub use request::{parse_query_params, parse_request, RejectedRequest};
pub use response::write_response;
pub use service::AppService;
