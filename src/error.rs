//! Error taxonomy for registration and request dispatch.
//!
//! Two families live here:
//!
//! - **Load-time errors** ([`RegistrationError`]) returned while routes and
//!   error handlers are being registered. They never occur while serving.
//! - **Request-time failures** ([`Failure`]) produced by the dispatcher. Every
//!   failure carries a status code and a [`FailureKind`] and is always turned
//!   into a response; none escapes to the transport.

use std::fmt;
use std::sync::Arc;

use http::Method;
use serde::Serialize;
use thiserror::Error;

use crate::dispatcher::{HandlerError, HeaderVec};
use crate::router::ParamSource;

/// Classification of a failed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No route pattern matched the path (404)
    NoRouteMatch,
    /// A route matched the path but not the method (405)
    MethodNotAllowed,
    /// A bound parameter failed conversion or was missing (400)
    ParameterValidation,
    /// The handler returned an error or panicked
    HandlerRaised,
    /// The handler produced a response that is not a legal response (500)
    MalformedHandlerResult,
    /// WebSocket upgrade negotiation failed
    Handshake,
    /// A user error handler itself failed (bare 500)
    ErrorHandlerFailure,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            FailureKind::NoRouteMatch => "no_route_match",
            FailureKind::MethodNotAllowed => "method_not_allowed",
            FailureKind::ParameterValidation => "parameter_validation",
            FailureKind::HandlerRaised => "handler_raised",
            FailureKind::MalformedHandlerResult => "malformed_handler_result",
            FailureKind::Handshake => "handshake",
            FailureKind::ErrorHandlerFailure => "error_handler_failure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request-level failure waiting to be rendered by an error handler.
///
/// `detail` is internal text for logs and dev-mode bodies only; it is never
/// sent to clients unless the application runs with `dev = true`.
#[derive(Debug, Clone, Error)]
#[error("{kind} ({status}): {detail}")]
pub struct Failure {
    pub status: u16,
    pub kind: FailureKind,
    pub detail: String,
    /// Headers the response must carry regardless of the error handler (e.g. `Allow`)
    pub headers: HeaderVec,
}

impl Failure {
    #[must_use]
    pub fn new(status: u16, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            detail: detail.into(),
            headers: HeaderVec::new(),
        }
    }

    #[must_use]
    pub fn not_found(method: &Method, path: &str) -> Self {
        Self::new(
            404,
            FailureKind::NoRouteMatch,
            format!("no route for {method} {path}"),
        )
    }

    /// 405 with an `Allow` header listing the methods the path does accept.
    #[must_use]
    pub fn method_not_allowed(method: &Method, path: &str, allowed: &[Method]) -> Self {
        let allow = allowed
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let mut failure = Self::new(
            405,
            FailureKind::MethodNotAllowed,
            format!("{method} not allowed on {path} (allowed: {allow})"),
        );
        failure.headers.push((Arc::from("allow"), allow));
        failure
    }

    #[must_use]
    pub fn parameter(err: &ParameterError) -> Self {
        Self::new(400, FailureKind::ParameterValidation, err.to_string())
    }

    /// Status comes from the error when it is a framework status error in
    /// 400-599; everything else is a 500.
    #[must_use]
    pub fn from_handler_error(err: &HandlerError) -> Self {
        Self::new(err.status(), FailureKind::HandlerRaised, err.to_string())
    }

    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::new(500, FailureKind::MalformedHandlerResult, reason)
    }

    /// Error handlers could not render `original`; the bare 500 went out.
    #[must_use]
    pub fn error_handler_failure(original: &Failure, reason: impl fmt::Display) -> Self {
        Self::new(
            500,
            FailureKind::ErrorHandlerFailure,
            format!("{} {}: {}; error handler failed: {reason}", original.kind, original.status, original.detail),
        )
    }

    /// The transport could not decode the request.
    #[must_use]
    pub fn malformed_request(detail: impl Into<String>) -> Self {
        Self::new(400, FailureKind::ParameterValidation, detail)
    }
}

/// Failure to bind a request value to a declared route parameter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    #[error("{location} parameter `{name}` expected {expected}, got {value:?}")]
    Invalid {
        name: String,
        location: ParamSource,
        /// Accepted types, e.g. `int | str`
        expected: String,
        value: String,
    },
    #[error("missing required {location} parameter `{name}`")]
    Missing { name: String, location: ParamSource },
    #[error("request body must be a JSON object to bind `{name}`")]
    BodyNotObject { name: String },
}

/// Errors raised while building an application. Never produced while serving.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("route `{pattern}` has an unsupported type `{type_name}` for parameter `{param}`")]
    UnsupportedType {
        pattern: String,
        param: String,
        type_name: String,
    },
    #[error("route `{pattern}` declares parameter `{param}` more than once")]
    DuplicateParameter { pattern: String, param: String },
    #[error("route `{pattern}` declares path parameter `{param}` with no matching capture")]
    UnboundPathParameter { pattern: String, param: String },
    #[error("route `{pattern}` parameters {declared:?} do not match handler inputs {expected:?}")]
    InputMismatch {
        pattern: String,
        declared: Vec<String>,
        expected: Vec<String>,
    },
    #[error("route `{pattern}` has no methods")]
    NoMethods { pattern: String },
    #[error("route `{pattern}` conflicts with `{existing}` for {method}")]
    Conflict {
        pattern: String,
        existing: String,
        method: Method,
    },
    #[error("error handlers can only be registered for 400-599, got {0}")]
    InvalidErrorStatus(u16),
    #[error("no route registered for pattern `{0}`")]
    UnknownRoute(String),
}
