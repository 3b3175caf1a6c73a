//! Handler-facing request and response types and the [`Handler`] trait.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::{HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;

use super::bridge::Invocation;
use super::context::RequestId;
use crate::router::ParamVec;

/// Maximum inline headers before heap allocation.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Header storage for requests and responses. Names are kept as sent;
/// lookups are case-insensitive.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Request data handed to a route handler.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    pub request_id: RequestId,
    pub method: Method,
    /// Request path as received
    pub path: String,
    /// Pattern of the matched route (e.g. `/items/{id:int}`)
    pub pattern: Arc<str>,
    /// Bound parameters in declaration order: path captures first, then
    /// query and body parameters
    pub params: ParamVec,
    /// Raw query pairs, in request order
    pub query: Vec<(String, String)>,
    pub headers: HeaderVec,
    pub body: Option<Value>,
}

impl HandlerRequest {
    /// Bound parameter by name.
    #[inline]
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v)
    }

    #[must_use]
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.param(name).and_then(Value::as_str)
    }

    #[must_use]
    pub fn param_i64(&self, name: &str) -> Option<i64> {
        self.param(name).and_then(Value::as_i64)
    }

    /// Raw query value. Last write wins for repeated keys.
    #[inline]
    #[must_use]
    pub fn get_query(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .rfind(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a header by name (case-insensitive per RFC 7230)
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Bound parameters as a JSON-friendly map. Allocates.
    #[must_use]
    pub fn params_map(&self) -> HashMap<String, Value> {
        self.params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}

/// Response produced by a route handler or an error handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerResponse {
    pub status: u16,
    #[serde(skip_serializing)]
    pub headers: HeaderVec,
    /// `Value::Null` means an empty body
    pub body: Value,
}

impl HandlerResponse {
    #[must_use]
    pub fn new(status: u16, headers: HeaderVec, body: Value) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// JSON response with a `content-type` header.
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), "application/json".to_string()));
        Self::new(status, headers, body)
    }

    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((
            Arc::from("content-type"),
            "text/plain; charset=utf-8".to_string(),
        ));
        Self::new(status, headers, Value::String(body.into()))
    }

    /// Response with no body.
    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self::new(status, HeaderVec::new(), Value::Null)
    }

    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": message }))
    }

    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or replace a header.
    ///
    /// The HTTP transport keeps every distinct `name: value` line it writes
    /// for the life of the process, up to
    /// [`MAX_HEADER_LINES`](crate::server::response::MAX_HEADER_LINES). Once
    /// that table is full, headers with new lines are dropped from the
    /// response. Avoid per-request values (ids, timestamps, ETags) in
    /// headers of long-running servers.
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    /// Builder form of [`set_header`](Self::set_header); the same header
    /// line limit applies.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value.into());
        self
    }
}

/// Check that a handler result is something the transport can write.
///
/// # Errors
///
/// A reason string when the status is outside 200-599 or a header name or
/// value is not legal HTTP.
pub fn validate_response(resp: &HandlerResponse) -> Result<(), String> {
    if !(200..=599).contains(&resp.status) {
        return Err(format!("status {} is not a valid response status", resp.status));
    }
    for (name, value) in &resp.headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(format!("invalid header name {name:?}"));
        }
        if HeaderValue::from_str(value).is_err() {
            return Err(format!("invalid value for header {name:?}"));
        }
    }
    Ok(())
}

/// Error returned by handlers.
///
/// Any `std::error::Error` converts into [`HandlerError::Other`] through `?`
/// and becomes an unclassified 500. Use [`HandlerError::with_status`] to pick
/// the status explicitly.
pub enum HandlerError {
    /// Framework status error; honoured when `status` is in 400-599
    Status { status: u16, detail: String },
    /// The handler panicked
    Panicked(String),
    Other(anyhow::Error),
}

impl HandlerError {
    #[must_use]
    pub fn with_status(status: u16, detail: impl Into<String>) -> Self {
        HandlerError::Status {
            status,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::with_status(400, detail)
    }

    #[must_use]
    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::with_status(403, detail)
    }

    #[must_use]
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::with_status(404, detail)
    }

    #[must_use]
    pub fn other(err: anyhow::Error) -> Self {
        HandlerError::Other(err)
    }

    /// Status the failure classifies to.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            HandlerError::Status { status, .. } if (400..=599).contains(status) => *status,
            _ => 500,
        }
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        HandlerError::Other(anyhow::Error::new(err))
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Status { status, detail } => write!(f, "status {status}: {detail}"),
            HandlerError::Panicked(msg) => write!(f, "handler panicked: {msg}"),
            HandlerError::Other(err) => write!(f, "{err:#}"),
        }
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Status { status, detail } => f
                .debug_struct("Status")
                .field("status", status)
                .field("detail", detail)
                .finish(),
            HandlerError::Panicked(msg) => f.debug_tuple("Panicked").field(msg).finish(),
            HandlerError::Other(err) => f.debug_tuple("Other").field(err).finish(),
        }
    }
}

/// Result of a handler call.
pub type HandlerResult = Result<HandlerResponse, HandlerError>;

/// A route handler.
///
/// `invoke` either completes on the spot ([`Invocation::Immediate`]) or hands
/// back a pending computation ([`Invocation::Pending`]); the dispatcher drives
/// both the same way.
pub trait Handler: Send + Sync + 'static {
    fn invoke(&self, req: HandlerRequest) -> Invocation;

    /// Declared input names, in order. When present, registration checks
    /// them against the route's parameters.
    fn inputs(&self) -> Option<&[String]> {
        None
    }
}

/// Handler that runs synchronously on the dispatching coroutine.
pub struct Immediate<F> {
    f: F,
    inputs: Option<Vec<String>>,
}

/// Wrap a function as an [`Immediate`] handler.
pub fn immediate<F>(f: F) -> Immediate<F>
where
    F: Fn(HandlerRequest) -> HandlerResult + Send + Sync + 'static,
{
    Immediate { f, inputs: None }
}

impl<F> Immediate<F> {
    #[must_use]
    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = Some(inputs.iter().map(|s| (*s).to_string()).collect());
        self
    }
}

impl<F> Handler for Immediate<F>
where
    F: Fn(HandlerRequest) -> HandlerResult + Send + Sync + 'static,
{
    fn invoke(&self, req: HandlerRequest) -> Invocation {
        Invocation::Immediate((self.f)(req))
    }

    fn inputs(&self) -> Option<&[String]> {
        self.inputs.as_deref()
    }
}

/// Handler that runs on its own coroutine and may block cooperatively
/// (sleep, channel receive, network I/O through `may`).
pub struct Suspended<F> {
    f: Arc<F>,
    inputs: Option<Vec<String>>,
}

/// Wrap a function as a [`Suspended`] handler.
pub fn suspended<F>(f: F) -> Suspended<F>
where
    F: Fn(HandlerRequest) -> HandlerResult + Send + Sync + 'static,
{
    Suspended {
        f: Arc::new(f),
        inputs: None,
    }
}

impl<F> Suspended<F> {
    #[must_use]
    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = Some(inputs.iter().map(|s| (*s).to_string()).collect());
        self
    }
}

impl<F> Handler for Suspended<F>
where
    F: Fn(HandlerRequest) -> HandlerResult + Send + Sync + 'static,
{
    fn invoke(&self, req: HandlerRequest) -> Invocation {
        let f = Arc::clone(&self.f);
        Invocation::suspend(move || f(req))
    }

    fn inputs(&self) -> Option<&[String]> {
        self.inputs.as_deref()
    }
}
