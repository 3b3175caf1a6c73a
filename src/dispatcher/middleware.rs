use std::time::Duration;

use super::handler::{HandlerRequest, HandlerResponse};

/// Per-route hook around handler invocation.
///
/// Middleware attached to a route runs in declaration order while the
/// request is `Invoking`. `before` may answer the request itself; the first
/// middleware that does so stops the chain and the handler is not called.
/// `after` sees every successful response, including short-circuited ones,
/// and runs before the response is validated.
pub trait Middleware: Send + Sync + 'static {
    fn before(&self, _req: &HandlerRequest) -> Option<HandlerResponse> {
        None
    }

    fn after(&self, _req: &HandlerRequest, _res: &mut HandlerResponse, _latency: Duration) {}
}

/// Adds a fixed header to every successful response.
#[derive(Debug, Clone)]
pub struct StaticHeader {
    name: String,
    value: String,
}

impl StaticHeader {
    #[must_use]
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

impl Middleware for StaticHeader {
    fn after(&self, _req: &HandlerRequest, res: &mut HandlerResponse, _latency: Duration) {
        if res.get_header(&self.name).is_none() {
            res.set_header(&self.name, self.value.clone());
        }
    }
}

/// Answers with `403` unless the named request header carries `expected`.
#[derive(Debug, Clone)]
pub struct RequireHeader {
    name: String,
    expected: String,
}

impl RequireHeader {
    #[must_use]
    pub fn new(name: &str, expected: &str) -> Self {
        Self {
            name: name.to_string(),
            expected: expected.to_string(),
        }
    }
}

impl Middleware for RequireHeader {
    fn before(&self, req: &HandlerRequest) -> Option<HandlerResponse> {
        match req.get_header(&self.name) {
            Some(v) if v == self.expected => None,
            _ => Some(HandlerResponse::error(403, "Forbidden")),
        }
    }
}
