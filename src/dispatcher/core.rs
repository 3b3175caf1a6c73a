//! Dispatcher core: one request in, one disposition out.
//!
//! ```text
//! MATCHING --(lookup ok, params bound)--> INVOKING --(Ok, legal)------> SUCCESS --> RESPONDED
//!    |                                       |  \--(Err / malformed)--> FAILED  --> RESPONDED
//!    |                                       \----(cancelled)---------> ABANDONED
//!    \--(404 / 405 / 400 / handshake)--> FAILED --> RESPONDED
//! ```
//!
//! Inside INVOKING a route's cache may answer first, then its middleware,
//! then the handler.
//!
//! Every failure except a rejected WebSocket handshake is rendered through
//! the error registry ([`fire_error`](Dispatcher::fire_error)). Every failure
//! is reported to the application's diagnostic sink.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use super::bridge::{panic_message, CancelToken, Completion, Invocation};
use super::context::{DispatchState, Outcome, RequestContext, RequestId};
use super::handler::{validate_response, HandlerError, HandlerRequest, HandlerResponse, HandlerResult, HeaderVec};
use super::middleware::Middleware;
use crate::app::Application;
use crate::diagnostics::RouteLogEntry;
use crate::error::{Failure, FailureKind};
use crate::handshake::{self, Handshake, HandshakeError};
use crate::registry::{bare_server_error, default_error_response, ErrorContext, ErrorHandlerRef, ErrorScope};
use crate::router::{Lookup, Route};

/// A request as handed over by the transport.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: Method,
    /// Path without the query string
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderVec,
    pub body: Option<Value>,
    /// Caller-supplied id; a fresh one is generated when absent
    pub request_id: Option<RequestId>,
}

impl IncomingRequest {
    #[must_use]
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: Vec::new(),
            headers: HeaderVec::new(),
            body: None,
            request_id: None,
        }
    }

    #[must_use]
    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((Arc::from(name), value.to_string()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }

    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the transport must do with the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Write this response
    Respond(HandlerResponse),
    /// Write this `101` response and hand the connection to the WebSocket layer
    Upgrade(HandlerResponse),
    /// Write this rejection and close the connection
    Teardown(HandlerResponse),
    /// Write nothing; the request was cancelled
    Abandoned,
}

impl Disposition {
    #[must_use]
    pub fn response(&self) -> Option<&HandlerResponse> {
        match self {
            Disposition::Respond(r) | Disposition::Upgrade(r) | Disposition::Teardown(r) => Some(r),
            Disposition::Abandoned => None,
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.response().map(|r| r.status)
    }
}

/// Result of one dispatch.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub request_id: RequestId,
    /// Terminal state: `Responded` or `Abandoned`
    pub state: DispatchState,
    /// Whether the route handler was invoked
    pub called: bool,
    pub disposition: Disposition,
}

/// Dispatches requests against a frozen application.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    app: Arc<Application>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(app: Arc<Application>) -> Self {
        Self { app }
    }

    #[must_use]
    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }

    /// Run one request through matching, invocation, and error rendering.
    ///
    /// Never fails: every path ends in a disposition. `cancel` is only
    /// observed while a suspended handler is pending.
    #[must_use]
    pub fn dispatch(&self, req: IncomingRequest, cancel: &CancelToken) -> Dispatched {
        let started = Instant::now();
        let request_id = req.request_id.unwrap_or_default();
        let mut ctx = RequestContext::new(request_id, &req.method, &req.path);

        debug!(
            request_id = %request_id,
            method = %req.method,
            path = %req.path,
            "Dispatch start"
        );

        // MATCHING
        let matched = match self.app.routes().match_route(&req.method, &req.path) {
            Ok(Lookup::Matched(m)) => m,
            Ok(Lookup::NotFound) => {
                ctx.record(Outcome::Failure(Failure::not_found(&req.method, &req.path)));
                return self.finish(ctx, None, started);
            }
            Ok(Lookup::MethodNotAllowed { allowed }) => {
                let failure = Failure::method_not_allowed(&req.method, &req.path, &allowed);
                ctx.record(Outcome::Failure(failure));
                return self.finish(ctx, None, started);
            }
            Err(e) => {
                ctx.record(Outcome::Failure(Failure::parameter(&e)));
                return self.finish(ctx, None, started);
            }
        };
        let route = matched.route;
        ctx.set_route(route);

        let handshake = if handshake::is_upgrade_request(&req.headers) {
            let checked = match route.websocket() {
                Some(spec) => handshake::validate(&req.method, &req.headers, spec),
                None => Err(HandshakeError::NotUpgradable(route.pattern().as_str().to_string())),
            };
            match checked {
                Ok(hs) => Some(hs),
                Err(e) => {
                    ctx.record(Outcome::Rejected(e));
                    return self.finish(ctx, None, started);
                }
            }
        } else {
            None
        };

        let metadata = route
            .wants_context()
            .then(|| request_metadata(&req, request_id, route));
        let params = match route.bind_inputs(
            matched.path_params,
            &req.query,
            req.body.as_ref(),
            metadata.as_ref(),
        ) {
            Ok(p) => p,
            Err(e) => {
                ctx.record(Outcome::Failure(Failure::parameter(&e)));
                return self.finish(ctx, None, started);
            }
        };

        // INVOKING
        ctx.transition(DispatchState::Invoking);
        let cache = route.cache().filter(|_| handshake.is_none());
        if let Some(resp) = cache.and_then(|c| c.lookup(&params)) {
            debug!(
                request_id = %request_id,
                route_pattern = %route.pattern().as_str(),
                "Response served from route cache"
            );
            ctx.record(Outcome::Success(resp));
            return self.finish(ctx, None, started);
        }
        let cache_key = cache.map(|_| params.clone());

        let handler_req = HandlerRequest {
            request_id,
            method: req.method.clone(),
            path: req.path.clone(),
            pattern: Arc::clone(route.pattern().raw()),
            params,
            query: req.query.clone(),
            headers: req.headers.clone(),
            body: req.body.clone(),
        };

        let middleware = route.middleware();
        let hooks_req = (!middleware.is_empty()).then(|| handler_req.clone());
        let invoked = Instant::now();

        let early = hooks_req.as_ref().and_then(|r| run_before(middleware, r));
        let result = match early {
            Some(result) => {
                debug!(
                    request_id = %request_id,
                    route_pattern = %route.pattern().as_str(),
                    "Middleware answered before the handler"
                );
                result
            }
            None => {
                ctx.mark_called();
                let handler = Arc::clone(route.handler());
                let invocation = catch_unwind(AssertUnwindSafe(|| handler.invoke(handler_req)))
                    .unwrap_or_else(|panic| Invocation::Immediate(Err(HandlerError::Panicked(panic_message(&*panic)))));

                match invocation.complete(cancel) {
                    Completion::Done(result) => result,
                    Completion::Cancelled(reason) => {
                        ctx.transition(DispatchState::Abandoned);
                        warn!(
                            request_id = %request_id,
                            method = %req.method,
                            path = %req.path,
                            route_pattern = %route.pattern().as_str(),
                            reason = %reason,
                            duration_us = started.elapsed().as_micros() as u64,
                            "Request abandoned"
                        );
                        return Dispatched {
                            request_id,
                            state: DispatchState::Abandoned,
                            called: true,
                            disposition: Disposition::Abandoned,
                        };
                    }
                }
            }
        };

        let result = match (result, &hooks_req) {
            (Ok(resp), Some(r)) => run_after(middleware, r, resp, invoked.elapsed()),
            (result, _) => result,
        };

        let outcome = match result {
            Ok(resp) => match validate_response(&resp) {
                Ok(()) => {
                    if let (Some(cache), Some(key)) = (cache, cache_key) {
                        cache.store(key, resp.clone());
                    }
                    Outcome::Success(resp)
                }
                Err(reason) => Outcome::Failure(Failure::malformed(reason)),
            },
            Err(err) => {
                if let HandlerError::Panicked(msg) = &err {
                    error!(
                        request_id = %request_id,
                        route_pattern = %route.pattern().as_str(),
                        panic_message = %msg,
                        "Handler panicked - CRITICAL"
                    );
                }
                Outcome::Failure(Failure::from_handler_error(&err))
            }
        };
        ctx.record(outcome);
        self.finish(ctx, handshake, started)
    }

    /// Answer a request the transport could not decode.
    ///
    /// No route is matched and no handler runs; the failure is rendered
    /// through the error registry and reported like any other.
    #[must_use]
    pub fn reject(&self, req: &IncomingRequest, failure: Failure) -> Dispatched {
        let started = Instant::now();
        let request_id = req.request_id.unwrap_or_default();
        let mut ctx = RequestContext::new(request_id, &req.method, &req.path);
        debug!(
            request_id = %request_id,
            method = %req.method,
            path = %req.path,
            kind = %failure.kind,
            "Request rejected by transport"
        );
        ctx.record(Outcome::Failure(failure));
        self.finish(ctx, None, started)
    }

    fn finish(&self, mut ctx: RequestContext<'_>, handshake: Option<Handshake>, started: Instant) -> Dispatched {
        let request_id = ctx.request_id;
        let disposition = match ctx.take_outcome() {
            Outcome::Success(resp) => {
                ctx.transition(DispatchState::Success);
                match handshake {
                    Some(hs) => {
                        let mut accept = hs.accept_response();
                        for (name, value) in resp.headers {
                            if accept.get_header(&name).is_none() {
                                accept.headers.push((name, value));
                            }
                        }
                        Disposition::Upgrade(accept)
                    }
                    None => Disposition::Respond(resp),
                }
            }
            Outcome::Rejected(err) => {
                ctx.transition(DispatchState::Failed);
                let rejection = err.rejection();
                self.report(&ctx, rejection.status, FailureKind::Handshake, false, err.to_string());
                Disposition::Teardown(rejection)
            }
            Outcome::Failure(failure) => {
                ctx.transition(DispatchState::Failed);
                let rendered = self.fire_error(&ctx, &failure);
                let (kind, detail) = match rendered.degraded {
                    Some(degraded) => (degraded.kind, degraded.detail),
                    None => (failure.kind, failure.detail),
                };
                self.report(
                    &ctx,
                    rendered.response.status,
                    kind,
                    rendered.error_handler_failed,
                    detail,
                );
                Disposition::Respond(rendered.response)
            }
        };
        ctx.transition(DispatchState::Responded);

        info!(
            request_id = %request_id,
            method = %ctx.method,
            path = %ctx.path,
            status = disposition.status().unwrap_or_default(),
            called = ctx.called(),
            duration_us = started.elapsed().as_micros() as u64,
            "Dispatch complete"
        );

        Dispatched {
            request_id,
            state: ctx.state(),
            called: ctx.called(),
            disposition,
        }
    }

    fn report(&self, ctx: &RequestContext<'_>, status: u16, kind: FailureKind, error_handler_failed: bool, detail: String) {
        self.app.sink().record(RouteLogEntry {
            request_id: ctx.request_id,
            method: ctx.method.to_string(),
            path: ctx.path.to_string(),
            route: ctx.route().map(|r| r.pattern().as_str().to_string()),
            status,
            kind,
            called: ctx.called(),
            error_handler_failed,
            detail,
        });
    }

    /// Render a failure through the error registry.
    ///
    /// The response always carries the failure's classified status and its
    /// mandatory headers, except for the bare 500.
    ///
    /// A failing route-scoped handler falls back once to the application
    /// scope for the same status. Any further failure yields the bare 500.
    pub fn fire_error(&self, ctx: &RequestContext<'_>, failure: &Failure) -> Rendered {
        let dev = self.app.config().dev;
        let ectx = ErrorContext {
            request_id: ctx.request_id,
            status: failure.status,
            kind: failure.kind,
            detail: &failure.detail,
            called: ctx.called(),
            method: ctx.method,
            path: ctx.path,
            route: ctx.route().map(|r| r.pattern().as_str()),
            dev,
        };

        let registry = self.app.errors();
        let route_slots = ctx.route().map(|r| r.errors());

        let Some((handler, scope)) = registry.resolve(route_slots, failure.status) else {
            return Rendered::handled(with_failure_headers(default_error_response(failure, dev), failure));
        };

        let mut reason = match run_error_handler(handler, &ectx) {
            Ok(resp) => return Rendered::handled(with_failure_headers(resp, failure)),
            Err(reason) => reason,
        };
        error!(
            request_id = %ctx.request_id,
            status = failure.status,
            scope = ?scope,
            reason = %reason,
            "Error handler failed"
        );

        if scope == ErrorScope::Route {
            let fallback = match registry.resolve_app(failure.status) {
                Some((app_handler, _)) => run_error_handler(app_handler, &ectx),
                None => Ok(default_error_response(failure, dev)),
            };
            match fallback {
                Ok(resp) => return Rendered::recovered(with_failure_headers(resp, failure)),
                Err(app_reason) => {
                    error!(
                        request_id = %ctx.request_id,
                        status = failure.status,
                        reason = %app_reason,
                        "Application error handler failed after route handler failure"
                    );
                    reason = app_reason;
                }
            }
        }

        Rendered {
            response: bare_server_error(),
            error_handler_failed: true,
            degraded: Some(Failure::error_handler_failure(failure, reason)),
        }
    }
}

/// A failure rendered by [`Dispatcher::fire_error`].
#[derive(Debug, Clone)]
pub struct Rendered {
    pub response: HandlerResponse,
    /// An error handler failed on the way
    pub error_handler_failed: bool,
    /// Set when no handler could render and `response` is the bare 500
    pub degraded: Option<Failure>,
}

impl Rendered {
    fn handled(response: HandlerResponse) -> Self {
        Self {
            response,
            error_handler_failed: false,
            degraded: None,
        }
    }

    fn recovered(response: HandlerResponse) -> Self {
        Self {
            response,
            error_handler_failed: true,
            degraded: None,
        }
    }
}

/// Request metadata bound to context parameters.
fn request_metadata(req: &IncomingRequest, request_id: RequestId, route: &Route) -> Value {
    let headers: Map<String, Value> = req
        .headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), Value::String(v.clone())))
        .collect();
    let query: Map<String, Value> = req
        .query
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    json!({
        "request_id": request_id.to_string(),
        "method": req.method.as_str(),
        "path": req.path,
        "route": route.pattern().as_str(),
        "headers": headers,
        "query": query,
    })
}

/// First middleware answer, if any. A panicking hook is a handler panic.
fn run_before(middleware: &[Arc<dyn Middleware>], req: &HandlerRequest) -> Option<HandlerResult> {
    catch_unwind(AssertUnwindSafe(|| middleware.iter().find_map(|mw| mw.before(req))))
        .map(|early| early.map(Ok))
        .unwrap_or_else(|panic| Some(Err(HandlerError::Panicked(panic_message(&*panic)))))
}

fn run_after(
    middleware: &[Arc<dyn Middleware>],
    req: &HandlerRequest,
    mut resp: HandlerResponse,
    latency: Duration,
) -> HandlerResult {
    catch_unwind(AssertUnwindSafe(|| {
        for mw in middleware {
            mw.after(req, &mut resp, latency);
        }
    }))
    .map_err(|panic| HandlerError::Panicked(panic_message(&*panic)))?;
    Ok(resp)
}

/// Call an error handler. Panics, errors and malformed responses are all
/// failures. The classified status is forced onto a good response.
fn run_error_handler(handler: &ErrorHandlerRef, ctx: &ErrorContext<'_>) -> Result<HandlerResponse, String> {
    let result = catch_unwind(AssertUnwindSafe(|| handler.handle(ctx)))
        .map_err(|panic| format!("panicked: {}", panic_message(&*panic)))?;
    let mut resp = result.map_err(|e| e.to_string())?;
    resp.status = ctx.status;
    validate_response(&resp)?;
    Ok(resp)
}

fn with_failure_headers(mut resp: HandlerResponse, failure: &Failure) -> HandlerResponse {
    for (name, value) in &failure.headers {
        if resp.get_header(name).is_none() {
            resp.headers.push((Arc::clone(name), value.clone()));
        }
    }
    resp
}
