//! Per-request dispatch state.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use http::Method;
use serde::{Serialize, Serializer};
use tracing::error;

use super::handler::HandlerResponse;
use crate::error::Failure;
use crate::handshake::HandshakeError;
use crate::router::Route;

/// Request identifier backed by a ULID.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct RequestId(ulid::Ulid);

impl RequestId {
    #[must_use]
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Reuse a caller-supplied id (`x-request-id`) when it parses.
    #[must_use]
    pub fn from_header_or_new(value: Option<&str>) -> Self {
        value
            .and_then(|s| s.parse::<RequestId>().ok())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn as_ulid(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for RequestId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(RequestId)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Lifecycle of one dispatch.
///
/// ```text
/// Matching -> Invoking -> Success -> Responded
///     |          |    \-> Failed  -> Responded
///     |          \------> Abandoned
///     \-> Failed -> Responded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Matching,
    Invoking,
    Success,
    Failed,
    Responded,
    Abandoned,
}

impl DispatchState {
    #[must_use]
    pub fn can_transition_to(self, next: DispatchState) -> bool {
        use DispatchState::*;
        matches!(
            (self, next),
            (Matching, Invoking | Failed)
                | (Invoking, Success | Failed | Abandoned)
                | (Success | Failed, Responded)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, DispatchState::Responded | DispatchState::Abandoned)
    }
}

/// Result of a dispatch before rendering.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(HandlerResponse),
    Failure(Failure),
    /// A WebSocket handshake the guard refused; bypasses the error registry
    Rejected(HandshakeError),
}

/// Abort on a broken dispatcher invariant.
///
/// These are programming errors inside the engine, never request errors.
#[track_caller]
#[allow(clippy::panic)]
pub(crate) fn fatal(message: &str) -> ! {
    let location = std::panic::Location::caller();
    error!(location = %location, message = %message, "View fatal error");
    panic!("view fatal: {message}");
}

/// In-flight state for one request. Owned by a single dispatch call.
#[derive(Debug)]
pub struct RequestContext<'a> {
    pub request_id: RequestId,
    pub method: &'a Method,
    pub path: &'a str,
    route: Option<&'a Route>,
    called: bool,
    state: DispatchState,
    outcome: Option<Outcome>,
}

impl<'a> RequestContext<'a> {
    #[must_use]
    pub fn new(request_id: RequestId, method: &'a Method, path: &'a str) -> Self {
        Self {
            request_id,
            method,
            path,
            route: None,
            called: false,
            state: DispatchState::Matching,
            outcome: None,
        }
    }

    #[must_use]
    pub fn route(&self) -> Option<&'a Route> {
        self.route
    }

    pub fn set_route(&mut self, route: &'a Route) {
        self.route = Some(route);
    }

    /// Whether the route handler has been invoked.
    #[must_use]
    pub fn called(&self) -> bool {
        self.called
    }

    #[must_use]
    pub fn state(&self) -> DispatchState {
        self.state
    }

    #[track_caller]
    pub fn transition(&mut self, next: DispatchState) {
        if !self.state.can_transition_to(next) {
            fatal(&format!(
                "illegal dispatch transition {:?} -> {:?} for request {}",
                self.state, next, self.request_id
            ));
        }
        self.state = next;
    }

    /// The route handler is about to run. Only valid while `Invoking`.
    #[track_caller]
    pub fn mark_called(&mut self) {
        if self.state != DispatchState::Invoking {
            fatal(&format!(
                "handler called in state {:?} for request {}",
                self.state, self.request_id
            ));
        }
        self.called = true;
    }

    /// Record the single outcome of this request.
    #[track_caller]
    pub fn record(&mut self, outcome: Outcome) {
        if self.outcome.is_some() {
            fatal(&format!(
                "second outcome recorded for request {}",
                self.request_id
            ));
        }
        self.outcome = Some(outcome);
    }

    #[track_caller]
    pub(crate) fn take_outcome(&mut self) -> Outcome {
        match self.outcome.take() {
            Some(outcome) => outcome,
            None => fatal(&format!("no outcome recorded for request {}", self.request_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use DispatchState::*;
        assert!(Matching.can_transition_to(Invoking));
        assert!(Matching.can_transition_to(Failed));
        assert!(Invoking.can_transition_to(Abandoned));
        assert!(Failed.can_transition_to(Responded));
        assert!(!Matching.can_transition_to(Success));
        assert!(!Responded.can_transition_to(Failed));
        assert!(!Abandoned.can_transition_to(Responded));
        assert!(Responded.is_terminal() && Abandoned.is_terminal());
    }

    #[test]
    #[should_panic(expected = "view fatal")]
    fn test_second_outcome_is_fatal() {
        let method = Method::GET;
        let mut ctx = RequestContext::new(RequestId::new(), &method, "/");
        ctx.record(Outcome::Success(HandlerResponse::empty(204)));
        ctx.record(Outcome::Success(HandlerResponse::empty(204)));
    }

    #[test]
    #[should_panic(expected = "illegal dispatch transition")]
    fn test_illegal_transition_is_fatal() {
        let method = Method::GET;
        let mut ctx = RequestContext::new(RequestId::new(), &method, "/");
        ctx.transition(DispatchState::Responded);
    }

    #[test]
    #[should_panic(expected = "handler called in state Matching")]
    fn test_call_before_invoking_is_fatal() {
        let method = Method::GET;
        let mut ctx = RequestContext::new(RequestId::new(), &method, "/");
        ctx.mark_called();
    }

    #[test]
    fn test_request_id_from_header() {
        let id = RequestId::new();
        let parsed = RequestId::from_header_or_new(Some(&id.to_string()));
        assert_eq!(parsed, id);
        let fresh = RequestId::from_header_or_new(Some("not-a-ulid"));
        assert_ne!(fresh, id);
    }
}
