//! # Error Registry
//!
//! Status-keyed error handlers, resolved in O(1) through the perfect hash in
//! [`status`](crate::status).
//!
//! Handlers live in two fixed 100-slot tables (client and server errors) plus
//! a fallback slot for statuses that classify to
//! [`StatusIndex::Default`] or have no dedicated handler. An application
//! holds one set of slots; every route may hold its own. Resolution order:
//!
//! 1. route slot for the status
//! 2. route fallback
//! 3. application slot for the status
//! 4. application fallback
//! 5. built-in default ([`default_error_response`])
//!
//! Slots are filled during the load phase only and are read concurrently
//! afterwards without locking.

use std::fmt;
use std::sync::Arc;

use http::Method;
use serde_json::json;

use crate::dispatcher::{HandlerResponse, HandlerResult, RequestId};
use crate::error::{Failure, FailureKind, RegistrationError};
use crate::status::{classify, status_reason, StatusIndex, ERROR_TABLE_SIZE};

/// Everything an error handler gets to see about the failure.
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    pub request_id: RequestId,
    /// Classified status. The final response always carries this status.
    pub status: u16,
    pub kind: FailureKind,
    /// Internal detail, never sent to clients outside dev mode
    pub detail: &'a str,
    /// Whether the route handler was invoked before the failure
    pub called: bool,
    pub method: &'a Method,
    pub path: &'a str,
    /// Matched route pattern, if any
    pub route: Option<&'a str>,
    pub dev: bool,
}

/// A user error handler.
///
/// Implemented for every `Fn(&ErrorContext<'_>) -> HandlerResult`.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, ctx: &ErrorContext<'_>) -> HandlerResult;
}

impl<F> ErrorHandler for F
where
    F: Fn(&ErrorContext<'_>) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, ctx: &ErrorContext<'_>) -> HandlerResult {
        self(ctx)
    }
}

/// Shared handle to a registered error handler.
pub type ErrorHandlerRef = Arc<dyn ErrorHandler>;

/// Wrap a closure as an [`ErrorHandlerRef`].
pub fn error_handler<F>(f: F) -> ErrorHandlerRef
where
    F: Fn(&ErrorContext<'_>) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Key of an error-handler mapping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKey {
    Status(u16),
    /// Catch-all for statuses without a dedicated handler
    Fallback,
}

impl From<u16> for ErrorKey {
    fn from(status: u16) -> Self {
        ErrorKey::Status(status)
    }
}

impl fmt::Display for ErrorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKey::Status(s) => write!(f, "{s}"),
            ErrorKey::Fallback => f.write_str("fallback"),
        }
    }
}

/// Which registry scope a resolved handler came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    Route,
    App,
}

/// One set of error slots: two direct-indexed tables and a fallback.
pub struct ErrorSlots {
    client: Box<[Option<ErrorHandlerRef>]>,
    server: Box<[Option<ErrorHandlerRef>]>,
    fallback: Option<ErrorHandlerRef>,
}

impl Default for ErrorSlots {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ErrorSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let statuses: Vec<u16> = self.registered().collect();
        f.debug_struct("ErrorSlots")
            .field("statuses", &statuses)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl ErrorSlots {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: vec![None; ERROR_TABLE_SIZE].into_boxed_slice(),
            server: vec![None; ERROR_TABLE_SIZE].into_boxed_slice(),
            fallback: None,
        }
    }

    /// Fill one slot. A later call for the same key replaces the handler.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::InvalidErrorStatus`] for a status outside 400-599.
    pub fn set(&mut self, key: ErrorKey, handler: ErrorHandlerRef) -> Result<(), RegistrationError> {
        match key {
            ErrorKey::Fallback => self.fallback = Some(handler),
            ErrorKey::Status(status) => match classify(status) {
                StatusIndex::Client(i) => self.client[usize::from(i)] = Some(handler),
                StatusIndex::Server(i) => self.server[usize::from(i)] = Some(handler),
                StatusIndex::Default => return Err(RegistrationError::InvalidErrorStatus(status)),
            },
        }
        Ok(())
    }

    /// Dedicated handler for an index. `Default` maps to the fallback slot.
    #[must_use]
    pub fn get(&self, index: StatusIndex) -> Option<&ErrorHandlerRef> {
        match index {
            StatusIndex::Client(i) => self.client.get(usize::from(i))?.as_ref(),
            StatusIndex::Server(i) => self.server.get(usize::from(i))?.as_ref(),
            StatusIndex::Default => self.fallback.as_ref(),
        }
    }

    #[must_use]
    pub fn fallback(&self) -> Option<&ErrorHandlerRef> {
        self.fallback.as_ref()
    }

    /// Slot first, then fallback.
    #[must_use]
    pub fn resolve(&self, index: StatusIndex) -> Option<&ErrorHandlerRef> {
        self.get(index).or(self.fallback.as_ref())
    }

    /// Statuses with a dedicated handler, ascending.
    pub fn registered(&self) -> impl Iterator<Item = u16> + '_ {
        let client = self
            .client
            .iter()
            .enumerate()
            .filter(|(_, h)| h.is_some())
            .filter_map(|(i, _)| u8::try_from(i).ok().and_then(|i| StatusIndex::Client(i).status()));
        let server = self
            .server
            .iter()
            .enumerate()
            .filter(|(_, h)| h.is_some())
            .filter_map(|(i, _)| u8::try_from(i).ok().and_then(|i| StatusIndex::Server(i).status()));
        client.chain(server)
    }

    /// Number of filled slots, fallback included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registered().count() + usize::from(self.fallback.is_some())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fill `slots` from a mapping.
///
/// The whole mapping is validated before any slot changes, so a rejected
/// mapping leaves `slots` untouched. Within one mapping, and across repeated
/// calls, the last entry for a key wins.
///
/// # Errors
///
/// [`RegistrationError::InvalidErrorStatus`] for a status outside 400-599.
pub fn load_errors<I>(slots: &mut ErrorSlots, mapping: I) -> Result<usize, RegistrationError>
where
    I: IntoIterator<Item = (ErrorKey, ErrorHandlerRef)>,
{
    let entries: Vec<(ErrorKey, ErrorHandlerRef)> = mapping.into_iter().collect();
    if let Some((ErrorKey::Status(status), _)) = entries
        .iter()
        .find(|(k, _)| matches!(k, ErrorKey::Status(s) if classify(*s) == StatusIndex::Default))
    {
        return Err(RegistrationError::InvalidErrorStatus(*status));
    }

    let count = entries.len();
    for (key, handler) in entries {
        slots.set(key, handler)?;
    }
    Ok(count)
}

/// Application-wide error handlers.
#[derive(Debug, Default)]
pub struct ErrorRegistry {
    app: ErrorSlots,
}

impl ErrorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn app(&self) -> &ErrorSlots {
        &self.app
    }

    pub(crate) fn app_mut(&mut self) -> &mut ErrorSlots {
        &mut self.app
    }

    /// Resolve the handler for `status`, walking route then application
    /// scope. `None` means the built-in default applies.
    #[must_use]
    pub fn resolve<'a>(
        &'a self,
        route: Option<&'a ErrorSlots>,
        status: u16,
    ) -> Option<(&'a ErrorHandlerRef, ErrorScope)> {
        let index = classify(status);
        if let Some(handler) = route.and_then(|slots| slots.resolve(index)) {
            return Some((handler, ErrorScope::Route));
        }
        self.resolve_app(status)
    }

    /// Application scope only.
    #[must_use]
    pub fn resolve_app(&self, status: u16) -> Option<(&ErrorHandlerRef, ErrorScope)> {
        self.app
            .resolve(classify(status))
            .map(|h| (h, ErrorScope::App))
    }
}

/// Built-in error response: `{"error": <reason>, "status": <code>}`, plus the
/// failure detail in dev mode.
#[must_use]
pub fn default_error_response(failure: &Failure, dev: bool) -> HandlerResponse {
    let mut body = json!({
        "error": status_reason(failure.status),
        "status": failure.status,
    });
    if dev {
        body["detail"] = json!(failure.detail);
        body["kind"] = json!(failure.kind);
    }
    HandlerResponse::json(failure.status, body)
}

/// Fixed 500 used when an error handler itself fails. Never carries detail.
#[must_use]
pub fn bare_server_error() -> HandlerResponse {
    HandlerResponse::json(
        500,
        json!({
            "error": status_reason(500),
            "status": 500,
        }),
    )
}
