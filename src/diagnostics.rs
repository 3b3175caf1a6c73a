//! Diagnostic sink for failed dispatches.
//!
//! Every failed dispatch produces one [`RouteLogEntry`]. The default sink
//! writes it to `tracing`; tests plug in a recording sink.

use serde::Serialize;
use tracing::{error, warn};

use crate::dispatcher::RequestId;
use crate::error::FailureKind;

/// One failed dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteLogEntry {
    pub request_id: RequestId,
    pub method: String,
    pub path: String,
    /// Pattern of the matched route, when matching got that far
    pub route: Option<String>,
    /// Status of the response actually sent (or the rejection for handshakes)
    pub status: u16,
    pub kind: FailureKind,
    /// Whether the route handler had been invoked
    pub called: bool,
    pub error_handler_failed: bool,
    pub detail: String,
}

/// Receives failure diagnostics. Called from serving coroutines concurrently.
pub trait DiagnosticSink: Send + Sync + 'static {
    fn record(&self, entry: RouteLogEntry);
}

/// Writes entries as structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, entry: RouteLogEntry) {
        if entry.status >= 500 || entry.error_handler_failed {
            error!(
                request_id = %entry.request_id,
                method = %entry.method,
                path = %entry.path,
                route = ?entry.route,
                status = entry.status,
                kind = %entry.kind,
                called = entry.called,
                error_handler_failed = entry.error_handler_failed,
                detail = %entry.detail,
                "Request failed"
            );
        } else {
            warn!(
                request_id = %entry.request_id,
                method = %entry.method,
                path = %entry.path,
                route = ?entry.route,
                status = entry.status,
                kind = %entry.kind,
                called = entry.called,
                detail = %entry.detail,
                "Request rejected"
            );
        }
    }
}
