use std::io;
use std::sync::Arc;
use std::time::Duration;

use may::coroutine;
use may_minihttp::{HttpService, Request, Response};
use tracing::{debug, warn};

use super::request::parse_request;
use super::response::write_response;
use crate::app::Application;
use crate::dispatcher::{CancelToken, Dispatcher, Disposition};

/// `may_minihttp` service that feeds every request through a [`Dispatcher`].
///
/// One clone serves one connection. When the application configures a
/// handler timeout, each request gets a watchdog that cancels it once the
/// deadline passes. Requests that cannot be decoded are answered through
/// [`Dispatcher::reject`]. A rejected handshake and an abandoned request
/// both close the connection.
#[derive(Debug, Clone)]
pub struct AppService {
    dispatcher: Dispatcher,
    timeout: Option<Duration>,
}

impl AppService {
    #[must_use]
    pub fn new(app: Arc<Application>) -> Self {
        let timeout = app.config().handler_timeout();
        Self {
            dispatcher: Dispatcher::new(app),
            timeout,
        }
    }

    /// Override the deadline taken from the application config.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl HttpService for AppService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let cancel = CancelToken::new();
        let done = match parse_request(req) {
            Ok(incoming) => {
                let _watchdog = self.timeout.map(|t| cancel.cancel_after(t));
                self.dispatcher.dispatch(incoming, &cancel)
            }
            Err(rejected) => self.dispatcher.reject(&rejected.request, rejected.failure),
        };

        match done.disposition {
            Disposition::Respond(resp) => write_response(res, resp),
            Disposition::Upgrade(resp) => {
                debug!(request_id = %done.request_id, "Writing WebSocket upgrade response");
                write_response(res, resp);
            }
            Disposition::Teardown(resp) => {
                debug!(request_id = %done.request_id, status = resp.status, "Handshake rejected, closing connection");
                write_response(res, resp);
                return close_connection(Close::AfterFlush);
            }
            Disposition::Abandoned => {
                warn!(
                    request_id = %done.request_id,
                    reason = ?cancel.reason(),
                    "Request abandoned, closing connection without a response"
                );
                return close_connection(Close::Now);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Close {
    /// The response written for this request still goes out
    AfterFlush,
    /// Nothing more is written
    Now,
}

/// Close the connection this service instance serves.
///
/// `may_minihttp` has no close hook and answers an `Err` from the service
/// with its own 500. The connection coroutine is cancelled instead: it
/// unwinds at its next yield and drops the socket. `may_minihttp` encodes
/// and writes the pending response before it waits for more input, so
/// with [`Close::AfterFlush`] the response is sent first.
fn close_connection(mode: Close) -> io::Result<()> {
    if !coroutine::is_coroutine() {
        return Err(io::Error::other("connection close requested outside a coroutine"));
    }
    // SAFETY: the current coroutine is the connection loop that owns this
    // service; cancelling it only tears down this connection.
    unsafe {
        coroutine::current().cancel();
    }
    if mode == Close::Now {
        // Cancellation unwinds here, before anything is encoded.
        coroutine::yield_now();
        return Err(io::Error::other("request abandoned"));
    }
    Ok(())
}
