#![allow(dead_code)]

pub mod test_server {
    use std::sync::Once;

    /// Ensures May coroutines are configured only once
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
        });
    }
}

pub mod tracing_util {
    use std::sync::Once;

    static TRACING_INIT: Once = Once::new();

    /// Route `tracing` output through the test harness writer. `RUST_LOG`
    /// controls verbosity; silent by default.
    pub fn init() {
        TRACING_INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
                )
                .with_test_writer()
                .try_init();
        });
    }
}

pub mod sink {
    use std::sync::{Arc, Mutex};

    use view_dispatch::diagnostics::{DiagnosticSink, RouteLogEntry};

    /// Keeps every recorded entry for later assertions.
    #[derive(Default)]
    pub struct RecordingSink {
        entries: Mutex<Vec<RouteLogEntry>>,
    }

    impl RecordingSink {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn entries(&self) -> Vec<RouteLogEntry> {
            self.entries.lock().unwrap().clone()
        }

        pub fn last(&self) -> Option<RouteLogEntry> {
            self.entries.lock().unwrap().last().cloned()
        }
    }

    impl DiagnosticSink for RecordingSink {
        fn record(&self, entry: RouteLogEntry) {
            self.entries.lock().unwrap().push(entry);
        }
    }
}

pub mod requests {
    use view_dispatch::dispatcher::IncomingRequest;

    /// RFC 6455 sample nonce
    pub const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    /// A well-formed WebSocket upgrade request.
    pub fn upgrade(path: &str) -> IncomingRequest {
        IncomingRequest::get(path)
            .with_header("upgrade", "websocket")
            .with_header("connection", "Upgrade")
            .with_header("sec-websocket-key", SAMPLE_KEY)
            .with_header("sec-websocket-version", "13")
    }
}

pub mod app {
    use std::sync::Arc;

    use view_dispatch::app::{AppBuilder, Application};
    use view_dispatch::dispatcher::{CancelToken, Dispatched, Dispatcher, IncomingRequest};

    use super::sink::RecordingSink;

    /// Builder wired to a recording sink, with test tracing and runtime set up.
    pub fn builder() -> (AppBuilder, Arc<RecordingSink>) {
        super::tracing_util::init();
        super::test_server::setup_may_runtime();
        let sink = RecordingSink::new();
        let builder = AppBuilder::new().with_sink(sink.clone());
        (builder, sink)
    }

    pub fn dispatch(app: &Arc<Application>, req: IncomingRequest) -> Dispatched {
        Dispatcher::new(Arc::clone(app)).dispatch(req, &CancelToken::new())
    }
}
