//! Cancellation of suspended handlers
//!
//! A request whose suspended handler is cancelled (client gone, deadline
//! passed, shutdown) ends `Abandoned`: no response, no error handler, no
//! diagnostic entry.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use view_dispatch::app::ErrorTarget;
use view_dispatch::dispatcher::{
    immediate, suspended, CancelReason, CancelToken, DispatchState, Dispatcher, Disposition,
    HandlerResponse, IncomingRequest,
};
use view_dispatch::registry::{error_handler, ErrorKey};
use view_dispatch::router::RouteDecl;

use common::app::builder;

fn slow_app(
    error_calls: Arc<AtomicUsize>,
    finished: Arc<AtomicBool>,
) -> (Dispatcher, Arc<common::sink::RecordingSink>) {
    let (mut b, sink) = builder();
    b.route(RouteDecl::get(
        "/slow",
        suspended(move |_req| {
            may::coroutine::sleep(Duration::from_secs(5));
            finished.store(true, Ordering::SeqCst);
            Ok(HandlerResponse::ok(json!("late")))
        }),
    ))
    .unwrap();
    b.load_errors(
        ErrorTarget::App,
        [(
            ErrorKey::Fallback,
            error_handler(move |ctx| {
                error_calls.fetch_add(1, Ordering::SeqCst);
                Ok(HandlerResponse::empty(ctx.status))
            }),
        )],
    )
    .unwrap();
    (Dispatcher::new(b.build()), sink)
}

#[test]
fn test_disconnect_during_pending_handler_abandons() {
    let error_calls = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));
    let (dispatcher, sink) = slow_app(Arc::clone(&error_calls), Arc::clone(&finished));

    let cancel = CancelToken::new();
    let remote = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        remote.cancel(CancelReason::Disconnect);
    });

    let done = dispatcher.dispatch(IncomingRequest::get("/slow"), &cancel);
    canceller.join().unwrap();

    assert_eq!(done.disposition, Disposition::Abandoned);
    assert_eq!(done.state, DispatchState::Abandoned);
    assert!(done.called);
    assert_eq!(cancel.reason(), Some(CancelReason::Disconnect));
    assert_eq!(error_calls.load(Ordering::SeqCst), 0);
    assert!(sink.entries().is_empty());
    assert!(!finished.load(Ordering::SeqCst));
}

#[test]
fn test_timeout_abandons_pending_handler() {
    let error_calls = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));
    let (dispatcher, _sink) = slow_app(Arc::clone(&error_calls), finished);

    let cancel = CancelToken::new();
    let _watchdog = cancel.cancel_after(Duration::from_millis(30));
    let done = dispatcher.dispatch(IncomingRequest::get("/slow"), &cancel);

    assert_eq!(done.disposition, Disposition::Abandoned);
    assert_eq!(cancel.reason(), Some(CancelReason::Timeout));
    assert_eq!(error_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_already_cancelled_token_abandons() {
    let (dispatcher, _sink) = slow_app(Arc::new(AtomicUsize::new(0)), Arc::new(AtomicBool::new(false)));

    let cancel = CancelToken::new();
    cancel.cancel(CancelReason::Shutdown);
    let done = dispatcher.dispatch(IncomingRequest::get("/slow"), &cancel);
    assert_eq!(done.disposition, Disposition::Abandoned);
}

#[test]
fn test_cancellation_ignored_by_immediate_handlers() {
    let (mut b, _sink) = builder();
    b.route(RouteDecl::get("/now", immediate(|_req| Ok(HandlerResponse::ok(json!("now"))))))
        .unwrap();
    let dispatcher = Dispatcher::new(b.build());

    let cancel = CancelToken::new();
    cancel.cancel(CancelReason::Disconnect);
    let done = dispatcher.dispatch(IncomingRequest::get("/now"), &cancel);
    assert_eq!(done.disposition.status(), Some(200));
    assert_eq!(done.state, DispatchState::Responded);
}

#[test]
fn test_watchdog_dropped_before_deadline_does_not_cancel() {
    common::test_server::setup_may_runtime();
    let cancel = CancelToken::new();
    let watchdog = cancel.cancel_after(Duration::from_millis(20));
    assert!(watchdog.is_armed());
    drop(watchdog);
    thread::sleep(Duration::from_millis(60));
    assert!(!cancel.is_cancelled());
}
