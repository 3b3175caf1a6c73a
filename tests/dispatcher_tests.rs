//! Tests for the request dispatcher
//!
//! # Test Coverage
//!
//! - A matching route invokes its handler exactly once
//! - 404 / 405 / 400 failures before the handler runs
//! - Handler errors, panics and malformed responses
//! - Error handler resolution, route scope before application scope
//! - Failing error handlers and the bare 500
//! - Suspended handlers completing through the coroutine bridge
//! - Transport rejections rendered through the registry
//! - Route middleware, response reuse and context parameters

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use serde_json::json;
use view_dispatch::app::ErrorTarget;
use view_dispatch::config::AppConfig;
use view_dispatch::dispatcher::{
    immediate, suspended, CancelToken, DispatchState, Dispatcher, Disposition, HandlerError, HandlerRequest,
    HandlerResponse, IncomingRequest, Middleware, RequireHeader, StaticHeader,
};
use view_dispatch::error::{Failure, FailureKind};
use view_dispatch::registry::{error_handler, ErrorKey};
use view_dispatch::router::{ParamSpec, ParamType, RouteDecl};

use common::app::{builder, dispatch};

fn tagged(tag: &'static str) -> view_dispatch::registry::ErrorHandlerRef {
    error_handler(move |ctx| Ok(HandlerResponse::json(ctx.status, json!({ "tag": tag }))))
}

fn failing() -> view_dispatch::registry::ErrorHandlerRef {
    error_handler(|_ctx| Err(HandlerError::with_status(500, "error handler broke")))
}

#[test]
fn test_matching_route_calls_handler_once() {
    let (mut b, sink) = builder();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    b.route(RouteDecl::get(
        "/hello",
        immediate(move |_req| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(HandlerResponse::ok(json!({"hello": "world"})))
        }),
    ))
    .unwrap();
    let app = b.build();

    let done = dispatch(&app, IncomingRequest::get("/hello"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(done.called);
    assert_eq!(done.state, DispatchState::Responded);
    let resp = done.disposition.response().unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, json!({"hello": "world"}));
    assert!(sink.entries().is_empty());
}

#[test]
fn test_unknown_path_gets_default_404() {
    let (mut b, sink) = builder();
    b.route(RouteDecl::get("/", immediate(|_req| Ok(HandlerResponse::ok(json!({}))))))
        .unwrap();
    let app = b.build();

    let done = dispatch(&app, IncomingRequest::get("/nope"));
    assert!(!done.called);
    assert_eq!(done.state, DispatchState::Responded);
    let resp = done.disposition.response().unwrap();
    assert_eq!(resp.status, 404);
    assert_eq!(resp.body, json!({"error": "Not Found", "status": 404}));

    let entry = sink.last().unwrap();
    assert_eq!(entry.kind, FailureKind::NoRouteMatch);
    assert_eq!(entry.status, 404);
    assert!(!entry.called);
    assert!(entry.route.is_none());
}

#[test]
fn test_typed_capture_mismatch_is_400() {
    let (mut b, sink) = builder();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    b.route(RouteDecl::get(
        "/items/{id:int}",
        immediate(move |req| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(HandlerResponse::ok(json!({"id": req.param_i64("id")})))
        }),
    ))
    .unwrap();
    let app = b.build();

    let done = dispatch(&app, IncomingRequest::get("/items/abc"));
    assert_eq!(done.disposition.status(), Some(400));
    assert!(!done.called);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(sink.last().unwrap().kind, FailureKind::ParameterValidation);

    let done = dispatch(&app, IncomingRequest::get("/items/42"));
    assert_eq!(done.disposition.response().unwrap().body, json!({"id": 42}));
}

#[test]
fn test_method_not_allowed_carries_allow_header() {
    let (mut b, _sink) = builder();
    b.route(RouteDecl::get("/things", immediate(|_req| Ok(HandlerResponse::ok(json!([]))))))
        .unwrap()
        .route(RouteDecl::post("/things", immediate(|_req| Ok(HandlerResponse::empty(201)))))
        .unwrap();
    b.load_errors(ErrorTarget::App, [(ErrorKey::Status(405), tagged("app-405"))])
        .unwrap();
    let app = b.build();

    let done = dispatch(&app, IncomingRequest::new(Method::DELETE, "/things"));
    let resp = done.disposition.response().unwrap();
    assert_eq!(resp.status, 405);
    assert_eq!(resp.body["tag"], "app-405");
    let allow = resp.get_header("allow").unwrap();
    assert!(allow.contains("GET") && allow.contains("POST"));
    assert!(!done.called);
}

#[test]
fn test_handler_error_uses_registered_handler() {
    let (mut b, sink) = builder();
    b.route(RouteDecl::get(
        "/admin",
        immediate(|_req| Err(HandlerError::forbidden("not an admin"))),
    ))
    .unwrap();
    b.load_errors(ErrorTarget::App, [(ErrorKey::Status(403), tagged("forbidden"))])
        .unwrap();
    let app = b.build();

    let done = dispatch(&app, IncomingRequest::get("/admin"));
    assert!(done.called);
    let resp = done.disposition.response().unwrap();
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["tag"], "forbidden");

    let entry = sink.last().unwrap();
    assert_eq!(entry.kind, FailureKind::HandlerRaised);
    assert!(entry.called);
    assert!(!entry.error_handler_failed);
    assert_eq!(entry.route.as_deref(), Some("/admin"));
}

#[test]
fn test_route_handler_shadows_app_handler() {
    let (mut b, _sink) = builder();
    b.route(
        RouteDecl::get("/a", immediate(|_req| Err(HandlerError::not_found("gone"))))
            .error(404, tagged("route")),
    )
    .unwrap()
    .route(RouteDecl::get("/b", immediate(|_req| Err(HandlerError::not_found("gone")))))
    .unwrap();
    b.load_errors(ErrorTarget::App, [(ErrorKey::Status(404), tagged("app"))])
        .unwrap();
    let app = b.build();

    let a = dispatch(&app, IncomingRequest::get("/a"));
    assert_eq!(a.disposition.response().unwrap().body["tag"], "route");
    let b = dispatch(&app, IncomingRequest::get("/b"));
    assert_eq!(b.disposition.response().unwrap().body["tag"], "app");
}

#[test]
fn test_fallback_handler_covers_unregistered_statuses() {
    let (mut b, _sink) = builder();
    b.route(RouteDecl::get(
        "/teapot",
        immediate(|_req| Err(HandlerError::with_status(418, "short and stout"))),
    ))
    .unwrap();
    b.load_errors(ErrorTarget::App, [(ErrorKey::Fallback, tagged("fallback"))])
        .unwrap();
    let app = b.build();

    let resp = dispatch(&app, IncomingRequest::get("/teapot")).disposition;
    let resp = resp.response().unwrap();
    assert_eq!(resp.status, 418);
    assert_eq!(resp.body["tag"], "fallback");
}

#[test]
fn test_failing_app_error_handler_yields_bare_500() {
    let (mut b, sink) = builder();
    b.route(RouteDecl::get("/boom", immediate(|_req| Err(HandlerError::forbidden("no")))))
        .unwrap();
    b.load_errors(ErrorTarget::App, [(ErrorKey::Status(403), failing())])
        .unwrap();
    let app = b.build();

    let done = dispatch(&app, IncomingRequest::get("/boom"));
    let resp = done.disposition.response().unwrap();
    assert_eq!(resp.status, 500);
    assert_eq!(resp.body, json!({"error": "Internal Server Error", "status": 500}));

    let entry = sink.last().unwrap();
    assert!(entry.error_handler_failed);
    assert_eq!(entry.status, 500);
    assert_eq!(entry.kind, FailureKind::ErrorHandlerFailure);
    assert!(entry.detail.contains("handler_raised 403"));
    assert!(entry.detail.contains("error handler broke"));
}

#[test]
fn test_panicking_error_handler_yields_bare_500() {
    let (mut b, sink) = builder();
    b.route(RouteDecl::get("/boom", immediate(|_req| Err(HandlerError::bad_request("x")))))
        .unwrap();
    b.load_errors(
        ErrorTarget::App,
        [(ErrorKey::Status(400), error_handler(|_ctx| panic!("error handler panic")))],
    )
    .unwrap();
    let app = b.build();

    let done = dispatch(&app, IncomingRequest::get("/boom"));
    assert_eq!(done.disposition.status(), Some(500));
    assert!(sink.last().unwrap().error_handler_failed);
}

#[test]
fn test_failing_route_error_handler_falls_back_to_app_scope() {
    let (mut b, sink) = builder();
    b.route(
        RouteDecl::get("/r", immediate(|_req| Err(HandlerError::forbidden("no"))))
            .error(403, failing()),
    )
    .unwrap();
    b.load_errors(ErrorTarget::App, [(ErrorKey::Status(403), tagged("app"))])
        .unwrap();
    let app = b.build();

    let done = dispatch(&app, IncomingRequest::get("/r"));
    let resp = done.disposition.response().unwrap();
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["tag"], "app");
    let entry = sink.last().unwrap();
    assert!(entry.error_handler_failed);
    assert_eq!(entry.kind, FailureKind::HandlerRaised);
}

#[test]
fn test_failing_route_error_handler_without_app_handler_uses_default() {
    let (mut b, _sink) = builder();
    b.route(
        RouteDecl::get("/r", immediate(|_req| Err(HandlerError::forbidden("no"))))
            .error(403, failing()),
    )
    .unwrap();
    let app = b.build();

    let resp = dispatch(&app, IncomingRequest::get("/r")).disposition;
    let resp = resp.response().unwrap();
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["error"], "Forbidden");
}

#[test]
fn test_both_scopes_failing_yields_bare_500() {
    let (mut b, sink) = builder();
    b.route(
        RouteDecl::get("/r", immediate(|_req| Err(HandlerError::forbidden("no"))))
            .error(403, failing()),
    )
    .unwrap();
    b.load_errors(ErrorTarget::App, [(ErrorKey::Status(403), failing())])
        .unwrap();
    let app = b.build();

    let resp = dispatch(&app, IncomingRequest::get("/r")).disposition;
    assert_eq!(resp.response().unwrap().body, json!({"error": "Internal Server Error", "status": 500}));
    let entry = sink.last().unwrap();
    assert_eq!(entry.kind, FailureKind::ErrorHandlerFailure);
    assert_eq!(entry.status, 500);
}

#[test]
fn test_error_handler_status_is_forced() {
    let (mut b, _sink) = builder();
    b.route(RouteDecl::get("/x", immediate(|_req| Err(HandlerError::not_found("x")))))
        .unwrap();
    b.load_errors(
        ErrorTarget::App,
        [(ErrorKey::Status(404), error_handler(|_ctx| Ok(HandlerResponse::ok(json!("fine")))))],
    )
    .unwrap();
    let app = b.build();

    let resp = dispatch(&app, IncomingRequest::get("/x")).disposition;
    assert_eq!(resp.status(), Some(404));
}

#[test]
fn test_handler_panic_becomes_500() {
    let (mut b, sink) = builder();
    b.route(RouteDecl::get("/panic", immediate(|_req| panic!("handler exploded"))))
        .unwrap();
    let app = b.with_config(AppConfig { dev: true, ..AppConfig::default() }).build();

    let done = dispatch(&app, IncomingRequest::get("/panic"));
    let resp = done.disposition.response().unwrap();
    assert_eq!(resp.status, 500);
    assert!(done.called);
    assert!(resp.body["detail"].as_str().unwrap().contains("handler exploded"));
    assert_eq!(sink.last().unwrap().kind, FailureKind::HandlerRaised);
}

#[test]
fn test_detail_hidden_by_default() {
    let (mut b, _sink) = builder();
    b.route(RouteDecl::get("/panic", immediate(|_req| panic!("secret"))))
        .unwrap();
    let app = b.build();

    let resp = dispatch(&app, IncomingRequest::get("/panic")).disposition;
    let resp = resp.response().unwrap();
    assert_eq!(resp.body, json!({"error": "Internal Server Error", "status": 500}));
}

#[test]
fn test_malformed_response_is_500() {
    let (mut b, sink) = builder();
    b.route(RouteDecl::get("/bad", immediate(|_req| Ok(HandlerResponse::empty(99)))))
        .unwrap()
        .route(RouteDecl::get(
            "/bad-header",
            immediate(|_req| Ok(HandlerResponse::ok(json!({})).with_header("bad header", "x"))),
        ))
        .unwrap();
    let app = b.build();

    assert_eq!(dispatch(&app, IncomingRequest::get("/bad")).disposition.status(), Some(500));
    assert_eq!(sink.last().unwrap().kind, FailureKind::MalformedHandlerResult);
    assert_eq!(
        dispatch(&app, IncomingRequest::get("/bad-header")).disposition.status(),
        Some(500)
    );
}

#[test]
fn test_unclassified_error_is_500() {
    let (mut b, _sink) = builder();
    b.route(RouteDecl::get(
        "/io",
        immediate(|_req| {
            std::fs::read_to_string("/definitely/not/here")?;
            Ok(HandlerResponse::empty(204))
        }),
    ))
    .unwrap();
    let app = b.build();

    assert_eq!(dispatch(&app, IncomingRequest::get("/io")).disposition.status(), Some(500));
}

#[test]
fn test_suspended_handler_success() {
    let (mut b, _sink) = builder();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    b.route(
        RouteDecl::get(
            "/slow",
            suspended(move |req| {
                counter.fetch_add(1, Ordering::SeqCst);
                may::coroutine::sleep(Duration::from_millis(10));
                Ok(HandlerResponse::ok(json!({"ms": req.param_i64("ms")})))
            }),
        )
        .param(ParamSpec::query("ms", ParamType::Int).default_value(json!(10))),
    )
    .unwrap();
    let app = b.build();

    let done = dispatch(&app, IncomingRequest::get("/slow"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(done.state, DispatchState::Responded);
    match done.disposition {
        Disposition::Respond(resp) => assert_eq!(resp.body, json!({"ms": 10})),
        other => panic!("expected a response, got {other:?}"),
    }
}

#[test]
fn test_suspended_handler_error_and_panic() {
    let (mut b, _sink) = builder();
    b.route(RouteDecl::get("/err", suspended(|_req| Err(HandlerError::forbidden("later")))))
        .unwrap()
        .route(RouteDecl::get("/panic", suspended(|_req| panic!("inside coroutine"))))
        .unwrap();
    let app = b.build();

    assert_eq!(dispatch(&app, IncomingRequest::get("/err")).disposition.status(), Some(403));
    let done = dispatch(&app, IncomingRequest::get("/panic"));
    assert_eq!(done.disposition.status(), Some(500));
    assert!(done.called);
}

#[test]
fn test_query_and_body_binding() {
    let (mut b, _sink) = builder();
    b.route(
        RouteDecl::post(
            "/items",
            immediate(|req| {
                Ok(HandlerResponse::json(
                    201,
                    json!({"name": req.param_str("name"), "draft": req.param("draft")}),
                ))
            }),
        )
        .param(ParamSpec::body("name", ParamType::Str))
        .param(ParamSpec::query("draft", ParamType::Bool).default_value(json!(false))),
    )
    .unwrap();
    let app = b.build();

    let ok = dispatch(
        &app,
        IncomingRequest::new(Method::POST, "/items")
            .with_query("draft", "true")
            .with_body(json!({"name": "widget"})),
    );
    assert_eq!(ok.disposition.response().unwrap().body, json!({"name": "widget", "draft": true}));

    let missing = dispatch(&app, IncomingRequest::new(Method::POST, "/items").with_body(json!({})));
    assert_eq!(missing.disposition.status(), Some(400));
    assert!(!missing.called);

    let wrong_type = dispatch(
        &app,
        IncomingRequest::new(Method::POST, "/items").with_body(json!({"name": 5})),
    );
    assert_eq!(wrong_type.disposition.status(), Some(400));
}

#[test]
fn test_request_id_is_propagated() {
    let (mut b, _sink) = builder();
    b.route(RouteDecl::get(
        "/id",
        immediate(|req| Ok(HandlerResponse::ok(json!({"id": req.request_id.to_string()})))),
    ))
    .unwrap();
    let app = b.build();

    let id = view_dispatch::dispatcher::RequestId::new();
    let done = dispatch(&app, IncomingRequest::get("/id").with_request_id(id));
    assert_eq!(done.request_id, id);
    assert_eq!(done.disposition.response().unwrap().body["id"], id.to_string());
}

#[test]
fn test_transport_rejection_uses_registered_400_handler() {
    let (mut b, sink) = builder();
    b.route(RouteDecl::post("/items", immediate(|_req| Ok(HandlerResponse::empty(201)))))
        .unwrap();
    b.load_errors(ErrorTarget::App, [(ErrorKey::Status(400), tagged("bad-request"))])
        .unwrap();
    let app = b.build();

    let req = IncomingRequest::new(Method::POST, "/items");
    let done = Dispatcher::new(Arc::clone(&app))
        .reject(&req, Failure::malformed_request("request body could not be read"));
    assert!(!done.called);
    assert_eq!(done.state, DispatchState::Responded);
    let resp = done.disposition.response().unwrap();
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["tag"], "bad-request");

    let entry = sink.last().unwrap();
    assert_eq!(entry.kind, FailureKind::ParameterValidation);
    assert_eq!(entry.status, 400);
    assert_eq!(entry.path, "/items");
    assert!(entry.route.is_none());
    assert!(entry.detail.contains("could not be read"));
}

#[test]
fn test_middleware_short_circuit_skips_handler() {
    let (mut b, sink) = builder();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    b.route(
        RouteDecl::get(
            "/admin",
            immediate(move |_req| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(HandlerResponse::ok(json!({"admin": true})))
            }),
        )
        .middleware(RequireHeader::new("x-api-key", "secret"))
        .middleware(StaticHeader::new("x-served-by", "view")),
    )
    .unwrap();
    let app = b.build();

    let done = dispatch(&app, IncomingRequest::get("/admin"));
    let resp = done.disposition.response().unwrap();
    assert_eq!(resp.status, 403);
    assert_eq!(resp.get_header("x-served-by"), Some("view"));
    assert!(!done.called);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(sink.entries().is_empty());

    let done = dispatch(&app, IncomingRequest::get("/admin").with_header("X-Api-Key", "secret"));
    let resp = done.disposition.response().unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.get_header("x-served-by"), Some("view"));
    assert!(done.called);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

struct Exploding;

impl Middleware for Exploding {
    fn before(&self, _req: &HandlerRequest) -> Option<HandlerResponse> {
        panic!("middleware exploded");
    }
}

#[test]
fn test_panicking_middleware_becomes_500() {
    let (mut b, sink) = builder();
    b.route(RouteDecl::get("/x", immediate(|_req| Ok(HandlerResponse::empty(204)))).middleware(Exploding))
        .unwrap();
    let app = b.build();

    let done = dispatch(&app, IncomingRequest::get("/x"));
    assert_eq!(done.disposition.status(), Some(500));
    assert!(!done.called);
    assert_eq!(sink.last().unwrap().kind, FailureKind::HandlerRaised);
}

#[test]
fn test_cache_rate_reuses_response_then_recomputes() {
    let (mut b, _sink) = builder();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    b.route(
        RouteDecl::get(
            "/report/{year:int}",
            immediate(move |req| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(HandlerResponse::ok(json!({"year": req.param_i64("year"), "run": n})))
            }),
        )
        .cache_rate(2),
    )
    .unwrap();
    let app = b.build();

    let first = dispatch(&app, IncomingRequest::get("/report/2024"));
    assert!(first.called);
    for _ in 0..2 {
        let done = dispatch(&app, IncomingRequest::get("/report/2024"));
        assert!(!done.called);
        assert_eq!(done.state, DispatchState::Responded);
        assert_eq!(done.disposition.response().unwrap().body["run"], 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let done = dispatch(&app, IncomingRequest::get("/report/2024"));
    assert_eq!(done.disposition.response().unwrap().body["run"], 2);

    let other = dispatch(&app, IncomingRequest::get("/report/2025"));
    assert!(other.called);
    assert_eq!(other.disposition.response().unwrap().body["year"], 2025);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_cache_keeps_failures_out() {
    let (mut b, _sink) = builder();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    b.route(
        RouteDecl::get(
            "/flaky",
            immediate(move |_req| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(HandlerError::with_status(503, "down"))
            }),
        )
        .cache_rate(5),
    )
    .unwrap();
    let app = b.build();

    for _ in 0..3 {
        assert_eq!(dispatch(&app, IncomingRequest::get("/flaky")).disposition.status(), Some(503));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_context_param_receives_request_metadata() {
    let (mut b, _sink) = builder();
    b.route(
        RouteDecl::get("/whoami/{name}", immediate(|req| Ok(HandlerResponse::ok(req.param("ctx").cloned().unwrap_or_default()))))
            .param(ParamSpec::context("ctx")),
    )
    .unwrap();
    let app = b.build();

    let req = IncomingRequest::get("/whoami/ada")
        .with_query("tab", "1")
        .with_query("tab", "2")
        .with_header("User-Agent", "tests");
    let done = Dispatcher::new(Arc::clone(&app)).dispatch(req, &CancelToken::new());
    let ctx = &done.disposition.response().unwrap().body;
    assert_eq!(ctx["method"], "GET");
    assert_eq!(ctx["path"], "/whoami/ada");
    assert_eq!(ctx["route"], "/whoami/{name}");
    assert_eq!(ctx["query"]["tab"], "2");
    assert_eq!(ctx["headers"]["user-agent"], "tests");
    assert_eq!(ctx["request_id"], done.request_id.to_string());
}
