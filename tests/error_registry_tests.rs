//! Error handler registration through the application builder

mod common;

use std::sync::Arc;

use serde_json::json;
use view_dispatch::app::ErrorTarget;
use view_dispatch::dispatcher::{immediate, HandlerError, HandlerResponse, IncomingRequest};
use view_dispatch::error::RegistrationError;
use view_dispatch::registry::{error_handler, ErrorHandlerRef, ErrorKey, ErrorScope};
use view_dispatch::router::RouteDecl;
use view_dispatch::status::{classify, StatusIndex};

use common::app::{builder, dispatch};

fn tagged(tag: &'static str) -> ErrorHandlerRef {
    error_handler(move |ctx| Ok(HandlerResponse::json(ctx.status, json!({ "tag": tag }))))
}

#[test]
fn test_loading_same_mapping_twice_is_stable() {
    let (mut b, _sink) = builder();
    let handler = tagged("once");
    let mapping = || [(ErrorKey::Status(404), Arc::clone(&handler))];
    b.load_errors(ErrorTarget::App, mapping()).unwrap();
    b.load_errors(ErrorTarget::App, mapping()).unwrap();
    let app = b.build();

    let (resolved, scope) = app.errors().resolve_app(404).unwrap();
    assert!(Arc::ptr_eq(resolved, &handler));
    assert_eq!(scope, ErrorScope::App);
    assert_eq!(app.errors().app().len(), 1);
}

#[test]
fn test_invalid_status_rejects_whole_mapping() {
    let (mut b, _sink) = builder();
    let err = b
        .load_errors(
            ErrorTarget::App,
            [
                (ErrorKey::Status(404), tagged("ok")),
                (ErrorKey::Status(302), tagged("bad")),
            ],
        )
        .unwrap_err();
    assert_eq!(err, RegistrationError::InvalidErrorStatus(302));
    assert!(b.build().errors().app().is_empty());
}

#[test]
fn test_route_target_must_exist() {
    let (mut b, _sink) = builder();
    let err = b
        .load_errors(ErrorTarget::Route("/missing"), [(ErrorKey::Status(404), tagged("x"))])
        .unwrap_err();
    assert_eq!(err, RegistrationError::UnknownRoute("/missing".to_string()));
}

#[test]
fn test_route_target_installs_route_scope() {
    let (mut b, _sink) = builder();
    b.route(RouteDecl::get("/r/{id}", immediate(|_req| Err(HandlerError::with_status(503, "busy")))))
        .unwrap();
    b.load_errors(ErrorTarget::Route("/r/{id}"), [(ErrorKey::Status(503), tagged("route-503"))])
        .unwrap();
    let app = b.build();

    let slots = app.route("/r/{id}").unwrap().errors();
    assert_eq!(slots.registered().collect::<Vec<_>>(), vec![503]);
    let (_, scope) = app.errors().resolve(Some(slots), 503).unwrap();
    assert_eq!(scope, ErrorScope::Route);

    let resp = dispatch(&app, IncomingRequest::get("/r/1")).disposition;
    let resp = resp.response().unwrap();
    assert_eq!(resp.status, 503);
    assert_eq!(resp.body["tag"], "route-503");
}

#[test]
fn test_every_error_status_has_a_slot() {
    let (mut b, _sink) = builder();
    let all: Vec<(ErrorKey, ErrorHandlerRef)> =
        (400..600).map(|s| (ErrorKey::Status(s), tagged("all"))).collect();
    b.load_errors(ErrorTarget::App, all).unwrap();
    let app = b.build();

    assert_eq!(app.errors().app().len(), 200);
    for status in 400..600u16 {
        assert!(app.errors().resolve_app(status).is_some(), "no slot for {status}");
        assert_ne!(classify(status), StatusIndex::Default);
    }
    assert!(app.errors().resolve_app(600).is_none());
}
