//! The demo application served by `view-dispatch serve`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::app::{AppBuilder, Application, ErrorTarget};
use crate::config::AppConfig;
use crate::dispatcher::{immediate, suspended, HandlerError, HandlerResponse, StaticHeader};
use crate::error::RegistrationError;
use crate::registry::{error_handler, ErrorContext, ErrorKey};
use crate::router::{ParamSpec, ParamType, RouteDecl};

/// Longest delay `/slow` accepts.
const MAX_SLOW_MS: i64 = 10_000;

fn not_found_page(ctx: &ErrorContext<'_>) -> Result<HandlerResponse, HandlerError> {
    Ok(HandlerResponse::json(
        404,
        json!({"error": "Not Found", "path": ctx.path, "request_id": ctx.request_id}),
    ))
}

fn fallback_page(ctx: &ErrorContext<'_>) -> Result<HandlerResponse, HandlerError> {
    let mut body = json!({"error": crate::status::status_reason(ctx.status), "status": ctx.status});
    if ctx.dev {
        body["detail"] = json!(ctx.detail);
    }
    Ok(HandlerResponse::json(ctx.status, body))
}

/// Build the demo application.
///
/// # Errors
///
/// Registration errors, which would indicate a bug in the route table below.
pub fn demo_app(config: AppConfig) -> Result<Arc<Application>, RegistrationError> {
    let mut builder = AppBuilder::new().with_config(config);

    builder
        .route(
            RouteDecl::get(
                "/",
                immediate(|_req| Ok(HandlerResponse::ok(json!({"service": "view-dispatch"})))),
            )
            .middleware(StaticHeader::new("x-powered-by", "view-dispatch"))
            .cache_rate(1000)
            .doc("Service index"),
        )?
        .route(
            RouteDecl::get(
                "/whoami",
                immediate(|req| Ok(HandlerResponse::ok(req.param("request").cloned().unwrap_or_default()))),
            )
            .param(ParamSpec::context("request"))
            .doc("Echo the request metadata"),
        )?
        .route(
            RouteDecl::get(
                "/items/{id:int}",
                immediate(|req| {
                    let id = req.param_i64("id").unwrap_or_default();
                    let limit = req.param_i64("limit").unwrap_or(10);
                    match id {
                        0 => Err(HandlerError::not_found(format!("item {id} does not exist"))),
                        403 => Err(HandlerError::forbidden("item is private")),
                        _ => Ok(HandlerResponse::ok(json!({"id": id, "limit": limit}))),
                    }
                }),
            )
            .param(ParamSpec::query("limit", ParamType::Int).default_value(json!(10)))
            .error(
                404,
                error_handler(|ctx| {
                    Ok(HandlerResponse::json(
                        404,
                        json!({"error": "No such item", "path": ctx.path}),
                    ))
                }),
            )
            .doc("Fetch one item"),
        )?
        .route(
            RouteDecl::post(
                "/items",
                immediate(|req| {
                    let name = req.param_str("name").unwrap_or_default().to_string();
                    Ok(HandlerResponse::json(201, json!({"name": name})))
                }),
            )
            .param(ParamSpec::body("name", ParamType::Str))
            .doc("Create an item"),
        )?
        .route(
            RouteDecl::get(
                "/slow",
                suspended(|req| {
                    let ms = req.param_i64("ms").unwrap_or(50).clamp(0, MAX_SLOW_MS);
                    may::coroutine::sleep(Duration::from_millis(ms.unsigned_abs()));
                    Ok(HandlerResponse::ok(json!({"slept_ms": ms})))
                }),
            )
            .param(ParamSpec::query("ms", ParamType::Int).default_value(json!(50)))
            .doc("Suspended handler that sleeps before answering"),
        )?
        .route(
            RouteDecl::websocket(
                "/ws",
                &["chat", "json"],
                immediate(|_req| Ok(HandlerResponse::empty(200))),
            )
            .doc("WebSocket upgrade endpoint"),
        )?;

    builder.load_errors(
        ErrorTarget::App,
        [
            (ErrorKey::Status(404), error_handler(not_found_page)),
            (ErrorKey::Fallback, error_handler(fallback_page)),
        ],
    )?;

    Ok(builder.build())
}
