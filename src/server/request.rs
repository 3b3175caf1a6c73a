use std::io::Read;
use std::sync::Arc;

use http::Method;
use may_minihttp::Request;
use serde_json::Value;
use tracing::{debug, warn};

use crate::dispatcher::{HeaderVec, IncomingRequest, RequestId};
use crate::error::Failure;

/// Parse the query string of a URL path into ordered pairs.
///
/// Names and values are URL-decoded. Repeated keys are kept in request
/// order; binding resolves them last-write-wins.
#[must_use]
pub fn parse_query_params(path: &str) -> Vec<(String, String)> {
    match path.split_once('?') {
        Some((_, query)) => url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        None => Vec::new(),
    }
}

/// Decode a request body. JSON when it parses, a JSON string otherwise.
#[must_use]
pub fn decode_body(raw: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
}

/// A request the transport could read but not decode.
///
/// `request` carries whatever could be recovered (an unparseable method is
/// recorded as `GET`; the raw method is in the failure detail) so the
/// rejection can still be rendered and reported.
#[derive(Debug)]
pub struct RejectedRequest {
    pub request: IncomingRequest,
    pub failure: Failure,
}

/// Convert a `may_minihttp::Request` into an [`IncomingRequest`].
///
/// # Errors
///
/// A [`RejectedRequest`] with a 400 `ParameterValidation` failure when the
/// method is not a valid HTTP token or the body is not valid UTF-8.
pub fn parse_request(req: Request) -> Result<IncomingRequest, RejectedRequest> {
    let raw_method = req.method().to_string();
    let method = raw_method.parse::<Method>().ok();
    let raw_path = req.path().to_string();
    let path = raw_path.split('?').next().unwrap_or("/").to_string();

    let headers: HeaderVec = req
        .headers()
        .iter()
        .map(|h| {
            (
                Arc::from(h.name.to_ascii_lowercase().as_str()),
                String::from_utf8_lossy(h.value).into_owned(),
            )
        })
        .collect();

    let request_id = RequestId::from_header_or_new(
        headers
            .iter()
            .find(|(k, _)| k.as_ref() == "x-request-id")
            .map(|(_, v)| v.as_str()),
    );

    let query = parse_query_params(&raw_path);

    let mut raw_body = String::new();
    let body = req.body().read_to_string(&mut raw_body).map(|_| decode_body(&raw_body));

    let mut incoming = IncomingRequest {
        method: method.clone().unwrap_or(Method::GET),
        path,
        query,
        headers,
        body: None,
        request_id: Some(request_id),
    };

    if method.is_none() {
        warn!(request_id = %request_id, method = %raw_method, "Unparseable request method");
        return Err(RejectedRequest {
            request: incoming,
            failure: Failure::malformed_request(format!("unparseable request method {raw_method:?}")),
        });
    }

    match body {
        Ok(body) => incoming.body = body,
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Request body is not valid UTF-8");
            return Err(RejectedRequest {
                request: incoming,
                failure: Failure::malformed_request(format!("request body could not be read: {e}")),
            });
        }
    }

    debug!(
        request_id = %request_id,
        method = %incoming.method,
        path = %incoming.path,
        headers_count = incoming.headers.len(),
        query_count = incoming.query.len(),
        body_bytes = raw_body.len(),
        "HTTP request parsed"
    );

    Ok(incoming)
}
