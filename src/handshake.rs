//! WebSocket upgrade guard (RFC 6455 Section 4.2).
//!
//! Validates an upgrade request against a route's [`WebSocketSpec`], computes
//! `Sec-WebSocket-Accept`, and builds either the `101 Switching Protocols`
//! response or the fixed rejection for a failed handshake.
//!
//! A rejected handshake never goes through the error registry. The
//! connection is torn down after the rejection is written.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use http::Method;
use serde_json::Value;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::dispatcher::{HandlerResponse, HeaderVec};
use crate::router::WebSocketSpec;

/// RFC 6455 magic GUID concatenated with the client key for Sec-WebSocket-Accept.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this guard accepts.
pub const WS_VERSION: &str = "13";

/// Why a handshake was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("upgrade requests must use GET, got {0}")]
    BadMethod(Method),
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error("Upgrade header does not name websocket")]
    InvalidUpgrade,
    #[error("Connection header does not contain upgrade")]
    InvalidConnection,
    #[error("Sec-WebSocket-Key is not a base64 encoded 16-byte nonce")]
    InvalidKey,
    #[error("unsupported Sec-WebSocket-Version {0:?}")]
    UnsupportedVersion(String),
    #[error("route {0} does not accept websocket upgrades")]
    NotUpgradable(String),
    #[error("none of the offered subprotocols {offered:?} is supported")]
    SubprotocolMismatch { offered: Vec<String> },
}

impl HandshakeError {
    /// 426 for a version the guard cannot speak, 400 for everything else.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            HandshakeError::UnsupportedVersion(_) => 426,
            _ => 400,
        }
    }

    /// Headers of the rejection response.
    #[must_use]
    pub fn headers(&self) -> HeaderVec {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("connection"), "close".to_string()));
        if matches!(self, HandshakeError::UnsupportedVersion(_)) {
            headers.push((Arc::from("sec-websocket-version"), WS_VERSION.to_string()));
        }
        headers
    }

    /// Fixed rejection response: status and headers only, no body.
    #[must_use]
    pub fn rejection(&self) -> HandlerResponse {
        HandlerResponse::new(self.status(), self.headers(), Value::Null)
    }
}

/// A validated handshake, ready to be accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub accept_key: String,
    /// Subprotocol selected for the connection, if any was negotiated
    pub protocol: Option<String>,
}

impl Handshake {
    /// The `101 Switching Protocols` response.
    #[must_use]
    pub fn accept_response(&self) -> HandlerResponse {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("upgrade"), "websocket".to_string()));
        headers.push((Arc::from("connection"), "Upgrade".to_string()));
        headers.push((Arc::from("sec-websocket-accept"), self.accept_key.clone()));
        if let Some(protocol) = &self.protocol {
            headers.push((Arc::from("sec-websocket-protocol"), protocol.clone()));
        }
        HandlerResponse::new(101, headers, Value::Null)
    }
}

fn find_header<'h>(headers: &'h HeaderVec, name: &str) -> Option<&'h str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// A request carrying `Upgrade` or `Sec-WebSocket-Key` is treated as a
/// handshake attempt, valid or not.
#[must_use]
pub fn is_upgrade_request(headers: &HeaderVec) -> bool {
    find_header(headers, "upgrade").is_some() || find_header(headers, "sec-websocket-key").is_some()
}

/// Compute the `Sec-WebSocket-Accept` value per RFC 6455 Section 4.2.2.
#[must_use]
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Pick the first subprotocol, in server preference order, that the client
/// offered.
///
/// # Errors
///
/// [`HandshakeError::SubprotocolMismatch`] when the client offered
/// subprotocols, the route supports some, and they do not intersect.
pub fn negotiate(
    offered: Option<&str>,
    spec: &WebSocketSpec,
) -> Result<Option<String>, HandshakeError> {
    let offered: Vec<String> = offered
        .map(|v| {
            v.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if offered.is_empty() || spec.subprotocols.is_empty() {
        return Ok(None);
    }

    spec.subprotocols
        .iter()
        .find(|p| offered.iter().any(|o| o == *p))
        .map(|p| Some(p.clone()))
        .ok_or(HandshakeError::SubprotocolMismatch { offered })
}

/// Validate an upgrade request per RFC 6455 Section 4.2.1.
///
/// # Errors
///
/// The first [`HandshakeError`] found, checked in this order: method,
/// `Upgrade`, `Connection`, `Sec-WebSocket-Key`, `Sec-WebSocket-Version`,
/// subprotocol negotiation.
pub fn validate(
    method: &Method,
    headers: &HeaderVec,
    spec: &WebSocketSpec,
) -> Result<Handshake, HandshakeError> {
    if method != Method::GET {
        return Err(HandshakeError::BadMethod(method.clone()));
    }

    match find_header(headers, "upgrade") {
        None => return Err(HandshakeError::MissingHeader("Upgrade")),
        Some(v) if !has_token(v, "websocket") => return Err(HandshakeError::InvalidUpgrade),
        Some(_) => {}
    }

    match find_header(headers, "connection") {
        None => return Err(HandshakeError::MissingHeader("Connection")),
        Some(v) if !has_token(v, "upgrade") => return Err(HandshakeError::InvalidConnection),
        Some(_) => {}
    }

    let key = find_header(headers, "sec-websocket-key")
        .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))?
        .trim();
    match BASE64.decode(key) {
        Ok(nonce) if nonce.len() == 16 => {}
        _ => return Err(HandshakeError::InvalidKey),
    }

    match find_header(headers, "sec-websocket-version").map(str::trim) {
        None => return Err(HandshakeError::MissingHeader("Sec-WebSocket-Version")),
        Some(WS_VERSION) => {}
        Some(other) => return Err(HandshakeError::UnsupportedVersion(other.to_string())),
    }

    let protocol = negotiate(find_header(headers, "sec-websocket-protocol"), spec)?;

    Ok(Handshake {
        accept_key: compute_accept_key(key),
        protocol,
    })
}
