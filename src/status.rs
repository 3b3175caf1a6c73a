//! # Status Classifier
//!
//! Maps numeric HTTP status codes onto dense indices used by the
//! [`ErrorRegistry`](crate::registry::ErrorRegistry).
//!
//! The client (4xx) and server (5xx) error ranges are each 100 codes wide and
//! contiguous, so the "hash" is a direct offset from the start of the range.
//! This gives a collision-free perfect hash and O(1) handler lookup through
//! plain array indexing instead of a general hash map. Codes outside both
//! ranges are not hashed at all; they classify to [`StatusIndex::Default`].
//!
//! ```rust
//! use view_dispatch::status::{classify, hash_client_error, StatusIndex};
//!
//! assert_eq!(hash_client_error(404), Some(4));
//! assert_eq!(classify(503), StatusIndex::Server(3));
//! assert_eq!(classify(302), StatusIndex::Default);
//! assert_eq!(classify(404).status(), Some(404));
//! ```

/// First code of the client error range.
pub const CLIENT_ERROR_BASE: u16 = 400;
/// First code of the server error range.
pub const SERVER_ERROR_BASE: u16 = 500;
/// Number of slots in each error table.
pub const ERROR_TABLE_SIZE: usize = 100;

/// Dense lookup index derived from a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusIndex {
    /// Slot in the client error table (`status - 400`)
    Client(u8),
    /// Slot in the server error table (`status - 500`)
    Server(u8),
    /// Any status outside 400-599
    Default,
}

impl StatusIndex {
    /// Recover the status code this index was derived from.
    ///
    /// Returns `None` for [`StatusIndex::Default`], which many codes share.
    #[must_use]
    pub const fn status(self) -> Option<u16> {
        match self {
            StatusIndex::Client(i) => Some(CLIENT_ERROR_BASE + i as u16),
            StatusIndex::Server(i) => Some(SERVER_ERROR_BASE + i as u16),
            StatusIndex::Default => None,
        }
    }
}

/// Hash a 4xx status onto `[0, 99]`. `None` outside 400-499.
#[inline]
#[must_use]
pub const fn hash_client_error(status: u16) -> Option<u8> {
    if status >= CLIENT_ERROR_BASE && status < CLIENT_ERROR_BASE + ERROR_TABLE_SIZE as u16 {
        Some((status - CLIENT_ERROR_BASE) as u8)
    } else {
        None
    }
}

/// Hash a 5xx status onto `[0, 99]`. `None` outside 500-599.
#[inline]
#[must_use]
pub const fn hash_server_error(status: u16) -> Option<u8> {
    if status >= SERVER_ERROR_BASE && status < SERVER_ERROR_BASE + ERROR_TABLE_SIZE as u16 {
        Some((status - SERVER_ERROR_BASE) as u8)
    } else {
        None
    }
}

/// Classify any status code. Total: never fails, never panics.
#[inline]
#[must_use]
pub const fn classify(status: u16) -> StatusIndex {
    if let Some(i) = hash_client_error(status) {
        StatusIndex::Client(i)
    } else if let Some(i) = hash_server_error(status) {
        StatusIndex::Server(i)
    } else {
        StatusIndex::Default
    }
}

/// True when `status` lies in one of the two hashed error ranges.
#[inline]
#[must_use]
pub const fn is_error_status(status: u16) -> bool {
    !matches!(classify(status), StatusIndex::Default)
}

/// Canonical reason phrase for a status code.
///
/// Unknown codes get a phrase for their class so the status line is always
/// well formed.
#[must_use]
pub fn status_reason(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        418 => "I'm a teapot",
        422 => "Unprocessable Entity",
        426 => "Upgrade Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        100..=199 => "Informational",
        200..=299 => "Success",
        300..=399 => "Redirection",
        400..=499 => "Client Error",
        _ => "Server Error",
    }
}
