use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use may_minihttp::Response;
use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::warn;

use crate::dispatcher::HandlerResponse;
use crate::status::status_reason;

/// Headers the transport writes itself.
const TRANSPORT_HEADERS: [&str; 2] = ["content-length", "date"];

/// Distinct header lines kept for the life of the process.
pub const MAX_HEADER_LINES: usize = 4096;

/// `may_minihttp` only accepts `&'static str` header lines. Each distinct
/// line is leaked once and reused; the table stops growing at its capacity.
pub struct HeaderLines {
    lines: Mutex<HashSet<&'static str>>,
    capacity: usize,
}

impl HeaderLines {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(HashSet::new()),
            capacity,
        }
    }

    /// The interned `name: value` line, or `None` once the table is full
    /// and the line is new.
    pub fn intern(&self, name: &str, value: &str) -> Option<&'static str> {
        let line = format!("{name}: {value}");
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = lines.get(line.as_str()) {
            return Some(*existing);
        }
        if lines.len() >= self.capacity {
            return None;
        }
        let leaked: &'static str = Box::leak(line.into_boxed_str());
        lines.insert(leaked);
        Some(leaked)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static HEADER_LINES: Lazy<HeaderLines> = Lazy::new(|| HeaderLines::with_capacity(MAX_HEADER_LINES));

/// Write a handler response: status line, headers, and body.
///
/// A string body is written as-is; any other non-null body is serialized as
/// JSON. A missing `content-type` is filled in to match. A header whose line
/// no longer fits in the intern table is dropped with a warning.
pub fn write_response(res: &mut Response, resp: HandlerResponse) {
    res.status_code(usize::from(resp.status), status_reason(resp.status));

    let mut has_content_type = false;
    for (name, value) in &resp.headers {
        if TRANSPORT_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        match HEADER_LINES.intern(name, value) {
            Some(line) => {
                has_content_type |= name.eq_ignore_ascii_case("content-type");
                res.header(line);
            }
            None => warn!(
                header = %name,
                capacity = MAX_HEADER_LINES,
                "Header line table full, header dropped"
            ),
        }
    }

    match resp.body {
        Value::Null => {}
        Value::String(s) => {
            if !has_content_type {
                res.header("Content-Type: text/plain; charset=utf-8");
            }
            res.body_vec(s.into_bytes());
        }
        other => {
            if !has_content_type {
                res.header("Content-Type: application/json");
            }
            res.body_vec(other.to_string().into_bytes());
        }
    }
}
