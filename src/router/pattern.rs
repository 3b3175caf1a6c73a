//! Path pattern compilation and structural matching.
//!
//! A pattern is a `/`-separated list of literal segments and typed captures:
//!
//! - `{name}` captures one segment as a string
//! - `{name: type}` captures one segment converted to `type`
//!   (`str`, `int`, `float`, `bool`)
//!
//! Structural matching only looks at the segment count and the literals.
//! Capture types are applied afterwards, so `/items/{id:int}` matches
//! `/items/abc` structurally and the conversion failure becomes a 400, not a
//! 404.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use smallvec::SmallVec;

use super::route::ParamType;
use crate::error::RegistrationError;

/// Captured raw segments for one match. Inline for the common case.
pub type CaptureVec<'p> = SmallVec<[&'p str; super::MAX_INLINE_PARAMS]>;

static CAPTURE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^\{\s*(\w+)\s*(?::\s*(\w+)\s*)?\}$").expect("capture regex is valid")
});

/// One compiled path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Capture {
        name: Arc<str>,
        /// `None` when the pattern did not name a type (`{name}`)
        ty: Option<ParamType>,
    },
}

impl Segment {
    #[must_use]
    pub fn is_capture(&self) -> bool {
        matches!(self, Segment::Capture { .. })
    }
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: Arc<str>,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::InvalidPath`] for a path that does not start with
    /// `/`, ends with `/` (other than the root), contains an empty segment, a
    /// malformed capture, or starts with a capture.
    /// [`RegistrationError::UnsupportedType`] when a capture names an unknown
    /// type.
    pub fn parse(path: &str) -> Result<Self, RegistrationError> {
        let invalid = |reason| RegistrationError::InvalidPath {
            path: path.to_string(),
            reason,
        };

        if !path.starts_with('/') {
            return Err(invalid("paths must start with a slash"));
        }
        if path == "/" {
            return Ok(Self {
                raw: Arc::from(path),
                segments: Vec::new(),
            });
        }
        if path.ends_with('/') {
            return Err(invalid("paths must not end with a slash"));
        }

        let mut segments = Vec::with_capacity(path.matches('/').count());
        for (index, part) in path[1..].split('/').enumerate() {
            if part.is_empty() {
                return Err(invalid("paths must not contain empty segments"));
            }

            if !part.contains('{') && !part.contains('}') {
                segments.push(Segment::Literal(part.to_string()));
                continue;
            }

            let caps = CAPTURE
                .captures(part)
                .ok_or_else(|| invalid("malformed path parameter"))?;
            if index == 0 {
                return Err(invalid("first segment must not be a path parameter"));
            }

            let name = caps.get(1).map_or("", |m| m.as_str());
            let ty = match caps.get(2) {
                Some(type_name) => Some(ParamType::from_name(type_name.as_str()).ok_or_else(
                    || RegistrationError::UnsupportedType {
                        pattern: path.to_string(),
                        param: name.to_string(),
                        type_name: type_name.as_str().to_string(),
                    },
                )?),
                None => None,
            };

            segments.push(Segment::Capture {
                name: Arc::from(name),
                ty,
            });
        }

        Ok(Self {
            raw: Arc::from(path),
            segments,
        })
    }

    /// The pattern as written at registration.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Shared handle to the raw pattern (cheap to clone into requests).
    #[must_use]
    pub fn raw(&self) -> &Arc<str> {
        &self.raw
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Capture names and their pattern-level types, in path order.
    pub fn captures(&self) -> impl Iterator<Item = (&Arc<str>, Option<ParamType>)> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Capture { name, ty } => Some((name, *ty)),
            Segment::Literal(_) => None,
        })
    }

    /// Structural match. Returns the raw captured segments in path order.
    #[must_use]
    pub fn matches<'p>(&self, path: &'p str) -> Option<CaptureVec<'p>> {
        let rest = path.strip_prefix('/')?;
        let mut captured = CaptureVec::new();

        if rest.is_empty() {
            return self.segments.is_empty().then_some(captured);
        }

        let mut parts = rest.split('/');
        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                Segment::Capture { .. } => {
                    if part.is_empty() {
                        return None;
                    }
                    captured.push(part);
                }
            }
        }

        parts.next().is_none().then_some(captured)
    }

    /// Two patterns with the same shape can never be told apart by the path
    /// alone: equal length, equal literals, captures at the same positions.
    #[must_use]
    pub fn same_shape(&self, other: &PathPattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| match (a, b) {
                    (Segment::Literal(x), Segment::Literal(y)) => x == y,
                    (Segment::Capture { .. }, Segment::Capture { .. }) => true,
                    _ => false,
                })
    }
}
