//! Route declarations and compiled routes.
//!
//! Application code builds a [`RouteDecl`]; the [`RouteTable`](super::RouteTable)
//! compiles it into an immutable [`Route`] at registration time. All checks
//! that involve the handler's declared inputs happen there, never per request.

use std::fmt;
use std::sync::Arc;

use http::Method;
use serde::Serialize;
use serde_json::{Number, Value};
use smallvec::{smallvec, SmallVec};

use super::cache::ResponseCache;
use super::pattern::{PathPattern, Segment};
use super::ParamVec;
use crate::dispatcher::{Handler, Middleware};
use crate::error::{ParameterError, RegistrationError};
use crate::registry::{load_errors, ErrorHandlerRef, ErrorKey, ErrorSlots};

/// Where a parameter value is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamSource {
    Path,
    Query,
    Body,
    /// Request metadata (id, method, path, route, headers, query) as one object
    Context,
}

impl fmt::Display for ParamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParamSource::Path => "path",
            ParamSource::Query => "query",
            ParamSource::Body => "body",
            ParamSource::Context => "context",
        })
    }
}

/// Type constraint of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Str,
    Int,
    Float,
    Bool,
    /// Any JSON value; raw text that is not JSON stays a string
    Any,
}

impl ParamType {
    /// Resolve a type name used in a path capture.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "str" => Some(ParamType::Str),
            "int" => Some(ParamType::Int),
            "float" => Some(ParamType::Float),
            "bool" => Some(ParamType::Bool),
            "any" => Some(ParamType::Any),
            _ => None,
        }
    }

    /// Convert a raw textual value (path segment, query value).
    #[must_use]
    pub fn convert(self, raw: &str) -> Option<Value> {
        match self {
            ParamType::Str => Some(Value::String(raw.to_string())),
            ParamType::Int => raw.parse::<i64>().ok().map(Value::from),
            ParamType::Float => raw
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            ParamType::Bool => raw.parse::<bool>().ok().map(Value::Bool),
            ParamType::Any => Some(
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
            ),
        }
    }

    /// Check an already-typed JSON value (body fields).
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::Str => value.is_string(),
            ParamType::Int => value.is_i64() || value.is_u64(),
            ParamType::Float => value.is_number(),
            ParamType::Bool => value.is_boolean(),
            ParamType::Any => true,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParamType::Str => "str",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::Any => "any",
        })
    }
}

/// Accepted types of one parameter, tried in order.
pub type TypeVec = SmallVec<[ParamType; 2]>;

/// One declared route input.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: Arc<str>,
    pub source: ParamSource,
    /// Never empty. The first type that converts or accepts a value wins.
    pub types: TypeVec,
    /// Used when a query/body value is absent. `None` makes it required.
    pub default: Option<Value>,
    pub doc: Option<String>,
}

impl ParamSpec {
    #[must_use]
    pub fn new(name: &str, source: ParamSource, ty: ParamType) -> Self {
        Self {
            name: Arc::from(name),
            source,
            types: smallvec![ty],
            default: None,
            doc: None,
        }
    }

    /// The request metadata object.
    #[must_use]
    pub fn context(name: &str) -> Self {
        Self::new(name, ParamSource::Context, ParamType::Any)
    }

    /// Also accept `ty` when the earlier types do not fit.
    #[must_use]
    pub fn or(mut self, ty: ParamType) -> Self {
        if !self.types.contains(&ty) {
            self.types.push(ty);
        }
        self
    }

    /// Convert a raw textual value with the first type that takes it.
    #[must_use]
    pub fn convert(&self, raw: &str) -> Option<Value> {
        self.types.iter().find_map(|ty| ty.convert(raw))
    }

    /// Whether any accepted type takes this JSON value.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        self.types.iter().any(|ty| ty.accepts(value))
    }

    /// Accepted types for messages, e.g. `int | str`.
    #[must_use]
    pub fn type_list(&self) -> String {
        self.types
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | ")
    }

    fn invalid(&self, location: ParamSource, value: String) -> ParameterError {
        ParameterError::Invalid {
            name: self.name.to_string(),
            location,
            expected: self.type_list(),
            value,
        }
    }

    #[must_use]
    pub fn path(name: &str, ty: ParamType) -> Self {
        Self::new(name, ParamSource::Path, ty)
    }

    #[must_use]
    pub fn query(name: &str, ty: ParamType) -> Self {
        Self::new(name, ParamSource::Query, ty)
    }

    #[must_use]
    pub fn body(name: &str, ty: ParamType) -> Self {
        Self::new(name, ParamSource::Body, ty)
    }

    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = Some(doc.to_string());
        self
    }
}

/// WebSocket upgrade settings of a route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebSocketSpec {
    /// Subprotocols the route accepts, in server preference order
    pub subprotocols: Vec<String>,
}

/// A route as declared by application code, before compilation.
pub struct RouteDecl {
    pub(crate) path: String,
    pub(crate) methods: SmallVec<[Method; 4]>,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) params: Vec<ParamSpec>,
    pub(crate) errors: Vec<(ErrorKey, ErrorHandlerRef)>,
    pub(crate) doc: Option<String>,
    pub(crate) websocket: Option<WebSocketSpec>,
    pub(crate) middleware: Vec<Arc<dyn Middleware>>,
    pub(crate) cache_rate: u32,
}

impl RouteDecl {
    pub fn new<H, M>(path: &str, methods: M, handler: H) -> Self
    where
        H: Handler,
        M: IntoIterator<Item = Method>,
    {
        let mut unique: SmallVec<[Method; 4]> = SmallVec::new();
        for m in methods {
            if !unique.contains(&m) {
                unique.push(m);
            }
        }
        Self {
            path: path.to_string(),
            methods: unique,
            handler: Arc::new(handler),
            params: Vec::new(),
            errors: Vec::new(),
            doc: None,
            websocket: None,
            middleware: Vec::new(),
            cache_rate: 0,
        }
    }

    pub fn get<H: Handler>(path: &str, handler: H) -> Self {
        Self::new(path, [Method::GET], handler)
    }

    pub fn post<H: Handler>(path: &str, handler: H) -> Self {
        Self::new(path, [Method::POST], handler)
    }

    pub fn put<H: Handler>(path: &str, handler: H) -> Self {
        Self::new(path, [Method::PUT], handler)
    }

    pub fn patch<H: Handler>(path: &str, handler: H) -> Self {
        Self::new(path, [Method::PATCH], handler)
    }

    pub fn delete<H: Handler>(path: &str, handler: H) -> Self {
        Self::new(path, [Method::DELETE], handler)
    }

    pub fn options<H: Handler>(path: &str, handler: H) -> Self {
        Self::new(path, [Method::OPTIONS], handler)
    }

    /// A `GET` route that accepts WebSocket upgrades.
    pub fn websocket<H: Handler>(path: &str, subprotocols: &[&str], handler: H) -> Self {
        let mut decl = Self::get(path, handler);
        decl.websocket = Some(WebSocketSpec {
            subprotocols: subprotocols.iter().map(|s| (*s).to_string()).collect(),
        });
        decl
    }

    #[must_use]
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Route-level error handler override.
    #[must_use]
    pub fn error(mut self, key: impl Into<ErrorKey>, handler: ErrorHandlerRef) -> Self {
        self.errors.push((key.into(), handler));
        self
    }

    #[must_use]
    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = Some(doc.to_string());
        self
    }

    /// Run `mw` around the handler. Middleware runs in the order added.
    #[must_use]
    pub fn middleware<M: Middleware>(mut self, mw: M) -> Self {
        self.middleware.push(Arc::new(mw));
        self
    }

    /// Serve the last successful response to the next `rate` requests with
    /// the same parameters. `0` disables reuse.
    #[must_use]
    pub fn cache_rate(mut self, rate: u32) -> Self {
        self.cache_rate = rate;
        self
    }
}

/// A compiled, immutable route owned by the route table.
pub struct Route {
    pattern: PathPattern,
    methods: SmallVec<[Method; 4]>,
    params: Vec<ParamSpec>,
    handler: Arc<dyn Handler>,
    errors: ErrorSlots,
    doc: Option<String>,
    websocket: Option<WebSocketSpec>,
    middleware: Vec<Arc<dyn Middleware>>,
    cache: Option<ResponseCache>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern.as_str())
            .field("methods", &self.methods)
            .field("params", &self.params)
            .field("errors", &self.errors.len())
            .field("websocket", &self.websocket)
            .field("middleware", &self.middleware.len())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Route {
    /// Compile a declaration. Path captures become the leading parameters in
    /// capture order; explicit query/body parameters follow in declaration
    /// order.
    pub(crate) fn compile(decl: RouteDecl) -> Result<Self, RegistrationError> {
        let pattern = PathPattern::parse(&decl.path)?;
        let raw = pattern.as_str().to_string();

        if decl.methods.is_empty() {
            return Err(RegistrationError::NoMethods { pattern: raw });
        }

        let mut params: Vec<ParamSpec> = Vec::with_capacity(decl.params.len() + 2);
        for segment in pattern.segments() {
            if let Segment::Capture { name, ty } = segment {
                if params.iter().any(|p| p.name == *name) {
                    return Err(RegistrationError::DuplicateParameter {
                        pattern: raw,
                        param: name.to_string(),
                    });
                }
                params.push(ParamSpec {
                    name: Arc::clone(name),
                    source: ParamSource::Path,
                    types: smallvec![ty.unwrap_or(ParamType::Str)],
                    default: None,
                    doc: None,
                });
            }
        }

        for spec in decl.params {
            if spec.source == ParamSource::Path {
                // Refines the type of an untyped capture, keeps its position.
                let capture_ty = pattern
                    .captures()
                    .find(|(name, _)| **name == spec.name)
                    .map(|(_, ty)| ty);
                match capture_ty {
                    None => {
                        return Err(RegistrationError::UnboundPathParameter {
                            pattern: raw,
                            param: spec.name.to_string(),
                        })
                    }
                    Some(Some(_)) => {
                        return Err(RegistrationError::DuplicateParameter {
                            pattern: raw,
                            param: spec.name.to_string(),
                        })
                    }
                    Some(None) => {
                        if let Some(slot) = params.iter_mut().find(|p| p.name == spec.name) {
                            slot.types = spec.types;
                            slot.doc = spec.doc;
                        }
                    }
                }
                continue;
            }

            if params.iter().any(|p| p.name == spec.name) {
                return Err(RegistrationError::DuplicateParameter {
                    pattern: raw,
                    param: spec.name.to_string(),
                });
            }
            params.push(spec);
        }

        if let Some(expected) = decl.handler.inputs() {
            let declared: Vec<String> = params.iter().map(|p| p.name.to_string()).collect();
            if declared.as_slice() != expected {
                return Err(RegistrationError::InputMismatch {
                    pattern: raw,
                    declared,
                    expected: expected.to_vec(),
                });
            }
        }

        let mut errors = ErrorSlots::new();
        load_errors(&mut errors, decl.errors)?;

        Ok(Self {
            pattern,
            methods: decl.methods,
            params,
            handler: decl.handler,
            errors,
            doc: decl.doc,
            websocket: decl.websocket,
            middleware: decl.middleware,
            cache: (decl.cache_rate > 0).then(|| ResponseCache::new(decl.cache_rate)),
        })
    }

    #[must_use]
    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    #[must_use]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    #[must_use]
    pub fn accepts(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    #[must_use]
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    #[must_use]
    pub fn errors(&self) -> &ErrorSlots {
        &self.errors
    }

    pub(crate) fn errors_mut(&mut self) -> &mut ErrorSlots {
        &mut self.errors
    }

    #[must_use]
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    #[must_use]
    pub fn websocket(&self) -> Option<&WebSocketSpec> {
        self.websocket.as_ref()
    }

    #[must_use]
    pub fn middleware(&self) -> &[Arc<dyn Middleware>] {
        &self.middleware
    }

    #[must_use]
    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    /// Whether a parameter binds the request metadata.
    #[must_use]
    pub fn wants_context(&self) -> bool {
        self.params.iter().any(|p| p.source == ParamSource::Context)
    }

    /// Convert raw path captures (already percent-decoded) into typed values.
    pub(crate) fn bind_path(&self, captured: &[String]) -> Result<ParamVec, ParameterError> {
        let mut bound = ParamVec::new();
        let path_params = self
            .params
            .iter()
            .filter(|p| p.source == ParamSource::Path);
        for (spec, raw) in path_params.zip(captured) {
            let value = spec
                .convert(raw)
                .ok_or_else(|| spec.invalid(ParamSource::Path, raw.clone()))?;
            bound.push((Arc::clone(&spec.name), value));
        }
        Ok(bound)
    }

    /// Complete the bound parameter list with query, body and context
    /// inputs, in declaration order.
    ///
    /// Query values use last-write-wins for repeated keys. Context
    /// parameters receive `context`, or `null` when none is given.
    pub fn bind_inputs(
        &self,
        mut bound: ParamVec,
        query: &[(String, String)],
        body: Option<&Value>,
        context: Option<&Value>,
    ) -> Result<ParamVec, ParameterError> {
        for spec in self.params.iter().filter(|p| p.source != ParamSource::Path) {
            let value = match spec.source {
                ParamSource::Query => query
                    .iter()
                    .rev()
                    .find(|(k, _)| **k == *spec.name)
                    .map(|(_, raw)| {
                        spec.convert(raw)
                            .ok_or_else(|| spec.invalid(ParamSource::Query, raw.clone()))
                    })
                    .transpose()?,
                ParamSource::Body => match body {
                    None | Some(Value::Null) => None,
                    Some(Value::Object(map)) => match map.get(spec.name.as_ref()) {
                        None => None,
                        Some(v) if spec.accepts(v) => Some(v.clone()),
                        Some(v) => return Err(spec.invalid(ParamSource::Body, v.to_string())),
                    },
                    Some(_) => {
                        return Err(ParameterError::BodyNotObject {
                            name: spec.name.to_string(),
                        })
                    }
                },
                ParamSource::Context => Some(context.cloned().unwrap_or(Value::Null)),
                ParamSource::Path => continue,
            };

            let value = match (value, &spec.default) {
                (Some(v), _) => v,
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(ParameterError::Missing {
                        name: spec.name.to_string(),
                        location: spec.source,
                    })
                }
            };
            bound.push((Arc::clone(&spec.name), value));
        }
        Ok(bound)
    }
}
