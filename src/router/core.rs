//! Route table: registration-ordered lookup of compiled routes.
//!
//! The table is filled during the load phase and only read while serving.
//! Lookup is a linear scan in registration order; the first route whose
//! pattern matches structurally and whose method set contains the request
//! method wins.

use std::borrow::Cow;
use std::sync::Arc;

use http::Method;
use smallvec::SmallVec;
use tracing::{debug, info};

use super::route::{Route, RouteDecl};
use super::ParamVec;
use crate::error::{ParameterError, RegistrationError};

/// Methods collected for a `405` response.
pub type MethodVec = SmallVec<[Method; 8]>;

/// Successful lookup: the winning route plus its typed path parameters.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    /// Path parameters in capture order, already converted to their types
    pub path_params: ParamVec,
}

impl RouteMatch<'_> {
    /// Get a path parameter by name.
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&serde_json::Value> {
        self.path_params
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v)
    }
}

/// Outcome of a route table lookup.
#[derive(Debug, Clone)]
pub enum Lookup<'a> {
    Matched(RouteMatch<'a>),
    /// At least one pattern matched the path, none accepted the method
    MethodNotAllowed { allowed: MethodVec },
    NotFound,
}

/// Ordered collection of compiled routes.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and append a route.
    ///
    /// # Errors
    ///
    /// Any [`RegistrationError`] produced by compilation, or
    /// [`RegistrationError::Conflict`] when an existing route has the same
    /// shape and shares a method with the new one.
    pub fn register(&mut self, decl: RouteDecl) -> Result<&Route, RegistrationError> {
        let route = Route::compile(decl)?;

        for existing in &self.routes {
            if !existing.pattern().same_shape(route.pattern()) {
                continue;
            }
            if let Some(method) = route.methods().iter().find(|m| existing.accepts(m)) {
                return Err(RegistrationError::Conflict {
                    pattern: route.pattern().as_str().to_string(),
                    existing: existing.pattern().as_str().to_string(),
                    method: method.clone(),
                });
            }
        }

        info!(
            pattern = %route.pattern().as_str(),
            methods = ?route.methods(),
            params = route.params().len(),
            websocket = route.websocket().is_some(),
            "Route registered"
        );

        self.routes.push(route);
        let index = self.routes.len() - 1;
        Ok(&self.routes[index])
    }

    /// Find a route for `method` and `path`.
    ///
    /// # Errors
    ///
    /// [`ParameterError`] when the winning route's captures cannot be
    /// converted to their declared types.
    pub fn match_route(&self, method: &Method, path: &str) -> Result<Lookup<'_>, ParameterError> {
        let mut allowed = MethodVec::new();

        for route in &self.routes {
            let Some(captured) = route.pattern().matches(path) else {
                continue;
            };

            if !route.accepts(method) {
                for m in route.methods() {
                    if !allowed.contains(m) {
                        allowed.push(m.clone());
                    }
                }
                continue;
            }

            let decoded: SmallVec<[String; super::MAX_INLINE_PARAMS]> = captured
                .iter()
                .map(|raw| percent_decode(raw).into_owned())
                .collect();
            let path_params = route.bind_path(&decoded)?;

            debug!(
                method = %method,
                path = %path,
                route_pattern = %route.pattern().as_str(),
                path_params = ?path_params,
                "Route matched"
            );
            return Ok(Lookup::Matched(RouteMatch { route, path_params }));
        }

        if allowed.is_empty() {
            debug!(method = %method, path = %path, "No route matched");
            Ok(Lookup::NotFound)
        } else {
            debug!(method = %method, path = %path, allowed = ?allowed, "Method not allowed");
            Ok(Lookup::MethodNotAllowed { allowed })
        }
    }

    /// Route registered for exactly this pattern text.
    #[must_use]
    pub fn get(&self, pattern: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.pattern().as_str() == pattern)
    }

    pub(crate) fn get_mut(&mut self, pattern: &str) -> Option<&mut Route> {
        self.routes
            .iter_mut()
            .find(|r| r.pattern().as_str() == pattern)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registered patterns, in registration order.
    #[must_use]
    pub fn patterns(&self) -> Vec<Arc<str>> {
        self.routes
            .iter()
            .map(|r| Arc::clone(r.pattern().raw()))
            .collect()
    }

    /// Print all registered routes to stdout.
    pub fn dump_routes(&self) {
        println!("[routes] count={}", self.routes.len());
        for route in &self.routes {
            let methods = route
                .methods()
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(",");
            let params = route
                .params()
                .iter()
                .map(|p| format!("{}:{}@{}", p.name, p.type_list(), p.source))
                .collect::<Vec<_>>()
                .join(" ");
            let ws = if route.websocket().is_some() { " [websocket]" } else { "" };
            println!(
                "[route] {methods} {}{ws} ({params}){}",
                route.pattern().as_str(),
                route.doc().map(|d| format!(" - {d}")).unwrap_or_default()
            );
        }
    }
}

/// Percent-decode one captured segment. Sequences that do not decode to
/// UTF-8 leave the segment as sent.
fn percent_decode(raw: &str) -> Cow<'_, str> {
    if !raw.contains('%') {
        return Cow::Borrowed(raw);
    }
    urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw))
}
