//! Application lifecycle: load, freeze, serve.
//!
//! An [`AppBuilder`] collects routes and error handlers during the load
//! phase. [`AppBuilder::build`] freezes everything into an [`Application`]
//! that is shared as `Arc<Application>` and only read while serving. There is
//! no process-wide instance; build as many as needed.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::error::RegistrationError;
use crate::registry::{load_errors, ErrorHandlerRef, ErrorKey, ErrorRegistry};
use crate::router::{Route, RouteDecl, RouteTable};

/// Where [`AppBuilder::load_errors`] installs handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTarget<'a> {
    App,
    /// Route registered under exactly this pattern
    Route(&'a str),
}

/// Load-phase builder.
pub struct AppBuilder {
    routes: RouteTable,
    errors: ErrorRegistry,
    config: AppConfig,
    sink: Arc<dyn DiagnosticSink>,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AppBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppBuilder")
            .field("routes", &self.routes.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AppBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: RouteTable::new(),
            errors: ErrorRegistry::new(),
            config: AppConfig::default(),
            sink: Arc::new(TracingSink),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Register a route.
    ///
    /// # Errors
    ///
    /// See [`RouteTable::register`].
    pub fn route(&mut self, decl: RouteDecl) -> Result<&mut Self, RegistrationError> {
        self.routes.register(decl)?;
        Ok(self)
    }

    /// Install error handlers for the application or for one route.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::InvalidErrorStatus`] for a status outside
    /// 400-599 (nothing is installed then), or
    /// [`RegistrationError::UnknownRoute`] when the target route does not
    /// exist.
    pub fn load_errors<I>(&mut self, target: ErrorTarget<'_>, mapping: I) -> Result<&mut Self, RegistrationError>
    where
        I: IntoIterator<Item = (ErrorKey, ErrorHandlerRef)>,
    {
        let slots = match target {
            ErrorTarget::App => self.errors.app_mut(),
            ErrorTarget::Route(pattern) => self
                .routes
                .get_mut(pattern)
                .ok_or_else(|| RegistrationError::UnknownRoute(pattern.to_string()))?
                .errors_mut(),
        };
        let count = load_errors(slots, mapping)?;
        info!(target_scope = ?target, handlers = count, "Error handlers loaded");
        Ok(self)
    }

    /// Freeze into a serving application.
    #[must_use]
    pub fn build(self) -> Arc<Application> {
        info!(
            routes_count = self.routes.len(),
            routes = ?self.routes.patterns(),
            app_error_handlers = self.errors.app().len(),
            dev = self.config.dev,
            "Application frozen"
        );
        Arc::new(Application {
            routes: self.routes,
            errors: self.errors,
            config: self.config,
            sink: self.sink,
        })
    }
}

/// A frozen application. Read-only; shared across serving coroutines.
pub struct Application {
    routes: RouteTable,
    errors: ErrorRegistry,
    config: AppConfig,
    sink: Arc<dyn DiagnosticSink>,
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("routes", &self.routes)
            .field("errors", &self.errors)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Application {
    #[must_use]
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    #[must_use]
    pub fn route(&self, pattern: &str) -> Option<&Route> {
        self.routes.get(pattern)
    }

    #[must_use]
    pub fn errors(&self) -> &ErrorRegistry {
        &self.errors
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn sink(&self) -> &dyn DiagnosticSink {
        self.sink.as_ref()
    }
}
