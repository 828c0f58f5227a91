//! # Entity Default-Filler
//!
//! Completes fields the gateway either requires or fills in on its own. The live state
//! always reports those defaults explicitly, so leaving them unset in the rendered
//! document would make every comparison against the gateway look like a change.
//!
//! Every function here is a copy-on-write transform: it takes the caller's entity by
//! reference and returns a completed copy.

pub mod schema;
pub mod store;

pub use schema::fill_config_defaults;
pub use store::{AdminApiSchemaStore, PluginSchemaStore};

use std::sync::Arc;

use crate::core::error::{ReconcileError, ReconcileResult};
use crate::state::{Plugin, Route, Upstream};

/// Redirect status code the gateway applies when a route does not set one
pub const DEFAULT_HTTPS_REDIRECT_STATUS_CODE: u16 = 426;

/// Legacy path handling mode
pub const DEFAULT_PATH_HANDLING: &str = "v0";

/// Upstream load-balancing algorithm the gateway applies when none is set
pub const DEFAULT_UPSTREAM_ALGORITHM: &str = "round-robin";

/// Protocols a plugin runs on when none are configured
pub const DEFAULT_PLUGIN_PROTOCOLS: [&str; 2] = ["http", "https"];

/// Route with the redirect status code and path handling mode completed
pub fn fill_route(route: &Route) -> Route {
    let mut filled = route.clone();
    if filled.https_redirect_status_code.is_none() {
        filled.https_redirect_status_code = Some(DEFAULT_HTTPS_REDIRECT_STATUS_CODE);
    }
    if filled.path_handling.is_none() {
        filled.path_handling = Some(DEFAULT_PATH_HANDLING.to_string());
    }
    filled
}

/// Upstream with the load-balancing algorithm completed
pub fn fill_upstream(upstream: &Upstream) -> Upstream {
    let mut filled = upstream.clone();
    if filled.algorithm.is_none() {
        filled.algorithm = Some(DEFAULT_UPSTREAM_ALGORITHM.to_string());
    }
    filled
}

/// Fills plugins from their schemas
#[derive(Clone)]
pub struct DefaultFiller {
    schemas: Arc<dyn PluginSchemaStore>,
}

impl DefaultFiller {
    pub fn new(schemas: Arc<dyn PluginSchemaStore>) -> Self {
        Self { schemas }
    }

    /// Plugin with schema defaults merged into its configuration, `enabled` and
    /// `protocols` completed and the scheduling hint cleared.
    ///
    /// Fails with `SchemaLookup` when the plugin has no name or its schema cannot be
    /// fetched, and with `Fill` when the defaults cannot be merged. The input is never
    /// modified, so callers can fall back to it.
    pub async fn fill_plugin(&self, plugin: &Plugin) -> ReconcileResult<Plugin> {
        let name = match plugin.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => return Err(ReconcileError::schema_lookup("", "plugin doesn't have a name")),
        };

        let schema = self.schemas.schema(name).await.map_err(|e| match e {
            ReconcileError::SchemaLookup { .. } => e,
            other => ReconcileError::schema_lookup(name, other.to_string()),
        })?;

        let config = plugin.config.clone().unwrap_or_default();
        let config = fill_config_defaults(name, &schema, &config)?;

        let mut filled = plugin.clone();
        filled.config = Some(config);
        if filled.enabled.is_none() {
            filled.enabled = Some(true);
        }
        if filled.protocols.is_empty() {
            filled.protocols = DEFAULT_PLUGIN_PROTOCOLS.iter().map(|p| p.to_string()).collect();
        }
        filled.run_on = None;
        Ok(filled)
    }
}
