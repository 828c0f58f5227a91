//! Plugin schema lookup.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::core::error::{ReconcileError, ReconcileResult};
use crate::gateway::AdminClient;

/// Source of plugin configuration schemas
#[async_trait]
pub trait PluginSchemaStore: Send + Sync {
    /// Fetch the schema of the plugin called `plugin_name`
    async fn schema(&self, plugin_name: &str) -> ReconcileResult<Value>;
}

/// Schema store backed by the gateway admin API (`GET /plugins/schema/{name}`).
///
/// Schemas only change with the gateway version, so each one is fetched once per
/// process and served from memory afterwards.
pub struct AdminApiSchemaStore {
    client: AdminClient,
    cache: DashMap<String, Value>,
}

impl AdminApiSchemaStore {
    pub fn new(client: AdminClient) -> Self {
        Self {
            client,
            cache: DashMap::new(),
        }
    }

    /// Number of schemas held in memory
    pub fn cached_schemas(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl PluginSchemaStore for AdminApiSchemaStore {
    async fn schema(&self, plugin_name: &str) -> ReconcileResult<Value> {
        if let Some(schema) = self.cache.get(plugin_name).map(|s| s.value().clone()) {
            return Ok(schema);
        }

        let lookup_error = |message: String| ReconcileError::schema_lookup(plugin_name, message);

        let response = self
            .client
            .request_segments(Method::GET, &["plugins", "schema", plugin_name])?
            .send()
            .await
            .map_err(|e| lookup_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(lookup_error(format!("admin API returned {}: {}", status, body)));
        }

        let schema: Value = response
            .json()
            .await
            .map_err(|e| lookup_error(format!("invalid schema document: {}", e)))?;

        debug!(plugin = plugin_name, "Cached plugin schema");
        self.cache.insert(plugin_name.to_string(), schema.clone());
        Ok(schema)
    }
}
