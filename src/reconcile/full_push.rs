//! Full-push strategy: replace the whole gateway configuration in one request.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use tracing::debug;

use super::ReconcileStrategy;
use crate::core::error::{ReconcileError, ReconcileResult};
use crate::custom_entities::merge_custom_entities;
use crate::document::Document;
use crate::gateway::AdminClient;

/// Admin API path of the bulk configuration endpoint
pub const CONFIG_PATH: &str = "config";

/// Submits the rendered document to `POST /config?check_hash=1`.
///
/// The gateway swaps its active configuration for the submitted one, or rejects it as
/// a whole. It skips the swap on its own side when the hash matches what it runs.
pub struct FullPush {
    client: AdminClient,
}

impl FullPush {
    pub fn new(client: AdminClient) -> Self {
        Self { client }
    }

    /// Final request body: the document without metadata or null plugin settings, with
    /// custom entities merged in
    pub fn render_body(
        mut document: Document,
        custom_entities: Option<&[u8]>,
    ) -> ReconcileResult<Vec<u8>> {
        // the bulk endpoint rejects both
        document.info = None;
        document.strip_plugin_config_nulls();

        let core = serde_json::to_vec(&document)?;
        merge_custom_entities(&core, custom_entities)
    }
}

#[async_trait]
impl ReconcileStrategy for FullPush {
    fn name(&self) -> &'static str {
        "full_push"
    }

    async fn apply(&self, document: Document, custom_entities: Option<&[u8]>) -> ReconcileResult<()> {
        let body = Self::render_body(document, custom_entities)
            .map_err(|e| ReconcileError::stage("constructing gateway configuration", e))?;

        debug!(bytes = body.len(), "Posting configuration to the bulk endpoint");

        let response = self
            .client
            .request(Method::POST, CONFIG_PATH)?
            .query(&[("check_hash", "1")])
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| ReconcileError::stage("posting new config to /config", e.into()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReconcileError::stage(
                "posting new config to /config",
                ReconcileError::Submit {
                    status: status.as_u16(),
                    body,
                },
            ));
        }

        Ok(())
    }
}
