//! # Reconciler
//!
//! Drives one sync: render the desired state, decide whether anything changed, and hand
//! the document to the strategy selected for this deployment.
//!
//! ## Key Features
//! - Strategy chosen once at construction: [`FullPush`] or [`DiffApply`]
//! - No-op detection through the [`SyncSession`] fingerprint, bypassed in reverse-sync mode
//! - Custom entities fetched per sync, with failures logged instead of propagated
//! - Every fatal error carries the name of the stage that failed
//!
//! ## Single flight
//! [`Reconciler::on_update`] takes the session by exclusive reference. Callers that
//! share a reconciler across tasks must still serialize syncs per session; the session
//! is only updated once the strategy has fully succeeded.

pub mod diff_apply;
pub mod full_push;

pub use diff_apply::{ChangeAction, DiffApply, Differencer, Dumper, PlannedChange, Solver, SyncPlan};
pub use full_push::FullPush;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::canonical::Canonicalizer;
use crate::core::config::{SyncConfig, SyncMode};
use crate::core::error::{ReconcileError, ReconcileResult};
use crate::custom_entities::{fetch_custom_entities, SecretStore};
use crate::defaults::{AdminApiSchemaStore, DefaultFiller, PluginSchemaStore};
use crate::document::Document;
use crate::fingerprint::{Fingerprint, SyncSession};
use crate::gateway::AdminClient;
use crate::observability::metrics;
use crate::state::DesiredState;

/// How a rendered document reaches the gateway
#[async_trait]
pub trait ReconcileStrategy: Send + Sync {
    /// Short name used in logs and metric labels
    fn name(&self) -> &'static str;

    /// Make the gateway match `document`
    async fn apply(&self, document: Document, custom_entities: Option<&[u8]>) -> ReconcileResult<()>;
}

/// Result of a successful sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The rendered configuration matched the last applied one; the gateway was not contacted
    Skipped,
    /// The configuration was applied. No fingerprint is taken in reverse-sync mode.
    Applied { fingerprint: Option<Fingerprint> },
}

/// Where custom entities come from
struct CustomEntitiesSource {
    store: Arc<dyn SecretStore>,
    secret_ref: String,
}

pub struct Reconciler {
    canonicalizer: Canonicalizer,
    strategy: Box<dyn ReconcileStrategy>,
    custom_entities: Option<CustomEntitiesSource>,
    reverse_sync: bool,
}

impl Reconciler {
    pub fn new(canonicalizer: Canonicalizer, strategy: Box<dyn ReconcileStrategy>) -> Self {
        Self {
            canonicalizer,
            strategy,
            custom_entities: None,
            reverse_sync: false,
        }
    }

    /// Merge the custom entities stored in `secret_ref` into every sync
    pub fn with_custom_entities<S: Into<String>>(
        mut self,
        store: Arc<dyn SecretStore>,
        secret_ref: S,
    ) -> Self {
        self.custom_entities = Some(CustomEntitiesSource {
            store,
            secret_ref: secret_ref.into(),
        });
        self
    }

    /// Always apply, even when nothing changed since the last sync
    pub fn with_reverse_sync(mut self, reverse_sync: bool) -> Self {
        self.reverse_sync = reverse_sync;
        self
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Bring the gateway in line with `state`.
    ///
    /// On failure the session is left untouched, so retrying with the same state goes
    /// to the gateway again.
    pub async fn on_update(
        &self,
        session: &mut SyncSession,
        state: &DesiredState,
    ) -> ReconcileResult<SyncOutcome> {
        let strategy = self.strategy.name();
        let document = self.canonicalizer.render(state).await;
        let custom_entities = self.load_custom_entities().await;

        let fingerprint = if self.reverse_sync {
            None
        } else {
            let fingerprint = Fingerprint::compute(&document, custom_entities.as_deref())
                .map_err(|e| ReconcileError::stage("computing configuration fingerprint", e))?;
            debug!(fingerprint = %fingerprint, "Computed configuration fingerprint");

            if session.should_skip(&fingerprint) {
                info!("No configuration change, skipping sync to the gateway");
                metrics::record_sync_skipped();
                return Ok(SyncOutcome::Skipped);
            }
            Some(fingerprint)
        };

        if let Err(e) = self.strategy.apply(document, custom_entities.as_deref()).await {
            error!(
                strategy,
                error = %e,
                error_type = e.root_cause().error_type(),
                retryable = e.is_retryable(),
                "Failed to sync configuration to the gateway"
            );
            metrics::record_sync_failed(strategy, &e);
            return Err(e);
        }

        session.record_success(fingerprint);
        metrics::record_sync_applied(strategy);
        info!(strategy, "Successfully synced configuration to the gateway");

        Ok(SyncOutcome::Applied { fingerprint })
    }

    async fn load_custom_entities(&self) -> Option<Vec<u8>> {
        let source = self.custom_entities.as_ref()?;
        match fetch_custom_entities(source.store.as_ref(), &source.secret_ref).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!(
                    secret = %source.secret_ref,
                    error = %e,
                    "Failed to fetch custom entities"
                );
                None
            }
        }
    }
}

/// Assembles a [`Reconciler`] from a [`SyncConfig`]
pub struct ReconcilerBuilder<'a> {
    config: &'a SyncConfig,
    schema_store: Option<Arc<dyn PluginSchemaStore>>,
    secret_store: Option<Arc<dyn SecretStore>>,
    diff: Option<(Box<dyn Dumper>, Box<dyn Differencer>, Box<dyn Solver>)>,
}

impl<'a> ReconcilerBuilder<'a> {
    pub fn new(config: &'a SyncConfig) -> Self {
        Self {
            config,
            schema_store: None,
            secret_store: None,
            diff: None,
        }
    }

    /// Override the plugin schema source. Defaults to the gateway admin API.
    pub fn schema_store(mut self, store: Arc<dyn PluginSchemaStore>) -> Self {
        self.schema_store = Some(store);
        self
    }

    /// Secret source for custom entities. Required when a custom entities secret is
    /// configured in full-push mode.
    pub fn secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.secret_store = Some(store);
        self
    }

    /// Gateway collaborators of the diff-apply strategy
    pub fn diff_collaborators(
        mut self,
        dumper: Box<dyn Dumper>,
        differencer: Box<dyn Differencer>,
        solver: Box<dyn Solver>,
    ) -> Self {
        self.diff = Some((dumper, differencer, solver));
        self
    }

    pub fn build(self) -> ReconcileResult<Reconciler> {
        let config = self.config;
        let client = AdminClient::new(&config.gateway)?;

        let schema_store = self
            .schema_store
            .unwrap_or_else(|| Arc::new(AdminApiSchemaStore::new(client.clone())));
        let canonicalizer =
            Canonicalizer::new(DefaultFiller::new(schema_store), config.selector_tags());

        let strategy: Box<dyn ReconcileStrategy> = match config.mode {
            SyncMode::FullPush => Box::new(FullPush::new(client)),
            SyncMode::DiffApply => {
                let (dumper, differencer, solver) = self.diff.ok_or_else(|| {
                    ReconcileError::config("diff_apply mode requires dumper, differencer and solver")
                })?;
                Box::new(
                    DiffApply::new(dumper, differencer, solver)
                        .with_selector_tags(config.selector_tags())
                        .with_gateway_version(config.gateway.version.clone())
                        .with_concurrency(config.gateway.concurrency),
                )
            }
        };

        let mut reconciler =
            Reconciler::new(canonicalizer, strategy).with_reverse_sync(config.reverse_sync);

        // custom entities only make sense for the bulk endpoint
        if config.mode == SyncMode::FullPush {
            if let Some(secret_ref) = &config.custom_entities_secret {
                let store = self.secret_store.ok_or_else(|| {
                    ReconcileError::config("custom_entities_secret requires a secret store")
                })?;
                reconciler = reconciler.with_custom_entities(store, secret_ref.clone());
            }
        }

        info!(
            strategy = reconciler.strategy_name(),
            reverse_sync = config.reverse_sync,
            "Reconciler initialized"
        );
        Ok(reconciler)
    }
}
