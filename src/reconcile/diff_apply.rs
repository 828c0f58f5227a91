//! # Diff-Apply Strategy
//!
//! Reconciles a gateway that stores its configuration as individually addressable
//! entities. The live state is dumped, the rendered document is resolved against it,
//! and only the difference is applied.
//!
//! The three gateway-facing steps sit behind traits:
//!
//! - [`Dumper`] reads the live configuration, scoped by selector tags
//! - [`Differencer`] plans the operations that turn the current state into the target
//! - [`Solver`] executes a plan with bounded concurrency and reports per-entity errors

use async_trait::async_trait;
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ReconcileStrategy;
use crate::core::error::{ReconcileError, ReconcileResult};
use crate::document::{Document, RenderContext};

/// Reads the live gateway configuration
#[async_trait]
pub trait Dumper: Send + Sync {
    /// Raw JSON dump of every entity carrying one of `selector_tags` (all entities when
    /// the list is empty)
    async fn dump(&self, selector_tags: &[String]) -> ReconcileResult<Vec<u8>>;
}

/// Plans the changes between two typed states
pub trait Differencer: Send + Sync {
    fn diff(&self, current: &Document, target: &Document) -> ReconcileResult<SyncPlan>;
}

/// Executes a plan against the gateway
#[async_trait]
pub trait Solver: Send + Sync {
    /// Apply `plan` running at most `concurrency` operations at once. Returns one error
    /// per failed operation; an empty list means every operation succeeded.
    async fn solve(&self, plan: SyncPlan, concurrency: usize) -> Vec<ReconcileError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

/// One entity-level operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub action: ChangeAction,
    /// Entity kind, e.g. `service` or `plugin`
    pub kind: String,
    /// Natural key of the entity
    pub key: String,
}

/// Operations a [`Solver`] has to run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub operations: Vec<PlannedChange>,
    /// Suppress advisory warnings while solving
    pub silence_warnings: bool,
}

impl SyncPlan {
    pub fn new(operations: Vec<PlannedChange>) -> Self {
        Self {
            operations,
            silence_warnings: false,
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

pub struct DiffApply {
    dumper: Box<dyn Dumper>,
    differencer: Box<dyn Differencer>,
    solver: Box<dyn Solver>,
    selector_tags: Vec<String>,
    gateway_version: Option<Version>,
    concurrency: usize,
}

impl DiffApply {
    pub fn new(
        dumper: Box<dyn Dumper>,
        differencer: Box<dyn Differencer>,
        solver: Box<dyn Solver>,
    ) -> Self {
        Self {
            dumper,
            differencer,
            solver,
            selector_tags: Vec::new(),
            gateway_version: None,
            concurrency: 1,
        }
    }

    /// Scope the dump to entities carrying these tags
    pub fn with_selector_tags(mut self, selector_tags: Vec<String>) -> Self {
        self.selector_tags = selector_tags;
        self
    }

    /// Version of the target gateway, used when resolving the target state
    pub fn with_gateway_version(mut self, version: Option<Version>) -> Self {
        self.gateway_version = version;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    async fn current_state(&self) -> ReconcileResult<Document> {
        let raw = self
            .dumper
            .dump(&self.selector_tags)
            .await
            .map_err(|e| ReconcileError::stage("loading configuration from gateway", e))?;

        let current: Document = serde_json::from_slice(&raw).map_err(|e| {
            ReconcileError::stage(
                "building current state",
                ReconcileError::state(format!("invalid gateway dump: {}", e)),
            )
        })?;
        current
            .ensure_unique_keys()
            .map_err(|e| ReconcileError::stage("building current state", e))?;

        Ok(current)
    }
}

#[async_trait]
impl ReconcileStrategy for DiffApply {
    fn name(&self) -> &'static str {
        "diff_apply"
    }

    async fn apply(&self, document: Document, custom_entities: Option<&[u8]>) -> ReconcileResult<()> {
        if custom_entities.is_some() {
            warn!("Custom entities are only supported by the full-push strategy, ignoring them");
        }

        let current = self.current_state().await?;

        let context = RenderContext {
            current: &current,
            gateway_version: self.gateway_version.as_ref(),
        };
        let target = document
            .resolve_against(&context)
            .map_err(|e| ReconcileError::stage("building target state", e))?;

        let mut plan = self
            .differencer
            .diff(&current, &target)
            .map_err(|e| ReconcileError::stage("creating a new syncer", e))?;
        plan.silence_warnings = true;

        debug!(
            operations = plan.len(),
            concurrency = self.concurrency,
            "Applying planned changes"
        );

        let errors = self.solver.solve(plan, self.concurrency).await;
        if !errors.is_empty() {
            return Err(ReconcileError::stage(
                "solving planned changes",
                ReconcileError::solve(errors),
            ));
        }

        Ok(())
    }
}
