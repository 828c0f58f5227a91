//! # Gateway Reconciler - Core Library Crate
//!
//! Keeps an API gateway's configuration in line with a desired state computed elsewhere
//! (typically from Kubernetes resources). Each sync renders the desired state into a
//! deterministic document, skips the gateway when nothing changed since the last
//! successful sync, and otherwise applies it with one of two strategies:
//!
//! - **Full push**: the whole document replaces the gateway configuration in one request
//! - **Diff apply**: the live state is dumped and only the difference is applied
//!
//! ## Pipeline
//!
//! ```text
//! DesiredState ──render──▶ Document ──fingerprint──▶ skip?
//!                                        │
//!                                        ▼
//!                          ReconcileStrategy::apply
//! ```
//!
//! ## Module Layout
//! - `core`: error types and configuration
//! - `state`: the desired-state tree handed to the reconciler
//! - `document`: the canonical document and its resolution against live state
//! - `defaults`: default values the gateway would otherwise fill in itself
//! - `canonical`: rendering with deterministic ordering
//! - `custom_entities`: raw configuration merged into full pushes
//! - `fingerprint`: change detection across syncs
//! - `reconcile`: strategies and the dispatcher

/// Error types and configuration
pub mod core;

/// Desired-state tree and gateway entity types
pub mod state;

/// Canonical gateway configuration document
pub mod document;

/// Gateway admin API client
pub mod gateway;

/// Entity default completion, including schema-driven plugin defaults
pub mod defaults;

/// Rendering desired state into a deterministic document
pub mod canonical;

/// Custom entities stored in a Kubernetes secret
pub mod custom_entities;

/// Content fingerprints and the per-session skip decision
pub mod fingerprint;

/// Reconciliation strategies and the dispatcher
pub mod reconcile;

/// Logging setup and sync metrics
pub mod observability;

pub use core::config::{SyncConfig, SyncMode};
pub use core::error::{ReconcileError, ReconcileResult};

pub use canonical::Canonicalizer;
pub use document::Document;
pub use fingerprint::{Fingerprint, SyncSession};
pub use reconcile::{ReconcileStrategy, Reconciler, ReconcilerBuilder, SyncOutcome};
pub use state::DesiredState;
