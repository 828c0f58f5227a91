//! # Gateway Reconciler - Main Entry Point
//!
//! Periodic sync driver. On every tick it reads the desired-state snapshot from disk and
//! runs one reconciliation against the gateway. Ticks are processed one after the other
//! by this loop, which owns the [`SyncSession`], so syncs never overlap.
//!
//! Configuration comes from the file named by `RECONCILER_CONFIG_PATH` (default
//! `config/reconciler.yaml`), with `RECONCILER_*` environment overrides applied on top.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use gateway_reconciler::custom_entities::KubeSecretStore;
use gateway_reconciler::observability::init_logging;
use gateway_reconciler::{
    DesiredState, Reconciler, ReconcilerBuilder, SyncConfig, SyncMode, SyncOutcome, SyncSession,
};

const DEFAULT_CONFIG_PATH: &str = "config/reconciler.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().await?;
    init_logging(&config.logging);

    info!("🚀 Starting gateway reconciler");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if config.mode == SyncMode::DiffApply {
        bail!("diff_apply mode needs gateway dump/diff/solve collaborators; embed the library to use it");
    }

    let desired_state_path = config
        .desired_state_path
        .clone()
        .context("desired_state_path must be set")?;

    let mut builder = ReconcilerBuilder::new(&config);
    if config.custom_entities_secret.is_some() {
        let secrets = KubeSecretStore::try_default()
            .await
            .context("connecting to the Kubernetes API for custom entities")?;
        builder = builder.secret_store(Arc::new(secrets));
    }
    let reconciler = builder.build()?;

    run(&reconciler, &config, &desired_state_path).await;

    info!("✅ Gateway reconciler shutdown complete");
    Ok(())
}

async fn load_config() -> anyhow::Result<SyncConfig> {
    let path = std::env::var("RECONCILER_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    if Path::new(&path).exists() {
        return SyncConfig::load_from_file(&path)
            .await
            .with_context(|| format!("loading configuration from {}", path));
    }

    let mut config = SyncConfig::default();
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

async fn run(reconciler: &Reconciler, config: &SyncConfig, desired_state_path: &Path) {
    let mut session = SyncSession::new();
    let mut ticker = interval(config.sync_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        period = ?config.sync_period,
        desired_state = %desired_state_path.display(),
        "Sync loop started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sync_once(reconciler, &mut session, desired_state_path).await;
            }
            _ = signal::ctrl_c() => {
                info!("📡 Received SIGINT (Ctrl+C), stopping sync loop");
                break;
            }
        }
    }
}

async fn sync_once(reconciler: &Reconciler, session: &mut SyncSession, desired_state_path: &Path) {
    let state = match DesiredState::load_from_file(desired_state_path).await {
        Ok(state) => state,
        Err(e) => {
            warn!(error = %e, "Failed to read desired state, retrying on next tick");
            return;
        }
    };

    match reconciler.on_update(session, &state).await {
        Ok(SyncOutcome::Skipped) => {}
        Ok(SyncOutcome::Applied { fingerprint }) => {
            if let Some(fingerprint) = fingerprint {
                info!(fingerprint = %fingerprint, "Configuration applied");
            }
        }
        Err(e) => {
            // already logged by the reconciler
            if !e.is_retryable() {
                error!(error_type = e.root_cause().error_type(), "Sync failed with a non-retryable error");
            }
        }
    }
}
