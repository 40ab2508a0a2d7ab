//! `netraven-worker`: the long-running process. Wires the C1-C9 components
//! together and drives the dispatcher, worker pool, log writer, and
//! retention/reaper tickers until a shutdown signal arrives.
//!
//! Startup shape is the teacher's `bin/server.rs`: `tracing_subscriber`
//! init, `dotenvy::dotenv()`, masked env-var logging, then
//! `PgPoolOptions::connect` before anything else touches the database.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use netraven_core::catalog::Catalog;
use netraven_core::config::NetRavenConfig;
use netraven_core::dispatcher::{Dispatcher, DispatcherConfig};
use netraven_core::logstore::{prune_expired, LogWriter, TranscriptWriter};
use netraven_core::queue::Queue;
use netraven_core::redaction::Redactor;
use netraven_core::services::Services;
use netraven_core::vault::Vault;
use netraven_core::worker::{WorkerPool, WorkerPoolConfig};

/// Logs a non-secret-bearing prefix of an env var, or that it's unset, the
/// same shape as the teacher's `mask_env` debug helper.
fn mask_env(name: &str) {
    match std::env::var(name) {
        Ok(val) if val.is_empty() => tracing::info!("  {}: (empty)", name),
        Ok(val) => {
            let show = std::cmp::min(4, val.len());
            tracing::info!(
                "  {}: {}{}  ({} chars)",
                name,
                &val[..show],
                "*".repeat(val.len().saturating_sub(show)),
                val.len()
            );
        }
        Err(_) => tracing::warn!("  {}: NOT SET", name),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,netraven_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true).with_line_number(true))
        .init();

    tracing::info!("starting netraven-worker");

    dotenvy::dotenv().ok();
    tracing::info!("environment variables:");
    for name in &["DATABASE_URL", "ENCRYPTION_SALT", "LOG_DIR", "WORKER_CONCURRENCY", "DEVICE_FANOUT"] {
        mask_env(name);
    }

    let config = NetRavenConfig::from_env().context("failed to load configuration")?;
    tracing::info!(config = %config.masked(), "configuration loaded");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    let catalog = Catalog::new(pool.clone());
    let vault = Vault::new(catalog.clone(), config.encryption_salt.clone());
    if vault.init().await.is_ok() {
        tracing::info!("provisioned initial encryption key");
    }
    vault.verify_startup().await.context("vault startup verification failed")?;

    let redactor = Arc::new(
        Redactor::new(&config.redact_patterns).context("invalid REDACT_PATTERNS regex")?,
    );

    let queue = Queue::new(pool.clone());
    let (log_sink, log_writer) = LogWriter::new(catalog.clone(), redactor.clone());
    let services = Services::new(catalog.clone(), queue.clone(), vault, log_sink);

    let transcripts = Arc::new(TranscriptWriter::new(
        config.log_dir.clone(),
        std::time::Duration::from_secs(config.session_log_retention_days as u64 * 24 * 3600),
    ));

    let shutdown = CancellationToken::new();

    let log_writer_handle = tokio::spawn(log_writer.run());

    let dispatcher = Dispatcher::new(catalog.clone(), DispatcherConfig::default());
    let dispatcher_handle = tokio::spawn(dispatcher.run(shutdown.clone()));

    let worker_pool = WorkerPool::new(
        services,
        transcripts,
        redactor,
        WorkerPoolConfig::from_config(&config),
    );
    let worker_pool_handle = tokio::spawn(worker_pool.run(shutdown.clone()));

    let reaper_handle = tokio::spawn(run_reaper(queue, shutdown.clone()));
    let pruner_handle = tokio::spawn(run_pruner(catalog, config.clone(), shutdown.clone()));

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received, draining in-flight work");
    shutdown.cancel();

    let _ = dispatcher_handle.await;
    let _ = worker_pool_handle.await;
    let _ = reaper_handle.await;
    let _ = pruner_handle.await;
    let _ = log_writer_handle.await;

    tracing::info!("netraven-worker stopped");
    Ok(())
}

/// Periodically dead-letters exhausted queue items that crashed workers
/// never got to `nack` themselves (§4.2).
async fn run_reaper(queue: Queue, shutdown: CancellationToken) {
    let interval = std::time::Duration::from_secs(60);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        match queue.reap_exhausted().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "reaped exhausted queue items"),
            Err(e) => tracing::error!(error = %e, "queue reap failed"),
        }
    }
}

/// Periodically sweeps Log Entry rows past their retention window (§4.7).
async fn run_pruner(catalog: Catalog, config: NetRavenConfig, shutdown: CancellationToken) {
    let interval = std::time::Duration::from_secs(3600);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        match prune_expired(&catalog, config.log_retention_days, config.session_log_retention_days).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "pruned expired log entries"),
            Err(e) => tracing::error!(error = %e, "log retention sweep failed"),
        }
    }
}
