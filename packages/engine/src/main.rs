// packages/engine/src/main.rs
//! WebWeaver Orchestration Engine
//!
//! Executes one run described by a YAML manifest and prints its summary.
//!
//! ```text
//! weaver-engine <manifest.yaml>
//! ```

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use weaver_engine::manifest::RunManifest;
use weaver_engine::observability::{init_metrics, init_tracing};
use weaver_engine::runtime::{ErrorReporter, LogErrorReporter, SqliteErrorReporter};
use weaver_engine::utils::config::EngineConfig;
use weaver_engine::{RunCoordinator, RunSummary};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = EngineConfig::load()?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    info!("Starting WebWeaver Orchestration Engine v{}", env!("CARGO_PKG_VERSION"));

    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: weaver-engine <manifest.yaml>");
    };
    let manifest = RunManifest::load(&path)
        .await
        .with_context(|| format!("Failed to load manifest {}", path))?;

    let reporter: Arc<dyn ErrorReporter> = match &config.storage.error_db_path {
        Some(db) => Arc::new(SqliteErrorReporter::open(db).await?),
        None => Arc::new(LogErrorReporter),
    };

    let coordinator = Arc::new(
        RunCoordinator::new(
            config,
            Arc::new(manifest.job_store()),
            Arc::new(manifest.catalog()),
            Arc::new(manifest.pipelines()),
        )?
        .with_reporter(reporter),
    );

    let run = match coordinator.trigger(&manifest.launch).await {
        Ok(run) => run,
        Err(e) => {
            error!("Run rejected: {}", e);
            return Err(e.into());
        }
    };

    // Graceful shutdown handler
    let shutdown = coordinator.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, stopping agents...");
            shutdown.cancel();
        }
    });

    let summary = run.await.context("Run task failed")??;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("job        {}", summary.job);
    println!("outcome    {:?}", summary.outcome);
    println!("elapsed    {:.2?}", summary.launch.elapsed);
    println!(
        "records    {} forwarded, {} persisted, {} rejected, {} failed to persist",
        summary.launch.records_forwarded(),
        summary.listener.persisted,
        summary.listener.validation_failures,
        summary.listener.persist_failures
    );
    for (agent, state) in &summary.states {
        println!("agent {:<4} {:?}", agent, state);
    }
    for broken in &summary.launch.broken {
        println!("broken     {} ({}): {}", broken.agent_name, broken.error_kind, broken.detail);
    }
}
