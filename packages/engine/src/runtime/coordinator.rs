// packages/engine/src/runtime/coordinator.rs
//! Run coordinator
//!
//! Wires one run together:
//!
//! ```text
//! LaunchRequest ─► build_plan ─► SharedRegistry::build      (build faults surface here)
//!                                     │
//!                      result_channel(capacity)
//!                       │                      │
//!                   Launcher ── envelopes ──► PipelineListener
//!                       │                      │
//!                       └──────── join ────────┘
//!                                 │
//!                  both returned: finish(outcome)
//!                  a task died:   rollback + discard job output
//! ```

use crate::middleware::MiddlewareManager;
use crate::pipeline::{ListenerReport, PipelineListener, PipelineRegistry};
use crate::proxy::ProxyPool;
use crate::registry::{
    build_plan, AgentId, AgentState, JobId, JobOutcome, JobStore, LaunchRequest, RunPlan, SharedRegistry,
};
use crate::runtime::agent::AgentCatalog;
use crate::runtime::channel::result_channel;
use crate::runtime::error_reporter::{ErrorReporter, LogErrorReporter};
use crate::runtime::launcher::{LaunchReport, Launcher};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub job: JobId,
    pub outcome: JobOutcome,
    pub launch: LaunchReport,
    pub listener: ListenerReport,
    /// Agent states at the end of the run, before the registry was cleared
    pub states: Vec<(AgentId, AgentState)>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.outcome == JobOutcome::Succeeded
    }
}

pub struct RunCoordinator {
    config: EngineConfig,
    store: Arc<dyn JobStore>,
    registry: Arc<SharedRegistry>,
    catalog: Arc<AgentCatalog>,
    pipelines: Arc<PipelineRegistry>,
    reporter: Arc<dyn ErrorReporter>,
    middleware: MiddlewareManager,
    proxy: Option<Arc<ProxyPool>>,
    /// Stop signal of the current run; replaced by every successful build
    shutdown: Mutex<CancellationToken>,
}

impl RunCoordinator {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn JobStore>,
        catalog: Arc<AgentCatalog>,
        pipelines: Arc<PipelineRegistry>,
    ) -> Result<Self> {
        config.validate()?;

        let proxy = if config.runtime.proxy_enabled {
            Some(Arc::new(ProxyPool::from_config(&config.proxy)?))
        } else {
            info!("Proxies disabled");
            None
        };

        Ok(Self {
            config,
            store,
            registry: Arc::new(SharedRegistry::new()),
            catalog,
            pipelines,
            reporter: Arc::new(LogErrorReporter),
            middleware: MiddlewareManager::with_defaults(),
            proxy,
            shutdown: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_middleware(mut self, middleware: MiddlewareManager) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<Arc<ProxyPool>>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn registry(&self) -> &Arc<SharedRegistry> {
        &self.registry
    }

    pub fn proxy(&self) -> Option<&Arc<ProxyPool>> {
        self.proxy.as_ref()
    }

    /// Token that stops every agent of the current run at its next check.
    /// Later runs get a fresh token.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.lock().clone()
    }

    /// Ask the agents of the current run to stop
    pub fn shutdown(&self) {
        warn!("Shutdown requested; agents stop at their next check");
        self.shutdown.lock().cancel();
    }

    /// Build and execute a run, waiting for it to finish
    pub async fn run(&self, request: &LaunchRequest) -> Result<RunSummary> {
        self.prepare(request).await?;
        self.execute().await
    }

    /// Build a run and start it in the background.
    ///
    /// Returns once the run is queued. Build faults are returned here, before
    /// any agent task exists.
    pub async fn trigger(self: &Arc<Self>, request: &LaunchRequest) -> Result<JoinHandle<Result<RunSummary>>> {
        self.prepare(request).await?;
        let coordinator = Arc::clone(self);
        Ok(tokio::spawn(async move { coordinator.execute().await }))
    }

    async fn prepare(&self, request: &LaunchRequest) -> Result<()> {
        if let Some(job) = self.registry.job() {
            return Err(EngineError::RunInProgress(job.id.to_string()));
        }

        let plan = build_plan(self.store.as_ref(), request).await?;
        let job = plan.job.id;
        let created = created_job(request, &plan);

        let built = match self.check_extractors(&plan) {
            Ok(()) => self.registry.build(plan, self.store.as_ref()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = built {
            if created {
                self.drop_job(job).await;
            }
            return Err(e);
        }

        *self.shutdown.lock() = CancellationToken::new();
        Ok(())
    }

    /// Delete a job this coordinator created for a run that never started
    async fn drop_job(&self, job: JobId) {
        match self.store.delete_job(job).await {
            Ok(()) => info!("Deleted job {} of rejected run", job),
            Err(e) => error!("Could not delete job {} of rejected run: {}", job, e),
        }
    }

    fn check_extractors(&self, plan: &RunPlan) -> Result<()> {
        for agent in plan.agents.iter().filter(|a| a.descriptor.active) {
            if !self.catalog.contains(&agent.descriptor.name) {
                error!("No extractor registered for agent {}", agent.descriptor.name);
                return Err(EngineError::ExtractorNotFound(agent.descriptor.name.clone()));
            }
        }
        Ok(())
    }

    async fn execute(&self) -> Result<RunSummary> {
        let job = self
            .registry
            .job()
            .ok_or_else(|| EngineError::RegistryError("No run has been built".into()))?;

        let (sender, receiver) = result_channel(self.config.runtime.channel_capacity);
        let shutdown = self.shutdown_token();

        let launcher = Launcher::new(Arc::clone(&self.registry), Arc::clone(&self.catalog))
            .with_proxy(self.proxy.clone())
            .with_middleware(self.middleware.clone())
            .with_reporter(Arc::clone(&self.reporter))
            .with_shutdown(shutdown.child_token())
            .with_acceptable_run(Duration::from_secs(self.config.runtime.acceptable_run_secs));
        let listener = PipelineListener::new(Arc::clone(&self.registry), Arc::clone(&self.pipelines))
            .persist_fault_sets_error(self.config.listener.persist_fault_sets_error);

        info!("Starting job {} ({} agents)", job.id, self.registry.len());
        let launching = tokio::spawn(async move { launcher.launch(sender).await });
        let listening = tokio::spawn(async move { listener.listen(receiver).await });
        let (launched, listened) = tokio::join!(launching, listening);

        let (launch, listener) = match (flatten(launched, "launcher"), flatten(listened, "listener")) {
            (Ok(launch), Ok(listener)) => (launch, listener),
            (Err(e), _) | (_, Err(e)) => {
                error!("Job {} failed: {}", job.id, e);
                self.rollback(job.id).await;
                return Err(e);
            }
        };

        let states = self.registry.states();
        let outcome = self.outcome(&launch, &listener, &states, shutdown.is_cancelled());
        self.registry.finish(self.store.as_ref(), outcome).await?;

        info!(
            "Job {} done ({:?}): {} forwarded, {} persisted, {} broken agents",
            job.id,
            outcome,
            launch.records_forwarded(),
            listener.persisted,
            launch.broken.len()
        );

        Ok(RunSummary {
            job: job.id,
            outcome,
            launch,
            listener,
            states,
        })
    }

    fn outcome(
        &self,
        launch: &LaunchReport,
        listener: &ListenerReport,
        states: &[(AgentId, AgentState)],
        interrupted: bool,
    ) -> JobOutcome {
        if interrupted {
            return JobOutcome::Interrupted;
        }

        // an agent may reach COMPLETE before its last record is rejected
        let rejected = listener.validation_failures + listener.missing_pipeline > 0
            || (self.config.listener.persist_fault_sets_error && listener.persist_failures > 0);
        let stopped_in_error = states.iter().any(|(_, state)| *state == AgentState::Error);

        if launch.is_clean() && !rejected && !stopped_in_error {
            JobOutcome::Succeeded
        } else {
            JobOutcome::CompletedWithErrors
        }
    }

    /// Discard the job and everything its pipelines persisted
    async fn rollback(&self, job: JobId) {
        for pipeline in self.pipelines.pipelines() {
            if let Err(e) = pipeline.discard(job).await {
                error!("Pipeline {} could not discard job {}: {}", pipeline.name(), job, e);
            }
        }
        if let Err(e) = self.registry.rollback(self.store.as_ref()).await {
            error!("Rollback of job {} failed: {}", job, e);
        }
    }
}

fn flatten<T>(joined: std::result::Result<Result<T>, tokio::task::JoinError>, task: &str) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(EngineError::TaskFailed(format!("{} panicked", task))),
        Err(_) => Err(EngineError::TaskFailed(format!("{} was cancelled", task))),
    }
}

/// Whether building `plan` created its job (as opposed to reusing one)
fn created_job(request: &LaunchRequest, plan: &RunPlan) -> bool {
    !matches!(request, LaunchRequest::Solo { job: Some(id), .. } if *id == plan.job.id)
}
