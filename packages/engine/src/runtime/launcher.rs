// packages/engine/src/runtime/launcher.rs
//! Agent launcher
//!
//! One task per active agent. Each task loops:
//!
//! ```text
//! ┌─► check state (RUNNING? shutdown?) ── no ──► stop, forward nothing more
//! │         │ yes
//! │   pull next record ── exhausted ──► COMPLETE
//! │         │            └─ fault ────► ERROR + BrokenAgentRecord
//! │   skip if empty, else send envelope
//! └─────────┘
//! ```
//!
//! A fault in one task never cancels its siblings. After every task has
//! ended the launcher sends exactly one end-of-stream message, reports the
//! broken agents, and returns.

use crate::middleware::MiddlewareManager;
use crate::proxy::ProxyPool;
use crate::registry::{AgentDescriptor, AgentId, AgentState, BrokenAgentRecord, JobId, SharedRegistry};
use crate::runtime::agent::{AgentCatalog, AgentContext, AgentFactory};
use crate::runtime::channel::{ResultEnvelope, ResultSender};
use crate::runtime::error_reporter::{ErrorReporter, LogErrorReporter};
use crate::utils::errors::{EngineError, Result};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How one agent task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEnd {
    /// Extraction exhausted its records
    Finished,

    /// Observed a non-RUNNING state or run shutdown
    Stopped(AgentState),

    /// Extraction raised, or the task panicked
    Faulted,
}

/// Per-agent result of a launch
#[derive(Debug, Clone)]
pub struct AgentRunSummary {
    pub agent: AgentId,
    pub name: String,
    pub forwarded: u64,
    pub skipped_empty: u64,
    pub end: TaskEnd,
}

/// What a launch did
#[derive(Debug, Clone, Default)]
pub struct LaunchReport {
    pub agents: Vec<AgentRunSummary>,
    /// Inactive agents that were not spawned
    pub inactive: Vec<AgentId>,
    pub broken: Vec<BrokenAgentRecord>,
    pub elapsed: Duration,
    /// Whether the end-of-stream message reached the channel
    pub end_of_stream_sent: bool,
}

impl LaunchReport {
    /// Nothing broke
    pub fn is_clean(&self) -> bool {
        self.broken.is_empty()
    }

    pub fn records_forwarded(&self) -> u64 {
        self.agents.iter().map(|a| a.forwarded).sum()
    }
}

/// Spawns and supervises the agent tasks of one run
pub struct Launcher {
    registry: Arc<SharedRegistry>,
    catalog: Arc<AgentCatalog>,
    proxy: Option<Arc<ProxyPool>>,
    middleware: MiddlewareManager,
    reporter: Arc<dyn ErrorReporter>,
    shutdown: CancellationToken,
    acceptable_run: Duration,
}

impl Launcher {
    pub fn new(registry: Arc<SharedRegistry>, catalog: Arc<AgentCatalog>) -> Self {
        Self {
            registry,
            catalog,
            proxy: None,
            middleware: MiddlewareManager::with_defaults(),
            reporter: Arc::new(LogErrorReporter),
            shutdown: CancellationToken::new(),
            acceptable_run: Duration::from_secs(600),
        }
    }

    pub fn with_proxy(mut self, proxy: Option<Arc<ProxyPool>>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_middleware(mut self, middleware: MiddlewareManager) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_acceptable_run(mut self, acceptable_run: Duration) -> Self {
        self.acceptable_run = acceptable_run;
        self
    }

    /// Run every active agent of the registry's current run to completion.
    ///
    /// Consumes the sender so that the end-of-stream message is the last
    /// thing this run ever puts on the channel.
    pub async fn launch(&self, sender: ResultSender) -> Result<LaunchReport> {
        let job = self
            .registry
            .job()
            .ok_or_else(|| EngineError::RegistryError("Launch requested before the registry was built".into()))?;

        let started = Instant::now();
        let mut report = LaunchReport::default();
        let mut handles = Vec::new();

        for descriptor in self.registry.agents() {
            if !descriptor.active {
                info!("Agent {} is inactive; not launching", descriptor.name);
                report.inactive.push(descriptor.id);
                continue;
            }

            let factory = match self.catalog.resolve(&descriptor.name) {
                Ok(factory) => factory,
                Err(e) => {
                    error!("Cannot launch {}: {}", descriptor.name, e);
                    mark(&self.registry, descriptor.id, AgentState::Error);
                    report.broken.push(BrokenAgentRecord::new(
                        descriptor.id,
                        &descriptor.name,
                        "not_found",
                        e.to_string(),
                    ));
                    continue;
                }
            };

            let ctx = match self.agent_context(job.id, &descriptor) {
                Ok(ctx) => ctx,
                Err(e) => {
                    error!("Cannot launch {}: {}", descriptor.name, e);
                    mark(&self.registry, descriptor.id, AgentState::Error);
                    report.broken.push(BrokenAgentRecord::new(
                        descriptor.id,
                        &descriptor.name,
                        "registry",
                        e.to_string(),
                    ));
                    continue;
                }
            };

            debug!("Spawning task for agent {} ({})", descriptor.name, descriptor.id);
            let handle = tokio::spawn(drive_agent(
                ctx,
                factory,
                sender.clone(),
                Arc::clone(&self.registry),
            ));
            handles.push((descriptor, handle));
        }

        info!("Launched {} agents for job {}", handles.len(), job.id);

        let (descriptors, joins): (Vec<AgentDescriptor>, Vec<_>) = handles.into_iter().unzip();
        let results = futures::future::join_all(joins).await;

        for (descriptor, joined) in descriptors.into_iter().zip(results) {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    let detail = if join_error.is_panic() {
                        "agent task panicked".to_string()
                    } else {
                        "agent task was cancelled".to_string()
                    };
                    error!("Agent {} task died: {}", descriptor.name, detail);
                    mark(&self.registry, descriptor.id, AgentState::Error);
                    TaskOutcome {
                        forwarded: 0,
                        skipped_empty: 0,
                        end: TaskEnd::Faulted,
                        broken: Some(BrokenAgentRecord::new(descriptor.id, &descriptor.name, "panic", detail)),
                    }
                }
            };

            if let Some(broken) = outcome.broken {
                report.broken.push(broken);
            }
            report.agents.push(AgentRunSummary {
                agent: descriptor.id,
                name: descriptor.name,
                forwarded: outcome.forwarded,
                skipped_empty: outcome.skipped_empty,
                end: outcome.end,
            });
        }

        // every producer clone is gone; this is the only end-of-stream
        report.end_of_stream_sent = match sender.end_of_stream().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not signal end of stream: {}", e);
                false
            }
        };

        report.elapsed = started.elapsed();
        if report.elapsed > self.acceptable_run {
            warn!(
                "Job {} took {:.1}s, longer than the acceptable {}s",
                job.id,
                report.elapsed.as_secs_f64(),
                self.acceptable_run.as_secs()
            );
        } else {
            info!("Job {} agents finished in {:.2}s", job.id, report.elapsed.as_secs_f64());
        }

        if !report.broken.is_empty() {
            metrics::counter!("weaver_broken_agents_total").increment(report.broken.len() as u64);
            warn!("{} agents broke during job {}", report.broken.len(), job.id);
            if let Err(e) = self.reporter.report(Some(job.id), &report.broken).await {
                error!("Failed to report broken agents: {}", e);
            }
        }

        Ok(report)
    }

    /// Context for one agent task; the agent may have left the registry
    /// since the launch loop listed it
    fn agent_context(&self, job: JobId, descriptor: &AgentDescriptor) -> Result<AgentContext> {
        Ok(AgentContext::new(
            descriptor.id,
            &descriptor.name,
            &descriptor.target,
            job,
            self.registry.params(descriptor.id)?,
            self.registry.state_handle(descriptor.id)?,
            self.shutdown.child_token(),
            self.proxy.clone(),
            self.middleware.clone(),
        ))
    }
}

fn mark(registry: &SharedRegistry, agent: AgentId, state: AgentState) {
    if let Err(e) = registry.set_state(agent, state) {
        // listener got there first
        debug!("State of agent {} not changed to {}: {}", agent, state, e);
    }
}

struct TaskOutcome {
    forwarded: u64,
    skipped_empty: u64,
    end: TaskEnd,
    broken: Option<BrokenAgentRecord>,
}

async fn drive_agent(
    ctx: AgentContext,
    factory: Arc<dyn AgentFactory>,
    sender: ResultSender,
    registry: Arc<SharedRegistry>,
) -> TaskOutcome {
    let outcome = produce(&ctx, factory, sender).await;
    match outcome.end {
        TaskEnd::Finished => mark(&registry, ctx.agent, AgentState::Complete),
        TaskEnd::Faulted => mark(&registry, ctx.agent, AgentState::Error),
        TaskEnd::Stopped(_) => {}
    }
    outcome
}

async fn produce(ctx: &AgentContext, factory: Arc<dyn AgentFactory>, sender: ResultSender) -> TaskOutcome {
    let mut outcome = TaskOutcome {
        forwarded: 0,
        skipped_empty: 0,
        end: TaskEnd::Finished,
        broken: None,
    };

    let mut stream = match factory.create(ctx.clone()) {
        Ok(stream) => stream,
        Err(fault) => {
            error!("[{}] extractor failed to start: {}", ctx.name, fault);
            outcome.end = TaskEnd::Faulted;
            outcome.broken = Some(BrokenAgentRecord::new(ctx.agent, &ctx.name, fault.kind, fault.detail));
            return outcome;
        }
    };

    let mut seq = 0u64;
    loop {
        if !ctx.should_continue() {
            let state = ctx.state();
            info!("[{}] stopping ({}), {} records forwarded", ctx.name, state, outcome.forwarded);
            outcome.end = TaskEnd::Stopped(state);
            break;
        }

        match stream.next().await {
            None => {
                info!("[{}] finished, {} records forwarded", ctx.name, outcome.forwarded);
                break;
            }
            Some(Ok(record)) if record.is_empty() => {
                outcome.skipped_empty += 1;
            }
            Some(Ok(record)) => {
                let envelope = ResultEnvelope {
                    agent: ctx.agent,
                    seq,
                    payload: record,
                };
                if let Err(e) = sender.send(envelope).await {
                    error!("[{}] result channel closed: {}", ctx.name, e);
                    outcome.end = TaskEnd::Faulted;
                    outcome.broken = Some(BrokenAgentRecord::new(ctx.agent, &ctx.name, "channel_closed", e.to_string()));
                    break;
                }
                metrics::counter!("weaver_records_forwarded_total").increment(1);
                outcome.forwarded += 1;
                seq += 1;
            }
            Some(Err(fault)) => {
                error!("[{}] extraction fault after {} records: {}", ctx.name, outcome.forwarded, fault);
                outcome.end = TaskEnd::Faulted;
                outcome.broken = Some(BrokenAgentRecord::new(ctx.agent, &ctx.name, fault.kind, fault.detail));
                break;
            }
        }
    }

    outcome
}
