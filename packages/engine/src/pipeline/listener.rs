// packages/engine/src/pipeline/listener.rs
//! Pipeline listener
//!
//! Sole consumer of the result channel. For each envelope: resolve the
//! agent's pipeline, validate, persist.
//!
//! - Missing pipeline or validation fault: the agent is flipped to ERROR
//!   through the registry; the listener keeps going.
//! - Persistence fault: logged, record skipped, agent state untouched
//!   (unless `persist_fault_sets_error` is on).
//! - End of stream, or every sender gone: stop.

use crate::pipeline::registry::PipelineRegistry;
use crate::registry::{AgentId, AgentState, JobId, SharedRegistry};
use crate::runtime::channel::{ChannelMessage, ResultEnvelope, ResultReceiver};
use crate::utils::errors::{EngineError, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Why the listener stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerEnd {
    #[default]
    EndOfStream,

    /// All senders dropped without an end-of-stream message
    ChannelClosed,
}

/// What the listener did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerReport {
    pub received: u64,
    pub persisted: u64,
    pub validation_failures: u64,
    pub persist_failures: u64,
    pub missing_pipeline: u64,
    /// Envelopes from agents the registry does not know
    pub unknown_agent: u64,
    pub ended_by: ListenerEnd,
}

pub struct PipelineListener {
    registry: Arc<SharedRegistry>,
    pipelines: Arc<PipelineRegistry>,
    persist_fault_sets_error: bool,
}

impl PipelineListener {
    pub fn new(registry: Arc<SharedRegistry>, pipelines: Arc<PipelineRegistry>) -> Self {
        Self {
            registry,
            pipelines,
            persist_fault_sets_error: false,
        }
    }

    /// Treat persistence faults like validation faults
    pub fn persist_fault_sets_error(mut self, enabled: bool) -> Self {
        self.persist_fault_sets_error = enabled;
        self
    }

    /// Consume the channel until end of stream
    pub async fn listen(&self, mut receiver: ResultReceiver) -> Result<ListenerReport> {
        let job = self
            .registry
            .job()
            .ok_or_else(|| EngineError::RegistryError("Listener started before the registry was built".into()))?;

        info!("Pipeline listener started for job {}", job.id);
        let mut report = ListenerReport::default();

        loop {
            match receiver.recv().await {
                Some(ChannelMessage::Record(envelope)) => {
                    report.received += 1;
                    self.handle(job.id, envelope, &mut report).await;
                }
                Some(ChannelMessage::EndOfStream) => {
                    report.ended_by = ListenerEnd::EndOfStream;
                    break;
                }
                None => {
                    warn!("Result channel closed without end of stream");
                    report.ended_by = ListenerEnd::ChannelClosed;
                    break;
                }
            }
        }

        info!(
            "Pipeline listener stopped: {} received, {} persisted, {} invalid, {} failed writes",
            report.received, report.persisted, report.validation_failures, report.persist_failures
        );
        Ok(report)
    }

    async fn handle(&self, job: JobId, envelope: ResultEnvelope, report: &mut ListenerReport) {
        let agent = envelope.agent;
        let name = match self.registry.agent_name(agent) {
            Ok(name) => name,
            Err(_) => {
                error!("Dropping record #{} from unknown agent {}", envelope.seq, agent);
                report.unknown_agent += 1;
                return;
            }
        };

        let Some(pipeline) = self.pipelines.resolve(&name) else {
            error!("No pipeline registered for {}; stopping agent", name);
            report.missing_pipeline += 1;
            self.flip_to_error(agent, &name);
            return;
        };

        let validated = match pipeline.validate(&envelope.payload).await {
            Ok(validated) => validated,
            Err(fault) => {
                error!("[{}] record #{} failed validation: {}", name, envelope.seq, fault);
                metrics::counter!("weaver_validation_failures_total").increment(1);
                report.validation_failures += 1;
                self.flip_to_error(agent, &name);
                return;
            }
        };

        match pipeline.persist(job, validated).await {
            Ok(()) => {
                debug!("[{}] record #{} persisted", name, envelope.seq);
                metrics::counter!("weaver_records_persisted_total").increment(1);
                report.persisted += 1;
            }
            Err(fault) => {
                warn!("[{}] record #{} not persisted: {}", name, envelope.seq, fault);
                metrics::counter!("weaver_persist_failures_total").increment(1);
                report.persist_failures += 1;
                if self.persist_fault_sets_error {
                    self.flip_to_error(agent, &name);
                }
            }
        }
    }

    fn flip_to_error(&self, agent: AgentId, name: &str) {
        match self.registry.set_state(agent, AgentState::Error) {
            Ok(AgentState::Running) => info!("Agent {} set to ERROR", name),
            Ok(_) => {}
            Err(e) => warn!("Could not set {} to ERROR: {}", name, e),
        }
    }
}
