// packages/engine/src/pipeline/registry.rs
//! Static agent name → pipeline mapping

use crate::pipeline::contract::Pipeline;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub struct PipelineRegistry {
    by_agent: DashMap<String, Arc<dyn Pipeline>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, agent_name: impl Into<String>, pipeline: Arc<dyn Pipeline>) {
        let agent_name = agent_name.into();
        debug!("Pipeline {} handles agent '{}'", pipeline.name(), agent_name);
        self.by_agent.insert(agent_name, pipeline);
    }

    pub fn with(self, agent_name: impl Into<String>, pipeline: Arc<dyn Pipeline>) -> Self {
        self.register(agent_name, pipeline);
        self
    }

    pub fn resolve(&self, agent_name: &str) -> Option<Arc<dyn Pipeline>> {
        self.by_agent.get(agent_name).map(|p| Arc::clone(p.value()))
    }

    /// Every distinct pipeline, however many agents share it
    pub fn pipelines(&self) -> Vec<Arc<dyn Pipeline>> {
        let mut distinct: Vec<Arc<dyn Pipeline>> = Vec::new();
        for entry in self.by_agent.iter() {
            if !distinct.iter().any(|p| Arc::ptr_eq(p, entry.value())) {
                distinct.push(Arc::clone(entry.value()));
            }
        }
        distinct
    }

    pub fn len(&self) -> usize {
        self.by_agent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_agent.is_empty()
    }
}
