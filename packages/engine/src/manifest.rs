// packages/engine/src/manifest.rs
//! Run manifest
//!
//! A YAML document describing one run for the binary: the agents and
//! groupings the job store knows, the pipelines records go through, the
//! records each agent replays, and the launch request itself.
//!
//! ```yaml
//! agents:
//!   - id: 1
//!     name: eventseye
//!     target: eventseye.com
//!     tables: [events]
//!     pace_ms: 50
//!     records:
//!       - { title: "Expo", year: 2024 }
//!       - fail: "layout changed"
//! groupings:
//!   - { id: trade-shows, name: Trade shows, members: [{ agent: 1 }] }
//! pipelines:
//!   - name: events
//!     agents: [eventseye]
//!     table: events
//!     fields: [{ name: title, kind: string }]
//! launch: { kind: grouped, grouping: trade-shows }
//! ```

use crate::pipeline::{InMemorySink, PipelineRegistry, RecordSchema, RecordSink, SchemaPipeline};
use crate::registry::{AgentDescriptor, Grouping, InMemoryJobStore, LaunchRequest};
use crate::runtime::{AgentCatalog, AgentContext, AgentFactory, ExtractionFault, RawRecord, RecordStream};
use crate::utils::errors::{EngineError, Result};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One scripted item of an agent's output
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ReplayItem {
    /// Unhandled extraction fault
    Fault { fail: String },
    /// Extraction logic crashing outright
    Panic { panic: String },
    Record(RawRecord),
}

impl ReplayItem {
    fn into_result(self) -> std::result::Result<RawRecord, ExtractionFault> {
        match self {
            Self::Record(record) => Ok(record),
            Self::Fault { fail } => Err(ExtractionFault::new("replay", fail)),
            Self::Panic { panic } => panic!("{}", panic),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSpec {
    #[serde(flatten)]
    pub descriptor: AgentDescriptor,

    #[serde(default)]
    pub records: Vec<ReplayItem>,

    /// Delay before each item
    #[serde(default)]
    pub pace_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSpec {
    pub name: String,

    /// Agent names routed to this pipeline
    pub agents: Vec<String>,

    #[serde(flatten)]
    pub schema: RecordSchema,

    /// Reject duplicate values of this field within a job
    #[serde(default)]
    pub unique_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunManifest {
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub groupings: Vec<Grouping>,
    #[serde(default)]
    pub pipelines: Vec<PipelineSpec>,
    pub launch: LaunchRequest,
}

impl RunManifest {
    pub fn from_yaml(source: &str) -> Result<Self> {
        let manifest: RunManifest = serde_yaml::from_str(source)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::ManifestError(format!("Cannot read {}: {}", path.display(), e)))?;
        let manifest = Self::from_yaml(&source)?;
        info!(
            "Loaded manifest {} ({} agents, {} groupings, {} pipelines)",
            path.display(),
            manifest.agents.len(),
            manifest.groupings.len(),
            manifest.pipelines.len()
        );
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for agent in &self.agents {
            if !ids.insert(agent.descriptor.id) {
                return Err(EngineError::ManifestError(format!("Duplicate agent id {}", agent.descriptor.id)));
            }
            names.insert(agent.descriptor.name.as_str());
        }

        let mut pipelines = HashSet::new();
        for pipeline in &self.pipelines {
            if !pipelines.insert(pipeline.name.as_str()) {
                return Err(EngineError::ManifestError(format!("Duplicate pipeline '{}'", pipeline.name)));
            }
            if let Some(unknown) = pipeline.agents.iter().find(|a| !names.contains(a.as_str())) {
                return Err(EngineError::ManifestError(format!(
                    "Pipeline '{}' routes unknown agent '{}'",
                    pipeline.name, unknown
                )));
            }
        }
        Ok(())
    }

    /// Job store holding the manifest's agents and groupings
    pub fn job_store(&self) -> InMemoryJobStore {
        let store = InMemoryJobStore::new();
        for agent in &self.agents {
            store.insert_agent(agent.descriptor.clone());
        }
        for grouping in &self.groupings {
            store.insert_grouping(grouping.clone());
        }
        store
    }

    /// One replay extractor per agent name
    pub fn catalog(&self) -> AgentCatalog {
        let catalog = AgentCatalog::new();
        for agent in &self.agents {
            let replay = ReplayAgent::new(agent.records.clone(), Duration::from_millis(agent.pace_ms));
            catalog.register(agent.descriptor.name.clone(), Arc::new(replay));
        }
        catalog
    }

    /// Schema pipelines writing into in-memory sinks
    pub fn pipelines(&self) -> PipelineRegistry {
        self.pipelines_with(|spec| match &spec.unique_key {
            Some(key) => Arc::new(InMemorySink::with_unique_key(key.clone())),
            None => Arc::new(InMemorySink::new()),
        })
    }

    /// Schema pipelines writing into sinks built by `make_sink`
    pub fn pipelines_with<F>(&self, mut make_sink: F) -> PipelineRegistry
    where
        F: FnMut(&PipelineSpec) -> Arc<dyn RecordSink>,
    {
        let registry = PipelineRegistry::new();
        for spec in &self.pipelines {
            let pipeline = Arc::new(SchemaPipeline::new(spec.name.clone(), spec.schema.clone(), make_sink(spec)));
            for agent in &spec.agents {
                registry.register(agent.clone(), pipeline.clone());
            }
        }
        registry
    }
}

/// Extractor that replays a fixed list of items
#[derive(Debug, Clone)]
pub struct ReplayAgent {
    items: Arc<[ReplayItem]>,
    pace: Duration,
}

impl ReplayAgent {
    pub fn new(items: Vec<ReplayItem>, pace: Duration) -> Self {
        Self {
            items: items.into(),
            pace,
        }
    }
}

impl AgentFactory for ReplayAgent {
    fn create(&self, ctx: AgentContext) -> std::result::Result<RecordStream, ExtractionFault> {
        debug!("Agent {} replaying {} items from {}", ctx.name, self.items.len(), ctx.target);
        let pace = self.pace;
        let items = self.items.to_vec();

        let replay = stream::iter(items).then(move |item| async move {
            if !pace.is_zero() {
                tokio::time::sleep(pace).await;
            }
            item.into_result()
        });
        Ok(replay.boxed())
    }
}
