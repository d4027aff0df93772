// packages/engine/tests/common/mod.rs
//! Shared fixtures for the run scenarios

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use weaver_engine::manifest::{ReplayAgent, ReplayItem};
use weaver_engine::pipeline::{PersistFault, Pipeline, ValidatedRecord, ValidationFault};
use weaver_engine::registry::{AgentDescriptor, InMemoryJobStore, JobId};
use weaver_engine::runtime::{AgentContext, AgentFactory, ExtractionFault, RawRecord, RecordStream};
use weaver_engine::EngineConfig;

pub fn raw(value: Value) -> RawRecord {
    value.as_object().cloned().unwrap()
}

/// Record carrying its producer and position
pub fn item(src: &str, n: u64) -> ReplayItem {
    ReplayItem::Record(raw(json!({ "title": format!("{}-{}", src, n), "src": src, "n": n })))
}

pub fn items(src: &str, count: u64) -> Vec<ReplayItem> {
    (0..count).map(|n| item(src, n)).collect()
}

pub fn fail(detail: &str) -> ReplayItem {
    ReplayItem::Fault { fail: detail.into() }
}

pub fn replay(items: Vec<ReplayItem>) -> Arc<dyn AgentFactory> {
    Arc::new(ReplayAgent::new(items, Duration::ZERO))
}

pub fn paced(items: Vec<ReplayItem>, pace: Duration) -> Arc<dyn AgentFactory> {
    Arc::new(ReplayAgent::new(items, pace))
}

pub fn store(names: &[&str]) -> Arc<InMemoryJobStore> {
    let store = InMemoryJobStore::new();
    for (i, name) in names.iter().enumerate() {
        store.insert_agent(AgentDescriptor::new(i as u64 + 1, *name, format!("{}.example", name)).with_tables(["events"]));
    }
    Arc::new(store)
}

pub fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.runtime.proxy_enabled = false;
    config.runtime.channel_capacity = 8;
    config
}

/// Extractor that only counts how often it was started
#[derive(Default)]
pub struct CountingFactory {
    pub started: AtomicUsize,
}

impl AgentFactory for CountingFactory {
    fn create(&self, _ctx: AgentContext) -> Result<RecordStream, ExtractionFault> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(futures::stream::empty::<Result<RawRecord, ExtractionFault>>()))
    }
}

/// Pipeline keeping every persisted record in arrival order.
///
/// Requires a string `title`; optionally panics on the n-th write.
#[derive(Default)]
pub struct RecordingPipeline {
    persisted: Mutex<Vec<(JobId, RawRecord)>>,
    discarded: Mutex<Vec<JobId>>,
    panic_on_write: Option<usize>,
}

impl RecordingPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn panicking_on_write(n: usize) -> Self {
        Self {
            panic_on_write: Some(n),
            ..Self::default()
        }
    }

    pub fn persisted(&self) -> Vec<(JobId, RawRecord)> {
        self.persisted.lock().clone()
    }

    pub fn discarded(&self) -> Vec<JobId> {
        self.discarded.lock().clone()
    }

    /// `n` values persisted for `src`, in persistence order
    pub fn sequence_of(&self, src: &str) -> Vec<u64> {
        self.persisted
            .lock()
            .iter()
            .filter(|(_, r)| r.get("src").and_then(Value::as_str) == Some(src))
            .filter_map(|(_, r)| r.get("n").and_then(Value::as_u64))
            .collect()
    }
}

#[async_trait]
impl Pipeline for RecordingPipeline {
    fn name(&self) -> &str {
        "recording"
    }

    async fn validate(&self, record: &RawRecord) -> Result<ValidatedRecord, ValidationFault> {
        match record.get("title") {
            Some(Value::String(_)) => Ok(ValidatedRecord {
                table: "events".into(),
                fields: record.clone(),
            }),
            Some(_) => Err(ValidationFault::Invalid("title is not a string".into())),
            None => Err(ValidationFault::MissingField("title".into())),
        }
    }

    async fn persist(&self, job: JobId, record: ValidatedRecord) -> Result<(), PersistFault> {
        let mut persisted = self.persisted.lock();
        if self.panic_on_write == Some(persisted.len() + 1) {
            panic!("storage driver crashed");
        }
        persisted.push((job, record.fields));
        Ok(())
    }

    async fn discard(&self, job: JobId) -> Result<(), PersistFault> {
        self.persisted.lock().retain(|(j, _)| *j != job);
        self.discarded.lock().push(job);
        Ok(())
    }
}
