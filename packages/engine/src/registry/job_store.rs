// packages/engine/src/registry/job_store.rs
//! Job and grouping persistence boundary
//!
//! The engine creates, annotates and deletes jobs through [`JobStore`] but
//! owns none of the backing schema. [`InMemoryJobStore`] is the in-process
//! implementation used by the binary and the tests.

use crate::registry::models::{AgentDescriptor, AgentId, Grouping, Job, JobId, JobOutcome};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Job/grouping store used when building, finishing and rolling back runs
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_agent(&self, id: AgentId) -> Result<Option<AgentDescriptor>>;

    async fn get_grouping(&self, id: &str) -> Result<Option<Grouping>>;

    /// Create a new job, optionally associated with a grouping
    async fn create_job(&self, grouping: Option<&str>) -> Result<Job>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;

    /// Record the output tables a job touches
    async fn record_tables(&self, job: JobId, tables: &BTreeSet<String>) -> Result<()>;

    async fn set_outcome(&self, job: JobId, outcome: JobOutcome) -> Result<()>;

    /// Delete a job and everything tied to it
    async fn delete_job(&self, job: JobId) -> Result<()>;
}

/// DashMap-backed job store
#[derive(Default)]
pub struct InMemoryJobStore {
    agents: DashMap<AgentId, AgentDescriptor>,
    groupings: DashMap<String, Grouping>,
    jobs: DashMap<JobId, Job>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_agent(&self, agent: AgentDescriptor) {
        self.agents.insert(agent.id, agent);
    }

    pub fn insert_grouping(&self, grouping: Grouping) {
        self.groupings.insert(grouping.id.clone(), grouping);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get_agent(&self, id: AgentId) -> Result<Option<AgentDescriptor>> {
        Ok(self.agents.get(&id).map(|a| a.clone()))
    }

    async fn get_grouping(&self, id: &str) -> Result<Option<Grouping>> {
        Ok(self.groupings.get(id).map(|g| g.clone()))
    }

    async fn create_job(&self, grouping: Option<&str>) -> Result<Job> {
        let job = Job::new(grouping.map(str::to_string));
        debug!("Created job {} (grouping: {:?})", job.id, job.grouping);
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.get(&id).map(|j| j.clone()))
    }

    async fn record_tables(&self, job: JobId, tables: &BTreeSet<String>) -> Result<()> {
        let mut entry = self
            .jobs
            .get_mut(&job)
            .ok_or_else(|| EngineError::StorageFailed(format!("Job {} does not exist", job)))?;
        entry.tables.extend(tables.iter().cloned());
        Ok(())
    }

    async fn set_outcome(&self, job: JobId, outcome: JobOutcome) -> Result<()> {
        let mut entry = self
            .jobs
            .get_mut(&job)
            .ok_or_else(|| EngineError::StorageFailed(format!("Job {} does not exist", job)))?;
        entry.outcome = outcome;
        Ok(())
    }

    async fn delete_job(&self, job: JobId) -> Result<()> {
        if self.jobs.remove(&job).is_some() {
            info!("Deleted job {}", job);
        }
        Ok(())
    }
}
