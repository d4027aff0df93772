// packages/engine/src/registry/builders.rs
//! Run builders
//!
//! Turn a [`LaunchRequest`] into a [`RunPlan`] by resolving agents, groupings
//! and the job through the [`JobStore`]. Any failure here is a build fault:
//! the run is rejected before a single agent task exists.

use crate::registry::job_store::JobStore;
use crate::registry::models::{AgentDescriptor, AgentId, Grouping, Job, JobId, RunParameters};
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, error, info};

/// What the trigger surface asks for
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchRequest {
    /// One agent, with explicit parameters; optionally appended to an
    /// existing job
    Solo {
        agent: AgentId,
        #[serde(default)]
        params: RunParameters,
        #[serde(default)]
        job: Option<JobId>,
    },

    /// Every agent of a stored grouping, with the grouping's parameters
    Grouped { grouping: String },
}

/// An agent as it takes part in one run
#[derive(Debug, Clone)]
pub struct PlannedAgent {
    pub descriptor: AgentDescriptor,
    pub params: RunParameters,
}

/// Everything the registry needs to host one run
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub job: Job,
    pub grouping: Option<Grouping>,
    pub agents: Vec<PlannedAgent>,
}

impl RunPlan {
    /// Union of output tables across all agents in the plan
    pub fn table_names(&self) -> BTreeSet<String> {
        self.agents
            .iter()
            .flat_map(|a| a.descriptor.tables.iter().cloned())
            .collect()
    }
}

/// Resolve a launch request against the store
pub async fn build_plan(store: &dyn JobStore, request: &LaunchRequest) -> Result<RunPlan> {
    match request {
        LaunchRequest::Solo { agent, params, job } => build_solo(store, *agent, params, *job).await,
        LaunchRequest::Grouped { grouping } => build_grouped(store, grouping).await,
    }
}

async fn build_solo(
    store: &dyn JobStore,
    agent: AgentId,
    params: &RunParameters,
    job_id: Option<JobId>,
) -> Result<RunPlan> {
    let descriptor = store.get_agent(agent).await?.ok_or_else(|| {
        error!("Solo build could not find agent with id '{}'", agent);
        EngineError::AgentNotFound(agent)
    })?;

    let existing = match job_id {
        Some(id) => store.get_job(id).await?,
        None => None,
    };
    let job = match existing {
        Some(job) => {
            debug!("Reusing job {} for solo run of {}", job.id, descriptor.name);
            job
        }
        None => store.create_job(None).await?,
    };

    info!("Built solo run for {} (job {})", descriptor.name, job.id);

    Ok(RunPlan {
        job,
        grouping: None,
        agents: vec![PlannedAgent {
            descriptor,
            params: params.clone(),
        }],
    })
}

async fn build_grouped(store: &dyn JobStore, grouping_id: &str) -> Result<RunPlan> {
    let grouping = store.get_grouping(grouping_id).await?.ok_or_else(|| {
        error!("Could not build grouping with id '{}'", grouping_id);
        EngineError::GroupingNotFound(grouping_id.to_string())
    })?;

    if grouping.members.is_empty() {
        error!("Grouping '{}' has no agents", grouping_id);
        return Err(EngineError::EmptyGrouping(grouping_id.to_string()));
    }

    let mut agents = Vec::with_capacity(grouping.members.len());
    for member in &grouping.members {
        let descriptor = store
            .get_agent(member.agent)
            .await?
            .ok_or(EngineError::AgentNotFound(member.agent))?;
        agents.push(PlannedAgent {
            descriptor,
            params: member.params.clone(),
        });
    }

    let job = store.create_job(Some(&grouping.id)).await?;
    info!(
        "Built grouped run '{}' with {} agents (job {})",
        grouping.name,
        agents.len(),
        job.id
    );

    Ok(RunPlan {
        job,
        grouping: Some(grouping),
        agents,
    })
}
