// packages/engine/src/registry/shared_registry.rs
//! Shared run-state registry
//!
//! The registry is the one place run state lives while agents are running,
//! and the only channel through which one component tells another to stop:
//! the pipeline listener flips an agent to ERROR here, the agent's task sees
//! it at its next state check.
//!
//! ```text
//! SharedRegistry
//! ├─ job / grouping            (current run)
//! ├─ entries: AgentId → RegistryEntry
//! │    ├─ descriptor
//! │    ├─ params               (immutable for the run)
//! │    └─ state: Arc<StateCell> ← set_state() / AgentStateHandle
//! └─ tables                    (output tables touched by the run)
//! ```
//!
//! It is an explicit context object: callers hold an `Arc<SharedRegistry>`.

use crate::registry::builders::RunPlan;
use crate::registry::job_store::JobStore;
use crate::registry::models::{
    AgentDescriptor, AgentId, AgentState, Grouping, Job, JobOutcome, RunParameters, StateCell,
};
use crate::utils::errors::{EngineError, Result};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One agent's slot in the registry
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub descriptor: AgentDescriptor,
    pub params: RunParameters,
    state: Arc<StateCell>,
}

impl RegistryEntry {
    pub fn state(&self) -> AgentState {
        self.state.load()
    }

    pub fn state_handle(&self) -> AgentStateHandle {
        AgentStateHandle {
            cell: Arc::clone(&self.state),
        }
    }
}

/// Read-only view of one agent's state, handed to its task for the
/// cooperative stop check
#[derive(Debug, Clone)]
pub struct AgentStateHandle {
    cell: Arc<StateCell>,
}

impl AgentStateHandle {
    pub fn state(&self) -> AgentState {
        self.cell.load()
    }

    pub fn is_running(&self) -> bool {
        self.cell.load() == AgentState::Running
    }
}

#[derive(Default)]
struct RunState {
    job: Option<Job>,
    grouping: Option<Grouping>,
    entries: HashMap<AgentId, RegistryEntry>,
    /// Insertion order of agents, for deterministic iteration
    order: Vec<AgentId>,
    tables: BTreeSet<String>,
}

/// Process-wide run state, internally synchronized
#[derive(Default)]
pub struct SharedRegistry {
    inner: RwLock<RunState>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the registry for a run and record its tables on the job.
    ///
    /// Fails with [`EngineError::RunInProgress`] if a run is already hosted.
    pub async fn build(&self, plan: RunPlan, store: &dyn JobStore) -> Result<()> {
        let tables = plan.table_names();
        let job_id = plan.job.id;

        {
            let mut inner = self.inner.write();
            if let Some(job) = &inner.job {
                return Err(EngineError::RunInProgress(job.id.to_string()));
            }

            let mut entries = HashMap::with_capacity(plan.agents.len());
            let mut order = Vec::with_capacity(plan.agents.len());
            for agent in plan.agents {
                let id = agent.descriptor.id;
                if entries.contains_key(&id) {
                    warn!("Agent {} listed twice in run; keeping first entry", id);
                    continue;
                }
                entries.insert(
                    id,
                    RegistryEntry {
                        descriptor: agent.descriptor,
                        params: agent.params,
                        state: Arc::new(StateCell::new(id)),
                    },
                );
                order.push(id);
            }

            *inner = RunState {
                job: Some(plan.job),
                grouping: plan.grouping,
                entries,
                order,
                tables: tables.clone(),
            };
        }

        if let Err(e) = store.record_tables(job_id, &tables).await {
            self.clear();
            return Err(e);
        }

        info!(
            "Registry built for job {} ({} agents, tables: {})",
            job_id,
            self.len(),
            tables.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        Ok(())
    }

    /// Snapshot of an agent's entry
    pub fn get(&self, id: AgentId) -> Result<RegistryEntry> {
        self.inner
            .read()
            .entries
            .get(&id)
            .cloned()
            .ok_or(EngineError::AgentNotFound(id))
    }

    pub fn state(&self, id: AgentId) -> Result<AgentState> {
        Ok(self.get(id)?.state())
    }

    /// Apply a state transition; only RUNNING -> {COMPLETE, ERROR} is legal.
    /// Returns the previous state.
    pub fn set_state(&self, id: AgentId, state: AgentState) -> Result<AgentState> {
        let inner = self.inner.read();
        let entry = inner.entries.get(&id).ok_or(EngineError::AgentNotFound(id))?;
        let previous = entry.state.transition(state)?;
        if previous != state {
            debug!("Agent {} ({}) {} -> {}", id, entry.descriptor.name, previous, state);
        }
        Ok(previous)
    }

    pub fn state_handle(&self, id: AgentId) -> Result<AgentStateHandle> {
        Ok(self.get(id)?.state_handle())
    }

    pub fn params(&self, id: AgentId) -> Result<RunParameters> {
        Ok(self.get(id)?.params)
    }

    pub fn agent_name(&self, id: AgentId) -> Result<String> {
        Ok(self.get(id)?.descriptor.name)
    }

    /// Agents of the current run, in build order
    pub fn agents(&self) -> Vec<AgentDescriptor> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .map(|e| e.descriptor.clone())
            .collect()
    }

    pub fn states(&self) -> Vec<(AgentId, AgentState)> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id).map(|e| (*id, e.state())))
            .collect()
    }

    pub fn job(&self) -> Option<Job> {
        self.inner.read().job.clone()
    }

    pub fn grouping(&self) -> Option<Grouping> {
        self.inner.read().grouping.clone()
    }

    pub fn table_names(&self) -> BTreeSet<String> {
        self.inner.read().tables.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a run is currently hosted
    pub fn is_built(&self) -> bool {
        self.inner.read().job.is_some()
    }

    /// Reset to an empty registry
    pub fn clear(&self) {
        *self.inner.write() = RunState::default();
    }

    /// Record the job's outcome and clear the registry
    pub async fn finish(&self, store: &dyn JobStore, outcome: JobOutcome) -> Result<()> {
        let job = self.job();
        if let Some(job) = job {
            store.set_outcome(job.id, outcome).await?;
            info!("Job {} finished ({:?})", job.id, outcome);
        }
        self.clear();
        info!("Registry cleared");
        Ok(())
    }

    /// Delete the job (and all output tied to it) and clear the registry
    pub async fn rollback(&self, store: &dyn JobStore) -> Result<()> {
        let job = self.inner.write().job.take();
        let result = match job {
            Some(job) => {
                warn!("Rolling back job {}", job.id);
                store.delete_job(job.id).await
            }
            None => Ok(()),
        };
        self.clear();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::builders::PlannedAgent;
    use crate::registry::job_store::InMemoryJobStore;

    fn plan(job: Job, ids: &[u64]) -> RunPlan {
        RunPlan {
            job,
            grouping: None,
            agents: ids
                .iter()
                .map(|id| PlannedAgent {
                    descriptor: AgentDescriptor::new(*id, format!("agent{}", id), "example.com")
                        .with_tables([format!("table{}", id % 2)]),
                    params: [("page", id.to_string())].into_iter().collect(),
                })
                .collect(),
        }
    }

    async fn built(ids: &[u64]) -> (SharedRegistry, InMemoryJobStore) {
        let store = InMemoryJobStore::new();
        let job = store.create_job(None).await.unwrap();
        let registry = SharedRegistry::new();
        registry.build(plan(job, ids), &store).await.unwrap();
        (registry, store)
    }

    #[tokio::test]
    async fn test_build_populates_entries() {
        let (registry, store) = built(&[1, 2, 3]).await;

        assert_eq!(registry.len(), 3);
        assert!(registry.is_built());
        assert_eq!(registry.state(AgentId(2)).unwrap(), AgentState::Running);
        assert_eq!(registry.params(AgentId(3)).unwrap().get("page"), Some("3"));
        assert_eq!(registry.agent_name(AgentId(1)).unwrap(), "agent1");

        let ids: Vec<AgentId> = registry.agents().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![AgentId(1), AgentId(2), AgentId(3)]);

        let job = registry.job().unwrap();
        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.tables.len(), 2);
    }

    #[tokio::test]
    async fn test_second_build_rejected() {
        let (registry, store) = built(&[1]).await;
        let job = store.create_job(None).await.unwrap();
        let err = registry.build(plan(job, &[2]), &store).await.unwrap_err();
        assert!(matches!(err, EngineError::RunInProgress(_)));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_set_state_enforces_transitions() {
        let (registry, _store) = built(&[1, 2]).await;

        registry.set_state(AgentId(1), AgentState::Error).unwrap();
        let err = registry.set_state(AgentId(1), AgentState::Running).unwrap_err();
        assert!(matches!(err, EngineError::IllegalTransition { .. }));
        assert_eq!(registry.state(AgentId(1)).unwrap(), AgentState::Error);

        // sibling untouched
        assert_eq!(registry.state(AgentId(2)).unwrap(), AgentState::Running);
    }

    #[tokio::test]
    async fn test_state_handle_observes_changes() {
        let (registry, _store) = built(&[5]).await;
        let handle = registry.state_handle(AgentId(5)).unwrap();
        assert!(handle.is_running());

        registry.set_state(AgentId(5), AgentState::Error).unwrap();
        assert!(!handle.is_running());
        assert_eq!(handle.state(), AgentState::Error);
    }

    #[tokio::test]
    async fn test_unknown_agent() {
        let (registry, _store) = built(&[1]).await;
        assert!(matches!(
            registry.set_state(AgentId(42), AgentState::Error),
            Err(EngineError::AgentNotFound(AgentId(42)))
        ));
    }

    #[tokio::test]
    async fn test_finish_clears_and_records_outcome() {
        let (registry, store) = built(&[1]).await;
        let job = registry.job().unwrap();

        registry.finish(&store, JobOutcome::Succeeded).await.unwrap();

        assert!(registry.is_empty());
        assert!(!registry.is_built());
        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.outcome, JobOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_rollback_deletes_job() {
        let (registry, store) = built(&[1, 2]).await;
        let job = registry.job().unwrap();

        registry.rollback(&store).await.unwrap();

        assert!(registry.is_empty());
        assert!(store.get_job(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_set_state_single_winner() {
        let (registry, _store) = built(&[9]).await;
        let registry = Arc::new(registry);

        let mut handles = vec![];
        for i in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let target = if i % 2 == 0 { AgentState::Complete } else { AgentState::Error };
                registry.set_state(AgentId(9), target).is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        // the winning state plus idempotent repeats of it succeed; the
        // other terminal state is always rejected
        let final_state = registry.state(AgentId(9)).unwrap();
        assert!(final_state.is_terminal());
        assert_eq!(winners, 8);
    }
}
