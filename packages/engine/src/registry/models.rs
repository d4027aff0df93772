// packages/engine/src/registry/models.rs
//! Run-state data model
//!
//! Agents, their parameters and lifecycle state, and the job/grouping a run
//! belongs to.

use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use ulid::Ulid;

/// Agent identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub u64);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static description of an agent, owned by the job store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: AgentId,

    /// Agent family name; also the key used to resolve its pipeline
    pub name: String,

    /// Target domain or entry URL
    pub target: String,

    /// Inactive agents are registered but never spawned
    #[serde(default = "default_active")]
    pub active: bool,

    /// Parameter names this agent declares
    #[serde(default)]
    pub parameters: Vec<String>,

    /// Output tables this agent writes to
    #[serde(default)]
    pub tables: Vec<String>,
}

fn default_active() -> bool {
    true
}

impl AgentDescriptor {
    pub fn new(id: u64, name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: AgentId(id),
            name: name.into(),
            target: target.into(),
            active: true,
            parameters: vec![],
            tables: vec![],
        }
    }

    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parameters<I, S>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = parameters.into_iter().map(Into::into).collect();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Parameter values supplied to one agent for one run.
///
/// There is no mutating API; a run sees the values it was built with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunParameters(BTreeMap<String, String>);

impl RunParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for RunParameters
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Agent lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Running,
    Complete,
    Error,
}

impl AgentState {
    fn as_u8(self) -> u8 {
        match self {
            AgentState::Running => 0,
            AgentState::Complete => 1,
            AgentState::Error => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => AgentState::Running,
            1 => AgentState::Complete,
            _ => AgentState::Error,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, AgentState::Running)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Running => "RUNNING",
            AgentState::Complete => "COMPLETE",
            AgentState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Atomic holder for one agent's state.
///
/// Only `RUNNING -> COMPLETE` and `RUNNING -> ERROR` succeed. Re-applying the
/// current terminal state is a no-op; every other edge is rejected.
#[derive(Debug)]
pub struct StateCell {
    agent: AgentId,
    state: AtomicU8,
}

impl StateCell {
    pub fn new(agent: AgentId) -> Self {
        Self {
            agent,
            state: AtomicU8::new(AgentState::Running.as_u8()),
        }
    }

    pub fn load(&self) -> AgentState {
        AgentState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Apply a transition. Returns the previous state on success.
    pub fn transition(&self, to: AgentState) -> Result<AgentState> {
        let from = self.load();
        if from == to && to.is_terminal() {
            return Ok(from);
        }

        match self.state.compare_exchange(
            AgentState::Running.as_u8(),
            to.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) if to.is_terminal() => Ok(AgentState::Running),
            Ok(_) => Err(EngineError::IllegalTransition {
                agent: self.agent,
                from: AgentState::Running,
                to,
            }),
            Err(current) => {
                let current = AgentState::from_u8(current);
                if current == to {
                    Ok(current)
                } else {
                    Err(EngineError::IllegalTransition {
                        agent: self.agent,
                        from: current,
                        to,
                    })
                }
            }
        }
    }
}

/// Job identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Final outcome recorded on a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Pending,
    Succeeded,
    /// Run completed but at least one agent broke or had a record rejected
    CompletedWithErrors,
    /// Run was shut down before its agents finished
    Interrupted,
}

/// One execution of one or more agents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub grouping: Option<String>,
    pub tables: BTreeSet<String>,
    pub outcome: JobOutcome,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(grouping: Option<String>) -> Self {
        Self {
            id: JobId::new(),
            grouping,
            tables: BTreeSet::new(),
            outcome: JobOutcome::Pending,
            created_at: Utc::now(),
        }
    }
}

/// A grouping member: the agent and the parameter values it runs with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingMember {
    pub agent: AgentId,
    #[serde(default)]
    pub params: RunParameters,
}

/// Named, reusable set of agents (recurring run template)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouping {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub members: Vec<GroupingMember>,
}

/// Agent that faulted during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenAgentRecord {
    pub agent: AgentId,
    pub agent_name: String,
    /// Short fault classification, e.g. `extraction`, `panic`
    pub error_kind: String,
    pub detail: String,
    pub logged_at: DateTime<Utc>,
}

impl BrokenAgentRecord {
    pub fn new(
        agent: AgentId,
        agent_name: impl Into<String>,
        error_kind: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            agent_name: agent_name.into(),
            error_kind: error_kind.into(),
            detail: detail.into(),
            logged_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_legal_edges() {
        let cell = StateCell::new(AgentId(1));
        assert_eq!(cell.load(), AgentState::Running);
        assert_eq!(cell.transition(AgentState::Complete).unwrap(), AgentState::Running);
        assert_eq!(cell.load(), AgentState::Complete);

        let cell = StateCell::new(AgentId(2));
        cell.transition(AgentState::Error).unwrap();
        assert_eq!(cell.load(), AgentState::Error);
    }

    #[test]
    fn test_state_cell_rejects_error_to_running() {
        let cell = StateCell::new(AgentId(3));
        cell.transition(AgentState::Error).unwrap();

        let err = cell.transition(AgentState::Running).unwrap_err();
        assert!(matches!(
            err,
            EngineError::IllegalTransition {
                from: AgentState::Error,
                to: AgentState::Running,
                ..
            }
        ));
        assert_eq!(cell.load(), AgentState::Error);
    }

    #[test]
    fn test_state_cell_rejects_complete_to_error() {
        let cell = StateCell::new(AgentId(4));
        cell.transition(AgentState::Complete).unwrap();
        assert!(cell.transition(AgentState::Error).is_err());
        assert_eq!(cell.load(), AgentState::Complete);
    }

    #[test]
    fn test_state_cell_repeat_terminal_is_noop() {
        let cell = StateCell::new(AgentId(5));
        cell.transition(AgentState::Error).unwrap();
        assert_eq!(cell.transition(AgentState::Error).unwrap(), AgentState::Error);
    }

    #[test]
    fn test_running_to_running_rejected() {
        let cell = StateCell::new(AgentId(6));
        assert!(cell.transition(AgentState::Running).is_err());
        assert_eq!(cell.load(), AgentState::Running);
    }

    #[test]
    fn test_run_parameters_from_iter() {
        let params: RunParameters = [("search", "bakeries, NY"), ("pages", "3")]
            .into_iter()
            .collect();
        assert_eq!(params.get("search"), Some("bakeries, NY"));
        assert_eq!(params.len(), 2);
        assert!(params.get("missing").is_none());
    }
}
