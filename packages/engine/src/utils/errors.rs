// packages/engine/src/utils/errors.rs
//! Engine-wide error type
//!
//! Every fallible operation in the crate returns [`Result<T>`]. Component
//! faults that are contained locally (validation, persistence, extraction,
//! middleware) have their own types next to the component and are only
//! converted into [`EngineError`] when they cross a component boundary.

use crate::registry::models::{AgentId, AgentState};
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the orchestration engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Observability stack failed to initialize
    #[error("Observability setup failed: {0}")]
    ObservabilityError(String),

    /// Generic registry misuse (lookup before build, etc.)
    #[error("Registry error: {0}")]
    RegistryError(String),

    /// A run is already registered; the registry holds one run at a time
    #[error("A run is already in progress (job {0})")]
    RunInProgress(String),

    /// Agent is not part of the current run, or unknown to the store
    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    /// Grouping id does not exist in the store
    #[error("Grouping not found: {0}")]
    GroupingNotFound(String),

    /// Grouping exists but has no agents attached
    #[error("Grouping {0} has no agents")]
    EmptyGrouping(String),

    /// Attempted an agent state edge other than RUNNING -> {COMPLETE, ERROR}
    #[error("Illegal state transition for agent {agent}: {from} -> {to}")]
    IllegalTransition {
        agent: AgentId,
        from: AgentState,
        to: AgentState,
    },

    /// No extraction logic registered under the agent's name
    #[error("No extractor registered for agent '{0}'")]
    ExtractorNotFound(String),

    /// Sticky acquisition requested but the sticky set is empty
    #[error("No sticky proxy endpoints configured")]
    NoStickyEndpoints,

    /// Rotating acquisition requested but the rotating set is empty
    #[error("No rotating proxy endpoints configured")]
    NoRotatingEndpoints,

    /// Endpoint released that was never marked in use
    #[error("Proxy endpoint not in use: {0}")]
    EndpointNotInUse(String),

    /// Transient fault kept recurring until the next delay passed the ceiling
    #[error("Retry ceiling exceeded after {attempts} attempts: {last_error}")]
    RetryCeilingExceeded { attempts: u32, last_error: String },

    /// Non-retryable request failure
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Result channel receiver or sender went away
    #[error("Result channel closed")]
    ChannelClosed,

    /// Job store or error store failure
    #[error("Storage operation failed: {0}")]
    StorageFailed(String),

    /// A spawned orchestration task died (panic or abort)
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// Manifest parsing failure
    #[error("Manifest error: {0}")]
    ManifestError(String),
}

impl EngineError {
    /// Whether this error is a build fault: the run is rejected before any
    /// agent task is spawned.
    pub fn is_build_fault(&self) -> bool {
        matches!(
            self,
            EngineError::AgentNotFound(_)
                | EngineError::GroupingNotFound(_)
                | EngineError::EmptyGrouping(_)
                | EngineError::RunInProgress(_)
                | EngineError::ExtractorNotFound(_)
        )
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::StorageFailed(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::ManifestError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_fault_classification() {
        assert!(EngineError::GroupingNotFound("g1".into()).is_build_fault());
        assert!(EngineError::EmptyGrouping("g1".into()).is_build_fault());
        assert!(EngineError::AgentNotFound(AgentId(4)).is_build_fault());
        assert!(EngineError::ExtractorNotFound("eventseye".into()).is_build_fault());
        assert!(!EngineError::ChannelClosed.is_build_fault());
        assert!(!EngineError::NoStickyEndpoints.is_build_fault());
    }

    #[test]
    fn test_illegal_transition_message() {
        let err = EngineError::IllegalTransition {
            agent: AgentId(7),
            from: AgentState::Error,
            to: AgentState::Running,
        };
        assert_eq!(
            err.to_string(),
            "Illegal state transition for agent 7: ERROR -> RUNNING"
        );
    }
}
