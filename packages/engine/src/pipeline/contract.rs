// packages/engine/src/pipeline/contract.rs
//! Pipeline contract
//!
//! A pipeline turns a raw record into a validated one and persists it.
//! Validation faults stop the producing agent; persistence faults are
//! per-record.

use crate::registry::JobId;
use crate::runtime::channel::RawRecord;
use async_trait::async_trait;
use thiserror::Error;

/// A record that passed validation, ready to persist
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    /// Output table the record belongs to
    pub table: String,
    pub fields: RawRecord,
}

/// Record rejected by validation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationFault {
    #[error("Missing required field '{0}'")]
    MissingField(String),

    #[error("Field '{field}' should be {expected}, got {actual}")]
    WrongKind {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Unexpected field '{0}'")]
    UnexpectedField(String),

    #[error("Invalid record: {0}")]
    Invalid(String),
}

/// Record could not be written
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistFault {
    /// Write conflicts with an existing row
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Backing store unreachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Validation and persistence for one family of agents
#[async_trait]
pub trait Pipeline: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(&self, record: &RawRecord) -> Result<ValidatedRecord, ValidationFault>;

    async fn persist(&self, job: JobId, record: ValidatedRecord) -> Result<(), PersistFault>;

    /// Drop everything persisted for a job (run rollback)
    async fn discard(&self, _job: JobId) -> Result<(), PersistFault> {
        Ok(())
    }
}
