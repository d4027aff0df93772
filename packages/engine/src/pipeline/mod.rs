// packages/engine/src/pipeline/mod.rs
//! Validation and persistence of agent output
//!
//! - **Contract**: the [`Pipeline`] trait and its fault types
//! - **Schema**: schema-checked pipeline over pluggable record sinks
//! - **Registry**: agent name → pipeline
//! - **Listener**: the result channel's consumer
//!
//! ```text
//! ResultReceiver ──► PipelineListener ──► PipelineRegistry::resolve(agent)
//!                          │                    │
//!                          │              validate ── fault ──► registry: ERROR
//!                          │                    │
//!                          │              persist ─── fault ──► log, next record
//!                          ▼
//!                    EndOfStream: stop
//! ```

pub mod contract;
pub mod listener;
pub mod registry;
pub mod schema;

pub use contract::{PersistFault, Pipeline, ValidatedRecord, ValidationFault};
pub use listener::{ListenerEnd, ListenerReport, PipelineListener};
pub use registry::PipelineRegistry;
pub use schema::{FieldKind, FieldSpec, InMemorySink, LogSink, RecordSchema, RecordSink, SchemaPipeline};
