// packages/engine/src/registry/mod.rs
//! Run-state registry
//!
//! - **Models**: agents, parameters, lifecycle state, jobs, groupings
//! - **Builders**: resolve a launch request into a run plan (build faults)
//! - **Job Store**: persistence boundary for jobs and groupings
//! - **Shared Registry**: the synchronized run state all components share
//!
//! # State machine
//!
//! ```text
//!             ┌──────────► COMPLETE
//!   RUNNING ──┤
//!             └──────────► ERROR
//! ```
//!
//! No other edge exists; ERROR never returns to RUNNING.

pub mod builders;
pub mod job_store;
pub mod models;
pub mod shared_registry;

pub use builders::{build_plan, LaunchRequest, PlannedAgent, RunPlan};
pub use job_store::{InMemoryJobStore, JobStore};
pub use models::{
    AgentDescriptor, AgentId, AgentState, BrokenAgentRecord, Grouping, GroupingMember, Job, JobId,
    JobOutcome, RunParameters,
};
pub use shared_registry::{AgentStateHandle, RegistryEntry, SharedRegistry};
