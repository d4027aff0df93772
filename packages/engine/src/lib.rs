// packages/engine/src/lib.rs
//! WebWeaver Orchestration Engine Library
//!
//! Runs many data-collection agents concurrently against one job, funnels
//! their raw records through a single bounded channel, and validates and
//! persists them through per-agent pipelines.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **registry**: Shared run state: agents, parameters, lifecycle, job
//! - **proxy**: Sticky/rotating proxy pool and the backoff executor
//! - **middleware**: Response middleware chain
//! - **runtime**: Agent contract, result channel, launcher, coordinator
//! - **pipeline**: Pipeline contract, schema pipelines, the listener
//! - **manifest**: YAML run manifest consumed by the binary
//! - **observability**: Tracing and Prometheus metrics setup
//! - **utils**: Configuration and the engine error type

pub mod manifest;
pub mod middleware;
pub mod observability;
pub mod pipeline;
pub mod proxy;
pub mod registry;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use registry::{AgentId, AgentState, JobId, LaunchRequest, SharedRegistry};
pub use runtime::{RunCoordinator, RunSummary};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine build information
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: VERSION,
        }
    }
}
