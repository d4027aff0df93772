// packages/engine/src/runtime/mod.rs
//! Agent execution runtime
//!
//! - **Agent**: the extraction contract and the per-task context
//! - **Channel**: bounded result channel with a single end-of-stream marker
//! - **Launcher**: one task per active agent, fault isolation, EOS emission
//! - **Error Reporter**: where broken-agent records end up
//! - **Coordinator**: build, launch + listen, then finish or roll back
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────── Launcher ────────────────┐
//!                 │  task(agent 1)  task(agent 2)  task(...) │
//!                 │      │              │             │      │
//!                 └──────┼──────────────┼─────────────┼──────┘
//!                        ▼              ▼             ▼
//!                 ┌───────────── ResultChannel (bounded) ────┐
//!                 │  Record, Record, ..., EndOfStream         │
//!                 └───────────────────┬──────────────────────┘
//!                                     ▼
//!                              PipelineListener
//! ```
//!
//! Agents check their own state and the run-wide shutdown token between
//! items; nothing is aborted mid-request.

pub mod agent;
pub mod channel;
pub mod coordinator;
pub mod error_reporter;
pub mod launcher;

pub use agent::{AgentCatalog, AgentContext, AgentFactory, ExtractionFault, RecordStream};
pub use channel::{result_channel, ChannelMessage, ChannelStats, RawRecord, ResultEnvelope, ResultReceiver, ResultSender};
pub use coordinator::{RunCoordinator, RunSummary};
pub use error_reporter::{ErrorReporter, InMemoryErrorReporter, LogErrorReporter, SqliteErrorReporter, StoredAgentError};
pub use launcher::{AgentRunSummary, LaunchReport, Launcher, TaskEnd};
