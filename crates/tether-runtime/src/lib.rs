//! # tether-runtime
//!
//! Event-driven orchestration core.
//!
//! - [`queue::EventQueue`]: bounded priority queue with an overflow policy
//! - [`bus::EventBus`]: event type to direct handlers / agent handler configs
//! - [`orchestrator::Orchestrator`]: owns queue, bus, history, long-poll
//!   waiters, and the dispatch ticker
//! - [`compaction::CompactionManager`]: save/restore blocks around a context
//!   reset of the upstream session
//! - [`agents::AgentRegistry`]: bounded background agent bookkeeping with an
//!   output-file completion poller
//! - [`collaborators`]: traits for memory, identity, timers, channels, skills

#![deny(unsafe_code)]

pub mod agents;
pub mod bus;
pub mod collaborators;
pub mod compaction;
pub mod errors;
pub mod orchestrator;
pub mod queue;

pub use agents::{AgentEntry, AgentRegistry, AgentStatus};
pub use bus::{AgentHandlerConfig, EventBus, EventHandler, FnHandler};
pub use collaborators::Collaborators;
pub use compaction::{CompactionManager, CompactionStats};
pub use errors::{CheckpointError, RuntimeError};
pub use orchestrator::{Orchestrator, OrchestratorState, OrchestratorStatus};
pub use queue::EventQueue;
