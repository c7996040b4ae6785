//! # tether-core
//!
//! Foundation types shared by every tether crate.
//!
//! - [`events::Event`]: the immutable record flowing from input sources
//!   through the orchestrator to the upstream session
//! - [`ids`]: UUID v7 id generation
//! - [`time`]: epoch-millisecond clock helpers
//! - [`logging`]: `tracing` subscriber setup (stderr only)

#![deny(unsafe_code)]

pub mod events;
pub mod ids;
pub mod logging;
pub mod time;

pub use events::{Event, EventPriority};
