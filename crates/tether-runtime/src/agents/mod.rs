//! Background agent tracking: the bounded registry and the output-file poller.

pub mod poller;
pub mod registry;

pub use poller::{COMPLETION_MARKERS, CompletionSignal, Inspection, inspect_output};
pub use registry::{AgentEntry, AgentRegistry, AgentStatus, EmitFn};
