//! Recording pipeline
//!
//! The coordinator, its state machine, and the events it emits.

pub mod coordinator;
pub mod state;

pub use coordinator::{Pipeline, PipelineEvent, RecordingSummary};
pub use state::PipelineState;
