//! Pipeline state machine
//!
//! One enum behind one lock, mutated only by the coordinator. Every
//! lifecycle flag the recording has lives here; there are no scattered
//! booleans to fall out of sync.

use serde::{Deserialize, Serialize};

/// Current state of the recording pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// No recording started
    Idle,
    /// Allocating encoders and the muxer, starting sources
    Preparing,
    /// Steady state: both drain loops running
    Recording,
    /// Stop requested; draining remaining output
    Stopping,
    /// Terminal: recording finished (successfully or as a clean empty stop)
    Stopped,
    /// Terminal: an unrecoverable error occurred
    Failed,
}

impl PipelineState {
    /// Terminal states admit no further transitions; a new recording
    /// requires a new pipeline instance.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Failed)
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(PipelineState::Stopped.is_terminal());
        assert!(PipelineState::Failed.is_terminal());
        assert!(!PipelineState::Idle.is_terminal());
        assert!(!PipelineState::Recording.is_terminal());
        assert!(!PipelineState::Stopping.is_terminal());
    }

    #[test]
    fn test_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PipelineState::Recording).unwrap(),
            "\"recording\""
        );
    }
}
