//! Pipeline State and Status
//!
//! Per-vector lifecycle state plus the counters an external monitor reads.

use serde::{Deserialize, Serialize};

/// Where the current vector is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    /// No vector in flight
    Idle,
    /// Coordinate data for the vector is being loaded
    Staging,
    /// Per-frame partial results are being produced
    Computing,
    /// Remaining results are being folded into the spectrum
    Marshaling,
    /// The spectrum was handed to the writer
    Written,
    /// A fatal error stopped the run
    Aborted,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Written | PipelineState::Aborted)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "Idle"),
            PipelineState::Staging => write!(f, "Staging"),
            PipelineState::Computing => write!(f, "Computing"),
            PipelineState::Marshaling => write!(f, "Marshaling"),
            PipelineState::Written => write!(f, "Written"),
            PipelineState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Snapshot of pipeline progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub state: PipelineState,

    /// Position of the current vector in this group's assignment
    pub current_vector: usize,

    /// Global id of the current vector
    pub current_vector_id: Option<u64>,

    pub total_vectors: usize,

    pub vectors_written: usize,

    /// Frames this node computes per vector
    pub frames_per_vector: usize,

    pub frames_computed: usize,

    pub frames_accumulated: usize,
}

impl PipelineStatus {
    pub fn new(total_vectors: usize, frames_per_vector: usize) -> Self {
        Self {
            state: PipelineState::Idle,
            current_vector: 0,
            current_vector_id: None,
            total_vectors,
            vectors_written: 0,
            frames_per_vector,
            frames_computed: 0,
            frames_accumulated: 0,
        }
    }

    /// Fraction of the assignment done, counting accumulated frames of the
    /// vector in flight. An empty assignment is complete.
    pub fn progress(&self) -> f64 {
        if self.total_vectors == 0 {
            return 1.0;
        }
        let partial = if self.state == PipelineState::Written || self.frames_per_vector == 0 {
            0.0
        } else {
            self.frames_accumulated as f64 / self.frames_per_vector as f64
        };
        ((self.vectors_written as f64 + partial) / self.total_vectors as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_starts_idle() {
        let status = PipelineStatus::new(4, 10);
        assert_eq!(status.state, PipelineState::Idle);
        assert_eq!(status.progress(), 0.0);
    }

    #[test]
    fn test_progress_counts_partial_vector() {
        let mut status = PipelineStatus::new(4, 10);
        status.state = PipelineState::Marshaling;
        status.vectors_written = 1;
        status.frames_accumulated = 5;
        assert!((status.progress() - 1.5 / 4.0).abs() < 1e-12);

        status.state = PipelineState::Written;
        status.vectors_written = 4;
        assert_eq!(status.progress(), 1.0);
    }

    #[test]
    fn test_empty_assignment_is_complete() {
        assert_eq!(PipelineStatus::new(0, 0).progress(), 1.0);
    }

    #[test]
    fn test_state_display_and_terminal() {
        assert_eq!(format!("{}", PipelineState::Marshaling), "Marshaling");
        assert_eq!(format!("{}", PipelineState::Aborted), "Aborted");
        assert!(PipelineState::Written.is_terminal());
        assert!(PipelineState::Aborted.is_terminal());
        assert!(!PipelineState::Computing.is_terminal());
    }
}
