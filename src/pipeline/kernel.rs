//! The per-frame numeric kernel the pipeline computes with.
//!
//! The kernel is opaque to the pipeline. The pipeline only decides when it
//! runs and where its output goes.

use thiserror::Error;

use crate::types::{Complex64, QVector};

/// Failure reported by a kernel while staging or computing a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct KernelError(pub String);

impl KernelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Per-frame scattering computation.
///
/// Called concurrently from every compute worker, so implementations must be
/// `Sync` and must not rely on call order between frames.
pub trait FrameKernel: Send + Sync + 'static {
    /// Complex samples produced per frame.
    fn width(&self) -> usize;

    /// Prepare (load, broadcast) whatever the next vector needs.
    ///
    /// Runs on a staging worker once per vector, before any `compute` for it.
    fn stage(&self, _vector: &QVector) -> Result<(), KernelError> {
        Ok(())
    }

    /// Compute one frame's partial result into `out` (length `width()`, zeroed).
    fn compute(
        &self,
        vector: &QVector,
        frame: usize,
        out: &mut [Complex64],
    ) -> Result<(), KernelError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
