//! Scattering Pipeline Module
//!
//! ## 3-Stage Worker Pipeline
//!
//! ```text
//! STAGE 1: Staging    (load/broadcast the vector, release one token per owned frame)
//! STAGE 2: Compute    (kernel produces one frame's partial result into a pooled buffer)
//! STAGE 3: Marshal    (fold the result into the shared spectrum, recycle the buffer)
//! WRITE:   Reduce     (sum partial spectra across the process group, rank 0 writes)
//! ```
//!
//! One vector is in flight at a time. Stages hand work to each other through
//! blocking queues and report back to the orchestrator through a channel.

mod accumulator;
mod controller;
mod group;
mod kernel;
mod queue;
mod sink;
mod state;

pub use accumulator::SpectrumAccumulator;
pub use controller::{
    AbortHandle, PipelineController, PipelineError, PipelineInputs, StageRole, StatusHandle,
};
pub use group::{LocalGroup, ProcessGroup, SharedMemoryGroup};
pub use kernel::{FrameKernel, KernelError};
pub use queue::ConcurrentQueue;
pub use sink::{
    JsonLinesWriter, MemoryWriter, NullMonitor, ProgressMonitor, SinkError, SpectrumWriter,
    TracingMonitor,
};
pub use state::{PipelineState, PipelineStatus};
