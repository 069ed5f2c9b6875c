//! scatter-decomp: Node Decomposition and Scattering Pipeline
//!
//! Plans how compute nodes are split into process groups for a scattering
//! calculation and drives each group's vectors through a concurrent
//! stage/compute/marshal pipeline.
//!
//! ## Architecture
//!
//! - **Decomposition**: picks the partition size with the least idle work
//! - **Pipeline**: three worker stages around a shared spectrum accumulator
//! - **Trajectory**: seeded synthetic sample source and plane-wave kernel
//! - **Config**: TOML configuration with validation

pub mod config;
pub mod decomposition;
pub mod pipeline;
pub mod trajectory;
pub mod types;

// Re-export configuration
pub use config::ScatterConfig;

// Re-export commonly used types
pub use types::{Complex64, QVector, Vec3};

// Re-export decomposition
pub use decomposition::{
    DecompositionError, DecompositionParameters, DecompositionPlan, DecompositionReport,
};

// Re-export pipeline components
pub use pipeline::{
    AbortHandle, FrameKernel, PipelineController, PipelineError, PipelineInputs, PipelineState,
    PipelineStatus, ProcessGroup, SpectrumWriter,
};

// Re-export trajectory
pub use trajectory::{PlaneWaveKernel, Trajectory};
