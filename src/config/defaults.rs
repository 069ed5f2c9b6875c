//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Decomposition
// ============================================================================

/// Minimum fraction of useful work a plan must reach before it is accepted.
pub const DEFAULT_UTILIZATION_THRESHOLD: f64 = 0.5;

/// Per-partition byte ceiling for staged coordinate data.
///
/// 4 GiB, the memory a single node can devote to one partition's payload.
pub const DEFAULT_MAX_PARTITION_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Bytes per staged coordinate element: three `f64` components.
pub const COORDINATE_ELEMENT_BYTES: u64 = 3 * 8;

// ============================================================================
// Pipeline
// ============================================================================

/// Upper bound on worker threads for any single stage.
pub const MAX_WORKERS_PER_STAGE: usize = 256;

/// Free result buffers allocated per compute worker.
///
/// Two lets a compute worker start the next frame while its previous
/// result is still waiting for the marshal stage.
pub const DEFAULT_BUFFERS_PER_COMPUTE_WORKER: usize = 2;

/// Progress is reported to the monitor at most this many times per vector.
pub const PROGRESS_UPDATES_PER_VECTOR: usize = 10;

// ============================================================================
// Output
// ============================================================================

/// Default JSON-lines file receiving finished spectra.
pub const DEFAULT_OUTPUT_PATH: &str = "spectra.jsonl";
