//! Node Decomposition Module
//!
//! Splits `NN` compute nodes into `NP` process groups of `NNpP` nodes each,
//! so that `NQ` independent scattering vectors and `NAF` atom/frame work units
//! are covered with as little idle computation as possible.
//!
//! ## Selection
//!
//! - **Automatic**: every partition size from `min(NAF, NN)` down to 1 is
//!   evaluated; the first one with the smallest waste penalty wins.
//! - **Fixed**: the operator-supplied partition size is taken as is.
//!
//! Either way the winning geometry must reach the configured utilization,
//! otherwise no plan is produced. Planning runs once, single-threaded, before
//! any pipeline worker exists.

mod parameters;
mod plan;

pub use parameters::DecompositionParameters;
pub use plan::{DecompositionPlan, DecompositionReport};

use thiserror::Error;

/// Fatal planning failures. Every variant carries the inputs an operator
/// needs to pick a different node count or partition size.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecompositionError {
    #[error("No data to decompose (NN={nn}, NQ={nq}, NAF={naf})")]
    NoData { nn: u64, nq: u64, naf: u64 },

    #[error(
        "No decomposition found to match the requirements (NN={nn}, NQ={nq}, NAF={naf}, \
         partition size={requested:?}); change the partition size or the number of nodes, \
         keeping partition size <= NAF and <= NN"
    )]
    NoDecomposition {
        nn: u64,
        nq: u64,
        naf: u64,
        requested: Option<u64>,
    },

    #[error(
        "Partition payload of {required} bytes exceeds the ceiling of {ceiling} bytes for every \
         partition size (NN={nn}, NAF={naf}); raise decomposition.max_partition_bytes"
    )]
    MemoryCeiling {
        nn: u64,
        naf: u64,
        /// `NAF * elbytesize`, saturated at `u64::MAX` when it overflows.
        required: u64,
        ceiling: u64,
    },

    #[error(
        "Utilization too low: {utilization:.4} < threshold {threshold:.4} \
         (NN={nn}, NQ={nq}, NAF={naf}, NNpP={nnpp}, penalty={penalty}); \
         change the number of nodes or the threshold"
    )]
    UtilizationTooLow {
        nn: u64,
        nq: u64,
        naf: u64,
        nnpp: u64,
        penalty: u64,
        utilization: f64,
        threshold: f64,
    },
}
