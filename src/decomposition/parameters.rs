//! Evaluation of a single candidate partition geometry.
//!
//! All cycle counts and the waste penalty are computed with exact integer
//! arithmetic. Products that can leave `u64` (the penalty terms and the
//! payload size) saturate at `u64::MAX`. Nothing here can fail; rejecting
//! `nnpp = 0` (and `nnpp > nn`) is the caller's job.

use serde::Serialize;

/// Derived geometry for one `(NN, NQ, NAF, NNpP, elbytesize)` tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DecompositionParameters {
    nn: u64,
    nq: u64,
    naf: u64,
    nnpp: u64,
    np: u64,
    np_used: u64,
    nodes_unused: u64,
    nq_cycles: u64,
    naf_cycles: u64,
    penalty: u64,
    elbytesize: u64,
    nbytesize: u64,
}

impl DecompositionParameters {
    /// Evaluate a candidate geometry.
    ///
    /// Requires `1 <= nnpp <= nn` so that at least one partition exists.
    pub fn new(nn: u64, nq: u64, naf: u64, nnpp: u64, elbytesize: u64) -> Self {
        debug_assert!(nnpp >= 1, "partition size must be at least 1");
        debug_assert!(nnpp <= nn, "partition size must not exceed the node count");

        let np = nn / nnpp;
        let np_used = np.min(nq);
        let nodes_unused = nn - np_used * nnpp;

        let nq_cycles = nq.div_ceil(np);
        let naf_cycles = naf.div_ceil(nnpp);

        // idle nodes, empty q slots in the last cycle, empty work-unit slots in the last cycle
        let slots_per_cycle = nnpp.saturating_mul(naf_cycles);
        let penalty = nodes_unused
            .saturating_mul(nq_cycles)
            .saturating_mul(naf_cycles)
            .saturating_add(
                np_used
                    .saturating_mul(nq_cycles)
                    .saturating_sub(nq)
                    .saturating_mul(slots_per_cycle),
            )
            .saturating_add(slots_per_cycle.saturating_sub(naf).saturating_mul(nq));

        Self {
            nn,
            nq,
            naf,
            nnpp,
            np,
            np_used,
            nodes_unused,
            nq_cycles,
            naf_cycles,
            penalty,
            elbytesize,
            nbytesize: naf.saturating_mul(elbytesize),
        }
    }

    pub fn nn(&self) -> u64 {
        self.nn
    }

    pub fn nq(&self) -> u64 {
        self.nq
    }

    pub fn naf(&self) -> u64 {
        self.naf
    }

    /// Nodes per partition.
    pub fn nnpp(&self) -> u64 {
        self.nnpp
    }

    /// Number of partitions (process groups).
    pub fn np(&self) -> u64 {
        self.np
    }

    /// Partitions that actually receive a scattering vector.
    pub fn np_used(&self) -> u64 {
        self.np_used
    }

    /// Nodes that belong to no used partition.
    pub fn nodes_unused(&self) -> u64 {
        self.nodes_unused
    }

    pub fn nq_cycles(&self) -> u64 {
        self.nq_cycles
    }

    pub fn naf_cycles(&self) -> u64 {
        self.naf_cycles
    }

    /// Total wasted work units under this geometry.
    pub fn penalty(&self) -> u64 {
        self.penalty
    }

    pub fn elbytesize(&self) -> u64 {
        self.elbytesize
    }

    /// Payload bytes per work unit (`NAF * elbytesize`), saturating at `u64::MAX`.
    pub fn nbytesize(&self) -> u64 {
        self.nbytesize
    }

    /// Whether the exact payload size is at most `ceiling`. A payload that
    /// does not fit in `u64` never fits.
    pub fn fits_within(&self, ceiling: u64) -> bool {
        self.naf
            .checked_mul(self.elbytesize)
            .is_some_and(|bytes| bytes <= ceiling)
    }

    /// Useful work units: every vector times every work unit.
    pub fn useful_work(&self) -> u64 {
        self.nq.saturating_mul(self.naf)
    }

    /// Penalty as a fraction of useful work.
    pub fn penalty_fraction(&self) -> f64 {
        self.penalty as f64 / self.useful_work() as f64
    }

    /// `useful / (useful + penalty)`, in `(0, 1]` whenever `NQ, NAF >= 1`.
    pub fn utilization(&self) -> f64 {
        let used = self.useful_work() as f64;
        used / (used + self.penalty as f64)
    }

    /// Partition id of a global node rank.
    pub fn pid(&self, rank: u64) -> u64 {
        rank / self.nnpp
    }
}
