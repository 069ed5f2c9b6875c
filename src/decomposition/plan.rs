//! Partition size selection and the node/vector/work-unit assignment derived from it.

use serde::Serialize;
use tracing::{debug, error, info};

use super::{DecompositionError, DecompositionParameters};
use crate::config::DecompositionConfig;

/// The accepted decomposition for one run.
///
/// Holds exactly one winning geometry and is never mutated after construction.
#[derive(Debug, Clone)]
pub struct DecompositionPlan {
    best: DecompositionParameters,
}

/// Summary of the chosen geometry, logged at plan time and printable as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecompositionReport {
    pub nn: u64,
    pub nq: u64,
    pub naf: u64,
    pub np: u64,
    pub nnpp: u64,
    pub naf_cycles: u64,
    pub nq_cycles: u64,
    pub wasted: u64,
    pub used: u64,
    pub utilization: f64,
    pub static_imbalance: f64,
    pub nbytesize: u64,
}

impl DecompositionPlan {
    /// Choose a partition geometry for `nn` nodes, `nq` vectors and `naf` work units.
    ///
    /// `elbytesize` is the payload size of one element; `nmaxbytesize` is the
    /// per-partition byte ceiling applied during the automatic search.
    pub fn new(
        nn: u64,
        nq: u64,
        naf: u64,
        elbytesize: u64,
        nmaxbytesize: u64,
        config: &DecompositionConfig,
    ) -> Result<Self, DecompositionError> {
        if naf < 1 || nq < 1 {
            error!(nn, nq, naf, "No data to decompose");
            return Err(DecompositionError::NoData { nn, nq, naf });
        }

        let best = if config.partitions.automatic {
            Self::search(nn, nq, naf, elbytesize, nmaxbytesize)?
        } else {
            Self::fixed(nn, nq, naf, elbytesize, config.partitions.size)?
        };

        let plan = Self { best };
        let report = plan.report();
        info!(
            nn = report.nn,
            nq = report.nq,
            naf = report.naf,
            np = report.np,
            nnpp = report.nnpp,
            naf_cycles = report.naf_cycles,
            nq_cycles = report.nq_cycles,
            wasted = report.wasted,
            used = report.used,
            utilization = report.utilization,
            "Final decomposition parameters"
        );

        if report.utilization < config.utilization {
            error!(
                utilization = report.utilization,
                threshold = config.utilization,
                "Utilization too low, aborting"
            );
            return Err(DecompositionError::UtilizationTooLow {
                nn,
                nq,
                naf,
                nnpp: best.nnpp(),
                penalty: best.penalty(),
                utilization: report.utilization,
                threshold: config.utilization,
            });
        }

        Ok(plan)
    }

    /// Scan partition sizes from `min(naf, nn)` down to 1, keeping the first
    /// candidate with the strictly smallest penalty.
    fn search(
        nn: u64,
        nq: u64,
        naf: u64,
        elbytesize: u64,
        nmaxbytesize: u64,
    ) -> Result<DecompositionParameters, DecompositionError> {
        let npmax = naf.min(nn);
        let mut best: Option<DecompositionParameters> = None;

        for nnpp in (1..=npmax).rev() {
            let candidate = DecompositionParameters::new(nn, nq, naf, nnpp, elbytesize);
            if !candidate.fits_within(nmaxbytesize) {
                continue;
            }
            debug!(nnpp, penalty = candidate.penalty(), "Decomposition candidate");
            if best.map_or(true, |b| candidate.penalty() < b.penalty()) {
                best = Some(candidate);
            }
        }

        match best {
            Some(b) => Ok(b),
            None if npmax == 0 => {
                error!(nn, nq, naf, "No decomposition found");
                Err(DecompositionError::NoDecomposition {
                    nn,
                    nq,
                    naf,
                    requested: None,
                })
            }
            None => {
                let required = naf.saturating_mul(elbytesize);
                error!(nn, naf, required, ceiling = nmaxbytesize, "Every partition exceeds the byte ceiling");
                Err(DecompositionError::MemoryCeiling {
                    nn,
                    naf,
                    required,
                    ceiling: nmaxbytesize,
                })
            }
        }
    }

    fn fixed(
        nn: u64,
        nq: u64,
        naf: u64,
        elbytesize: u64,
        size: u64,
    ) -> Result<DecompositionParameters, DecompositionError> {
        if size >= 1 && size <= naf && size <= nn {
            Ok(DecompositionParameters::new(nn, nq, naf, size, elbytesize))
        } else {
            error!(nn, nq, naf, size, "No decomposition found for fixed partition size");
            Err(DecompositionError::NoDecomposition {
                nn,
                nq,
                naf,
                requested: Some(size),
            })
        }
    }

    /// The winning geometry.
    pub fn parameters(&self) -> &DecompositionParameters {
        &self.best
    }

    /// Partition id for every global rank, in rank order.
    ///
    /// Ranks past `NP * NNpP` deliberately get id `NP`, one past the last
    /// partition, so every rank keeps the plain `rank / NNpP` color. They form
    /// no working partition and [`Self::partition_of`] returns `None` for them.
    pub fn colors(&self) -> Vec<u64> {
        (0..self.best.nn()).map(|rank| self.best.pid(rank)).collect()
    }

    pub fn partitions(&self) -> u64 {
        self.best.np()
    }

    pub fn partition_size(&self) -> u64 {
        self.best.nnpp()
    }

    /// Penalty as a fraction of useful work.
    pub fn static_imbalance(&self) -> f64 {
        self.best.penalty_fraction()
    }

    pub fn nbytesize(&self) -> u64 {
        self.best.nbytesize()
    }

    pub fn utilization(&self) -> f64 {
        self.best.utilization()
    }

    /// Partition of a global rank, or `None` for a leftover idle node.
    pub fn partition_of(&self, rank: u64) -> Option<u64> {
        let pid = self.best.pid(rank);
        (rank < self.best.nn() && pid < self.best.np()).then_some(pid)
    }

    /// Position of a global rank within its partition.
    pub fn local_rank(&self, rank: u64) -> u64 {
        rank % self.best.nnpp()
    }

    /// Vector indices handled by partition `pid`: every `NP`-th vector starting at `pid`.
    pub fn vectors_for_partition(&self, pid: u64) -> Vec<u64> {
        if pid >= self.best.np() {
            return Vec::new();
        }
        (pid..self.best.nq())
            .step_by(Self::stride(self.best.np()))
            .collect()
    }

    /// Work units owned by the node at `local_rank` within its partition.
    pub fn work_units_for(&self, local_rank: u64) -> Vec<u64> {
        if local_rank >= self.best.nnpp() {
            return Vec::new();
        }
        (local_rank..self.best.naf())
            .step_by(Self::stride(self.best.nnpp()))
            .collect()
    }

    fn stride(n: u64) -> usize {
        usize::try_from(n).unwrap_or(usize::MAX)
    }

    /// Summary of the chosen geometry.
    pub fn report(&self) -> DecompositionReport {
        let b = &self.best;
        DecompositionReport {
            nn: b.nn(),
            nq: b.nq(),
            naf: b.naf(),
            np: b.np(),
            nnpp: b.nnpp(),
            naf_cycles: b.naf_cycles(),
            nq_cycles: b.nq_cycles(),
            wasted: b.penalty(),
            used: b.useful_work(),
            utilization: b.utilization(),
            static_imbalance: b.penalty_fraction(),
            nbytesize: b.nbytesize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitionConfig;

    fn automatic(utilization: f64) -> DecompositionConfig {
        DecompositionConfig {
            utilization,
            max_partition_bytes: u64::MAX,
            partitions: PartitionConfig::default(),
        }
    }

    fn fixed(size: u64, utilization: f64) -> DecompositionConfig {
        DecompositionConfig {
            utilization,
            max_partition_bytes: u64::MAX,
            partitions: PartitionConfig::fixed(size),
        }
    }

    #[test]
    fn test_zero_work_units_is_no_data() {
        let err = DecompositionPlan::new(8, 3, 0, 16, u64::MAX, &automatic(0.0)).unwrap_err();
        assert_eq!(err, DecompositionError::NoData { nn: 8, nq: 3, naf: 0 });
    }

    #[test]
    fn test_zero_vectors_is_no_data() {
        let err = DecompositionPlan::new(8, 0, 10, 16, u64::MAX, &automatic(0.0)).unwrap_err();
        assert!(matches!(err, DecompositionError::NoData { .. }));
    }

    #[test]
    fn test_zero_nodes_has_no_candidates() {
        let err = DecompositionPlan::new(0, 3, 10, 16, u64::MAX, &automatic(0.0)).unwrap_err();
        assert!(matches!(
            err,
            DecompositionError::NoDecomposition { requested: None, .. }
        ));
    }

    #[test]
    fn test_automatic_prefers_even_split() {
        let plan = DecompositionPlan::new(8, 4, 12, 8, u64::MAX, &automatic(0.0)).unwrap();
        assert_eq!(plan.parameters().penalty(), 0);
        assert_eq!(plan.utilization(), 1.0);
        assert_eq!(plan.static_imbalance(), 0.0);
    }

    #[test]
    fn test_tie_keeps_first_seen_larger_partition() {
        // nn=4, nq=4, naf=4: nnpp 4, 2 and 1 all divide evenly
        let plan = DecompositionPlan::new(4, 4, 4, 1, u64::MAX, &automatic(0.0)).unwrap();
        assert_eq!(plan.partition_size(), 4);
        assert_eq!(plan.partitions(), 1);
    }

    #[test]
    fn test_memory_ceiling_rejects_every_candidate() {
        let err = DecompositionPlan::new(8, 3, 10, 16, 159, &automatic(0.0)).unwrap_err();
        assert_eq!(
            err,
            DecompositionError::MemoryCeiling {
                nn: 8,
                naf: 10,
                required: 160,
                ceiling: 159
            }
        );
        assert!(DecompositionPlan::new(8, 3, 10, 16, 160, &automatic(0.0)).is_ok());
    }

    #[test]
    fn test_overflowing_payload_hits_memory_ceiling() {
        let err =
            DecompositionPlan::new(4, 3, 1 << 40, 2_400_000_000, 1 << 30, &automatic(0.0)).unwrap_err();
        assert_eq!(
            err,
            DecompositionError::MemoryCeiling {
                nn: 4,
                naf: 1 << 40,
                required: u64::MAX,
                ceiling: 1 << 30
            }
        );

        // the exact product is 2^64, which wraps to zero
        let err = DecompositionPlan::new(4, 3, 1 << 33, 1 << 31, 1 << 30, &automatic(0.0)).unwrap_err();
        assert!(matches!(err, DecompositionError::MemoryCeiling { .. }));

        let err = DecompositionPlan::new(4, 3, 1 << 33, 1 << 31, u64::MAX, &automatic(0.0)).unwrap_err();
        assert!(matches!(err, DecompositionError::MemoryCeiling { .. }));
    }

    #[test]
    fn test_fixed_size_with_overflowing_payload_does_not_panic() {
        let plan = DecompositionPlan::new(4, 3, 1 << 33, 1 << 31, 1 << 30, &fixed(2, 0.0)).unwrap();
        assert_eq!(plan.nbytesize(), u64::MAX);
    }

    #[test]
    fn test_fixed_size_accepted() {
        let plan = DecompositionPlan::new(8, 3, 10, 16, 0, &fixed(4, 0.0)).unwrap();
        assert_eq!(plan.partition_size(), 4);
        assert_eq!(plan.partitions(), 2);
        assert_eq!(plan.nbytesize(), 160);
    }

    #[test]
    fn test_fixed_size_larger_than_work_units_rejected() {
        let err = DecompositionPlan::new(16, 3, 10, 16, u64::MAX, &fixed(11, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            DecompositionError::NoDecomposition { requested: Some(11), .. }
        ));
    }

    #[test]
    fn test_fixed_size_larger_than_nodes_rejected() {
        let err = DecompositionPlan::new(2, 3, 10, 16, u64::MAX, &fixed(4, 0.0)).unwrap_err();
        assert!(matches!(err, DecompositionError::NoDecomposition { .. }));
    }

    #[test]
    fn test_utilization_threshold_enforced() {
        let err = DecompositionPlan::new(8, 3, 10, 16, u64::MAX, &fixed(4, 1.0)).unwrap_err();
        match err {
            DecompositionError::UtilizationTooLow {
                nnpp,
                penalty,
                utilization,
                threshold,
                ..
            } => {
                assert_eq!(nnpp, 4);
                assert_eq!(penalty, 18);
                assert!((utilization - 30.0 / 48.0).abs() < 1e-12);
                assert_eq!(threshold, 1.0);
            }
            other => panic!("expected UtilizationTooLow, got {other:?}"),
        }
    }

    #[test]
    fn test_colors_and_leftover_nodes() {
        let plan = DecompositionPlan::new(7, 6, 9, 1, u64::MAX, &fixed(3, 0.0)).unwrap();
        assert_eq!(plan.colors(), vec![0, 0, 0, 1, 1, 1, 2]);
        assert_eq!(plan.partition_of(2), Some(0));
        assert_eq!(plan.partition_of(6), None);
        assert_eq!(plan.local_rank(4), 1);
    }

    #[test]
    fn test_assignments_cover_everything_once() {
        let plan = DecompositionPlan::new(8, 3, 10, 16, u64::MAX, &fixed(4, 0.0)).unwrap();

        let mut vectors: Vec<u64> = (0..plan.partitions())
            .flat_map(|pid| plan.vectors_for_partition(pid))
            .collect();
        vectors.sort_unstable();
        assert_eq!(vectors, vec![0, 1, 2]);
        assert_eq!(plan.vectors_for_partition(0), vec![0, 2]);
        assert!(plan.vectors_for_partition(2).is_empty());

        let mut units: Vec<u64> = (0..plan.partition_size())
            .flat_map(|local| plan.work_units_for(local))
            .collect();
        units.sort_unstable();
        assert_eq!(units, (0..10).collect::<Vec<_>>());
        assert_eq!(plan.work_units_for(1), vec![1, 5, 9]);
        assert!(plan.work_units_for(4).is_empty());
    }

    #[test]
    fn test_report_matches_parameters() {
        let plan = DecompositionPlan::new(8, 3, 10, 16, u64::MAX, &fixed(4, 0.0)).unwrap();
        let report = plan.report();
        assert_eq!(report.np, 2);
        assert_eq!(report.nq_cycles, 2);
        assert_eq!(report.naf_cycles, 3);
        assert_eq!(report.wasted, 18);
        assert_eq!(report.used, 30);
    }
}
