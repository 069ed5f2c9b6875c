//! Process groups: the nodes that cooperate on one vector.
//!
//! Each member accumulates the frames it owns; `reduce_sum` combines the
//! partial spectra so the group's first rank can hand the total to the writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use super::sink::SinkError;
use crate::types::Complex64;

pub trait ProcessGroup: Send + Sync + 'static {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Element-wise sum of `data` across the group, result left in `data`.
    ///
    /// Collective: every member calls it once per vector, in the same order.
    fn reduce_sum(&self, data: &mut [Complex64]) -> Result<(), SinkError>;

    /// Called when this member stops early, so peers blocked in a collective
    /// fail instead of waiting forever.
    fn abandon(&self) {}
}

/// A process group containing only the calling node.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalGroup;

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn reduce_sum(&self, _data: &mut [Complex64]) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Debug)]
struct Round {
    sum: Vec<Complex64>,
    contributed: usize,
    collected: usize,
}

#[derive(Debug, Default)]
struct Rendezvous {
    rounds: HashMap<u64, Round>,
    abandoned: Option<usize>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<Rendezvous>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Rendezvous> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One member of a process group whose ranks are threads of this process.
///
/// Reductions are matched by call count: the n-th `reduce_sum` of every rank
/// belongs to the same round.
#[derive(Debug)]
pub struct SharedMemoryGroup {
    rank: usize,
    size: usize,
    round: AtomicU64,
    shared: Arc<Shared>,
}

impl SharedMemoryGroup {
    /// Create every member of a group of `size` ranks, ordered by rank.
    pub fn create(size: usize) -> Vec<Self> {
        let shared = Arc::new(Shared::default());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                round: AtomicU64::new(0),
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn abandoned_error(rank: usize) -> SinkError {
        SinkError::Reduce(format!("rank {rank} left the group"))
    }
}

impl ProcessGroup for SharedMemoryGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn reduce_sum(&self, data: &mut [Complex64]) -> Result<(), SinkError> {
        let round = self.round.fetch_add(1, Ordering::SeqCst);
        let mut state = self.shared.lock();
        if let Some(rank) = state.abandoned {
            return Err(Self::abandoned_error(rank));
        }

        let entry = state.rounds.entry(round).or_insert_with(|| Round {
            sum: vec![Complex64::default(); data.len()],
            contributed: 0,
            collected: 0,
        });
        if entry.sum.len() != data.len() {
            let expected = entry.sum.len();
            state.abandoned = Some(self.rank);
            self.shared.changed.notify_all();
            return Err(SinkError::Reduce(format!(
                "rank {} contributed {} samples, expected {expected}",
                self.rank,
                data.len()
            )));
        }
        for (acc, v) in entry.sum.iter_mut().zip(data.iter()) {
            *acc += *v;
        }
        entry.contributed += 1;
        self.shared.changed.notify_all();

        loop {
            if let Some(rank) = state.abandoned {
                return Err(Self::abandoned_error(rank));
            }
            let Some(entry) = state.rounds.get_mut(&round) else {
                return Err(SinkError::Reduce(format!("reduction round {round} vanished")));
            };
            if entry.contributed == self.size {
                data.copy_from_slice(&entry.sum);
                entry.collected += 1;
                if entry.collected == self.size {
                    state.rounds.remove(&round);
                }
                return Ok(());
            }
            state = self
                .shared
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn abandon(&self) {
        let mut state = self.shared.lock();
        if state.abandoned.is_none() {
            warn!(rank = self.rank, "Rank leaving process group");
            state.abandoned = Some(self.rank);
        }
        self.shared.changed.notify_all();
    }
}
