//! Pipeline Controller - three-stage worker pool for per-vector spectra
//!
//! ```text
//!  run()                 staging queue        token queue         result queue
//!  ─────► StageRequest ──► [stage worker] ──► WorkToken ──► [compute worker] ──► TaggedBuffer ──► [marshal worker]
//!                                                               ▲                                    │
//!                                                               └──────── free buffer queue ◄────────┘
//!                                                                                                    │
//!  run() ◄───────────────────── StageEvent (Staged / Computed / Accumulated / Failed) ◄──────────────┘
//! ```
//!
//! Workers report completion and failure as `StageEvent` messages on a single
//! channel; the orchestrating thread counts them and never touches frame data.
//! Closing the queues is the shutdown signal for every worker.
//!
//! A compute worker that outruns the marshal stage stalls on the free-buffer
//! queue, never on the marshal stage itself.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::accumulator::SpectrumAccumulator;
use super::group::ProcessGroup;
use super::kernel::{FrameKernel, KernelError};
use super::queue::ConcurrentQueue;
use super::sink::{ProgressMonitor, SinkError, SpectrumWriter};
use super::state::{PipelineState, PipelineStatus};
use crate::config::defaults::PROGRESS_UPDATES_PER_VECTOR;
use crate::config::PipelineConfig;
use crate::types::{Complex64, QVector};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("staging failed for vector {vector_id}: {source}")]
    Staging {
        vector_id: u64,
        source: KernelError,
    },

    #[error("kernel failed for vector {vector_id}, frame {frame}: {source}")]
    Kernel {
        vector_id: u64,
        frame: usize,
        source: KernelError,
    },

    #[error("frame {frame} is outside the spectrum of {frames} frames")]
    FrameOutOfRange { frame: usize, frames: usize },

    #[error("worker thread '{worker}' panicked")]
    WorkerPanicked { worker: String },

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("pipeline run aborted")]
    Aborted,

    #[error("stage event channel disconnected")]
    Disconnected,
}

// ============================================================================
// Stage Messages
// ============================================================================

/// Request to stage one vector, by position in the assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StageRequest {
    slot: usize,
}

/// One frame of one vector to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WorkToken {
    slot: usize,
    frame: usize,
}

/// A computed frame; the buffer goes back to the free queue once folded.
#[derive(Debug)]
struct TaggedBuffer {
    slot: usize,
    frame: usize,
    samples: Vec<Complex64>,
}

#[derive(Debug)]
enum StageEvent {
    Staged { slot: usize },
    Computed { slot: usize },
    Accumulated { slot: usize },
    Failed(PipelineError),
    Aborted,
}

/// Stage role a worker thread is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRole {
    Stage,
    Compute,
    Marshal,
}

impl std::fmt::Display for StageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageRole::Stage => write!(f, "stage"),
            StageRole::Compute => write!(f, "compute"),
            StageRole::Marshal => write!(f, "marshal"),
        }
    }
}

// ============================================================================
// Shared State
// ============================================================================

struct Shared {
    kernel: Arc<dyn FrameKernel>,
    vectors: Vec<QVector>,
    frames: Vec<usize>,
    staging: ConcurrentQueue<StageRequest>,
    tokens: ConcurrentQueue<WorkToken>,
    results: ConcurrentQueue<TaggedBuffer>,
    free: ConcurrentQueue<Vec<Complex64>>,
    spectrum: SpectrumAccumulator,
    status: RwLock<PipelineStatus>,
}

impl Shared {
    fn close_queues(&self) {
        self.staging.close();
        self.tokens.close();
        self.results.close();
        self.free.close();
    }

    fn reopen_queues(&self) {
        self.staging.reopen();
        self.tokens.reopen();
        self.results.reopen();
        self.free.reopen();
    }

    fn snapshot(&self) -> PipelineStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_status(&self, f: impl FnOnce(&mut PipelineStatus)) {
        f(&mut self.status.write().unwrap_or_else(PoisonError::into_inner));
    }
}

/// Everything a controller needs from its surroundings.
pub struct PipelineInputs {
    /// Nodes cooperating on the same vectors
    pub group: Arc<dyn ProcessGroup>,
    pub kernel: Arc<dyn FrameKernel>,
    /// Vectors this process group computes, in processing order
    pub vectors: Vec<QVector>,
    /// Global frame indices this node owns
    pub frames: Vec<usize>,
    /// Frames in the whole trajectory (rows of the spectrum)
    pub total_frames: usize,
    pub writer: Arc<dyn SpectrumWriter>,
    pub monitor: Arc<dyn ProgressMonitor>,
}

/// Read-only view of a controller's progress, usable from any thread.
#[derive(Clone)]
pub struct StatusHandle {
    shared: Arc<Shared>,
}

impl StatusHandle {
    /// Position of the vector currently in flight.
    pub fn status(&self) -> usize {
        self.shared.snapshot().current_vector
    }

    pub fn progress(&self) -> f64 {
        self.shared.snapshot().progress()
    }

    pub fn snapshot(&self) -> PipelineStatus {
        self.shared.snapshot()
    }
}

/// Stops a running pipeline from another thread.
///
/// Only a run in progress is affected: an abort sent while the controller is
/// idle is discarded when the next [`PipelineController::run`] starts.
#[derive(Clone)]
pub struct AbortHandle {
    events: Sender<StageEvent>,
}

impl AbortHandle {
    /// Ask the orchestrator to stop all workers and return `PipelineError::Aborted`.
    pub fn abort(&self) {
        let _ = self.events.send(StageEvent::Aborted);
    }
}

struct WorkerHandle {
    name: String,
    handle: JoinHandle<()>,
}

/// Reports a panicking worker to the orchestrator so it does not wait forever.
struct PanicReporter {
    worker: String,
    events: Sender<StageEvent>,
}

impl Drop for PanicReporter {
    fn drop(&mut self) {
        if thread::panicking() {
            let _ = self.events.send(StageEvent::Failed(PipelineError::WorkerPanicked {
                worker: self.worker.clone(),
            }));
        }
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Drives every assigned vector through the stage/compute/marshal workers.
pub struct PipelineController {
    shared: Arc<Shared>,
    group: Arc<dyn ProcessGroup>,
    writer: Arc<dyn SpectrumWriter>,
    monitor: Arc<dyn ProgressMonitor>,
    config: PipelineConfig,
    events_tx: Sender<StageEvent>,
    events_rx: Receiver<StageEvent>,
    workers: Vec<WorkerHandle>,
}

impl PipelineController {
    pub fn new(inputs: PipelineInputs, config: &PipelineConfig) -> Result<Self, PipelineError> {
        if let Some(&frame) = inputs.frames.iter().find(|&&f| f >= inputs.total_frames) {
            return Err(PipelineError::FrameOutOfRange {
                frame,
                frames: inputs.total_frames,
            });
        }

        let width = inputs.kernel.width();
        info!(
            kernel = inputs.kernel.name(),
            vectors = inputs.vectors.len(),
            frames = inputs.frames.len(),
            total_frames = inputs.total_frames,
            width,
            rank = inputs.group.rank(),
            group_size = inputs.group.size(),
            "Initializing scattering pipeline"
        );

        // an empty stage or buffer pool would stall the first vector forever
        let mut config = config.clone();
        for count in [
            &mut config.staging_workers,
            &mut config.compute_workers,
            &mut config.marshal_workers,
            &mut config.buffers,
        ] {
            if *count == 0 {
                warn!("Pipeline configured with an empty stage, using one worker/buffer");
                *count = 1;
            }
        }

        let status = PipelineStatus::new(inputs.vectors.len(), inputs.frames.len());
        let shared = Arc::new(Shared {
            kernel: inputs.kernel,
            vectors: inputs.vectors,
            frames: inputs.frames,
            staging: ConcurrentQueue::new(),
            tokens: ConcurrentQueue::new(),
            results: ConcurrentQueue::new(),
            free: ConcurrentQueue::new(),
            spectrum: SpectrumAccumulator::new(inputs.total_frames, width),
            status: RwLock::new(status),
        });
        let (events_tx, events_rx) = mpsc::channel();

        Ok(Self {
            shared,
            group: inputs.group,
            writer: inputs.writer,
            monitor: inputs.monitor,
            config,
            events_tx,
            events_rx,
            workers: Vec::new(),
        })
    }

    /// Spawn the configured number of workers for every stage.
    ///
    /// Does nothing when workers are already running.
    pub fn start_workers(&mut self) -> Result<(), PipelineError> {
        if !self.workers.is_empty() {
            return Ok(());
        }

        self.shared.reopen_queues();
        let width = self.shared.spectrum.width();
        for _ in 0..self.config.buffers {
            self.shared.free.push(Vec::with_capacity(width));
        }

        let roles = [
            (StageRole::Stage, self.config.staging_workers),
            (StageRole::Compute, self.config.compute_workers),
            (StageRole::Marshal, self.config.marshal_workers),
        ];
        for (role, count) in roles {
            for i in 0..count {
                if let Err(e) = self.spawn_worker(role, i) {
                    error!(%role, error = %e, "Failed to spawn worker, stopping pool");
                    self.stop_workers();
                    return Err(e);
                }
            }
        }

        info!(
            workers = self.workers.len(),
            buffers = self.config.buffers,
            "Pipeline workers started"
        );
        Ok(())
    }

    fn spawn_worker(&mut self, role: StageRole, index: usize) -> Result<(), PipelineError> {
        let name = format!("scatter-{role}-{index}");
        let shared = Arc::clone(&self.shared);
        let events = self.events_tx.clone();
        let reporter = PanicReporter {
            worker: name.clone(),
            events: events.clone(),
        };

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _reporter = reporter;
                match role {
                    StageRole::Stage => stage_worker(&shared, &events),
                    StageRole::Compute => compute_worker(&shared, &events),
                    StageRole::Marshal => marshal_worker(&shared, &events),
                }
            })
            .map_err(PipelineError::Spawn)?;

        self.workers.push(WorkerHandle { name, handle });
        Ok(())
    }

    /// Signal every worker to exit and join all of them.
    ///
    /// Safe to call with work still queued; queued items are dropped.
    pub fn stop_workers(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        self.shared.close_queues();
        let count = self.workers.len();
        for worker in self.workers.drain(..) {
            if worker.handle.join().is_err() {
                warn!(worker = %worker.name, "Worker thread panicked before shutdown");
            }
        }

        // events from the stopped pool must not leak into the next run
        self.drain_events();
        self.shared.tokens.clear();
        self.shared.results.clear();
        debug!(workers = count, "Pipeline workers stopped");
    }

    fn drain_events(&self) -> usize {
        let mut drained = 0;
        while self.events_rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }

    /// Number of registered worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Compute, accumulate and write every assigned vector in order.
    ///
    /// On any fatal error all workers are stopped before the error is returned.
    pub fn run(&mut self) -> Result<(), PipelineError> {
        let stale = self.drain_events();
        if stale > 0 {
            debug!(events = stale, "Discarded events sent while idle");
        }
        self.start_workers()?;

        let total = self.shared.vectors.len();
        let frames = self.shared.frames.len();
        self.shared
            .update_status(|s| *s = PipelineStatus::new(total, frames));
        for slot in 0..total {
            if let Err(e) = self.process_vector(slot) {
                error!(slot, error = %e, "Pipeline run failed, stopping workers");
                self.group.abandon();
                self.stop_workers();
                self.shared.update_status(|s| s.state = PipelineState::Aborted);
                self.monitor.update(&self.shared.snapshot());
                return Err(e);
            }
        }

        self.stop_workers();
        if let Err(e) = self.writer.flush() {
            self.shared.update_status(|s| s.state = PipelineState::Aborted);
            return Err(e.into());
        }
        info!(vectors = total, "All assigned vectors written");
        Ok(())
    }

    fn process_vector(&mut self, slot: usize) -> Result<(), PipelineError> {
        let vector = self.shared.vectors[slot];
        let expected = self.shared.frames.len();
        let report_every = expected.div_ceil(PROGRESS_UPDATES_PER_VECTOR).max(1);

        self.shared.spectrum.reset();
        self.shared.update_status(|s| {
            s.state = PipelineState::Staging;
            s.current_vector = slot;
            s.current_vector_id = Some(vector.id);
            s.frames_computed = 0;
            s.frames_accumulated = 0;
        });
        debug!(slot, vector_id = vector.id, frames = expected, "Staging vector");
        self.shared.staging.push(StageRequest { slot });

        let mut staged = false;
        let mut computed = 0usize;
        let mut accumulated = 0usize;

        while !(staged && accumulated == expected) {
            let event = self
                .events_rx
                .recv()
                .map_err(|_| PipelineError::Disconnected)?;

            match event {
                StageEvent::Staged { slot: s } if s == slot => {
                    staged = true;
                    let next = if computed == expected {
                        PipelineState::Marshaling
                    } else {
                        PipelineState::Computing
                    };
                    self.shared.update_status(|st| st.state = next);
                }
                StageEvent::Computed { slot: s } if s == slot => {
                    computed += 1;
                    self.shared.update_status(|st| {
                        st.frames_computed = computed;
                        if staged && computed == expected {
                            st.state = PipelineState::Marshaling;
                        }
                    });
                }
                StageEvent::Accumulated { slot: s } if s == slot => {
                    accumulated += 1;
                    self.shared
                        .update_status(|st| st.frames_accumulated = accumulated);
                    if accumulated % report_every == 0 {
                        self.monitor.update(&self.shared.snapshot());
                    }
                }
                StageEvent::Failed(e) => return Err(e),
                StageEvent::Aborted => return Err(PipelineError::Aborted),
                other => debug!(?other, slot, "Ignoring event for another vector"),
            }
        }

        self.write_vector(&vector)
    }

    fn write_vector(&mut self, vector: &QVector) -> Result<(), PipelineError> {
        let mut spectrum = self.shared.spectrum.snapshot();
        self.group.reduce_sum(&mut spectrum)?;
        if self.group.rank() == 0 {
            self.writer.write(vector, &spectrum)?;
        }

        self.shared.update_status(|s| {
            s.state = PipelineState::Written;
            s.vectors_written += 1;
        });
        let status = self.shared.snapshot();
        debug!(
            vector_id = vector.id,
            written = status.vectors_written,
            total = status.total_vectors,
            "Vector written"
        );
        self.monitor.update(&status);
        Ok(())
    }

    /// Position of the vector currently in flight.
    pub fn status(&self) -> usize {
        self.shared.snapshot().current_vector
    }

    pub fn progress(&self) -> f64 {
        self.shared.snapshot().progress()
    }

    pub fn snapshot(&self) -> PipelineStatus {
        self.shared.snapshot()
    }

    /// Handle for reading progress from another thread while `run()` holds the controller.
    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            events: self.events_tx.clone(),
        }
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

// ============================================================================
// Stage Functions
// ============================================================================

/// Stage 1: prepare each requested vector, then release one token per owned frame.
fn stage_worker(shared: &Shared, events: &Sender<StageEvent>) {
    while let Some(StageRequest { slot }) = shared.staging.pop() {
        let vector = &shared.vectors[slot];
        if let Err(source) = shared.kernel.stage(vector) {
            let _ = events.send(StageEvent::Failed(PipelineError::Staging {
                vector_id: vector.id,
                source,
            }));
            continue;
        }
        for &frame in &shared.frames {
            shared.tokens.push(WorkToken { slot, frame });
        }
        let _ = events.send(StageEvent::Staged { slot });
    }
}

/// Stage 2: compute one frame per token into a recycled buffer.
fn compute_worker(shared: &Shared, events: &Sender<StageEvent>) {
    let width = shared.spectrum.width();
    while let Some(WorkToken { slot, frame }) = shared.tokens.pop() {
        let Some(mut samples) = shared.free.pop() else {
            break;
        };
        samples.clear();
        samples.resize(width, Complex64::default());

        let vector = &shared.vectors[slot];
        match shared.kernel.compute(vector, frame, &mut samples) {
            Ok(()) => {
                shared.results.push(TaggedBuffer {
                    slot,
                    frame,
                    samples,
                });
                let _ = events.send(StageEvent::Computed { slot });
            }
            Err(source) => {
                shared.free.push(samples);
                let _ = events.send(StageEvent::Failed(PipelineError::Kernel {
                    vector_id: vector.id,
                    frame,
                    source,
                }));
            }
        }
    }
}

/// Stage 3: fold each result into the spectrum row of its frame, recycle the buffer.
fn marshal_worker(shared: &Shared, events: &Sender<StageEvent>) {
    while let Some(TaggedBuffer {
        slot,
        frame,
        samples,
    }) = shared.results.pop()
    {
        let event = if shared.spectrum.fold(frame, &samples) {
            StageEvent::Accumulated { slot }
        } else {
            StageEvent::Failed(PipelineError::FrameOutOfRange {
                frame,
                frames: shared.spectrum.frames(),
            })
        };
        shared.free.push(samples);
        let _ = events.send(event);
    }
}
