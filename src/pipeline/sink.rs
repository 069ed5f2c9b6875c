//! Where finished spectra and progress updates go.
//!
//! The writer receives one completed spectrum per vector, keyed by vector id.
//! The monitor receives status snapshots while a vector is in flight.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

use super::PipelineStatus;
use crate::types::{Complex64, QVector, Vec3};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("reduction failed: {0}")]
    Reduce(String),
}

// ============================================================================
// Spectrum Writers
// ============================================================================

/// Accepts the completed spectrum of one vector.
pub trait SpectrumWriter: Send + Sync + 'static {
    fn write(&self, vector: &QVector, spectrum: &[Complex64]) -> Result<(), SinkError>;

    /// Make everything written so far durable.
    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// One line of a JSON-lines spectrum file.
#[derive(Debug, Serialize)]
struct SpectrumRecord<'a> {
    vector_id: u64,
    q: Vec3,
    samples: usize,
    written_at: DateTime<Utc>,
    spectrum: &'a [Complex64],
}

/// Appends one JSON record per vector to a file. Complex samples are
/// serialized as `[re, im]` pairs.
#[derive(Debug)]
pub struct JsonLinesWriter {
    path: PathBuf,
    out: Mutex<BufWriter<File>>,
}

impl JsonLinesWriter {
    /// Create (or truncate) the output file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| SinkError::Io {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "Writing spectra as JSON lines");
        Ok(Self {
            path,
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, BufWriter<File>> {
        self.out.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SpectrumWriter for JsonLinesWriter {
    fn write(&self, vector: &QVector, spectrum: &[Complex64]) -> Result<(), SinkError> {
        let record = SpectrumRecord {
            vector_id: vector.id,
            q: vector.value,
            samples: spectrum.len(),
            written_at: Utc::now(),
            spectrum,
        };
        let line = serde_json::to_string(&record)?;
        let mut out = self.lock();
        writeln!(out, "{line}").map_err(|e| self.io_error(e))?;
        debug!(vector_id = vector.id, samples = spectrum.len(), "Spectrum written");
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.lock().flush().map_err(|e| self.io_error(e))
    }
}

/// Keeps every spectrum in memory, keyed by vector id.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    spectra: Mutex<BTreeMap<u64, Vec<Complex64>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, Vec<Complex64>>> {
        self.spectra.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, vector_id: u64) -> Option<Vec<Complex64>> {
        self.lock().get(&vector_id).cloned()
    }

    /// Vector ids written so far, ascending.
    pub fn ids(&self) -> Vec<u64> {
        self.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl SpectrumWriter for MemoryWriter {
    fn write(&self, vector: &QVector, spectrum: &[Complex64]) -> Result<(), SinkError> {
        self.lock().insert(vector.id, spectrum.to_vec());
        Ok(())
    }
}

// ============================================================================
// Progress Monitors
// ============================================================================

/// Receives progress snapshots. Must return quickly: it is called from the
/// orchestrating thread between stage events.
pub trait ProgressMonitor: Send + Sync + 'static {
    fn update(&self, status: &PipelineStatus);
}

/// Logs progress through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMonitor;

impl ProgressMonitor for TracingMonitor {
    fn update(&self, status: &PipelineStatus) {
        info!(
            state = %status.state,
            vector = status.current_vector,
            total_vectors = status.total_vectors,
            frames = status.frames_accumulated,
            progress = status.progress(),
            "Scattering progress"
        );
    }
}

/// Discards progress updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMonitor;

impl ProgressMonitor for NullMonitor {
    fn update(&self, _status: &PipelineStatus) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_writer_keys_by_vector_id() {
        let writer = MemoryWriter::new();
        let q = QVector::new(7, Vec3::new(0.0, 0.0, 1.0));
        writer
            .write(&q, &[Complex64::new(1.0, 2.0)])
            .unwrap();
        assert_eq!(writer.ids(), vec![7]);
        assert_eq!(writer.get(7), Some(vec![Complex64::new(1.0, 2.0)]));
        assert!(writer.get(8).is_none());
    }

    #[test]
    fn test_json_lines_writer_one_record_per_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectra.jsonl");
        let writer = JsonLinesWriter::create(&path).unwrap();
        for id in 0..3u64 {
            let q = QVector::new(id, Vec3::new(id as f64, 0.0, 0.0));
            writer
                .write(&q, &[Complex64::new(id as f64, -1.0), Complex64::new(0.5, 0.5)])
                .unwrap();
        }
        writer.flush().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);

        let record: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(record["vector_id"], 2);
        assert_eq!(record["samples"], 2);
        assert_eq!(record["q"]["x"], 2.0);
        assert_eq!(record["spectrum"][0][0], 2.0);
        assert_eq!(record["spectrum"][0][1], -1.0);
        assert!(record["written_at"].is_string());
    }

    #[test]
    fn test_json_lines_writer_bad_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("spectra.jsonl");
        assert!(matches!(
            JsonLinesWriter::create(&path),
            Err(SinkError::Io { .. })
        ));
    }
}
