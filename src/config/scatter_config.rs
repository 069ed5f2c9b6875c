//! Scatter Configuration - decomposition limits and pipeline sizing as TOML values
//!
//! Each struct implements `Default`, so a run without any config file gets a
//! fully automatic decomposition and a pipeline sized to the host.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults::{
    DEFAULT_BUFFERS_PER_COMPUTE_WORKER, DEFAULT_MAX_PARTITION_BYTES, DEFAULT_OUTPUT_PATH,
    DEFAULT_UTILIZATION_THRESHOLD, MAX_WORKERS_PER_STAGE,
};

/// Environment variable holding the path of the config file.
pub const CONFIG_ENV_VAR: &str = "SCATTER_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "scatter.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a scattering run.
///
/// Load with `ScatterConfig::load()` which searches:
/// 1. `$SCATTER_CONFIG` env var
/// 2. `./scatter.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScatterConfig {
    /// Node partitioning limits
    #[serde(default)]
    pub decomposition: DecompositionConfig,

    /// Worker pool sizing
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Where finished spectra go
    #[serde(default)]
    pub output: OutputConfig,
}

impl ScatterConfig {
    /// Load configuration using the standard search order:
    /// 1. `$SCATTER_CONFIG` environment variable
    /// 2. `./scatter.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded scatter config from SCATTER_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from SCATTER_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "SCATTER_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded scatter config from ./scatter.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./scatter.toml, using defaults");
                }
            }
        }

        info!("No scatter.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate a TOML document. Unknown keys only produce warnings.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate all values for internal consistency.
    ///
    /// Rules:
    /// - Utilization threshold is a fraction in `[0, 1]`
    /// - A fixed partition size is at least 1
    /// - Every stage has between 1 and `MAX_WORKERS_PER_STAGE` workers
    /// - The free-buffer pool is non-empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let d = &self.decomposition;
        if !d.utilization.is_finite() || !(0.0..=1.0).contains(&d.utilization) {
            errors.push(format!(
                "decomposition.utilization must be within [0, 1], got {}",
                d.utilization
            ));
        }
        if !d.partitions.automatic && d.partitions.size == 0 {
            errors.push(
                "decomposition.partitions.size must be > 0 when automatic = false".to_string(),
            );
        }
        if d.max_partition_bytes == 0 {
            errors.push("decomposition.max_partition_bytes must be > 0".to_string());
        }

        let p = &self.pipeline;
        Self::check_workers(p.staging_workers, "pipeline.staging_workers", &mut errors);
        Self::check_workers(p.compute_workers, "pipeline.compute_workers", &mut errors);
        Self::check_workers(p.marshal_workers, "pipeline.marshal_workers", &mut errors);
        if p.buffers == 0 {
            errors.push("pipeline.buffers must be > 0".to_string());
        }

        if self.output.path.trim().is_empty() {
            errors.push("output.path must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_workers(count: usize, name: &str, errors: &mut Vec<String>) {
        if count == 0 || count > MAX_WORKERS_PER_STAGE {
            errors.push(format!(
                "{name} must be within 1..={MAX_WORKERS_PER_STAGE}, got {count}"
            ));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Config parse error ({}): {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Decomposition
// ============================================================================

/// How compute nodes are split into process groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionConfig {
    /// Minimum acceptable fraction of useful work (0-1). Plans below it are rejected.
    #[serde(default = "default_utilization")]
    pub utilization: f64,

    /// Per-partition byte ceiling for staged data
    #[serde(default = "default_max_partition_bytes")]
    pub max_partition_bytes: u64,

    #[serde(default)]
    pub partitions: PartitionConfig,
}

fn default_utilization() -> f64 {
    DEFAULT_UTILIZATION_THRESHOLD
}
fn default_max_partition_bytes() -> u64 {
    DEFAULT_MAX_PARTITION_BYTES
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            utilization: default_utilization(),
            max_partition_bytes: default_max_partition_bytes(),
            partitions: PartitionConfig::default(),
        }
    }
}

/// Partition size selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Search for the partition size with the least waste
    #[serde(default = "default_true")]
    pub automatic: bool,

    /// Nodes per partition when `automatic = false`
    #[serde(default = "default_partition_size")]
    pub size: u64,
}

fn default_true() -> bool {
    true
}
fn default_partition_size() -> u64 {
    1
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            automatic: default_true(),
            size: default_partition_size(),
        }
    }
}

impl PartitionConfig {
    /// Fixed-size partitions of `size` nodes.
    pub fn fixed(size: u64) -> Self {
        Self {
            automatic: false,
            size,
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Worker counts per stage and free-buffer pool size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_one")]
    pub staging_workers: usize,

    #[serde(default = "default_compute_workers")]
    pub compute_workers: usize,

    #[serde(default = "default_one")]
    pub marshal_workers: usize,

    /// Result buffers in circulation. Compute workers stall once all are in flight.
    #[serde(default = "default_buffers")]
    pub buffers: usize,
}

fn default_one() -> usize {
    1
}
fn default_compute_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(MAX_WORKERS_PER_STAGE)
}
fn default_buffers() -> usize {
    default_compute_workers() * DEFAULT_BUFFERS_PER_COMPUTE_WORKER
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            staging_workers: default_one(),
            compute_workers: default_compute_workers(),
            marshal_workers: default_one(),
            buffers: default_buffers(),
        }
    }
}

impl PipelineConfig {
    /// Set the number of compute workers.
    pub fn with_compute_workers(mut self, workers: usize) -> Self {
        self.compute_workers = workers;
        self
    }

    /// Set the number of marshal workers.
    pub fn with_marshal_workers(mut self, workers: usize) -> Self {
        self.marshal_workers = workers;
        self
    }

    /// Set the size of the free-buffer pool.
    pub fn with_buffers(mut self, buffers: usize) -> Self {
        self.buffers = buffers;
        self
    }
}

// ============================================================================
// Output
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// JSON-lines file receiving one record per finished vector
    #[serde(default = "default_output_path")]
    pub path: String,
}

fn default_output_path() -> String {
    DEFAULT_OUTPUT_PATH.to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
        }
    }
}
