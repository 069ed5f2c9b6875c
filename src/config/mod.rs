//! Scatter Configuration Module
//!
//! Decomposition limits and pipeline sizing loaded from TOML files.
//!
//! ## Loading Order
//!
//! 1. `SCATTER_CONFIG` environment variable (path to TOML file)
//! 2. `scatter.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! config::init(ScatterConfig::load());
//!
//! let threshold = config::get().decomposition.utilization;
//! ```

mod scatter_config;
pub mod defaults;
pub mod validation;

pub use scatter_config::*;

use std::sync::OnceLock;

/// Global scatter configuration, initialized once at startup.
static SCATTER_CONFIG: OnceLock<ScatterConfig> = OnceLock::new();

/// Initialize the global scatter configuration.
///
/// Later calls are ignored with a warning.
pub fn init(config: ScatterConfig) {
    if SCATTER_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get a reference to the global scatter configuration.
///
/// Falls back to built-in defaults when `init()` has not been called.
pub fn get() -> &'static ScatterConfig {
    SCATTER_CONFIG.get_or_init(ScatterConfig::default)
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    SCATTER_CONFIG.get().is_some()
}
