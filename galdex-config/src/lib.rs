//! Shared configuration loading for galdex.
//!
//! Centralizes environment resolution (sandbox and portable modes, library
//! roots, config dir), the persisted `config.json`, and directory
//! bootstrapping so the daemon and tools share one source of truth.

pub mod error;
pub mod loader;
pub mod settings;

pub use error::ConfigError;
pub use loader::{load, load_with, EnvLookup};
pub use settings::{SchedulerSettings, ScannerSettings, Settings};
