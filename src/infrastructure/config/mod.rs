//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment:
//! - YAML or JSON file loading
//! - Environment variable overrides (`QC_` prefix)
//! - Configuration validation
//! - Type-safe config structs

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
