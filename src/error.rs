//! Error types for configuration and setup.
//!
//! Runtime interaction never surfaces errors: stale references and
//! precondition violations are logged and answered with safe defaults.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when loading interaction configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A value is outside its valid range.
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Dotted field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Errors raised while setting up the interaction system.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SetupError {
    /// Not enough free collision groups for the interaction layers.
    #[error("no free collision layers: need {needed}, {available} available")]
    NoFreeLayers {
        /// Groups required.
        needed: usize,
        /// Groups left after reservations.
        available: usize,
    },
}
