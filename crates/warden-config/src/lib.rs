//! Warden Configuration System
//!
//! Declarative policy configuration for the Warden script sandbox:
//! - Policy files (`warden.toml`): denied declarations, invocation and
//!   constant allow/deny lists, resource limits, per-type rules
//! - Rewrite options (`[rewrite]` section)
//! - Environment overrides (`WARDEN_*`)
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Policy file (./warden.toml, found by walking up from the start directory)
//! 2. Environment variables (WARDEN_*)
//! 3. CLI flags (handled by the caller)
//!
//! # Example
//!
//! ```no_run
//! use warden_config::ConfigLoader;
//! use std::path::Path;
//!
//! let loader = ConfigLoader::new();
//! let config = loader.load_from_file(Path::new("warden.toml")).unwrap();
//! assert!(config.limits.max_iterations.is_some());
//! ```

pub mod loader;
pub mod policy;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Unknown declaration kind '{0}'")]
    UnknownDeclaration(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use loader::{ConfigLoader, LoadedConfig, POLICY_FILE_NAME};
pub use policy::{
    ConstantsConfig, DeclarationsConfig, InvocationsConfig, LimitsConfig, PolicyConfig,
    RewriteConfig, TypeRuleConfig, DECLARATION_KINDS,
};
