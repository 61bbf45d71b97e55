//! Configuration Loader
//!
//! Handles loading policy configuration with proper precedence.

use crate::policy::PolicyConfig;
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// File name searched for by [`ConfigLoader::load_from_directory`]
pub const POLICY_FILE_NAME: &str = "warden.toml";

/// Configuration loader
///
/// Loads a policy file and applies overrides with proper precedence:
/// 1. Policy file (warden.toml) - lowest priority
/// 2. Environment variables (WARDEN_*) - overrides the file
/// 3. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    apply_env: bool,
}

/// Loaded configuration and where it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: PolicyConfig,

    /// Policy file the config was read from, if any
    pub path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { apply_env: true }
    }

    /// Ignore `WARDEN_*` environment variables
    pub fn without_env_overrides(mut self) -> Self {
        self.apply_env = false;
        self
    }

    /// Load configuration from a specific policy file
    pub fn load_from_file(&self, path: &Path) -> ConfigResult<PolicyConfig> {
        let config = PolicyConfig::load_from_file(path)?;
        self.finish(config)
    }

    /// Load configuration from policy TOML text
    pub fn load_from_str(&self, content: &str) -> ConfigResult<PolicyConfig> {
        let config = PolicyConfig::from_toml_str(content)?;
        self.finish(config)
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find warden.toml. Without one the
    /// permissive default policy is used.
    pub fn load_from_directory(&self, start_dir: &Path) -> ConfigResult<LoadedConfig> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(POLICY_FILE_NAME);

            if config_path.exists() {
                let config = self.load_from_file(&config_path)?;
                return Ok(LoadedConfig {
                    config,
                    path: Some(config_path),
                });
            }

            // Try parent directory
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => {
                    return Ok(LoadedConfig {
                        config: self.finish(PolicyConfig::default())?,
                        path: None,
                    });
                }
            }
        }
    }

    fn finish(&self, config: PolicyConfig) -> ConfigResult<PolicyConfig> {
        if self.apply_env {
            self.apply_env_overrides(config)
        } else {
            Ok(config)
        }
    }

    /// Apply environment variable overrides
    ///
    /// - WARDEN_MAX_ITERATIONS=N
    /// - WARDEN_MAX_INVOCATIONS=N
    /// - WARDEN_DISABLE=true
    fn apply_env_overrides(&self, mut config: PolicyConfig) -> ConfigResult<PolicyConfig> {
        if let Ok(value) = env::var("WARDEN_MAX_ITERATIONS") {
            config.limits.max_iterations = Some(parse_limit("WARDEN_MAX_ITERATIONS", &value)?);
        }

        if let Ok(value) = env::var("WARDEN_MAX_INVOCATIONS") {
            config.limits.max_invocations = Some(parse_limit("WARDEN_MAX_INVOCATIONS", &value)?);
        }

        if let Ok(value) = env::var("WARDEN_DISABLE") {
            config.disabled = matches!(value.to_lowercase().as_str(), "true" | "1" | "yes");
        }

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_limit(field: &str, value: &str) -> ConfigResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidValue {
            field: field.to_string(),
            reason: e.to_string(),
        })
}
