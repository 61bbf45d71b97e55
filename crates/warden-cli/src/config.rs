//! CLI configuration via environment variables
//!
//! Policy settings live in `warden.toml`; the CLI itself only reads a few
//! output switches from the environment.

use std::env;

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Default to JSON diagnostic output (WARDEN_DIAGNOSTICS=json)
    pub default_json: bool,
    /// Log filter directive (WARDEN_LOG, defaults to `warn`)
    pub log_filter: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            default_json: env::var("WARDEN_DIAGNOSTICS")
                .map(|v| v.to_lowercase() == "json")
                .unwrap_or(false),
            log_filter: env::var("WARDEN_LOG")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "warn".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_defaults() {
        env::remove_var("WARDEN_DIAGNOSTICS");
        env::remove_var("WARDEN_LOG");

        let config = Config::from_env();
        assert!(!config.default_json);
        assert_eq!(config.log_filter, "warn");
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        env::set_var("WARDEN_DIAGNOSTICS", "JSON");
        env::set_var("WARDEN_LOG", "warden_runtime=debug");

        let config = Config::from_env();
        assert!(config.default_json);
        assert_eq!(config.log_filter, "warden_runtime=debug");

        env::remove_var("WARDEN_DIAGNOSTICS");
        env::remove_var("WARDEN_LOG");
    }
}
