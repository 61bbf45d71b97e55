pub mod rewrite;
pub mod validate;

use anyhow::{Context, Result};
use std::path::Path;
use warden_config::{ConfigLoader, PolicyConfig};
use warden_runtime::Policy;

/// Policy for a script: the given file, or the nearest `warden.toml` above
/// the script. Without either the permissive default applies.
pub fn load_policy(script: &Path, policy_path: Option<&Path>) -> Result<(Policy, PolicyConfig)> {
    let loader = ConfigLoader::new();
    let config = match policy_path {
        Some(path) => loader
            .load_from_file(path)
            .with_context(|| format!("Failed to load policy: {}", path.display()))?,
        None => {
            let start = script
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            loader
                .load_from_directory(start)
                .with_context(|| format!("Failed to load policy near {}", script.display()))?
                .config
        }
    };
    let policy = Policy::from_config(&config).context("Invalid policy")?;
    Ok((policy, config))
}

pub fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script: {}", path.display()))
}
