//! Configuration file management
//!
//! Handles finding and loading the suite configuration file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{AppConfig, EnvConfig};

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./storage-tests.yaml",
    "./storage-tests.yml",
    "./.storage-tests.yaml",
    "~/.config/storage-tests/config.yaml",
];

/// Find configuration file in standard locations
pub fn find_config_file() -> Option<PathBuf> {
    CONFIG_LOCATIONS
        .iter()
        .map(|location| expand_path(location))
        .find(|path| path.exists())
}

/// Resolve the effective configuration.
///
/// An explicit path (flag or `STORAGE_TESTS_CONFIG`) must exist; otherwise the
/// standard locations are searched and defaults are used when none is found.
/// Environment overrides are applied last.
pub fn load_config(explicit: Option<&str>) -> Result<AppConfig> {
    let env = EnvConfig::load();

    let path = explicit
        .map(str::to_string)
        .or_else(|| env.config_file.clone())
        .map(|p| expand_path(&p));

    let config = match path.or_else(find_config_file) {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            AppConfig::load(&path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?
        }
        None => AppConfig::default(),
    };

    Ok(config.with_env(&env))
}

/// Write an example configuration, creating parent directories
pub fn write_example(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    AppConfig::example().save(path)
}

impl AppConfig {
    /// Example configuration written by `config init`
    pub fn example() -> Self {
        Self {
            default_storage_class: Some("hostpath-csi-basic".to_string()),
            unprivileged_user: Some("unprivileged-user".to_string()),
            cnv_version: Some("4.16.0".to_string()),
            ..Default::default()
        }
    }
}

/// Expand ~ to home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("./test.yaml"), PathBuf::from("./test.yaml"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/x.yaml"), home.join("x.yaml"));
        }
    }

    #[test]
    fn test_write_example_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        write_example(&path).unwrap();
        let loaded = load_config(path.to_str()).unwrap();
        assert_eq!(loaded.unprivileged_user.as_deref(), Some("unprivileged-user"));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(load_config(Some("/nonexistent/storage-tests.yaml")).is_err());
    }
}
