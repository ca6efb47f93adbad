//! Configuration module
//!
//! Handles loading and managing suite configuration.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::{find_config_file, load_config, write_example};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::images;

/// Suite configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Namespace test resources are created in
    pub namespace: String,

    /// Namespace the virtualization operators live in
    pub hco_namespace: String,

    /// Storage class used when a scenario does not pick one itself
    pub default_storage_class: Option<String>,

    /// Base URL of the test image artifact server (trailing slash expected)
    pub artifact_server_url: String,

    /// Base URL of the in-cluster images server, keyed by scheme
    pub images_server: ImagesServerConfig,

    /// ConfigMap holding the CA for the in-cluster HTTPS image server
    pub https_cert_configmap: String,

    /// Image for pods that mount PVCs for inspection
    pub pod_image: String,

    /// Upload proxy host, skips route discovery when set
    pub upload_proxy_url: Option<String>,

    /// User impersonated by the unprivileged client
    pub unprivileged_user: Option<String>,

    /// Node used for hostpath node placement scenarios
    pub worker_node: Option<String>,

    /// Installed virtualization version, checked against HPP labels
    pub cnv_version: Option<String>,

    /// Delete created resources after each scenario
    pub cleanup: bool,

    /// Scenario timeouts
    pub timeouts: TimeoutConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            namespace: "storage-tests".to_string(),
            hco_namespace: "openshift-cnv".to_string(),
            default_storage_class: None,
            artifact_server_url: "http://cnv-qe-server.cnv-qe.rhood.us/files/".to_string(),
            images_server: ImagesServerConfig::default(),
            https_cert_configmap: "internal-https-configmap".to_string(),
            pod_image: "quay.io/openshift-cnv/qe-cnv-tests-fedora:40".to_string(),
            upload_proxy_url: None,
            unprivileged_user: None,
            worker_node: None,
            cnv_version: None,
            cleanup: true,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Self = if is_yaml(path.as_ref()) {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = if is_yaml(path.as_ref()) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Apply environment variable overrides on top of file values
    pub fn with_env(mut self, env: &EnvConfig) -> Self {
        if let Some(ns) = &env.namespace {
            self.namespace = ns.clone();
        }
        if let Some(ns) = &env.hco_namespace {
            self.hco_namespace = ns.clone();
        }
        if let Some(sc) = &env.storage_class {
            self.default_storage_class = Some(sc.clone());
        }
        if let Some(url) = &env.artifact_server {
            self.artifact_server_url = url.clone();
        }
        if let Some(url) = &env.upload_proxy {
            self.upload_proxy_url = Some(url.clone());
        }
        if let Some(user) = &env.unprivileged_user {
            self.unprivileged_user = Some(user.clone());
        }
        if let Some(cleanup) = env.cleanup {
            self.cleanup = cleanup;
        }
        self
    }

    /// Full URL of an image on the artifact server
    pub fn artifact_url(&self, directory: &str, file_name: &str) -> String {
        format!("{}{}{}", self.artifact_server_url, directory, file_name)
    }

    /// URL of the default cirros qcow2 image
    pub fn cirros_qcow2_url(&self) -> String {
        self.artifact_url(images::cirros::DIR, images::cirros::QCOW2_IMG)
    }
}

/// In-cluster image server endpoints
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesServerConfig {
    /// Namespace running the server and holding its CA ConfigMap
    pub namespace: String,
    pub http: String,
    pub https: String,
    pub http_auth: String,
    /// Secret with basic-auth credentials for `http_auth`
    pub auth_secret: String,
}

impl Default for ImagesServerConfig {
    fn default() -> Self {
        Self {
            namespace: "cnv-tests-utilities".to_string(),
            http: "http://internal-http.cnv-tests-utilities/".to_string(),
            https: "https://internal-http.cnv-tests-utilities/".to_string(),
            http_auth: "http://internal-http.cnv-tests-utilities:81/".to_string(),
            auth_secret: "internal-http-secret".to_string(),
        }
    }
}

/// Timeouts in seconds
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub import_secs: u64,
    pub upload_secs: u64,
    pub clone_secs: u64,
    pub snapshot_secs: u64,
    pub vm_ready_secs: u64,
    pub pod_running_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            import_secs: 600,
            upload_secs: 180,
            clone_secs: 600,
            snapshot_secs: 300,
            vm_ready_secs: 300,
            pod_running_secs: 180,
        }
    }
}

impl TimeoutConfig {
    pub fn import(&self) -> Duration {
        Duration::from_secs(self.import_secs)
    }

    pub fn upload(&self) -> Duration {
        Duration::from_secs(self.upload_secs)
    }

    pub fn clone_dv(&self) -> Duration {
        Duration::from_secs(self.clone_secs)
    }

    pub fn snapshot(&self) -> Duration {
        Duration::from_secs(self.snapshot_secs)
    }

    pub fn vm_ready(&self) -> Duration {
        Duration::from_secs(self.vm_ready_secs)
    }

    pub fn pod_running(&self) -> Duration {
        Duration::from_secs(self.pod_running_secs)
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.hco_namespace, "openshift-cnv");
        assert!(config.cleanup);
        assert_eq!(config.timeouts.upload(), Duration::from_secs(180));
    }

    #[test]
    fn test_artifact_url() {
        let config = AppConfig {
            artifact_server_url: "http://server/files/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.cirros_qcow2_url(),
            "http://server/files/cnv-tests/cirros-images/cirros-0.4.0-x86_64-disk.qcow2"
        );
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "namespace: my-ns\ntimeouts:\n  import_secs: 42\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.namespace, "my-ns");
        assert_eq!(config.timeouts.import_secs, 42);
        assert_eq!(config.timeouts.clone_secs, 600);
        assert_eq!(config.hco_namespace, "openshift-cnv");
    }

    #[test]
    fn test_save_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = AppConfig {
            unprivileged_user: Some("unprivileged-user".to_string()),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.unprivileged_user.as_deref(), Some("unprivileged-user"));
    }

    #[test]
    fn test_env_overrides() {
        let env = EnvConfig {
            namespace: Some("from-env".to_string()),
            storage_class: Some("hostpath-csi-basic".to_string()),
            cleanup: Some(false),
            ..Default::default()
        };
        let config = AppConfig::default().with_env(&env);
        assert_eq!(config.namespace, "from-env");
        assert_eq!(
            config.default_storage_class.as_deref(),
            Some("hostpath-csi-basic")
        );
        assert!(!config.cleanup);
    }
}
