//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "STORAGE_TESTS";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Namespace from STORAGE_TESTS_NAMESPACE
    pub namespace: Option<String>,
    /// HCO namespace from STORAGE_TESTS_HCO_NAMESPACE
    pub hco_namespace: Option<String>,
    /// Storage class from STORAGE_TESTS_STORAGE_CLASS
    pub storage_class: Option<String>,
    /// Artifact server from STORAGE_TESTS_ARTIFACT_SERVER
    pub artifact_server: Option<String>,
    /// Upload proxy host from STORAGE_TESTS_UPLOAD_PROXY
    pub upload_proxy: Option<String>,
    /// Unprivileged user from STORAGE_TESTS_UNPRIVILEGED_USER
    pub unprivileged_user: Option<String>,
    /// Cleanup toggle from STORAGE_TESTS_CLEANUP
    pub cleanup: Option<bool>,
    /// Config file from STORAGE_TESTS_CONFIG
    pub config_file: Option<String>,
    /// Verbose from STORAGE_TESTS_VERBOSE
    pub verbose: Option<bool>,
    /// Output format from STORAGE_TESTS_FORMAT
    pub format: Option<String>,
    /// Kubeconfig from KUBECONFIG
    pub kubeconfig: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            namespace: get_env("NAMESPACE"),
            hco_namespace: get_env("HCO_NAMESPACE"),
            storage_class: get_env("STORAGE_CLASS"),
            artifact_server: get_env("ARTIFACT_SERVER"),
            upload_proxy: get_env("UPLOAD_PROXY"),
            unprivileged_user: get_env("UNPRIVILEGED_USER"),
            cleanup: get_env_bool("CLEANUP"),
            config_file: get_env("CONFIG"),
            verbose: get_env_bool("VERBOSE"),
            format: get_env("FORMAT"),
            kubeconfig: env::var("KUBECONFIG").ok(),
        }
    }

    /// Check if any suite variables are set
    pub fn has_any(&self) -> bool {
        self.namespace.is_some()
            || self.hco_namespace.is_some()
            || self.storage_class.is_some()
            || self.artifact_server.is_some()
            || self.upload_proxy.is_some()
            || self.unprivileged_user.is_some()
            || self.cleanup.is_some()
            || self.config_file.is_some()
            || self.verbose.is_some()
            || self.format.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_NAMESPACE:         {:?}", ENV_PREFIX, self.namespace);
        println!("  {}_HCO_NAMESPACE:     {:?}", ENV_PREFIX, self.hco_namespace);
        println!("  {}_STORAGE_CLASS:     {:?}", ENV_PREFIX, self.storage_class);
        println!("  {}_ARTIFACT_SERVER:   {:?}", ENV_PREFIX, self.artifact_server);
        println!("  {}_UPLOAD_PROXY:      {:?}", ENV_PREFIX, self.upload_proxy);
        println!("  {}_UNPRIVILEGED_USER: {:?}", ENV_PREFIX, self.unprivileged_user);
        println!("  {}_CLEANUP:           {:?}", ENV_PREFIX, self.cleanup);
        println!("  {}_CONFIG:            {:?}", ENV_PREFIX, self.config_file);
        println!("  KUBECONFIG:                      {:?}", self.kubeconfig);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables in tests
#[cfg(test)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

#[cfg(test)]
impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    pub fn namespace(self, namespace: impl Into<String>) -> Self {
        self.var("NAMESPACE", namespace)
    }

    pub fn storage_class(self, storage_class: impl Into<String>) -> Self {
        self.var("STORAGE_CLASS", storage_class)
    }

    pub fn unprivileged_user(self, user: impl Into<String>) -> Self {
        self.var("UNPRIVILEGED_USER", user)
    }

    pub fn cleanup(self, cleanup: bool) -> Self {
        self.var("CLEANUP", cleanup.to_string())
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        for (key, value) in self.vars {
            env::set_var(key, value);
        }

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
#[cfg(test)]
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all STORAGE_TESTS environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_NAMESPACE          Namespace for test resources");
    println!("  {ENV_PREFIX}_HCO_NAMESPACE      Namespace of the virtualization operators");
    println!("  {ENV_PREFIX}_STORAGE_CLASS      Default storage class");
    println!("  {ENV_PREFIX}_ARTIFACT_SERVER    Base URL of the test image server");
    println!("  {ENV_PREFIX}_UPLOAD_PROXY       Upload proxy host (skips route lookup)");
    println!("  {ENV_PREFIX}_UNPRIVILEGED_USER  User to impersonate for permission scenarios");
    println!("  {ENV_PREFIX}_CLEANUP            Delete created resources (true/false)");
    println!("  {ENV_PREFIX}_CONFIG             Path to configuration file");
    println!("  {ENV_PREFIX}_VERBOSE            Enable verbose output (true/false)");
    println!("  {ENV_PREFIX}_FORMAT             Output format (table, json, csv)");
    println!("  KUBECONFIG                      Path to kubeconfig file");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_STORAGE_CLASS=hostpath-csi-basic");
    println!("  storage-tests run --category import");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.namespace.is_none());
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_builder() {
        let _guard = EnvBuilder::new()
            .namespace("env-ns")
            .storage_class("ocs-storagecluster-ceph-rbd")
            .unprivileged_user("unprivileged-user")
            .apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.namespace.as_deref(), Some("env-ns"));
        assert_eq!(
            config.storage_class.as_deref(),
            Some("ocs-storagecluster-ceph-rbd")
        );
        assert_eq!(config.unprivileged_user.as_deref(), Some("unprivileged-user"));
        assert!(config.has_any());
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = EnvBuilder::new().cleanup(false).apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.cleanup, Some(false));
    }
}
