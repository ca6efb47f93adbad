//! Pre-flight checks
//!
//! Verifies the cluster has the APIs, namespaces and storage the scenarios
//! rely on before a long run starts.

use tokio::process::Command;
use tracing::info;

use crate::cdi::storage::{binding_mode, is_hpp_csi};
use crate::cdi::StorageManager;
use crate::config::AppConfig;
use crate::k8s::K8sClient;

/// CRDs every scenario category depends on
const REQUIRED_CRDS: &[&str] = &[
    "datavolumes.cdi.kubevirt.io",
    "storageprofiles.cdi.kubevirt.io",
    "cdiconfigs.cdi.kubevirt.io",
    "virtualmachines.kubevirt.io",
    "virtualmachinesnapshots.snapshot.kubevirt.io",
];

/// Outcome of one check
#[derive(Clone, Debug)]
pub struct PreflightCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

impl PreflightCheck {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
        }
    }
}

pub struct PreflightChecker {
    client: K8sClient,
    config: AppConfig,
}

impl PreflightChecker {
    pub fn new(client: K8sClient, config: AppConfig) -> Self {
        Self { client, config }
    }

    /// Run all pre-flight checks
    pub async fn run(&self) -> PreflightResult {
        info!("Running pre-flight checks");

        let mut checks = vec![self.check_kubectl().await];
        for crd in REQUIRED_CRDS {
            checks.push(self.check_crd(crd).await);
        }
        checks.push(self.check_namespace(&self.config.hco_namespace).await);
        checks.push(self.check_namespace(&self.config.images_server.namespace).await);
        checks.push(self.check_storage_class().await);
        checks.push(self.check_hpp().await);
        checks.push(self.check_workers().await);
        checks.push(match &self.config.unprivileged_user {
            Some(user) => PreflightCheck::pass("Unprivileged user", user),
            None => PreflightCheck::fail(
                "Unprivileged user",
                "not configured, permission scenarios will skip",
            ),
        });

        PreflightResult::new(checks)
    }

    /// `kubectl` runs the in-pod commands
    async fn check_kubectl(&self) -> PreflightCheck {
        let output = Command::new("kubectl")
            .args(["version", "--client"])
            .output()
            .await;

        match output {
            Ok(o) if o.status.success() => PreflightCheck::pass("kubectl", "kubectl is available"),
            _ => PreflightCheck::fail("kubectl", "kubectl not found or not working"),
        }
    }

    async fn check_crd(&self, crd: &str) -> PreflightCheck {
        let name = format!("CRD {crd}");
        match self.client.crd_exists(crd).await {
            Ok(true) => PreflightCheck::pass(name, "installed"),
            Ok(false) => PreflightCheck::fail(name, "not installed"),
            Err(e) => PreflightCheck::fail(name, format!("{e:#}")),
        }
    }

    async fn check_namespace(&self, namespace: &str) -> PreflightCheck {
        let name = format!("Namespace {namespace}");
        match self.client.namespace_exists(namespace).await {
            Ok(true) => PreflightCheck::pass(name, "exists"),
            Ok(false) => PreflightCheck::fail(name, "not found"),
            Err(e) => PreflightCheck::fail(name, format!("{e:#}")),
        }
    }

    async fn check_storage_class(&self) -> PreflightCheck {
        let storage = StorageManager::new(self.client.clone());
        let result = match &self.config.default_storage_class {
            Some(sc) => storage.storage_class(sc).await.map(Some),
            None => storage.default_storage_class().await,
        };

        match result {
            Ok(Some(sc)) => PreflightCheck::pass(
                "Storage class",
                format!(
                    "{} ({}, {})",
                    sc.metadata.name.as_deref().unwrap_or_default(),
                    sc.provisioner,
                    binding_mode(&sc)
                ),
            ),
            Ok(None) => PreflightCheck::fail("Storage class", "no default storage class"),
            Err(e) => PreflightCheck::fail("Storage class", format!("{e:#}")),
        }
    }

    async fn check_hpp(&self) -> PreflightCheck {
        match StorageManager::new(self.client.clone())
            .hpp_storage_classes()
            .await
        {
            Ok(classes) if classes.is_empty() => PreflightCheck::fail(
                "HostPath provisioner",
                "no HPP storage class, HostPath scenarios will skip",
            ),
            Ok(classes) => {
                let names: Vec<_> = classes
                    .iter()
                    .map(|sc| {
                        let name = sc.metadata.name.clone().unwrap_or_default();
                        if is_hpp_csi(sc) {
                            format!("{name} (csi)")
                        } else {
                            name
                        }
                    })
                    .collect();
                PreflightCheck::pass("HostPath provisioner", names.join(", "))
            }
            Err(e) => PreflightCheck::fail("HostPath provisioner", format!("{e:#}")),
        }
    }

    async fn check_workers(&self) -> PreflightCheck {
        match self.client.schedulable_worker_nodes().await {
            Ok(nodes) if nodes.is_empty() => {
                PreflightCheck::fail("Worker nodes", "no schedulable worker node")
            }
            Ok(nodes) => PreflightCheck::pass(
                "Worker nodes",
                format!("{} schedulable", nodes.len()),
            ),
            Err(e) => PreflightCheck::fail("Worker nodes", format!("{e:#}")),
        }
    }
}

pub struct PreflightResult {
    pub passed: bool,
    pub checks: Vec<PreflightCheck>,
    pub message: String,
}

impl PreflightResult {
    pub fn new(checks: Vec<PreflightCheck>) -> Self {
        let passed = checks.iter().filter(|c| c.passed).count();
        let total = checks.len();
        Self {
            passed: passed == total,
            message: if passed == total {
                "All pre-flight checks passed. Ready to run scenarios.".to_string()
            } else {
                format!("{passed}/{total} checks passed. Some scenarios may skip or fail.")
            },
            checks,
        }
    }

    pub fn format_table(&self) -> String {
        let mut output = String::new();

        output.push_str("\nPre-Flight Checks\n");
        output.push_str("──────────────────────────────────────────────────────────────\n");
        for check in &self.checks {
            let status = if check.passed { "✓" } else { "✗" };
            output.push_str(&format!(
                " {} {:52} {}\n",
                status,
                check.name,
                truncate(&check.message, 60)
            ));
        }
        output.push_str("──────────────────────────────────────────────────────────────\n");
        output.push_str(&format!(" {}\n", self.message));

        output
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
