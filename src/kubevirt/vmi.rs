//! VirtualMachineInstance resource management
//!
//! Running-state waits, volume status, live migration and the virt-launcher
//! pod behind a VMI.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, PostParams};
use kube::core::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::vm::DV_DISK;
use crate::constants::TIMEOUT_5SEC;
use crate::error::StorageError;
use crate::k8s::{CleanupStack, K8sClient, PodManager};
use crate::utils::{Sample, TimeoutSampler};

/// Where virt-launcher mounts filesystem disks of the VMI
pub const VMI_DISKS_PATH: &str = "/var/run/kubevirt-private/vmi-disks";
pub const VOLUME_PHASE_READY: &str = "Ready";

#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstance",
    plural = "virtualmachineinstances",
    shortname = "vmi",
    namespaced,
    status = "VirtualMachineInstanceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<VmiCondition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_status: Vec<VolumeStatus>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmiCondition {
    #[serde(rename = "type")]
    pub condition_type: String,

    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStatus {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Set for hotplugged volumes: Pending, Bound, AttachedToNode, Ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hotplug_volume: Option<serde_json::Value>,
}

/// Live migration request for a running VMI
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstanceMigration",
    plural = "virtualmachineinstancemigrations",
    shortname = "vmim",
    namespaced,
    status = "MigrationStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSpec {
    pub vmi_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    /// Pending, Scheduling, Scheduled, PreparingTarget, TargetReady,
    /// Running, Succeeded or Failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

pub const MIGRATION_SUCCEEDED: &str = "Succeeded";
pub const MIGRATION_FAILED: &str = "Failed";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmiPhase {
    Pending,
    Scheduling,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl VmiPhase {
    pub fn parse(s: &str) -> Self {
        match s {
            "Pending" => VmiPhase::Pending,
            "Scheduling" => VmiPhase::Scheduling,
            "Scheduled" => VmiPhase::Scheduled,
            "Running" => VmiPhase::Running,
            "Succeeded" => VmiPhase::Succeeded,
            "Failed" => VmiPhase::Failed,
            _ => VmiPhase::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, VmiPhase::Succeeded | VmiPhase::Failed)
    }
}

impl VirtualMachineInstance {
    pub fn phase(&self) -> VmiPhase {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map(VmiPhase::parse)
            .unwrap_or(VmiPhase::Unknown)
    }

    pub fn node_name(&self) -> Option<&str> {
        self.status.as_ref()?.node_name.as_deref()
    }

    /// Serial of disk `name` in the running domain
    pub fn disk_serial(&self, name: &str) -> Option<&str> {
        self.spec
            .domain
            .as_ref()?
            .pointer("/devices/disks")?
            .as_array()?
            .iter()
            .find(|d| d.get("name").and_then(|n| n.as_str()) == Some(name))?
            .get("serial")?
            .as_str()
    }

    pub fn volume_status(&self, volume: &str) -> Option<&VolumeStatus> {
        self.status
            .as_ref()?
            .volume_status
            .iter()
            .find(|v| v.name == volume)
    }
}

/// Output of `ls -l` on the launcher's disk directory shows the image
/// owned by qemu with mode 0660
pub fn check_image_permissions(ls_output: &str) -> Result<()> {
    for expected in ["disk.img", "-rw-rw----.", "qemu qemu"] {
        crate::ensure_that!(
            ls_output.contains(expected),
            "'{expected}' not found in launcher disk listing: {ls_output}"
        );
    }
    Ok(())
}

pub struct VmiManager {
    client: K8sClient,
}

impl VmiManager {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<VirtualMachineInstance> {
        self.client.api_in(namespace)
    }

    pub async fn get(&self, name: &str, namespace: &str) -> Result<VirtualMachineInstance> {
        self.api(namespace)
            .get(name)
            .await
            .with_context(|| format!("Failed to get VirtualMachineInstance {namespace}/{name}"))
    }

    /// Wait for phase `Running`; terminal phases end the wait
    pub async fn wait_running(
        &self,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<VirtualMachineInstance> {
        let api = self.api(namespace);

        let vmi = TimeoutSampler::new(timeout, TIMEOUT_5SEC)
            .waiting_for(format!("VMI {name} running"))
            .wait_for(|| {
                let api = api.clone();
                async move {
                    let Some(vmi) = api.get_opt(name).await? else {
                        return Ok(Sample::observed("no VMI"));
                    };
                    let phase = vmi.phase();
                    Ok(match phase {
                        VmiPhase::Running => Sample::Done(vmi),
                        p if p.is_terminal() => Sample::Stop(format!("{p:?}")),
                        p => Sample::observed(p),
                    })
                }
            })
            .await?;

        info!(
            "VMI {}/{} running on {}",
            namespace,
            name,
            vmi.node_name().unwrap_or("unknown node")
        );
        Ok(vmi)
    }

    pub async fn node(&self, name: &str, namespace: &str) -> Result<String> {
        let vmi = self.get(name, namespace).await?;
        vmi.node_name()
            .map(str::to_string)
            .ok_or_else(|| StorageError::assertion(format!("VMI {name} has no node")).into())
    }

    /// Wait for a (hotplugged) volume to report phase `Ready`
    pub async fn wait_volume_ready(
        &self,
        name: &str,
        namespace: &str,
        volume: &str,
        timeout: Duration,
    ) -> Result<VolumeStatus> {
        let api = self.api(namespace);

        TimeoutSampler::new(timeout, TIMEOUT_5SEC)
            .waiting_for(format!("VMI {name} volume {volume} ready"))
            .wait_for(|| {
                let api = api.clone();
                async move {
                    let vmi = api.get(name).await?;
                    Ok(match vmi.volume_status(volume) {
                        Some(status) if status.phase.as_deref() == Some(VOLUME_PHASE_READY) => {
                            Sample::Done(status.clone())
                        }
                        Some(status) => Sample::observed(&status.phase),
                        None => Sample::observed("no volume status"),
                    })
                }
            })
            .await
    }

    /// Live-migrate VMI `name` and return the node it lands on.
    ///
    /// Fails when the migration reports `Failed` or the VMI is still on its
    /// source node afterwards.
    pub async fn migrate(
        &self,
        name: &str,
        namespace: &str,
        timeout: Duration,
        cleanup: &mut CleanupStack,
    ) -> Result<String> {
        let source = self.node(name, namespace).await?;
        let api: Api<VirtualMachineInstanceMigration> = self.client.api_in(namespace);
        let migration = VirtualMachineInstanceMigration {
            metadata: ObjectMeta {
                name: Some(format!("{name}-migration")),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: MigrationSpec {
                vmi_name: name.to_string(),
            },
            status: None,
        };
        let created = api
            .create(&PostParams::default(), &migration)
            .await
            .with_context(|| format!("Failed to create migration for VMI {namespace}/{name}"))?;
        let migration_name = created.metadata.name.clone().unwrap_or_default();
        cleanup.delete_later(api.clone(), migration_name.clone());
        info!("Migrating VMI {}/{} away from {}", namespace, name, source);

        TimeoutSampler::new(timeout, TIMEOUT_5SEC)
            .waiting_for(format!("migration {migration_name} to succeed"))
            .wait_for(|| {
                let api = api.clone();
                let migration_name = migration_name.as_str();
                async move {
                    let migration = api.get(migration_name).await?;
                    let phase = migration
                        .status
                        .and_then(|s| s.phase)
                        .unwrap_or_default();
                    Ok(if phase == MIGRATION_SUCCEEDED {
                        Sample::Done(())
                    } else if phase == MIGRATION_FAILED {
                        Sample::Stop(phase)
                    } else {
                        Sample::Pending(Some(phase))
                    })
                }
            })
            .await?;

        let target = self.node(name, namespace).await?;
        crate::ensure_that!(
            target != source,
            "VMI {name} is still on {source} after migration {migration_name}"
        );
        info!("VMI {}/{} migrated to {}", namespace, name, target);
        Ok(target)
    }

    /// The virt-launcher pod running the VMI
    pub async fn launcher_pod(&self, name: &str, namespace: &str) -> Result<Pod> {
        let selector = format!("kubevirt.io=virt-launcher,vm.kubevirt.io/name={name}");
        let pods = PodManager::new(self.client.clone())
            .list(namespace, Some(&selector))
            .await?;
        debug!("Found {} launcher pods for {}", pods.len(), name);

        // A finished pod of a previous run may still be listed
        pods.into_iter()
            .find(|p| {
                p.status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .is_some_and(|phase| phase == "Running")
            })
            .ok_or_else(|| {
                StorageError::assertion(format!("No running virt-launcher pod for {name}")).into()
            })
    }

    /// Exec into the launcher and check the DV disk image ownership and mode
    pub async fn verify_image_permissions(&self, name: &str, namespace: &str) -> Result<()> {
        let pod = self.launcher_pod(name, namespace).await?;
        let pod_name = pod.metadata.name.unwrap_or_default();
        let disk_dir = format!("{VMI_DISKS_PATH}/{DV_DISK}");
        let output = PodManager::new(self.client.clone())
            .exec(&pod_name, namespace, &["ls", "-l", &disk_dir])
            .await?;
        check_image_permissions(&output)
    }

    /// `disk.img` exists in the launcher's DV disk directory
    pub async fn verify_disk_image(&self, name: &str, namespace: &str) -> Result<()> {
        let pod = self.launcher_pod(name, namespace).await?;
        let pod_name = pod.metadata.name.unwrap_or_default();
        let disk_dir = format!("{VMI_DISKS_PATH}/{DV_DISK}");
        let output = PodManager::new(self.client.clone())
            .exec(&pod_name, namespace, &["ls", "-1", &disk_dir])
            .await?;
        crate::ensure_that!(
            output.contains("disk.img"),
            "disk.img not found in {disk_dir}: {output}"
        );
        Ok(())
    }
}
