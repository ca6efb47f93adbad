//! VM snapshots and restores

use anyhow::{Context, Result};
use kube::api::{Api, ObjectMeta, PostParams};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::constants::{ERR_CANNOT_CREATE_VM_SNAPSHOTS, TIMEOUT_5SEC};
use crate::error::StorageError;
use crate::k8s::{CleanupStack, K8sClient};
use crate::utils::{Sample, TimeoutSampler};

pub const INDICATION_ONLINE: &str = "Online";

#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "snapshot.kubevirt.io",
    version = "v1beta1",
    kind = "VirtualMachineSnapshot",
    plural = "virtualmachinesnapshots",
    shortname = "vmsnapshot",
    namespaced,
    status = "VirtualMachineSnapshotStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSnapshotSpec {
    pub source: VmReference,
}

/// Typed local reference to a VirtualMachine
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmReference {
    pub api_group: String,
    pub kind: String,
    pub name: String,
}

impl VmReference {
    pub fn vm(name: impl Into<String>) -> Self {
        Self {
            api_group: "kubevirt.io".to_string(),
            kind: "VirtualMachine".to_string(),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSnapshotStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default)]
    pub ready_to_use: bool,

    /// `Online`, `NoGuestAgent`, `GuestAgent`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indications: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SnapshotError>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "snapshot.kubevirt.io",
    version = "v1beta1",
    kind = "VirtualMachineRestore",
    plural = "virtualmachinerestores",
    shortname = "vmrestore",
    namespaced,
    status = "VirtualMachineRestoreStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineRestoreSpec {
    pub target: VmReference,
    pub virtual_machine_snapshot_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineRestoreStatus {
    #[serde(default)]
    pub complete: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_time: Option<String>,
}

pub fn snapshot(name: &str, namespace: &str, vm_name: &str) -> VirtualMachineSnapshot {
    VirtualMachineSnapshot {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: VirtualMachineSnapshotSpec {
            source: VmReference::vm(vm_name),
        },
        status: None,
    }
}

pub fn restore(name: &str, namespace: &str, vm_name: &str, snapshot_name: &str) -> VirtualMachineRestore {
    VirtualMachineRestore {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: VirtualMachineRestoreSpec {
            target: VmReference::vm(vm_name),
            virtual_machine_snapshot_name: snapshot_name.to_string(),
        },
        status: None,
    }
}

/// An online snapshot carries the `Online` indication, an offline one none
pub fn check_snapshot_indication(snapshot: &VirtualMachineSnapshot, online: bool) -> Result<()> {
    let indications = snapshot
        .status
        .as_ref()
        .map(|s| s.indications.clone())
        .unwrap_or_default();

    if online {
        crate::ensure_that!(
            indications.iter().any(|i| i == INDICATION_ONLINE),
            "No snapshot indication '{INDICATION_ONLINE}' in {indications:?}"
        );
    } else {
        crate::ensure_that!(
            indications.is_empty(),
            "Snapshot should not have indications, current indications: {indications:?}"
        );
    }
    Ok(())
}

pub struct SnapshotManager {
    client: K8sClient,
}

impl SnapshotManager {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }

    fn snapshots(&self, namespace: &str) -> Api<VirtualMachineSnapshot> {
        self.client.api_in(namespace)
    }

    fn restores(&self, namespace: &str) -> Api<VirtualMachineRestore> {
        self.client.api_in(namespace)
    }

    pub async fn create_snapshot(
        &self,
        name: &str,
        namespace: &str,
        vm_name: &str,
        cleanup: &mut CleanupStack,
    ) -> Result<VirtualMachineSnapshot> {
        let api = self.snapshots(namespace);
        let created = api
            .create(&PostParams::default(), &snapshot(name, namespace, vm_name))
            .await
            .with_context(|| format!("Failed to create VirtualMachineSnapshot {name}"))?;
        cleanup.delete_later(api, name);

        info!("Created VirtualMachineSnapshot {}/{} of {}", namespace, name, vm_name);
        Ok(created)
    }

    /// Wait for `readyToUse`; phase `Failed` ends the wait
    pub async fn wait_snapshot_ready(
        &self,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<VirtualMachineSnapshot> {
        let api = self.snapshots(namespace);

        TimeoutSampler::new(timeout, TIMEOUT_5SEC)
            .waiting_for(format!("VirtualMachineSnapshot {name} ready"))
            .wait_for(|| {
                let api = api.clone();
                async move {
                    let snap = api.get(name).await?;
                    let status = snap.status.clone().unwrap_or_default();
                    Ok(if status.ready_to_use {
                        Sample::Done(snap)
                    } else if status.phase.as_deref() == Some("Failed") {
                        Sample::Stop(
                            status
                                .error
                                .and_then(|e| e.message)
                                .unwrap_or_else(|| "Failed".to_string()),
                        )
                    } else {
                        Sample::observed(status.phase)
                    })
                }
            })
            .await
    }

    pub async fn create_restore(
        &self,
        name: &str,
        namespace: &str,
        vm_name: &str,
        snapshot_name: &str,
        cleanup: &mut CleanupStack,
    ) -> Result<VirtualMachineRestore> {
        let api = self.restores(namespace);
        let created = api
            .create(
                &PostParams::default(),
                &restore(name, namespace, vm_name, snapshot_name),
            )
            .await
            .with_context(|| format!("Failed to create VirtualMachineRestore {name}"))?;
        cleanup.delete_later(api, name);

        info!(
            "Created VirtualMachineRestore {}/{} from {}",
            namespace, name, snapshot_name
        );
        Ok(created)
    }

    pub async fn wait_restore_done(&self, name: &str, namespace: &str, timeout: Duration) -> Result<()> {
        let api = self.restores(namespace);

        TimeoutSampler::new(timeout, TIMEOUT_5SEC)
            .waiting_for(format!("VirtualMachineRestore {name} complete"))
            .wait_until(|| {
                let api = api.clone();
                async move {
                    let restore = api.get(name).await?;
                    Ok(restore.status.is_some_and(|s| s.complete))
                }
            })
            .await
    }

    /// Creating a snapshot must be rejected with 403 for this client
    pub async fn expect_snapshot_forbidden(
        &self,
        name: &str,
        namespace: &str,
        vm_name: &str,
    ) -> Result<()> {
        let api = self.snapshots(namespace);
        match api
            .create(&PostParams::default(), &snapshot(name, namespace, vm_name))
            .await
        {
            Err(kube::Error::Api(e))
                if e.code == 403 && e.message.contains(ERR_CANNOT_CREATE_VM_SNAPSHOTS) =>
            {
                info!("Snapshot creation denied: {}", e.message);
                Ok(())
            }
            Err(e) => Err(e).context("Unexpected error creating VirtualMachineSnapshot"),
            Ok(_) => {
                crate::k8s::cleanup::delete_and_wait(api, name.to_string()).await?;
                Err(StorageError::assertion(format!(
                    "VirtualMachineSnapshot {name} was created without permission"
                ))
                .into())
            }
        }
    }
}
