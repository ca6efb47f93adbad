//! KubeVirt subresource calls: memory dump and volume hotplug
//!
//! These are plain PUTs on `subresources.kubevirt.io`, which kube's typed
//! API does not model, so they are sent as raw requests.

use anyhow::{Context, Result};
use kube::api::Api;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use super::vm::{DataVolumeSource, Disk, DiskTarget, PvcSource, VirtualMachine};
use crate::constants::{TIMEOUT_2MIN, TIMEOUT_3MIN, TIMEOUT_5SEC};
use crate::k8s::K8sClient;
use crate::utils::{Sample, TimeoutSampler};

const SUBRESOURCES: &str = "/apis/subresources.kubevirt.io/v1";
pub const MEMORY_DUMP_COMPLETED: &str = "Completed";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// Persisted in the VM spec
    VirtualMachine,
    /// Ephemeral, gone after the VMI restarts
    Instance,
}

impl Target {
    fn plural(&self) -> &'static str {
        match self {
            Target::VirtualMachine => "virtualmachines",
            Target::Instance => "virtualmachineinstances",
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MemoryDumpOptions<'a> {
    claim_name: &'a str,
    create_claim: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddVolumeOptions {
    name: String,
    disk: Disk,
    volume_source: HotplugVolumeSource,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HotplugVolumeSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    data_volume: Option<DataVolumeSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    persistent_volume_claim: Option<PvcSource>,
}

#[derive(Serialize)]
struct RemoveVolumeOptions<'a> {
    name: &'a str,
}

/// Volume to hotplug into a running VM
#[derive(Clone, Debug)]
pub struct Hotplug {
    pub volume: String,
    pub target: Target,
    pub serial: Option<String>,
    pub bus: String,
    /// Source is a DataVolume rather than a bare PVC
    pub data_volume: bool,
}

impl Hotplug {
    pub fn data_volume(volume: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            target: Target::VirtualMachine,
            serial: None,
            bus: "scsi".to_string(),
            data_volume: true,
        }
    }

    pub fn ephemeral(mut self) -> Self {
        self.target = Target::Instance;
        self
    }

    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    fn options(&self) -> AddVolumeOptions {
        let source = if self.data_volume {
            HotplugVolumeSource {
                data_volume: Some(DataVolumeSource {
                    name: self.volume.clone(),
                    hotpluggable: Some(true),
                }),
                persistent_volume_claim: None,
            }
        } else {
            HotplugVolumeSource {
                data_volume: None,
                persistent_volume_claim: Some(PvcSource {
                    claim_name: self.volume.clone(),
                    hotpluggable: Some(true),
                }),
            }
        };

        AddVolumeOptions {
            name: self.volume.clone(),
            disk: Disk {
                name: self.volume.clone(),
                disk: Some(DiskTarget {
                    bus: Some(self.bus.clone()),
                }),
                serial: self.serial.clone(),
                boot_order: None,
            },
            volume_source: source,
        }
    }
}

pub struct SubresourceManager {
    client: K8sClient,
}

impl SubresourceManager {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }

    fn url(target: Target, namespace: &str, name: &str, action: &str) -> String {
        format!(
            "{SUBRESOURCES}/namespaces/{namespace}/{}/{name}/{action}",
            target.plural()
        )
    }

    async fn put(&self, url: String, body: Vec<u8>) -> Result<()> {
        let request = http::Request::put(&url)
            .header("Content-Type", "application/json")
            .body(body)
            .with_context(|| format!("Failed to build request for {url}"))?;
        self.client
            .client()
            .request_text(request)
            .await
            .with_context(|| format!("PUT {url} failed"))?;
        Ok(())
    }

    /// Dump the VM's memory into an existing PVC
    pub async fn memory_dump(&self, vm: &str, namespace: &str, claim_name: &str) -> Result<()> {
        let body = serde_json::to_vec(&MemoryDumpOptions {
            claim_name,
            create_claim: false,
        })?;
        self.put(Self::url(Target::VirtualMachine, namespace, vm, "memorydump"), body)
            .await?;
        info!("Requested memory dump of {}/{} into {}", namespace, vm, claim_name);
        Ok(())
    }

    pub async fn remove_memory_dump(&self, vm: &str, namespace: &str) -> Result<()> {
        self.put(
            Self::url(Target::VirtualMachine, namespace, vm, "removememorydump"),
            Vec::new(),
        )
        .await?;
        info!("Requested memory dump removal for {}/{}", namespace, vm);
        Ok(())
    }

    pub async fn wait_memory_dump_completed(&self, vm: &str, namespace: &str) -> Result<()> {
        let api: Api<VirtualMachine> = self.client.api_in(namespace);

        TimeoutSampler::new(TIMEOUT_3MIN, TIMEOUT_5SEC)
            .waiting_for(format!("VM {vm} memory dump completed"))
            .wait_for(|| {
                let api = api.clone();
                async move {
                    let vm = api.get(vm).await?;
                    let phase = vm.memory_dump_request().and_then(|r| r.phase.clone());
                    Ok(match phase.as_deref() {
                        Some(MEMORY_DUMP_COMPLETED) => Sample::Done(()),
                        Some("Failed") => Sample::Stop("memory dump Failed".to_string()),
                        _ => Sample::observed(phase),
                    })
                }
            })
            .await
    }

    /// Wait until `status.memoryDumpRequest` is gone
    pub async fn wait_memory_dump_removed(&self, vm: &str, namespace: &str) -> Result<()> {
        let api: Api<VirtualMachine> = self.client.api_in(namespace);

        TimeoutSampler::new(TIMEOUT_2MIN, TIMEOUT_5SEC)
            .waiting_for(format!("VM {vm} memory dump request removed"))
            .wait_until(|| {
                let api = api.clone();
                async move {
                    let vm = api.get(vm).await?;
                    Ok(vm.memory_dump_request().is_none())
                }
            })
            .await
    }

    pub async fn add_volume(&self, vm: &str, namespace: &str, hotplug: &Hotplug) -> Result<()> {
        let body = serde_json::to_vec(&hotplug.options())?;
        self.put(Self::url(hotplug.target, namespace, vm, "addvolume"), body)
            .await?;
        info!("Hotplugged {} into {}/{}", hotplug.volume, namespace, vm);
        Ok(())
    }

    pub async fn remove_volume(
        &self,
        vm: &str,
        namespace: &str,
        volume: &str,
        target: Target,
    ) -> Result<()> {
        let body = serde_json::to_vec(&RemoveVolumeOptions { name: volume })?;
        self.put(Self::url(target, namespace, vm, "removevolume"), body)
            .await?;
        info!("Removed volume {} from {}/{}", volume, namespace, vm);
        Ok(())
    }

    /// A persisted hotplug shows up in the VM template volumes
    pub async fn wait_volume_persisted(
        &self,
        vm: &str,
        namespace: &str,
        volume: &str,
        timeout: Duration,
    ) -> Result<()> {
        let api: Api<VirtualMachine> = self.client.api_in(namespace);

        TimeoutSampler::new(timeout, TIMEOUT_5SEC)
            .waiting_for(format!("volume {volume} in VM {vm} spec"))
            .wait_until(|| {
                let api = api.clone();
                async move {
                    let vm = api.get(vm).await?;
                    Ok(vm.volume_names().contains(&volume))
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::HOTPLUG_DISK_SERIAL;
    use crate::k8s::mock::MockService;

    #[test]
    fn test_add_volume_body() {
        let hotplug = Hotplug::data_volume("blank-dv").serial(HOTPLUG_DISK_SERIAL);
        let value = serde_json::to_value(hotplug.options()).unwrap();

        assert_eq!(value["name"], "blank-dv");
        assert_eq!(value["disk"]["disk"]["bus"], "scsi");
        assert_eq!(value["disk"]["serial"], HOTPLUG_DISK_SERIAL);
        assert_eq!(value["volumeSource"]["dataVolume"]["name"], "blank-dv");
        assert_eq!(value["volumeSource"]["dataVolume"]["hotpluggable"], true);
        assert!(value["volumeSource"].get("persistentVolumeClaim").is_none());
    }

    #[test]
    fn test_subresource_urls() {
        assert_eq!(
            SubresourceManager::url(Target::VirtualMachine, "ns", "vm-1", "memorydump"),
            "/apis/subresources.kubevirt.io/v1/namespaces/ns/virtualmachines/vm-1/memorydump"
        );
        assert_eq!(
            SubresourceManager::url(Target::Instance, "ns", "vm-1", "addvolume"),
            "/apis/subresources.kubevirt.io/v1/namespaces/ns/virtualmachineinstances/vm-1/addvolume"
        );
    }

    #[tokio::test]
    async fn test_memory_dump_request() {
        let mock = MockService::new().on_put(
            "/apis/subresources.kubevirt.io/v1/namespaces/ns/virtualmachines/vm-1/memorydump",
            202,
            "",
        );
        let recorded = mock.recorder();
        let subresources = SubresourceManager::new(mock.into_k8s("ns"));

        subresources.memory_dump("vm-1", "ns", "dump-pvc").await.unwrap();

        let requests = recorded.lock().unwrap();
        assert_eq!(requests[0].method, "PUT");
        assert_eq!(requests[0].json()["claimName"], "dump-pvc");
        assert_eq!(requests[0].json()["createClaim"], false);
    }

    #[tokio::test]
    async fn test_ephemeral_hotplug_targets_instance() {
        let mock = MockService::new().on_put(
            "/apis/subresources.kubevirt.io/v1/namespaces/ns/virtualmachineinstances/vm-1/addvolume",
            202,
            "",
        );
        let recorded = mock.recorder();
        let subresources = SubresourceManager::new(mock.into_k8s("ns"));

        subresources
            .add_volume("vm-1", "ns", &Hotplug::data_volume("blank-dv").ephemeral())
            .await
            .unwrap();

        assert!(recorded.lock().unwrap()[0]
            .path
            .ends_with("virtualmachineinstances/vm-1/addvolume"));
    }
}
