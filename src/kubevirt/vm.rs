//! VirtualMachine resource management
//!
//! VM builders for disks backed by DataVolumes, run strategy changes and
//! readiness waits.

use anyhow::{Context, Result};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

use crate::cdi::datavolume::{DataVolume, DataVolumeSpec};
use crate::constants::{images, TIMEOUT_5SEC};
use crate::k8s::{CleanupStack, K8sClient};
use crate::utils::{Sample, TimeoutSampler};

/// Name of the disk/volume holding the VM's DataVolume. The launcher
/// exposes it under `/var/run/kubevirt-private/vmi-disks/<name>`.
pub const DV_DISK: &str = "dv-disk";
const CONTAINER_DISK: &str = "containerdisk";

pub const RUN_STRATEGY_ALWAYS: &str = "Always";
pub const RUN_STRATEGY_HALTED: &str = "Halted";

pub const STATUS_STOPPED: &str = "Stopped";
const FAILURE_STATUSES: &[&str] = &[
    "ErrorUnschedulable",
    "ErrorPvcNotFound",
    "ErrorDataVolumeNotFound",
    "DataVolumeError",
    "CrashLoopBackOff",
];

/// VirtualMachine custom resource specification
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachine",
    plural = "virtualmachines",
    shortname = "vm",
    namespaced,
    status = "VirtualMachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// `Always`, `Halted`, `Manual`, `RerunOnFailure`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_strategy: Option<String>,

    /// DataVolumes created and owned by the VM
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_volume_templates: Vec<DataVolumeTemplate>,

    pub template: VmiTemplate,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeTemplate {
    pub metadata: TemplateMetadata,
    pub spec: DataVolumeSpec,
}

impl DataVolumeTemplate {
    /// Template with the DataVolume's name, annotations and spec
    pub fn from_dv(dv: &DataVolume) -> Self {
        Self {
            metadata: TemplateMetadata {
                name: dv.metadata.name.clone(),
                annotations: dv.metadata.annotations.clone().unwrap_or_default(),
                ..Default::default()
            },
            spec: dv.spec.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmiTemplate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TemplateMetadata>,

    pub spec: VmiTemplateSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmiTemplateSpec {
    pub domain: DomainSpec,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<Network>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesSpec>,

    pub devices: DevicesSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CpuSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DevicesSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rng: Option<RngDevice>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct RngDevice {}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    /// Must match a volume name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskTarget>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_order: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskTarget {
    /// virtio, sata or scsi
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub masquerade: Option<MasqueradeMode>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct MasqueradeMode {}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<PodNetwork>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct PodNetwork {}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_disk: Option<ContainerDiskSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PvcSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_volume: Option<DataVolumeSource>,

    /// Target of a memory dump
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_dump: Option<PvcSource>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDiskSource {
    pub image: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PvcSource {
    pub claim_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hotpluggable: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeSource {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hotpluggable: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    #[serde(default)]
    pub created: bool,

    #[serde(default)]
    pub ready: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub printable_status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_dump_request: Option<MemoryDumpRequest>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_snapshot_statuses: Vec<VolumeSnapshotStatus>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemoryDumpRequest {
    pub claim_name: String,

    /// InProgress, Completed, Unmounting, Dissociating, Failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    pub name: String,

    #[serde(default)]
    pub enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VirtualMachine {
    pub fn printable_status(&self) -> Option<&str> {
        self.status.as_ref()?.printable_status.as_deref()
    }

    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    pub fn memory_dump_request(&self) -> Option<&MemoryDumpRequest> {
        self.status.as_ref()?.memory_dump_request.as_ref()
    }

    /// Names of the volumes declared in the VMI template
    pub fn volume_names(&self) -> Vec<&str> {
        self.spec
            .template
            .spec
            .volumes
            .iter()
            .map(|v| v.name.as_str())
            .collect()
    }
}

/// What the VM boots from
#[derive(Clone, Debug)]
enum BootSource {
    DataVolume(String),
    DataVolumeTemplate(Box<DataVolumeTemplate>),
    ContainerDisk(String),
}

/// Builder for test VMs with a single boot disk
#[derive(Clone, Debug)]
pub struct VmBuilder {
    name: String,
    namespace: String,
    memory: String,
    cpu_model: Option<String>,
    run_strategy: String,
    node: Option<String>,
    annotations: BTreeMap<String, String>,
    source: BootSource,
}

impl VmBuilder {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            memory: images::cirros::DEFAULT_MEMORY_SIZE.to_string(),
            cpu_model: None,
            run_strategy: RUN_STRATEGY_ALWAYS.to_string(),
            node: None,
            annotations: BTreeMap::new(),
            source: BootSource::ContainerDisk(format!(
                "quay.io/kubevirt/{}",
                images::cirros::DISK_DEMO
            )),
        }
    }

    /// Boot from an existing DataVolume
    pub fn from_dv(dv: &DataVolume) -> Self {
        let name = dv.metadata.name.clone().unwrap_or_default();
        let namespace = dv.metadata.namespace.clone().unwrap_or_default();
        Self::new(format!("vm-{name}"), namespace).data_volume(name)
    }

    pub fn data_volume(mut self, dv_name: impl Into<String>) -> Self {
        self.source = BootSource::DataVolume(dv_name.into());
        self
    }

    /// Boot from a DataVolume the VM creates and owns
    pub fn data_volume_template(mut self, dv: &DataVolume) -> Self {
        self.source = BootSource::DataVolumeTemplate(Box::new(DataVolumeTemplate::from_dv(dv)));
        self
    }

    pub fn container_disk(mut self, image: impl Into<String>) -> Self {
        self.source = BootSource::ContainerDisk(image.into());
        self
    }

    pub fn memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = memory.into();
        self
    }

    pub fn cpu_model(mut self, model: impl Into<String>) -> Self {
        self.cpu_model = Some(model.into());
        self
    }

    pub fn run_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.run_strategy = strategy.into();
        self
    }

    /// Pin the VM to a node through `kubernetes.io/hostname`
    pub fn on_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VirtualMachine {
        let mut templates = Vec::new();
        let volume = match self.source {
            BootSource::DataVolume(name) => Volume {
                name: DV_DISK.to_string(),
                data_volume: Some(DataVolumeSource {
                    name,
                    hotpluggable: None,
                }),
                ..Default::default()
            },
            BootSource::DataVolumeTemplate(template) => {
                let name = template.metadata.name.clone().unwrap_or_default();
                templates.push(*template);
                Volume {
                    name: DV_DISK.to_string(),
                    data_volume: Some(DataVolumeSource {
                        name,
                        hotpluggable: None,
                    }),
                    ..Default::default()
                }
            }
            BootSource::ContainerDisk(image) => Volume {
                name: CONTAINER_DISK.to_string(),
                container_disk: Some(ContainerDiskSource { image }),
                ..Default::default()
            },
        };

        let disk = Disk {
            name: volume.name.clone(),
            disk: Some(DiskTarget {
                bus: Some("virtio".to_string()),
            }),
            boot_order: Some(1),
            ..Default::default()
        };

        let node_selector = self
            .node
            .map(|node| BTreeMap::from([("kubernetes.io/hostname".to_string(), node)]))
            .unwrap_or_default();

        VirtualMachine {
            metadata: kube::api::ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace),
                annotations: if self.annotations.is_empty() {
                    None
                } else {
                    Some(self.annotations)
                },
                ..Default::default()
            },
            spec: VirtualMachineSpec {
                run_strategy: Some(self.run_strategy),
                data_volume_templates: templates,
                template: VmiTemplate {
                    metadata: Some(TemplateMetadata {
                        labels: BTreeMap::from([(
                            "kubevirt.io/domain".to_string(),
                            self.name,
                        )]),
                        ..Default::default()
                    }),
                    spec: VmiTemplateSpec {
                        domain: DomainSpec {
                            cpu: self.cpu_model.map(|model| CpuSpec {
                                cores: None,
                                model: Some(model),
                            }),
                            resources: Some(ResourcesSpec {
                                requests: BTreeMap::from([(
                                    "memory".to_string(),
                                    self.memory,
                                )]),
                            }),
                            devices: DevicesSpec {
                                disks: vec![disk],
                                interfaces: vec![Interface {
                                    name: "default".to_string(),
                                    masquerade: Some(MasqueradeMode {}),
                                }],
                                rng: Some(RngDevice {}),
                            },
                        },
                        networks: vec![Network {
                            name: "default".to_string(),
                            pod: Some(PodNetwork {}),
                        }],
                        volumes: vec![volume],
                        node_selector,
                        termination_grace_period_seconds: Some(30),
                    },
                },
            },
            status: None,
        }
    }
}

/// VirtualMachine manager
pub struct VirtualMachineManager {
    client: K8sClient,
}

impl VirtualMachineManager {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<VirtualMachine> {
        self.client.api_in(namespace)
    }

    /// Create a VirtualMachine and register it for cleanup
    pub async fn create(
        &self,
        vm: &VirtualMachine,
        cleanup: &mut CleanupStack,
    ) -> Result<VirtualMachine> {
        let namespace = vm
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| self.client.namespace().to_string());
        let api = self.api(&namespace);

        let created = api
            .create(&PostParams::default(), vm)
            .await
            .context("Failed to create VirtualMachine")?;
        let name = created.metadata.name.clone().unwrap_or_default();
        cleanup.delete_later(api, name.clone());

        info!("Created VirtualMachine {}/{}", namespace, name);
        Ok(created)
    }

    pub async fn get(&self, name: &str, namespace: &str) -> Result<VirtualMachine> {
        self.api(namespace)
            .get(name)
            .await
            .with_context(|| format!("Failed to get VirtualMachine {namespace}/{name}"))
    }

    pub async fn set_run_strategy(&self, name: &str, namespace: &str, strategy: &str) -> Result<()> {
        let patch = serde_json::json!({
            "spec": {
                "runStrategy": strategy
            }
        });
        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("Failed to set runStrategy {strategy} on {name}"))?;
        info!("VirtualMachine {}/{} runStrategy {}", namespace, name, strategy);
        Ok(())
    }

    pub async fn start(&self, name: &str, namespace: &str) -> Result<()> {
        self.set_run_strategy(name, namespace, RUN_STRATEGY_ALWAYS).await
    }

    pub async fn stop(&self, name: &str, namespace: &str) -> Result<()> {
        self.set_run_strategy(name, namespace, RUN_STRATEGY_HALTED).await
    }

    /// Wait for `status.ready`; error printable statuses end the wait
    pub async fn wait_ready(
        &self,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<VirtualMachine> {
        let api = self.api(namespace);

        TimeoutSampler::new(timeout, TIMEOUT_5SEC)
            .waiting_for(format!("VirtualMachine {name} ready"))
            .wait_for(|| {
                let api = api.clone();
                async move {
                    let vm = api.get(name).await?;
                    let status = vm.printable_status().unwrap_or_default().to_string();
                    Ok(if vm.is_ready() {
                        Sample::Done(vm)
                    } else if FAILURE_STATUSES.contains(&status.as_str()) {
                        Sample::Stop(status)
                    } else {
                        Sample::Pending(Some(status))
                    })
                }
            })
            .await
    }

    /// Wait for printable status `Stopped`
    pub async fn wait_stopped(&self, name: &str, namespace: &str, timeout: Duration) -> Result<()> {
        let api = self.api(namespace);

        TimeoutSampler::new(timeout, TIMEOUT_5SEC)
            .waiting_for(format!("VirtualMachine {name} stopped"))
            .wait_for(|| {
                let api = api.clone();
                async move {
                    let vm = api.get(name).await?;
                    Ok(match vm.printable_status() {
                        Some(STATUS_STOPPED) => Sample::Done(()),
                        other => Sample::observed(other),
                    })
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdi::DataVolumeBuilder;
    use crate::k8s::mock::MockService;
    use serde_json::json;

    fn cirros_dv() -> DataVolume {
        DataVolumeBuilder::new("dv-cirros", "storage-ns")
            .http("http://server/cirros.qcow2")
            .size("1Gi")
            .storage_class("hostpath-csi-basic")
            .build()
    }

    #[test]
    fn test_vm_from_existing_dv() {
        let vm = VmBuilder::from_dv(&cirros_dv()).build();

        assert_eq!(vm.metadata.name.as_deref(), Some("vm-dv-cirros"));
        assert_eq!(vm.metadata.namespace.as_deref(), Some("storage-ns"));
        assert_eq!(vm.spec.run_strategy.as_deref(), Some(RUN_STRATEGY_ALWAYS));
        assert!(vm.spec.data_volume_templates.is_empty());

        let volume = &vm.spec.template.spec.volumes[0];
        assert_eq!(volume.name, DV_DISK);
        assert_eq!(volume.data_volume.as_ref().unwrap().name, "dv-cirros");
        assert_eq!(vm.spec.template.spec.domain.devices.disks[0].name, DV_DISK);
    }

    #[test]
    fn test_vm_with_dv_template() {
        let vm = VmBuilder::new("vm-cirros", "storage-ns")
            .data_volume_template(&cirros_dv())
            .on_node("worker-1")
            .cpu_model("Haswell")
            .build();

        let template = &vm.spec.data_volume_templates[0];
        assert_eq!(template.metadata.name.as_deref(), Some("dv-cirros"));
        assert!(template.spec.source.as_ref().unwrap().http.is_some());
        assert_eq!(
            vm.spec.template.spec.node_selector.get("kubernetes.io/hostname"),
            Some(&"worker-1".to_string())
        );

        let value = serde_json::to_value(&vm).unwrap();
        assert_eq!(value["spec"]["dataVolumeTemplates"][0]["metadata"]["name"], "dv-cirros");
        assert_eq!(value["spec"]["template"]["spec"]["domain"]["cpu"]["model"], "Haswell");
        assert_eq!(
            value["spec"]["template"]["spec"]["domain"]["resources"]["requests"]["memory"],
            "128Mi"
        );
    }

    #[test]
    fn test_memory_dump_request_from_status() {
        let vm: VirtualMachine = serde_json::from_value(json!({
            "apiVersion": "kubevirt.io/v1",
            "kind": "VirtualMachine",
            "metadata": {"name": "vm-1", "namespace": "ns"},
            "spec": {"template": {"spec": {"domain": {"devices": {}}}}},
            "status": {
                "ready": true,
                "printableStatus": "Running",
                "memoryDumpRequest": {"claimName": "dump-pvc", "phase": "Completed"}
            }
        }))
        .unwrap();

        assert!(vm.is_ready());
        let request = vm.memory_dump_request().unwrap();
        assert_eq!(request.claim_name, "dump-pvc");
        assert_eq!(request.phase.as_deref(), Some("Completed"));
    }

    #[tokio::test]
    async fn test_stop_patches_run_strategy() {
        let mock = MockService::new().on_patch(
            "/apis/kubevirt.io/v1/namespaces/ns/virtualmachines/vm-1",
            200,
            &json!({
                "apiVersion": "kubevirt.io/v1",
                "kind": "VirtualMachine",
                "metadata": {"name": "vm-1", "namespace": "ns"},
                "spec": {"runStrategy": "Halted", "template": {"spec": {"domain": {"devices": {}}}}}
            })
            .to_string(),
        );
        let recorded = mock.recorder();
        let vms = VirtualMachineManager::new(mock.into_k8s("ns"));

        vms.stop("vm-1", "ns").await.unwrap();

        let requests = recorded.lock().unwrap();
        assert_eq!(requests[0].method, "PATCH");
        assert_eq!(requests[0].json()["spec"]["runStrategy"], RUN_STRATEGY_HALTED);
    }

    #[tokio::test]
    async fn test_wait_ready_stops_on_error_status() {
        let client = MockService::new()
            .on_get(
                "/apis/kubevirt.io/v1/namespaces/ns/virtualmachines/vm-1",
                200,
                &json!({
                    "apiVersion": "kubevirt.io/v1",
                    "kind": "VirtualMachine",
                    "metadata": {"name": "vm-1", "namespace": "ns"},
                    "spec": {"template": {"spec": {"domain": {"devices": {}}}}},
                    "status": {"printableStatus": "ErrorUnschedulable"}
                })
                .to_string(),
            )
            .into_k8s("ns");

        let err = VirtualMachineManager::new(client)
            .wait_ready("vm-1", "ns", Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ErrorUnschedulable"));
    }
}
