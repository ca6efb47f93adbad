//! DataVolume resource management
//!
//! Builder, CRUD and status waits for CDI DataVolumes.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{Api, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::core::ObjectMeta;
use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::info;

use crate::constants::{TIMEOUT_2MIN, TIMEOUT_5SEC};
use crate::k8s::pvc::{ANN_PROVISION_ON_NODE, PHASE_BOUND};
use crate::k8s::{CleanupStack, K8sClient, PvcManager};
use crate::utils::{Sample, TimeoutSampler};

pub const ANN_MULTUS_NETWORKS: &str = "k8s.v1.cni.cncf.io/networks";
pub const ANN_BIND_IMMEDIATE: &str = "cdi.kubevirt.io/storage.bind.immediate.requested";

/// DataVolume custom resource specification
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "cdi.kubevirt.io",
    version = "v1beta1",
    kind = "DataVolume",
    plural = "datavolumes",
    shortname = "dv",
    namespaced,
    status = "DataVolumeStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<DvSource>,

    /// Storage request; unset fields come from the StorageProfile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<DvStorage>,

    /// `kubevirt` (disk image) or `archive` (tar extracted onto the volume)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Where the DataVolume gets its data; exactly one is set
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DvSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistrySource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<EmptySource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub blank: Option<EmptySource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pvc: Option<PvcCloneSource>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpSource {
    pub url: String,

    /// Secret with `accessKeyId` / `secretKey` for basic auth
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,

    /// ConfigMap holding the server CA
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_config_map: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySource {
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_method: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_config_map: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct EmptySource {}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PvcCloneSource {
    pub name: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DvStorage {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_mode: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<DvResources>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct DvResources {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

/// DataVolume status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_count: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<DvCondition>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DvCondition {
    #[serde(rename = "type")]
    pub condition_type: String,

    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// DataVolume phases
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DvPhase {
    Pending,
    PvcBound,
    ImportScheduled,
    ImportInProgress,
    UploadScheduled,
    UploadReady,
    CloneScheduled,
    CloneInProgress,
    WaitForFirstConsumer,
    PendingPopulation,
    Succeeded,
    Failed,
    Unknown,
}

impl DvPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DvPhase::Pending => "Pending",
            DvPhase::PvcBound => "PVCBound",
            DvPhase::ImportScheduled => "ImportScheduled",
            DvPhase::ImportInProgress => "ImportInProgress",
            DvPhase::UploadScheduled => "UploadScheduled",
            DvPhase::UploadReady => "UploadReady",
            DvPhase::CloneScheduled => "CloneScheduled",
            DvPhase::CloneInProgress => "CloneInProgress",
            DvPhase::WaitForFirstConsumer => "WaitForFirstConsumer",
            DvPhase::PendingPopulation => "PendingPopulation",
            DvPhase::Succeeded => "Succeeded",
            DvPhase::Failed => "Failed",
            DvPhase::Unknown => "Unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "Pending" => DvPhase::Pending,
            "PVCBound" => DvPhase::PvcBound,
            "ImportScheduled" => DvPhase::ImportScheduled,
            "ImportInProgress" => DvPhase::ImportInProgress,
            "UploadScheduled" => DvPhase::UploadScheduled,
            "UploadReady" => DvPhase::UploadReady,
            "CloneScheduled" => DvPhase::CloneScheduled,
            "CloneInProgress" => DvPhase::CloneInProgress,
            "WaitForFirstConsumer" => DvPhase::WaitForFirstConsumer,
            "PendingPopulation" => DvPhase::PendingPopulation,
            "Succeeded" => DvPhase::Succeeded,
            "Failed" => DvPhase::Failed,
            _ => DvPhase::Unknown,
        }
    }
}

impl fmt::Display for DvPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ContentType {
    #[default]
    Kubevirt,
    Archive,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Kubevirt => "kubevirt",
            ContentType::Archive => "archive",
        }
    }
}

impl DataVolume {
    pub fn phase(&self) -> DvPhase {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map(DvPhase::parse)
            .unwrap_or(DvPhase::Unknown)
    }

    pub fn condition(&self, condition_type: &str) -> Option<&DvCondition> {
        self.status
            .as_ref()?
            .conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    pub fn volume_mode(&self) -> Option<&str> {
        self.spec.storage.as_ref()?.volume_mode.as_deref()
    }

    pub fn storage_class(&self) -> Option<&str> {
        self.spec.storage.as_ref()?.storage_class_name.as_deref()
    }
}

/// Name of the scratch PVC CDI creates next to `dv_name`
pub fn scratch_pvc_name(dv_name: &str) -> String {
    format!("{dv_name}-scratch")
}

/// DataVolume builder
#[derive(Clone, Debug)]
pub struct DataVolumeBuilder {
    name: String,
    namespace: String,
    source: DvSource,
    size: Option<String>,
    storage_class: Option<String>,
    access_modes: Vec<String>,
    volume_mode: Option<String>,
    content_type: Option<ContentType>,
    annotations: BTreeMap<String, String>,
}

impl DataVolumeBuilder {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            source: DvSource::default(),
            size: None,
            storage_class: None,
            access_modes: Vec::new(),
            volume_mode: None,
            content_type: None,
            annotations: BTreeMap::new(),
        }
    }

    pub fn http(mut self, url: impl Into<String>) -> Self {
        self.source = DvSource {
            http: Some(HttpSource {
                url: url.into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        self
    }

    /// CA ConfigMap for an http or registry source
    pub fn cert_configmap(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if let Some(http) = self.source.http.as_mut() {
            http.cert_config_map = Some(name);
        } else if let Some(registry) = self.source.registry.as_mut() {
            registry.cert_config_map = Some(name);
        }
        self
    }

    /// Basic-auth secret for an http source
    pub fn secret(mut self, name: impl Into<String>) -> Self {
        if let Some(http) = self.source.http.as_mut() {
            http.secret_ref = Some(name.into());
        }
        self
    }

    pub fn registry(mut self, url: impl Into<String>) -> Self {
        self.source = DvSource {
            registry: Some(RegistrySource {
                url: url.into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        self
    }

    pub fn upload(mut self) -> Self {
        self.source = DvSource {
            upload: Some(EmptySource {}),
            ..Default::default()
        };
        self
    }

    pub fn blank(mut self) -> Self {
        self.source = DvSource {
            blank: Some(EmptySource {}),
            ..Default::default()
        };
        self
    }

    /// Clone from an existing PVC
    pub fn clone_from(mut self, pvc_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.source = DvSource {
            pvc: Some(PvcCloneSource {
                name: pvc_name.into(),
                namespace: namespace.into(),
            }),
            ..Default::default()
        };
        self
    }

    pub fn size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn storage_class(mut self, storage_class: impl Into<String>) -> Self {
        self.storage_class = Some(storage_class.into());
        self
    }

    pub fn access_mode(mut self, mode: impl Into<String>) -> Self {
        self.access_modes = vec![mode.into()];
        self
    }

    pub fn volume_mode(mut self, mode: impl Into<String>) -> Self {
        self.volume_mode = Some(mode.into());
        self
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    /// Pin a hostpath volume to `node`
    pub fn provision_on_node(self, node: impl Into<String>) -> Self {
        self.annotation(ANN_PROVISION_ON_NODE, node)
    }

    /// Attach the importer pod to a secondary network
    pub fn multus_network(self, network: impl Into<String>) -> Self {
        self.annotation(ANN_MULTUS_NETWORKS, network)
    }

    /// Bind WaitForFirstConsumer storage without a consumer pod
    pub fn bind_immediately(self) -> Self {
        self.annotation(ANN_BIND_IMMEDIATE, "true")
    }

    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> DataVolume {
        let resources = self.size.map(|size| DvResources {
            requests: BTreeMap::from([("storage".to_string(), size)]),
        });

        let mut dv = DataVolume::new(
            &self.name,
            DataVolumeSpec {
                source: Some(self.source),
                storage: Some(DvStorage {
                    access_modes: self.access_modes,
                    volume_mode: self.volume_mode,
                    storage_class_name: self.storage_class,
                    resources,
                }),
                content_type: self.content_type.map(|c| c.as_str().to_string()),
            },
        );
        dv.metadata = ObjectMeta {
            name: Some(self.name),
            namespace: Some(self.namespace),
            annotations: (!self.annotations.is_empty()).then_some(self.annotations),
            ..Default::default()
        };
        dv
    }
}

/// DataVolume manager
pub struct DataVolumeManager {
    client: K8sClient,
}

impl DataVolumeManager {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<DataVolume> {
        self.client.api_in(namespace)
    }

    /// Create a DataVolume and register it for cleanup.
    ///
    /// Admission rejections (e.g. 422 for an empty URL) surface as errors.
    pub async fn create(&self, dv: &DataVolume, cleanup: &mut CleanupStack) -> Result<DataVolume> {
        let namespace = dv
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| self.client.namespace().to_string());
        let api = self.api(&namespace);

        let created = api
            .create(&PostParams::default(), dv)
            .await
            .context("Failed to create DataVolume")?;
        let name = created.metadata.name.clone().unwrap_or_default();
        cleanup.delete_later(api, name.clone());

        info!("Created DataVolume {}/{}", namespace, name);
        Ok(created)
    }

    pub async fn get(&self, name: &str, namespace: &str) -> Result<DataVolume> {
        self.api(namespace)
            .get(name)
            .await
            .with_context(|| format!("Failed to get DataVolume {namespace}/{name}"))
    }

    pub async fn delete(&self, name: &str, namespace: &str) -> Result<()> {
        crate::k8s::cleanup::delete_and_wait(self.api(namespace), name.to_string()).await?;
        info!("Deleted DataVolume {}/{}", namespace, name);
        Ok(())
    }

    /// Wait for `phase`; reaching `stop` first fails immediately
    pub async fn wait_for_status(
        &self,
        name: &str,
        namespace: &str,
        phase: DvPhase,
        timeout: Duration,
        stop: Option<DvPhase>,
    ) -> Result<DataVolume> {
        let api = self.api(namespace);

        TimeoutSampler::new(timeout, TIMEOUT_5SEC)
            .waiting_for(format!("DataVolume {name} phase {phase}"))
            .wait_for(|| {
                let api = api.clone();
                async move {
                    let dv = api.get(name).await?;
                    let current = dv.phase();
                    Ok(if current == phase {
                        Sample::Done(dv)
                    } else if Some(current) == stop {
                        Sample::Stop(current.to_string())
                    } else {
                        Sample::Pending(Some(current.to_string()))
                    })
                }
            })
            .await
    }

    /// Wait until condition `condition_type` has `status` (`True`/`False`)
    pub async fn wait_for_condition(
        &self,
        name: &str,
        namespace: &str,
        condition_type: &str,
        status: &str,
        timeout: Duration,
    ) -> Result<()> {
        let api = self.api(namespace);

        TimeoutSampler::new(timeout, TIMEOUT_5SEC)
            .waiting_for(format!("DataVolume {name} condition {condition_type}={status}"))
            .wait_for(|| {
                let api = api.clone();
                async move {
                    let dv = api.get(name).await?;
                    Ok(match dv.condition(condition_type) {
                        Some(c) if c.status == status => Sample::Done(()),
                        Some(c) => Sample::Pending(Some(format!(
                            "{} ({})",
                            c.status,
                            c.reason.clone().unwrap_or_default()
                        ))),
                        None => Sample::pending(),
                    })
                }
            })
            .await
    }

    /// Wait for `Succeeded` (stopping on `Failed`) and a bound PVC
    pub async fn wait_for_success(
        &self,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<DataVolume> {
        let dv = self
            .wait_for_status(name, namespace, DvPhase::Succeeded, timeout, Some(DvPhase::Failed))
            .await?;
        PvcManager::new(self.client.clone())
            .wait_for_status(name, namespace, PHASE_BOUND, TIMEOUT_2MIN, None)
            .await?;
        Ok(dv)
    }

    /// The PVC backing the DataVolume (same name)
    pub async fn pvc(&self, name: &str, namespace: &str) -> Result<PersistentVolumeClaim> {
        PvcManager::new(self.client.clone()).get(name, namespace).await
    }

    /// `apiVersion` the server reports for the stored object
    pub async fn api_version(&self, name: &str, namespace: &str) -> Result<String> {
        let resource = ApiResource::erase::<DataVolume>(&());
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.client().clone(), namespace, &resource);
        let obj = api
            .get(name)
            .await
            .with_context(|| format!("Failed to get DataVolume {namespace}/{name}"))?;
        Ok(obj
            .types
            .map(|t| t.api_version)
            .unwrap_or_else(|| DataVolume::api_version(&()).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::mock::MockService;
    use serde_json::json;

    fn dv_json(phase: &str) -> String {
        json!({
            "apiVersion": "cdi.kubevirt.io/v1beta1",
            "kind": "DataVolume",
            "metadata": {"name": "dv-1", "namespace": "ns"},
            "spec": {"source": {"http": {"url": "http://x/y.qcow2"}}},
            "status": {
                "phase": phase,
                "conditions": [
                    {"type": "Ready", "status": "False", "reason": "ImportInProgress"},
                    {"type": "Bound", "status": "True"}
                ]
            }
        })
        .to_string()
    }

    #[test]
    fn test_http_dv_builder() {
        let dv = DataVolumeBuilder::new("dv-http", "ns")
            .http("https://internal-http/cirros.qcow2")
            .cert_configmap("https-cert")
            .size("1Gi")
            .storage_class("ocs-storagecluster-ceph-rbd")
            .content_type(ContentType::Archive)
            .bind_immediately()
            .build();

        let value = serde_json::to_value(&dv).unwrap();
        assert_eq!(value["apiVersion"], "cdi.kubevirt.io/v1beta1");
        assert_eq!(value["spec"]["source"]["http"]["certConfigMap"], "https-cert");
        assert_eq!(value["spec"]["storage"]["resources"]["requests"]["storage"], "1Gi");
        assert_eq!(value["spec"]["contentType"], "archive");
        assert_eq!(
            value["metadata"]["annotations"][ANN_BIND_IMMEDIATE],
            "true"
        );
        assert!(value["spec"]["storage"].get("accessModes").is_none());
    }

    #[test]
    fn test_source_kinds_are_exclusive() {
        let dv = DataVolumeBuilder::new("dv", "ns")
            .http("http://x")
            .clone_from("src", "src-ns")
            .build();
        let source = dv.spec.source.unwrap();
        assert!(source.http.is_none());
        assert_eq!(source.pvc.unwrap().namespace, "src-ns");

        let blank = DataVolumeBuilder::new("dv", "ns").blank().build();
        let value = serde_json::to_value(&blank).unwrap();
        assert_eq!(value["spec"]["source"], json!({"blank": {}}));
    }

    #[test]
    fn test_phase_parsing() {
        assert_eq!(DvPhase::parse("PVCBound"), DvPhase::PvcBound);
        assert_eq!(DvPhase::parse("Paused"), DvPhase::Unknown);
        assert_eq!(DvPhase::WaitForFirstConsumer.to_string(), "WaitForFirstConsumer");
        assert_eq!(scratch_pvc_name("dv-1"), "dv-1-scratch");
    }

    #[tokio::test]
    async fn test_wait_for_status_and_condition() {
        let client = MockService::new()
            .on_get(
                "/apis/cdi.kubevirt.io/v1beta1/namespaces/ns/datavolumes/dv-1",
                200,
                &dv_json("ImportInProgress"),
            )
            .into_k8s("ns");
        let dvs = DataVolumeManager::new(client);

        let dv = dvs
            .wait_for_status(
                "dv-1",
                "ns",
                DvPhase::ImportInProgress,
                Duration::from_secs(10),
                Some(DvPhase::Succeeded),
            )
            .await
            .unwrap();
        assert_eq!(dv.condition("Bound").unwrap().status, "True");

        dvs.wait_for_condition("dv-1", "ns", "Ready", "False", Duration::from_secs(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_stops_on_succeeded() {
        let client = MockService::new()
            .on_get(
                "/apis/cdi.kubevirt.io/v1beta1/namespaces/ns/datavolumes/dv-1",
                200,
                &dv_json("Succeeded"),
            )
            .into_k8s("ns");

        let err = DataVolumeManager::new(client)
            .wait_for_status(
                "dv-1",
                "ns",
                DvPhase::ImportInProgress,
                Duration::from_secs(10),
                Some(DvPhase::Succeeded),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::StorageError>(),
            Some(crate::error::StorageError::StopStatus { .. })
        ));
    }

    #[tokio::test]
    async fn test_api_version() {
        let client = MockService::new()
            .on_get(
                "/apis/cdi.kubevirt.io/v1beta1/namespaces/ns/datavolumes/dv-1",
                200,
                &dv_json("Succeeded"),
            )
            .into_k8s("ns");

        let version = DataVolumeManager::new(client)
            .api_version("dv-1", "ns")
            .await
            .unwrap();
        assert_eq!(version, "cdi.kubevirt.io/v1beta1");
    }
}
