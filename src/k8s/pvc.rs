//! PersistentVolumeClaim helpers

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{
    PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::core::ObjectMeta;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

use super::{CleanupStack, K8sClient};
use crate::constants::TIMEOUT_1SEC;
use crate::utils::{Sample, TimeoutSampler};

pub const ANN_PROVISION_ON_NODE: &str = "kubevirt.io/provisionOnNode";
pub const ANN_SELECTED_NODE: &str = "volume.kubernetes.io/selected-node";
pub const ANN_USE_POPULATOR: &str = "cdi.kubevirt.io/storage.usePopulator";
pub const ANN_CLONE_TYPE: &str = "cdi.kubevirt.io/cloneType";

pub const PHASE_PENDING: &str = "Pending";
pub const PHASE_BOUND: &str = "Bound";

/// Builder for a bare PVC
#[derive(Clone, Debug)]
pub struct PvcBuilder {
    name: String,
    namespace: String,
    size: String,
    storage_class: Option<String>,
    access_modes: Vec<String>,
    volume_mode: Option<String>,
    annotations: BTreeMap<String, String>,
}

impl PvcBuilder {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            size: "1Gi".to_string(),
            storage_class: None,
            access_modes: vec!["ReadWriteOnce".to_string()],
            volume_mode: None,
            annotations: BTreeMap::new(),
        }
    }

    pub fn size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
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

    /// Pin a hostpath volume to `node`
    pub fn provision_on_node(mut self, node: impl Into<String>) -> Self {
        self.annotations
            .insert(ANN_PROVISION_ON_NODE.to_string(), node.into());
        self
    }

    pub fn build(self) -> PersistentVolumeClaim {
        let requests = BTreeMap::from([("storage".to_string(), Quantity(self.size))]);

        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                annotations: (!self.annotations.is_empty()).then_some(self.annotations),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(self.access_modes),
                storage_class_name: self.storage_class,
                volume_mode: self.volume_mode,
                resources: Some(ResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// PVC operations
pub struct PvcManager {
    client: K8sClient,
}

impl PvcManager {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        self.client.api_in(namespace)
    }

    pub async fn create(
        &self,
        pvc: &PersistentVolumeClaim,
        cleanup: &mut CleanupStack,
    ) -> Result<PersistentVolumeClaim> {
        let namespace = pvc
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| self.client.namespace().to_string());
        let api = self.api(&namespace);

        let created = api
            .create(&PostParams::default(), pvc)
            .await
            .context("Failed to create PVC")?;
        let name = created.metadata.name.clone().unwrap_or_default();
        cleanup.delete_later(api, name.clone());

        info!("Created PVC {}/{}", namespace, name);
        Ok(created)
    }

    pub async fn get(&self, name: &str, namespace: &str) -> Result<PersistentVolumeClaim> {
        self.api(namespace)
            .get(name)
            .await
            .with_context(|| format!("Failed to get PVC {namespace}/{name}"))
    }

    pub async fn get_opt(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<PersistentVolumeClaim>> {
        self.api(namespace)
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get PVC {namespace}/{name}"))
    }

    /// Wait for the PVC phase; `stop` ends the wait early as a failure
    pub async fn wait_for_status(
        &self,
        name: &str,
        namespace: &str,
        phase: &str,
        timeout: Duration,
        stop: Option<&str>,
    ) -> Result<PersistentVolumeClaim> {
        let api = self.api(namespace);

        TimeoutSampler::new(timeout, Duration::from_secs(2))
            .waiting_for(format!("PVC {name} phase {phase}"))
            .wait_for(|| {
                let api = api.clone();
                async move {
                    let Some(pvc) = api.get_opt(name).await? else {
                        return Ok(Sample::observed("absent"));
                    };
                    let current = pvc_phase(&pvc).unwrap_or_default();
                    Ok(if current == phase {
                        Sample::Done(pvc)
                    } else if stop == Some(current.as_str()) {
                        Sample::Stop(current)
                    } else {
                        Sample::Pending(Some(current))
                    })
                }
            })
            .await
    }

    /// Issue a delete without waiting; CDI may re-create the claim at once
    pub async fn delete(&self, name: &str, namespace: &str) -> Result<()> {
        self.api(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .with_context(|| format!("Failed to delete PVC {namespace}/{name}"))?;
        info!("Deleted PVC {}/{}", namespace, name);
        Ok(())
    }

    /// First claim whose name ends with `suffix`, e.g. a scratch PVC
    pub async fn find_by_suffix(
        &self,
        namespace: &str,
        suffix: &str,
    ) -> Result<Option<PersistentVolumeClaim>> {
        let list = self
            .api(namespace)
            .list(&ListParams::default())
            .await
            .context("Failed to list PVCs")?;
        Ok(list.items.into_iter().find(|pvc| {
            pvc.metadata
                .name
                .as_deref()
                .is_some_and(|n| n.ends_with(suffix))
        }))
    }

    /// Wait until the PVC is re-created, seen as a newer creation timestamp
    pub async fn wait_for_recreate(
        &self,
        name: &str,
        namespace: &str,
        previous: &Time,
        timeout: Duration,
    ) -> Result<()> {
        let api = self.api(namespace);

        TimeoutSampler::new(timeout, TIMEOUT_1SEC)
            .waiting_for(format!("PVC {name} to be re-created"))
            .wait_until(|| {
                let api = api.clone();
                async move {
                    let pvc = api.get_opt(name).await?;
                    Ok(pvc
                        .as_ref()
                        .and_then(creation_timestamp)
                        .map(|ts| ts.0 > previous.0)
                        .unwrap_or(false))
                }
            })
            .await
    }

    /// Node a local PV is pinned to by its node affinity
    pub async fn bound_pv_node(&self, pvc: &PersistentVolumeClaim) -> Result<Option<String>> {
        let Some(volume) = pvc.spec.as_ref().and_then(|s| s.volume_name.clone()) else {
            return Ok(None);
        };
        let pvs: Api<PersistentVolume> = self.client.cluster_api();
        let pv = pvs
            .get(&volume)
            .await
            .with_context(|| format!("Failed to get PV {volume}"))?;
        Ok(pv_affinity_node(&pv))
    }
}

fn annotation(pvc: &PersistentVolumeClaim, key: &str) -> Option<String> {
    pvc.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .cloned()
}

pub fn pvc_phase(pvc: &PersistentVolumeClaim) -> Option<String> {
    pvc.status.as_ref().and_then(|s| s.phase.clone())
}

pub fn selected_node(pvc: &PersistentVolumeClaim) -> Option<String> {
    annotation(pvc, ANN_SELECTED_NODE)
}

pub fn provision_on_node(pvc: &PersistentVolumeClaim) -> Option<String> {
    annotation(pvc, ANN_PROVISION_ON_NODE)
}

pub fn use_populator(pvc: &PersistentVolumeClaim) -> bool {
    annotation(pvc, ANN_USE_POPULATOR).as_deref() == Some("true")
}

pub fn clone_type(pvc: &PersistentVolumeClaim) -> Option<String> {
    annotation(pvc, ANN_CLONE_TYPE)
}

pub fn creation_timestamp(pvc: &PersistentVolumeClaim) -> Option<&Time> {
    pvc.metadata.creation_timestamp.as_ref()
}

pub fn volume_mode(pvc: &PersistentVolumeClaim) -> Option<String> {
    pvc.spec.as_ref().and_then(|s| s.volume_mode.clone())
}

fn pv_affinity_node(pv: &PersistentVolume) -> Option<String> {
    pv.spec
        .as_ref()?
        .node_affinity
        .as_ref()?
        .required
        .as_ref()?
        .node_selector_terms
        .iter()
        .flat_map(|term| term.match_expressions.iter().flatten())
        .find_map(|expr| expr.values.as_ref().and_then(|v| v.first().cloned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::mock::MockService;
    use serde_json::json;

    fn pvc_json(phase: &str) -> String {
        json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {
                "name": "dv-1",
                "namespace": "ns",
                "annotations": {
                    "volume.kubernetes.io/selected-node": "worker-1",
                    "cdi.kubevirt.io/storage.usePopulator": "true",
                    "cdi.kubevirt.io/cloneType": "snapshot"
                }
            },
            "spec": {"volumeName": "pv-1"},
            "status": {"phase": phase}
        })
        .to_string()
    }

    #[test]
    fn test_builder() {
        let pvc = PvcBuilder::new("pvc-a", "ns")
            .size("5Gi")
            .storage_class("hostpath-csi-basic")
            .volume_mode("Block")
            .provision_on_node("worker-0")
            .build();

        let spec = pvc.spec.as_ref().unwrap();
        assert_eq!(spec.storage_class_name.as_deref(), Some("hostpath-csi-basic"));
        assert_eq!(spec.volume_mode.as_deref(), Some("Block"));
        assert_eq!(
            spec.resources.as_ref().unwrap().requests.as_ref().unwrap()["storage"],
            Quantity("5Gi".to_string())
        );
        assert_eq!(provision_on_node(&pvc).as_deref(), Some("worker-0"));
    }

    #[test]
    fn test_annotation_readers() {
        let pvc: PersistentVolumeClaim = serde_json::from_str(&pvc_json(PHASE_BOUND)).unwrap();
        assert_eq!(selected_node(&pvc).as_deref(), Some("worker-1"));
        assert!(use_populator(&pvc));
        assert_eq!(clone_type(&pvc).as_deref(), Some("snapshot"));
        assert_eq!(pvc_phase(&pvc).as_deref(), Some("Bound"));
    }

    #[test]
    fn test_pv_affinity_node() {
        let pv: PersistentVolume = serde_json::from_value(json!({
            "metadata": {"name": "pv-1"},
            "spec": {
                "nodeAffinity": {"required": {"nodeSelectorTerms": [
                    {"matchExpressions": [
                        {"key": "kubernetes.io/hostname", "operator": "In", "values": ["worker-2"]}
                    ]}
                ]}}
            }
        }))
        .unwrap();
        assert_eq!(pv_affinity_node(&pv).as_deref(), Some("worker-2"));
    }

    #[tokio::test]
    async fn test_wait_for_bound() {
        let client = MockService::new()
            .on_get(
                "/api/v1/namespaces/ns/persistentvolumeclaims/dv-1",
                200,
                &pvc_json(PHASE_BOUND),
            )
            .into_k8s("ns");

        let pvc = PvcManager::new(client)
            .wait_for_status("dv-1", "ns", PHASE_BOUND, Duration::from_secs(5), None)
            .await
            .unwrap();
        assert_eq!(pvc.metadata.name.as_deref(), Some("dv-1"));
    }

    #[tokio::test]
    async fn test_find_scratch_claim() {
        let client = MockService::new()
            .on_get(
                "/api/v1/namespaces/ns/persistentvolumeclaims",
                200,
                &json!({
                    "apiVersion": "v1",
                    "kind": "PersistentVolumeClaimList",
                    "metadata": {},
                    "items": [
                        {"metadata": {"name": "upload-dv"}},
                        {"metadata": {"name": "tmp-pvc-1234-scratch"}}
                    ]
                })
                .to_string(),
            )
            .into_k8s("ns");

        let pvcs = PvcManager::new(client);
        let scratch = pvcs.find_by_suffix("ns", "-scratch").await.unwrap().unwrap();
        assert_eq!(scratch.metadata.name.as_deref(), Some("tmp-pvc-1234-scratch"));
        assert!(pvcs.find_by_suffix("ns", "-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wait_stops_on_stop_phase() {
        let client = MockService::new()
            .on_get(
                "/api/v1/namespaces/ns/persistentvolumeclaims/dv-1",
                200,
                &pvc_json("Lost"),
            )
            .into_k8s("ns");

        let err = PvcManager::new(client)
            .wait_for_status("dv-1", "ns", PHASE_BOUND, Duration::from_secs(5), Some("Lost"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("stop status"));
    }
}
