//! Storage classes, StorageProfiles and CDI configuration
//!
//! Read-only lookups the scenarios use to decide how a volume will behave:
//! binding mode, clone strategy, snapshot support and filesystem overhead.
//! SecurityContextConstraints are looked up here too, as untyped objects.

use anyhow::{Context, Result};
use k8s_openapi::api::storage::v1::{CSIDriver, StorageClass};
use kube::api::{Api, ListParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::constants::HPP_PROVISIONERS;
use crate::error::StorageError;
use crate::k8s::K8sClient;

const ANN_DEFAULT_STORAGE_CLASS: &str = "storageclass.kubernetes.io/is-default-class";
const CDI_CONFIG_NAME: &str = "config";
/// CDI's overhead when nothing is configured
const DEFAULT_FS_OVERHEAD: f64 = 0.055;

pub const BINDING_WFFC: &str = "WaitForFirstConsumer";
pub const BINDING_IMMEDIATE: &str = "Immediate";
pub const VOLUME_MODE_FILESYSTEM: &str = "Filesystem";
pub const VOLUME_MODE_BLOCK: &str = "Block";

/// StorageProfile: CDI's per-storage-class defaults
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "cdi.kubevirt.io",
    version = "v1beta1",
    kind = "StorageProfile",
    plural = "storageprofiles",
    status = "StorageProfileStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfileSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_strategy: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claim_property_sets: Vec<ClaimPropertySet>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfileStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioner: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// `copy`, `snapshot` or `csi-clone`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_strategy: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claim_property_sets: Vec<ClaimPropertySet>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimPropertySet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_mode: Option<String>,
}

/// CDIConfig: cluster-wide CDI settings
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "cdi.kubevirt.io",
    version = "v1beta1",
    kind = "CDIConfig",
    plural = "cdiconfigs",
    status = "CdiConfigStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CDIConfigSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_space_storage_class: Option<String>,

    #[serde(rename = "uploadProxyURLOverride", skip_serializing_if = "Option::is_none")]
    pub upload_proxy_url_override: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CdiConfigStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_space_storage_class: Option<String>,

    #[serde(rename = "uploadProxyURL", skip_serializing_if = "Option::is_none")]
    pub upload_proxy_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystem_overhead: Option<FilesystemOverhead>,
}

/// Overhead fractions as decimal strings, e.g. `"0.055"`
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemOverhead {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub storage_class: BTreeMap<String, String>,
}

impl FilesystemOverhead {
    /// Overhead for `storage_class`, falling back to the global value
    pub fn for_class(&self, storage_class: &str) -> f64 {
        self.storage_class
            .get(storage_class)
            .or(self.global.as_ref())
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_FS_OVERHEAD)
    }
}

impl StorageProfile {
    pub fn clone_strategy(&self) -> Option<&str> {
        self.status.as_ref()?.clone_strategy.as_deref()
    }

    /// First claim property set, as CDI applies it
    pub fn first_claim_property(&self) -> Option<&ClaimPropertySet> {
        self.status.as_ref()?.claim_property_sets.first()
    }

    pub fn volume_mode(&self) -> Option<&str> {
        self.first_claim_property()?.volume_mode.as_deref()
    }

    pub fn access_mode(&self) -> Option<&str> {
        self.first_claim_property()?
            .access_modes
            .first()
            .map(String::as_str)
    }
}

pub fn provisioner(sc: &StorageClass) -> &str {
    &sc.provisioner
}

pub fn binding_mode(sc: &StorageClass) -> &str {
    sc.volume_binding_mode.as_deref().unwrap_or(BINDING_IMMEDIATE)
}

pub fn is_wffc(sc: &StorageClass) -> bool {
    binding_mode(sc) == BINDING_WFFC
}

pub fn is_hpp(sc: &StorageClass) -> bool {
    HPP_PROVISIONERS.contains(&sc.provisioner.as_str())
}

/// True when a hostpath class is backed by the CSI driver
pub fn is_hpp_csi(sc: &StorageClass) -> bool {
    sc.provisioner == HPP_PROVISIONERS[0]
}

fn volume_snapshot_class_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("snapshot.storage.k8s.io", "v1", "VolumeSnapshotClass"),
        "volumesnapshotclasses",
    )
}

fn security_context_constraints_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("security.openshift.io", "v1", "SecurityContextConstraints"),
        "securitycontextconstraints",
    )
}

/// `users` granted by an SCC, in order
pub fn scc_users(scc: &DynamicObject) -> Vec<String> {
    scc.data
        .get("users")
        .and_then(|u| u.as_array())
        .map(|users| {
            users
                .iter()
                .filter_map(|u| u.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub struct StorageManager {
    client: K8sClient,
}

impl StorageManager {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }

    pub async fn storage_class(&self, name: &str) -> Result<StorageClass> {
        let api: Api<StorageClass> = self.client.cluster_api();
        api.get_opt(name)
            .await
            .with_context(|| format!("Failed to get StorageClass {name}"))?
            .ok_or_else(|| StorageError::missing(format!("StorageClass {name}")).into())
    }

    pub async fn storage_classes(&self) -> Result<Vec<StorageClass>> {
        let api: Api<StorageClass> = self.client.cluster_api();
        let list = api
            .list(&ListParams::default())
            .await
            .context("Failed to list StorageClasses")?;
        Ok(list.items)
    }

    /// Class marked as cluster default
    pub async fn default_storage_class(&self) -> Result<Option<StorageClass>> {
        Ok(self.storage_classes().await?.into_iter().find(|sc| {
            sc.metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(ANN_DEFAULT_STORAGE_CLASS))
                .map(|v| v == "true")
                .unwrap_or(false)
        }))
    }

    /// Hostpath provisioner classes, CSI ones first
    pub async fn hpp_storage_classes(&self) -> Result<Vec<StorageClass>> {
        let mut classes: Vec<_> = self
            .storage_classes()
            .await?
            .into_iter()
            .filter(is_hpp)
            .collect();
        classes.sort_by_key(|sc| !is_hpp_csi(sc));
        Ok(classes)
    }

    pub async fn profile(&self, storage_class: &str) -> Result<StorageProfile> {
        let api: Api<StorageProfile> = self.client.cluster_api();
        api.get(storage_class)
            .await
            .with_context(|| format!("Failed to get StorageProfile {storage_class}"))
    }

    pub async fn csi_drivers(&self) -> Result<Vec<String>> {
        let api: Api<CSIDriver> = self.client.cluster_api();
        let list = api
            .list(&ListParams::default())
            .await
            .context("Failed to list CSIDrivers")?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|d| d.metadata.name)
            .collect())
    }

    /// A VolumeSnapshotClass exists for the class's provisioner
    pub async fn snapshot_supported(&self, storage_class: &str) -> Result<bool> {
        let sc = self.storage_class(storage_class).await?;
        let resource = volume_snapshot_class_resource();
        let api: Api<DynamicObject> = Api::all_with(self.client.client().clone(), &resource);

        let classes = match api.list(&ListParams::default()).await {
            Ok(list) => list.items,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("VolumeSnapshotClass API not served");
                return Ok(false);
            }
            Err(e) => return Err(e).context("Failed to list VolumeSnapshotClasses"),
        };

        Ok(classes.iter().any(|vsc| {
            vsc.data.get("driver").and_then(|d| d.as_str()) == Some(provisioner(&sc))
        }))
    }

    /// SecurityContextConstraints by name; `None` when absent or when the
    /// cluster does not serve the OpenShift security API
    pub async fn security_context_constraints(&self, name: &str) -> Result<Option<DynamicObject>> {
        let resource = security_context_constraints_resource();
        let api: Api<DynamicObject> = Api::all_with(self.client.client().clone(), &resource);
        api.get_opt(name)
            .await
            .with_context(|| format!("Failed to get SecurityContextConstraints {name}"))
    }

    pub async fn cdi_config(&self) -> Result<CDIConfig> {
        let api: Api<CDIConfig> = self.client.cluster_api();
        api.get(CDI_CONFIG_NAME)
            .await
            .context("Failed to get CDIConfig")
    }

    /// Filesystem overhead CDI reserves on volumes of `storage_class`
    pub async fn filesystem_overhead(&self, storage_class: &str) -> Result<f64> {
        let config = self.cdi_config().await?;
        Ok(config
            .status
            .and_then(|s| s.filesystem_overhead)
            .map(|o| o.for_class(storage_class))
            .unwrap_or(DEFAULT_FS_OVERHEAD))
    }

    pub async fn scratch_space_storage_class(&self) -> Result<Option<String>> {
        let config = self.cdi_config().await?;
        Ok(config.status.and_then(|s| s.scratch_space_storage_class))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::mock::MockService;
    use serde_json::json;

    fn sc(name: &str, provisioner: &str, binding: &str) -> serde_json::Value {
        json!({
            "metadata": {"name": name},
            "provisioner": provisioner,
            "volumeBindingMode": binding
        })
    }

    #[test]
    fn test_storage_class_predicates() {
        let hpp: StorageClass = serde_json::from_value(sc(
            "hostpath-csi-basic",
            "kubevirt.io.hostpath-provisioner",
            BINDING_WFFC,
        ))
        .unwrap();
        assert!(is_wffc(&hpp));
        assert!(is_hpp(&hpp));
        assert!(is_hpp_csi(&hpp));

        let ceph: StorageClass = serde_json::from_value(json!({
            "metadata": {"name": "rbd"},
            "provisioner": "openshift-storage.rbd.csi.ceph.com"
        }))
        .unwrap();
        assert_eq!(binding_mode(&ceph), BINDING_IMMEDIATE);
        assert!(!is_hpp(&ceph));
    }

    #[test]
    fn test_filesystem_overhead_lookup() {
        let overhead = FilesystemOverhead {
            global: Some("0.06".to_string()),
            storage_class: BTreeMap::from([("hpp".to_string(), "0.1".to_string())]),
        };
        assert_eq!(overhead.for_class("hpp"), 0.1);
        assert_eq!(overhead.for_class("rbd"), 0.06);
        assert_eq!(FilesystemOverhead::default().for_class("x"), DEFAULT_FS_OVERHEAD);
    }

    #[test]
    fn test_storage_profile_accessors() {
        let profile: StorageProfile = serde_json::from_value(json!({
            "apiVersion": "cdi.kubevirt.io/v1beta1",
            "kind": "StorageProfile",
            "metadata": {"name": "rbd"},
            "spec": {},
            "status": {
                "cloneStrategy": "csi-clone",
                "claimPropertySets": [{"accessModes": ["ReadWriteMany"], "volumeMode": "Block"}]
            }
        }))
        .unwrap();
        assert_eq!(profile.clone_strategy(), Some("csi-clone"));
        assert_eq!(profile.volume_mode(), Some(VOLUME_MODE_BLOCK));
        assert_eq!(profile.access_mode(), Some("ReadWriteMany"));
    }

    #[tokio::test]
    async fn test_snapshot_supported() {
        let client = MockService::new()
            .on_get(
                "/apis/storage.k8s.io/v1/storageclasses/rbd",
                200,
                &json!({
                    "apiVersion": "storage.k8s.io/v1",
                    "kind": "StorageClass",
                    "metadata": {"name": "rbd"},
                    "provisioner": "openshift-storage.rbd.csi.ceph.com"
                })
                .to_string(),
            )
            .on_get(
                "/apis/snapshot.storage.k8s.io/v1/volumesnapshotclasses",
                200,
                &json!({
                    "apiVersion": "snapshot.storage.k8s.io/v1",
                    "kind": "VolumeSnapshotClassList",
                    "metadata": {},
                    "items": [{
                        "apiVersion": "snapshot.storage.k8s.io/v1",
                        "kind": "VolumeSnapshotClass",
                        "metadata": {"name": "rbd-snap"},
                        "driver": "openshift-storage.rbd.csi.ceph.com",
                        "deletionPolicy": "Delete"
                    }]
                })
                .to_string(),
            )
            .into_k8s("ns");

        let storage = StorageManager::new(client);
        assert!(storage.snapshot_supported("rbd").await.unwrap());
        assert!(storage.storage_class("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_filesystem_overhead_from_cdi_config() {
        let client = MockService::new()
            .on_get(
                "/apis/cdi.kubevirt.io/v1beta1/cdiconfigs/config",
                200,
                &json!({
                    "apiVersion": "cdi.kubevirt.io/v1beta1",
                    "kind": "CDIConfig",
                    "metadata": {"name": "config"},
                    "spec": {},
                    "status": {
                        "uploadProxyURL": "cdi-uploadproxy.example.com",
                        "filesystemOverhead": {"global": "0.055", "storageClass": {"hpp": "0.1"}}
                    }
                })
                .to_string(),
            )
            .into_k8s("ns");

        let storage = StorageManager::new(client);
        assert_eq!(storage.filesystem_overhead("hpp").await.unwrap(), 0.1);
        assert_eq!(storage.filesystem_overhead("other").await.unwrap(), 0.055);
    }

    #[tokio::test]
    async fn test_security_context_constraints_users() {
        let client = MockService::new()
            .on_get(
                "/apis/security.openshift.io/v1/securitycontextconstraints/hostpath-provisioner-csi",
                200,
                &json!({
                    "apiVersion": "security.openshift.io/v1",
                    "kind": "SecurityContextConstraints",
                    "metadata": {"name": "hostpath-provisioner-csi"},
                    "allowHostDirVolumePlugin": true,
                    "users": ["system:serviceaccount:openshift-cnv:hostpath-provisioner-admin-csi"]
                })
                .to_string(),
            )
            .into_k8s("ns");

        let storage = StorageManager::new(client);
        let scc = storage
            .security_context_constraints("hostpath-provisioner-csi")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            scc_users(&scc),
            vec!["system:serviceaccount:openshift-cnv:hostpath-provisioner-admin-csi"]
        );
        assert!(storage
            .security_context_constraints("hostpath-provisioner")
            .await
            .unwrap()
            .is_none());
    }
}
