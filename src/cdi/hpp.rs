//! HostPathProvisioner lookups
//!
//! The HPP CR comes in two shapes: legacy (no storage pools, non-CSI
//! resources) and CSI (explicit `spec.storagePools`, `-csi` suffixed
//! resources). Most names below are derived from that distinction.

use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Pod, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::{Api, DeleteParams, ListParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, info};

use crate::cdi::storage::StorageManager;
use crate::constants::{
    HOSTPATH_PROVISIONER, HOSTPATH_PROVISIONER_ADMIN, HOSTPATH_PROVISIONER_OPERATOR, HPP_POOL,
    TIMEOUT_5SEC,
};
use crate::error::StorageError;
use crate::k8s::K8sClient;
use crate::utils::{Sample, TimeoutSampler};

const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
const LABEL_VERSION: &str = "app.kubernetes.io/version";
const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY_OLM: &str = "olm";

const PROMETHEUS_RULE: &str = "prometheus-hpp-rules";
const SERVICE_MONITOR: &str = "service-monitor-hpp";
const METRICS_SERVICE: &str = "hpp-prometheus-metrics";
const MONITORING_RBAC: &str = "hostpath-provisioner-monitoring";

#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "hostpathprovisioner.kubevirt.io",
    version = "v1beta1",
    kind = "HostPathProvisioner",
    plural = "hostpathprovisioners",
    status = "HostPathProvisionerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct HostPathProvisionerSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Legacy single path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_config: Option<PathConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage_pools: Vec<StoragePool>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PathConfig {
    pub path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_naming_prefix: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoragePool {
    pub name: String,
    pub path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostPathProvisionerStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<HppCondition>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HppCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HostPathProvisioner {
    /// Only CSI-era CRs declare storage pools
    pub fn is_legacy(&self) -> bool {
        self.spec.storage_pools.is_empty()
    }

    /// Suffix of the CR-owned daemonset, service account and SCC
    pub fn cr_suffix(&self) -> &'static str {
        if self.is_legacy() {
            ""
        } else {
            "-csi"
        }
    }

    pub fn cluster_role_suffix(&self) -> &'static str {
        if self.is_legacy() {
            ""
        } else {
            "-admin-csi"
        }
    }

    pub fn is_available(&self) -> bool {
        self.status.as_ref().is_some_and(|s| {
            s.conditions
                .iter()
                .any(|c| c.type_ == "Available" && c.status == "True")
        })
    }
}

/// Service account the HPP SCC must grant, e.g.
/// `system:serviceaccount:openshift-cnv:hostpath-provisioner-admin-csi`
pub fn admin_service_account_user(hco_namespace: &str, cr_suffix: &str) -> String {
    format!("system:serviceaccount:{hco_namespace}:{HOSTPATH_PROVISIONER_ADMIN}{cr_suffix}")
}

/// `runAsUser` of the pod's first container
pub fn run_as_user(pod: &Pod) -> Option<i64> {
    pod.spec
        .as_ref()?
        .containers
        .first()?
        .security_context
        .as_ref()?
        .run_as_user
}

/// UIDs assigned from an OpenShift namespace range have exactly 10 digits
pub fn is_namespace_uid(uid: i64) -> bool {
    (1_000_000_000..10_000_000_000).contains(&uid)
}

fn monitoring_resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("monitoring.coreos.com", "v1", kind),
        plural,
    )
}

/// HPP-owned resources whose labels are set by HCO, not the HPP operator
pub fn skipped_hco_resources() -> BTreeMap<&'static str, Vec<String>> {
    let operator_service = format!("{HOSTPATH_PROVISIONER_OPERATOR}-service");
    BTreeMap::from([
        ("ServiceAccount", vec![HOSTPATH_PROVISIONER_OPERATOR.to_string()]),
        ("Role", vec![format!("{operator_service}-cert")]),
        ("Service", vec![operator_service.clone()]),
        (
            "RoleBinding",
            vec![
                format!("{operator_service}-auth-reader"),
                format!("{operator_service}-cert"),
            ],
        ),
        (
            "ClusterRoleBinding",
            vec![format!("{operator_service}-system:auth-delegator")],
        ),
    ])
}

/// Kind, name and labels of a resource whose labels get verified
#[derive(Clone, Debug)]
pub struct LabeledResource {
    pub kind: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl LabeledResource {
    pub fn of<K>(obj: &K) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self {
            kind: K::kind(&()).to_string(),
            name: obj.meta().name.clone().unwrap_or_default(),
            labels: obj.meta().labels.clone().unwrap_or_default(),
        }
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Check the app.kubernetes.io labels HCO requires on every HPP resource.
///
/// Returns the number of resources actually checked.
pub fn verify_hpp_app_labels(resources: &[LabeledResource], cnv_version: &str) -> Result<usize> {
    let skipped = skipped_hco_resources();
    let mut checked = 0;

    for resource in resources {
        let skip = skipped
            .get(resource.kind.as_str())
            .is_some_and(|names| names.contains(&resource.name));
        if skip {
            info!(
                "Skipping {}:{}, labels are determined by HCO",
                resource.kind, resource.name
            );
            continue;
        }

        let managed_by = if resource.name.starts_with(HOSTPATH_PROVISIONER_OPERATOR) {
            MANAGED_BY_OLM
        } else {
            HOSTPATH_PROVISIONER_OPERATOR
        };
        let expected = [
            (LABEL_COMPONENT, "storage"),
            (LABEL_PART_OF, "hyperconverged-cluster"),
            (LABEL_VERSION, cnv_version),
            (LABEL_MANAGED_BY, managed_by),
        ];

        for (key, value) in expected {
            crate::ensure_that!(
                resource.label(key) == Some(value),
                "{} {}: label {key} is {:?}, expected {value:?}",
                resource.kind,
                resource.name,
                resource.label(key)
            );
        }
        checked += 1;
    }

    Ok(checked)
}

pub struct HppManager {
    client: K8sClient,
    hco_namespace: String,
}

impl HppManager {
    pub fn new(client: K8sClient, hco_namespace: impl Into<String>) -> Self {
        Self {
            client,
            hco_namespace: hco_namespace.into(),
        }
    }

    /// The cluster's HPP CR; its absence is a missing prerequisite
    pub async fn cr(&self) -> Result<HostPathProvisioner> {
        let api: Api<HostPathProvisioner> = self.client.cluster_api();
        let cr = match api.get_opt(HOSTPATH_PROVISIONER).await {
            Ok(cr) => cr,
            Err(kube::Error::Api(e)) if e.code == 404 => None,
            Err(e) => return Err(e).context("Failed to get HostPathProvisioner"),
        };
        cr.ok_or_else(|| StorageError::missing("HostPathProvisioner CR").into())
    }

    /// The CR's daemonset, which must exist
    pub async fn daemonset(&self, cr_suffix: &str) -> Result<DaemonSet> {
        let name = format!("{HOSTPATH_PROVISIONER}{cr_suffix}");
        let api: Api<DaemonSet> = self.client.api_in(&self.hco_namespace);
        api.get_opt(&name)
            .await
            .with_context(|| format!("Failed to get DaemonSet {name}"))?
            .ok_or_else(|| StorageError::assertion(format!("DaemonSet {name} does not exist")).into())
    }

    pub async fn operator_deployment(&self) -> Result<Deployment> {
        let api: Api<Deployment> = self.client.api_in(&self.hco_namespace);
        api.get_opt(HOSTPATH_PROVISIONER_OPERATOR)
            .await
            .context("Failed to get HPP operator Deployment")?
            .ok_or_else(|| {
                StorageError::assertion(format!(
                    "Deployment {HOSTPATH_PROVISIONER_OPERATOR} does not exist"
                ))
                .into()
            })
    }

    /// `hostpath-provisioner-admin<suffix>`, which must exist
    pub async fn service_account(&self, cr_suffix: &str) -> Result<ServiceAccount> {
        let name = format!("{HOSTPATH_PROVISIONER_ADMIN}{cr_suffix}");
        let api: Api<ServiceAccount> = self.client.api_in(&self.hco_namespace);
        api.get_opt(&name)
            .await
            .with_context(|| format!("Failed to get ServiceAccount {name}"))?
            .ok_or_else(|| {
                StorageError::assertion(format!("ServiceAccount {name} does not exist")).into()
            })
    }

    pub async fn cluster_role(&self, role_suffix: &str) -> Result<ClusterRole> {
        let name = format!("{HOSTPATH_PROVISIONER}{role_suffix}");
        let api: Api<ClusterRole> = self.client.cluster_api();
        api.get_opt(&name)
            .await
            .with_context(|| format!("Failed to get ClusterRole {name}"))?
            .ok_or_else(|| StorageError::assertion(format!("ClusterRole {name} does not exist")).into())
    }

    pub async fn cluster_role_binding(&self, role_suffix: &str) -> Result<ClusterRoleBinding> {
        let name = format!("{HOSTPATH_PROVISIONER}{role_suffix}");
        let api: Api<ClusterRoleBinding> = self.client.cluster_api();
        api.get_opt(&name)
            .await
            .with_context(|| format!("Failed to get ClusterRoleBinding {name}"))?
            .ok_or_else(|| {
                StorageError::assertion(format!("ClusterRoleBinding {name} does not exist")).into()
            })
    }

    /// `hostpath-provisioner<suffix>` SCC, which must exist
    pub async fn scc(&self, cr_suffix: &str) -> Result<DynamicObject> {
        let name = format!("{HOSTPATH_PROVISIONER}{cr_suffix}");
        StorageManager::new(self.client.clone())
            .security_context_constraints(&name)
            .await?
            .ok_or_else(|| {
                StorageError::assertion(format!("SecurityContextConstraints {name} does not exist"))
                    .into()
            })
    }

    async fn exists_in_hco<K>(&self, name: &str) -> Result<bool>
    where
        K: Resource<Scope = kube::core::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = self.client.api_in(&self.hco_namespace);
        let found = api
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get {} {name}", K::kind(&())))?;
        Ok(found.is_some())
    }

    async fn monitoring_exists(&self, resource: &ApiResource, name: &str) -> Result<bool> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.client().clone(), &self.hco_namespace, resource);
        let found = api
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get {} {name}", resource.kind))?;
        Ok(found.is_some())
    }

    /// `Kind/name` of every HPP monitoring resource that does not exist
    pub async fn missing_prometheus_resources(&self) -> Result<Vec<String>> {
        let checks = [
            (
                "PrometheusRule",
                PROMETHEUS_RULE,
                self.monitoring_exists(
                    &monitoring_resource("PrometheusRule", "prometheusrules"),
                    PROMETHEUS_RULE,
                )
                .await?,
            ),
            (
                "ServiceMonitor",
                SERVICE_MONITOR,
                self.monitoring_exists(
                    &monitoring_resource("ServiceMonitor", "servicemonitors"),
                    SERVICE_MONITOR,
                )
                .await?,
            ),
            (
                "Service",
                METRICS_SERVICE,
                self.exists_in_hco::<Service>(METRICS_SERVICE).await?,
            ),
            (
                "Role",
                MONITORING_RBAC,
                self.exists_in_hco::<Role>(MONITORING_RBAC).await?,
            ),
            (
                "RoleBinding",
                MONITORING_RBAC,
                self.exists_in_hco::<RoleBinding>(MONITORING_RBAC).await?,
            ),
        ];

        Ok(checks
            .into_iter()
            .filter(|(_, _, exists)| !exists)
            .map(|(kind, name, _)| format!("{kind}/{name}"))
            .collect())
    }

    pub async fn delete_operator_deployment(&self) -> Result<()> {
        let api: Api<Deployment> = self.client.api_in(&self.hco_namespace);
        api.delete(HOSTPATH_PROVISIONER_OPERATOR, &DeleteParams::background())
            .await
            .context("Failed to delete HPP operator Deployment")?;
        info!(
            "Deleted Deployment {}/{}",
            self.hco_namespace, HOSTPATH_PROVISIONER_OPERATOR
        );
        Ok(())
    }

    /// Wait until an operator Deployment other than `previous_uid` has all
    /// of its replicas ready
    pub async fn wait_for_operator_replicas(
        &self,
        previous_uid: Option<&str>,
        timeout: Duration,
    ) -> Result<Deployment> {
        let api: Api<Deployment> = self.client.api_in(&self.hco_namespace);

        TimeoutSampler::new(timeout, TIMEOUT_5SEC)
            .waiting_for(format!("Deployment {HOSTPATH_PROVISIONER_OPERATOR} replicas"))
            .wait_for(|| {
                let api = api.clone();
                async move {
                    let Some(deployment) = api.get_opt(HOSTPATH_PROVISIONER_OPERATOR).await? else {
                        return Ok(Sample::observed("absent"));
                    };
                    if previous_uid.is_some() && deployment.metadata.uid.as_deref() == previous_uid {
                        return Ok(Sample::observed("not deleted yet"));
                    }
                    let desired = deployment
                        .spec
                        .as_ref()
                        .and_then(|s| s.replicas)
                        .unwrap_or(1);
                    let ready = deployment
                        .status
                        .as_ref()
                        .and_then(|s| s.ready_replicas)
                        .unwrap_or(0);
                    Ok(if ready == desired {
                        Sample::Done(deployment)
                    } else {
                        Sample::Pending(Some(format!("{ready}/{desired} ready")))
                    })
                }
            })
            .await
    }

    /// Storage pool deployments (`hpp-pool-*`) created for PVC-backed pools
    pub async fn pool_deployments(&self) -> Result<Vec<Deployment>> {
        let api: Api<Deployment> = self.client.api_in(&self.hco_namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .context("Failed to list Deployments")?;
        Ok(list
            .items
            .into_iter()
            .filter(|d| d.name_any().starts_with(HPP_POOL))
            .collect())
    }

    /// Resources owned by the HPP operator and CR, for label verification
    pub async fn owned_resources(&self, cr: &HostPathProvisioner) -> Result<Vec<LabeledResource>> {
        let suffix = cr.cr_suffix();
        let role_name = format!("{HOSTPATH_PROVISIONER}{}", cr.cluster_role_suffix());

        let mut resources = vec![
            LabeledResource::of(&self.operator_deployment().await?),
            LabeledResource::of(&self.daemonset(suffix).await?),
        ];

        let sa_api: Api<ServiceAccount> = self.client.api_in(&self.hco_namespace);
        let sa_name = format!("{HOSTPATH_PROVISIONER_ADMIN}{suffix}");
        if let Some(sa) = sa_api
            .get_opt(&sa_name)
            .await
            .with_context(|| format!("Failed to get ServiceAccount {sa_name}"))?
        {
            resources.push(LabeledResource::of(&sa));
        }

        let role_api: Api<ClusterRole> = self.client.cluster_api();
        if let Some(role) = role_api
            .get_opt(&role_name)
            .await
            .with_context(|| format!("Failed to get ClusterRole {role_name}"))?
        {
            resources.push(LabeledResource::of(&role));
        }

        let binding_api: Api<ClusterRoleBinding> = self.client.cluster_api();
        if let Some(binding) = binding_api
            .get_opt(&role_name)
            .await
            .with_context(|| format!("Failed to get ClusterRoleBinding {role_name}"))?
        {
            resources.push(LabeledResource::of(&binding));
        }

        for pool in self.pool_deployments().await? {
            resources.push(LabeledResource::of(&pool));
        }

        debug!("Collected {} HPP resources", resources.len());
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::mock::{not_found_json, MockService};
    use serde_json::json;

    fn hpp(pools: serde_json::Value) -> HostPathProvisioner {
        serde_json::from_value(json!({
            "apiVersion": "hostpathprovisioner.kubevirt.io/v1beta1",
            "kind": "HostPathProvisioner",
            "metadata": {"name": "hostpath-provisioner"},
            "spec": {"storagePools": pools},
            "status": {"conditions": [{"type": "Available", "status": "True"}]}
        }))
        .unwrap()
    }

    fn labeled(kind: &str, name: &str, managed_by: &str) -> LabeledResource {
        LabeledResource {
            kind: kind.to_string(),
            name: name.to_string(),
            labels: BTreeMap::from([
                (LABEL_COMPONENT.to_string(), "storage".to_string()),
                (LABEL_PART_OF.to_string(), "hyperconverged-cluster".to_string()),
                (LABEL_VERSION.to_string(), "4.16.0".to_string()),
                (LABEL_MANAGED_BY.to_string(), managed_by.to_string()),
            ]),
        }
    }

    #[test]
    fn test_suffixes_follow_storage_pools() {
        let legacy = hpp(json!([]));
        assert!(legacy.is_legacy());
        assert_eq!(legacy.cr_suffix(), "");
        assert_eq!(legacy.cluster_role_suffix(), "");

        let csi = hpp(json!([{"name": "local", "path": "/var/hpvolumes"}]));
        assert!(!csi.is_legacy());
        assert!(csi.is_available());
        assert_eq!(csi.cr_suffix(), "-csi");
        assert_eq!(csi.cluster_role_suffix(), "-admin-csi");
    }

    #[test]
    fn test_verify_labels_managed_by() {
        let resources = vec![
            labeled("Deployment", "hostpath-provisioner-operator", "olm"),
            labeled("DaemonSet", "hostpath-provisioner-csi", HOSTPATH_PROVISIONER_OPERATOR),
        ];
        assert_eq!(verify_hpp_app_labels(&resources, "4.16.0").unwrap(), 2);

        let wrong = vec![labeled(
            "DaemonSet",
            "hostpath-provisioner-csi",
            MANAGED_BY_OLM,
        )];
        let err = verify_hpp_app_labels(&wrong, "4.16.0").unwrap_err();
        assert!(err.to_string().contains(LABEL_MANAGED_BY));
    }

    #[test]
    fn test_verify_labels_skips_hco_resources() {
        let unlabeled = LabeledResource {
            kind: "Service".to_string(),
            name: "hostpath-provisioner-operator-service".to_string(),
            labels: BTreeMap::new(),
        };
        assert_eq!(verify_hpp_app_labels(&[unlabeled], "4.16.0").unwrap(), 0);

        let version_mismatch = vec![labeled(
            "ServiceAccount",
            "hostpath-provisioner-admin-csi",
            HOSTPATH_PROVISIONER_OPERATOR,
        )];
        assert!(verify_hpp_app_labels(&version_mismatch, "4.17.0").is_err());
    }

    #[tokio::test]
    async fn test_missing_cr_is_missing_prerequisite() {
        let client = MockService::new()
            .on_get(
                "/apis/hostpathprovisioner.kubevirt.io/v1beta1/hostpathprovisioners/hostpath-provisioner",
                404,
                &not_found_json("hostpathprovisioners", "hostpath-provisioner"),
            )
            .into_k8s("ns");

        let err = HppManager::new(client, "openshift-cnv").cr().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn test_daemonset_by_suffix() {
        let client = MockService::new()
            .on_get(
                "/apis/apps/v1/namespaces/openshift-cnv/daemonsets/hostpath-provisioner-csi",
                200,
                &json!({
                    "apiVersion": "apps/v1",
                    "kind": "DaemonSet",
                    "metadata": {"name": "hostpath-provisioner-csi", "namespace": "openshift-cnv"},
                    "spec": {
                        "selector": {"matchLabels": {"k8s-app": "hostpath-provisioner-csi"}},
                        "template": {"metadata": {}, "spec": {"containers": []}}
                    },
                    "status": {
                        "currentNumberScheduled": 3,
                        "desiredNumberScheduled": 3,
                        "numberMisscheduled": 0,
                        "numberReady": 3
                    }
                })
                .to_string(),
            )
            .into_k8s("ns");

        let hpp = HppManager::new(client, "openshift-cnv");
        let ds = hpp.daemonset("-csi").await.unwrap();
        assert_eq!(ds.status.unwrap().number_ready, 3);
        assert!(hpp.daemonset("").await.is_err());
    }
}
