//! Storage scenario implementations
//!
//! Each scenario drives the cluster through the managers and returns a short
//! pass message. A missing prerequisite is reported as
//! [`StorageError::Missing`], which the runner turns into a skip.

mod clone;
mod hostpath;
mod import;
mod snapshot;
mod upload;
mod virt;

use anyhow::Result;
use k8s_openapi::api::storage::v1::StorageClass;
use tracing::debug;

use crate::cdi::storage::{self, VOLUME_MODE_BLOCK};
use crate::cdi::{
    DataVolume, DataVolumeBuilder, DataVolumeManager, HppManager, StorageManager, UploadManager,
};
use crate::config::AppConfig;
use crate::error::StorageError;
use crate::http::HttpClient;
use crate::k8s::pod::PHASE_RUNNING;
use crate::k8s::{
    pvc, CleanupStack, K8sClient, NetworkManager, PodManager, PvcManager, PvcPod, RbacManager,
    ServiceManager,
};
use crate::kubevirt::{
    SnapshotManager, SubresourceManager, VirtualMachineManager, VmBuilder, VmiManager,
};
use crate::models::Scenario;

/// Everything a scenario needs: clients, settings and its own cleanup stack
pub struct ScenarioContext {
    pub client: K8sClient,
    /// Client impersonating the configured unprivileged user
    pub unprivileged: Option<K8sClient>,
    pub config: AppConfig,
    pub http: HttpClient,
    pub cleanup: CleanupStack,
}

impl ScenarioContext {
    pub fn new(
        client: K8sClient,
        unprivileged: Option<K8sClient>,
        config: AppConfig,
        http: HttpClient,
    ) -> Self {
        let cleanup = CleanupStack::new(config.cleanup);
        Self {
            client,
            unprivileged,
            config,
            http,
            cleanup,
        }
    }

    pub fn namespace(&self) -> String {
        self.client.namespace().to_string()
    }

    pub fn dvs(&self) -> DataVolumeManager {
        DataVolumeManager::new(self.client.clone())
    }

    pub fn pvcs(&self) -> PvcManager {
        PvcManager::new(self.client.clone())
    }

    pub fn pods(&self) -> PodManager {
        PodManager::new(self.client.clone())
    }

    pub fn storage(&self) -> StorageManager {
        StorageManager::new(self.client.clone())
    }

    pub fn services(&self) -> ServiceManager {
        ServiceManager::new(self.client.clone())
    }

    pub fn rbac(&self) -> RbacManager {
        RbacManager::new(self.client.clone())
    }

    pub fn networks(&self) -> NetworkManager {
        NetworkManager::new(self.client.clone())
    }

    pub fn vms(&self) -> VirtualMachineManager {
        VirtualMachineManager::new(self.client.clone())
    }

    pub fn vmis(&self) -> VmiManager {
        VmiManager::new(self.client.clone())
    }

    pub fn snapshots(&self) -> SnapshotManager {
        SnapshotManager::new(self.client.clone())
    }

    pub fn subresources(&self) -> SubresourceManager {
        SubresourceManager::new(self.client.clone())
    }

    pub fn hpp(&self) -> HppManager {
        HppManager::new(self.client.clone(), &self.config.hco_namespace)
    }

    pub fn uploads(&self) -> UploadManager {
        UploadManager::new(
            self.client.clone(),
            self.http.clone(),
            &self.config.hco_namespace,
        )
        .with_proxy(self.config.upload_proxy_url.clone())
    }

    /// Configured storage class, else the cluster default
    pub async fn storage_class(&self) -> Result<String> {
        if let Some(sc) = &self.config.default_storage_class {
            return Ok(sc.clone());
        }
        self.storage()
            .default_storage_class()
            .await?
            .and_then(|sc| sc.metadata.name)
            .ok_or_else(|| StorageError::missing("default storage class").into())
    }

    /// DataVolume builder in the test namespace on the scenario storage
    /// class, bound without waiting for a consumer
    pub async fn dv(&self, name: &str) -> Result<DataVolumeBuilder> {
        let sc = self.storage_class().await?;
        Ok(DataVolumeBuilder::new(name, self.namespace())
            .storage_class(sc)
            .bind_immediately())
    }

    /// First HostPath provisioner storage class
    pub async fn hpp_storage_class(&self) -> Result<StorageClass> {
        self.storage()
            .hpp_storage_classes()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::missing("HostPath provisioner storage class").into())
    }

    /// An HPP storage class with the given binding mode
    pub async fn hpp_storage_class_with(&self, binding_mode: &str) -> Result<StorageClass> {
        self.storage()
            .hpp_storage_classes()
            .await?
            .into_iter()
            .find(|sc| storage::binding_mode(sc) == binding_mode)
            .ok_or_else(|| {
                StorageError::missing(format!("HPP storage class with {binding_mode} binding"))
                    .into()
            })
    }

    /// Configured worker node, else the first schedulable one
    pub async fn worker_node(&self) -> Result<String> {
        if let Some(node) = &self.config.worker_node {
            return Ok(node.clone());
        }
        self.client
            .schedulable_worker_nodes()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::missing("schedulable worker node").into())
    }

    /// The impersonating client and the user it acts as
    pub fn unprivileged(&self) -> Result<(K8sClient, String)> {
        match (&self.unprivileged, &self.config.unprivileged_user) {
            (Some(client), Some(user)) => Ok((client.clone(), user.clone())),
            _ => Err(StorageError::missing("unprivileged user").into()),
        }
    }

    pub async fn is_block(&self, storage_class: &str) -> Result<bool> {
        let profile = self.storage().profile(storage_class).await?;
        Ok(profile.volume_mode() == Some(VOLUME_MODE_BLOCK))
    }

    /// Skip on storage that only offers block volumes
    pub async fn require_filesystem(&self, storage_class: &str) -> Result<()> {
        if self.is_block(storage_class).await? {
            return Err(StorageError::missing(format!(
                "filesystem volume mode on {storage_class}"
            ))
            .into());
        }
        Ok(())
    }

    /// Start a pod mounting `pvc_name` and wait until it runs
    pub async fn pvc_pod(&mut self, name: &str, pvc_name: &str) -> Result<String> {
        let ns = self.namespace();
        let claim = self.pvcs().get(pvc_name, &ns).await?;
        let block = pvc::volume_mode(&claim).as_deref() == Some(VOLUME_MODE_BLOCK);
        debug!("Pod {} mounts {} (block: {})", name, pvc_name, block);

        let pod = PvcPod::new(name, &ns, pvc_name, &self.config.pod_image)
            .block(block)
            .build();
        let pods = self.pods();
        pods.create(&pod, &mut self.cleanup).await?;
        pods.wait_for_phase(name, &ns, PHASE_RUNNING, self.config.timeouts.pod_running())
            .await?;
        Ok(name.to_string())
    }

    /// Boot a VM from an existing DV and wait until it is ready
    pub async fn run_vm_from_dv(&mut self, dv: &DataVolume) -> Result<String> {
        let ns = self.namespace();
        let vm = VmBuilder::from_dv(dv).build();
        let name = vm.metadata.name.clone().unwrap_or_default();
        let vms = self.vms();
        vms.create(&vm, &mut self.cleanup).await?;
        vms.wait_ready(&name, &ns, self.config.timeouts.vm_ready())
            .await?;
        Ok(name)
    }
}

/// Run one scenario body
pub async fn run(scenario: Scenario, ctx: &mut ScenarioContext) -> Result<String> {
    match scenario {
        Scenario::HttpImport => import::http_import(ctx).await,
        Scenario::ArchiveImport => import::archive_import(ctx).await,
        Scenario::SecureImport => import::secure_import(ctx).await,
        Scenario::BasicAuthImport => import::basic_auth_import(ctx).await,
        Scenario::InvalidUrl => import::invalid_url(ctx).await,
        Scenario::EmptyUrl => import::empty_url(ctx).await,
        Scenario::WrongContentType => import::wrong_content_type(ctx).await,
        Scenario::UnpackCompressed => import::unpack_compressed(ctx).await,
        Scenario::IncorrectCertificate => import::incorrect_certificate(ctx).await,
        Scenario::MissingCertConfigMap => import::missing_cert_configmap(ctx).await,
        Scenario::BlankDisk => import::blank_disk(ctx).await,
        Scenario::VirtualSize => import::virtual_size(ctx).await,
        Scenario::RecreatePvc => import::recreate_pvc(ctx).await,
        Scenario::ImporterNetwork => import::importer_network(ctx).await,
        Scenario::UnprivilegedImport => import::unprivileged_import(ctx).await,

        Scenario::UploadWithToken => upload::upload_with_token(ctx).await,
        Scenario::UploadAsync => upload::upload_async(ctx).await,
        Scenario::UploadScratchNode => upload::upload_scratch_node(ctx).await,

        Scenario::CloneDataVolume => clone::clone_data_volume(ctx).await,
        Scenario::CrossNamespaceClone => clone::cross_namespace_clone(ctx).await,
        Scenario::ClonePermissions => clone::clone_permissions(ctx).await,

        Scenario::HppCustomResource => hostpath::custom_resource(ctx).await,
        Scenario::HppDaemonSet => hostpath::daemonset(ctx).await,
        Scenario::HppOperator => hostpath::operator(ctx).await,
        Scenario::HppServiceAccount => hostpath::service_account(ctx).await,
        Scenario::HppClusterRole => hostpath::cluster_role(ctx).await,
        Scenario::HppAppLabels => hostpath::app_labels(ctx).await,
        Scenario::HppScc => hostpath::scc(ctx).await,
        Scenario::HppOperatorRunAsUser => hostpath::operator_run_as_user(ctx).await,
        Scenario::HppPrometheusResources => hostpath::prometheus_resources(ctx).await,
        Scenario::HppPodReferencesPvc => hostpath::pod_references_pvc(ctx).await,
        Scenario::HppImmediateWithoutNode => hostpath::immediate_without_node(ctx).await,
        Scenario::HppImmediateOnNode => hostpath::immediate_on_node(ctx).await,
        Scenario::HppHttpImport => hostpath::http_import(ctx).await,
        Scenario::HppPvcWaitForConsumer => hostpath::pvc_wait_for_consumer(ctx).await,
        Scenario::HppPvcOnNode => hostpath::pvc_on_node(ctx).await,
        Scenario::HppRegistryImport => hostpath::registry_import(ctx).await,
        Scenario::HppCloneOnNode => hostpath::clone_on_node(ctx).await,
        Scenario::HppOperatorRecreate => hostpath::operator_recreate(ctx).await,

        Scenario::SnapshotRestoreOffline => snapshot::restore_offline(ctx).await,
        Scenario::SnapshotOnline => snapshot::online(ctx).await,
        Scenario::SnapshotForbidden => snapshot::forbidden(ctx).await,

        Scenario::ImagePermissions => virt::image_permissions(ctx).await,
        Scenario::VmOnDifferentNode => virt::vm_on_different_node(ctx).await,
        Scenario::MemoryDump => virt::memory_dump(ctx).await,
        Scenario::HotplugWithSerial => virt::hotplug_with_serial(ctx).await,
        Scenario::HotplugPersist => virt::hotplug_persist(ctx).await,
    }
}

#[cfg(test)]
pub(super) mod testing {
    use super::*;
    use crate::k8s::mock::MockService;

    pub const NAMESPACE: &str = "storage-tests";

    /// Settings with a fixed storage class so no StorageClass lookup is made
    pub fn config() -> AppConfig {
        AppConfig {
            default_storage_class: Some("hostpath-csi-basic".to_string()),
            ..Default::default()
        }
    }

    pub fn context(mock: MockService, config: AppConfig) -> ScenarioContext {
        ScenarioContext::new(
            mock.into_k8s(NAMESPACE),
            None,
            config,
            HttpClient::new().unwrap(),
        )
    }

    /// Context whose unprivileged client talks to `user_mock`
    pub fn unprivileged_context(
        mock: MockService,
        user_mock: MockService,
        user: &str,
    ) -> ScenarioContext {
        let config = AppConfig {
            unprivileged_user: Some(user.to_string()),
            ..config()
        };
        ScenarioContext::new(
            mock.into_k8s(NAMESPACE),
            Some(user_mock.into_k8s(NAMESPACE)),
            config,
            HttpClient::new().unwrap(),
        )
    }

    pub fn datavolumes_path(namespace: &str) -> String {
        format!("/apis/cdi.kubevirt.io/v1beta1/namespaces/{namespace}/datavolumes")
    }

    pub fn pvc_path(namespace: &str, name: &str) -> String {
        format!("/api/v1/namespaces/{namespace}/persistentvolumeclaims/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::testing::context;
    use super::*;
    use crate::k8s::mock::MockService;
    use serde_json::json;

    #[tokio::test]
    async fn test_storage_class_prefers_config() {
        let config = AppConfig {
            default_storage_class: Some("ocs-storagecluster-ceph-rbd".to_string()),
            ..Default::default()
        };
        let ctx = context(MockService::new(), config);
        assert_eq!(
            ctx.storage_class().await.unwrap(),
            "ocs-storagecluster-ceph-rbd"
        );
    }

    #[tokio::test]
    async fn test_storage_class_falls_back_to_cluster_default() {
        let mock = MockService::new().on_get(
            "/apis/storage.k8s.io/v1/storageclasses",
            200,
            &json!({
                "apiVersion": "storage.k8s.io/v1",
                "kind": "StorageClassList",
                "metadata": {},
                "items": [
                    {"metadata": {"name": "slow"}, "provisioner": "kubernetes.io/no-provisioner"},
                    {
                        "metadata": {
                            "name": "hostpath-csi-basic",
                            "annotations": {"storageclass.kubernetes.io/is-default-class": "true"}
                        },
                        "provisioner": "kubevirt.io.hostpath-provisioner"
                    }
                ]
            })
            .to_string(),
        );
        let ctx = context(mock, AppConfig::default());
        assert_eq!(ctx.storage_class().await.unwrap(), "hostpath-csi-basic");
    }

    #[tokio::test]
    async fn test_missing_prerequisites_are_typed() {
        let ctx = context(MockService::new(), AppConfig::default());

        let Err(err) = ctx.unprivileged() else {
            panic!("unprivileged client without a configured user");
        };
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn test_worker_node_prefers_config() {
        let config = AppConfig {
            worker_node: Some("worker-0".to_string()),
            ..Default::default()
        };
        let ctx = context(MockService::new(), config);
        assert_eq!(ctx.worker_node().await.unwrap(), "worker-0");
    }
}
