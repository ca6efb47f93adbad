//! Secondary networks for importer pods
//!
//! NetworkAttachmentDefinition has no typed binding in k8s-openapi, so it is
//! handled as a dynamic object.

use anyhow::{Context, Result};
use kube::api::{Api, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::json;
use tracing::info;

use super::cleanup::delete_and_wait;
use super::{CleanupStack, K8sClient};

pub const NAD_CRD: &str = "network-attachment-definitions.k8s.cni.cncf.io";
/// Pod annotation multus writes back with the attached interfaces
pub const ANN_NETWORK_STATUS: &str = "k8s.v1.cni.cncf.io/network-status";

fn nad_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("k8s.cni.cncf.io", "v1", "NetworkAttachmentDefinition"),
        "network-attachment-definitions",
    )
}

/// CNI config of a linux bridge network without IPAM
pub fn bridge_config(name: &str, bridge: &str) -> String {
    json!({
        "cniVersion": "0.3.1",
        "name": name,
        "type": "cnv-bridge",
        "bridge": bridge,
    })
    .to_string()
}

pub struct NetworkManager {
    client: K8sClient,
}

impl NetworkManager {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }

    pub async fn is_multus_installed(&self) -> Result<bool> {
        self.client.crd_exists(NAD_CRD).await
    }

    /// Create a linux-bridge NetworkAttachmentDefinition
    pub async fn create_bridge_nad(
        &self,
        name: &str,
        namespace: &str,
        bridge: &str,
        cleanup: &mut CleanupStack,
    ) -> Result<DynamicObject> {
        let resource = nad_resource();
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.client().clone(), namespace, &resource);

        let mut nad = DynamicObject::new(name, &resource).within(namespace);
        nad.data = json!({ "spec": { "config": bridge_config(name, bridge) } });

        let created = api
            .create(&PostParams::default(), &nad)
            .await
            .with_context(|| format!("Failed to create NetworkAttachmentDefinition {name}"))?;
        cleanup.push(
            format!("NetworkAttachmentDefinition {name}"),
            Box::pin(delete_and_wait(api, name.to_string())),
        );

        info!("Created NetworkAttachmentDefinition {}/{}", namespace, name);
        Ok(created)
    }
}
