//! Kubernetes client wrapper
//!
//! Provides a high-level interface to the Kubernetes API.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Namespace, Node};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, ListParams, PostParams},
    Client, Config,
};
use tracing::{debug, info};

/// Label carried by worker nodes
const WORKER_NODE_LABEL: &str = "node-role.kubernetes.io/worker";

/// Kubernetes client wrapper
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
    namespace: String,
}

impl K8sClient {
    /// Create a new Kubernetes client from the ambient kubeconfig
    pub async fn new(namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;

        Ok(Self::from_client(client, namespace))
    }

    /// Create client with custom config
    pub fn with_config(config: Config, namespace: impl Into<String>) -> Result<Self> {
        let client =
            Client::try_from(config).context("Failed to create Kubernetes client from config")?;

        Ok(Self::from_client(client, namespace))
    }

    /// Wrap an existing kube client
    pub fn from_client(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Client acting as `user` through API impersonation
    pub async fn impersonating(user: &str, namespace: impl Into<String>) -> Result<Self> {
        let mut config = Config::infer()
            .await
            .context("Failed to infer kubeconfig")?;
        config.auth_info.impersonate = Some(user.to_string());
        debug!("Creating client impersonating {}", user);
        Self::with_config(config, namespace)
    }

    /// Same connection, different default namespace
    pub fn in_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            namespace: namespace.into(),
        }
    }

    /// Get the underlying kube client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get the namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// API server `gitVersion`
    pub async fn server_version(&self) -> Result<String> {
        let info = self
            .client
            .apiserver_version()
            .await
            .context("Failed to read API server version")?;
        Ok(info.git_version)
    }

    /// Check if a CRD exists, e.g. `datavolumes.cdi.kubevirt.io`
    pub async fn crd_exists(&self, name: &str) -> Result<bool> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());

        let found = crds
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to check CRD {name}"))?
            .is_some();
        Ok(found)
    }

    /// Check if namespace exists
    pub async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());

        let found = namespaces
            .get_opt(name)
            .await
            .context("Failed to check namespace existence")?
            .is_some();
        Ok(found)
    }

    /// Create the working namespace when missing
    pub async fn ensure_namespace(&self) -> Result<()> {
        if self.namespace_exists(&self.namespace).await? {
            return Ok(());
        }

        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: kube::core::ObjectMeta {
                name: Some(self.namespace.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        namespaces
            .create(&PostParams::default(), &ns)
            .await
            .with_context(|| format!("Failed to create namespace {}", self.namespace))?;

        info!("Created namespace {}", self.namespace);
        Ok(())
    }

    /// Names of worker nodes that accept new pods
    pub async fn schedulable_worker_nodes(&self) -> Result<Vec<String>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default().labels(WORKER_NODE_LABEL))
            .await
            .context("Failed to list worker nodes")?;

        Ok(list
            .items
            .into_iter()
            .filter(|node| {
                !node
                    .spec
                    .as_ref()
                    .and_then(|s| s.unschedulable)
                    .unwrap_or(false)
            })
            .filter_map(|node| node.metadata.name)
            .collect())
    }

    /// Create a namespaced API in another namespace
    pub fn api_in<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Create a cluster-wide API
    pub fn cluster_api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::ClusterResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }
}
