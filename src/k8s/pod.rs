//! Pod management for scenario checks
//!
//! Pods that mount a PVC for inspection, importer pod lookups and
//! command execution through `kubectl exec`.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{
    Container, ContainerStatus, PersistentVolumeClaimVolumeSource, Pod, PodSpec, Volume,
    VolumeDevice, VolumeMount,
};
use kube::api::{Api, ListParams, PostParams};
use kube::core::ObjectMeta;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use super::{CleanupStack, K8sClient};
use crate::constants::{IMPORTER_POD_PREFIX, TIMEOUT_1SEC, TIMEOUT_2MIN, TIMEOUT_30SEC, TIMEOUT_5SEC};
use crate::utils::{Sample, TimeoutSampler};

/// Mount point of filesystem PVCs, parent of the block device path
pub const PVC_MOUNT_PATH: &str = "/pvc";
/// Device path of block PVCs
pub const PVC_DEVICE_PATH: &str = "/pvc/disk.img";

pub const PHASE_RUNNING: &str = "Running";

const CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";

/// Pod that mounts one PVC, filesystem or block
#[derive(Clone, Debug)]
pub struct PvcPod {
    name: String,
    namespace: String,
    pvc_name: String,
    image: String,
    block: bool,
    command: Vec<String>,
    node: Option<String>,
}

impl PvcPod {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        pvc_name: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            pvc_name: pvc_name.into(),
            image: image.into(),
            block: false,
            command: vec!["sleep".to_string(), "infinity".to_string()],
            node: None,
        }
    }

    /// Expose the PVC as a raw device instead of a mount
    pub fn block(mut self, block: bool) -> Self {
        self.block = block;
        self
    }

    /// Exit immediately; only binds a WaitForFirstConsumer PVC
    pub fn first_consumer(mut self) -> Self {
        self.command = vec!["true".to_string()];
        self
    }

    pub fn on_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn build(self) -> Pod {
        let (volume_mounts, volume_devices) = if self.block {
            (
                None,
                Some(vec![VolumeDevice {
                    name: "pvc".to_string(),
                    device_path: PVC_DEVICE_PATH.to_string(),
                }]),
            )
        } else {
            (
                Some(vec![VolumeMount {
                    name: "pvc".to_string(),
                    mount_path: PVC_MOUNT_PATH.to_string(),
                    ..Default::default()
                }]),
                None,
            )
        };

        Pod {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                labels: Some(BTreeMap::from([(
                    "app".to_string(),
                    "storage-tests".to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "runner".to_string(),
                    image: Some(self.image),
                    command: Some(self.command),
                    volume_mounts,
                    volume_devices,
                    ..Default::default()
                }],
                volumes: Some(vec![Volume {
                    name: "pvc".to_string(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: self.pvc_name,
                        read_only: None,
                    }),
                    ..Default::default()
                }]),
                node_name: self.node,
                restart_policy: Some("Never".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Pod manager for scenario operations
pub struct PodManager {
    client: K8sClient,
}

impl PodManager {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Pod> {
        self.client.api_in(namespace)
    }

    /// Create a pod and register it for cleanup
    pub async fn create(&self, pod: &Pod, cleanup: &mut CleanupStack) -> Result<Pod> {
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| self.client.namespace().to_string());
        let api = self.api(&namespace);

        let created = api
            .create(&PostParams::default(), pod)
            .await
            .context("Failed to create pod")?;
        let name = created.metadata.name.clone().unwrap_or_default();
        cleanup.delete_later(api, name.clone());

        info!("Created pod {}/{}", namespace, name);
        Ok(created)
    }

    pub async fn get(&self, name: &str, namespace: &str) -> Result<Pod> {
        self.api(namespace)
            .get(name)
            .await
            .with_context(|| format!("Failed to get pod {namespace}/{name}"))
    }

    /// Wait for a pod phase; `Failed` always ends the wait
    pub async fn wait_for_phase(
        &self,
        name: &str,
        namespace: &str,
        phase: &str,
        timeout: Duration,
    ) -> Result<Pod> {
        let api = self.api(namespace);

        TimeoutSampler::new(timeout, TIMEOUT_1SEC)
            .waiting_for(format!("pod {name} phase {phase}"))
            .wait_for(|| {
                let api = api.clone();
                async move {
                    let pod = api.get(name).await?;
                    let current = pod_phase(&pod).unwrap_or_default();
                    Ok(if current == phase {
                        Sample::Done(pod)
                    } else if current == "Failed" {
                        Sample::Stop(current)
                    } else {
                        Sample::Pending(Some(current))
                    })
                }
            })
            .await
    }

    /// Execute command in pod using kubectl
    pub async fn exec(&self, name: &str, namespace: &str, command: &[&str]) -> Result<String> {
        let mut kubectl_args = vec!["exec", "-n", namespace, name, "--"];
        kubectl_args.extend_from_slice(command);
        debug!("kubectl {}", kubectl_args.join(" "));

        let output = tokio::process::Command::new("kubectl")
            .args(&kubectl_args)
            .output()
            .await
            .context("Failed to execute kubectl")?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("kubectl exec in {name} failed: {stderr}")
        }
    }

    /// List pods with label selector
    pub async fn list(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Pod>> {
        let params = match label_selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        };
        let list = self
            .api(namespace)
            .list(&params)
            .await
            .context("Failed to list pods")?;
        Ok(list.items)
    }

    /// First pod whose name starts with `prefix`
    pub async fn by_name_prefix(&self, namespace: &str, prefix: &str) -> Result<Option<Pod>> {
        let pods = self.list(namespace, None).await?;
        Ok(pods.into_iter().find(|pod| {
            pod.metadata
                .name
                .as_deref()
                .map(|n| n.starts_with(prefix))
                .unwrap_or(false)
        }))
    }

    /// Wait up to 30s for the importer pod to appear
    pub async fn importer_pod(&self, namespace: &str) -> Result<Pod> {
        TimeoutSampler::new(TIMEOUT_30SEC, TIMEOUT_1SEC)
            .waiting_for(format!("importer pod in {namespace}"))
            .wait_for(|| async move {
                Ok(match self.by_name_prefix(namespace, IMPORTER_POD_PREFIX).await? {
                    Some(pod) => Sample::Done(pod),
                    None => Sample::pending(),
                })
            })
            .await
    }

    /// Wait until the importer crash-loops with `message` in its last termination
    pub async fn wait_for_importer_message(&self, namespace: &str, message: &str) -> Result<()> {
        TimeoutSampler::new(TIMEOUT_2MIN, TIMEOUT_5SEC)
            .waiting_for(format!("importer container message '{message}'"))
            .wait_for(|| async move {
                let Some(pod) = self.by_name_prefix(namespace, IMPORTER_POD_PREFIX).await? else {
                    return Ok(Sample::observed("no importer pod"));
                };
                let Some(status) = first_container_status(&pod) else {
                    return Ok(Sample::observed("no container status"));
                };
                let reason = container_status_reason(status);
                let last_message = last_termination_message(status);
                Ok(
                    if reason.as_deref() == Some(CRASH_LOOP_BACK_OFF)
                        && last_message
                            .as_deref()
                            .map(|m| m.contains(message))
                            .unwrap_or(false)
                    {
                        Sample::Done(())
                    } else {
                        Sample::Pending(Some(format!("{reason:?}: {last_message:?}")))
                    },
                )
            })
            .await
    }

    /// Wait until no importer pod is left in the namespace
    pub async fn wait_importer_gone(&self, namespace: &str) -> Result<()> {
        TimeoutSampler::new(TIMEOUT_2MIN, TIMEOUT_5SEC)
            .waiting_for(format!("importer pod in {namespace} to be deleted"))
            .wait_until(|| async move {
                Ok(self
                    .by_name_prefix(namespace, IMPORTER_POD_PREFIX)
                    .await?
                    .is_none())
            })
            .await
    }
}

pub fn pod_phase(pod: &Pod) -> Option<String> {
    pod.status.as_ref().and_then(|s| s.phase.clone())
}

pub fn node_name(pod: &Pod) -> Option<String> {
    pod.spec.as_ref().and_then(|s| s.node_name.clone())
}

fn first_container_status(pod: &Pod) -> Option<&ContainerStatus> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .first()
}

/// Waiting reason, else terminated reason
pub fn container_status_reason(status: &ContainerStatus) -> Option<String> {
    let state = status.state.as_ref()?;
    state
        .waiting
        .as_ref()
        .and_then(|w| w.reason.clone())
        .or_else(|| state.terminated.as_ref().and_then(|t| t.reason.clone()))
}

fn last_termination_message(status: &ContainerStatus) -> Option<String> {
    status
        .last_state
        .as_ref()?
        .terminated
        .as_ref()?
        .message
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::mock::MockService;
    use serde_json::json;

    fn importer_list(reason: &str, message: &str) -> String {
        json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "metadata": {},
            "items": [
                {"metadata": {"name": "virt-launcher-x"}},
                {
                    "metadata": {"name": "importer-dv-1"},
                    "status": {"containerStatuses": [{
                        "name": "importer",
                        "image": "importer",
                        "imageID": "",
                        "ready": false,
                        "restartCount": 3,
                        "state": {"waiting": {"reason": reason}},
                        "lastState": {"terminated": {"exitCode": 1, "message": message}}
                    }]}
                }
            ]
        })
        .to_string()
    }

    #[test]
    fn test_filesystem_pod() {
        let pod = PvcPod::new("pod-a", "ns", "dv-a", "fedora").build();
        let container = &pod.spec.as_ref().unwrap().containers[0];
        assert_eq!(
            container.volume_mounts.as_ref().unwrap()[0].mount_path,
            PVC_MOUNT_PATH
        );
        assert!(container.volume_devices.is_none());
    }

    #[test]
    fn test_block_pod() {
        let pod = PvcPod::new("pod-a", "ns", "dv-a", "fedora")
            .block(true)
            .first_consumer()
            .build();
        let container = &pod.spec.as_ref().unwrap().containers[0];
        assert_eq!(
            container.volume_devices.as_ref().unwrap()[0].device_path,
            PVC_DEVICE_PATH
        );
        assert_eq!(container.command.as_ref().unwrap(), &vec!["true".to_string()]);
    }

    #[tokio::test]
    async fn test_importer_crash_message() {
        let client = MockService::new()
            .on_get(
                "/api/v1/namespaces/ns/pods",
                200,
                &importer_list("CrashLoopBackOff", "Unable to process data: exit status 2"),
            )
            .into_k8s("ns");

        let pods = PodManager::new(client);
        pods.wait_for_importer_message("ns", "exit status 2")
            .await
            .unwrap();
    }
}
