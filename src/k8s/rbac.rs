//! ClusterRole / RoleBinding helpers for permission scenarios

use anyhow::{Context, Result};
use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule, RoleBinding, RoleRef, Subject};
use kube::api::{Api, PostParams};
use kube::core::ObjectMeta;
use tracing::info;

use super::{CleanupStack, K8sClient};
use crate::constants::CDI_API_GROUP;

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Who a role binding grants to
#[derive(Clone, Debug)]
pub struct BindingSubject {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl BindingSubject {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: "User".to_string(),
            name: name.into(),
            namespace: None,
        }
    }

    pub fn service_account(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind: "ServiceAccount".to_string(),
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    fn api_group(&self) -> Option<String> {
        (self.kind != "ServiceAccount").then(|| RBAC_API_GROUP.to_string())
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn cluster_role(
    name: &str,
    api_groups: &[&str],
    verbs: &[&str],
    resources: &[&str],
) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(strings(api_groups)),
            verbs: strings(verbs),
            resources: Some(strings(resources)),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

pub fn role_binding(
    name: &str,
    namespace: &str,
    subject: &BindingSubject,
    role_kind: &str,
    role_name: &str,
) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        subjects: Some(vec![Subject {
            kind: subject.kind.clone(),
            name: subject.name.clone(),
            namespace: subject.namespace.clone(),
            api_group: subject.api_group(),
        }]),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: role_kind.to_string(),
            name: role_name.to_string(),
        },
    }
}

pub struct RbacManager {
    client: K8sClient,
}

impl RbacManager {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }

    pub async fn create_cluster_role(
        &self,
        role: &ClusterRole,
        cleanup: &mut CleanupStack,
    ) -> Result<ClusterRole> {
        let api: Api<ClusterRole> = self.client.cluster_api();
        let created = api
            .create(&PostParams::default(), role)
            .await
            .context("Failed to create ClusterRole")?;
        let name = created.metadata.name.clone().unwrap_or_default();
        cleanup.delete_later(api, name.clone());
        info!("Created ClusterRole {}", name);
        Ok(created)
    }

    pub async fn create_role_binding(
        &self,
        binding: &RoleBinding,
        cleanup: &mut CleanupStack,
    ) -> Result<RoleBinding> {
        let namespace = binding
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| self.client.namespace().to_string());
        let api: Api<RoleBinding> = self.client.api_in(&namespace);
        let created = api
            .create(&PostParams::default(), binding)
            .await
            .context("Failed to create RoleBinding")?;
        let name = created.metadata.name.clone().unwrap_or_default();
        cleanup.delete_later(api, name.clone());
        info!("Created RoleBinding {}/{}", namespace, name);
        Ok(created)
    }

    /// Grant `verbs` on CDI `resources` to `subject` within `namespace`
    pub async fn set_permissions(
        &self,
        role_name: &str,
        verbs: &[&str],
        resources: &[&str],
        binding_name: &str,
        namespace: &str,
        subject: &BindingSubject,
        cleanup: &mut CleanupStack,
    ) -> Result<()> {
        let role = cluster_role(role_name, &[CDI_API_GROUP], verbs, resources);
        self.create_cluster_role(&role, cleanup).await?;

        let binding = role_binding(binding_name, namespace, subject, "ClusterRole", role_name);
        self.create_role_binding(&binding, cleanup).await?;
        Ok(())
    }

    /// Bind an existing cluster role, e.g. `admin` or `edit`
    pub async fn bind_cluster_role(
        &self,
        binding_name: &str,
        namespace: &str,
        subject: &BindingSubject,
        role_name: &str,
        cleanup: &mut CleanupStack,
    ) -> Result<()> {
        let binding = role_binding(binding_name, namespace, subject, "ClusterRole", role_name);
        self.create_role_binding(&binding, cleanup).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::mock::MockService;

    #[test]
    fn test_cluster_role_rule() {
        let role = cluster_role(
            "datavolume-cluster-role",
            &[CDI_API_GROUP],
            &["create", "delete"],
            &["datavolumes", "datavolumes/source"],
        );
        let rule = &role.rules.unwrap()[0];
        assert_eq!(rule.api_groups.as_ref().unwrap(), &vec!["cdi.kubevirt.io"]);
        assert_eq!(rule.verbs, vec!["create", "delete"]);
    }

    #[test]
    fn test_service_account_subject_has_no_api_group() {
        let sa = BindingSubject::service_account("default", "dst-ns");
        let binding = role_binding("rb", "src-ns", &sa, "ClusterRole", "cr");
        let subject = &binding.subjects.unwrap()[0];
        assert_eq!(subject.namespace.as_deref(), Some("dst-ns"));
        assert!(subject.api_group.is_none());

        let user = BindingSubject::user("unprivileged-user");
        let binding = role_binding("rb", "src-ns", &user, "ClusterRole", "cr");
        assert_eq!(
            binding.subjects.unwrap()[0].api_group.as_deref(),
            Some(RBAC_API_GROUP)
        );
    }

    #[tokio::test]
    async fn test_set_permissions_registers_cleanup() {
        let service = MockService::new()
            .on_post(
                "/apis/rbac.authorization.k8s.io/v1/clusterroles",
                201,
                &serde_json::to_string(&cluster_role("cr", &[CDI_API_GROUP], &["*"], &["*"]))
                    .unwrap(),
            )
            .on_post(
                "/apis/rbac.authorization.k8s.io/v1/namespaces/ns/rolebindings",
                201,
                &serde_json::to_string(&role_binding(
                    "rb",
                    "ns",
                    &BindingSubject::user("u"),
                    "ClusterRole",
                    "cr",
                ))
                .unwrap(),
            );
        let recorder = service.recorder();
        let client = service.into_k8s("ns");

        let mut cleanup = CleanupStack::new(false);
        RbacManager::new(client)
            .set_permissions(
                "cr",
                &["*"],
                &["datavolumes"],
                "rb",
                "ns",
                &BindingSubject::user("u"),
                &mut cleanup,
            )
            .await
            .unwrap();

        assert_eq!(cleanup.len(), 2);
        let sent = recorder.lock().unwrap();
        assert_eq!(sent[0].json()["rules"][0]["resources"][0], "datavolumes");
        assert_eq!(sent[1].json()["roleRef"]["name"], "cr");
    }
}
