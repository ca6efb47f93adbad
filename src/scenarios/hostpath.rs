//! HostPath provisioner scenarios
//!
//! Resource checks look at what the HPP operator deployed in the HCO
//! namespace; the storage checks pin volumes to a worker node (Immediate
//! binding) or let the first consumer pick it (WaitForFirstConsumer).

use anyhow::Result;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::ResourceExt;

use super::ScenarioContext;
use crate::cdi::datavolume::scratch_pvc_name;
use crate::cdi::hpp::{
    admin_service_account_user, is_namespace_uid, run_as_user, verify_hpp_app_labels,
};
use crate::cdi::storage::{self, scc_users, BINDING_IMMEDIATE, BINDING_WFFC};
use crate::cdi::{DataVolume, DataVolumeBuilder, DvPhase};
use crate::checks::{assert_disk_img, assert_provision_on_node, assert_selected_node};
use crate::constants::{
    images, HOSTPATH_PROVISIONER_ADMIN, HOSTPATH_PROVISIONER_OPERATOR, TIMEOUT_10MIN,
    TIMEOUT_1MIN, TIMEOUT_2MIN, TIMEOUT_3MIN, TIMEOUT_5MIN, TIMEOUT_5SEC,
};
use crate::ensure_that;
use crate::error::StorageError;
use crate::k8s::pod::{node_name, pod_phase, PHASE_RUNNING};
use crate::k8s::pvc::{self, PHASE_BOUND, PHASE_PENDING};
use crate::k8s::PvcBuilder;
use crate::utils::{Sample, TimeoutSampler};

fn sc_name(sc: &StorageClass) -> String {
    sc.name_any()
}

fn pod_service_account(spec: Option<&PodSpec>) -> Option<&str> {
    spec.and_then(|s| {
        s.service_account_name
            .as_deref()
            .or(s.service_account.as_deref())
    })
}

impl ScenarioContext {
    /// Cirros import on an HPP storage class, optionally pinned to `node`
    fn hpp_dv(&self, name: &str, sc: &StorageClass, node: Option<&str>) -> DataVolumeBuilder {
        let builder = DataVolumeBuilder::new(name, self.namespace())
            .http(self.config.cirros_qcow2_url())
            .size(images::cirros::DEFAULT_DV_SIZE)
            .storage_class(sc_name(sc))
            .bind_immediately();
        match node {
            Some(node) => builder.provision_on_node(node),
            None => builder,
        }
    }

    /// Skip unless CDI puts scratch space on an HPP storage class
    async fn require_hpp_scratch(&self) -> Result<()> {
        let storage = self.storage();
        let scratch = storage.scratch_space_storage_class().await?;
        let hpp: Vec<String> = storage
            .hpp_storage_classes()
            .await?
            .iter()
            .map(sc_name)
            .collect();
        match scratch {
            Some(sc) if hpp.contains(&sc) => Ok(()),
            other => Err(StorageError::missing(format!(
                "HPP scratch space storage class (CDIConfig has {other:?})"
            ))
            .into()),
        }
    }

    /// Run a VM from `dv` and check where its launcher landed
    async fn verify_dv_via_launcher(&mut self, dv: &DataVolume, node: &str) -> Result<()> {
        let ns = self.namespace();
        let vm = self.run_vm_from_dv(dv).await?;
        let vmis = self.vmis();
        let launcher = vmis.launcher_pod(&vm, &ns).await?;
        let launcher_node = node_name(&launcher);
        ensure_that!(
            launcher_node.as_deref() == Some(node),
            "virt-launcher of {vm} runs on {launcher_node:?}, expected {node}"
        );
        vmis.verify_disk_image(&vm, &ns).await
    }
}

pub(super) async fn custom_resource(ctx: &mut ScenarioContext) -> Result<String> {
    let hpp = ctx.hpp();
    hpp.cr().await?;

    TimeoutSampler::new(TIMEOUT_1MIN, TIMEOUT_5SEC)
        .waiting_for("HostPathProvisioner condition Available=True")
        .wait_until(|| {
            let hpp = &hpp;
            async move { Ok(hpp.cr().await?.is_available()) }
        })
        .await?;
    Ok("HostPathProvisioner is Available".to_string())
}

pub(super) async fn daemonset(ctx: &mut ScenarioContext) -> Result<String> {
    let hpp = ctx.hpp();
    let cr = hpp.cr().await?;
    let ds: DaemonSet = hpp.daemonset(cr.cr_suffix()).await?;
    let status = ds.status.unwrap_or_default();
    ensure_that!(
        status.desired_number_scheduled > 0
            && status.number_ready == status.desired_number_scheduled,
        "DaemonSet {}: {} of {} pods ready",
        ds.metadata.name.unwrap_or_default(),
        status.number_ready,
        status.desired_number_scheduled
    );
    Ok(format!("{} HPP pods ready", status.number_ready))
}

pub(super) async fn operator(ctx: &mut ScenarioContext) -> Result<String> {
    let hco_ns = ctx.config.hco_namespace.clone();
    let hpp = ctx.hpp();
    hpp.cr().await?;
    hpp.operator_deployment().await?;

    let pod = ctx
        .pods()
        .by_name_prefix(&hco_ns, HOSTPATH_PROVISIONER_OPERATOR)
        .await?
        .ok_or_else(|| {
            StorageError::assertion(format!("no {HOSTPATH_PROVISIONER_OPERATOR} pod in {hco_ns}"))
        })?;
    let phase = pod_phase(&pod);
    ensure_that!(
        phase.as_deref() == Some(PHASE_RUNNING),
        "HPP operator pod {} is {phase:?}",
        pod.name_any()
    );
    Ok(format!("operator pod {} running", pod.name_any()))
}

pub(super) async fn service_account(ctx: &mut ScenarioContext) -> Result<String> {
    let hpp = ctx.hpp();
    let cr = hpp.cr().await?;
    let suffix = cr.cr_suffix();
    let sa = hpp.service_account(suffix).await?.name_any();

    let ds = hpp.daemonset(suffix).await?;
    let ds_sa = pod_service_account(ds.spec.as_ref().and_then(|s| s.template.spec.as_ref()));
    ensure_that!(
        ds_sa == Some(sa.as_str()),
        "HPP daemonset's serviceAccount {ds_sa:?} is not {sa}"
    );

    // Pool deployments exist only for PVC-backed storage pools
    let pools: Vec<Deployment> = hpp.pool_deployments().await?;
    for pool in &pools {
        let pool_sa =
            pod_service_account(pool.spec.as_ref().and_then(|s| s.template.spec.as_ref()));
        ensure_that!(
            pool_sa == Some(sa.as_str()),
            "HPP pool deployment {}'s serviceAccount {pool_sa:?} is not {sa}",
            pool.name_any()
        );
    }
    Ok(format!("daemonset and {} pool deployments use {sa}", pools.len()))
}

pub(super) async fn cluster_role(ctx: &mut ScenarioContext) -> Result<String> {
    let hpp = ctx.hpp();
    let cr = hpp.cr().await?;
    let role = hpp.cluster_role(cr.cluster_role_suffix()).await?;
    let binding = hpp.cluster_role_binding(cr.cluster_role_suffix()).await?;

    let expected = format!("{HOSTPATH_PROVISIONER_ADMIN}{}", cr.cr_suffix());
    let subject = binding
        .subjects
        .as_ref()
        .and_then(|s| s.first())
        .map(|s| s.name.as_str());
    ensure_that!(
        subject == Some(expected.as_str()),
        "ClusterRoleBinding {} subject is {subject:?}, expected {expected}",
        binding.name_any()
    );
    Ok(format!("{} bound to {expected}", role.name_any()))
}

pub(super) async fn app_labels(ctx: &mut ScenarioContext) -> Result<String> {
    let cnv_version = ctx
        .config
        .cnv_version
        .clone()
        .ok_or_else(|| StorageError::missing("CNV version"))?;
    let hpp = ctx.hpp();
    let cr = hpp.cr().await?;
    let resources = hpp.owned_resources(&cr).await?;
    let checked = verify_hpp_app_labels(&resources, &cnv_version)?;
    Ok(format!("{checked} HPP resources labelled for {cnv_version}"))
}

pub(super) async fn scc(ctx: &mut ScenarioContext) -> Result<String> {
    let hpp = ctx.hpp();
    let cr = hpp.cr().await?;
    let scc = hpp.scc(cr.cr_suffix()).await?;

    let expected = admin_service_account_user(&ctx.config.hco_namespace, cr.cr_suffix());
    let users = scc_users(&scc);
    ensure_that!(
        users.first() == Some(&expected),
        "SCC {} users are {users:?}, expected {expected} first",
        scc.name_any()
    );
    Ok(format!("{} grants {expected}", scc.name_any()))
}

pub(super) async fn operator_run_as_user(ctx: &mut ScenarioContext) -> Result<String> {
    let hco_ns = ctx.config.hco_namespace.clone();
    let hpp = ctx.hpp();
    let cr = hpp.cr().await?;
    hpp.scc(cr.cr_suffix()).await?;

    let pod = ctx
        .pods()
        .by_name_prefix(&hco_ns, HOSTPATH_PROVISIONER_OPERATOR)
        .await?
        .ok_or_else(|| {
            StorageError::assertion(format!("no {HOSTPATH_PROVISIONER_OPERATOR} pod in {hco_ns}"))
        })?;
    let uid = run_as_user(&pod);
    ensure_that!(
        uid.is_some_and(is_namespace_uid),
        "HPP operator pod {} runs as user {uid:?}, expected a 10-digit UID",
        pod.name_any()
    );
    Ok(format!("operator pod {} runs as {uid:?}", pod.name_any()))
}

pub(super) async fn prometheus_resources(ctx: &mut ScenarioContext) -> Result<String> {
    let hpp = ctx.hpp();
    hpp.cr().await?;
    let missing = hpp.missing_prometheus_resources().await?;
    ensure_that!(
        missing.is_empty(),
        "HPP prometheus resources do not exist: {}",
        missing.join(", ")
    );
    Ok("HPP prometheus rule, service monitor, service and RBAC exist".to_string())
}

pub(super) async fn pod_references_pvc(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let sc = ctx.hpp_storage_class().await?;
    let worker = ctx.worker_node().await?;
    let node = (!storage::is_wffc(&sc)).then_some(worker.as_str());

    let name = "hpp-pod-reference";
    let dv = ctx.hpp_dv(name, &sc, node).build();
    let dvs = ctx.dvs();
    dvs.create(&dv, &mut ctx.cleanup).await?;
    dvs.wait_for_success(name, &ns, ctx.config.timeouts.import())
        .await?;

    let claim = dvs.pvc(name, &ns).await?;
    let expected = pvc::selected_node(&claim).unwrap_or(worker);
    let pod = ctx.pvc_pod(&format!("{name}-pod"), name).await?;
    let pods = ctx.pods();
    let actual = node_name(&pods.get(&pod, &ns).await?);
    ensure_that!(
        actual.as_deref() == Some(expected.as_str()),
        "pod {pod} runs on {actual:?}, expected {expected}"
    );
    assert_disk_img(&pods, &pod, &ns).await?;
    Ok(format!("pod on {expected} reads the image"))
}

pub(super) async fn immediate_without_node(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let sc = ctx.hpp_storage_class_with(BINDING_IMMEDIATE).await?;
    let name = "hpp-immediate-no-node";
    let dv = ctx.hpp_dv(name, &sc, None).build();
    let dvs = ctx.dvs();
    dvs.create(&dv, &mut ctx.cleanup).await?;
    dvs.wait_for_status(
        name,
        &ns,
        DvPhase::Pending,
        TIMEOUT_2MIN,
        Some(DvPhase::Succeeded),
    )
    .await?;
    Ok(format!("DataVolume on {} stays Pending without a node", sc_name(&sc)))
}

pub(super) async fn immediate_on_node(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let sc = ctx.hpp_storage_class_with(BINDING_IMMEDIATE).await?;
    let worker = ctx.worker_node().await?;
    let name = "hpp-immediate-node";
    let dv = ctx.hpp_dv(name, &sc, Some(&worker)).build();
    let dvs = ctx.dvs();
    dvs.create(&dv, &mut ctx.cleanup).await?;
    dvs.wait_for_success(name, &ns, TIMEOUT_10MIN).await?;
    Ok(format!("imported on {worker}"))
}

pub(super) async fn http_import(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let sc = ctx.hpp_storage_class_with(BINDING_IMMEDIATE).await?;
    let worker = ctx.worker_node().await?;
    let dvs = ctx.dvs();

    for (name, image) in [
        ("hpp-http-qcow2", images::cirros::QCOW2_IMG),
        ("hpp-http-raw", images::cirros::RAW_IMG),
    ] {
        let dv = ctx
            .hpp_dv(name, &sc, Some(&worker))
            .http(ctx.config.artifact_url(images::cirros::DIR, image))
            .build();
        dvs.create(&dv, &mut ctx.cleanup).await?;
        let dv = dvs
            .wait_for_success(name, &ns, ctx.config.timeouts.import())
            .await?;
        ctx.verify_dv_via_launcher(&dv, &worker).await?;
    }
    Ok(format!("qcow2 and raw images booted on {worker}"))
}

pub(super) async fn pvc_wait_for_consumer(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let sc = ctx.hpp_storage_class_with(BINDING_WFFC).await?;
    let name = "hpp-pvc-wffc";
    let claim = PvcBuilder::new(name, &ns)
        .size("1Gi")
        .storage_class(sc_name(&sc))
        .build();
    let pvcs = ctx.pvcs();
    pvcs.create(&claim, &mut ctx.cleanup).await?;
    pvcs.wait_for_status(name, &ns, PHASE_PENDING, TIMEOUT_1MIN, Some(PHASE_BOUND))
        .await?;

    let pod = ctx.pvc_pod(&format!("{name}-pod"), name).await?;
    let bound = pvcs
        .wait_for_status(name, &ns, PHASE_BOUND, TIMEOUT_1MIN, None)
        .await?;
    let pod_node = node_name(&ctx.pods().get(&pod, &ns).await?);
    let pvc_node = pvc::selected_node(&bound);
    assert_selected_node(pvc_node.as_deref(), pod_node.as_deref(), "regular")?;
    Ok(format!("PVC bound on {} by its first consumer", pod_node.unwrap_or_default()))
}

pub(super) async fn pvc_on_node(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let sc = ctx.hpp_storage_class_with(BINDING_IMMEDIATE).await?;
    let worker = ctx.worker_node().await?;
    let name = "hpp-pvc-node";
    let claim = PvcBuilder::new(name, &ns)
        .size("1Gi")
        .storage_class(sc_name(&sc))
        .provision_on_node(&worker)
        .build();
    let pvcs = ctx.pvcs();
    let created = pvcs.create(&claim, &mut ctx.cleanup).await?;
    assert_provision_on_node(&created, &worker)?;

    let pod = ctx.pvc_pod(&format!("{name}-pod"), name).await?;
    let pod_node = node_name(&ctx.pods().get(&pod, &ns).await?);
    ensure_that!(
        pod_node.as_deref() == Some(worker.as_str()),
        "pod {pod} runs on {pod_node:?}, expected {worker}"
    );

    let bound = pvcs
        .wait_for_status(name, &ns, PHASE_BOUND, TIMEOUT_1MIN, None)
        .await?;
    let pv_node = pvcs.bound_pv_node(&bound).await?;
    ensure_that!(
        pv_node.as_deref() == Some(worker.as_str()),
        "PV of {name} is pinned to {pv_node:?}, expected {worker}"
    );
    Ok(format!("PVC provisioned on {worker}"))
}

pub(super) async fn registry_import(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let sc = ctx.hpp_storage_class_with(BINDING_WFFC).await?;
    ctx.require_hpp_scratch().await?;

    let name = "hpp-registry-import";
    let dv = ctx
        .hpp_dv(name, &sc, None)
        .registry(format!("docker://quay.io/kubevirt/{}", images::cirros::DISK_DEMO))
        .build();
    let dvs = ctx.dvs();
    dvs.create(&dv, &mut ctx.cleanup).await?;

    let pvcs = ctx.pvcs();
    let scratch = TimeoutSampler::new(TIMEOUT_5MIN, TIMEOUT_5SEC)
        .waiting_for(format!("scratch PVC of {name} bound"))
        .wait_for(|| {
            let (pvcs, ns) = (&pvcs, ns.as_str());
            async move {
                let scratch = match pvcs.get_opt(&scratch_pvc_name(name), ns).await? {
                    Some(claim) => Some(claim),
                    None => pvcs.find_by_suffix(ns, "-scratch").await?,
                };
                Ok(match scratch {
                    Some(claim) if pvc::pvc_phase(&claim).as_deref() == Some(PHASE_BOUND) => {
                        Sample::Done(claim)
                    }
                    Some(claim) => Sample::observed(pvc::pvc_phase(&claim)),
                    None => Sample::observed("no scratch PVC"),
                })
            }
        })
        .await?;

    let pods = ctx.pods();
    let importer = pods.importer_pod(&ns).await?;
    let importer = pods
        .wait_for_phase(&importer.name_any(), &ns, PHASE_RUNNING, TIMEOUT_5MIN)
        .await?;
    assert_selected_node(
        pvc::selected_node(&scratch).as_deref(),
        node_name(&importer).as_deref(),
        "scratch",
    )?;

    let dv = dvs.wait_for_success(name, &ns, TIMEOUT_5MIN).await?;
    let node = pvc::selected_node(&dvs.pvc(name, &ns).await?)
        .ok_or_else(|| StorageError::assertion(format!("PVC {name} has no selected node")))?;
    ctx.verify_dv_via_launcher(&dv, &node).await?;
    Ok(format!("registry image imported with scratch space on {node}"))
}

pub(super) async fn clone_on_node(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let sc = ctx.hpp_storage_class_with(BINDING_IMMEDIATE).await?;
    let worker = ctx.worker_node().await?;
    let dvs = ctx.dvs();

    let source = "hpp-clone-source";
    let dv = ctx.hpp_dv(source, &sc, Some(&worker)).build();
    dvs.create(&dv, &mut ctx.cleanup).await?;
    dvs.wait_for_success(source, &ns, TIMEOUT_5MIN).await?;
    assert_provision_on_node(&dvs.pvc(source, &ns).await?, &worker)?;

    let target = "hpp-clone-target";
    let dv = DataVolumeBuilder::new(target, &ns)
        .clone_from(source, &ns)
        .size(images::cirros::DEFAULT_DV_SIZE)
        .storage_class(sc_name(&sc))
        .provision_on_node(&worker)
        .build();
    dvs.create(&dv, &mut ctx.cleanup).await?;

    let dv = dvs.wait_for_success(target, &ns, TIMEOUT_10MIN).await?;
    assert_provision_on_node(&dvs.pvc(target, &ns).await?, &worker)?;

    let vm = ctx.run_vm_from_dv(&dv).await?;
    ctx.vmis().wait_running(&vm, &ns, TIMEOUT_3MIN).await?;
    Ok(format!("{source} cloned to {target} on {worker}"))
}

pub(super) async fn operator_recreate(ctx: &mut ScenarioContext) -> Result<String> {
    let hpp = ctx.hpp();
    hpp.cr().await?;
    let sc = ctx.hpp_storage_class().await?;
    let name = sc_name(&sc);
    let binding_before = storage::binding_mode(&sc).to_string();

    let deployment = hpp.operator_deployment().await?;
    hpp.delete_operator_deployment().await?;
    hpp.wait_for_operator_replicas(deployment.metadata.uid.as_deref(), TIMEOUT_5MIN)
        .await?;

    let recreated = ctx.storage().storage_class(&name).await?;
    let binding_after = storage::binding_mode(&recreated);
    ensure_that!(
        binding_after == binding_before,
        "StorageClass {name} binding mode changed from {binding_before} to {binding_after}"
    );
    Ok(format!(
        "operator Deployment recreated; {name} still binds {binding_after}"
    ))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{config, context};
    use super::*;
    use crate::k8s::mock::{success_json, MockService};
    use serde_json::json;

    const HCO: &str = "openshift-cnv";
    const CR_PATH: &str =
        "/apis/hostpathprovisioner.kubevirt.io/v1beta1/hostpathprovisioners/hostpath-provisioner";
    const SCC_PATH: &str =
        "/apis/security.openshift.io/v1/securitycontextconstraints/hostpath-provisioner-csi";
    const OPERATOR_PATH: &str =
        "/apis/apps/v1/namespaces/openshift-cnv/deployments/hostpath-provisioner-operator";

    fn csi_cr() -> String {
        json!({
            "apiVersion": "hostpathprovisioner.kubevirt.io/v1beta1",
            "kind": "HostPathProvisioner",
            "metadata": {"name": "hostpath-provisioner"},
            "spec": {"storagePools": [{"name": "local", "path": "/var/hpvolumes"}]},
            "status": {"conditions": [{"type": "Available", "status": "True"}]}
        })
        .to_string()
    }

    fn scc_json(user: &str) -> String {
        json!({
            "apiVersion": "security.openshift.io/v1",
            "kind": "SecurityContextConstraints",
            "metadata": {"name": "hostpath-provisioner-csi"},
            "users": [user]
        })
        .to_string()
    }

    fn operator_pods(run_as_user: i64) -> String {
        json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "metadata": {},
            "items": [{
                "metadata": {"name": "hostpath-provisioner-operator-7c9d8-x2k4p", "namespace": HCO},
                "spec": {"containers": [{
                    "name": "hostpath-provisioner-operator",
                    "securityContext": {"runAsUser": run_as_user}
                }]},
                "status": {"phase": "Running"}
            }]
        })
        .to_string()
    }

    fn operator_deployment(uid: &str, ready: i32) -> String {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": HOSTPATH_PROVISIONER_OPERATOR, "namespace": HCO, "uid": uid},
            "spec": {
                "replicas": 1,
                "selector": {"matchLabels": {"name": HOSTPATH_PROVISIONER_OPERATOR}},
                "template": {"metadata": {}, "spec": {"containers": []}}
            },
            "status": {"readyReplicas": ready}
        })
        .to_string()
    }

    fn hpp_class(binding: &str) -> serde_json::Value {
        json!({
            "apiVersion": "storage.k8s.io/v1",
            "kind": "StorageClass",
            "metadata": {"name": "hostpath-csi-basic"},
            "provisioner": "kubevirt.io.hostpath-provisioner",
            "volumeBindingMode": binding
        })
    }

    fn assertion(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::Assertion(_))
        )
    }

    #[tokio::test]
    async fn test_scc_grants_admin_service_account() {
        let mock = MockService::new()
            .on_get(CR_PATH, 200, &csi_cr())
            .on_get(
                SCC_PATH,
                200,
                &scc_json("system:serviceaccount:openshift-cnv:hostpath-provisioner-admin-csi"),
            );
        let mut ctx = context(mock, config());

        let message = scc(&mut ctx).await.unwrap();
        assert!(message.contains("hostpath-provisioner-admin-csi"));
    }

    #[tokio::test]
    async fn test_scc_with_other_user_fails() {
        let mock = MockService::new().on_get(CR_PATH, 200, &csi_cr()).on_get(
            SCC_PATH,
            200,
            &scc_json("system:serviceaccount:openshift-cnv:hostpath-provisioner-admin"),
        );
        let mut ctx = context(mock, config());

        assert!(assertion(&scc(&mut ctx).await.unwrap_err()));
    }

    #[tokio::test]
    async fn test_missing_scc_fails() {
        let mock = MockService::new().on_get(CR_PATH, 200, &csi_cr());
        let mut ctx = context(mock, config());

        let err = operator_run_as_user(&mut ctx).await.unwrap_err();
        assert!(assertion(&err));
        assert!(err.to_string().contains("hostpath-provisioner-csi"));
    }

    #[tokio::test]
    async fn test_operator_runs_as_namespace_uid() {
        let pods = format!("/api/v1/namespaces/{HCO}/pods");
        let scc = scc_json("system:serviceaccount:openshift-cnv:hostpath-provisioner-admin-csi");
        let mock = MockService::new()
            .on_get(CR_PATH, 200, &csi_cr())
            .on_get(SCC_PATH, 200, &scc)
            .on_get(&pods, 200, &operator_pods(1_000_650_000));
        let mut ctx = context(mock, config());
        assert!(operator_run_as_user(&mut ctx).await.is_ok());

        let mock = MockService::new()
            .on_get(CR_PATH, 200, &csi_cr())
            .on_get(SCC_PATH, 200, &scc)
            .on_get(&pods, 200, &operator_pods(1001));
        let mut ctx = context(mock, config());
        assert!(assertion(&operator_run_as_user(&mut ctx).await.unwrap_err()));
    }

    #[tokio::test]
    async fn test_prometheus_resources_report_what_is_missing() {
        let monitoring = format!("/apis/monitoring.coreos.com/v1/namespaces/{HCO}");
        let mock = MockService::new()
            .on_get(CR_PATH, 200, &csi_cr())
            .on_get(
                &format!("{monitoring}/prometheusrules/prometheus-hpp-rules"),
                200,
                &json!({
                    "apiVersion": "monitoring.coreos.com/v1",
                    "kind": "PrometheusRule",
                    "metadata": {"name": "prometheus-hpp-rules", "namespace": HCO},
                    "spec": {"groups": []}
                })
                .to_string(),
            )
            .on_get(
                &format!("/api/v1/namespaces/{HCO}/services/hpp-prometheus-metrics"),
                200,
                &json!({
                    "apiVersion": "v1",
                    "kind": "Service",
                    "metadata": {"name": "hpp-prometheus-metrics", "namespace": HCO}
                })
                .to_string(),
            );
        let mut ctx = context(mock, config());

        let err = prometheus_resources(&mut ctx).await.unwrap_err();
        assert!(assertion(&err));
        let message = err.to_string();
        assert!(message.contains("ServiceMonitor/service-monitor-hpp"));
        assert!(message.contains("Role/hostpath-provisioner-monitoring"));
        assert!(message.contains("RoleBinding/hostpath-provisioner-monitoring"));
        assert!(!message.contains("PrometheusRule"));
        assert!(!message.contains("Service/hpp-prometheus-metrics"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_recreated_with_same_binding_mode() {
        let classes = "/apis/storage.k8s.io/v1/storageclasses";
        let mock = MockService::new()
            .on_get(CR_PATH, 200, &csi_cr())
            .on_get(
                classes,
                200,
                &json!({
                    "apiVersion": "storage.k8s.io/v1",
                    "kind": "StorageClassList",
                    "metadata": {},
                    "items": [hpp_class("WaitForFirstConsumer")]
                })
                .to_string(),
            )
            .on_get(
                &format!("{classes}/hostpath-csi-basic"),
                200,
                &hpp_class("WaitForFirstConsumer").to_string(),
            )
            .on_sequence(
                "GET",
                OPERATOR_PATH,
                vec![
                    (200, operator_deployment("old-uid", 1)),
                    (200, operator_deployment("old-uid", 1)),
                    (200, operator_deployment("new-uid", 0)),
                    (200, operator_deployment("new-uid", 1)),
                ],
            )
            .on_delete(OPERATOR_PATH, 200, &success_json());
        let recorder = mock.recorder();
        let mut ctx = context(mock, config());

        let message = operator_recreate(&mut ctx).await.unwrap();
        assert!(message.contains("WaitForFirstConsumer"));

        let recorded = recorder.lock().unwrap();
        assert!(recorded
            .iter()
            .any(|r| r.method == "DELETE" && r.path == OPERATOR_PATH));
        let deployment_reads = recorded
            .iter()
            .filter(|r| r.method == "GET" && r.path == OPERATOR_PATH)
            .count();
        assert_eq!(deployment_reads, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_recreate_detects_binding_mode_change() {
        let classes = "/apis/storage.k8s.io/v1/storageclasses";
        let mock = MockService::new()
            .on_get(CR_PATH, 200, &csi_cr())
            .on_get(
                classes,
                200,
                &json!({
                    "apiVersion": "storage.k8s.io/v1",
                    "kind": "StorageClassList",
                    "metadata": {},
                    "items": [hpp_class("WaitForFirstConsumer")]
                })
                .to_string(),
            )
            .on_get(
                &format!("{classes}/hostpath-csi-basic"),
                200,
                &hpp_class("Immediate").to_string(),
            )
            .on_sequence(
                "GET",
                OPERATOR_PATH,
                vec![
                    (200, operator_deployment("old-uid", 1)),
                    (200, operator_deployment("new-uid", 1)),
                ],
            )
            .on_delete(OPERATOR_PATH, 200, &success_json());
        let mut ctx = context(mock, config());

        let err = operator_recreate(&mut ctx).await.unwrap_err();
        assert!(assertion(&err));
        assert!(err.to_string().contains("binding mode changed"));
    }

    #[test]
    fn test_namespace_uid_digits() {
        assert!(is_namespace_uid(1_000_650_000));
        assert!(!is_namespace_uid(1001));
        assert!(!is_namespace_uid(10_000_000_000));
    }
}
