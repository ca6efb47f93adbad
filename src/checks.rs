//! Assertions shared by scenarios
//!
//! Pure checks take already-fetched objects; the async ones exec into a pod
//! or fetch what they compare against.

use anyhow::Result;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use std::time::Duration;
use tracing::{debug, info};

use crate::cdi::storage::{self, StorageProfile};
use crate::cdi::{DataVolumeManager, StorageManager};
use crate::ensure_that;
use crate::k8s::pod::{PodManager, PVC_DEVICE_PATH, PVC_MOUNT_PATH};
use crate::k8s::pvc;

const DISK_IMG: &str = "disk.img";

/// `disk.img` is present on the PVC mounted in `pod`
pub async fn assert_disk_img(pods: &PodManager, pod: &str, namespace: &str) -> Result<()> {
    let output = pods.exec(pod, namespace, &["ls", "-1", PVC_DEVICE_PATH]).await?;
    ensure_that!(output.contains(DISK_IMG), "{DISK_IMG} is not in: {output}");
    Ok(())
}

/// Number of entries `ls -1` prints for the PVC mount
pub async fn assert_num_files_in_pod(
    pods: &PodManager,
    pod: &str,
    namespace: &str,
    expected: usize,
) -> Result<()> {
    let output = pods.exec(pod, namespace, &["ls", "-1", PVC_MOUNT_PATH]).await?;
    let found = output.matches('\n').count();
    ensure_that!(
        found == expected,
        "Number of files in pod is {found}, while the expected is {expected}"
    );
    Ok(())
}

/// CDI uses volume populators exactly when the provisioner is a CSI driver
pub fn assert_use_populator(
    pvc: &PersistentVolumeClaim,
    sc: &StorageClass,
    csi_drivers: &[String],
) -> Result<()> {
    let expected = csi_drivers.iter().any(|d| d == storage::provisioner(sc));
    let actual = pvc::use_populator(pvc);
    ensure_that!(
        actual == expected,
        "usePopulator is {actual}, expected {expected} for provisioner {}",
        storage::provisioner(sc)
    );
    Ok(())
}

/// The PVC's clone type annotation matches the StorageProfile's strategy
pub fn assert_pvc_snapshot_clone_annotation(
    pvc: &PersistentVolumeClaim,
    profile: &StorageProfile,
) -> Result<()> {
    let actual = pvc::clone_type(pvc);
    let expected = profile.clone_strategy().map(str::to_string);
    ensure_that!(
        actual == expected,
        "{}: {actual:?}, expected: {expected:?}",
        pvc::ANN_CLONE_TYPE
    );
    Ok(())
}

/// After a cross-namespace clone succeeds, snapshot-capable Immediate
/// storage must have used the profile's clone strategy
pub async fn verify_snapshot_used_namespace_transfer(
    dvs: &DataVolumeManager,
    storage: &StorageManager,
    name: &str,
    namespace: &str,
    timeout: Duration,
) -> Result<()> {
    let dv = dvs.wait_for_success(name, namespace, timeout).await?;
    let Some(sc_name) = dv.storage_class() else {
        debug!("DataVolume {} has no explicit storage class", name);
        return Ok(());
    };

    let sc = storage.storage_class(sc_name).await?;
    if storage.snapshot_supported(sc_name).await? && !storage::is_wffc(&sc) {
        let pvc = dvs.pvc(name, namespace).await?;
        let profile = storage.profile(sc_name).await?;
        assert_pvc_snapshot_clone_annotation(&pvc, &profile)?;
        info!("Clone of {} used {:?}", name, profile.clone_strategy());
    }
    Ok(())
}

pub fn assert_provision_on_node(pvc: &PersistentVolumeClaim, node: &str) -> Result<()> {
    let annotated = pvc::provision_on_node(pvc);
    ensure_that!(
        annotated.as_deref() == Some(node),
        "{} is {annotated:?}, expected {node}",
        pvc::ANN_PROVISION_ON_NODE
    );
    Ok(())
}

pub fn assert_selected_node(pvc_node: Option<&str>, pod_node: Option<&str>, kind: &str) -> Result<()> {
    ensure_that!(
        pvc_node.is_some() && pvc_node == pod_node,
        "{} on {kind} PVC is {pvc_node:?}, pod runs on {pod_node:?}",
        pvc::ANN_SELECTED_NODE
    );
    Ok(())
}

/// Integer size and `M`/`G` unit from a `qemu-img info` "virtual size" line,
/// e.g. `virtual size: 64 MiB (67108864 bytes)`
pub fn parse_virtual_size(line: &str) -> Option<(u64, char)> {
    let (_, rest) = line.split_once(':')?;
    let rest = rest.trim_start();
    let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    let size = rest[..digits_end].parse().ok()?;
    let unit = rest[digits_end..].trim_start().chars().next()?;
    matches!(unit, 'M' | 'G').then_some((size, unit))
}

/// Virtual size qemu-img should report for a DV of `size` `unit`i.
///
/// Filesystem volumes lose the filesystem overhead; a result under 1 GiB is
/// expressed in MiB.
pub fn expected_virtual_size(size: u64, unit: char, filesystem: bool, overhead: f64) -> (u64, char) {
    let mut value = size as f64;
    let mut unit = unit;
    if filesystem {
        value *= 1.0 - overhead;
        if value < 1.0 && unit == 'G' {
            value *= 1024.0;
            unit = 'M';
        }
    }
    (value.floor() as u64, unit)
}

pub fn assert_virtual_size(line: &str, expected: (u64, char)) -> Result<()> {
    let Some(found) = parse_virtual_size(line) else {
        return Err(crate::error::StorageError::assertion(format!(
            "Incorrect virtual size found on disk image {PVC_DEVICE_PATH}: {line}"
        ))
        .into());
    };
    ensure_that!(
        found == expected,
        "virtual size {}{}, expected {}{}",
        found.0,
        found.1,
        expected.0,
        expected.1
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pvc_with(annotations: serde_json::Value) -> PersistentVolumeClaim {
        serde_json::from_value(json!({
            "metadata": {"name": "dv-1", "namespace": "ns", "annotations": annotations},
            "spec": {}
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_virtual_size() {
        assert_eq!(
            parse_virtual_size("virtual size: 64 MiB (67108864 bytes)"),
            Some((64, 'M'))
        );
        assert_eq!(
            parse_virtual_size("virtual size: 12 GiB (13190918144 bytes)"),
            Some((12, 'G'))
        );
        assert_eq!(parse_virtual_size("virtual size: 1.8 GiB"), None);
        assert_eq!(parse_virtual_size("virtual size: 512 KiB"), None);
        assert_eq!(parse_virtual_size("no size here"), None);
    }

    #[test]
    fn test_expected_virtual_size() {
        assert_eq!(expected_virtual_size(64, 'M', false, 0.055), (64, 'M'));
        assert_eq!(expected_virtual_size(64, 'M', true, 0.055), (60, 'M'));
        assert_eq!(expected_virtual_size(13, 'G', true, 0.055), (12, 'G'));
        assert_eq!(expected_virtual_size(1, 'G', true, 0.055), (967, 'M'));
        assert_eq!(expected_virtual_size(1, 'G', false, 0.055), (1, 'G'));
    }

    #[test]
    fn test_assert_virtual_size() {
        assert!(assert_virtual_size("virtual size: 967 MiB (1014...)", (967, 'M')).is_ok());
        assert!(assert_virtual_size("virtual size: 1 GiB", (967, 'M')).is_err());
        assert!(assert_virtual_size("garbage", (1, 'G')).is_err());
    }

    #[test]
    fn test_use_populator() {
        let sc: StorageClass = serde_json::from_value(json!({
            "metadata": {"name": "rbd"},
            "provisioner": "openshift-storage.rbd.csi.ceph.com"
        }))
        .unwrap();
        let drivers = vec!["openshift-storage.rbd.csi.ceph.com".to_string()];

        let populated = pvc_with(json!({(pvc::ANN_USE_POPULATOR): "true"}));
        assert!(assert_use_populator(&populated, &sc, &drivers).is_ok());
        assert!(assert_use_populator(&populated, &sc, &[]).is_err());
    }

    #[test]
    fn test_clone_annotation_against_profile() {
        let profile: StorageProfile = serde_json::from_value(json!({
            "apiVersion": "cdi.kubevirt.io/v1beta1",
            "kind": "StorageProfile",
            "metadata": {"name": "rbd"},
            "spec": {},
            "status": {"cloneStrategy": "csi-clone"}
        }))
        .unwrap();

        let pvc = pvc_with(json!({(pvc::ANN_CLONE_TYPE): "csi-clone"}));
        assert!(assert_pvc_snapshot_clone_annotation(&pvc, &profile).is_ok());

        let copied = pvc_with(json!({(pvc::ANN_CLONE_TYPE): "copy"}));
        assert!(assert_pvc_snapshot_clone_annotation(&copied, &profile).is_err());
    }

    #[test]
    fn test_node_assertions() {
        let pvc = pvc_with(json!({(pvc::ANN_PROVISION_ON_NODE): "worker-1"}));
        assert!(assert_provision_on_node(&pvc, "worker-1").is_ok());
        assert!(assert_provision_on_node(&pvc, "worker-2").is_err());

        assert!(assert_selected_node(Some("w1"), Some("w1"), "source").is_ok());
        assert!(assert_selected_node(Some("w1"), Some("w2"), "scratch").is_err());
        assert!(assert_selected_node(None, None, "source").is_err());
    }
}
