//! Scenario catalog
//!
//! Every storage scenario the suite knows, numbered and grouped by category.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scenario groups, in run order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Import,
    Upload,
    Clone,
    HostPath,
    Snapshot,
    Virt,
}

impl Category {
    pub fn all() -> [Category; 6] {
        [
            Category::Import,
            Category::Upload,
            Category::Clone,
            Category::HostPath,
            Category::Snapshot,
            Category::Virt,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Category::Import => "Import",
            Category::Upload => "Upload",
            Category::Clone => "Clone",
            Category::HostPath => "HostPath",
            Category::Snapshot => "Snapshot",
            Category::Virt => "Virt",
        }
    }

    /// Case-insensitive lookup; `hpp` is accepted for HostPath
    pub fn parse(s: &str) -> Option<Category> {
        match s.to_ascii_lowercase().as_str() {
            "import" => Some(Category::Import),
            "upload" => Some(Category::Upload),
            "clone" => Some(Category::Clone),
            "hostpath" | "hpp" => Some(Category::HostPath),
            "snapshot" => Some(Category::Snapshot),
            "virt" => Some(Category::Virt),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// All storage scenarios
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    // Import (1-15)
    HttpImport,
    ArchiveImport,
    SecureImport,
    BasicAuthImport,
    InvalidUrl,
    EmptyUrl,
    WrongContentType,
    UnpackCompressed,
    IncorrectCertificate,
    MissingCertConfigMap,
    BlankDisk,
    VirtualSize,
    RecreatePvc,
    ImporterNetwork,
    UnprivilegedImport,

    // Upload (16-18)
    UploadWithToken,
    UploadAsync,
    UploadScratchNode,

    // Clone (19-21)
    CloneDataVolume,
    CrossNamespaceClone,
    ClonePermissions,

    // HostPath provisioner (22-39)
    HppCustomResource,
    HppDaemonSet,
    HppOperator,
    HppServiceAccount,
    HppClusterRole,
    HppAppLabels,
    HppScc,
    HppOperatorRunAsUser,
    HppPrometheusResources,
    HppPodReferencesPvc,
    HppImmediateWithoutNode,
    HppImmediateOnNode,
    HppHttpImport,
    HppPvcWaitForConsumer,
    HppPvcOnNode,
    HppRegistryImport,
    HppCloneOnNode,
    HppOperatorRecreate,

    // Snapshot (40-42)
    SnapshotRestoreOffline,
    SnapshotOnline,
    SnapshotForbidden,

    // Virt (43-47)
    ImagePermissions,
    VmOnDifferentNode,
    MemoryDump,
    HotplugWithSerial,
    HotplugPersist,
}

impl Scenario {
    /// Get scenario number (1-47)
    pub fn number(&self) -> u8 {
        match self {
            Scenario::HttpImport => 1,
            Scenario::ArchiveImport => 2,
            Scenario::SecureImport => 3,
            Scenario::BasicAuthImport => 4,
            Scenario::InvalidUrl => 5,
            Scenario::EmptyUrl => 6,
            Scenario::WrongContentType => 7,
            Scenario::UnpackCompressed => 8,
            Scenario::IncorrectCertificate => 9,
            Scenario::MissingCertConfigMap => 10,
            Scenario::BlankDisk => 11,
            Scenario::VirtualSize => 12,
            Scenario::RecreatePvc => 13,
            Scenario::ImporterNetwork => 14,
            Scenario::UnprivilegedImport => 15,
            Scenario::UploadWithToken => 16,
            Scenario::UploadAsync => 17,
            Scenario::UploadScratchNode => 18,
            Scenario::CloneDataVolume => 19,
            Scenario::CrossNamespaceClone => 20,
            Scenario::ClonePermissions => 21,
            Scenario::HppCustomResource => 22,
            Scenario::HppDaemonSet => 23,
            Scenario::HppOperator => 24,
            Scenario::HppServiceAccount => 25,
            Scenario::HppClusterRole => 26,
            Scenario::HppAppLabels => 27,
            Scenario::HppScc => 28,
            Scenario::HppOperatorRunAsUser => 29,
            Scenario::HppPrometheusResources => 30,
            Scenario::HppPodReferencesPvc => 31,
            Scenario::HppImmediateWithoutNode => 32,
            Scenario::HppImmediateOnNode => 33,
            Scenario::HppHttpImport => 34,
            Scenario::HppPvcWaitForConsumer => 35,
            Scenario::HppPvcOnNode => 36,
            Scenario::HppRegistryImport => 37,
            Scenario::HppCloneOnNode => 38,
            Scenario::HppOperatorRecreate => 39,
            Scenario::SnapshotRestoreOffline => 40,
            Scenario::SnapshotOnline => 41,
            Scenario::SnapshotForbidden => 42,
            Scenario::ImagePermissions => 43,
            Scenario::VmOnDifferentNode => 44,
            Scenario::MemoryDump => 45,
            Scenario::HotplugWithSerial => 46,
            Scenario::HotplugPersist => 47,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::HttpImport => "HTTP Import",
            Scenario::ArchiveImport => "Archive Import",
            Scenario::SecureImport => "HTTPS Import",
            Scenario::BasicAuthImport => "Basic Auth Import",
            Scenario::InvalidUrl => "Invalid URL",
            Scenario::EmptyUrl => "Empty URL",
            Scenario::WrongContentType => "Wrong Content Type",
            Scenario::UnpackCompressed => "Compressed Image As Archive",
            Scenario::IncorrectCertificate => "Incorrect Certificate",
            Scenario::MissingCertConfigMap => "Missing Cert ConfigMap",
            Scenario::BlankDisk => "Blank Disk",
            Scenario::VirtualSize => "Virtual Image Size",
            Scenario::RecreatePvc => "PVC Re-created After Delete",
            Scenario::ImporterNetwork => "Importer Secondary Network",
            Scenario::UnprivilegedImport => "Unprivileged Import",
            Scenario::UploadWithToken => "Upload With Token",
            Scenario::UploadAsync => "Async Upload",
            Scenario::UploadScratchNode => "Upload Scratch Placement",
            Scenario::CloneDataVolume => "Clone DataVolume",
            Scenario::CrossNamespaceClone => "Cross Namespace Clone",
            Scenario::ClonePermissions => "Clone Permissions",
            Scenario::HppCustomResource => "HPP Custom Resource",
            Scenario::HppDaemonSet => "HPP DaemonSet",
            Scenario::HppOperator => "HPP Operator",
            Scenario::HppServiceAccount => "HPP ServiceAccount",
            Scenario::HppClusterRole => "HPP ClusterRole",
            Scenario::HppAppLabels => "HPP App Labels",
            Scenario::HppScc => "HPP SecurityContextConstraints",
            Scenario::HppOperatorRunAsUser => "HPP Operator RunAsUser",
            Scenario::HppPrometheusResources => "HPP Prometheus Resources",
            Scenario::HppPodReferencesPvc => "HPP Pod References PVC",
            Scenario::HppImmediateWithoutNode => "HPP Immediate Without Node",
            Scenario::HppImmediateOnNode => "HPP Immediate On Node",
            Scenario::HppHttpImport => "HPP HTTP Import",
            Scenario::HppPvcWaitForConsumer => "HPP PVC WaitForFirstConsumer",
            Scenario::HppPvcOnNode => "HPP PVC On Node",
            Scenario::HppRegistryImport => "HPP Registry Import",
            Scenario::HppCloneOnNode => "HPP Clone On Node",
            Scenario::HppOperatorRecreate => "HPP Operator Recreate",
            Scenario::SnapshotRestoreOffline => "Offline Snapshot And Restore",
            Scenario::SnapshotOnline => "Online Snapshot",
            Scenario::SnapshotForbidden => "Snapshot Without Permission",
            Scenario::ImagePermissions => "Disk Image Permissions",
            Scenario::VmOnDifferentNode => "VM On Different Node",
            Scenario::MemoryDump => "Memory Dump",
            Scenario::HotplugWithSerial => "Hotplug With Serial",
            Scenario::HotplugPersist => "Persistent Hotplug",
        }
    }

    pub fn category(&self) -> Category {
        match self.number() {
            1..=15 => Category::Import,
            16..=18 => Category::Upload,
            19..=21 => Category::Clone,
            22..=39 => Category::HostPath,
            40..=42 => Category::Snapshot,
            _ => Category::Virt,
        }
    }

    /// One-line description for `list --detailed`
    pub fn description(&self) -> &'static str {
        match self {
            Scenario::HttpImport => "qcow2 and iso over HTTP land as disk.img; populator use follows the CSI driver",
            Scenario::ArchiveImport => "tar imported with archive content type extracts 3 files",
            Scenario::SecureImport => "HTTPS import trusting the server CA from a ConfigMap",
            Scenario::BasicAuthImport => "import through the basic-auth port with a credentials Secret",
            Scenario::InvalidUrl => "non-existent URL keeps importing and reports Ready=False",
            Scenario::EmptyUrl => "DataVolume with an empty URL is rejected with 422",
            Scenario::WrongContentType => "qcow2 declared as archive fails the importer with exit status 2",
            Scenario::UnpackCompressed => "xz and gz images declared as archive fail with exit status 2",
            Scenario::IncorrectCertificate => "bogus CA makes the importer fail with unknown authority",
            Scenario::MissingCertConfigMap => "missing cert ConfigMap keeps the DataVolume ImportScheduled",
            Scenario::BlankDisk => "blank DataVolume succeeds",
            Scenario::VirtualSize => "qemu-img virtual size matches the request minus filesystem overhead",
            Scenario::RecreatePvc => "deleted PVC of an imported DataVolume is re-created and re-imported",
            Scenario::ImporterNetwork => "multus network annotation reaches the importer pod",
            Scenario::UnprivilegedImport => "namespace admin imports; stored apiVersion is v1beta1",
            Scenario::UploadWithToken => "upload through the proxy with an UploadTokenRequest token",
            Scenario::UploadAsync => "asynchronous upload endpoint accepts the image",
            Scenario::UploadScratchNode => "upload pod and scratch PVC land on the same node",
            Scenario::CloneDataVolume => "clone within a namespace succeeds and the clone has disk.img",
            Scenario::CrossNamespaceClone => "cross-namespace clone uses the StorageProfile clone strategy",
            Scenario::ClonePermissions => "clone is denied without datavolumes/source and allowed with it",
            Scenario::HppCustomResource => "HostPathProvisioner CR exists and is Available",
            Scenario::HppDaemonSet => "HPP daemonset has every pod ready",
            Scenario::HppOperator => "HPP operator deployment has available replicas",
            Scenario::HppServiceAccount => "daemonset and pool deployments run as the HPP admin SA",
            Scenario::HppClusterRole => "HPP ClusterRole and binding carry the expected names",
            Scenario::HppAppLabels => "HPP resources carry the HCO app.kubernetes.io labels",
            Scenario::HppScc => "HPP SCC grants the HPP admin service account",
            Scenario::HppOperatorRunAsUser => "HPP operator container runs as a 10-digit namespace UID",
            Scenario::HppPrometheusResources => "HPP alert rules, service monitor and metrics RBAC exist",
            Scenario::HppPodReferencesPvc => "pod using an HPP DataVolume runs on the volume's node",
            Scenario::HppImmediateWithoutNode => "Immediate HPP DataVolume without a node stays Pending",
            Scenario::HppImmediateOnNode => "Immediate HPP DataVolume pinned to a node succeeds",
            Scenario::HppHttpImport => "HPP HTTP import boots a VM on the pinned node",
            Scenario::HppPvcWaitForConsumer => "WFFC HPP PVC binds on the first consumer's node",
            Scenario::HppPvcOnNode => "Immediate HPP PVC with provisionOnNode binds on that node",
            Scenario::HppRegistryImport => "registry import schedules scratch and importer together",
            Scenario::HppCloneOnNode => "clone of a node-pinned HPP DataVolume stays on that node",
            Scenario::HppOperatorRecreate => "deleted HPP operator deployment comes back; binding mode unchanged",
            Scenario::SnapshotRestoreOffline => "snapshot a stopped VM, restore it and start it again",
            Scenario::SnapshotOnline => "snapshot of a running VM carries the Online indication",
            Scenario::SnapshotForbidden => "viewer cannot create VirtualMachineSnapshots",
            Scenario::ImagePermissions => "launcher sees disk.img owned by qemu with mode 0660",
            Scenario::VmOnDifferentNode => "RWX DataVolume boots a VM away from the importer node",
            Scenario::MemoryDump => "memory dump lands on a PVC and the request can be removed",
            Scenario::HotplugWithSerial => "ephemeral hotplug exposes the requested disk serial and survives migration on RWX",
            Scenario::HotplugPersist => "persistent hotplug survives a restart, and migration on RWX",
        }
    }

    /// Get all scenarios
    pub fn all() -> Vec<Scenario> {
        vec![
            Scenario::HttpImport,
            Scenario::ArchiveImport,
            Scenario::SecureImport,
            Scenario::BasicAuthImport,
            Scenario::InvalidUrl,
            Scenario::EmptyUrl,
            Scenario::WrongContentType,
            Scenario::UnpackCompressed,
            Scenario::IncorrectCertificate,
            Scenario::MissingCertConfigMap,
            Scenario::BlankDisk,
            Scenario::VirtualSize,
            Scenario::RecreatePvc,
            Scenario::ImporterNetwork,
            Scenario::UnprivilegedImport,
            Scenario::UploadWithToken,
            Scenario::UploadAsync,
            Scenario::UploadScratchNode,
            Scenario::CloneDataVolume,
            Scenario::CrossNamespaceClone,
            Scenario::ClonePermissions,
            Scenario::HppCustomResource,
            Scenario::HppDaemonSet,
            Scenario::HppOperator,
            Scenario::HppServiceAccount,
            Scenario::HppClusterRole,
            Scenario::HppAppLabels,
            Scenario::HppScc,
            Scenario::HppOperatorRunAsUser,
            Scenario::HppPrometheusResources,
            Scenario::HppPodReferencesPvc,
            Scenario::HppImmediateWithoutNode,
            Scenario::HppImmediateOnNode,
            Scenario::HppHttpImport,
            Scenario::HppPvcWaitForConsumer,
            Scenario::HppPvcOnNode,
            Scenario::HppRegistryImport,
            Scenario::HppCloneOnNode,
            Scenario::HppOperatorRecreate,
            Scenario::SnapshotRestoreOffline,
            Scenario::SnapshotOnline,
            Scenario::SnapshotForbidden,
            Scenario::ImagePermissions,
            Scenario::VmOnDifferentNode,
            Scenario::MemoryDump,
            Scenario::HotplugWithSerial,
            Scenario::HotplugPersist,
        ]
    }

    /// Parse from scenario number
    pub fn from_number(n: u8) -> Option<Scenario> {
        Self::all().into_iter().find(|s| s.number() == n)
    }

    pub fn in_category(category: Category) -> Vec<Scenario> {
        Self::all()
            .into_iter()
            .filter(|s| s.category() == category)
            .collect()
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scenario {}: {}", self.number(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_are_sequential() {
        for (idx, scenario) in Scenario::all().iter().enumerate() {
            assert_eq!(scenario.number() as usize, idx + 1, "{scenario:?}");
        }
    }

    #[test]
    fn test_from_number() {
        assert_eq!(Scenario::from_number(1), Some(Scenario::HttpImport));
        assert_eq!(Scenario::from_number(28), Some(Scenario::HppScc));
        assert_eq!(Scenario::from_number(47), Some(Scenario::HotplugPersist));
        assert_eq!(Scenario::from_number(0), None);
        assert_eq!(Scenario::from_number(48), None);
    }

    #[test]
    fn test_categories() {
        assert_eq!(Scenario::EmptyUrl.category(), Category::Import);
        assert_eq!(Scenario::UploadAsync.category(), Category::Upload);
        assert_eq!(Scenario::HppCloneOnNode.category(), Category::HostPath);
        assert_eq!(Scenario::HppOperatorRecreate.category(), Category::HostPath);
        assert_eq!(Scenario::SnapshotForbidden.category(), Category::Snapshot);
        assert_eq!(Scenario::MemoryDump.category(), Category::Virt);

        let total: usize = Category::all()
            .iter()
            .map(|c| Scenario::in_category(*c).len())
            .sum();
        assert_eq!(total, Scenario::all().len());
        assert_eq!(Scenario::in_category(Category::HostPath).len(), 18);
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(Category::parse("HPP"), Some(Category::HostPath));
        assert_eq!(Category::parse("Snapshot"), Some(Category::Snapshot));
        assert_eq!(Category::parse("routing"), None);
    }
}
