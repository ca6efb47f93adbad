//! Shared timeouts, image locations and well-known resource names

use std::time::Duration;

pub const TIMEOUT_1SEC: Duration = Duration::from_secs(1);
pub const TIMEOUT_5SEC: Duration = Duration::from_secs(5);
pub const TIMEOUT_10SEC: Duration = Duration::from_secs(10);
pub const TIMEOUT_20SEC: Duration = Duration::from_secs(20);
pub const TIMEOUT_30SEC: Duration = Duration::from_secs(30);
pub const TIMEOUT_1MIN: Duration = Duration::from_secs(60);
pub const TIMEOUT_2MIN: Duration = Duration::from_secs(2 * 60);
pub const TIMEOUT_3MIN: Duration = Duration::from_secs(3 * 60);
pub const TIMEOUT_4MIN: Duration = Duration::from_secs(4 * 60);
pub const TIMEOUT_5MIN: Duration = Duration::from_secs(5 * 60);
pub const TIMEOUT_10MIN: Duration = Duration::from_secs(10 * 60);
pub const TIMEOUT_12MIN: Duration = Duration::from_secs(12 * 60);

pub const CDI_API_GROUP: &str = "cdi.kubevirt.io";

pub const CDI_UPLOADPROXY: &str = "cdi-uploadproxy";
pub const CDI_UPLOAD: &str = "cdi-upload";
pub const IMPORTER_POD_PREFIX: &str = "importer";

pub const HOSTPATH_PROVISIONER: &str = "hostpath-provisioner";
pub const HOSTPATH_PROVISIONER_OPERATOR: &str = "hostpath-provisioner-operator";
pub const HOSTPATH_PROVISIONER_ADMIN: &str = "hostpath-provisioner-admin";
pub const HPP_POOL: &str = "hpp-pool";
pub const HPP_PROVISIONERS: &[&str] = &[
    "kubevirt.io.hostpath-provisioner",
    "kubevirt.io/hostpath-provisioner",
];

/// Importer exit message when content does not match the declared type
pub const ERR_EXIT_STATUS_2: &str = "exit status 2";
pub const ERR_CERT_UNKNOWN_AUTHORITY: &str = "certificate signed by unknown authority";
pub const ERR_CANNOT_CREATE_VM_SNAPSHOTS: &str =
    "cannot create resource \"virtualmachinesnapshots\"";

pub const HOTPLUG_DISK_SERIAL: &str = "1234567890";

/// Test images served by the artifact server
pub mod images {
    pub mod cirros {
        pub const DIR: &str = "cnv-tests/cirros-images/";
        pub const QCOW2_IMG: &str = "cirros-0.4.0-x86_64-disk.qcow2";
        pub const RAW_IMG: &str = "cirros-0.4.0-x86_64-disk.raw";
        pub const RAW_IMG_XZ: &str = "cirros-0.4.0-x86_64-disk.raw.xz";
        pub const RAW_IMG_GZ: &str = "cirros-0.4.0-x86_64-disk.raw.gz";
        pub const DISK_DEMO: &str = "cirros-container-disk-demo";
        pub const DEFAULT_DV_SIZE: &str = "1Gi";
        pub const DEFAULT_MEMORY_SIZE: &str = "128Mi";
    }

    pub mod cdi {
        pub const DIR: &str = "cnv-tests/cdi-test-images/";
        pub const QCOW2_IMG: &str = "cirros-qcow2.img";
        pub const TAR_IMG: &str = "archive.tar";
        pub const ISO_IMG: &str = "Core-current.iso";
    }

    pub const SMALL_DV_SIZE: &str = "200Mi";
}
