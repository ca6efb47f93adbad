//! KubeVirt integration module
//!
//! VirtualMachines built on DataVolumes, their instances, snapshots and
//! the memory dump / hotplug subresources.

pub mod snapshot;
pub mod subresource;
pub mod vm;
pub mod vmi;

pub use snapshot::SnapshotManager;
pub use subresource::{Hotplug, SubresourceManager};
pub use vm::{VirtualMachineManager, VmBuilder};
pub use vmi::VmiManager;
