//! Scenarios that boot VMs on imported storage and exercise the KubeVirt
//! memory dump and hotplug subresources.
//!
//! Hotplug scenarios also live-migrate the VM when the storage profile
//! hands out ReadWriteMany volumes.

use anyhow::Result;
use tracing::{debug, info};

use super::ScenarioContext;
use crate::cdi::storage::VOLUME_MODE_FILESYSTEM;
use crate::cdi::DataVolume;
use crate::constants::{images, HOTPLUG_DISK_SERIAL, TIMEOUT_12MIN, TIMEOUT_3MIN, TIMEOUT_5MIN};
use crate::error::StorageError;
use crate::k8s::pod::node_name;
use crate::k8s::PvcBuilder;
use crate::kubevirt::subresource::Target;
use crate::kubevirt::{Hotplug, VmBuilder};

const ACCESS_MODE_RWX: &str = "ReadWriteMany";

impl ScenarioContext {
    /// Import cirros into `name` and wait for it
    async fn cirros_dv(&mut self, name: &str) -> Result<DataVolume> {
        let ns = self.namespace();
        let dv = self
            .dv(name)
            .await?
            .http(self.config.cirros_qcow2_url())
            .size(images::cirros::DEFAULT_DV_SIZE)
            .build();
        let dvs = self.dvs();
        dvs.create(&dv, &mut self.cleanup).await?;
        dvs.wait_for_success(name, &ns, self.config.timeouts.import())
            .await?;
        Ok(dv)
    }

    /// Running cirros VM on a fresh DV
    async fn running_vm(&mut self, dv_name: &str) -> Result<String> {
        let dv = self.cirros_dv(dv_name).await?;
        self.run_vm_from_dv(&dv).await
    }

    /// Migrate `vm` and check `volume` is still attached, when the scenario
    /// storage is RWX. Returns the node the VM landed on.
    async fn migrate_with_volume(&mut self, vm: &str, volume: &str) -> Result<Option<String>> {
        let ns = self.namespace();
        let sc = self.storage_class().await?;
        let access_mode = self.storage().profile(&sc).await?.access_mode().map(str::to_string);
        if access_mode.as_deref() != Some(ACCESS_MODE_RWX) {
            debug!("{} is {:?}, not migrating {}", sc, access_mode, vm);
            return Ok(None);
        }

        let vmis = self.vmis();
        let timeout = self.config.timeouts.vm_ready();
        let node = vmis.migrate(vm, &ns, timeout, &mut self.cleanup).await?;
        vmis.wait_volume_ready(vm, &ns, volume, TIMEOUT_3MIN).await?;
        Ok(Some(node))
    }

    /// Empty DV to hotplug
    async fn blank_dv(&mut self, name: &str) -> Result<String> {
        let ns = self.namespace();
        let dv = self
            .dv(name)
            .await?
            .blank()
            .size(images::SMALL_DV_SIZE)
            .build();
        let dvs = self.dvs();
        dvs.create(&dv, &mut self.cleanup).await?;
        dvs.wait_for_success(name, &ns, TIMEOUT_5MIN).await?;
        Ok(name.to_string())
    }
}

pub(super) async fn image_permissions(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let vm = ctx.running_vm("dv-image-permissions").await?;
    ctx.vmis().verify_image_permissions(&vm, &ns).await?;
    Ok(format!("disk.img in {vm} launcher is qemu:qemu rw-rw----"))
}

pub(super) async fn vm_on_different_node(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let nodes = ctx.client.schedulable_worker_nodes().await?;
    if nodes.len() < 2 {
        return Err(StorageError::missing("two schedulable worker nodes").into());
    }

    // Local storage cannot follow the VM to another node
    let sc = ctx.storage_class().await?;
    let profile = ctx.storage().profile(&sc).await?;
    if profile.access_mode() != Some(ACCESS_MODE_RWX) {
        return Err(StorageError::missing(format!("{ACCESS_MODE_RWX} access on {sc}")).into());
    }

    let name = "dv-different-node";
    let dv = ctx
        .dv(name)
        .await?
        .http(ctx.config.cirros_qcow2_url())
        .size(images::cirros::DEFAULT_DV_SIZE)
        .access_mode(ACCESS_MODE_RWX)
        .build();
    let dvs = ctx.dvs();
    dvs.create(&dv, &mut ctx.cleanup).await?;

    let importer = ctx.pods().importer_pod(&ns).await?;
    let importer_node = node_name(&importer)
        .ok_or_else(|| StorageError::assertion("importer pod has no node"))?;
    dvs.wait_for_success(name, &ns, TIMEOUT_12MIN).await?;

    let Some(target) = nodes.into_iter().find(|n| *n != importer_node) else {
        return Err(StorageError::missing(format!("worker node other than {importer_node}")).into());
    };
    let vm = VmBuilder::from_dv(&dv).on_node(&target).build();
    let vm_name = vm.metadata.name.clone().unwrap_or_default();
    let vms = ctx.vms();
    vms.create(&vm, &mut ctx.cleanup).await?;
    vms.wait_ready(&vm_name, &ns, ctx.config.timeouts.vm_ready())
        .await?;

    let vmi_node = ctx.vmis().node(&vm_name, &ns).await?;
    crate::ensure_that!(
        vmi_node != importer_node,
        "VMI {vm_name} runs on importer node {importer_node}"
    );
    Ok(format!("imported on {importer_node}, VM runs on {vmi_node}"))
}

pub(super) async fn memory_dump(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let sc = ctx.storage_class().await?;
    ctx.require_filesystem(&sc).await?;
    let vm = ctx.running_vm("dv-memory-dump").await?;

    let claim = "memory-dump-pvc";
    let pvc = PvcBuilder::new(claim, &ns)
        .storage_class(&sc)
        .volume_mode(VOLUME_MODE_FILESYSTEM)
        .size(images::cirros::DEFAULT_DV_SIZE)
        .build();
    ctx.pvcs().create(&pvc, &mut ctx.cleanup).await?;

    let subresources = ctx.subresources();
    subresources.memory_dump(&vm, &ns, claim).await?;
    subresources.wait_memory_dump_completed(&vm, &ns).await?;

    let vm_obj = ctx.vms().get(&vm, &ns).await?;
    let request = vm_obj
        .memory_dump_request()
        .ok_or_else(|| StorageError::assertion(format!("VM {vm} has no memoryDumpRequest")))?;
    crate::ensure_that!(
        request.claim_name == claim,
        "memory dump went to {} instead of {claim}",
        request.claim_name
    );
    let file_name = request.file_name.clone().unwrap_or_default();

    let pod = ctx.pvc_pod("memory-dump-consumer", claim).await?;
    let listing = ctx.pods().exec(&pod, &ns, &["ls", "-1", "/pvc"]).await?;
    crate::ensure_that!(
        !file_name.is_empty() && listing.lines().any(|l| l.trim() == file_name),
        "memory dump file {file_name:?} not found in {listing:?}"
    );
    info!("Memory dump {} present in {}", file_name, claim);

    subresources.remove_memory_dump(&vm, &ns).await?;
    subresources.wait_memory_dump_removed(&vm, &ns).await?;
    Ok(format!("{vm} memory dumped to {claim}/{file_name} and released"))
}

pub(super) async fn hotplug_with_serial(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let vm = ctx.running_vm("dv-hotplug-serial-boot").await?;
    let volume = ctx.blank_dv("dv-hotplug-serial").await?;

    ctx.subresources()
        .add_volume(
            &vm,
            &ns,
            &Hotplug::data_volume(&volume)
                .ephemeral()
                .serial(HOTPLUG_DISK_SERIAL),
        )
        .await?;

    let vmis = ctx.vmis();
    vmis.wait_volume_ready(&vm, &ns, &volume, TIMEOUT_3MIN)
        .await?;
    let vmi = vmis.get(&vm, &ns).await?;
    let serial = vmi.disk_serial(&volume);
    crate::ensure_that!(
        serial == Some(HOTPLUG_DISK_SERIAL),
        "hotplugged disk {volume} has serial {serial:?}, expected {HOTPLUG_DISK_SERIAL}"
    );

    let migrated = ctx.migrate_with_volume(&vm, &volume).await?;

    ctx.subresources()
        .remove_volume(&vm, &ns, &volume, Target::Instance)
        .await?;
    Ok(match migrated {
        Some(node) => format!(
            "{volume} hotplugged into {vm} with serial {HOTPLUG_DISK_SERIAL}, kept across migration to {node}"
        ),
        None => format!("{volume} hotplugged into {vm} with serial {HOTPLUG_DISK_SERIAL}"),
    })
}

pub(super) async fn hotplug_persist(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let vm = ctx.running_vm("dv-hotplug-persist-boot").await?;
    let volume = ctx.blank_dv("dv-hotplug-persist").await?;

    let subresources = ctx.subresources();
    subresources
        .add_volume(&vm, &ns, &Hotplug::data_volume(&volume))
        .await?;
    ctx.vmis()
        .wait_volume_ready(&vm, &ns, &volume, TIMEOUT_3MIN)
        .await?;
    subresources
        .wait_volume_persisted(&vm, &ns, &volume, TIMEOUT_3MIN)
        .await?;

    let vms = ctx.vms();
    let timeout = ctx.config.timeouts.vm_ready();
    vms.stop(&vm, &ns).await?;
    vms.wait_stopped(&vm, &ns, timeout).await?;
    vms.start(&vm, &ns).await?;
    vms.wait_ready(&vm, &ns, timeout).await?;

    // After a restart the volume is part of the domain, no longer hotplugged
    let vmi = ctx.vmis().wait_running(&vm, &ns, timeout).await?;
    let status = vmi
        .volume_status(&volume)
        .ok_or_else(|| StorageError::assertion(format!("{volume} missing from VMI {vm}")))?;
    crate::ensure_that!(
        status.hotplug_volume.is_none(),
        "{volume} is still a hotplug volume after restart"
    );

    Ok(match ctx.migrate_with_volume(&vm, &volume).await? {
        Some(node) => format!("{volume} persisted in {vm} across a restart and migration to {node}"),
        None => format!("{volume} persisted in {vm} across a restart"),
    })
}
