//! VM snapshot and restore scenarios

use anyhow::Result;
use tracing::info;

use super::ScenarioContext;
use crate::constants::{images, TIMEOUT_10MIN};
use crate::error::StorageError;
use crate::k8s::BindingSubject;
use crate::kubevirt::snapshot::check_snapshot_indication;
use crate::kubevirt::{SnapshotManager, VmBuilder};

impl ScenarioContext {
    /// Skip unless a VolumeSnapshotClass serves the scenario storage class
    async fn require_snapshots(&self) -> Result<String> {
        let sc = self.storage_class().await?;
        if !self.storage().snapshot_supported(&sc).await? {
            return Err(StorageError::missing(format!("VolumeSnapshotClass for {sc}")).into());
        }
        Ok(sc)
    }

    /// Cirros VM owning its DV through a template, left running
    async fn snapshot_vm(&mut self, name: &str) -> Result<String> {
        let ns = self.namespace();
        let dv = self
            .dv(&format!("{name}-dv"))
            .await?
            .http(self.config.cirros_qcow2_url())
            .size(images::cirros::DEFAULT_DV_SIZE)
            .build();
        let vm = VmBuilder::new(name, &ns).data_volume_template(&dv).build();

        let vms = self.vms();
        vms.create(&vm, &mut self.cleanup).await?;
        vms.wait_ready(name, &ns, self.config.timeouts.vm_ready())
            .await?;
        Ok(name.to_string())
    }
}

pub(super) async fn restore_offline(ctx: &mut ScenarioContext) -> Result<String> {
    ctx.require_snapshots().await?;
    let ns = ctx.namespace();
    let vm = ctx.snapshot_vm("vm-snapshot-offline").await?;

    let vms = ctx.vms();
    vms.stop(&vm, &ns).await?;
    vms.wait_stopped(&vm, &ns, ctx.config.timeouts.vm_ready())
        .await?;

    let snapshots = ctx.snapshots();
    let snap_name = format!("{vm}-snap");
    snapshots
        .create_snapshot(&snap_name, &ns, &vm, &mut ctx.cleanup)
        .await?;
    let snap = snapshots
        .wait_snapshot_ready(&snap_name, &ns, ctx.config.timeouts.snapshot())
        .await?;
    check_snapshot_indication(&snap, false)?;

    let restore_name = format!("{vm}-restore");
    snapshots
        .create_restore(&restore_name, &ns, &vm, &snap_name, &mut ctx.cleanup)
        .await?;
    snapshots
        .wait_restore_done(&restore_name, &ns, TIMEOUT_10MIN)
        .await?;
    info!("VM {} restored from {}", vm, snap_name);

    vms.start(&vm, &ns).await?;
    vms.wait_ready(&vm, &ns, ctx.config.timeouts.vm_ready())
        .await?;
    Ok(format!("{vm} restored from offline snapshot {snap_name} and booted"))
}

pub(super) async fn online(ctx: &mut ScenarioContext) -> Result<String> {
    ctx.require_snapshots().await?;
    let ns = ctx.namespace();
    let vm = ctx.snapshot_vm("vm-snapshot-online").await?;

    let snapshots = ctx.snapshots();
    let snap_name = format!("{vm}-snap");
    snapshots
        .create_snapshot(&snap_name, &ns, &vm, &mut ctx.cleanup)
        .await?;
    let snap = snapshots
        .wait_snapshot_ready(&snap_name, &ns, ctx.config.timeouts.snapshot())
        .await?;
    check_snapshot_indication(&snap, true)?;
    Ok(format!("online snapshot {snap_name} of running {vm} is ready"))
}

pub(super) async fn forbidden(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let (client, user) = ctx.unprivileged()?;
    let vm = ctx.snapshot_vm("vm-snapshot-denied").await?;

    // view lets the user see the VM but not snapshot it
    ctx.rbac()
        .bind_cluster_role(
            "snapshot-view",
            &ns,
            &BindingSubject::user(&user),
            "view",
            &mut ctx.cleanup,
        )
        .await?;

    SnapshotManager::new(client)
        .expect_snapshot_forbidden(&format!("{vm}-snap"), &ns, &vm)
        .await?;
    Ok(format!("{user} was denied a snapshot of {vm}"))
}
