//! DataVolume clone scenarios
//!
//! Every clone starts from a cirros DataVolume imported into the test
//! namespace. Cross-namespace targets get their own namespace, removed at
//! teardown.

use anyhow::Result;
use k8s_openapi::api::core::v1::Namespace;

use super::ScenarioContext;
use crate::cdi::{DataVolumeBuilder, DataVolumeManager};
use crate::checks::{assert_disk_img, verify_snapshot_used_namespace_transfer};
use crate::constants::images;
use crate::error::{is_api_status, StorageError};
use crate::k8s::BindingSubject;

const SOURCE_DV: &str = "clone-source";

impl ScenarioContext {
    /// Import the cirros image into the source DV every clone starts from
    async fn clone_source(&mut self) -> Result<String> {
        let ns = self.namespace();
        let dv = self
            .dv(SOURCE_DV)
            .await?
            .http(self.config.cirros_qcow2_url())
            .size(images::cirros::DEFAULT_DV_SIZE)
            .build();
        let dvs = self.dvs();
        dvs.create(&dv, &mut self.cleanup).await?;
        dvs.wait_for_success(SOURCE_DV, &ns, self.config.timeouts.import())
            .await?;
        Ok(SOURCE_DV.to_string())
    }

    /// Create a namespace next to the test namespace, removed at teardown
    async fn target_namespace(&mut self, suffix: &str) -> Result<String> {
        let name = format!("{}-{suffix}", self.namespace());
        self.client.in_namespace(&name).ensure_namespace().await?;
        self.cleanup
            .delete_later(self.client.cluster_api::<Namespace>(), name.clone());
        Ok(name)
    }

    async fn clone_builder(&self, name: &str, namespace: &str) -> Result<DataVolumeBuilder> {
        let sc = self.storage_class().await?;
        Ok(DataVolumeBuilder::new(name, namespace)
            .clone_from(SOURCE_DV, self.namespace())
            .storage_class(sc)
            .size(images::cirros::DEFAULT_DV_SIZE)
            .bind_immediately())
    }
}

pub(super) async fn clone_data_volume(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    ctx.clone_source().await?;

    let name = "clone-target";
    let dv = ctx.clone_builder(name, &ns).await?.build();
    let dvs = ctx.dvs();
    dvs.create(&dv, &mut ctx.cleanup).await?;
    dvs.wait_for_success(name, &ns, ctx.config.timeouts.clone_dv())
        .await?;

    let pod = ctx.pvc_pod(&format!("{name}-pod"), name).await?;
    assert_disk_img(&ctx.pods(), &pod, &ns).await?;
    Ok(format!("{SOURCE_DV} cloned to {name}"))
}

pub(super) async fn cross_namespace_clone(ctx: &mut ScenarioContext) -> Result<String> {
    ctx.clone_source().await?;
    let target = ctx.target_namespace("clone").await?;

    let name = "clone-cross-ns";
    let dv = ctx.clone_builder(name, &target).await?.build();
    let dvs = ctx.dvs();
    dvs.create(&dv, &mut ctx.cleanup).await?;
    verify_snapshot_used_namespace_transfer(
        &dvs,
        &ctx.storage(),
        name,
        &target,
        ctx.config.timeouts.clone_dv(),
    )
    .await?;
    Ok(format!("{SOURCE_DV} cloned into {target}"))
}

pub(super) async fn clone_permissions(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let (client, user) = ctx.unprivileged()?;
    let subject = BindingSubject::user(&user);

    ctx.clone_source().await?;
    let target = ctx.target_namespace("clone-perm").await?;
    let rbac = ctx.rbac();
    rbac.bind_cluster_role("clone-target-edit", &target, &subject, "edit", &mut ctx.cleanup)
        .await?;

    let name = "clone-unprivileged";
    let dv = ctx.clone_builder(name, &target).await?.build();
    let dvs = DataVolumeManager::new(client);

    match dvs.create(&dv, &mut ctx.cleanup).await {
        Err(e) if is_api_status(&e, 403) => {}
        Err(e) => return Err(e),
        Ok(_) => {
            return Err(StorageError::assertion(format!(
                "{user} cloned from {ns} without permission on the source"
            ))
            .into())
        }
    }

    rbac.set_permissions(
        "datavolume-cluster-role",
        &["*"],
        &["datavolumes", "datavolumes/source"],
        "datavolume-role-binding",
        &ns,
        &subject,
        &mut ctx.cleanup,
    )
    .await?;

    dvs.create(&dv, &mut ctx.cleanup).await?;
    verify_snapshot_used_namespace_transfer(
        &dvs,
        &ctx.storage(),
        name,
        &target,
        ctx.config.timeouts.clone_dv(),
    )
    .await?;
    Ok(format!("{user} cloned into {target} once granted datavolumes/source"))
}
