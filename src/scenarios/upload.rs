//! Upload scenarios through the CDI upload proxy
//!
//! The cirros image is downloaded once per scenario and pushed with a token
//! from an UploadTokenRequest.

use anyhow::Result;
use tracing::info;

use super::ScenarioContext;
use crate::cdi::DvPhase;
use crate::checks::{assert_disk_img, assert_selected_node};
use crate::constants::{CDI_UPLOAD, TIMEOUT_30SEC, TIMEOUT_5SEC};
use crate::k8s::pod::node_name;
use crate::k8s::pvc::selected_node;
use crate::utils::{Sample, TimeoutSampler};

const SCRATCH_SUFFIX: &str = "-scratch";

async fn cirros_image(ctx: &ScenarioContext) -> Result<Vec<u8>> {
    let url = ctx.config.cirros_qcow2_url();
    let data = ctx.http.download(&url).await?;
    info!("Downloaded {} bytes from {}", data.len(), url);
    Ok(data)
}

/// Create an upload DV on the scenario storage class
async fn upload_ready_dv(ctx: &mut ScenarioContext, name: &str) -> Result<()> {
    let ns = ctx.namespace();
    let sc = ctx.storage_class().await?;
    ctx.uploads()
        .upload_dv(name, &ns, Some(&sc), &mut ctx.cleanup)
        .await?;
    Ok(())
}

pub(super) async fn upload_with_token(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let name = "upload-token";
    let data = cirros_image(ctx).await?;
    upload_ready_dv(ctx, name).await?;

    ctx.uploads().upload_with_token(&ns, name, &data).await?;
    ctx.dvs()
        .wait_for_success(name, &ns, ctx.config.timeouts.upload())
        .await?;

    let pod = ctx.pvc_pod(&format!("{name}-pod"), name).await?;
    assert_disk_img(&ctx.pods(), &pod, &ns).await?;
    Ok(format!("uploaded {} bytes with a token", data.len()))
}

pub(super) async fn upload_async(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let name = "upload-async";
    let data = cirros_image(ctx).await?;
    upload_ready_dv(ctx, name).await?;

    let uploads = ctx.uploads();
    let token = uploads.token(&ns, name).await?;
    let status = uploads.upload_image(&token, &data, true).await?;
    crate::ensure_that!(status == 200, "async upload returned HTTP {status}");

    ctx.dvs()
        .wait_for_status(
            name,
            &ns,
            DvPhase::Succeeded,
            ctx.config.timeouts.upload(),
            Some(DvPhase::Failed),
        )
        .await?;
    Ok("async upload accepted and processed".to_string())
}

pub(super) async fn upload_scratch_node(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let name = "upload-scratch";
    upload_ready_dv(ctx, name).await?;

    let pods = ctx.pods();
    let pvcs = ctx.pvcs();

    // The upload server pod and its scratch claim only live while the
    // upload is pending, and are named after the DV or its populator claim
    let (scratch_node, pod_node) = TimeoutSampler::new(TIMEOUT_30SEC, TIMEOUT_5SEC)
        .waiting_for(format!("scratch PVC and upload pod for {name}"))
        .wait_for(|| {
            let (pods, pvcs, ns) = (&pods, &pvcs, ns.as_str());
            async move {
                let Some(pod) = pods.by_name_prefix(ns, CDI_UPLOAD).await? else {
                    return Ok(Sample::observed("no upload pod"));
                };
                let scratch = pvcs.find_by_suffix(ns, SCRATCH_SUFFIX).await?;
                Ok(match (scratch.as_ref().and_then(selected_node), node_name(&pod)) {
                    (Some(scratch_node), Some(pod_node)) => {
                        Sample::Done((Some(scratch_node), Some(pod_node)))
                    }
                    observed => Sample::observed(observed),
                })
            }
        })
        .await?;

    assert_selected_node(scratch_node.as_deref(), pod_node.as_deref(), "scratch")?;
    Ok(format!(
        "scratch PVC and upload pod both on {}",
        pod_node.unwrap_or_default()
    ))
}
