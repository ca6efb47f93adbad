//! HTTP and registry import scenarios

use anyhow::Result;
use tracing::info;

use super::ScenarioContext;
use crate::cdi::datavolume::ANN_MULTUS_NETWORKS;
use crate::cdi::{storage, ContentType, DataVolumeManager, DvPhase};
use crate::checks::{
    assert_disk_img, assert_num_files_in_pod, assert_use_populator, assert_virtual_size,
    expected_virtual_size,
};
use crate::constants::{
    images, ERR_CERT_UNKNOWN_AUTHORITY, ERR_EXIT_STATUS_2, TIMEOUT_10SEC, TIMEOUT_1MIN,
    TIMEOUT_20SEC, TIMEOUT_4MIN, TIMEOUT_5MIN,
};
use crate::ensure_that;
use crate::error::{is_api_status, StorageError};
use crate::k8s::network::ANN_NETWORK_STATUS;
use crate::k8s::pod::PVC_DEVICE_PATH;
use crate::k8s::service::{cert_configmap, file_url_https_server, get_file_url};
use crate::k8s::{pvc, BindingSubject, PvcPod};
use crate::kubevirt::vm::RUN_STRATEGY_HALTED;
use crate::kubevirt::VmBuilder;
use crate::utils::TimeoutSampler;

const HTTPS_CERT_CONFIGMAP: &str = "https-cert";
const INTERNAL_HTTP_SERVICE: &str = "internal-http";
const LINUX_BRIDGE: &str = "br1test";

impl ScenarioContext {
    /// Copy the internal HTTPS server CA into the test namespace
    async fn https_cert_configmap(&mut self) -> Result<String> {
        let services = self.services();
        let pem = services
            .read_cert(
                &self.config.https_cert_configmap,
                &self.config.images_server.namespace,
            )
            .await?;
        let cm = cert_configmap(HTTPS_CERT_CONFIGMAP, &self.namespace(), &pem);
        services.create_configmap(&cm, &mut self.cleanup).await?;
        Ok(HTTPS_CERT_CONFIGMAP.to_string())
    }

    /// URL on the internal HTTP server, recreating its Service when gone
    async fn internal_http_url(&self, directory: &str, file_name: &str) -> Result<String> {
        self.services()
            .ensure_internal_http(INTERNAL_HTTP_SERVICE, &self.config.images_server.namespace)
            .await?;
        Ok(get_file_url(&self.config.images_server.http, directory, file_name))
    }
}

pub(super) async fn http_import(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let sc_name = ctx.storage_class().await?;
    let storage = ctx.storage();
    let sc = storage.storage_class(&sc_name).await?;
    let drivers = storage.csi_drivers().await?;
    let dvs = ctx.dvs();

    for (name, image) in [
        ("import-http-qcow2", images::cdi::QCOW2_IMG),
        ("import-http-iso", images::cdi::ISO_IMG),
    ] {
        let dv = ctx
            .dv(name)
            .await?
            .http(ctx.config.artifact_url(images::cdi::DIR, image))
            .size(images::cirros::DEFAULT_DV_SIZE)
            .build();
        dvs.create(&dv, &mut ctx.cleanup).await?;
        dvs.wait_for_success(name, &ns, ctx.config.timeouts.import())
            .await?;

        assert_use_populator(&dvs.pvc(name, &ns).await?, &sc, &drivers)?;
        let pod = ctx.pvc_pod(&format!("{name}-pod"), name).await?;
        assert_disk_img(&ctx.pods(), &pod, &ns).await?;
    }

    Ok(format!("qcow2 and iso imported on {sc_name}"))
}

pub(super) async fn archive_import(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let sc_name = ctx.storage_class().await?;
    ctx.require_filesystem(&sc_name).await?;

    let name = "import-http-archive";
    let dv = ctx
        .dv(name)
        .await?
        .http(ctx.config.artifact_url(images::cdi::DIR, images::cdi::TAR_IMG))
        .content_type(ContentType::Archive)
        .size(images::cirros::DEFAULT_DV_SIZE)
        .build();
    let dvs = ctx.dvs();
    dvs.create(&dv, &mut ctx.cleanup).await?;
    dvs.wait_for_success(name, &ns, ctx.config.timeouts.import())
        .await?;

    let pod = ctx.pvc_pod(&format!("{name}-pod"), name).await?;
    assert_num_files_in_pod(&ctx.pods(), &pod, &ns, 3).await?;
    Ok("archive extracted into 3 files".to_string())
}

pub(super) async fn secure_import(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let cm = ctx.https_cert_configmap().await?;

    let name = "import-https";
    let dv = ctx
        .dv(name)
        .await?
        .http(get_file_url(
            &ctx.config.images_server.https,
            "",
            images::cdi::QCOW2_IMG,
        ))
        .cert_configmap(&cm)
        .size(images::cirros::DEFAULT_DV_SIZE)
        .build();
    let dvs = ctx.dvs();
    dvs.create(&dv, &mut ctx.cleanup).await?;
    dvs.wait_for_success(name, &ns, ctx.config.timeouts.import())
        .await?;

    let pod = ctx.pvc_pod(&format!("{name}-pod"), name).await?;
    let pods = ctx.pods();
    assert_disk_img(&pods, &pod, &ns).await?;
    assert_num_files_in_pod(&pods, &pod, &ns, 1).await?;
    Ok(format!("imported over HTTPS trusting {cm}"))
}

pub(super) async fn basic_auth_import(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let secret = ctx.config.images_server.auth_secret.clone();
    ctx.services()
        .copy_secret(
            &secret,
            &ctx.config.images_server.namespace,
            &ns,
            &mut ctx.cleanup,
        )
        .await?;

    let name = "import-http-auth";
    let dv = ctx
        .dv(name)
        .await?
        .http(get_file_url(
            &ctx.config.images_server.http_auth,
            images::cirros::DIR,
            images::cirros::RAW_IMG_XZ,
        ))
        .secret(&secret)
        .content_type(ContentType::Kubevirt)
        .size("500Mi")
        .build();
    let dvs = ctx.dvs();
    dvs.create(&dv, &mut ctx.cleanup).await?;
    dvs.wait_for_success(name, &ns, ctx.config.timeouts.import())
        .await?;

    ctx.pvc_pod(&format!("{name}-pod"), name).await?;
    Ok(format!("imported with credentials from Secret {secret}"))
}

pub(super) async fn invalid_url(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let name = "import-invalid-url";
    let url = ctx
        .internal_http_url(images::cirros::DIR, "non-existent-image.qcow2")
        .await?;
    let dv = ctx
        .dv(name)
        .await?
        .http(url)
        .size(images::cirros::DEFAULT_DV_SIZE)
        .build();
    let dvs = ctx.dvs();
    dvs.create(&dv, &mut ctx.cleanup).await?;

    dvs.wait_for_status(
        name,
        &ns,
        DvPhase::ImportInProgress,
        TIMEOUT_5MIN,
        Some(DvPhase::Succeeded),
    )
    .await?;
    dvs.wait_for_condition(name, &ns, "Ready", "False", TIMEOUT_5MIN)
        .await?;
    Ok("import of a missing file stays in progress with Ready=False".to_string())
}

pub(super) async fn empty_url(ctx: &mut ScenarioContext) -> Result<String> {
    let dv = ctx
        .dv("import-empty-url")
        .await?
        .http("")
        .size(images::cirros::DEFAULT_DV_SIZE)
        .build();

    match ctx.dvs().create(&dv, &mut ctx.cleanup).await {
        Err(e) if is_api_status(&e, 422) => Ok("empty URL rejected with 422".to_string()),
        Err(e) => Err(e),
        Ok(_) => Err(StorageError::assertion("DataVolume with an empty URL was accepted").into()),
    }
}

/// Import `dv` and wait for the importer to crash with `message`
async fn expect_importer_failure(
    ctx: &mut ScenarioContext,
    dvs: &DataVolumeManager,
    name: &str,
    url: String,
    size: &str,
    message: &str,
) -> Result<()> {
    let ns = ctx.namespace();
    let dv = ctx
        .dv(name)
        .await?
        .http(url)
        .content_type(ContentType::Archive)
        .size(size)
        .build();
    dvs.create(&dv, &mut ctx.cleanup).await?;
    dvs.wait_for_status(
        name,
        &ns,
        DvPhase::ImportInProgress,
        TIMEOUT_1MIN,
        Some(DvPhase::Succeeded),
    )
    .await?;
    ctx.pods().wait_for_importer_message(&ns, message).await
}

pub(super) async fn wrong_content_type(ctx: &mut ScenarioContext) -> Result<String> {
    let dvs = ctx.dvs();
    let url = ctx
        .internal_http_url(images::cdi::DIR, images::cdi::QCOW2_IMG)
        .await?;
    expect_importer_failure(
        ctx,
        &dvs,
        "import-wrong-content-type",
        url,
        images::cirros::DEFAULT_DV_SIZE,
        ERR_EXIT_STATUS_2,
    )
    .await?;
    Ok(format!("qcow2 as archive failed with '{ERR_EXIT_STATUS_2}'"))
}

pub(super) async fn unpack_compressed(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let dvs = ctx.dvs();

    for (name, image) in [
        ("import-archive-xz", images::cirros::RAW_IMG_XZ),
        ("import-archive-gz", images::cirros::RAW_IMG_GZ),
    ] {
        let url = ctx.internal_http_url(images::cirros::DIR, image).await?;
        expect_importer_failure(ctx, &dvs, name, url, images::SMALL_DV_SIZE, ERR_EXIT_STATUS_2)
            .await?;

        // The next importer is found by prefix, so this one has to go first
        dvs.delete(name, &ns).await?;
        ctx.pods().wait_importer_gone(&ns).await?;
    }

    Ok("xz and gz images as archive both failed".to_string())
}

pub(super) async fn incorrect_certificate(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let cm = cert_configmap("https-cert-incorrect", &ns, "-----BEGIN CERTIFICATE-----");
    ctx.services()
        .create_configmap(&cm, &mut ctx.cleanup)
        .await?;

    let name = "import-incorrect-cert";
    let dv = ctx
        .dv(name)
        .await?
        .http(get_file_url(
            &ctx.config.images_server.https,
            "",
            images::cdi::QCOW2_IMG,
        ))
        .cert_configmap("https-cert-incorrect")
        .size(images::cirros::DEFAULT_DV_SIZE)
        .build();
    let dvs = ctx.dvs();
    dvs.create(&dv, &mut ctx.cleanup).await?;
    dvs.wait_for_status(
        name,
        &ns,
        DvPhase::ImportInProgress,
        TIMEOUT_1MIN,
        Some(DvPhase::Succeeded),
    )
    .await?;
    ctx.pods()
        .wait_for_importer_message(&ns, ERR_CERT_UNKNOWN_AUTHORITY)
        .await?;
    Ok(format!("importer failed with '{ERR_CERT_UNKNOWN_AUTHORITY}'"))
}

pub(super) async fn missing_cert_configmap(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let name = "import-missing-cert";
    let dv = ctx
        .dv(name)
        .await?
        .http(file_url_https_server(
            &ctx.config.images_server.https,
            images::cirros::QCOW2_IMG,
        ))
        .cert_configmap("wrong_name")
        .size(images::cirros::DEFAULT_DV_SIZE)
        .build();
    let dvs = ctx.dvs();
    dvs.create(&dv, &mut ctx.cleanup).await?;
    dvs.wait_for_status(
        name,
        &ns,
        DvPhase::ImportScheduled,
        TIMEOUT_1MIN,
        Some(DvPhase::Succeeded),
    )
    .await?;

    TimeoutSampler::new(TIMEOUT_1MIN, TIMEOUT_10SEC)
        .waiting_for(format!("DataVolume {name} to leave ImportScheduled"))
        .expect_unchanged(|| {
            let dvs = &dvs;
            let ns = ns.as_str();
            async move {
                let phase = dvs.get(name, ns).await?.phase();
                Ok(phase != DvPhase::ImportScheduled)
            }
        })
        .await?;
    Ok("DataVolume stayed ImportScheduled".to_string())
}

pub(super) async fn blank_disk(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let name = "blank-disk";
    let dv = ctx
        .dv(name)
        .await?
        .blank()
        .size(images::SMALL_DV_SIZE)
        .build();
    let dvs = ctx.dvs();
    dvs.create(&dv, &mut ctx.cleanup).await?;
    dvs.wait_for_success(name, &ns, TIMEOUT_5MIN).await?;
    Ok("blank DataVolume succeeded".to_string())
}

pub(super) async fn virtual_size(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let sc_name = ctx.storage_class().await?;
    let overhead = ctx.storage().filesystem_overhead(&sc_name).await?;
    let cm = ctx.https_cert_configmap().await?;
    let dvs = ctx.dvs();
    let mut checked = Vec::new();

    for (size, unit) in [(64, 'M'), (1, 'G'), (13, 'G')] {
        let name = format!("import-size-{size}{}", unit.to_ascii_lowercase());
        let dv = ctx
            .dv(&name)
            .await?
            .http(get_file_url(
                &ctx.config.images_server.https,
                "",
                images::cdi::QCOW2_IMG,
            ))
            .cert_configmap(&cm)
            .size(format!("{size}{unit}i"))
            .build();
        dvs.create(&dv, &mut ctx.cleanup).await?;
        let dv = dvs.wait_for_success(&name, &ns, TIMEOUT_4MIN).await?;

        let vm = VmBuilder::from_dv(&dv)
            .run_strategy(RUN_STRATEGY_HALTED)
            .build();
        ctx.vms().create(&vm, &mut ctx.cleanup).await?;

        let claim = dvs.pvc(&name, &ns).await?;
        let filesystem = pvc::volume_mode(&claim).as_deref() != Some(storage::VOLUME_MODE_BLOCK);
        let expected = expected_virtual_size(size, unit, filesystem, overhead);

        let pod = ctx.pvc_pod(&format!("{name}-pod"), &name).await?;
        let command = format!("qemu-img info {PVC_DEVICE_PATH}|grep 'virtual size'");
        let line = ctx
            .pods()
            .exec(&pod, &ns, &["bash", "-c", &command])
            .await?;
        assert_virtual_size(&line, expected)?;
        checked.push(format!("{}{}", expected.0, expected.1));

        // The next size reuses the worker's capacity
        dvs.delete(&name, &ns).await?;
    }

    Ok(format!("virtual sizes {}", checked.join(", ")))
}

pub(super) async fn recreate_pvc(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let sc_name = ctx.storage_class().await?;
    let name = "import-recreate-pvc";
    let dv = ctx
        .dv(name)
        .await?
        .http(ctx.config.artifact_url(images::cdi::DIR, images::cdi::QCOW2_IMG))
        .size(images::cirros::DEFAULT_DV_SIZE)
        .build();
    let dvs = ctx.dvs();
    dvs.create(&dv, &mut ctx.cleanup).await?;
    dvs.wait_for_success(name, &ns, ctx.config.timeouts.import())
        .await?;

    let pvcs = ctx.pvcs();
    let original = pvcs.get(name, &ns).await?;
    let created = pvc::creation_timestamp(&original)
        .cloned()
        .ok_or_else(|| {
            StorageError::assertion(format!("PVC {name} has no creation timestamp"))
        })?;
    pvcs.delete(name, &ns).await?;
    pvcs.wait_for_recreate(name, &ns, &created, TIMEOUT_20SEC)
        .await?;

    let sc = ctx.storage().storage_class(&sc_name).await?;
    if storage::is_wffc(&sc) {
        let consumer =
            PvcPod::new(format!("{name}-consumer"), &ns, name, &ctx.config.pod_image)
                .first_consumer()
                .build();
        ctx.pods().create(&consumer, &mut ctx.cleanup).await?;
    }
    dvs.wait_for_success(name, &ns, ctx.config.timeouts.import())
        .await?;

    let pod = ctx.pvc_pod(&format!("{name}-pod"), name).await?;
    assert_disk_img(&ctx.pods(), &pod, &ns).await?;
    Ok("PVC re-created and re-imported".to_string())
}

pub(super) async fn importer_network(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let networks = ctx.networks();
    if !networks.is_multus_installed().await? {
        return Err(StorageError::missing("multus NetworkAttachmentDefinition CRD").into());
    }

    let nad = "linux-nad";
    networks
        .create_bridge_nad(nad, &ns, LINUX_BRIDGE, &mut ctx.cleanup)
        .await?;

    let name = "import-multus";
    let dv = ctx
        .dv(name)
        .await?
        .http(ctx.config.cirros_qcow2_url())
        .size(images::cirros::DEFAULT_DV_SIZE)
        .multus_network(nad)
        .build();
    let dvs = ctx.dvs();
    dvs.create(&dv, &mut ctx.cleanup).await?;
    dvs.wait_for_status(
        name,
        &ns,
        DvPhase::ImportInProgress,
        TIMEOUT_1MIN,
        Some(DvPhase::Succeeded),
    )
    .await?;

    let importer = ctx.pods().importer_pod(&ns).await?;
    let annotations = importer.metadata.annotations.unwrap_or_default();
    let networks_ann = annotations.get(ANN_MULTUS_NETWORKS).map(String::as_str);
    ensure_that!(
        networks_ann == Some(nad),
        "{ANN_MULTUS_NETWORKS} on importer is {networks_ann:?}, expected {nad}"
    );
    let status = annotations
        .get(ANN_NETWORK_STATUS)
        .cloned()
        .unwrap_or_default();
    ensure_that!(
        status.contains(r#""interface": "net1""#),
        "importer has no net1 interface in {ANN_NETWORK_STATUS}: {status}"
    );
    Ok(format!("importer attached to {nad} as net1"))
}

pub(super) async fn unprivileged_import(ctx: &mut ScenarioContext) -> Result<String> {
    let ns = ctx.namespace();
    let (client, user) = ctx.unprivileged()?;
    ctx.rbac()
        .bind_cluster_role(
            "unprivileged-admin",
            &ns,
            &BindingSubject::user(&user),
            "admin",
            &mut ctx.cleanup,
        )
        .await?;

    let name = "import-unprivileged";
    let dv = ctx
        .dv(name)
        .await?
        .http(ctx.config.cirros_qcow2_url())
        .size(images::cirros::DEFAULT_DV_SIZE)
        .build();
    let dvs = DataVolumeManager::new(client);
    dvs.create(&dv, &mut ctx.cleanup).await?;
    dvs.wait_for_success(name, &ns, ctx.config.timeouts.import())
        .await?;

    let api_version = dvs.api_version(name, &ns).await?;
    ensure_that!(
        api_version == "cdi.kubevirt.io/v1beta1",
        "DataVolume apiVersion is {api_version}"
    );
    info!("{} imported {} as {}", user, name, api_version);

    let pod = ctx.pvc_pod(&format!("{name}-pod"), name).await?;
    assert_disk_img(&ctx.pods(), &pod, &ns).await?;
    Ok(format!("{user} imported a {api_version} DataVolume"))
}
