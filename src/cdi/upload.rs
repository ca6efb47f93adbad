//! Uploads through the CDI upload proxy
//!
//! An upload DV waits in `UploadReady`; a token from an UploadTokenRequest
//! authorizes one POST of the image bytes to the proxy.

use anyhow::{Context, Result};
use kube::api::{Api, PostParams};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use super::datavolume::{DataVolume, DataVolumeBuilder, DataVolumeManager, DvPhase};
use super::storage::StorageManager;
use crate::constants::{CDI_UPLOADPROXY, TIMEOUT_2MIN, TIMEOUT_5SEC};
use crate::error::StorageError;
use crate::http::HttpClient;
use crate::k8s::{CleanupStack, K8sClient, ServiceManager};
use crate::utils::{Sample, TimeoutSampler};

/// Size of DVs created for uploads
pub const UPLOAD_DV_SIZE: &str = "3Gi";

/// Request for a short-lived upload token bound to one PVC
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "upload.cdi.kubevirt.io",
    version = "v1beta1",
    kind = "UploadTokenRequest",
    plural = "uploadtokenrequests",
    namespaced,
    status = "UploadTokenRequestStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct UploadTokenRequestSpec {
    pub pvc_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct UploadTokenRequestStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Image bytes: the file at `arg` when readable, else `arg` itself
pub fn read_upload_data(arg: &str) -> Vec<u8> {
    let path = Path::new(arg);
    match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("{} is not a readable file ({}), uploading as data", arg, e);
            arg.as_bytes().to_vec()
        }
    }
}

/// Upload endpoint on the proxy `host`
pub fn upload_url(host: &str, asynchronous: bool) -> String {
    let host = host
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    let suffix = if asynchronous { "-async" } else { "" };
    format!("https://{host}/v1beta1/upload{suffix}")
}

pub struct UploadManager {
    client: K8sClient,
    http: HttpClient,
    hco_namespace: String,
    proxy_override: Option<String>,
}

impl UploadManager {
    pub fn new(client: K8sClient, http: HttpClient, hco_namespace: impl Into<String>) -> Self {
        Self {
            client,
            http,
            hco_namespace: hco_namespace.into(),
            proxy_override: None,
        }
    }

    /// Skip proxy discovery and use `host`
    pub fn with_proxy(mut self, host: Option<String>) -> Self {
        self.proxy_override = host;
        self
    }

    /// Upload proxy host: override, then route, then CDIConfig status
    pub async fn proxy_host(&self) -> Result<String> {
        if let Some(host) = &self.proxy_override {
            return Ok(host.clone());
        }

        let services = ServiceManager::new(self.client.clone());
        if let Some(host) = services
            .route_host(CDI_UPLOADPROXY, &self.hco_namespace)
            .await?
        {
            return Ok(host);
        }

        let config = StorageManager::new(self.client.clone()).cdi_config().await?;
        config
            .status
            .and_then(|s| s.upload_proxy_url)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| StorageError::missing("upload proxy URL").into())
    }

    /// Create an UploadTokenRequest for `pvc_name` and return its token
    pub async fn token(&self, namespace: &str, pvc_name: &str) -> Result<String> {
        let api: Api<UploadTokenRequest> = self.client.api_in(namespace);
        let request = UploadTokenRequest::new(
            "upload-image",
            UploadTokenRequestSpec {
                pvc_name: pvc_name.to_string(),
            },
        );

        let created = api
            .create(&PostParams::default(), &request)
            .await
            .context("Failed to create UploadTokenRequest")?;

        created
            .status
            .and_then(|s| s.token)
            .ok_or_else(|| StorageError::Upload("token request returned no token".into()).into())
    }

    /// POST `data` to the proxy and return the HTTP status
    pub async fn upload_image(&self, token: &str, data: &[u8], asynchronous: bool) -> Result<u16> {
        let url = upload_url(&self.proxy_host().await?, asynchronous);
        info!("Uploading {} bytes to {}", data.len(), url);

        let response = self.http.post_bytes(&url, token, data.to_vec()).await?;
        if !response.is_success() {
            debug!("Upload proxy answered {}: {}", response.status_code, response.text());
        }
        Ok(response.status_code)
    }

    /// Request a token and retry the upload until the proxy answers 200
    pub async fn upload_with_token(
        &self,
        namespace: &str,
        pvc_name: &str,
        data: &[u8],
    ) -> Result<()> {
        let token = self.token(namespace, pvc_name).await?;
        info!("Ensure upload was successful");

        TimeoutSampler::new(TIMEOUT_2MIN, TIMEOUT_5SEC)
            .waiting_for(format!("upload to {pvc_name} to return 200"))
            .wait_for(|| {
                let token = token.as_str();
                async move {
                    let status = self.upload_image(token, data, false).await?;
                    Ok(if status == 200 {
                        Sample::Done(())
                    } else {
                        Sample::observed(status)
                    })
                }
            })
            .await
    }

    /// Create an upload DV and wait until it accepts data
    pub async fn upload_dv(
        &self,
        name: &str,
        namespace: &str,
        storage_class: Option<&str>,
        cleanup: &mut CleanupStack,
    ) -> Result<DataVolume> {
        let mut builder = DataVolumeBuilder::new(name, namespace)
            .upload()
            .size(UPLOAD_DV_SIZE)
            .bind_immediately();
        if let Some(sc) = storage_class {
            builder = builder.storage_class(sc);
        }

        let dvs = DataVolumeManager::new(self.client.clone());
        dvs.create(&builder.build(), cleanup).await?;
        dvs.wait_for_status(name, namespace, DvPhase::UploadReady, TIMEOUT_2MIN, None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::mock::MockService;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_upload_url() {
        assert_eq!(
            upload_url("cdi-uploadproxy.apps.example.com", false),
            "https://cdi-uploadproxy.apps.example.com/v1beta1/upload"
        );
        assert_eq!(
            upload_url("https://proxy.example.com/", true),
            "https://proxy.example.com/v1beta1/upload-async"
        );
    }

    #[test]
    fn test_read_upload_data() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"qcow2 bytes").unwrap();
        assert_eq!(
            read_upload_data(file.path().to_str().unwrap()),
            b"qcow2 bytes".to_vec()
        );
        assert_eq!(read_upload_data("not-a-file"), b"not-a-file".to_vec());
    }

    #[tokio::test]
    async fn test_proxy_host_falls_back_to_cdi_config() {
        let client = MockService::new()
            .on_get(
                "/apis/cdi.kubevirt.io/v1beta1/cdiconfigs/config",
                200,
                &json!({
                    "apiVersion": "cdi.kubevirt.io/v1beta1",
                    "kind": "CDIConfig",
                    "metadata": {"name": "config"},
                    "spec": {},
                    "status": {"uploadProxyURL": "cdi-uploadproxy-cdi.apps.example.com"}
                })
                .to_string(),
            )
            .into_k8s("ns");

        let uploads = UploadManager::new(client, HttpClient::new().unwrap(), "openshift-cnv");
        assert_eq!(
            uploads.proxy_host().await.unwrap(),
            "cdi-uploadproxy-cdi.apps.example.com"
        );

        let overridden = uploads.with_proxy(Some("proxy.local".to_string()));
        assert_eq!(overridden.proxy_host().await.unwrap(), "proxy.local");
    }

    #[tokio::test]
    async fn test_token() {
        let client = MockService::new()
            .on_post(
                "/apis/upload.cdi.kubevirt.io/v1beta1/namespaces/ns/uploadtokenrequests",
                201,
                &json!({
                    "apiVersion": "upload.cdi.kubevirt.io/v1beta1",
                    "kind": "UploadTokenRequest",
                    "metadata": {"name": "upload-image", "namespace": "ns"},
                    "spec": {"pvcName": "upload-dv"},
                    "status": {"token": "eyJhbGciOi"}
                })
                .to_string(),
            )
            .into_k8s("ns");

        let uploads = UploadManager::new(client, HttpClient::new().unwrap(), "openshift-cnv");
        assert_eq!(uploads.token("ns", "upload-dv").await.unwrap(), "eyJhbGciOi");
    }
}
