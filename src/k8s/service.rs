//! In-cluster image server endpoints
//!
//! The internal HTTP server, its CA certificate ConfigMap and the OpenShift
//! Route type used to reach cluster services from outside.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, PostParams};
use kube::core::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use super::{CleanupStack, K8sClient};
use crate::constants::images;
use crate::error::StorageError;

/// Key holding the PEM bundle in certificate ConfigMaps
pub const CERT_CONFIGMAP_KEY: &str = "tlsregistry.crt";

/// Port layout of the internal HTTP server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpPort {
    NoAuth,
    Auth,
    RateLimit,
    Https,
}

impl HttpPort {
    pub fn all() -> [HttpPort; 4] {
        [HttpPort::RateLimit, HttpPort::Auth, HttpPort::NoAuth, HttpPort::Https]
    }

    pub fn name(&self) -> &'static str {
        match self {
            HttpPort::NoAuth => "http-no-auth",
            HttpPort::Auth => "http-auth",
            HttpPort::RateLimit => "rate-limit",
            HttpPort::Https => "https",
        }
    }

    pub fn number(&self) -> i32 {
        match self {
            HttpPort::NoAuth => 80,
            HttpPort::Auth => 81,
            HttpPort::RateLimit => 82,
            HttpPort::Https => 443,
        }
    }
}

/// Service fronting the internal HTTP server pods (`name=internal-http`)
pub fn internal_http_service(name: &str, namespace: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(
                "name".to_string(),
                "internal-http".to_string(),
            )])),
            ports: Some(
                HttpPort::all()
                    .iter()
                    .map(|port| ServicePort {
                        name: Some(port.name().to_string()),
                        port: port.number(),
                        target_port: Some(IntOrString::Int(port.number())),
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// ConfigMap carrying a CA bundle for importer TLS verification
pub fn cert_configmap(name: &str, namespace: &str, pem: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CERT_CONFIGMAP_KEY.to_string(),
            pem.to_string(),
        )])),
        ..Default::default()
    }
}

/// URL of a file on an image server (`base` ends with `/`)
pub fn get_file_url(base: &str, directory: &str, file_name: &str) -> String {
    format!("{base}{directory}{file_name}")
}

/// URL of a cirros image on the internal HTTPS server
pub fn file_url_https_server(https_base: &str, file_name: &str) -> String {
    get_file_url(https_base, images::cirros::DIR, file_name)
}

/// OpenShift Route
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "route.openshift.io",
    version = "v1",
    kind = "Route",
    plural = "routes",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<RouteTarget>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct RouteTarget {
    pub kind: String,
    pub name: String,
}

pub struct ServiceManager {
    client: K8sClient,
}

impl ServiceManager {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }

    pub async fn create_configmap(
        &self,
        configmap: &ConfigMap,
        cleanup: &mut CleanupStack,
    ) -> Result<ConfigMap> {
        let namespace = configmap
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| self.client.namespace().to_string());
        let api: Api<ConfigMap> = self.client.api_in(&namespace);
        let created = api
            .create(&PostParams::default(), configmap)
            .await
            .context("Failed to create ConfigMap")?;
        let name = created.metadata.name.clone().unwrap_or_default();
        cleanup.delete_later(api, name.clone());
        info!("Created ConfigMap {}/{}", namespace, name);
        Ok(created)
    }

    /// Copy a Secret (e.g. image server credentials) into `namespace`
    pub async fn copy_secret(
        &self,
        name: &str,
        from_namespace: &str,
        namespace: &str,
        cleanup: &mut CleanupStack,
    ) -> Result<Secret> {
        let source: Api<Secret> = self.client.api_in(from_namespace);
        let original = source
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get Secret {from_namespace}/{name}"))?
            .ok_or_else(|| StorageError::missing(format!("Secret {from_namespace}/{name}")))?;

        let copy = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: original.data,
            type_: original.type_,
            ..Default::default()
        };

        let api: Api<Secret> = self.client.api_in(namespace);
        let created = api
            .create(&PostParams::default(), &copy)
            .await
            .with_context(|| format!("Failed to create Secret {namespace}/{name}"))?;
        cleanup.delete_later(api, name);
        info!("Copied Secret {} from {} to {}", name, from_namespace, namespace);
        Ok(created)
    }

    /// Read the CA bundle from an existing certificate ConfigMap
    pub async fn read_cert(&self, name: &str, namespace: &str) -> Result<String> {
        let api: Api<ConfigMap> = self.client.api_in(namespace);
        let cm = api
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get ConfigMap {namespace}/{name}"))?
            .ok_or_else(|| StorageError::missing(format!("ConfigMap {namespace}/{name}")))?;

        cm.data
            .and_then(|mut d| d.remove(CERT_CONFIGMAP_KEY))
            .ok_or_else(|| {
                StorageError::missing(format!("{CERT_CONFIGMAP_KEY} in ConfigMap {name}")).into()
            })
    }

    /// Create the internal HTTP Service when it is missing; it outlives the run.
    ///
    /// Returns whether it had to be created.
    pub async fn ensure_internal_http(&self, name: &str, namespace: &str) -> Result<bool> {
        let api: Api<Service> = self.client.api_in(namespace);
        if api
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get Service {namespace}/{name}"))?
            .is_some()
        {
            return Ok(false);
        }

        api.create(&PostParams::default(), &internal_http_service(name, namespace))
            .await
            .with_context(|| format!("Failed to create Service {namespace}/{name}"))?;
        info!("Created Service {}/{}", namespace, name);
        Ok(true)
    }

    /// Host of a Route, if it exists and is admitted
    pub async fn route_host(&self, name: &str, namespace: &str) -> Result<Option<String>> {
        let api: Api<Route> = self.client.api_in(namespace);
        let route = api
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get Route {namespace}/{name}"))?;
        Ok(route.and_then(|r| r.spec.host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::mock::MockService;
    use serde_json::json;

    #[test]
    fn test_internal_http_ports() {
        let svc = internal_http_service("internal-http", "ns");
        let ports = svc.spec.unwrap().ports.unwrap();
        let by_name: BTreeMap<_, _> = ports
            .iter()
            .map(|p| (p.name.clone().unwrap(), p.port))
            .collect();
        assert_eq!(by_name["rate-limit"], 82);
        assert_eq!(by_name["http-auth"], 81);
        assert_eq!(by_name["http-no-auth"], 80);
        assert_eq!(by_name["https"], 443);
    }

    #[test]
    fn test_file_urls() {
        assert_eq!(
            get_file_url("http://server/files/", "cnv-tests/cirros-images/", "c.qcow2"),
            "http://server/files/cnv-tests/cirros-images/c.qcow2"
        );
        assert_eq!(
            file_url_https_server("https://internal-http.utils/", "cirros.qcow2"),
            "https://internal-http.utils/cnv-tests/cirros-images/cirros.qcow2"
        );
    }

    #[tokio::test]
    async fn test_route_host_and_cert() {
        let client = MockService::new()
            .on_get(
                "/apis/route.openshift.io/v1/namespaces/openshift-cnv/routes/cdi-uploadproxy",
                200,
                &json!({
                    "apiVersion": "route.openshift.io/v1",
                    "kind": "Route",
                    "metadata": {"name": "cdi-uploadproxy", "namespace": "openshift-cnv"},
                    "spec": {"host": "cdi-uploadproxy-openshift-cnv.apps.example.com"}
                })
                .to_string(),
            )
            .on_get(
                "/api/v1/namespaces/ns/configmaps/https-cert",
                200,
                &serde_json::to_string(&cert_configmap("https-cert", "ns", "PEM")).unwrap(),
            )
            .into_k8s("ns");

        let services = ServiceManager::new(client);
        assert_eq!(
            services
                .route_host("cdi-uploadproxy", "openshift-cnv")
                .await
                .unwrap()
                .as_deref(),
            Some("cdi-uploadproxy-openshift-cnv.apps.example.com")
        );
        assert_eq!(services.read_cert("https-cert", "ns").await.unwrap(), "PEM");
        assert!(services.route_host("missing", "ns").await.unwrap().is_none());
    }
}
