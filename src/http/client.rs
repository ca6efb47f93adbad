//! HTTP client for the upload proxy and image servers
//!
//! TLS verification is disabled: the upload proxy route uses the cluster's
//! self-signed ingress certificate.

use anyhow::{Context, Result};
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// HTTP client errors
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Connection refused to {0}")]
    ConnectionRefused(String),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    timeout_secs: u64,
}

impl HttpClient {
    /// Client with a 30s request timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(30)
    }

    /// Create client with custom timeout
    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .danger_accept_invalid_certs(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            timeout_secs,
        })
    }

    /// Send HTTP request
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!("Sending {} request to {}", request.method, request.url);

        let method =
            Method::from_bytes(request.method.as_bytes()).context("Invalid HTTP method")?;
        let mut req_builder = self.client.request(method, &request.url);

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let start = std::time::Instant::now();
        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow::anyhow!(HttpError::Timeout(self.timeout_secs))
            } else if e.is_connect() {
                anyhow::anyhow!(HttpError::ConnectionRefused(request.url.clone()))
            } else {
                anyhow::anyhow!(HttpError::RequestFailed(e.to_string()))
            }
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .context("Failed to read response body")?
            .to_vec();
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(
            "Response: {} {} in {}ms",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            duration_ms
        );

        Ok(HttpResponse {
            status_code: status.as_u16(),
            body,
            duration_ms,
        })
    }

    /// POST raw bytes with a bearer token, returning the response
    pub async fn post_bytes(&self, url: &str, token: &str, data: Vec<u8>) -> Result<HttpResponse> {
        self.send(
            HttpRequest::post(url)
                .header("Authorization", format!("Bearer {token}"))
                .body(data),
        )
        .await
    }

    /// GET a file, failing on any non-2xx status
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.send(HttpRequest::get(url)).await?;
        if !response.is_success() {
            return Err(HttpError::Status {
                status: response.status_code,
                url: url.to_string(),
            }
            .into());
        }
        Ok(response.body)
    }
}

/// HTTP request builder
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// HTTP response
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: Vec<u8>,
    pub duration_ms: u64,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use std::convert::Infallible;
    use std::net::SocketAddr;

    /// Echoes `<auth header>|<body length>`; `/missing` answers 404
    async fn echo(req: Request<Body>) -> Result<Response<Body>, Infallible> {
        if req.uri().path() == "/missing" {
            let mut resp = Response::new(Body::empty());
            *resp.status_mut() = StatusCode::NOT_FOUND;
            return Ok(resp);
        }
        let auth = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = hyper::body::to_bytes(req.into_body()).await.unwrap();
        Ok(Response::new(Body::from(format!("{auth}|{}", body.len()))))
    }

    fn spawn_server() -> SocketAddr {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let make_svc = make_service_fn(|_| async { Ok::<_, Infallible>(service_fn(echo)) });
        let server = Server::bind(&addr).serve(make_svc);
        let local = server.local_addr();
        tokio::spawn(server);
        local
    }

    #[tokio::test]
    async fn test_post_bytes_sends_bearer_token() {
        let addr = spawn_server();
        let client = HttpClient::new().unwrap();

        let resp = client
            .post_bytes(
                &format!("http://{addr}/v1beta1/upload"),
                "tok123",
                vec![0u8; 1024],
            )
            .await
            .unwrap();

        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.text(), "Bearer tok123|1024");
    }

    #[tokio::test]
    async fn test_download_rejects_error_status() {
        let addr = spawn_server();
        let client = HttpClient::new().unwrap();

        let err = client
            .download(&format!("http://{addr}/missing"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HttpError>(),
            Some(HttpError::Status { status: 404, .. })
        ));
    }

    #[test]
    fn test_request_builder() {
        let req = HttpRequest::post("https://proxy/v1beta1/upload-async")
            .header("Authorization", "Bearer t")
            .body(b"data".to_vec());
        assert_eq!(req.method, "POST");
        assert_eq!(req.body.as_deref(), Some(&b"data"[..]));
    }
}
