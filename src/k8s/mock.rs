//! Mock Kubernetes API for unit tests
//!
//! Responses are keyed by method and path; the longest registered prefix
//! wins when no exact path matches. Unmatched requests get a 404 `Status`.
//! A path registered with several responses serves them in order and keeps
//! repeating the last one. Every request is recorded so tests can inspect
//! what was sent.

use http::{Request, Response};
use hyper::Body;
use kube::Client;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

use super::K8sClient;

type Responses = HashMap<(String, String), VecDeque<(u16, String)>>;

/// Request seen by the mock
#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub body: String,
}

impl Recorded {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Clone, Default)]
pub struct MockService {
    responses: Arc<Mutex<Responses>>,
    recorded: Arc<Mutex<Vec<Recorded>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.on_sequence(method, path, vec![(status, body.to_string())])
    }

    /// Answer successive requests with `responses`, repeating the last one
    pub fn on_sequence(self, method: &str, path: &str, responses: Vec<(u16, String)>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), responses.into());
        self
    }

    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.on("POST", path, status, body)
    }

    pub fn on_put(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PUT", path, status, body)
    }

    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    pub fn on_delete(self, path: &str, status: u16, body: &str) -> Self {
        self.on("DELETE", path, status, body)
    }

    /// Shared handle on recorded requests, valid after the service is moved
    pub fn recorder(&self) -> Arc<Mutex<Vec<Recorded>>> {
        self.recorded.clone()
    }

    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    pub fn into_k8s(self, namespace: &str) -> K8sClient {
        K8sClient::from_client(Client::new(self, namespace.to_string()), namespace)
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let mut responses = self.responses.lock().unwrap();

        let key = responses
            .keys()
            .filter(|(m, p)| m == method && path.starts_with(p.as_str()))
            .max_by_key(|(_, p)| p.len())
            .cloned()?;
        let queue = responses.get_mut(&key)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(str::to_string);
        let response = self.find_response(&method, &path);
        let recorded = self.recorded.clone();

        Box::pin(async move {
            let bytes = hyper::body::to_bytes(req.into_body()).await?;
            recorded.lock().unwrap().push(Recorded {
                method,
                path,
                query,
                body: String::from_utf8_lossy(&bytes).to_string(),
            });

            let (status, body) = response.unwrap_or_else(|| (404, not_found_json("resource", "")));
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap())
        })
    }
}

/// Kubernetes `Status` body for a 404
pub fn not_found_json(resource: &str, name: &str) -> String {
    status_json(404, "NotFound", &format!("{resource} \"{name}\" not found"))
}

/// Kubernetes `Status` failure body
pub fn status_json(code: u16, reason: &str, message: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
    .to_string()
}

/// DataVolume in `phase`, without an explicit storage class
pub fn datavolume_json(name: &str, namespace: &str, phase: &str) -> String {
    serde_json::json!({
        "apiVersion": "cdi.kubevirt.io/v1beta1",
        "kind": "DataVolume",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {"source": {"http": {"url": "http://images/cirros.qcow2"}}},
        "status": {"phase": phase}
    })
    .to_string()
}

/// PVC in `phase`
pub fn pvc_json(name: &str, namespace: &str, phase: &str) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {"accessModes": ["ReadWriteOnce"]},
        "status": {"phase": phase}
    })
    .to_string()
}

/// Empty `Status` success body, as returned by deletes
pub fn success_json() -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Success"
    })
    .to_string()
}
