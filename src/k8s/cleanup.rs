//! Teardown of resources created by a scenario
//!
//! Every create registers a delete on the [`CleanupStack`]. Teardown runs the
//! deletes newest first and waits for each object to disappear, so a DV is
//! gone before the role binding that allowed creating it.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use kube::api::{Api, DeleteParams};
use kube::Resource;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::{debug, info, warn};

use crate::constants::{TIMEOUT_1SEC, TIMEOUT_2MIN};
use crate::utils::TimeoutSampler;

struct Entry {
    description: String,
    delete: BoxFuture<'static, Result<()>>,
}

/// Pending deletes in creation order
pub struct CleanupStack {
    entries: Vec<Entry>,
    enabled: bool,
}

impl CleanupStack {
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: Vec::new(),
            enabled,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register an arbitrary teardown step
    pub fn push(
        &mut self,
        description: impl Into<String>,
        delete: BoxFuture<'static, Result<()>>,
    ) {
        self.entries.push(Entry {
            description: description.into(),
            delete,
        });
    }

    /// Delete `name` through `api` at teardown and wait until it is gone
    pub fn delete_later<K>(&mut self, api: Api<K>, name: impl Into<String>)
    where
        K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
        <K as Resource>::DynamicType: Default,
    {
        let name = name.into();
        let kind = K::kind(&Default::default()).to_string();
        let description = format!("{kind} {name}");
        self.push(description, Box::pin(delete_and_wait(api, name)));
    }

    /// Run every registered delete, newest first.
    ///
    /// Failures are logged and counted, never propagated.
    pub async fn teardown(&mut self) -> usize {
        let entries = std::mem::take(&mut self.entries);

        if !self.enabled {
            for entry in &entries {
                info!("Cleanup disabled, leaving {}", entry.description);
            }
            return 0;
        }

        let mut failures = 0;
        for entry in entries.into_iter().rev() {
            debug!("Cleaning up {}", entry.description);
            if let Err(e) = entry.delete.await {
                warn!("Failed to clean up {}: {:#}", entry.description, e);
                failures += 1;
            }
        }
        failures
    }
}

/// Delete and wait for the object to go away; absent objects are fine
pub async fn delete_and_wait<K>(api: Api<K>, name: String) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(&name, &DeleteParams::background()).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Failed to delete {name}")),
    }

    TimeoutSampler::new(TIMEOUT_2MIN, TIMEOUT_1SEC)
        .waiting_for(format!("{name} to be deleted"))
        .wait_until(|| {
            let api = api.clone();
            let name = name.clone();
            async move { Ok(api.get_opt(&name).await?.is_none()) }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::mock::{status_json, success_json, MockService};
    use k8s_openapi::api::core::v1::ConfigMap;
    use std::sync::{Arc, Mutex};

    fn recording_step(
        log: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    ) -> BoxFuture<'static, Result<()>> {
        let log = log.clone();
        Box::pin(async move {
            log.lock().unwrap().push(name);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_teardown_is_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CleanupStack::new(true);
        stack.push("role", recording_step(&log, "role"));
        stack.push("binding", recording_step(&log, "binding"));
        stack.push("dv", recording_step(&log, "dv"));

        assert_eq!(stack.teardown().await, 0);
        assert_eq!(*log.lock().unwrap(), vec!["dv", "binding", "role"]);
        assert!(stack.is_empty());
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_teardown() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CleanupStack::new(true);
        stack.push("first", recording_step(&log, "first"));
        stack.push("broken", Box::pin(async { anyhow::bail!("boom") }));

        assert_eq!(stack.teardown().await, 1);
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_disabled_leaves_resources() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CleanupStack::new(false);
        stack.push("dv", recording_step(&log, "dv"));

        assert_eq!(stack.teardown().await, 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_of_missing_object_succeeds() {
        let client = MockService::new()
            .on_delete(
                "/api/v1/namespaces/ns/configmaps/gone",
                404,
                &status_json(404, "NotFound", "configmaps \"gone\" not found"),
            )
            .into_client();
        let api: Api<ConfigMap> = Api::namespaced(client, "ns");

        delete_and_wait(api, "gone".to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_waits_until_absent() {
        let client = MockService::new()
            .on_delete("/api/v1/namespaces/ns/configmaps/cm", 200, &success_json())
            .into_client();
        let api: Api<ConfigMap> = Api::namespaced(client, "ns");

        let mut stack = CleanupStack::new(true);
        stack.delete_later(api, "cm");
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.teardown().await, 0);
    }
}
