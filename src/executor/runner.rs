//! Scenario runner
//!
//! Runs storage scenarios one after another against the configured cluster.

use anyhow::Result;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::StorageError;
use crate::http::HttpClient;
use crate::k8s::K8sClient;
use crate::models::{RunSummary, Scenario, ScenarioResult};
use crate::scenarios::{self, ScenarioContext};
use crate::utils::Timer;

/// Sequential scenario runner
pub struct ScenarioRunner {
    config: AppConfig,
    client: K8sClient,
    unprivileged: Option<K8sClient>,
    http: HttpClient,
    skip: Vec<u8>,
}

impl ScenarioRunner {
    /// Connect to the cluster and make sure the test namespace exists
    pub async fn new(config: AppConfig) -> Result<Self> {
        let client = K8sClient::new(&config.namespace).await?;
        client.ensure_namespace().await?;

        let unprivileged = match &config.unprivileged_user {
            Some(user) => Some(K8sClient::impersonating(user, &config.namespace).await?),
            None => None,
        };

        Ok(Self::with_clients(config, client, unprivileged, HttpClient::new()?))
    }

    pub fn with_clients(
        config: AppConfig,
        client: K8sClient,
        unprivileged: Option<K8sClient>,
        http: HttpClient,
    ) -> Self {
        Self {
            config,
            client,
            unprivileged,
            http,
            skip: Vec::new(),
        }
    }

    /// Scenario numbers reported as skipped without running
    pub fn skip(mut self, numbers: impl IntoIterator<Item = u8>) -> Self {
        self.skip.extend(numbers);
        self
    }

    /// Run one scenario with its own cleanup stack
    pub async fn run_scenario(&self, scenario: Scenario) -> ScenarioResult {
        if self.skip.contains(&scenario.number()) {
            return ScenarioResult::skip(scenario, "Skipped by configuration");
        }

        info!("Running {}", scenario);
        let timer = Timer::start(scenario.name());
        let mut ctx = ScenarioContext::new(
            self.client.clone(),
            self.unprivileged.clone(),
            self.config.clone(),
            self.http.clone(),
        );

        let outcome = scenarios::run(scenario, &mut ctx).await;
        let cleanup_failures = ctx.cleanup.teardown().await;
        if cleanup_failures > 0 {
            warn!("{}: {} cleanup steps failed", scenario, cleanup_failures);
        }

        classify(scenario, timer.stop(), outcome).with_cleanup_failures(cleanup_failures)
    }

    /// Run the given scenarios in order
    pub async fn run(&self, scenarios: &[Scenario]) -> RunSummary {
        info!(
            "Running {} scenarios in namespace {}",
            scenarios.len(),
            self.config.namespace
        );

        let mut results = Vec::with_capacity(scenarios.len());
        for &scenario in scenarios {
            let result = self.run_scenario(scenario).await;
            info!("  {}", result);
            results.push(result);
        }

        let summary = RunSummary::new(
            self.config.namespace.clone(),
            self.config.default_storage_class.clone(),
            results,
        );
        info!(
            "Run completed in {}ms - Pass: {}/{} ({:.1}%)",
            summary.total_duration_ms,
            summary.passed,
            summary.total,
            summary.pass_rate()
        );
        summary
    }

    pub async fn run_all(&self) -> RunSummary {
        self.run(&Scenario::all()).await
    }

    /// API server version for the stored run, if readable
    pub async fn server_version(&self) -> Option<String> {
        match self.client.server_version().await {
            Ok(version) => Some(version),
            Err(e) => {
                warn!("{:#}", e);
                None
            }
        }
    }
}

/// Map a scenario outcome onto a result status
///
/// Missing prerequisites skip, cluster misbehaviour fails, and anything
/// else (API or transport trouble) is an error.
pub fn classify(scenario: Scenario, duration_ms: u64, outcome: Result<String>) -> ScenarioResult {
    let err = match outcome {
        Ok(message) => return ScenarioResult::pass(scenario, duration_ms).with_message(message),
        Err(err) => err,
    };

    match err.downcast_ref::<StorageError>() {
        Some(StorageError::Missing(what)) => {
            info!("{} skipped: missing {}", scenario, what);
            ScenarioResult::skip(scenario, format!("missing {what}"))
        }
        Some(e) if e.is_failure() => {
            error!("{} failed: {:#}", scenario, err);
            ScenarioResult::fail(scenario, duration_ms, format!("{err:#}"))
        }
        _ => {
            error!("{} errored: {:#}", scenario, err);
            ScenarioResult::error(scenario, duration_ms, format!("{err:#}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::mock::MockService;
    use crate::models::ScenarioStatus;
    use anyhow::Context;

    #[test]
    fn test_classify_outcomes() {
        let passed = classify(Scenario::BlankDisk, 10, Ok("blank disk ready".to_string()));
        assert_eq!(passed.status, ScenarioStatus::Pass);
        assert_eq!(passed.message.as_deref(), Some("blank disk ready"));

        let skipped = classify(
            Scenario::HppDaemonSet,
            10,
            Err(StorageError::missing("HostPath provisioner storage class").into()),
        );
        assert_eq!(skipped.status, ScenarioStatus::Skip);
        assert_eq!(skipped.duration_ms, 0);

        let failed = classify(
            Scenario::EmptyUrl,
            10,
            Err(StorageError::assertion("expected HTTP 422").into()),
        );
        assert_eq!(failed.status, ScenarioStatus::Fail);

        let errored = classify(
            Scenario::HttpImport,
            10,
            Err(anyhow::anyhow!("connection refused")),
        );
        assert_eq!(errored.status, ScenarioStatus::Error);
    }

    #[test]
    fn test_classify_sees_through_context() {
        let outcome: Result<String> = Err(StorageError::Timeout {
            what: "DataVolume dv-1 Succeeded".to_string(),
            secs: 300,
            last: Some("ImportInProgress".to_string()),
        })
        .context("Failed to import cirros");

        let result = classify(Scenario::HttpImport, 300_000, outcome);
        assert_eq!(result.status, ScenarioStatus::Fail);
        let message = result.message.unwrap_or_default();
        assert!(message.starts_with("Failed to import cirros"));
        assert!(message.contains("ImportInProgress"));
    }

    #[tokio::test]
    async fn test_skip_list() {
        let client = MockService::new().into_k8s("storage-tests");
        let runner = ScenarioRunner::with_clients(
            AppConfig::default(),
            client,
            None,
            HttpClient::new().unwrap(),
        )
        .skip([Scenario::MemoryDump.number()]);

        let result = runner.run_scenario(Scenario::MemoryDump).await;
        assert_eq!(result.status, ScenarioStatus::Skip);
        assert_eq!(result.message.as_deref(), Some("Skipped by configuration"));
    }

    #[tokio::test]
    async fn test_missing_unprivileged_user_skips() {
        let client = MockService::new().into_k8s("storage-tests");
        let runner = ScenarioRunner::with_clients(
            AppConfig::default(),
            client,
            None,
            HttpClient::new().unwrap(),
        );

        let result = runner.run_scenario(Scenario::SnapshotForbidden).await;
        assert_eq!(result.status, ScenarioStatus::Skip);
        assert_eq!(result.cleanup_failures, 0);
    }
}
