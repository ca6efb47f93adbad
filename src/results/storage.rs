//! Results storage and retrieval
//!
//! Each run is kept as one pretty-printed JSON file named after its id.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::RunSummary;

/// A finished run as stored on disk
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredRun {
    /// Unique run ID
    pub id: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    pub summary: RunSummary,

    pub environment: EnvironmentInfo,
}

/// Where the run happened
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub os: String,
    pub arch: String,

    /// Kubernetes server version, when it could be read
    pub k8s_version: Option<String>,

    /// Installed virtualization version from the configuration
    pub cnv_version: Option<String>,

    pub tool_version: String,
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            k8s_version: None,
            cnv_version: None,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl StoredRun {
    pub fn new(started_at: DateTime<Utc>, summary: RunSummary) -> Self {
        Self {
            id: generate_run_id(),
            started_at,
            completed_at: Utc::now(),
            summary,
            environment: EnvironmentInfo::default(),
        }
    }

    pub fn with_environment(mut self, environment: EnvironmentInfo) -> Self {
        self.environment = environment;
        self
    }
}

/// Generate unique run ID
fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

/// Results storage manager
pub struct ResultsStorage {
    /// Base directory for results
    base_dir: PathBuf,
}

impl ResultsStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Storage under the user data directory
    pub fn default_dir() -> Self {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("storage-tests")
            .join("results");
        Self::new(base_dir)
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(format!("{run_id}.json"))
    }

    pub fn save(&self, run: &StoredRun) -> Result<PathBuf> {
        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!("Failed to create results directory {}", self.base_dir.display())
        })?;

        let path = self.run_path(&run.id);
        let file = File::create(&path).context("Failed to create results file")?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, run).context("Failed to write results")?;

        info!("Saved run results to {}", path.display());
        Ok(path)
    }

    pub fn load(&self, run_id: &str) -> Result<StoredRun> {
        let path = self.run_path(run_id);
        let run = Self::load_from_path(&path)
            .with_context(|| format!("Failed to load run {run_id}"))?;
        debug!("Loaded run results from {}", path.display());
        Ok(run)
    }

    fn load_from_path(path: &Path) -> Result<StoredRun> {
        let file = File::open(path).context("Failed to open results file")?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).context("Failed to parse results")
    }

    /// All stored runs, newest first; unreadable files are skipped
    pub fn list_runs(&self) -> Result<Vec<RunInfo>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                match Self::load_from_path(&path) {
                    Ok(run) => runs.push(RunInfo::from(&run)),
                    Err(e) => debug!("Failed to load {}: {}", path.display(), e),
                }
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    pub fn latest(&self) -> Result<Option<StoredRun>> {
        match self.list_runs()?.into_iter().next() {
            Some(info) => self.load(&info.id).map(Some),
            None => Ok(None),
        }
    }

    pub fn delete(&self, run_id: &str) -> Result<()> {
        let path = self.run_path(run_id);
        if path.exists() {
            fs::remove_file(&path)?;
            info!("Deleted results: {}", path.display());
        }
        Ok(())
    }

    /// Export a run to `path`
    pub fn export(&self, run: &StoredRun, path: &Path, format: ExportFormat) -> Result<()> {
        match format {
            ExportFormat::Json => {
                let file = File::create(path)?;
                let writer = BufWriter::new(file);
                serde_json::to_writer_pretty(writer, run)?;
            }
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_path(path)?;
                writer.write_record([
                    "run_id",
                    "number",
                    "scenario",
                    "category",
                    "status",
                    "duration_ms",
                    "cleanup_failures",
                    "message",
                ])?;
                for result in &run.summary.results {
                    writer.write_record([
                        run.id.clone(),
                        result.scenario.number().to_string(),
                        result.scenario.name().to_string(),
                        result.scenario.category().to_string(),
                        result.status.to_string(),
                        result.duration_ms.to_string(),
                        result.cleanup_failures.to_string(),
                        result.message.clone().unwrap_or_default(),
                    ])?;
                }
                writer.flush()?;
            }
        }

        info!("Exported results to {}", path.display());
        Ok(())
    }
}

/// Brief run information
#[derive(Clone, Debug)]
pub struct RunInfo {
    pub id: String,
    pub namespace: String,
    pub storage_class: Option<String>,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub pass_rate: f64,
}

impl From<&StoredRun> for RunInfo {
    fn from(run: &StoredRun) -> Self {
        Self {
            id: run.id.clone(),
            namespace: run.summary.namespace.clone(),
            storage_class: run.summary.storage_class.clone(),
            started_at: run.started_at,
            total: run.summary.total,
            pass_rate: run.summary.pass_rate(),
        }
    }
}

/// Export format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Scenario, ScenarioResult};
    use chrono::Duration;

    fn run(started_at: DateTime<Utc>) -> StoredRun {
        let summary = RunSummary::new(
            "storage-tests",
            Some("hostpath-csi-basic".to_string()),
            vec![
                ScenarioResult::pass(Scenario::HppDaemonSet, 40),
                ScenarioResult::fail(Scenario::HppClusterRole, 60, "no binding, subject"),
            ],
        );
        StoredRun::new(started_at, summary)
    }

    #[test]
    fn test_generate_run_id() {
        let id = generate_run_id();
        let (date, rest) = id.split_at(8);
        assert!(date.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(rest.len(), "_HHMMSS_NNNN".len());
    }

    #[test]
    fn test_save_list_load() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path().join("results"));
        assert!(storage.list_runs().unwrap().is_empty());

        let older = run(Utc::now() - Duration::hours(1));
        let mut newer = run(Utc::now());
        newer.id = format!("{}-b", older.id);
        storage.save(&older).unwrap();
        storage.save(&newer).unwrap();
        fs::write(dir.path().join("results").join("broken.json"), "{").unwrap();

        let runs = storage.list_runs().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, newer.id);
        assert_eq!(runs[0].storage_class.as_deref(), Some("hostpath-csi-basic"));
        assert_eq!(runs[0].pass_rate, 50.0);

        let latest = storage.latest().unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
        assert_eq!(latest.summary.results[1].scenario, Scenario::HppClusterRole);

        storage.delete(&older.id).unwrap();
        assert!(storage.load(&older.id).is_err());
    }

    #[test]
    fn test_export_csv() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path());
        let stored = run(Utc::now());
        let path = dir.path().join("run.csv");

        storage
            .export(&stored, &path, ExportFormat::from_extension(&path).unwrap())
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("run_id,number,scenario"));
        assert!(lines[2].ends_with("\"no binding, subject\""));
    }

    #[test]
    fn test_export_format() {
        assert_eq!(ExportFormat::from_str("JSON"), Some(ExportFormat::Json));
        assert_eq!(
            ExportFormat::from_extension(Path::new("out/run.csv")),
            Some(ExportFormat::Csv)
        );
        assert!(ExportFormat::from_str("xml").is_none());
    }
}
