//! Stored run results
//!
//! Runs are saved as JSON and can be listed, shown and exported later.

mod storage;

pub use storage::{EnvironmentInfo, ExportFormat, ResultsStorage, StoredRun};
