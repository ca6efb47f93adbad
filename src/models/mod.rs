//! Data models for the storage scenarios
//!
//! The scenario catalog, per-scenario results and run summaries.

mod scenario;
mod scenario_result;

pub use scenario::{Category, Scenario};
pub use scenario_result::{RunSummary, ScenarioResult, ScenarioStatus};
