//! Scenario execution engine
//!
//! The sequential scenario runner and the pre-flight checks run before it.

mod preflight;
mod runner;

pub use preflight::PreflightChecker;
pub use runner::{classify, ScenarioRunner};
