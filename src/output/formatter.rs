//! Output formatters for scenario results
//!
//! Table, JSON, CSV and one-line summary renderings of a run.

use anyhow::{Context, Result};
use std::io::Write;

use crate::models::{Category, RunSummary, ScenarioResult, ScenarioStatus};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn status_label(&self, status: ScenarioStatus) -> String {
        let label = format!("{} {}", status.symbol(), status);
        if !self.colorize {
            return label;
        }
        let color = match status {
            ScenarioStatus::Pass => "32",
            ScenarioStatus::Skip => "33",
            ScenarioStatus::Fail | ScenarioStatus::Error => "31",
        };
        format!("\x1b[{color}m{label}\x1b[0m")
    }

    fn format_result_table(&self, result: &ScenarioResult) -> String {
        let mut line = format!(
            "{:2}. {:32} {} [{:>7}ms]",
            result.scenario.number(),
            result.scenario.name(),
            self.status_label(result.status),
            result.duration_ms
        );
        if result.cleanup_failures > 0 {
            line.push_str(&format!(" cleanup failures: {}", result.cleanup_failures));
        }
        if result.status != ScenarioStatus::Pass {
            if let Some(message) = &result.message {
                line.push_str(&format!("\n      {message}"));
            }
        }
        line
    }

    /// Format a whole run
    pub fn format_summary(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Table => self.format_summary_table(summary),
            OutputFormat::Json => serde_json::to_string(summary).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(summary).unwrap_or_default(),
            OutputFormat::Csv => csv_rows(&summary.results).unwrap_or_default(),
            OutputFormat::Summary => format!(
                "{} ({}): {}/{} passed, {} skipped ({:.1}%) in {}ms",
                summary.namespace,
                summary.storage_class.as_deref().unwrap_or("default"),
                summary.passed,
                summary.total,
                summary.skipped,
                summary.pass_rate(),
                summary.total_duration_ms
            ),
        }
    }

    fn format_summary_table(&self, summary: &RunSummary) -> String {
        let mut output = String::new();

        output.push_str("\n══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(
            " Storage scenarios in {} on {}\n",
            summary.namespace,
            summary.storage_class.as_deref().unwrap_or("the default storage class")
        ));
        output.push_str("══════════════════════════════════════════════════════════════\n");

        for category in Category::all() {
            let results: Vec<_> = summary
                .results
                .iter()
                .filter(|r| r.scenario.category() == category)
                .collect();
            if results.is_empty() {
                continue;
            }
            output.push_str(&format!("\n {}\n", category.name()));
            for result in results {
                output.push_str(&format!("  {}\n", self.format_result_table(result)));
            }
        }

        let failed = if self.colorize && summary.failed + summary.errors > 0 {
            format!("\x1b[31m{}\x1b[0m", summary.failed)
        } else {
            summary.failed.to_string()
        };
        output.push_str("\n──────────────────────────────────────────────────────────────\n");
        output.push_str(&format!(
            " Total: {} | Pass: {} | Fail: {} | Skip: {} | Error: {}\n",
            summary.total, summary.passed, failed, summary.skipped, summary.errors
        ));
        output.push_str(&format!(
            " Pass Rate: {:.1}% | Duration: {}ms\n",
            summary.pass_rate(),
            summary.total_duration_ms
        ));

        output
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// CSV with a header row, one line per scenario
fn csv_rows(results: &[ScenarioResult]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "number",
        "scenario",
        "category",
        "status",
        "duration_ms",
        "cleanup_failures",
        "message",
    ])?;
    for result in results {
        writer.write_record([
            result.scenario.number().to_string(),
            result.scenario.name().to_string(),
            result.scenario.category().name().to_string(),
            result.status.to_string(),
            result.duration_ms.to_string(),
            result.cleanup_failures.to_string(),
            result.message.clone().unwrap_or_default(),
        ])?;
    }
    let bytes = writer.into_inner().context("Failed to flush CSV writer")?;
    Ok(String::from_utf8(bytes)?)
}

/// Write a run to a file without color codes
pub fn write_results_to_file(path: &str, summary: &RunSummary, format: OutputFormat) -> Result<()> {
    let content = ResultFormatter::new(format).no_color().format_summary(summary);

    let mut file =
        std::fs::File::create(path).with_context(|| format!("Failed to create {path}"))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
