//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};

/// KubeVirt / CDI storage integration scenarios
#[derive(Parser, Debug)]
#[command(name = "storage-tests")]
#[command(version)]
#[command(about = "Run storage scenarios against a KubeVirt cluster with CDI")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run storage scenarios
    Run(RunArgs),

    /// List available scenarios
    List(ListArgs),

    /// Upload a local disk image into a new upload DataVolume
    Upload(UploadArgs),

    /// Check the cluster has what the scenarios need
    Preflight,

    /// View stored run results
    Results(ResultsArgs),

    /// Show or create configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Specific scenario number to run
    #[arg(short, long)]
    pub scenario: Option<u8>,

    /// Run one category (import, upload, clone, hostpath, snapshot, virt)
    #[arg(long, conflicts_with = "scenario")]
    pub category: Option<String>,

    /// Skip specific scenarios (comma-separated numbers)
    #[arg(long)]
    pub skip: Option<String>,

    /// Storage class, overriding the configured one
    #[arg(long)]
    pub storage_class: Option<String>,

    /// Leave created resources in place
    #[arg(long)]
    pub no_cleanup: bool,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Save results to file
    #[arg(short, long)]
    pub output: Option<String>,

    /// Do not store the run in the results directory
    #[arg(long)]
    pub no_save: bool,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Show scenario descriptions
    #[arg(short, long)]
    pub detailed: bool,

    /// Only list one category
    #[arg(long)]
    pub category: Option<String>,
}

/// Arguments for upload command
#[derive(Parser, Debug)]
pub struct UploadArgs {
    /// DataVolume name
    pub name: String,

    /// Local image file, or literal data when no such file exists
    pub image: String,

    /// Storage class, overriding the configured one
    #[arg(long)]
    pub storage_class: Option<String>,

    /// Use the asynchronous upload endpoint
    #[arg(long = "async")]
    pub asynchronous: bool,
}

/// Arguments for results command
#[derive(Parser, Debug)]
pub struct ResultsArgs {
    #[command(subcommand)]
    pub action: ResultsAction,
}

#[derive(Subcommand, Debug)]
pub enum ResultsAction {
    /// List stored runs
    List,

    /// Show one run (latest when no id is given)
    Show {
        id: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Export a run to JSON or CSV, picked from the file extension
    Export {
        id: String,

        /// Destination file (.json or .csv)
        #[arg(short, long)]
        output: String,
    },
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show {
        /// Show environment variables instead
        #[arg(short, long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Write an example configuration file
    Init {
        #[arg(short, long, default_value = "./storage-tests.yaml")]
        output: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Parse a comma-separated list of scenario numbers
pub fn parse_skip_list(skip: &str) -> Result<Vec<u8>, std::num::ParseIntError> {
    skip.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}
