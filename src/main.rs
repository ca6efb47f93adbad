//! storage-tests - KubeVirt / CDI storage integration scenarios
//!
//! A CLI that drives a live cluster through DataVolume import, upload and
//! clone, HostPath provisioner placement, VM snapshots and restores, memory
//! dumps and volume hotplug, and reports which of them the storage passes.
//!
//! ## Usage
//!
//! ```bash
//! # Check the cluster first
//! storage-tests preflight
//!
//! # Run every scenario on the default storage class
//! storage-tests run
//!
//! # Run one category on a given storage class
//! storage-tests run --category hostpath --storage-class hostpath-csi-basic
//!
//! # List scenarios
//! storage-tests list --detailed
//!
//! # Inspect stored runs
//! storage-tests results list
//! storage-tests results export 20261016_101500_0042 --output run.csv
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::Path;
use tracing::info;

mod cdi;
mod checks;
mod cli;
mod config;
mod constants;
mod error;
mod executor;
mod http;
mod k8s;
mod kubevirt;
mod models;
mod output;
mod results;
mod scenarios;
mod utils;

use cli::Args;
use config::{AppConfig, EnvConfig};
use executor::{PreflightChecker, ScenarioRunner};
use models::{Category, Scenario};
use output::{OutputFormat, ResultFormatter};
use results::{EnvironmentInfo, ExportFormat, ResultsStorage, StoredRun};
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();

    let verbose = args.verbose || env.verbose.unwrap_or(false);
    init_logger(LogLevel::from_verbose(verbose));

    match args.command {
        cli::Command::Run(run_args) => {
            run_scenarios(run_args, args.config.as_deref(), &env).await?;
        }
        cli::Command::List(list_args) => {
            list_scenarios(list_args)?;
        }
        cli::Command::Upload(upload_args) => {
            upload_image(upload_args, args.config.as_deref()).await?;
        }
        cli::Command::Preflight => {
            preflight(args.config.as_deref()).await?;
        }
        cli::Command::Results(results_args) => {
            show_results(results_args)?;
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args, args.config.as_deref(), &env)?;
        }
    }

    Ok(())
}

fn parse_category(name: &str) -> Result<Category> {
    Category::parse(name).ok_or_else(|| {
        let known: Vec<_> = Category::all().iter().map(|c| c.name()).collect();
        anyhow::anyhow!("Unknown category: {name} (expected one of {})", known.join(", "))
    })
}

/// `--format` wins unless left at its default and the environment sets one
fn output_format(flag: &str, env: &EnvConfig) -> Result<OutputFormat> {
    let name = match (&env.format, flag) {
        (Some(env_format), "table") => env_format.as_str(),
        _ => flag,
    };
    OutputFormat::from_str(name).ok_or_else(|| anyhow::anyhow!("Unknown output format: {name}"))
}

async fn run_scenarios(args: cli::RunArgs, config_path: Option<&str>, env: &EnvConfig) -> Result<()> {
    let mut config = config::load_config(config_path)?;
    if let Some(sc) = args.storage_class {
        config.default_storage_class = Some(sc);
    }
    if args.no_cleanup {
        config.cleanup = false;
    }

    let format = output_format(&args.format, env)?;
    let skip = match args.skip.as_deref() {
        Some(list) => cli::parse_skip_list(list).context("Invalid --skip list")?,
        None => Vec::new(),
    };

    let selected = match (args.scenario, args.category.as_deref()) {
        (Some(number), _) => vec![Scenario::from_number(number)
            .ok_or_else(|| anyhow::anyhow!("Invalid scenario number: {number}"))?],
        (None, Some(category)) => Scenario::in_category(parse_category(category)?),
        (None, None) => Scenario::all(),
    };

    info!(
        "Running {} scenarios in {} on {}",
        selected.len(),
        config.namespace,
        config
            .default_storage_class
            .as_deref()
            .unwrap_or("the default storage class")
    );

    let cnv_version = config.cnv_version.clone();
    let runner = ScenarioRunner::new(config).await?.skip(skip);
    let started_at = Utc::now();
    let summary = if selected.len() == Scenario::all().len() {
        runner.run_all().await
    } else {
        runner.run(&selected).await
    };

    println!("{}", ResultFormatter::new(format).format_summary(&summary));

    if let Some(path) = &args.output {
        output::write_results_to_file(path, &summary, format)?;
        println!("Results written to {path}");
    }

    if !args.no_save {
        let environment = EnvironmentInfo {
            k8s_version: runner.server_version().await,
            cnv_version,
            ..Default::default()
        };
        let stored = StoredRun::new(started_at, summary.clone()).with_environment(environment);
        let path = ResultsStorage::default_dir().save(&stored)?;
        println!("Run {} stored in {}", stored.id, path.display());
    }

    if !summary.is_all_passed() {
        anyhow::bail!(
            "{} scenarios failed, {} errored",
            summary.failed,
            summary.errors
        );
    }
    Ok(())
}

fn list_scenarios(args: cli::ListArgs) -> Result<()> {
    let categories = match args.category.as_deref() {
        Some(name) => vec![parse_category(name)?],
        None => Category::all().to_vec(),
    };

    println!(
        "\nStorage Scenarios ({} total)\n",
        Scenario::all().len()
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for category in categories {
        println!("\n{category} Scenarios:");
        println!("──────────────────────────────────────────────────────────────────────");
        for scenario in Scenario::in_category(category) {
            if args.detailed {
                println!("  {:2}. {:32} {}", scenario.number(), scenario.name(), scenario.description());
            } else {
                println!("  {:2}. {}", scenario.number(), scenario.name());
            }
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    Ok(())
}

async fn upload_image(args: cli::UploadArgs, config_path: Option<&str>) -> Result<()> {
    let config = config::load_config(config_path)?;
    let storage_class = args.storage_class.or(config.default_storage_class.clone());

    let data = cdi::upload::read_upload_data(&args.image);

    let client = k8s::K8sClient::new(&config.namespace).await?;
    client.ensure_namespace().await?;
    let uploads = cdi::UploadManager::new(
        client.clone(),
        http::HttpClient::new()?,
        &config.hco_namespace,
    )
    .with_proxy(config.upload_proxy_url.clone());

    // The DV is the point of this command, so it is never torn down
    let mut keep = k8s::CleanupStack::new(false);
    uploads
        .upload_dv(&args.name, &config.namespace, storage_class.as_deref(), &mut keep)
        .await?;

    if args.asynchronous {
        let token = uploads.token(&config.namespace, &args.name).await?;
        let status = uploads.upload_image(&token, &data, true).await?;
        if status != 200 {
            anyhow::bail!("Async upload to {} returned HTTP {status}", args.name);
        }
    } else {
        uploads
            .upload_with_token(&config.namespace, &args.name, &data)
            .await?;
    }

    cdi::DataVolumeManager::new(client)
        .wait_for_success(&args.name, &config.namespace, config.timeouts.upload())
        .await?;
    println!(
        "✓ Uploaded {} ({} bytes) to DataVolume {}/{}",
        args.image,
        data.len(),
        config.namespace,
        args.name
    );
    Ok(())
}

async fn preflight(config_path: Option<&str>) -> Result<()> {
    let config = config::load_config(config_path)?;
    let client = k8s::K8sClient::new(&config.namespace).await?;

    let result = PreflightChecker::new(client, config).run().await;
    println!("{}", result.format_table());

    if !result.passed {
        anyhow::bail!("{}", result.message);
    }
    Ok(())
}

fn show_results(args: cli::ResultsArgs) -> Result<()> {
    let storage = ResultsStorage::default_dir();

    match args.action {
        cli::ResultsAction::List => {
            let runs = storage.list_runs()?;
            if runs.is_empty() {
                println!("\nNo stored results found.");
                println!("   Run scenarios with: storage-tests run");
                return Ok(());
            }

            println!("\n{:22} {:20} {:28} {:>6} {:>7}", "Run", "Started", "Storage class", "Total", "Pass");
            println!("──────────────────────────────────────────────────────────────────────────────────────");
            for run in runs {
                println!(
                    "{:22} {:20} {:28} {:>6} {:>6.1}%",
                    run.id,
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.storage_class.as_deref().unwrap_or("default"),
                    run.total,
                    run.pass_rate
                );
            }
            println!();
        }

        cli::ResultsAction::Show { id, format } => {
            let run = match id {
                Some(id) => storage.load(&id)?,
                None => storage
                    .latest()?
                    .ok_or_else(|| anyhow::anyhow!("No stored runs"))?,
            };
            let format = OutputFormat::from_str(&format)
                .ok_or_else(|| anyhow::anyhow!("Unknown output format: {format}"))?;

            println!(
                "Run {} ({} to {}, Kubernetes {}, storage-tests {})",
                run.id,
                run.started_at.format("%Y-%m-%d %H:%M:%S"),
                run.completed_at.format("%H:%M:%S"),
                run.environment.k8s_version.as_deref().unwrap_or("unknown"),
                run.environment.tool_version
            );
            println!("{}", ResultFormatter::new(format).format_summary(&run.summary));
        }

        cli::ResultsAction::Export { id, output } => {
            let path = Path::new(&output);
            let format = ExportFormat::from_extension(path)
                .ok_or_else(|| anyhow::anyhow!("Export file must end in .json or .csv: {output}"))?;
            let run = storage.load(&id)?;
            storage.export(&run, path, format)?;
            println!("✓ Exported run {id} to {output}");
        }
    }

    Ok(())
}

fn manage_config(args: cli::ConfigArgs, config_path: Option<&str>, env: &EnvConfig) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {output}. Use --force to overwrite."
                );
            }

            config::write_example(path)?;
            println!("✓ Configuration file created: {output}");
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { env: show_env, format } => {
            if show_env {
                if !env.has_any() {
                    println!("No STORAGE_TESTS_* variables set");
                }
                env.print_summary();
                println!();
                config::print_env_help();
                return Ok(());
            }

            match config_path.map(str::to_string).or_else(|| {
                config::find_config_file().map(|p| p.display().to_string())
            }) {
                Some(path) => println!("# {path}"),
                None => println!("# built-in defaults"),
            }
            let config: AppConfig = config::load_config(config_path)?;
            let output = if format == "json" {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{output}");
        }
    }

    Ok(())
}
