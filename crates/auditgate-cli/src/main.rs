//! auditgate - page audit gating for CI
//!
//! ## Commands
//!
//! - `run`: audit every configured URL, check budgets and write a verdict
//! - `validate`: check a configuration file without auditing anything
//! - `show`: print a previously written verdict after verifying its digest

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use auditgate_core::{
    read_verdict, AuditConfig, AuditPipeline, Cancellation, CommandEngine, ConfigError,
    JsonReportSink,
};

/// Exit code for configuration errors; 0 and 1 come from the verdict.
const EXIT_CONFIG_ERROR: i32 = 2;

#[derive(Parser)]
#[command(name = "auditgate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Audit pages, pick a median run and gate on budgets", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit all targets and write the verdict
    Run {
        /// Path to the JSON configuration
        #[arg(short, long, env = "AUDITGATE_CONFIG")]
        config: Option<PathBuf>,

        /// Target URL (repeatable, replaces the configured list)
        #[arg(short, long = "url")]
        urls: Vec<String>,

        /// Attempts per URL
        #[arg(short, long)]
        runs: Option<u32>,

        /// Maximum number of URLs audited at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Directory for verdict artifacts
        #[arg(short, long, default_value = ".auditgate")]
        output_dir: PathBuf,

        /// Audit engine executable
        #[arg(long, env = "AUDITGATE_ENGINE_BIN", default_value = "lighthouse")]
        engine_bin: String,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the JSON configuration
        #[arg(short, long, env = "AUDITGATE_CONFIG")]
        config: PathBuf,
    },

    /// Print a stored verdict
    Show {
        /// Run ID of the verdict
        run_id: String,

        /// Directory holding verdict artifacts
        #[arg(short, long, default_value = ".auditgate")]
        output_dir: PathBuf,
    },
}

/// Command-line overrides applied on top of the file configuration.
#[derive(Debug, Default)]
struct Overrides {
    urls: Vec<String>,
    runs: Option<u32>,
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    auditgate_core::init_tracing(cli.json, level);

    let code = match cli.command {
        Commands::Run {
            config,
            urls,
            runs,
            concurrency,
            output_dir,
            engine_bin,
        } => {
            let overrides = Overrides {
                urls,
                runs,
                concurrency,
            };
            cmd_run(config.as_deref(), overrides, &output_dir, &engine_bin).await?
        }
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Show { run_id, output_dir } => cmd_show(&run_id, &output_dir)?,
    };

    std::process::exit(code);
}

fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<AuditConfig, ConfigError> {
    let mut config = match path {
        Some(path) => AuditConfig::from_json_file(path)?,
        None => AuditConfig::new(Vec::new()),
    };
    if !overrides.urls.is_empty() {
        config.urls = overrides.urls;
    }
    if let Some(runs) = overrides.runs {
        config.runs = runs;
    }
    if let Some(concurrency) = overrides.concurrency {
        config.concurrency = concurrency;
    }
    config.validate()?;
    Ok(config)
}

async fn cmd_run(
    config_path: Option<&Path>,
    overrides: Overrides,
    output_dir: &Path,
    engine_bin: &str,
) -> Result<i32> {
    let config = match load_config(config_path, overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return Ok(EXIT_CONFIG_ERROR);
        }
    };

    let engine = Arc::new(CommandEngine::new(engine_bin));
    let pipeline = AuditPipeline::new(config, engine)?;

    let cancellation = Cancellation::new();
    let token = cancellation.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight audits");
            cancellation.cancel();
        }
    });

    let sink = JsonReportSink::new(output_dir);
    let verdict = pipeline
        .run_and_publish(&token, &sink)
        .await
        .context("failed to write verdict")?;

    println!("{}", verdict.render_markdown());
    info!(
        run_id = %verdict.run_id,
        passed = verdict.overall_passed,
        output_dir = %output_dir.display(),
        "Verdict written"
    );
    Ok(verdict.exit_code())
}

fn cmd_validate(path: &Path) -> i32 {
    match load_config(Some(path), Overrides::default()) {
        Ok(config) => {
            println!(
                "✓ {} target(s), {} run(s) each, {} budget rule(s)",
                config.urls.len(),
                config.runs,
                config.budgets.len()
            );
            println!("Digest: {}", config.digest());
            0
        }
        Err(e) => {
            eprintln!("✗ {e}");
            EXIT_CONFIG_ERROR
        }
    }
}

fn cmd_show(run_id: &str, output_dir: &Path) -> Result<i32> {
    let verdict = read_verdict(run_id, output_dir)
        .with_context(|| format!("failed to read verdict {run_id}"))?;
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(verdict.exit_code())
}
