//! ScanRelay - security scan ingestion for DefectDojo
//!
//! A CLI tool that collects scan artifacts from GitHub code scanning,
//! Tenable WAS and Burp Suite and reimports them into DefectDojo tests.
//!
//! Exit codes:
//!   0 - Every enabled tool finished without failures
//!   1 - Runtime error (invalid arguments, config, client setup)
//!   2 - At least one tool reported failed items

mod cli;
mod config;
mod dojo;
mod error;
mod filter;
mod models;
mod pagination;
mod report;
mod selector;
mod sources;
mod workflow;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use dojo::DojoClient;
use report::RunSummary;
use std::path::PathBuf;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use workflow::{Credentials, Destination, RunContext};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("ScanRelay v{}", env!("CARGO_PKG_VERSION"));
    debug!(
        "Tools: {:?}, orgs: {:?}, engagement: {:?}",
        args.tools, args.org, args.engagement
    );

    match run_relay(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .scanrelay.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Credentials are read from DOJO_API_TOKEN, GITHUB_TOKEN,");
    println!("   TENABLE_ACCESS_KEY and TENABLE_SECRET_KEY, never from the file.");
    Ok(())
}

/// Initialize logging. `RUST_LOG` wins over the verbosity flags.
fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level().to_string().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Warning: a tracing subscriber was already installed");
    }
}

/// Run the batch. Returns the exit code (0 or 2).
async fn run_relay(args: Args) -> Result<i32> {
    let start_time = Instant::now();
    let started_at = Utc::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate().context("Invalid configuration")?;

    let keep_artifacts = config.general.keep_artifacts;
    let (work_dir, temp_dir) = prepare_work_dir(&config)?;
    debug!("Artifacts go to: {}", work_dir.display());

    let ctx = RunContext::new(config, Credentials::from_args(&args), work_dir)
        .with_progress(!args.quiet);

    let enabled = ctx.config.enabled_tools();
    if enabled.is_empty() {
        warn!("No tools enabled; nothing to do");
    } else {
        let names: Vec<String> = enabled.iter().map(|t| t.to_string()).collect();
        info!("Running: {}", names.join(", "));
    }

    let mut destination = match ctx.credentials.dojo_token.as_deref() {
        Some(token) => {
            let client = DojoClient::new(
                &ctx.config.dojo.url,
                token,
                ctx.config.general.timeout_seconds,
                ctx.config.dojo.page_size,
            )
            .context("Failed to build DefectDojo client")?;
            Some(Destination::new(
                client,
                ctx.config.upload_policy(),
                started_at.date_naive(),
            ))
        }
        None => {
            warn!("DOJO_API_TOKEN is not set; tools with work to upload will fail");
            None
        }
    };

    let results = workflow::run_batch(&ctx, destination.as_mut()).await;

    if let Some(temp_dir) = temp_dir {
        if keep_artifacts {
            let kept = temp_dir.keep();
            info!("Kept downloaded artifacts in {}", kept.display());
        }
    }

    let summary = RunSummary {
        started_at,
        duration_seconds: start_time.elapsed().as_secs_f64(),
        results,
    };

    let output = match args.format {
        OutputFormat::Json => report::generate_json_summary(&summary)?,
        OutputFormat::Markdown => report::generate_markdown_summary(&summary),
    };
    println!("{}", output);

    if let Some(ref path) = args.summary {
        report::write_summary(&output, path)?;
        info!("Summary saved to {}", path.display());
    }

    let exit_code = summary.exit_code();
    if exit_code != 0 {
        eprintln!(
            "\n⛔ {} tool(s) reported failures (exit code {}).",
            summary.failed_tools(),
            exit_code
        );
    }
    Ok(exit_code)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default()? {
        Some(config) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        None => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

/// Directory for downloaded artifacts: the configured one, or a fresh
/// temporary directory that is removed when dropped.
fn prepare_work_dir(config: &Config) -> Result<(PathBuf, Option<TempDir>)> {
    if let Some(ref dir) = config.general.work_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create work directory: {}", dir.display()))?;
        return Ok((dir.clone(), None));
    }

    let temp = tempfile::Builder::new()
        .prefix("scanrelay-")
        .tempdir()
        .context("Failed to create temporary directory")?;
    Ok((temp.path().to_path_buf(), Some(temp)))
}
