//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::{Severity, Tool};
use clap::Parser;
use std::path::PathBuf;

/// ScanRelay - push security scan results into DefectDojo
///
/// Collects artifacts from GitHub code scanning, Tenable WAS and Burp Suite,
/// finds or creates the matching DefectDojo test and reimports the artifact.
/// Every tool runs on its own: one tool failing never stops the others.
///
/// Examples:
///   scanrelay --org acme --engagement 12
///   scanrelay --tools codeql,tenable --config ./relay.toml
///   scanrelay --tools burp --burp-report ./reports/shop.xml
///   scanrelay --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .scanrelay.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Tools to run (comma-separated), overriding the enabled flags in config
    ///
    /// Example: --tools codeql,burp
    #[arg(long, value_name = "TOOLS", value_delimiter = ',')]
    pub tools: Option<Vec<Tool>>,

    /// GitHub organizations to scan (comma-separated)
    #[arg(long, value_name = "ORGS", value_delimiter = ',')]
    pub org: Option<Vec<String>>,

    /// Default DefectDojo engagement id
    #[arg(long, value_name = "ID")]
    pub engagement: Option<u64>,

    /// DefectDojo base URL
    #[arg(long, value_name = "URL", env = "DOJO_URL")]
    pub dojo_url: Option<String>,

    /// Minimum severity imported by DefectDojo
    #[arg(long, value_name = "LEVEL")]
    pub minimum_severity: Option<Severity>,

    /// Tag applied to imported tests (repeatable)
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Option<Vec<String>>,

    /// Burp Suite XML report to upload (repeatable)
    #[arg(long = "burp-report", value_name = "FILE")]
    pub burp_reports: Vec<PathBuf>,

    /// DefectDojo API token
    #[arg(long, env = "DOJO_API_TOKEN", hide_env_values = true)]
    pub dojo_token: Option<String>,

    /// GitHub token with security_events scope
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Tenable access key
    #[arg(long, env = "TENABLE_ACCESS_KEY", hide_env_values = true)]
    pub tenable_access_key: Option<String>,

    /// Tenable secret key
    #[arg(long, env = "TENABLE_SECRET_KEY", hide_env_values = true)]
    pub tenable_secret_key: Option<String>,

    /// Write the run summary to this file
    #[arg(long, value_name = "FILE")]
    pub summary: Option<PathBuf>,

    /// Summary format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Keep downloaded artifacts after the run
    #[arg(long)]
    pub keep_artifacts: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .scanrelay.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref url) = self.dojo_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("DefectDojo URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.engagement == Some(0) {
            return Err("Engagement id must be a positive number".to_string());
        }

        if let Some(ref tools) = self.tools {
            if tools.is_empty() {
                return Err("--tools needs at least one tool".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
