//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.scanrelay.toml` files. Every optional field has an explicit default, so
//! the rest of the program only ever sees a fully resolved `Config`.
//! Credentials are never read from the file.

use crate::dojo::UploadPolicy;
use crate::filter::compile_patterns;
use crate::models::{Severity, TestTypeRef, Tool};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".scanrelay.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Destination (DefectDojo) settings.
    #[serde(default)]
    pub dojo: DojoConfig,

    /// GitHub enumeration settings.
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub codeql: CodeQlConfig,

    #[serde(default)]
    pub tenable: TenableConfig,

    #[serde(default)]
    pub burp: BurpConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory downloaded artifacts are written to. A temporary directory
    /// is used when unset.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Keep downloaded artifacts after the run.
    #[serde(default)]
    pub keep_artifacts: bool,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            keep_artifacts: false,
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    120
}

/// Destination settings and import policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DojoConfig {
    #[serde(default = "default_dojo_url")]
    pub url: String,

    /// Engagement used by every tool without its own override.
    #[serde(default)]
    pub default_engagement_id: Option<u64>,

    #[serde(default)]
    pub minimum_severity: Severity,

    #[serde(default = "default_true")]
    pub close_old_findings: bool,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default = "default_true")]
    pub apply_tags_to_findings: bool,

    #[serde(default)]
    pub apply_tags_to_endpoints: bool,

    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for DojoConfig {
    fn default() -> Self {
        Self {
            url: default_dojo_url(),
            default_engagement_id: None,
            minimum_severity: Severity::default(),
            close_old_findings: true,
            tags: Vec::new(),
            apply_tags_to_findings: true,
            apply_tags_to_endpoints: false,
            page_size: default_page_size(),
        }
    }
}

fn default_dojo_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> usize {
    100
}

/// Organization and repository scope for GitHub-backed tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_github_url")]
    pub api_url: String,

    #[serde(default)]
    pub organizations: Vec<String>,

    #[serde(default = "default_true")]
    pub skip_archived: bool,

    /// Repository name globs to keep (`*`, `?`; case-insensitive).
    #[serde(default)]
    pub include: Vec<String>,

    /// Repository name globs to drop.
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_url(),
            organizations: Vec::new(),
            skip_archived: true,
            include: Vec::new(),
            exclude: Vec::new(),
            page_size: default_page_size(),
        }
    }
}

fn default_github_url() -> String {
    "https://api.github.com".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeQlConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub engagement_id: Option<u64>,

    #[serde(default = "default_sarif")]
    pub scan_type: String,

    #[serde(default = "default_sarif_type")]
    pub test_type: TestTypeRef,
}

impl Default for CodeQlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            engagement_id: None,
            scan_type: default_sarif(),
            test_type: default_sarif_type(),
        }
    }
}

fn default_sarif() -> String {
    "SARIF".to_string()
}

fn default_sarif_type() -> TestTypeRef {
    TestTypeRef::Name(default_sarif())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenableConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub engagement_id: Option<u64>,

    #[serde(default = "default_tenable_scan")]
    pub scan_type: String,

    #[serde(default = "default_tenable_type")]
    pub test_type: TestTypeRef,

    #[serde(default = "default_tenable_url")]
    pub url: String,

    /// Fixed wait between requesting a report and fetching it.
    #[serde(default = "default_report_wait")]
    pub report_wait_seconds: u64,

    /// Scan config name globs to keep.
    #[serde(default)]
    pub include: Vec<String>,

    /// Scan config name globs to drop.
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for TenableConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            engagement_id: None,
            scan_type: default_tenable_scan(),
            test_type: default_tenable_type(),
            url: default_tenable_url(),
            report_wait_seconds: default_report_wait(),
            include: Vec::new(),
            exclude: Vec::new(),
            page_size: default_page_size(),
        }
    }
}

fn default_tenable_scan() -> String {
    "Tenable Scan".to_string()
}

fn default_tenable_type() -> TestTypeRef {
    TestTypeRef::Name(default_tenable_scan())
}

fn default_tenable_url() -> String {
    "https://cloud.tenable.com".to_string()
}

fn default_report_wait() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurpConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub engagement_id: Option<u64>,

    #[serde(default = "default_burp_scan")]
    pub scan_type: String,

    #[serde(default = "default_burp_type")]
    pub test_type: TestTypeRef,

    /// Explicitly selected report files.
    #[serde(default)]
    pub reports: Vec<PathBuf>,

    /// Directory searched recursively for `*.xml` reports.
    #[serde(default)]
    pub report_dir: Option<PathBuf>,
}

impl Default for BurpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            engagement_id: None,
            scan_type: default_burp_scan(),
            test_type: default_burp_type(),
            reports: Vec::new(),
            report_dir: None,
        }
    }
}

fn default_burp_scan() -> String {
    "Burp Scan".to_string()
}

fn default_burp_type() -> TestTypeRef {
    TestTypeRef::Name(default_burp_scan())
}

/// Per-tool view of the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSettings {
    pub enabled: bool,
    /// Tool override, falling back to the default engagement.
    pub engagement_id: Option<u64>,
    pub scan_type: String,
    pub test_type: TestTypeRef,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, and only
    /// when they were given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref tools) = args.tools {
            self.codeql.enabled = tools.contains(&Tool::CodeQl);
            self.tenable.enabled = tools.contains(&Tool::Tenable);
            self.burp.enabled = tools.contains(&Tool::Burp);
        }

        if let Some(ref orgs) = args.org {
            self.github.organizations = orgs.clone();
        }
        if let Some(engagement) = args.engagement {
            self.dojo.default_engagement_id = Some(engagement);
        }
        if let Some(ref url) = args.dojo_url {
            self.dojo.url = url.clone();
        }
        if let Some(severity) = args.minimum_severity {
            self.dojo.minimum_severity = severity;
        }
        if let Some(ref tags) = args.tags {
            self.dojo.tags = tags.clone();
        }

        self.burp.reports.extend(args.burp_reports.iter().cloned());

        if args.keep_artifacts {
            self.general.keep_artifacts = true;
        }
    }

    /// Check everything that can be checked without a network call.
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("dojo.url", &self.dojo.url),
            ("github.api_url", &self.github.api_url),
            ("tenable.url", &self.tenable.url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("{} must start with 'http://' or 'https://': {}", name, url);
            }
        }

        for (name, size) in [
            ("dojo.page_size", self.dojo.page_size),
            ("github.page_size", self.github.page_size),
            ("tenable.page_size", self.tenable.page_size),
        ] {
            if size == 0 {
                bail!("{} must be at least 1", name);
            }
        }

        if self.github.page_size > 100 {
            bail!("github.page_size cannot exceed 100");
        }

        if self.general.timeout_seconds == 0 {
            bail!("general.timeout_seconds must be at least 1");
        }

        for patterns in [
            &self.github.include,
            &self.github.exclude,
            &self.tenable.include,
            &self.tenable.exclude,
        ] {
            compile_patterns(patterns)?;
        }

        Ok(())
    }

    /// Resolve the settings of one tool.
    pub fn tool_settings(&self, tool: Tool) -> ToolSettings {
        let (enabled, engagement_id, scan_type, test_type) = match tool {
            Tool::CodeQl => (
                self.codeql.enabled,
                self.codeql.engagement_id,
                &self.codeql.scan_type,
                &self.codeql.test_type,
            ),
            Tool::Tenable => (
                self.tenable.enabled,
                self.tenable.engagement_id,
                &self.tenable.scan_type,
                &self.tenable.test_type,
            ),
            Tool::Burp => (
                self.burp.enabled,
                self.burp.engagement_id,
                &self.burp.scan_type,
                &self.burp.test_type,
            ),
        };

        ToolSettings {
            enabled,
            engagement_id: engagement_id.or(self.dojo.default_engagement_id),
            scan_type: scan_type.clone(),
            test_type: test_type.clone(),
        }
    }

    /// Tools enabled for this run, in batch order.
    pub fn enabled_tools(&self) -> Vec<Tool> {
        Tool::ALL
            .into_iter()
            .filter(|t| self.tool_settings(*t).enabled)
            .collect()
    }

    /// Configured organizations, trimmed, with blanks removed.
    pub fn organizations(&self) -> Vec<String> {
        self.github
            .organizations
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            minimum_severity: self.dojo.minimum_severity,
            close_old_findings: self.dojo.close_old_findings,
            tags: self.dojo.tags.clone(),
            apply_tags_to_findings: self.dojo.apply_tags_to_findings,
            apply_tags_to_endpoints: self.dojo.apply_tags_to_endpoints,
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
