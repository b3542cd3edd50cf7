//! Data models for the ingestion pipeline.
//!
//! All of these are run-scoped values. The only state that outlives a run is
//! the remote upload target, which is re-read every run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A scanning service the batch knows how to ingest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    /// GitHub code scanning (CodeQL) SARIF results
    #[value(name = "codeql")]
    CodeQl,
    /// Tenable Web App Scanning reports
    Tenable,
    /// Locally exported Burp Suite XML reports
    Burp,
}

impl Tool {
    /// Batch order. Tools always run in this sequence.
    pub const ALL: [Tool; 3] = [Tool::CodeQl, Tool::Tenable, Tool::Burp];

    /// Suffix appended to a logical service name to build a target title.
    pub fn title_suffix(&self) -> &'static str {
        match self {
            Tool::CodeQl => "CodeQL",
            Tool::Tenable => "Tenable WAS",
            Tool::Burp => "Burp",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tool::CodeQl => write!(f, "CodeQL"),
            Tool::Tenable => write!(f, "Tenable WAS"),
            Tool::Burp => write!(f, "Burp Suite"),
        }
    }
}

/// Minimum severity accepted by the destination on import.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "Info"),
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
            Severity::Critical => write!(f, "Critical"),
        }
    }
}

/// A source repository, fetched fresh each run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub owner: String,
    pub name: String,
    pub archived: bool,
}

impl Repository {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// One scan record belonging to a `(repository, category)` group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRecord {
    pub id: u64,
    pub owner: String,
    pub repository: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub results_count: u64,
    /// Opaque locator used to fetch the artifact content.
    pub content_ref: String,
}

/// A local scan artifact ready to be forwarded as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanArtifact {
    path: PathBuf,
    pub origin: Tool,
    /// Normalized name used to name or match the destination target.
    pub service_name: String,
}

impl ScanArtifact {
    /// Paths are normalized here, where the artifact is produced, so nothing
    /// downstream has to trim or re-coerce them.
    pub fn new(path: impl AsRef<Path>, origin: Tool, service_name: impl Into<String>) -> Self {
        let raw = path.as_ref().to_string_lossy();
        Self {
            path: PathBuf::from(raw.trim()),
            origin,
            service_name: service_name.into().trim().to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "artifact".to_string())
    }

    /// Title a freshly created target gets.
    pub fn target_title(&self) -> String {
        format!("{} ({})", self.service_name, self.origin.title_suffix())
    }

    /// Titles earlier runs may have used for the same target.
    ///
    /// Only CodeQL targets were ever titled with the bare service name, so
    /// the other tools never match one and cannot reimport into it.
    pub fn target_aliases(&self) -> Vec<String> {
        match self.origin {
            Tool::CodeQl => vec![self.target_title(), self.service_name.clone()],
            Tool::Tenable | Tool::Burp => vec![self.target_title()],
        }
    }
}

/// A destination record artifacts are uploaded into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub id: u64,
    pub title: String,
    pub engagement_id: u64,
}

/// A target type given either as a destination id or as an exact name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestTypeRef {
    Id(u64),
    Name(String),
}

impl fmt::Display for TestTypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestTypeRef::Id(id) => write!(f, "#{}", id),
            TestTypeRef::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Outcome of one successfully processed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Uploaded { target_id: u64 },
}

/// Per-tool counters for one batch run. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub tool: Tool,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
}

impl WorkflowResult {
    /// A precondition failed before any remote call.
    pub fn skipped(tool: Tool) -> Self {
        Self {
            tool,
            success: 0,
            failed: 0,
            skipped: 1,
            total: 0,
        }
    }

    /// The tool could not start at all.
    pub fn fatal(tool: Tool) -> Self {
        Self {
            tool,
            success: 0,
            failed: 1,
            skipped: 0,
            total: 0,
        }
    }

    /// Nothing was found, nothing was skipped and nothing failed.
    pub fn found_nothing(&self) -> bool {
        self.total == 0 && self.skipped == 0 && self.failed == 0
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}
