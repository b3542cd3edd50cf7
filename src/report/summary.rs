//! Run summary generation.
//!
//! Renders the per-tool counters of a batch run as Markdown or JSON, for
//! the console and for whatever posts the run notification.

use crate::models::WorkflowResult;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// Phrase used for a tool that found nothing at all.
pub const NO_FINDINGS: &str = "no findings to upload";

/// Everything the summary shows about one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub results: Vec<WorkflowResult>,
}

#[derive(Serialize)]
struct ToolLine<'a> {
    #[serde(flatten)]
    result: &'a WorkflowResult,
    status: &'static str,
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    started_at: &'a DateTime<Utc>,
    duration_seconds: f64,
    failed_tools: usize,
    results: Vec<ToolLine<'a>>,
}

impl RunSummary {
    /// Tools that had at least one failure.
    pub fn failed_tools(&self) -> usize {
        self.results.iter().filter(|r| r.has_failures()).count()
    }

    /// 0 when every tool finished cleanly, 2 when any tool had a failure.
    pub fn exit_code(&self) -> i32 {
        if self.failed_tools() > 0 {
            2
        } else {
            0
        }
    }
}

/// Short status of one tool's result.
pub fn status_of(result: &WorkflowResult) -> &'static str {
    if result.found_nothing() {
        NO_FINDINGS
    } else if result.has_failures() {
        "failed"
    } else if result.total == 0 {
        "skipped"
    } else if result.skipped > 0 {
        "partial"
    } else {
        "ok"
    }
}

/// Generate a Markdown summary.
pub fn generate_markdown_summary(summary: &RunSummary) -> String {
    let mut output = String::new();

    output.push_str("# ScanRelay Summary\n\n");
    output.push_str(&format!(
        "- **Run Date:** {}\n",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    output.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        summary.duration_seconds
    ));
    if summary.failed_tools() > 0 {
        output.push_str(&format!(
            "- **Tools With Failures:** {}\n",
            summary.failed_tools()
        ));
    }
    output.push('\n');

    output.push_str("## Results\n\n");
    if summary.results.is_empty() {
        output.push_str("No tools were enabled for this run.\n\n");
        return output;
    }

    output.push_str("| Tool | Uploaded | Failed | Skipped | Total | Status |\n");
    output.push_str("|:---|:---:|:---:|:---:|:---:|:---|\n");
    for result in &summary.results {
        output.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            result.tool,
            result.success,
            result.failed,
            result.skipped,
            result.total,
            status_of(result)
        ));
    }
    output.push('\n');

    output
}

/// Generate a JSON summary.
pub fn generate_json_summary(summary: &RunSummary) -> Result<String> {
    let json = JsonSummary {
        started_at: &summary.started_at,
        duration_seconds: summary.duration_seconds,
        failed_tools: summary.failed_tools(),
        results: summary
            .results
            .iter()
            .map(|result| ToolLine {
                result,
                status: status_of(result),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&json).map_err(Into::into)
}

/// Write a rendered summary to a file.
pub fn write_summary(content: &str, path: &Path) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write summary to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tool;

    fn result(
        tool: Tool,
        success: usize,
        failed: usize,
        skipped: usize,
        total: usize,
    ) -> WorkflowResult {
        WorkflowResult {
            tool,
            success,
            failed,
            skipped,
            total,
        }
    }

    fn create_test_summary() -> RunSummary {
        RunSummary {
            started_at: Utc::now(),
            duration_seconds: 12.5,
            results: vec![
                result(Tool::CodeQl, 3, 1, 0, 4),
                result(Tool::Tenable, 0, 0, 0, 0),
                WorkflowResult::skipped(Tool::Burp),
            ],
        }
    }

    #[test]
    fn test_status_of() {
        assert_eq!(status_of(&result(Tool::Burp, 0, 0, 0, 0)), NO_FINDINGS);
        assert_eq!(status_of(&WorkflowResult::skipped(Tool::Burp)), "skipped");
        assert_eq!(status_of(&WorkflowResult::fatal(Tool::Burp)), "failed");
        assert_eq!(status_of(&result(Tool::Tenable, 1, 0, 1, 2)), "partial");
        assert_eq!(status_of(&result(Tool::CodeQl, 2, 0, 0, 2)), "ok");
    }

    #[test]
    fn test_generate_markdown_summary() {
        let markdown = generate_markdown_summary(&create_test_summary());

        assert!(markdown.contains("# ScanRelay Summary"));
        assert!(markdown.contains("| CodeQL | 3 | 1 | 0 | 4 | failed |"));
        assert!(markdown.contains("| Tenable WAS | 0 | 0 | 0 | 0 | no findings to upload |"));
        assert!(markdown.contains("| Burp Suite | 0 | 0 | 1 | 0 | skipped |"));
        assert!(markdown.contains("Tools With Failures:** 1"));
    }

    #[test]
    fn test_generate_json_summary() {
        let json = generate_json_summary(&create_test_summary()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["failed_tools"], 1);
        assert_eq!(value["results"][0]["tool"], "codeql");
        assert_eq!(value["results"][0]["success"], 3);
        assert_eq!(value["results"][1]["status"], NO_FINDINGS);
    }

    #[test]
    fn test_exit_code() {
        let mut summary = create_test_summary();
        assert_eq!(summary.exit_code(), 2);

        summary.results.remove(0);
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn test_write_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.md");
        write_summary("# done\n", &path).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# done\n");
    }
}
