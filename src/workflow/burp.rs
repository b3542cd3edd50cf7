//! Burp Suite: upload locally exported XML reports.

use super::{fatal, skip, Destination, RunContext, WorkflowTracker};
use crate::config::BurpConfig;
use crate::dojo::{ReimportApi, TargetStore};
use crate::error::SyncError;
use crate::models::{ScanArtifact, Tool, WorkflowResult};
use crate::selector::logical_service_name;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub async fn run<S>(ctx: &RunContext, destination: Option<&mut Destination<S>>) -> WorkflowResult
where
    S: TargetStore + ReimportApi + Clone,
{
    let tool = Tool::Burp;
    let settings = ctx.config.tool_settings(tool);

    let reports = report_files(&ctx.config.burp);
    if reports.is_empty() {
        return skip(tool, "no reports selected");
    }
    // Reports are already in hand, so a missing engagement is an error, not a skip.
    let Some(engagement_id) = settings.engagement_id else {
        return fatal(
            tool,
            SyncError::Config(format!(
                "{} report(s) selected but no engagement configured",
                reports.len()
            )),
        );
    };
    let Some(destination) = destination else {
        return fatal(tool, SyncError::Auth("DOJO_API_TOKEN is not set".to_string()));
    };

    let mut tracker = WorkflowTracker::running(tool, reports.len(), ctx.show_progress);
    for report in &reports {
        let artifact = artifact_for(report);
        let outcome = if artifact.path().is_file() {
            destination.deliver(&artifact, engagement_id, &settings).await
        } else {
            Err(SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("report not found: {}", artifact.path().display()),
            )))
        };
        tracker.record(&artifact.file_name(), outcome);
    }
    tracker.finish()
}

/// Explicit reports plus every `*.xml` under the report directory, deduplicated.
fn report_files(config: &BurpConfig) -> Vec<PathBuf> {
    let mut files: BTreeSet<PathBuf> = config
        .reports
        .iter()
        .map(|p| PathBuf::from(p.to_string_lossy().trim()))
        .filter(|p| !p.as_os_str().is_empty())
        .collect();

    if let Some(ref dir) = config.report_dir {
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Cannot read Burp report directory entry: {}", e);
                    continue;
                }
            };
            let is_xml = entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
            if entry.file_type().is_file() && is_xml {
                files.insert(entry.into_path());
            }
        }
    }

    debug!("Selected {} Burp report(s)", files.len());
    files.into_iter().collect()
}

fn artifact_for(report: &Path) -> ScanArtifact {
    let stem = report
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    ScanArtifact::new(report, Tool::Burp, logical_service_name(&stem, ""))
}
