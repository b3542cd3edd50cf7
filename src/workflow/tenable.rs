//! Tenable WAS: request, wait for and upload the report of every completed scan.

use super::{fatal, skip, Destination, RunContext, WorkflowTracker};
use crate::config::ToolSettings;
use crate::dojo::{ReimportApi, TargetStore};
use crate::error::SyncError;
use crate::filter::{compile_patterns, matches_any};
use crate::models::{ItemOutcome, ScanArtifact, Tool, WorkflowResult};
use crate::pagination::Paginator;
use crate::selector::logical_service_name;
use crate::sources::tenable::ScanConfig;
use crate::sources::TenableClient;
use std::time::Duration;
use tracing::{debug, info};

/// A scan config whose last scan completed.
struct ReportCandidate {
    name: String,
    scan_id: String,
}

pub async fn run<S>(ctx: &RunContext, destination: Option<&mut Destination<S>>) -> WorkflowResult
where
    S: TargetStore + ReimportApi + Clone,
{
    let tool = Tool::Tenable;
    let settings = ctx.config.tool_settings(tool);

    let Some(engagement_id) = settings.engagement_id else {
        return skip(tool, "no engagement configured");
    };
    let Some((access_key, secret_key)) = ctx.credentials.tenable_keys() else {
        return fatal(
            tool,
            SyncError::Auth("TENABLE_ACCESS_KEY and TENABLE_SECRET_KEY must be set".to_string()),
        );
    };
    let Some(destination) = destination else {
        return fatal(tool, SyncError::Auth("DOJO_API_TOKEN is not set".to_string()));
    };

    let tenable = &ctx.config.tenable;
    let client = match TenableClient::new(
        &tenable.url,
        access_key,
        secret_key,
        ctx.config.general.timeout_seconds,
    ) {
        Ok(client) => client,
        Err(e) => return fatal(tool, e),
    };

    let configs = Paginator::new(tenable.page_size)
        .collect(&client.scan_configs(), |c| c.config_id.clone())
        .await;
    let candidates = match in_scope(configs, &tenable.include, &tenable.exclude) {
        Ok(candidates) => candidates,
        Err(e) => return fatal(tool, e),
    };

    let wait = Duration::from_secs(tenable.report_wait_seconds);
    let mut tracker = WorkflowTracker::running(tool, candidates.len(), ctx.show_progress);
    for candidate in &candidates {
        let outcome = process(
            ctx,
            &client,
            destination,
            engagement_id,
            &settings,
            candidate,
            wait,
        )
        .await;
        tracker.record(&candidate.name, outcome);
    }
    tracker.finish()
}

/// Configs matching the name globs that have a completed scan to report on.
fn in_scope(
    configs: Vec<ScanConfig>,
    include: &[String],
    exclude: &[String],
) -> Result<Vec<ReportCandidate>, SyncError> {
    let include = compile_patterns(include)?;
    let exclude = compile_patterns(exclude)?;
    let listed = configs.len();

    let candidates: Vec<ReportCandidate> = configs
        .into_iter()
        .filter(|c| include.is_empty() || matches_any(&include, &c.name))
        .filter(|c| !matches_any(&exclude, &c.name))
        .filter_map(|c| {
            let scan_id = c.completed_scan_id().map(String::from);
            match scan_id {
                Some(scan_id) => Some(ReportCandidate {
                    name: c.name,
                    scan_id,
                }),
                None => {
                    debug!("Scan config '{}' has no completed scan", c.name);
                    None
                }
            }
        })
        .collect();

    info!(
        "{} of {} scan configs have a completed scan in scope",
        candidates.len(),
        listed
    );
    Ok(candidates)
}

async fn process<S>(
    ctx: &RunContext,
    client: &TenableClient,
    destination: &mut Destination<S>,
    engagement_id: u64,
    settings: &ToolSettings,
    candidate: &ReportCandidate,
    wait: Duration,
) -> Result<ItemOutcome, SyncError>
where
    S: TargetStore + ReimportApi + Clone,
{
    let service_name = logical_service_name(&candidate.name, "");

    client.request_report(&candidate.scan_id).await?;
    ctx.sleeper.sleep(wait).await;

    let path = client
        .download_report(&candidate.scan_id, &file_stem(&service_name), &ctx.work_dir)
        .await
        .map_err(SyncError::into_pending_if_generating)?;

    let artifact = ScanArtifact::new(path, Tool::Tenable, service_name);
    destination.deliver(&artifact, engagement_id, settings).await
}

/// Filesystem-safe version of a config name.
fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "report".to_string()
    } else {
        stem
    }
}
