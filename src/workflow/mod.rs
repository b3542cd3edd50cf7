//! Per-tool ingestion workflows and the batch runner.
//!
//! Each tool goes through the same lifecycle: preconditions are checked
//! before any remote call, candidates are discovered, then every item is
//! processed on its own. An item failure is counted and the loop moves on.
//! A precondition failure yields `Skipped` (nothing to do) or a fatal result
//! (the tool was asked to run but cannot), and never touches the network.

pub mod burp;
pub mod codeql;
pub mod sleeper;
pub mod tenable;

use crate::cli::Args;
use crate::config::{Config, ToolSettings};
use crate::dojo::{ArtifactUploader, ReimportApi, TargetResolver, TargetStore, UploadPolicy};
use crate::error::SyncError;
use crate::models::{ItemOutcome, ScanArtifact, Tool, WorkflowResult};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub use sleeper::{Sleeper, TokioSleeper};

/// Secrets supplied through flags or the environment. Blank values count as missing.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub dojo_token: Option<String>,
    pub github_token: Option<String>,
    pub tenable_access_key: Option<String>,
    pub tenable_secret_key: Option<String>,
}

impl Credentials {
    pub fn from_args(args: &Args) -> Self {
        Self {
            dojo_token: present(&args.dojo_token),
            github_token: present(&args.github_token),
            tenable_access_key: present(&args.tenable_access_key),
            tenable_secret_key: present(&args.tenable_secret_key),
        }
    }

    /// Both Tenable keys, or nothing.
    pub fn tenable_keys(&self) -> Option<(&str, &str)> {
        Some((
            self.tenable_access_key.as_deref()?,
            self.tenable_secret_key.as_deref()?,
        ))
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Everything a tool workflow needs besides the destination.
pub struct RunContext {
    pub config: Config,
    pub credentials: Credentials,
    /// Where downloaded artifacts are written.
    pub work_dir: PathBuf,
    pub sleeper: Arc<dyn Sleeper>,
    pub show_progress: bool,
}

impl RunContext {
    pub fn new(config: Config, credentials: Credentials, work_dir: PathBuf) -> Self {
        Self {
            config,
            credentials,
            work_dir,
            sleeper: Arc::new(TokioSleeper),
            show_progress: false,
        }
    }

    #[cfg(test)]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }
}

/// The destination side of a run: target resolution plus upload, sharing
/// one client and one per-run target cache across all tools.
pub struct Destination<S> {
    resolver: TargetResolver<S>,
    uploader: ArtifactUploader<S>,
}

impl<S> Destination<S>
where
    S: TargetStore + ReimportApi + Clone,
{
    pub fn new(client: S, policy: UploadPolicy, run_date: NaiveDate) -> Self {
        Self {
            resolver: TargetResolver::new(client.clone(), run_date),
            uploader: ArtifactUploader::new(client, policy),
        }
    }

    #[cfg(test)]
    pub fn client(&self) -> &S {
        self.resolver.store()
    }

    /// Resolve the artifact's target and reimport the artifact into it.
    pub async fn deliver(
        &mut self,
        artifact: &ScanArtifact,
        engagement_id: u64,
        settings: &ToolSettings,
    ) -> Result<ItemOutcome, SyncError> {
        let target_id = self
            .resolver
            .resolve_or_create(
                engagement_id,
                &artifact.target_title(),
                &artifact.target_aliases(),
                &settings.test_type,
            )
            .await?;

        self.uploader
            .upload(artifact, target_id, &settings.scan_type)
            .await?;

        Ok(ItemOutcome::Uploaded { target_id })
    }
}

/// Counters of a tool that got past its preconditions.
pub struct WorkflowTracker {
    tool: Tool,
    total: usize,
    success: usize,
    failed: usize,
    skipped: usize,
    progress: ProgressBar,
}

impl WorkflowTracker {
    pub fn running(tool: Tool, total: usize, show_progress: bool) -> Self {
        info!("{}: {} item(s) to process", tool, total);

        let progress = if show_progress && total > 0 {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} {prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb.set_prefix(tool.to_string());
            pb
        } else {
            ProgressBar::hidden()
        };

        Self {
            tool,
            total,
            success: 0,
            failed: 0,
            skipped: 0,
            progress,
        }
    }

    /// Count the outcome of one item. A report that is still being
    /// generated counts as skipped; the next run picks it up.
    pub fn record(&mut self, item: &str, outcome: Result<ItemOutcome, SyncError>) {
        match outcome {
            Ok(ItemOutcome::Uploaded { target_id }) => {
                self.success += 1;
                debug!("{}: {} uploaded to target {}", self.tool, item, target_id);
            }
            Err(e) if e.is_not_ready() => {
                self.skipped += 1;
                warn!("{}: {} skipped, {}", self.tool, item, e);
            }
            Err(e) => {
                self.failed += 1;
                error!("{}: {} failed: {}", self.tool, item, e);
            }
        }
        self.progress.set_message(item.to_string());
        self.progress.inc(1);
    }

    pub fn finish(self) -> WorkflowResult {
        self.progress.finish_and_clear();
        info!(
            "{}: {} uploaded, {} failed, {} skipped of {}",
            self.tool, self.success, self.failed, self.skipped, self.total
        );
        WorkflowResult {
            tool: self.tool,
            success: self.success,
            failed: self.failed,
            skipped: self.skipped,
            total: self.total,
        }
    }
}

/// Precondition not met; the tool has nothing to do this run.
pub fn skip(tool: Tool, reason: &str) -> WorkflowResult {
    info!("{}: skipped, {}", tool, reason);
    WorkflowResult::skipped(tool)
}

/// The tool was asked to run but cannot start.
pub fn fatal(tool: Tool, reason: SyncError) -> WorkflowResult {
    error!("{}: cannot run: {}", tool, reason);
    WorkflowResult::fatal(tool)
}

/// Run every enabled tool in batch order. One tool's failure never stops
/// the next one.
pub async fn run_batch<S>(
    ctx: &RunContext,
    mut destination: Option<&mut Destination<S>>,
) -> Vec<WorkflowResult>
where
    S: TargetStore + ReimportApi + Clone,
{
    let mut results = Vec::new();

    for tool in ctx.config.enabled_tools() {
        let result = match tool {
            Tool::CodeQl => codeql::run(ctx, destination.as_deref_mut()).await,
            Tool::Tenable => tenable::run(ctx, destination.as_deref_mut()).await,
            Tool::Burp => burp::run(ctx, destination.as_deref_mut()).await,
        };
        results.push(result);
    }

    results
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dojo::resolver::tests::MemoryStore;
    use crate::dojo::uploader::tests::RecordingApi;
    use crate::dojo::{NewTarget, ReimportAck, ReimportRequest};
    use crate::models::{Severity, UploadTarget};
    use async_trait::async_trait;

    /// In-memory destination: a target store plus a recording reimport API.
    #[derive(Clone, Default)]
    pub(crate) struct FakeDojo {
        pub store: Arc<MemoryStore>,
        pub api: Arc<RecordingApi>,
    }

    impl FakeDojo {
        pub fn with_targets(targets: Vec<UploadTarget>) -> Self {
            Self {
                store: Arc::new(MemoryStore::with_targets(targets)),
                api: Arc::new(RecordingApi::default()),
            }
        }

        pub fn uploaded_files(&self) -> Vec<PathBuf> {
            self.api
                .requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.file.clone())
                .collect()
        }

        pub fn created_titles(&self) -> Vec<String> {
            self.store
                .created
                .lock()
                .unwrap()
                .iter()
                .map(|t| t.title.clone())
                .collect()
        }
    }

    #[async_trait]
    impl TargetStore for FakeDojo {
        async fn list_targets(&self, engagement_id: u64) -> Result<Vec<UploadTarget>, SyncError> {
            self.store.list_targets(engagement_id).await
        }

        async fn find_test_type(&self, name: &str) -> Result<Option<u64>, SyncError> {
            self.store.find_test_type(name).await
        }

        async fn create_target(&self, target: &NewTarget) -> Result<UploadTarget, SyncError> {
            self.store.create_target(target).await
        }
    }

    #[async_trait]
    impl ReimportApi for FakeDojo {
        async fn reimport(&self, request: &ReimportRequest) -> Result<ReimportAck, SyncError> {
            self.api.reimport(request).await
        }
    }

    pub(crate) fn policy() -> UploadPolicy {
        UploadPolicy {
            minimum_severity: Severity::Info,
            close_old_findings: true,
            tags: Vec::new(),
            apply_tags_to_findings: true,
            apply_tags_to_endpoints: false,
        }
    }

    pub(crate) fn destination(fake: FakeDojo) -> Destination<FakeDojo> {
        Destination::new(
            fake,
            policy(),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        )
    }

    pub(crate) fn context(config: Config, credentials: Credentials) -> (RunContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(config, credentials, dir.path().to_path_buf());
        (ctx, dir)
    }

    fn settings() -> ToolSettings {
        Config::default().tool_settings(Tool::CodeQl)
    }

    #[test]
    fn test_blank_credentials_are_missing() {
        let mut args = <Args as clap::Parser>::parse_from(["scanrelay"]);
        args.dojo_token = Some("  ".to_string());
        args.github_token = Some(" ghp_x ".to_string());
        args.tenable_access_key = Some("a".to_string());
        args.tenable_secret_key = None;

        let creds = Credentials::from_args(&args);
        assert_eq!(creds.dojo_token, None);
        assert_eq!(creds.github_token.as_deref(), Some("ghp_x"));
        assert_eq!(creds.tenable_keys(), None);
    }

    #[test]
    fn test_tracker_counts_outcomes() {
        let mut tracker = WorkflowTracker::running(Tool::Tenable, 4, false);
        tracker.record("a", Ok(ItemOutcome::Uploaded { target_id: 1 }));
        tracker.record("b", Err(SyncError::NotReady("being generated".to_string())));
        tracker.record(
            "c",
            Err(SyncError::Status {
                status: 500,
                body: String::new(),
            }),
        );
        tracker.record("d", Ok(ItemOutcome::Uploaded { target_id: 2 }));

        assert_eq!(
            tracker.finish(),
            WorkflowResult {
                tool: Tool::Tenable,
                success: 2,
                failed: 1,
                skipped: 1,
                total: 4,
            }
        );
    }

    #[tokio::test]
    async fn test_deliver_reuses_target_across_artifacts() {
        let fake = FakeDojo::with_targets(vec![UploadTarget {
            id: 3,
            title: "api".to_string(),
            engagement_id: 7,
        }]);
        let mut destination = destination(fake.clone());

        let first = ScanArtifact::new("/tmp/a.sarif", Tool::CodeQl, "api");
        let second = ScanArtifact::new("/tmp/b.sarif", Tool::CodeQl, "web");
        let third = ScanArtifact::new("/tmp/c.sarif", Tool::CodeQl, "web");

        let outcomes = [
            destination.deliver(&first, 7, &settings()).await.unwrap(),
            destination.deliver(&second, 7, &settings()).await.unwrap(),
            destination.deliver(&third, 7, &settings()).await.unwrap(),
        ];

        assert_eq!(outcomes[0], ItemOutcome::Uploaded { target_id: 3 });
        assert_eq!(outcomes[1], outcomes[2]);
        assert_eq!(fake.created_titles(), vec!["web (CodeQL)"]);
        assert_eq!(fake.uploaded_files().len(), 3);
        assert_eq!(*destination.client().store.list_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_runs_enabled_tools_in_order() {
        let mut config = Config::default();
        config.tenable.enabled = false;
        config.burp.enabled = true;

        let (ctx, _dir) = context(config, Credentials::default());
        let fake = FakeDojo::default();
        let mut destination = destination(fake.clone());

        let results = run_batch(&ctx, Some(&mut destination)).await;

        assert_eq!(
            results,
            vec![
                WorkflowResult::skipped(Tool::CodeQl),
                WorkflowResult::skipped(Tool::Burp),
            ]
        );
        assert!(fake.uploaded_files().is_empty());
    }

    #[tokio::test]
    async fn test_batch_without_destination_fails_only_tools_with_work() {
        let mut config = Config::default();
        config.codeql.enabled = false;
        config.burp.enabled = true;
        config.burp.reports = vec![PathBuf::from("/nonexistent/shop.xml")];
        config.dojo.default_engagement_id = Some(7);

        let (ctx, _dir) = context(config, Credentials::default());
        let results = run_batch::<FakeDojo>(&ctx, None).await;

        assert_eq!(results, vec![WorkflowResult::fatal(Tool::Burp)]);
    }
}
