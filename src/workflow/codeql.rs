//! GitHub code scanning: latest SARIF per repository and category.

use super::{fatal, skip, Destination, RunContext, WorkflowTracker};
use crate::config::ToolSettings;
use crate::dojo::{ReimportApi, TargetStore};
use crate::error::SyncError;
use crate::filter::RepositoryFilter;
use crate::models::{ItemOutcome, ScanArtifact, Tool, WorkflowResult};
use crate::pagination::Paginator;
use crate::selector::{select_latest, SelectedAnalysis};
use crate::sources::GitHubClient;
use tracing::info;

pub async fn run<S>(ctx: &RunContext, destination: Option<&mut Destination<S>>) -> WorkflowResult
where
    S: TargetStore + ReimportApi + Clone,
{
    let tool = Tool::CodeQl;
    let settings = ctx.config.tool_settings(tool);

    let organizations = ctx.config.organizations();
    if organizations.is_empty() {
        return skip(tool, "no organizations configured");
    }
    let Some(engagement_id) = settings.engagement_id else {
        return skip(tool, "no engagement configured");
    };
    let Some(token) = ctx.credentials.github_token.as_deref() else {
        return fatal(tool, SyncError::Auth("GITHUB_TOKEN is not set".to_string()));
    };
    let Some(destination) = destination else {
        return fatal(tool, SyncError::Auth("DOJO_API_TOKEN is not set".to_string()));
    };

    let github = &ctx.config.github;
    let filter = match RepositoryFilter::new(github.skip_archived, &github.include, &github.exclude)
    {
        Ok(filter) => filter,
        Err(e) => return fatal(tool, e),
    };
    let client = match GitHubClient::new(&github.api_url, token, ctx.config.general.timeout_seconds)
    {
        Ok(client) => client,
        Err(e) => return fatal(tool, e),
    };

    let candidates = discover(
        &client,
        &organizations,
        &filter,
        Paginator::new(github.page_size),
    )
    .await;

    let mut tracker = WorkflowTracker::running(tool, candidates.len(), ctx.show_progress);
    for selected in &candidates {
        let label = format!(
            "{}/{} ({})",
            selected.record.owner, selected.record.repository, selected.record.category
        );
        let outcome = process(ctx, &client, destination, engagement_id, &settings, selected).await;
        tracker.record(&label, outcome);
    }
    tracker.finish()
}

/// Repositories in scope across all organizations, reduced to the newest
/// analysis per category. Listing failures shrink the set instead of failing.
async fn discover(
    client: &GitHubClient,
    organizations: &[String],
    filter: &RepositoryFilter,
    paginator: Paginator,
) -> Vec<SelectedAnalysis> {
    let mut selected = Vec::new();

    for org in organizations {
        let listed = paginator
            .collect(&client.repositories(org), |r| r.full_name())
            .await;
        let listed_count = listed.len();
        let repositories = filter.apply(listed);
        info!(
            "{}: {} of {} repositories in scope",
            org,
            repositories.len(),
            listed_count
        );

        for repo in &repositories {
            let analyses = paginator.collect(&client.analyses(repo), |a| a.id).await;
            selected.extend(select_latest(analyses));
        }
    }

    selected
}

async fn process<S>(
    ctx: &RunContext,
    client: &GitHubClient,
    destination: &mut Destination<S>,
    engagement_id: u64,
    settings: &ToolSettings,
    selected: &SelectedAnalysis,
) -> Result<ItemOutcome, SyncError>
where
    S: TargetStore + ReimportApi + Clone,
{
    let path = client.download_sarif(&selected.record, &ctx.work_dir).await?;
    let artifact = ScanArtifact::new(path, Tool::CodeQl, &selected.service_name);
    destination.deliver(&artifact, engagement_id, settings).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dojo::DojoClient;
    use crate::workflow::tests::{context, destination, policy, FakeDojo};
    use crate::workflow::Credentials;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> Credentials {
        Credentials {
            github_token: Some("t0ken".to_string()),
            dojo_token: Some("d0jo".to_string()),
            ..Default::default()
        }
    }

    fn config(api_url: &str, orgs: &[&str]) -> Config {
        let mut config = Config::default();
        config.github.api_url = api_url.to_string();
        config.github.organizations = orgs.iter().map(|o| o.to_string()).collect();
        config.dojo.default_engagement_id = Some(7);
        config
    }

    fn analysis(
        server: &MockServer,
        repo: &str,
        id: u64,
        category: &str,
        created: &str,
        results: u64,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "category": category,
            "created_at": created,
            "results_count": results,
            "url": format!("{}/repos/acme/{}/code-scanning/analyses/{}", server.uri(), repo, id)
        })
    }

    #[tokio::test]
    async fn test_no_organizations_makes_no_requests() {
        let server = MockServer::start().await;
        let (ctx, _dir) = context(config(&server.uri(), &[" ", ""]), credentials());
        let dojo = DojoClient::new(&server.uri(), "d0jo", 5, 100).unwrap();
        let mut destination = Destination::new(
            dojo,
            policy(),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        );

        let result = run(&ctx, Some(&mut destination)).await;

        assert_eq!(result, WorkflowResult::skipped(Tool::CodeQl));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_engagement_is_skipped() {
        let mut config = config("http://127.0.0.1:9", &["acme"]);
        config.dojo.default_engagement_id = None;
        let (ctx, _dir) = context(config, credentials());

        let result = run(&ctx, Some(&mut destination(FakeDojo::default()))).await;
        assert_eq!(result, WorkflowResult::skipped(Tool::CodeQl));
    }

    #[tokio::test]
    async fn test_missing_credentials_are_fatal() {
        let (ctx, _dir) = context(config("http://127.0.0.1:9", &["acme"]), Credentials::default());
        let result = run(&ctx, Some(&mut destination(FakeDojo::default()))).await;
        assert_eq!(result, WorkflowResult::fatal(Tool::CodeQl));

        let (ctx, _dir) = context(config("http://127.0.0.1:9", &["acme"]), credentials());
        let result = run::<FakeDojo>(&ctx, None).await;
        assert_eq!(result, WorkflowResult::fatal(Tool::CodeQl));
    }

    #[tokio::test]
    async fn test_uploads_latest_analysis_and_isolates_failures() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/orgs/acme/repos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "web", "archived": false, "owner": {"login": "acme"}},
                {"name": "legacy", "archived": true, "owner": {"login": "acme"}},
                {"name": "acme-api", "archived": false, "owner": {"login": "acme"}}
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/web/code-scanning/analyses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                analysis(&server, "web", 1, "js", "2024-05-01T00:00:00Z", 2),
                analysis(&server, "web", 2, "js", "2024-05-02T00:00:00Z", 5),
                analysis(&server, "web", 3, "python", "2024-05-03T00:00:00Z", 0)
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/legacy/code-scanning/analyses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/acme-api/code-scanning/analyses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                analysis(&server, "acme-api", 4, "js", "2024-05-01T00:00:00Z", 1)
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/web/code-scanning/analyses/2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"runs":[]}"#))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/acme-api/code-scanning/analyses/4"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (ctx, _dir) = context(config(&server.uri(), &["acme"]), credentials());
        let fake = FakeDojo::with_targets(vec![]);
        let mut destination = destination(fake.clone());

        let result = run(&ctx, Some(&mut destination)).await;

        assert_eq!(
            result,
            WorkflowResult {
                tool: Tool::CodeQl,
                success: 1,
                failed: 1,
                skipped: 0,
                total: 2,
            }
        );
        assert_eq!(fake.created_titles(), vec!["web (CodeQL)"]);

        let uploaded = fake.uploaded_files();
        assert_eq!(uploaded.len(), 1);
        assert!(uploaded[0].ends_with("acme-web-2.sarif"));
    }

    #[tokio::test]
    async fn test_categories_of_one_repository_share_a_target() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/orgs/acme/repos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "web", "archived": false, "owner": {"login": "acme"}}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/code-scanning/analyses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                analysis(&server, "web", 5, "js", "2024-05-01T00:00:00Z", 3),
                analysis(&server, "web", 6, "python", "2024-05-01T00:00:00Z", 2)
            ])))
            .mount(&server)
            .await;
        for id in [5, 6] {
            Mock::given(method("GET"))
                .and(path(format!("/repos/acme/web/code-scanning/analyses/{}", id)))
                .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"runs":[]}"#))
                .expect(1)
                .mount(&server)
                .await;
        }

        let (ctx, _dir) = context(config(&server.uri(), &["acme"]), credentials());
        let fake = FakeDojo::with_targets(vec![]);

        let result = run(&ctx, Some(&mut destination(fake.clone()))).await;

        assert_eq!(result.success, 2);
        assert_eq!(fake.created_titles(), vec!["web (CodeQL)"]);
        assert_eq!(fake.uploaded_files().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_org_listing_does_not_stop_other_orgs() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/orgs/broken/repos"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orgs/acme/repos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "web", "archived": false, "owner": {"login": "acme"}}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/code-scanning/analyses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                analysis(&server, "web", 9, "js", "2024-05-01T00:00:00Z", 1)
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/code-scanning/analyses/9"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let (ctx, _dir) = context(config(&server.uri(), &["broken", "acme"]), credentials());
        let fake = FakeDojo::with_targets(vec![]);

        let result = run(&ctx, Some(&mut destination(fake.clone()))).await;

        assert_eq!(result.total, 1);
        assert_eq!(result.success, 1);
        assert_eq!(result.failed, 0);
    }
}
