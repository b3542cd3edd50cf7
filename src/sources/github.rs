//! GitHub code scanning client.
//!
//! Lists organization repositories and code-scanning analyses, and downloads
//! a single analysis as SARIF.

use crate::error::SyncError;
use crate::models::{AnalysisRecord, Repository};
use crate::pagination::{Page, PageSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, LINK};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const API_VERSION: &str = "2022-11-28";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const SARIF_MEDIA_TYPE: &str = "application/sarif+json";

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    name: String,
    #[serde(default)]
    archived: bool,
    owner: OwnerPayload,
}

#[derive(Debug, Deserialize)]
struct OwnerPayload {
    login: String,
}

#[derive(Debug, Deserialize)]
struct AnalysisPayload {
    id: u64,
    #[serde(default)]
    category: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    results_count: u64,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_url: &str, token: &str, timeout_seconds: u64) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("scanrelay/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Repositories of one organization.
    pub fn repositories(&self, org: &str) -> OrgRepositories<'_> {
        OrgRepositories {
            client: self,
            org: org.to_string(),
        }
    }

    /// Code scanning analyses of one repository.
    pub fn analyses(&self, repo: &Repository) -> RepositoryAnalyses<'_> {
        RepositoryAnalyses {
            client: self,
            owner: repo.owner.clone(),
            repo: repo.name.clone(),
        }
    }

    /// Download the SARIF document of an analysis into `dir`.
    pub async fn download_sarif(
        &self,
        record: &AnalysisRecord,
        dir: &Path,
    ) -> Result<PathBuf, SyncError> {
        let url = if record.content_ref.starts_with("http") {
            record.content_ref.clone()
        } else {
            format!(
                "{}/repos/{}/{}/code-scanning/analyses/{}",
                self.api_url, record.owner, record.repository, record.id
            )
        };

        let response = self.get(&url, &[], SARIF_MEDIA_TYPE).await?;
        let bytes = response.bytes().await?;

        let path = dir.join(format!(
            "{}-{}-{}.sarif",
            record.owner, record.repository, record.id
        ));
        tokio::fs::write(&path, &bytes).await?;
        debug!("Saved {} bytes of SARIF to {}", bytes.len(), path.display());

        Ok(path)
    }

    async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        accept: &str,
    ) -> Result<reqwest::Response, SyncError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(&self.token)
            .header(ACCEPT, accept)
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::status(status, body));
        }

        Ok(response)
    }

    async fn get_page<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        index: usize,
        page_size: usize,
    ) -> Result<(Vec<T>, bool), SyncError> {
        let query = [
            ("per_page", page_size.to_string()),
            ("page", (index + 1).to_string()),
        ];
        let response = self.get(url, &query, JSON_MEDIA_TYPE).await?;
        let has_next = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .is_some_and(has_next_link);
        let items = response.json::<Vec<T>>().await?;
        Ok((items, has_next))
    }
}

/// Whether a `Link` header advertises a `rel="next"` page.
fn has_next_link(header: &str) -> bool {
    header
        .split(',')
        .any(|part| part.split(';').skip(1).any(|p| p.trim() == r#"rel="next""#))
}

pub struct OrgRepositories<'a> {
    client: &'a GitHubClient,
    org: String,
}

#[async_trait]
impl PageSource for OrgRepositories<'_> {
    type Item = Repository;

    fn describe(&self) -> String {
        format!("repositories of {}", self.org)
    }

    async fn fetch_page(&self, index: usize, page_size: usize) -> Result<Page<Repository>, SyncError> {
        let url = format!("{}/orgs/{}/repos", self.client.api_url, self.org);
        let (payloads, has_next) = self
            .client
            .get_page::<RepositoryPayload>(&url, index, page_size)
            .await?;

        Ok(Page {
            items: payloads
                .into_iter()
                .map(|p| Repository {
                    owner: p.owner.login,
                    name: p.name,
                    archived: p.archived,
                })
                .collect(),
            total: None,
            has_next,
        })
    }
}

pub struct RepositoryAnalyses<'a> {
    client: &'a GitHubClient,
    owner: String,
    repo: String,
}

#[async_trait]
impl PageSource for RepositoryAnalyses<'_> {
    type Item = AnalysisRecord;

    fn describe(&self) -> String {
        format!("code scanning analyses of {}/{}", self.owner, self.repo)
    }

    async fn fetch_page(
        &self,
        index: usize,
        page_size: usize,
    ) -> Result<Page<AnalysisRecord>, SyncError> {
        let url = format!(
            "{}/repos/{}/{}/code-scanning/analyses",
            self.client.api_url, self.owner, self.repo
        );
        let (payloads, has_next) = self
            .client
            .get_page::<AnalysisPayload>(&url, index, page_size)
            .await?;

        Ok(Page {
            items: payloads
                .into_iter()
                .map(|p| AnalysisRecord {
                    id: p.id,
                    owner: self.owner.clone(),
                    repository: self.repo.clone(),
                    category: p.category,
                    created_at: p.created_at,
                    results_count: p.results_count,
                    content_ref: p.url.unwrap_or_default(),
                })
                .collect(),
            total: None,
            has_next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::Paginator;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_has_next_link() {
        let header = r#"<https://api.github.com/orgs/a/repos?page=2>; rel="next", <https://api.github.com/orgs/a/repos?page=5>; rel="last""#;
        assert!(has_next_link(header));
        assert!(!has_next_link(
            r#"<https://api.github.com/orgs/a/repos?page=1>; rel="prev""#
        ));
    }

    #[tokio::test]
    async fn test_repeated_repository_page_is_collected_once() {
        let server = MockServer::start().await;
        let next = format!(r#"<{}/orgs/acme/repos?page=99>; rel="next""#, server.uri());

        Mock::given(method("GET"))
            .and(path("/orgs/acme/repos"))
            .and(header("authorization", "Bearer t0ken"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("link", next.as_str())
                    .set_body_json(json!([
                        {"name": "x", "archived": false, "owner": {"login": "acme"}}
                    ])),
            )
            .expect(2)
            .mount(&server)
            .await;

        let client = GitHubClient::new(&server.uri(), "t0ken", 5).unwrap();
        let collected = Paginator::new(1)
            .try_collect(&client.repositories("acme"), |r| r.full_name())
            .await
            .unwrap();

        assert_eq!(collected.items.len(), 1);
        assert_eq!(collected.items[0].name, "x");
        assert!(collected.duplicate_page);
    }

    #[tokio::test]
    async fn test_analyses_and_sarif_download() {
        let server = MockServer::start().await;
        let analysis_url = format!("{}/repos/acme/web/code-scanning/analyses/11", server.uri());

        Mock::given(method("GET"))
            .and(path("/repos/acme/web/code-scanning/analyses"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "id": 11,
                    "category": ".github/workflows/codeql.yml:analyze/language:js",
                    "created_at": "2024-06-01T10:00:00Z",
                    "results_count": 3,
                    "url": analysis_url
                }
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/web/code-scanning/analyses/11"))
            .and(header("accept", SARIF_MEDIA_TYPE))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"runs":[]}"#))
            .mount(&server)
            .await;

        let client = GitHubClient::new(&server.uri(), "t0ken", 5).unwrap();
        let repo = Repository {
            owner: "acme".to_string(),
            name: "web".to_string(),
            archived: false,
        };
        let records = Paginator::new(100)
            .collect(&client.analyses(&repo), |a| a.id)
            .await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].results_count, 3);

        let dir = tempfile::tempdir().unwrap();
        let saved = client.download_sarif(&records[0], dir.path()).await.unwrap();
        assert_eq!(std::fs::read_to_string(saved).unwrap(), r#"{"runs":[]}"#);
    }

    #[tokio::test]
    async fn test_disabled_code_scanning_lists_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no analysis found"))
            .mount(&server)
            .await;

        let client = GitHubClient::new(&server.uri(), "t0ken", 5).unwrap();
        let repo = Repository {
            owner: "acme".to_string(),
            name: "empty".to_string(),
            archived: false,
        };
        let records = Paginator::new(100)
            .collect(&client.analyses(&repo), |a| a.id)
            .await;
        assert!(records.is_empty());
    }
}
