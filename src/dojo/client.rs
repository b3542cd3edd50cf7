//! DefectDojo API v2 client.

use super::{NewTarget, ReimportAck, ReimportApi, ReimportRequest, TargetStore};
use crate::error::SyncError;
use crate::models::UploadTarget;
use crate::pagination::{Page, PageSource, Paginator};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    count: usize,
    next: Option<String>,
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TestPayload {
    id: u64,
    #[serde(default)]
    title: Option<String>,
    engagement: u64,
}

impl From<TestPayload> for UploadTarget {
    fn from(p: TestPayload) -> Self {
        Self {
            id: p.id,
            title: p.title.unwrap_or_default(),
            engagement_id: p.engagement,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TestTypePayload {
    id: u64,
    name: String,
}

#[derive(Debug, Serialize)]
struct CreateTestBody<'a> {
    engagement: u64,
    title: &'a str,
    test_type: u64,
    target_start: String,
    target_end: String,
}

#[derive(Clone)]
pub struct DojoClient {
    http: reqwest::Client,
    base_url: String,
    auth: String,
    page_size: usize,
}

impl DojoClient {
    pub fn new(
        base_url: &str,
        token: &str,
        timeout_seconds: u64,
        page_size: usize,
    ) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("scanrelay/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: format!("Token {}", token),
            page_size,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v2/{}/", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, SyncError> {
        let response = request.header(AUTHORIZATION, &self.auth).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::status(status, body));
        }
        Ok(response)
    }
}

struct EngagementTests<'a> {
    client: &'a DojoClient,
    engagement_id: u64,
}

#[async_trait]
impl PageSource for EngagementTests<'_> {
    type Item = UploadTarget;

    fn describe(&self) -> String {
        format!("tests of engagement {}", self.engagement_id)
    }

    async fn fetch_page(
        &self,
        index: usize,
        page_size: usize,
    ) -> Result<Page<UploadTarget>, SyncError> {
        let request = self.client.http.get(self.client.endpoint("tests")).query(&[
            ("engagement", self.engagement_id.to_string()),
            ("limit", page_size.to_string()),
            ("offset", (index * page_size).to_string()),
        ]);
        let payload: ListResponse<TestPayload> = self.client.send(request).await?.json().await?;

        Ok(Page {
            has_next: payload.next.is_some(),
            total: Some(payload.count),
            items: payload.results.into_iter().map(UploadTarget::from).collect(),
        })
    }
}

#[async_trait]
impl TargetStore for DojoClient {
    async fn list_targets(&self, engagement_id: u64) -> Result<Vec<UploadTarget>, SyncError> {
        let source = EngagementTests {
            client: self,
            engagement_id,
        };
        let collected = Paginator::new(self.page_size)
            .try_collect(&source, |t| t.id)
            .await?;
        Ok(collected.items)
    }

    async fn find_test_type(&self, name: &str) -> Result<Option<u64>, SyncError> {
        let request = self
            .http
            .get(self.endpoint("test_types"))
            .query(&[("name", name), ("limit", "100")]);
        let payload: ListResponse<TestTypePayload> = self.send(request).await?.json().await?;

        Ok(payload
            .results
            .into_iter()
            .find(|t| t.name == name)
            .map(|t| t.id))
    }

    async fn create_target(&self, target: &NewTarget) -> Result<UploadTarget, SyncError> {
        let body = CreateTestBody {
            engagement: target.engagement_id,
            title: &target.title,
            test_type: target.test_type_id,
            target_start: target.start_date.format("%Y-%m-%d").to_string(),
            target_end: target.end_date.format("%Y-%m-%d").to_string(),
        };
        let request = self.http.post(self.endpoint("tests")).json(&body);
        let created: TestPayload = self.send(request).await?.json().await?;
        Ok(created.into())
    }
}

#[async_trait]
impl ReimportApi for DojoClient {
    async fn reimport(&self, request: &ReimportRequest) -> Result<ReimportAck, SyncError> {
        let bytes = tokio::fs::read(&request.file).await?;
        let file_name = request
            .file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "artifact".to_string());

        let mut form = Form::new();
        for (name, value) in request.form_fields() {
            form = form.text(name, value);
        }
        form = form.part("file", Part::bytes(bytes).file_name(file_name));

        let response = self
            .send(self.http.post(self.endpoint("reimport-scan")).multipart(form))
            .await?;
        let body = response.text().await?;
        debug!("Reimport response: {}", body);

        Ok(parse_ack(&body))
    }
}

/// The ack is only used for logging, so an unreadable body falls back to an empty one.
fn parse_ack(body: &str) -> ReimportAck {
    serde_json::from_str(body).unwrap_or_else(|e| {
        debug!("Unreadable reimport response ({}); using an empty ack", e);
        ReimportAck::default()
    })
}
