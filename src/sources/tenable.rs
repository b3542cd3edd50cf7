//! Tenable Web App Scanning client.
//!
//! Reports are produced asynchronously: a report is requested for a scan,
//! and fetched later. Fetching too early yields an error whose message says
//! the report is still being generated.

use crate::error::SyncError;
use crate::pagination::{Page, PageSource};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// A scan configuration with its most recent scan, if any.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    pub config_id: String,
    pub name: String,
    #[serde(default)]
    pub last_scan: Option<LastScan>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LastScan {
    pub scan_id: String,
    #[serde(default)]
    pub status: String,
}

impl ScanConfig {
    /// Id of the last scan, when that scan finished.
    pub fn completed_scan_id(&self) -> Option<&str> {
        self.last_scan
            .as_ref()
            .filter(|s| s.status.eq_ignore_ascii_case("completed"))
            .map(|s| s.scan_id.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<ScanConfig>,
    pagination: Option<PaginationPayload>,
}

#[derive(Debug, Deserialize)]
struct PaginationPayload {
    total: usize,
}

#[derive(Clone)]
pub struct TenableClient {
    http: reqwest::Client,
    base_url: String,
    api_keys: String,
}

impl TenableClient {
    pub fn new(
        base_url: &str,
        access_key: &str,
        secret_key: &str,
        timeout_seconds: u64,
    ) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("scanrelay/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_keys: format!("accessKey={};secretKey={}", access_key, secret_key),
        })
    }

    pub fn scan_configs(&self) -> ScanConfigs<'_> {
        ScanConfigs { client: self }
    }

    /// Ask the scanner to start building the report of a scan.
    pub async fn request_report(&self, scan_id: &str) -> Result<(), SyncError> {
        let url = format!("{}/was/v2/scans/{}/report", self.base_url, scan_id);
        let response = self
            .http
            .put(&url)
            .header("X-ApiKeys", &self.api_keys)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;
        check_status(response).await?;
        debug!("Requested report for scan {}", scan_id);
        Ok(())
    }

    /// Fetch a generated report into `dir`.
    pub async fn download_report(
        &self,
        scan_id: &str,
        file_stem: &str,
        dir: &Path,
    ) -> Result<PathBuf, SyncError> {
        let url = format!("{}/was/v2/scans/{}/report", self.base_url, scan_id);
        let response = self
            .http
            .get(&url)
            .header("X-ApiKeys", &self.api_keys)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let bytes = check_status(response).await?.bytes().await?;

        let path = dir.join(format!("{}-{}.json", file_stem, scan_id));
        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::status(status, body))
}

pub struct ScanConfigs<'a> {
    client: &'a TenableClient,
}

#[async_trait]
impl PageSource for ScanConfigs<'_> {
    type Item = ScanConfig;

    fn describe(&self) -> String {
        "Tenable WAS scan configs".to_string()
    }

    async fn fetch_page(&self, index: usize, page_size: usize) -> Result<Page<ScanConfig>, SyncError> {
        let url = format!("{}/was/v2/configs/search", self.client.base_url);
        let response = self
            .client
            .http
            .post(&url)
            .query(&[
                ("limit", page_size.to_string()),
                ("offset", (index * page_size).to_string()),
            ])
            .header("X-ApiKeys", &self.client.api_keys)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let payload: SearchResponse = check_status(response).await?.json().await?;

        let total = payload.pagination.map(|p| p.total);
        let has_next = match total {
            Some(total) => (index + 1) * page_size < total,
            None => payload.items.len() == page_size,
        };

        Ok(Page {
            items: payload.items,
            total,
            has_next,
        })
    }
}
