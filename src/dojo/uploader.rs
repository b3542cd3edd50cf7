//! Reimport of scan artifacts under severity and tag policy.

use super::ReimportApi;
use crate::error::SyncError;
use crate::models::{ScanArtifact, Severity};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

/// Import policy shared by every upload of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub minimum_severity: Severity,
    pub close_old_findings: bool,
    pub tags: Vec<String>,
    pub apply_tags_to_findings: bool,
    pub apply_tags_to_endpoints: bool,
}

/// Tags together with where they should be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet {
    pub tags: Vec<String>,
    pub apply_to_findings: bool,
    pub apply_to_endpoints: bool,
}

/// A fully normalized reimport request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReimportRequest {
    pub target_id: u64,
    pub scan_type: String,
    pub file: PathBuf,
    pub minimum_severity: Severity,
    pub close_old_findings: bool,
    /// `None` when no usable tag remains; the tag fields are then omitted entirely.
    pub tags: Option<TagSet>,
}

impl ReimportRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn build<I, T>(
        artifact: &ScanArtifact,
        target_id: u64,
        scan_type: &str,
        close_old_findings: bool,
        minimum_severity: Severity,
        tags: I,
        apply_tags_to_findings: bool,
        apply_tags_to_endpoints: bool,
    ) -> Self
    where
        I: IntoIterator<Item = Option<T>>,
        T: AsRef<str>,
    {
        let tags = normalize_tags(tags);
        Self {
            target_id,
            scan_type: scan_type.to_string(),
            file: artifact.path().to_path_buf(),
            minimum_severity,
            close_old_findings,
            tags: (!tags.is_empty()).then_some(TagSet {
                tags,
                apply_to_findings: apply_tags_to_findings,
                apply_to_endpoints: apply_tags_to_endpoints,
            }),
        }
    }

    /// Text fields of the multipart body, in order. The file part is added
    /// by the transport.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("test", self.target_id.to_string()),
            ("scan_type", self.scan_type.clone()),
            ("minimum_severity", self.minimum_severity.to_string()),
            ("close_old_findings", self.close_old_findings.to_string()),
        ];

        if let Some(ref set) = self.tags {
            for tag in &set.tags {
                fields.push(("tags", tag.clone()));
            }
            fields.push(("apply_tags_to_findings", set.apply_to_findings.to_string()));
            fields.push(("apply_tags_to_endpoints", set.apply_to_endpoints.to_string()));
        }

        fields
    }
}

/// Drop missing, empty and whitespace-only tags; trim the rest.
pub fn normalize_tags<I, T>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = Option<T>>,
    T: AsRef<str>,
{
    tags.into_iter()
        .flatten()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// What the destination echoes back after a reimport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReimportAck {
    #[serde(default)]
    pub test: Option<u64>,
    #[serde(default)]
    pub scan_type: Option<String>,
}

pub struct ArtifactUploader<A> {
    api: A,
    policy: UploadPolicy,
}

impl<A: ReimportApi> ArtifactUploader<A> {
    pub fn new(api: A, policy: UploadPolicy) -> Self {
        Self { api, policy }
    }

    #[cfg(test)]
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Reimport `artifact` into `target_id`. Re-running against the same
    /// target updates its findings instead of duplicating them.
    pub async fn upload(
        &self,
        artifact: &ScanArtifact,
        target_id: u64,
        scan_type: &str,
    ) -> Result<ReimportAck, SyncError> {
        let request = ReimportRequest::build(
            artifact,
            target_id,
            scan_type,
            self.policy.close_old_findings,
            self.policy.minimum_severity,
            self.policy.tags.iter().map(Some),
            self.policy.apply_tags_to_findings,
            self.policy.apply_tags_to_endpoints,
        );

        let ack = self.api.reimport(&request).await?;
        info!(
            "Uploaded {} to target {} as '{}'",
            artifact.file_name(),
            ack.test.unwrap_or(target_id),
            ack.scan_type.as_deref().unwrap_or(scan_type)
        );
        Ok(ack)
    }
}
