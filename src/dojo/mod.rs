//! DefectDojo destination: target resolution and artifact reimport.
//!
//! A target is a DefectDojo *test* inside an engagement. The resolver and
//! uploader only depend on the traits below, so they can run against the
//! HTTP client or an in-memory store.

pub mod client;
pub mod resolver;
pub mod uploader;

use crate::error::SyncError;
use crate::models::UploadTarget;
use async_trait::async_trait;
use chrono::NaiveDate;

pub use client::DojoClient;
pub use resolver::TargetResolver;
pub use uploader::{ArtifactUploader, ReimportAck, ReimportRequest, UploadPolicy};

/// Create request for a new target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTarget {
    pub engagement_id: u64,
    pub title: String,
    pub test_type_id: u64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Read and create access to targets.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Every target of an engagement. Must fail rather than return a partial list.
    async fn list_targets(&self, engagement_id: u64) -> Result<Vec<UploadTarget>, SyncError>;

    /// Id of the target type with exactly this name.
    async fn find_test_type(&self, name: &str) -> Result<Option<u64>, SyncError>;

    async fn create_target(&self, target: &NewTarget) -> Result<UploadTarget, SyncError>;
}

/// Upload with reimport semantics: findings of the target are updated in place.
#[async_trait]
pub trait ReimportApi: Send + Sync {
    async fn reimport(&self, request: &ReimportRequest) -> Result<ReimportAck, SyncError>;
}
