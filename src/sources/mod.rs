//! Upstream scanning services.

pub mod github;
pub mod tenable;

pub use github::GitHubClient;
pub use tenable::TenableClient;
