//! Run summary rendering.

mod summary;

pub use summary::{generate_json_summary, generate_markdown_summary, write_summary, RunSummary};
