//! Archived / include / exclude policy for repository sets.

use crate::error::SyncError;
use crate::models::Repository;
use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Compiled repository filter.
///
/// Stages always apply in this order: archived, include, exclude. An empty
/// pattern list disables its stage.
#[derive(Debug, Clone)]
pub struct RepositoryFilter {
    skip_archived: bool,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl RepositoryFilter {
    pub fn new(
        skip_archived: bool,
        include: &[String],
        exclude: &[String],
    ) -> Result<Self, SyncError> {
        Ok(Self {
            skip_archived,
            include: compile_patterns(include)?,
            exclude: compile_patterns(exclude)?,
        })
    }

    pub fn keeps(&self, repo: &Repository) -> bool {
        if self.skip_archived && repo.archived {
            return false;
        }
        if !self.include.is_empty() && !matches_any(&self.include, &repo.name) {
            return false;
        }
        !matches_any(&self.exclude, &repo.name)
    }

    pub fn apply(&self, repos: Vec<Repository>) -> Vec<Repository> {
        repos.into_iter().filter(|r| self.keeps(r)).collect()
    }
}

/// Compile glob patterns with `*` and `?` as the only wildcards.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>, SyncError> {
    patterns
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| {
            Pattern::new(&escape_pattern(p))
                .map_err(|e| SyncError::Config(format!("invalid pattern '{}': {}", p, e)))
        })
        .collect()
}

pub fn matches_any(patterns: &[Pattern], name: &str) -> bool {
    patterns
        .iter()
        .any(|p| p.matches_with(name, MATCH_OPTIONS))
}

// Brackets match literally and a run of `*` is a single wildcard, so `glob`
// never sees a character class or a recursive `**`.
fn escape_pattern(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '[' => escaped.push_str("[[]"),
            ']' => escaped.push_str("[]]"),
            '*' if escaped.ends_with('*') => {}
            other => escaped.push(other),
        }
    }
    escaped
}
