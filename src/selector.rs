//! Picks the single most relevant analysis per `(repository, category)` group.

use crate::models::AnalysisRecord;
use std::collections::BTreeMap;

/// The chosen record of a group plus the service name its target is keyed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedAnalysis {
    pub record: AnalysisRecord,
    pub service_name: String,
}

/// Select the newest record of every group that has any results.
///
/// Groups whose records all report zero results are dropped. Ties on
/// `created_at` go to the highest id. Output is ordered by group key.
pub fn select_latest(records: Vec<AnalysisRecord>) -> Vec<SelectedAnalysis> {
    let mut groups: BTreeMap<(String, String, String), Vec<AnalysisRecord>> = BTreeMap::new();
    for record in records {
        let key = (
            record.owner.to_lowercase(),
            record.repository.to_lowercase(),
            record.category.clone(),
        );
        groups.entry(key).or_default().push(record);
    }

    groups
        .into_values()
        .filter(|members| members.iter().any(|r| r.results_count > 0))
        .filter_map(|members| {
            members
                .into_iter()
                .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
        })
        .map(|record| SelectedAnalysis {
            service_name: logical_service_name(&record.repository, &record.owner),
            record,
        })
        .collect()
}

/// Derive the stable service name for a raw repo-scoped name.
///
/// Strips a trailing numeric disambiguator (`-2`, `_10`) and a leading
/// `<owner>-` segment, when present. Matching is case-insensitive for the
/// owner prefix; the remaining text keeps its casing.
pub fn logical_service_name(raw: &str, owner: &str) -> String {
    let mut name = raw.trim();

    if let Some((head, tail)) = name.rsplit_once(|c| c == '-' || c == '_') {
        if !head.is_empty() && !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
            name = head;
        }
    }

    let owner = owner.trim();
    if !owner.is_empty() {
        let stripped = name
            .get(..owner.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(owner))
            .and_then(|_| name.get(owner.len()..))
            .and_then(|rest| rest.strip_prefix('-'))
            .filter(|rest| !rest.is_empty());
        if let Some(rest) = stripped {
            name = rest;
        }
    }

    name.to_string()
}
