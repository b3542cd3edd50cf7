//! Idempotent create-or-reuse of upload targets.

use super::{NewTarget, TargetStore};
use crate::error::SyncError;
use crate::models::{TestTypeRef, UploadTarget};
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{debug, info};

/// Resolves the target an artifact goes into, creating it when no existing
/// target matches.
///
/// Targets are listed once per engagement per run and cached; newly created
/// targets are appended to the cache, so later items of the same run see them.
/// Type names are resolved once per run.
pub struct TargetResolver<S> {
    store: S,
    targets: HashMap<u64, Vec<UploadTarget>>,
    test_types: HashMap<String, u64>,
    run_date: NaiveDate,
}

impl<S: TargetStore> TargetResolver<S> {
    pub fn new(store: S, run_date: NaiveDate) -> Self {
        Self {
            store,
            targets: HashMap::new(),
            test_types: HashMap::new(),
            run_date,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Return the id of the target titled `desired_title` (or any alias),
    /// creating it when none exists. Reuse performs no writes.
    pub async fn resolve_or_create(
        &mut self,
        engagement_id: u64,
        desired_title: &str,
        aliases: &[String],
        test_type: &TestTypeRef,
    ) -> Result<u64, SyncError> {
        let existing = find_match(
            self.cached_targets(engagement_id).await?,
            desired_title,
            aliases,
        )
        .map(|t| (t.id, t.title.clone()));
        if let Some((id, title)) = existing {
            debug!(
                "Reusing target {} ('{}') in engagement {}",
                id, title, engagement_id
            );
            return Ok(id);
        }

        let test_type_id = self.resolve_test_type(test_type).await?;
        let created = self
            .store
            .create_target(&NewTarget {
                engagement_id,
                title: desired_title.to_string(),
                test_type_id,
                start_date: self.run_date,
                end_date: self.run_date,
            })
            .await?;

        info!(
            "Created target {} ('{}', type {}) in engagement {}",
            created.id, desired_title, test_type, engagement_id
        );

        self.targets
            .entry(engagement_id)
            .or_default()
            .push(UploadTarget {
                id: created.id,
                title: desired_title.to_string(),
                engagement_id,
            });

        Ok(created.id)
    }

    async fn cached_targets(&mut self, engagement_id: u64) -> Result<&[UploadTarget], SyncError> {
        if !self.targets.contains_key(&engagement_id) {
            let listed = self.store.list_targets(engagement_id).await?;
            debug!(
                "Loaded {} existing targets for engagement {}",
                listed.len(),
                engagement_id
            );
            self.targets.insert(engagement_id, listed);
        }

        Ok(self
            .targets
            .get(&engagement_id)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }

    async fn resolve_test_type(&mut self, test_type: &TestTypeRef) -> Result<u64, SyncError> {
        let name = match test_type {
            TestTypeRef::Id(id) => return Ok(*id),
            TestTypeRef::Name(name) => name,
        };

        if let Some(id) = self.test_types.get(name) {
            return Ok(*id);
        }

        let id = self
            .store
            .find_test_type(name)
            .await?
            .ok_or_else(|| SyncError::Config(format!("unknown test type '{}'", name)))?;
        debug!("Resolved test type '{}' to {}", name, id);
        self.test_types.insert(name.clone(), id);
        Ok(id)
    }
}

/// First target whose title equals the desired title, else any alias.
fn find_match<'a>(
    targets: &'a [UploadTarget],
    desired_title: &str,
    aliases: &[String],
) -> Option<&'a UploadTarget> {
    std::iter::once(desired_title)
        .chain(aliases.iter().map(String::as_str))
        .find_map(|title| targets.iter().find(|t| t.title == title))
}
