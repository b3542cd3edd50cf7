//! Complete, deduplicated collection of paginated upstream listings.
//!
//! Some upstream APIs have been observed serving the same page twice instead
//! of advancing. The paginator tracks the identity keys it has already seen
//! and stops as soon as a non-empty page contributes nothing new.

use crate::error::SyncError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::hash::Hash;
use tracing::{debug, error, warn};

/// One page of an upstream listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total item count the upstream declares, when it declares one.
    pub total: Option<usize>,
    /// Whether the upstream advertises a further page.
    pub has_next: bool,
}

/// A paginated listing endpoint. Pages are numbered from zero; adapters map
/// the index onto page numbers or offsets as their API requires.
#[async_trait]
pub trait PageSource: Send + Sync {
    type Item: Send;

    /// Human readable name of the listing, used in log lines.
    fn describe(&self) -> String;

    async fn fetch_page(&self, index: usize, page_size: usize)
        -> Result<Page<Self::Item>, SyncError>;
}

/// Items collected from a listing.
#[derive(Debug, Clone)]
pub struct Collected<T> {
    pub items: Vec<T>,
    pub duplicate_page: bool,
}

impl<T> Default for Collected<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            duplicate_page: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    page_size: usize,
}

impl Paginator {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    /// Collect every item, treating fetch failures as "nothing more found".
    ///
    /// A failing first page yields an empty result; a failing later page
    /// yields what was gathered so far. Failures are logged, never raised.
    pub async fn collect<S, K, F>(&self, source: &S, key: F) -> Vec<S::Item>
    where
        S: PageSource + ?Sized,
        K: Eq + Hash,
        F: Fn(&S::Item) -> K + Send,
    {
        let (collected, failure) = self.walk(source, key).await;
        if let Some(e) = failure {
            if collected.items.is_empty() {
                error!("Failed to list {}: {}", source.describe(), e);
            } else {
                error!(
                    "Listing {} stopped early after {} items: {}",
                    source.describe(),
                    collected.items.len(),
                    e
                );
            }
        }
        collected.items
    }

    /// Collect every item, surfacing any fetch failure.
    ///
    /// Used where an empty answer would be acted upon, e.g. deciding whether
    /// a target must be created.
    pub async fn try_collect<S, K, F>(
        &self,
        source: &S,
        key: F,
    ) -> Result<Collected<S::Item>, SyncError>
    where
        S: PageSource + ?Sized,
        K: Eq + Hash,
        F: Fn(&S::Item) -> K + Send,
    {
        match self.walk(source, key).await {
            (_, Some(e)) => Err(e),
            (collected, None) => Ok(collected),
        }
    }

    async fn walk<S, K, F>(&self, source: &S, key: F) -> (Collected<S::Item>, Option<SyncError>)
    where
        S: PageSource + ?Sized,
        K: Eq + Hash,
        F: Fn(&S::Item) -> K + Send,
    {
        let mut seen: HashSet<K> = HashSet::new();
        let mut collected = Collected::default();
        let mut index = 0;

        loop {
            let page = match source.fetch_page(index, self.page_size).await {
                Ok(page) => page,
                Err(e) => return (collected, Some(e)),
            };

            let fetched = page.items.len();
            let mut added = 0;
            for item in page.items {
                if seen.insert(key(&item)) {
                    collected.items.push(item);
                    added += 1;
                }
            }

            debug!(
                "{} page {}: {} items, {} new",
                source.describe(),
                index + 1,
                fetched,
                added
            );

            if index > 0 && fetched > 0 && added == 0 {
                warn!(
                    "Duplicate page detected while listing {} (page {}); keeping {} items",
                    source.describe(),
                    index + 1,
                    collected.items.len()
                );
                collected.duplicate_page = true;
                break;
            }

            let total_reached = page
                .total
                .is_some_and(|total| collected.items.len() >= total);
            if fetched == 0 || !page.has_next || total_reached {
                break;
            }

            index += 1;
        }

        (collected, None)
    }
}
