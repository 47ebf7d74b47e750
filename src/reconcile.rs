use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::canonical::{canonicalize, host_group, host_variants};
use crate::gateway::Gateway;
use crate::model::Watch;

/// Two fetched watch records that canonicalize to the same URL.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchConflict {
    pub key: String,
    pub kept: Watch,
    pub dropped: Watch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchSet {
    pub by_url: BTreeMap<String, Watch>,
    pub conflicts: Vec<WatchConflict>,
    pub failed_variants: Vec<String>,
    pub reconciled_at: DateTime<Utc>,
}

impl WatchSet {
    pub fn empty() -> Self {
        Self {
            by_url: BTreeMap::new(),
            conflicts: Vec::new(),
            failed_variants: Vec::new(),
            reconciled_at: Utc::now(),
        }
    }

    pub fn is_watched(&self, url: &str) -> bool {
        self.by_url.contains_key(&canonicalize(url))
    }

    pub fn get(&self, url: &str) -> Option<&Watch> {
        self.by_url.get(&canonicalize(url))
    }

    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }
}

/// Merges watch records fetched under every host spelling of a site and
/// remembers the last successful merge per site. Both spellings share one
/// cached set.
pub struct WatchReconciler {
    gateway: Arc<dyn Gateway>,
    last_good: Mutex<HashMap<String, WatchSet>>,
}

impl WatchReconciler {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            last_good: Mutex::new(HashMap::new()),
        }
    }

    /// Fetches watches for all host variants of `site_id` concurrently.
    ///
    /// Failed variants are skipped. When every variant fails the result is
    /// empty and the previously reconciled set is kept for lookups.
    pub async fn reconcile(&self, site_id: &str) -> WatchSet {
        let variants = host_variants(site_id);
        let results = futures::future::join_all(
            variants
                .iter()
                .map(|variant| self.gateway.list_watches(variant)),
        )
        .await;

        let mut batches = Vec::with_capacity(variants.len());
        let mut failed_variants = Vec::new();
        for (variant, result) in variants.iter().zip(results) {
            match result {
                Ok(items) => batches.push(items),
                Err(err) => {
                    tracing::warn!(site_id, variant = %variant, %err, "watch list fetch failed");
                    failed_variants.push(variant.clone());
                }
            }
        }

        let (by_url, conflicts) = fold_watches(batches);
        for conflict in &conflicts {
            tracing::warn!(
                site_id,
                key = %conflict.key,
                dropped_site = conflict.dropped.site_id.as_deref().unwrap_or(""),
                "duplicate watch under another host spelling"
            );
        }

        let set = WatchSet {
            by_url,
            conflicts,
            failed_variants,
            reconciled_at: Utc::now(),
        };
        if set.failed_variants.len() < variants.len() {
            lock(&self.last_good).insert(host_group(site_id), set.clone());
        }
        tracing::debug!(site_id, watches = set.len(), "watches reconciled");
        set
    }

    pub fn is_watched(&self, site_id: &str, url_norm: &str) -> bool {
        lock(&self.last_good)
            .get(&host_group(site_id))
            .is_some_and(|set| set.is_watched(url_norm))
    }

    pub fn watch_for(&self, site_id: &str, url_norm: &str) -> Option<Watch> {
        lock(&self.last_good)
            .get(&host_group(site_id))
            .and_then(|set| set.get(url_norm).cloned())
    }

    pub fn watch_set(&self, site_id: &str) -> Option<WatchSet> {
        lock(&self.last_good).get(&host_group(site_id)).cloned()
    }
}

/// Folds batches (in host-variant order) into one map keyed by canonical URL.
///
/// On collision the record with the latest `last_run_at`, then the latest
/// `updated_at`, wins; a full tie keeps the earlier variant's record.
pub fn fold_watches(
    batches: impl IntoIterator<Item = Vec<Watch>>,
) -> (BTreeMap<String, Watch>, Vec<WatchConflict>) {
    let mut by_url: BTreeMap<String, Watch> = BTreeMap::new();
    let mut conflicts = Vec::new();

    for watch in batches.into_iter().flatten() {
        let key = canonicalize(&watch.url_norm);
        let Some(existing) = by_url.get(&key) else {
            by_url.insert(key, watch);
            continue;
        };

        if recency(&watch) > recency(existing) {
            conflicts.push(WatchConflict {
                key: key.clone(),
                kept: watch.clone(),
                dropped: existing.clone(),
            });
            by_url.insert(key, watch);
        } else {
            conflicts.push(WatchConflict {
                key,
                kept: existing.clone(),
                dropped: watch,
            });
        }
    }

    (by_url, conflicts)
}

fn recency(watch: &Watch) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    (watch.last_run_at, watch.updated_at)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
