//! Policy Cache (C3): time-bounded in-memory snapshot of enabled policies, sorted by
//! priority. Bounded staleness of 60s, single-flight refresh, stale-on-failure.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::Policy;
use crate::policy_store::PolicyStoreGateway;

const CACHE_TTL_SECS: i64 = 60;

struct Slot {
    loaded_at: DateTime<Utc>,
    policies: Arc<Vec<Policy>>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            loaded_at: DateTime::<Utc>::MIN_UTC,
            policies: Arc::new(Vec::new()),
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.policies.is_empty() && (now - self.loaded_at).num_seconds() < CACHE_TTL_SECS
    }
}

pub struct PolicyCache {
    slot: ArcSwap<Slot>,
    // Held only across the DB read, never across response construction, so refreshes
    // collapse to a single in-flight load without blocking unrelated request handling.
    refresh_lock: Mutex<()>,
}

impl PolicyCache {
    pub fn new() -> Self {
        Self {
            slot: ArcSwap::from_pointee(Slot::empty()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns the current snapshot, refreshing from the store if stale. On a refresh
    /// failure, the previous snapshot is returned and the next call re-attempts.
    pub async fn get(&self, store: &dyn PolicyStoreGateway) -> Arc<Vec<Policy>> {
        let now = Utc::now();
        {
            let current = self.slot.load();
            if current.is_fresh(now) {
                return current.policies.clone();
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Re-check: another task may have refreshed while we waited for the lock.
        let now = Utc::now();
        let current = self.slot.load();
        if current.is_fresh(now) {
            return current.policies.clone();
        }

        match store.list_enabled_policies().await {
            Ok(policies) => {
                let policies = Arc::new(policies);
                self.slot.store(Arc::new(Slot {
                    loaded_at: now,
                    policies: policies.clone(),
                }));
                policies
            }
            Err(err) => {
                tracing::warn!(error = %err, "policy cache refresh failed, serving stale snapshot");
                current.policies.clone()
            }
        }
    }
}

impl Default for PolicyCache {
    fn default() -> Self {
        Self::new()
    }
}
