//! Second-opinion cache shared by every request in a run.
//!
//! Entries are keyed by selection and price (rounded to the cent), so a moved
//! price asks again. Stale entries are dropped lazily on lookup; when the
//! cache is full, expired entries go first, then the oldest insert.
//! Writes are last-writer-wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use crate::models::ProbabilityJudgment;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub match_id: String,
    pub selection: String,
    pub odds_cents: i64,
}

impl CacheKey {
    pub fn new(match_id: &str, selection: &str, odds: f64) -> Self {
        CacheKey {
            match_id: match_id.to_string(),
            selection: selection.to_string(),
            odds_cents: (odds * 100.0).round() as i64,
        }
    }
}

struct Entry {
    judgment: ProbabilityJudgment,
    inserted: Instant,
}

/// Thread-safe TTL cache of judgments.
#[derive(Clone)]
pub struct JudgmentCache {
    inner: Arc<RwLock<HashMap<CacheKey, Entry>>>,
    ttl: Duration,
    max_entries: usize,
}

impl JudgmentCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        JudgmentCache {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Fresh entry for `key`, evicting it if it has expired.
    pub async fn get(&self, key: &CacheKey) -> Option<ProbabilityJudgment> {
        {
            let inner = self.inner.read().await;
            match inner.get(key) {
                None => return None,
                Some(entry) if entry.inserted.elapsed() < self.ttl => {
                    return Some(entry.judgment.clone())
                }
                Some(_) => {}
            }
        }
        let mut inner = self.inner.write().await;
        // Re-check: another task may have refreshed it in between.
        if let Some(entry) = inner.get(key) {
            if entry.inserted.elapsed() < self.ttl {
                return Some(entry.judgment.clone());
            }
            debug!("Evicting stale judgment for {}", key.selection);
            inner.remove(key);
        }
        None
    }

    pub async fn insert(&self, key: CacheKey, judgment: ProbabilityJudgment) {
        let mut inner = self.inner.write().await;
        if !inner.contains_key(&key) && inner.len() >= self.max_entries {
            let ttl = self.ttl;
            inner.retain(|_, e| e.inserted.elapsed() < ttl);
            if inner.len() >= self.max_entries {
                if let Some(oldest) = inner
                    .iter()
                    .min_by_key(|(_, e)| e.inserted)
                    .map(|(k, _)| k.clone())
                {
                    inner.remove(&oldest);
                }
            }
        }
        inner.insert(
            key,
            Entry {
                judgment,
                inserted: Instant::now(),
            },
        );
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
