use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::health::{Check, CheckResult};

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub current_size: usize,
    pub hit_rate: f64,
    pub total_requests: u64,
}

impl CacheStats {
    pub fn record_hit(&mut self) {
        self.hits += 1;
        self.total_requests += 1;
        self.update_hit_rate();
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
        self.total_requests += 1;
        self.update_hit_rate();
    }

    fn update_hit_rate(&mut self) {
        self.hit_rate = if self.total_requests > 0 {
            self.hits as f64 / self.total_requests as f64
        } else {
            0.0
        };
    }
}

/// Last executed result per check, served when the cron gate skips a check.
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct ResponseCache {
    entries: Arc<RwLock<HashMap<Check, CheckResult>>>,
    stats: Arc<RwLock<CacheStats>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, check: &Check) -> Option<CheckResult> {
        let entry = self.entries.read().get(check).cloned();
        let mut stats = self.stats.write();
        match entry {
            Some(_) => stats.record_hit(),
            None => stats.record_miss(),
        }
        entry
    }

    pub fn put(&self, check: Check, result: CheckResult) {
        debug!("caching result for {} with status {}", check.name, result.status_code);
        let mut entries = self.entries.write();
        entries.insert(check, result);
        let mut stats = self.stats.write();
        stats.writes += 1;
        stats.current_size = entries.len();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }
}
