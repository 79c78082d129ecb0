use log::info;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-worker crawl counters, logged when the worker closes.
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub scheduled: AtomicU64,
    pub filtered: AtomicU64,
    pub responses: AtomicU64,
    pub retries: AtomicU64,
    pub dropped: AtomicU64,
    pub follow_ups: AtomicU64,
    pub content_anomalies: AtomicU64,
    pub errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub scheduled: u64,
    pub filtered: u64,
    pub responses: u64,
    pub retries: u64,
    pub dropped: u64,
    pub follow_ups: u64,
    pub content_anomalies: u64,
    pub errors: u64,
}

impl CrawlStats {
    pub fn incr(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            follow_ups: self.follow_ups.load(Ordering::Relaxed),
            content_anomalies: self.content_anomalies.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub fn log(&self, name: &str) {
        let snapshot = self.snapshot();
        match serde_json::to_string(&snapshot) {
            Ok(json) => info!("Crawl stats for {name}: {json}"),
            Err(_) => info!("Crawl stats for {name}: {snapshot:?}"),
        }
    }
}
