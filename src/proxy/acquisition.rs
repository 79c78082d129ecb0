use super::provider::{IssueOutcome, ProxyApi};
use super::proxy_manager::ProxySettings;
use crate::errors::Result;
use crate::sync::{CoordinationStore, DistributedLock};
use log::{error, warn};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;

/// Result of one acquisition iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// Another worker holds the issuing lock; already slept the pacing interval
    Locked,
    Busy,
    Issued(String),
    /// Hard failure; the caller must stop acquiring
    Failed,
}

/// Talks to the issuing API on behalf of one worker, coordinating with the
/// rest of the fleet through the issuing lock and the shared last-call
/// timestamp.
pub struct ProxyAcquirer {
    store: Arc<dyn CoordinationStore>,
    api: Arc<dyn ProxyApi>,
    lock_key: String,
    last_request_key: String,
    interval: Duration,
    lock_ttl: Duration,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ProxyAcquirer {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        api: Arc<dyn ProxyApi>,
        settings: &ProxySettings,
    ) -> Self {
        Self {
            store,
            api,
            lock_key: settings.lock_key.clone(),
            last_request_key: settings.last_request_key.clone(),
            interval: settings.api_request_interval,
            lock_ttl: settings.lock_ttl,
        }
    }

    pub async fn attempt(&self) -> Attempt {
        let lock = match DistributedLock::try_acquire(
            self.store.clone(),
            self.lock_key.as_str(),
            self.lock_ttl,
        )
        .await
        {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                warn!("Issuing API locked, sleeping {:?}", self.interval);
                tokio::time::sleep(self.interval).await;
                return Attempt::Locked;
            }
            Err(e) => {
                error!("Issuing lock unavailable: {e}");
                return Attempt::Failed;
            }
        };

        let outcome = self.paced_issue().await;
        if let Err(e) = lock.release().await {
            warn!("Failed to release issuing lock: {e}");
        }

        match outcome {
            Ok(IssueOutcome::Issued(url)) => {
                counter!("proxy_api_calls_total", "outcome" => "issued").increment(1);
                Attempt::Issued(url)
            }
            Ok(IssueOutcome::Busy) => {
                counter!("proxy_api_calls_total", "outcome" => "busy").increment(1);
                warn!("Issuing API busy");
                Attempt::Busy
            }
            Ok(IssueOutcome::Rejected { code, body }) => {
                counter!("proxy_api_calls_total", "outcome" => "rejected").increment(1);
                error!("Issuing API rejected the request, code {code}: {body}");
                Attempt::Failed
            }
            Err(e) => {
                counter!("proxy_api_calls_total", "outcome" => "error").increment(1);
                error!("Issuing API call failed: {e}");
                Attempt::Failed
            }
        }
    }

    async fn paced_issue(&self) -> Result<IssueOutcome> {
        self.wait_for_pacing().await?;
        self.store
            .set(&self.last_request_key, &now_millis().to_string())
            .await?;
        self.api.issue().await
    }

    /// Sleeps until at least `interval` has passed since the fleet's last call.
    async fn wait_for_pacing(&self) -> Result<()> {
        let interval_ms = self.interval.as_millis() as i64;
        loop {
            let last = self
                .store
                .get(&self.last_request_key)
                .await?
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(0);
            let elapsed = now_millis() - last;
            if elapsed >= interval_ms {
                return Ok(());
            }
            let wait = Duration::from_millis((interval_ms - elapsed) as u64);
            warn!("Issuing API called {elapsed}ms ago, sleeping {wait:?}");
            tokio::time::sleep(wait).await;
        }
    }
}
