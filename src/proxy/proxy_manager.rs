use super::acquisition::{Attempt, ProxyAcquirer};
use super::health::HealthTracker;
use super::provider::{HttpProxyApi, ProxyApi};
use super::proxy_state::{ProxyState, Validity};
use crate::common::interface::Fetcher;
use crate::common::model::{Config, ProxyConfig};
use crate::errors::Result;
use crate::sync::CoordinationStore;
use log::{debug, error, warn};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Runtime form of [`ProxyConfig`].
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub api_request_interval: Duration,
    pub recheck_interval: Duration,
    pub check_timeout: Duration,
    pub max_elapsed: Duration,
    pub check_url: String,
    pub max_acquire_attempts: u32,
    pub lock_ttl: Duration,
    pub api_timeout: Duration,
    pub lock_key: String,
    pub last_request_key: String,
}

impl ProxySettings {
    fn keys(prefix: &str) -> (String, String) {
        (
            format!("{prefix}:proxy_api_locked"),
            format!("{prefix}:last_request_time"),
        )
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        let (lock_key, last_request_key) = Self::keys("proxy");
        Self {
            api_request_interval: Duration::from_secs(6),
            recheck_interval: Duration::from_secs(10),
            check_timeout: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(10),
            check_url: "https://www.baidu.com/".to_string(),
            max_acquire_attempts: 10,
            lock_ttl: Duration::from_secs(30),
            api_timeout: Duration::from_secs(10),
            lock_key,
            last_request_key,
        }
    }
}

impl From<&ProxyConfig> for ProxySettings {
    fn from(config: &ProxyConfig) -> Self {
        let (lock_key, last_request_key) = Self::keys(&config.key_prefix);
        Self {
            api_request_interval: Duration::from_secs(config.api_request_interval_secs),
            recheck_interval: Duration::from_secs(config.recheck_interval_secs),
            check_timeout: Duration::from_secs(config.check_timeout_secs),
            max_elapsed: Duration::from_secs(config.max_elapsed_secs),
            check_url: config.check_url.clone(),
            max_acquire_attempts: config.max_acquire_attempts.max(1),
            lock_ttl: Duration::from_secs(config.lock_ttl_secs.max(1)),
            api_timeout: Duration::from_secs(config.api_timeout_secs),
            lock_key,
            last_request_key,
        }
    }
}

/// Owns the worker's [`ProxyState`] and serialises every change to it.
///
/// `get_proxy` holds the state lock while it acquires, so concurrent
/// requests of the same worker wait for the single acquisition instead of
/// racing to the issuing API.
pub struct ProxyManager {
    state: Mutex<ProxyState>,
    acquirer: ProxyAcquirer,
    health: HealthTracker,
    settings: ProxySettings,
}

impl ProxyManager {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        api: Arc<dyn ProxyApi>,
        fetcher: Arc<dyn Fetcher>,
        settings: ProxySettings,
    ) -> Self {
        let acquirer = ProxyAcquirer::new(store, api, &settings);
        let health = HealthTracker::new(
            fetcher,
            settings.check_url.clone(),
            settings.check_timeout,
            settings.max_elapsed,
        );
        Self {
            state: Mutex::new(ProxyState::new()),
            acquirer,
            health,
            settings,
        }
    }

    /// Wires the reqwest issuing client; canary checks reuse the download
    /// default headers.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn CoordinationStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        let settings = ProxySettings::from(&config.proxy);
        let api = HttpProxyApi::new(&config.proxy.api_url, settings.api_timeout)?;
        let mut manager = Self::new(store, Arc::new(api), fetcher, settings);
        manager.health = manager
            .health
            .with_headers(config.download.default_headers.clone());
        Ok(manager)
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// A proxy that passed its last health check, acquiring a new one when
    /// needed. `None` means the worker cannot continue.
    pub async fn get_proxy(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        if let Some(url) = state.valid_url() {
            return Some(url.to_string());
        }

        for attempt in 1..=self.settings.max_acquire_attempts {
            match self.acquirer.attempt().await {
                Attempt::Locked | Attempt::Busy => continue,
                Attempt::Failed => {
                    error!("Proxy acquisition aborted after {attempt} attempt(s)");
                    return None;
                }
                Attempt::Issued(url) => {
                    state.issue(url);
                    counter!("proxy_issued_total").increment(1);
                    warn!(
                        "New proxy issued: {} (used {})",
                        state.url.as_deref().unwrap_or_default(),
                        state.used_count
                    );
                    if self.health.check(&mut state).await {
                        return state.url.clone();
                    }
                }
            }
        }
        error!(
            "No valid proxy after {} acquisition attempts",
            self.settings.max_acquire_attempts
        );
        None
    }

    /// The target site blocked `proxy`. Returns true when it was the held one.
    pub async fn report_blocked(&self, proxy: &str) -> bool {
        let mut state = self.state.lock().await;
        counter!("proxy_blocked_total").increment(1);
        if !state.holds(proxy) {
            debug!("Block reported for stale proxy {proxy}");
            return false;
        }
        state.invalidate();
        warn!("Proxy blocked, invalidated: {proxy}");
        true
    }

    /// A download through `proxy` failed at transport level. Rechecks the
    /// held proxy at most once per failure burst, then at most once per
    /// recheck interval. Returns true when a recheck ran.
    pub async fn report_failure(&self, proxy: &str) -> bool {
        let mut state = self.state.lock().await;
        if !state.holds(proxy) || state.valid != Validity::Valid {
            return false;
        }
        if state.rechecked {
            let due = state
                .last_check_time
                .is_none_or(|t| t.elapsed() > self.settings.recheck_interval);
            if !due {
                debug!("Recheck of {proxy} skipped, cooling down");
                return false;
            }
            warn!("Download failed again, rechecking proxy {proxy}");
        } else {
            warn!("Download failed, first recheck of proxy {proxy}");
        }
        counter!("proxy_recheck_total").increment(1);
        self.health.check(&mut state).await;
        state.rechecked = true;
        true
    }

    /// Unconditional health check of the held proxy.
    pub async fn recheck(&self) -> bool {
        let mut state = self.state.lock().await;
        counter!("proxy_recheck_total").increment(1);
        self.health.check(&mut state).await
    }

    pub async fn snapshot(&self) -> ProxyState {
        self.state.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProxyError;
    use crate::proxy::health::tests::ScriptedFetcher;
    use crate::proxy::provider::IssueOutcome;
    use crate::sync::LocalStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const OK: std::result::Result<(u16, Duration), &str> = Ok((200, Duration::from_millis(20)));
    const DEAD: std::result::Result<(u16, Duration), &str> = Err("connection refused");

    #[derive(Default)]
    struct ScriptedApi {
        replies: std::sync::Mutex<VecDeque<Result<IssueOutcome>>>,
        calls: AtomicUsize,
        /// reply once the script runs out
        fallback: Option<IssueOutcome>,
    }

    impl ScriptedApi {
        fn new(replies: Vec<Result<IssueOutcome>>) -> Self {
            Self {
                replies: std::sync::Mutex::new(replies.into()),
                ..Self::default()
            }
        }

        fn always(outcome: IssueOutcome) -> Self {
            Self {
                fallback: Some(outcome),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ProxyApi for ScriptedApi {
        async fn issue(&self) -> Result<IssueOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.replies.lock().unwrap().pop_front();
            match (next, &self.fallback) {
                (Some(reply), _) => reply,
                (None, Some(outcome)) => Ok(outcome.clone()),
                (None, None) => Err(ProxyError::UnexpectedResponse("script exhausted".into()).into()),
            }
        }
    }

    fn fast_settings() -> ProxySettings {
        ProxySettings {
            api_request_interval: Duration::from_millis(5),
            recheck_interval: Duration::from_millis(80),
            ..ProxySettings::default()
        }
    }

    fn issued(url: &str) -> Result<IssueOutcome> {
        Ok(IssueOutcome::Issued(url.to_string()))
    }

    fn build(api: Arc<ScriptedApi>, fetcher: Arc<ScriptedFetcher>) -> ProxyManager {
        ProxyManager::new(Arc::new(LocalStore::new()), api, fetcher, fast_settings())
    }

    #[tokio::test]
    async fn test_issued_proxy_is_checked_and_cached() {
        let api = Arc::new(ScriptedApi::new(vec![issued("http://1.2.3.4:8080")]));
        let fetcher = Arc::new(ScriptedFetcher::new([OK]));
        let manager = build(api.clone(), fetcher.clone());

        assert_eq!(manager.get_proxy().await.as_deref(), Some("http://1.2.3.4:8080"));
        // fast path: no API call, no canary request
        assert_eq!(manager.get_proxy().await.as_deref(), Some("http://1.2.3.4:8080"));
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.call_count(), 1);

        let state = manager.snapshot().await;
        assert_eq!(state.valid, Validity::Valid);
        assert_eq!(state.used_count, 1);
    }

    #[tokio::test]
    async fn test_unhealthy_proxies_are_rotated() {
        let api = Arc::new(ScriptedApi::new(vec![
            issued("http://10.0.0.1:80"),
            Ok(IssueOutcome::Busy),
            issued("http://10.0.0.2:80"),
        ]));
        let fetcher = Arc::new(ScriptedFetcher::new([DEAD, OK]));
        let manager = build(api.clone(), fetcher);
        assert_eq!(manager.get_proxy().await.as_deref(), Some("http://10.0.0.2:80"));
        assert_eq!(manager.snapshot().await.used_count, 2);
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_acquisition_is_bounded() {
        let api = Arc::new(ScriptedApi::always(IssueOutcome::Issued("http://10.0.0.9:80".into())));
        let fetcher = Arc::new(ScriptedFetcher::new(std::iter::repeat_n(DEAD, 50)));
        let manager = build(api.clone(), fetcher);
        assert!(manager.get_proxy().await.is_none());
        assert_eq!(api.calls.load(Ordering::SeqCst), 10);

        let busy = Arc::new(ScriptedApi::always(IssueOutcome::Busy));
        let manager = build(busy.clone(), Arc::new(ScriptedFetcher::default()));
        assert!(manager.get_proxy().await.is_none());
        assert_eq!(busy.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_locked_api_is_bounded_too() {
        let store: Arc<dyn CoordinationStore> = Arc::new(LocalStore::new());
        store
            .set_nx_ex("proxy:proxy_api_locked", "crashed-peer", Duration::from_secs(60))
            .await
            .unwrap();
        let api = Arc::new(ScriptedApi::always(IssueOutcome::Busy));
        let manager = ProxyManager::new(
            store,
            api.clone(),
            Arc::new(ScriptedFetcher::default()),
            fast_settings(),
        );
        assert!(manager.get_proxy().await.is_none());
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hard_failures_abort_immediately() {
        let rejected = Arc::new(ScriptedApi::always(IssueOutcome::Rejected {
            code: "10036".into(),
            body: "{}".into(),
        }));
        let manager = build(rejected.clone(), Arc::new(ScriptedFetcher::default()));
        assert!(manager.get_proxy().await.is_none());
        assert_eq!(rejected.calls.load(Ordering::SeqCst), 1);

        let broken = Arc::new(ScriptedApi::new(vec![]));
        let manager = build(broken.clone(), Arc::new(ScriptedFetcher::default()));
        assert!(manager.get_proxy().await.is_none());
        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.snapshot().await.used_count, 0);
    }

    #[tokio::test]
    async fn test_pacing_holds_across_concurrent_workers() {
        struct StampingApi {
            store: Arc<dyn CoordinationStore>,
            stamps: std::sync::Mutex<Vec<i64>>,
        }

        #[async_trait]
        impl ProxyApi for StampingApi {
            async fn issue(&self) -> Result<IssueOutcome> {
                let stamp: i64 = self
                    .store
                    .get("proxy:last_request_time")
                    .await?
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_default();
                let mut stamps = self.stamps.lock().unwrap();
                stamps.push(stamp);
                Ok(IssueOutcome::Issued(format!("http://10.1.0.{}:80", stamps.len())))
            }
        }

        let store: Arc<dyn CoordinationStore> = Arc::new(LocalStore::new());
        let api = Arc::new(StampingApi {
            store: store.clone(),
            stamps: std::sync::Mutex::new(Vec::new()),
        });
        let settings = ProxySettings {
            api_request_interval: Duration::from_millis(150),
            ..ProxySettings::default()
        };
        let worker_a = ProxyManager::new(
            store.clone(),
            api.clone(),
            Arc::new(ScriptedFetcher::new([OK])),
            settings.clone(),
        );
        let worker_b = ProxyManager::new(
            store.clone(),
            api.clone(),
            Arc::new(ScriptedFetcher::new([OK])),
            settings,
        );

        let (a, b) = tokio::join!(worker_a.get_proxy(), worker_b.get_proxy());
        assert!(a.is_some() && b.is_some());
        assert_ne!(a, b);

        let mut stamps = api.stamps.lock().unwrap().clone();
        stamps.sort();
        assert_eq!(stamps.len(), 2);
        assert!(stamps[1] - stamps[0] >= 150, "stamps too close: {stamps:?}");
    }

    #[tokio::test]
    async fn test_block_only_invalidates_held_proxy() {
        let api = Arc::new(ScriptedApi::new(vec![issued("http://1.2.3.4:8080")]));
        let manager = build(api, Arc::new(ScriptedFetcher::new([OK])));
        manager.get_proxy().await.unwrap();

        assert!(!manager.report_blocked("http://5.5.5.5:1").await);
        assert_eq!(manager.snapshot().await.valid, Validity::Valid);
        assert!(manager.report_blocked("http://1.2.3.4:8080").await);
        assert_eq!(manager.snapshot().await.valid, Validity::Invalid);
    }

    #[tokio::test]
    async fn test_recheck_storms_are_throttled() {
        let api = Arc::new(ScriptedApi::new(vec![issued("http://1.2.3.4:8080")]));
        let fetcher = Arc::new(ScriptedFetcher::new([OK, OK, OK]));
        let manager = build(api, fetcher.clone());
        let proxy = manager.get_proxy().await.unwrap();

        // first failure always rechecks
        assert!(manager.report_failure(&proxy).await);
        assert!(manager.snapshot().await.rechecked);
        // burst inside the cooldown: no recheck
        assert!(!manager.report_failure(&proxy).await);
        assert!(!manager.report_failure("http://other:1").await);
        assert_eq!(fetcher.call_count(), 2);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(manager.report_failure(&proxy).await);
        assert_eq!(fetcher.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failure_on_invalid_proxy_does_not_recheck() {
        let api = Arc::new(ScriptedApi::new(vec![issued("http://1.2.3.4:8080")]));
        let fetcher = Arc::new(ScriptedFetcher::new([OK]));
        let manager = build(api, fetcher.clone());
        let proxy = manager.get_proxy().await.unwrap();
        manager.report_blocked(&proxy).await;
        assert!(!manager.report_failure(&proxy).await);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_proxy_recovers_without_rotation() {
        let api = Arc::new(ScriptedApi::new(vec![issued("http://1.2.3.4:8080")]));
        let fetcher = Arc::new(ScriptedFetcher::new([OK, DEAD, OK]));
        let manager = build(api.clone(), fetcher);
        let proxy = manager.get_proxy().await.unwrap();

        assert!(manager.report_failure(&proxy).await);
        let state = manager.snapshot().await;
        assert_eq!(state.valid, Validity::Invalid);
        assert_eq!(state.used_count, 1);

        assert!(manager.recheck().await);
        let state = manager.snapshot().await;
        assert_eq!(state.valid, Validity::Valid);
        assert_eq!(state.used_count, 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_settings_from_config() {
        let config: ProxyConfig =
            toml::from_str("api_url = \"http://api/get?key=1\"\nkey_prefix = \"fleet\"").unwrap();
        let settings = ProxySettings::from(&config);
        assert_eq!(settings.api_request_interval, Duration::from_secs(6));
        assert_eq!(settings.recheck_interval, Duration::from_secs(10));
        assert_eq!(settings.max_acquire_attempts, 10);
        assert_eq!(settings.lock_key, "fleet:proxy_api_locked");
        assert_eq!(settings.last_request_key, "fleet:last_request_time");
    }
}
