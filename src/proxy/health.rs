use super::proxy_state::ProxyState;
use crate::common::interface::{FetchTimeout, Fetcher};
use crate::common::model::{Request, Response};
use crate::errors::Result;
use log::warn;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Probes the held proxy against a canary url.
pub struct HealthTracker {
    fetcher: Arc<dyn Fetcher>,
    check_url: String,
    timeout: FetchTimeout,
    max_elapsed: Duration,
    headers: BTreeMap<String, String>,
}

impl HealthTracker {
    /// `check_timeout` bounds the handshake with the proxy. The canary itself
    /// may take up to `max_elapsed` and is then judged on its latency.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        check_url: impl Into<String>,
        check_timeout: Duration,
        max_elapsed: Duration,
    ) -> Self {
        Self {
            fetcher,
            check_url: check_url.into(),
            timeout: FetchTimeout::new(check_timeout, max_elapsed + check_timeout),
            max_elapsed,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Healthy iff the canary answered 200 within `max_elapsed`.
    pub fn evaluate(outcome: &Result<Response>, max_elapsed: Duration) -> bool {
        match outcome {
            Ok(response) => response.status == 200 && response.elapsed <= max_elapsed,
            Err(_) => false,
        }
    }

    /// Runs one canary request through `state.url` and records the verdict.
    /// `last_check_time` is updated whatever the outcome.
    pub async fn check(&self, state: &mut ProxyState) -> bool {
        let Some(proxy) = state.url.clone() else {
            state.record_check(false);
            return false;
        };
        let mut request = Request::new(&self.check_url).with_dont_filter(true);
        request.headers = self.headers.clone();

        let outcome = self.fetcher.fetch(&request, &proxy, self.timeout).await;
        let healthy = Self::evaluate(&outcome, self.max_elapsed);
        state.record_check(healthy);

        match &outcome {
            Ok(response) if healthy => {
                warn!("Proxy check passed: {proxy} ({:?})", response.elapsed)
            }
            Ok(response) if response.status == 200 => warn!(
                "Proxy check failed, too slow: {proxy} elapsed {:?} > {:?}",
                response.elapsed, self.max_elapsed
            ),
            Ok(response) => warn!(
                "Proxy check failed, status {}: {proxy}",
                response.status
            ),
            Err(e) => warn!("Proxy check failed, canary unreachable: {proxy}: {e}"),
        }
        healthy
    }
}
