use super::retry::RetryPolicy;
use crate::common::interface::{FetchTimeout, Fetcher};
use crate::common::model::{Request, Response};
use crate::errors::{Error, Result};
use crate::proxy::ProxyManager;
use log::{debug, error, warn};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;

/// How the dispatcher reads a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Pass,
    /// The target site blocked the proxy
    Blocked,
    Retryable,
}

pub fn classify_status(status: u16, retry: &RetryPolicy) -> StatusClass {
    match status {
        302 | 403 => StatusClass::Blocked,
        s if retry.is_retryable_status(s) => StatusClass::Retryable,
        _ => StatusClass::Pass,
    }
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// Hand to the extraction pipeline
    Response(Response),
    /// Reschedule after `delay`
    Retry { request: Request, delay: Duration },
    /// Given up; the error says why
    Dropped(Error),
}

/// Attaches the worker's proxy to every outbound request and turns the
/// result into a proxy-health signal plus a scheduling decision.
pub struct Dispatcher {
    proxies: Arc<ProxyManager>,
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
    timeout: FetchTimeout,
}

impl Dispatcher {
    pub fn new(
        proxies: Arc<ProxyManager>,
        fetcher: Arc<dyn Fetcher>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            proxies,
            fetcher,
            retry,
            timeout: FetchTimeout::from(timeout),
        }
    }

    pub fn proxies(&self) -> &Arc<ProxyManager> {
        &self.proxies
    }

    /// `Err` only for the fatal no-proxy signal; every other failure comes
    /// back as a retry or a drop.
    pub async fn dispatch(&self, mut request: Request) -> Result<DispatchOutcome> {
        let Some(proxy) = self.proxies.get_proxy().await else {
            error!("No proxy available, cannot fetch {}", request.url);
            return Err(Error::no_proxy_available());
        };
        request.proxy = Some(proxy.clone());
        let outcome = match self.fetcher.fetch(&request, &proxy, self.timeout).await {
            Ok(response) => self.on_response(response).await,
            Err(e) => self.on_error(request, e).await,
        };
        Ok(outcome)
    }

    async fn on_response(&self, response: Response) -> DispatchOutcome {
        let status = response.status;
        if status != 200 {
            warn!(
                "Got {status} for {} via {}",
                response.request.url,
                response.proxy().unwrap_or("-")
            );
        }
        match classify_status(status, &self.retry) {
            StatusClass::Pass => DispatchOutcome::Response(response),
            StatusClass::Blocked => {
                if let Some(proxy) = response.proxy() {
                    self.proxies.report_blocked(proxy).await;
                }
                warn!("{status} means the proxy is banned, re-issuing {}", response.request.url);
                counter!("dispatch_retries_total", "reason" => "blocked").increment(1);
                DispatchOutcome::Retry {
                    request: response.request.retry_copy(),
                    delay: Duration::ZERO,
                }
            }
            StatusClass::Retryable => {
                debug!("Body of {status} page: {}", response.text());
                match self.retry.retry(&response.request) {
                    Some((request, delay)) => {
                        counter!("dispatch_retries_total", "reason" => "status").increment(1);
                        DispatchOutcome::Retry { request, delay }
                    }
                    None => {
                        warn!(
                            "Gave up retrying {} (status {status}, {} retries)",
                            response.request.url, response.request.retry_times
                        );
                        DispatchOutcome::Response(response)
                    }
                }
            }
        }
    }

    async fn on_error(&self, request: Request, e: Error) -> DispatchOutcome {
        if e.is_ignored() {
            debug!("Request ignored: {} ({e})", request.url);
            return DispatchOutcome::Dropped(e);
        }
        let proxy = request.proxy.clone().unwrap_or_default();
        warn!(
            "Download error: url={} proxy={proxy} error={e} state={:?}",
            request.url,
            self.proxies.snapshot().await
        );
        self.proxies.report_failure(&proxy).await;

        match self.retry.retry(&request) {
            Some((request, delay)) => {
                counter!("dispatch_retries_total", "reason" => "error").increment(1);
                DispatchOutcome::Retry { request, delay }
            }
            None => {
                error!(
                    "Gave up {} after {} retries: {e}",
                    request.url, request.retry_times
                );
                DispatchOutcome::Dropped(e)
            }
        }
    }
}
