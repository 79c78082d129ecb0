use crate::common::interface::{FetchTimeout, Fetcher};
use crate::common::model::{DownloadConfig, Request, Response};
use crate::errors::{DownloadError, Error, RequestError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use log::trace;
use metrics::{counter, histogram};
use rand::seq::SliceRandom;
use reqwest::{Client, Method, Proxy, redirect};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use url::Url;

const CLIENT_IDLE_EVICTION: Duration = Duration::from_secs(3600);
const MAX_CACHED_CLIENTS: usize = 1000;

/// reqwest-backed fetch primitive.
///
/// One client per proxy url and connect timeout, reused across requests and
/// evicted after an hour without use. Redirects are not followed: a 302 is a block signal
/// the dispatcher has to see.
pub struct HttpFetcher {
    proxy_clients: Arc<DashMap<String, (Client, Instant)>>,
    default_headers: BTreeMap<String, String>,
    user_agents: Vec<String>,
    pool_size: usize,
}

impl HttpFetcher {
    pub fn new(config: &DownloadConfig) -> Self {
        let proxy_clients: Arc<DashMap<String, (Client, Instant)>> = Arc::new(DashMap::new());
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let clients = Arc::downgrade(&proxy_clients);
            handle.spawn(evict_idle_clients(clients));
        }
        Self {
            proxy_clients,
            default_headers: config.default_headers.clone(),
            user_agents: config.user_agents.clone(),
            pool_size: 16,
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    fn client(&self, proxy: &str, connect_timeout: Duration) -> Result<Client> {
        let key = format!("{proxy}#{}", connect_timeout.as_millis());
        if let Some(mut entry) = self.proxy_clients.get_mut(&key) {
            entry.1 = Instant::now();
            return Ok(entry.0.clone());
        }
        let reqwest_proxy =
            Proxy::all(proxy).map_err(|e| DownloadError::ClientError(e.into()))?;
        let client = Client::builder()
            .proxy(reqwest_proxy)
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(self.pool_size)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| DownloadError::ClientError(e.into()))?;
        // proxies rotate constantly; keep the cache bounded
        if self.proxy_clients.len() < MAX_CACHED_CLIENTS {
            self.proxy_clients.insert(key, (client.clone(), Instant::now()));
        }
        Ok(client)
    }

    pub fn cached_clients(&self) -> usize {
        self.proxy_clients.len()
    }

    /// Default headers overlaid with the request's own, plus a random
    /// user agent unless the request brings one.
    pub fn headers_for(&self, request: &Request) -> BTreeMap<String, String> {
        let mut headers = self.default_headers.clone();
        headers.extend(request.headers.clone());
        let has_agent = headers.keys().any(|k| k.eq_ignore_ascii_case("user-agent"));
        if !has_agent
            && let Some(agent) = self.user_agents.choose(&mut rand::thread_rng())
        {
            headers.insert("User-Agent".to_string(), agent.clone());
        }
        headers
    }
}

async fn evict_idle_clients(clients: Weak<DashMap<String, (Client, Instant)>>) {
    loop {
        tokio::time::sleep(Duration::from_secs(60)).await;
        let Some(clients) = clients.upgrade() else {
            return;
        };
        let now = Instant::now();
        clients.retain(|_, (_, last_access)| now.duration_since(*last_access) < CLIENT_IDLE_EVICTION);
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        DownloadError::Timeout(e.into()).into()
    } else if e.is_connect() {
        DownloadError::Connect(e.into()).into()
    } else {
        DownloadError::Transport(e.into()).into()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request, proxy: &str, timeout: FetchTimeout) -> Result<Response> {
        let client = self.client(proxy, timeout.connect)?;
        let method = Method::from_str(&request.method)
            .map_err(|_| RequestError::InvalidMethod(request.method.clone()))?;
        let url =
            Url::parse(&request.url).map_err(|_| RequestError::InvalidUrl(request.url.clone()))?;

        let mut builder = client.request(method, url).timeout(timeout.total);
        for (name, value) in self.headers_for(request) {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        trace!("Fetching {} via {proxy}", request.url);
        let start = Instant::now();
        let response = builder.send().await.map_err(transport_error)?;
        let elapsed = start.elapsed();

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let body = response.bytes().await.map_err(transport_error)?.to_vec();

        histogram!("download_duration_seconds").record(elapsed.as_secs_f64());
        counter!("download_responses_total", "status_code" => status.to_string()).increment(1);

        let mut request = request.clone();
        request.proxy = Some(proxy.to_string());
        Ok(Response {
            url: final_url,
            status,
            headers,
            body,
            elapsed,
            request,
        })
    }
}
