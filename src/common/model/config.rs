use crate::errors::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Top-level worker configuration, loaded from TOML.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Crawl name; namespaces every coordination-store key.
    pub name: String,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub logger: Option<LogConfig>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".into()).into());
        }
        if self.proxy.api_url.trim().is_empty() {
            return Err(ConfigError::Invalid("proxy.api_url must not be empty".into()).into());
        }
        if self.proxy.max_acquire_attempts == 0 {
            return Err(
                ConfigError::Invalid("proxy.max_acquire_attempts must be > 0".into()).into(),
            );
        }
        if self.crawler.concurrent_requests == 0 || self.crawler.concurrent_requests_per_host == 0
        {
            return Err(ConfigError::Invalid("crawler concurrency must be > 0".into()).into());
        }
        Ok(())
    }

    /// Seed key; falls back to `<name>:start_urls`.
    pub fn seed_key(&self) -> String {
        self.crawler
            .seed_key
            .clone()
            .unwrap_or_else(|| format!("{}:start_urls", self.name))
    }
}

/// Redis Configuration
#[derive(Serialize, Deserialize, Clone)]
pub struct RedisConfig {
    /// Redis server hostname
    pub redis_host: String,
    /// Redis server port
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,
    /// Redis database index
    #[serde(default)]
    pub redis_db: u16,
    /// Optional Redis username
    pub redis_username: Option<String>,
    /// Optional Redis password
    pub redis_password: Option<String>,
    /// Connection pool size
    pub pool_size: Option<usize>,
}

impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("redis_host", &self.redis_host)
            .field("redis_port", &self.redis_port)
            .field("redis_db", &self.redis_db)
            .field("redis_username", &self.redis_username)
            .field(
                "redis_password",
                &self.redis_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

fn default_redis_port() -> u16 {
    6379
}

/// Proxy acquisition and health-check configuration
#[derive(Serialize, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Issuing API endpoint; one GET returns one fresh proxy
    pub api_url: String,
    /// Minimum seconds between two issuing API calls across the whole fleet
    #[serde(default = "default_api_request_interval")]
    pub api_request_interval_secs: u64,
    /// Cooldown before a failed download may trigger another recheck
    #[serde(default = "default_recheck_interval")]
    pub recheck_interval_secs: u64,
    /// Connect timeout of the canary request; the response is bounded by `max_elapsed_secs`
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,
    /// Canary responses slower than this mark the proxy invalid
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_secs: u64,
    /// Canary endpoint
    #[serde(default = "default_check_url")]
    pub check_url: String,
    /// Upper bound of acquisition iterations per `get_proxy` call
    #[serde(default = "default_max_acquire_attempts")]
    pub max_acquire_attempts: u32,
    /// Expiry of the fleet-wide issuing lock
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,
    /// Timeout of the issuing API call itself
    #[serde(default = "default_api_timeout")]
    pub api_timeout_secs: u64,
    /// Prefix of the lock and pacing keys in the coordination store
    #[serde(default = "default_proxy_key_prefix")]
    pub key_prefix: String,
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // issuing API urls usually carry the account key in the query
        let api_url = match self.api_url.split_once('?') {
            Some((base, _)) => format!("{base}?***REDACTED***"),
            None => self.api_url.clone(),
        };
        f.debug_struct("ProxyConfig")
            .field("api_url", &api_url)
            .field("api_request_interval_secs", &self.api_request_interval_secs)
            .field("recheck_interval_secs", &self.recheck_interval_secs)
            .field("check_timeout_secs", &self.check_timeout_secs)
            .field("max_elapsed_secs", &self.max_elapsed_secs)
            .field("check_url", &self.check_url)
            .field("max_acquire_attempts", &self.max_acquire_attempts)
            .field("lock_ttl_secs", &self.lock_ttl_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

fn default_api_request_interval() -> u64 {
    6
}
fn default_recheck_interval() -> u64 {
    10
}
fn default_check_timeout() -> u64 {
    5
}
fn default_max_elapsed() -> u64 {
    10
}
fn default_check_url() -> String {
    "https://www.baidu.com/".to_string()
}
fn default_max_acquire_attempts() -> u32 {
    10
}
fn default_lock_ttl() -> u64 {
    30
}
fn default_api_timeout() -> u64 {
    10
}
fn default_proxy_key_prefix() -> String {
    "proxy".to_string()
}

/// Dequeue order of the shared frontier
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicy {
    #[default]
    Priority,
    Fifo,
    Lifo,
}

/// Crawler Configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Idle ticks tolerated (seed key absent) before the worker closes
    pub idle_threshold: usize,
    /// Seconds between two idle observations of an empty frontier
    pub idle_tick_secs: u64,
    /// In-flight request limit for the whole worker
    pub concurrent_requests: usize,
    /// In-flight request limit per remote host
    pub concurrent_requests_per_host: usize,
    pub queue_policy: QueuePolicy,
    /// Keep the frontier and dupefilter when the worker closes
    pub scheduler_persist: bool,
    /// Overrides `<name>:start_urls`
    pub seed_key: Option<String>,
    /// Seed urls pulled per refill of an empty frontier
    pub seed_batch_size: usize,
    /// Close the worker after this many consecutive content anomalies
    pub max_content_anomalies: Option<usize>,
    /// Priority delta applied per crawl depth (negative = breadth first)
    pub depth_priority: i32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            idle_threshold: 30,
            idle_tick_secs: 5,
            concurrent_requests: 64,
            concurrent_requests_per_host: 16,
            queue_policy: QueuePolicy::Priority,
            scheduler_persist: true,
            seed_key: None,
            seed_batch_size: 16,
            max_content_anomalies: None,
            depth_priority: -1,
        }
    }
}

/// Retry backoff between two attempts of the same request
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackoffConfig {
    Fixed { secs: u64 },
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Fixed { secs: 0 }
    }
}

/// Downloader Configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DownloadConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    pub retry_enabled: bool,
    pub max_retries: u32,
    /// Statuses handed to the generic retry mechanism
    pub retry_http_codes: Vec<u16>,
    /// Priority change applied to every retried request
    pub retry_priority_adjust: i32,
    pub backoff: BackoffConfig,
    pub default_headers: BTreeMap<String, String>,
    /// Rotated per request; empty keeps reqwest's default
    pub user_agents: Vec<String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        let mut default_headers = BTreeMap::new();
        default_headers.insert(
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8"
                .to_string(),
        );
        default_headers.insert(
            "Accept-Language".to_string(),
            "zh-CN,zh;q=0.9,en;q=0.8".to_string(),
        );
        Self {
            timeout_secs: 30,
            retry_enabled: true,
            max_retries: 2,
            retry_http_codes: vec![500, 502, 503, 504, 400, 408, 478, 510],
            retry_priority_adjust: -1,
            backoff: BackoffConfig::default(),
            default_headers,
            user_agents: Vec::new(),
        }
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Logging section of the worker config
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub console: bool,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            console: true,
            json: false,
        }
    }
}
