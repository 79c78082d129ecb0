pub mod config;
pub mod request;
pub mod response;

pub use config::{
    BackoffConfig, Config, CrawlerConfig, DownloadConfig, LogConfig, ProxyConfig, QueuePolicy,
    RedisConfig,
};
pub use request::Request;
pub use response::Response;
