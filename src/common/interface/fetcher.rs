use crate::common::model::{Request, Response};
use crate::errors::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Time bounds of one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTimeout {
    /// Handshake with the proxy
    pub connect: Duration,
    /// Whole round trip, never shorter than `connect`
    pub total: Duration,
}

impl FetchTimeout {
    pub fn new(connect: Duration, total: Duration) -> Self {
        Self {
            connect,
            total: total.max(connect),
        }
    }
}

impl From<Duration> for FetchTimeout {
    fn from(timeout: Duration) -> Self {
        Self::new(timeout, timeout)
    }
}

/// The fetch primitive: one round trip of `request` through `proxy`.
///
/// Implementations return `Ok` for any HTTP status; only transport-level
/// failures (timeout, refused connection, TLS) are `Err`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request, proxy: &str, timeout: FetchTimeout) -> Result<Response>;
}
