use super::Request;
use crate::errors::{ResponseError, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Result of the fetch primitive.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Wall time of the round trip, as measured by the fetcher
    pub elapsed: Duration,
    pub request: Request,
}

impl Response {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() {
            return Err(ResponseError::EmptyResponse.into());
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Proxy the request went out through.
    pub fn proxy(&self) -> Option<&str> {
        self.request.proxy.as_deref()
    }
}
