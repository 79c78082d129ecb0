use crate::errors::{RequestError, Result};
use crate::utils::encrypt::md5;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;
use uuid::Uuid;

/// A pending fetch, as stored in the shared frontier.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Uuid,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
    #[serde(default)]
    pub priority: i32,
    /// Bypass the dupefilter when scheduling
    #[serde(default)]
    pub dont_filter: bool,
    #[serde(default)]
    pub retry_times: u32,
    #[serde(default)]
    pub depth: u32,
    /// Proxy attached by the dispatcher for the current attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Free-form routing data for the extraction pipeline (callback name, ...)
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            url: url.into(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: None,
            priority: 0,
            dont_filter: false,
            retry_times: 0,
            depth: 0,
            proxy: None,
            meta: serde_json::Map::new(),
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        let mut request = Self::new(url);
        request.method = "POST".to_string();
        request.body = Some(body.into());
        request
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dont_filter(mut self, dont_filter: bool) -> Self {
        self.dont_filter = dont_filter;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Callback name the extraction pipeline routes on.
    pub fn callback(&self) -> Option<&str> {
        self.meta.get("callback").and_then(|v| v.as_str())
    }

    /// Follow-up request discovered while processing this one.
    pub fn follow(&self, url: impl Into<String>, depth_priority: i32) -> Self {
        let mut next = Request::new(url);
        next.depth = self.depth + 1;
        next.priority = next.depth as i32 * depth_priority;
        next
    }

    pub fn host(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    pub fn validate(&self) -> Result<()> {
        let parsed =
            Url::parse(&self.url).map_err(|_| RequestError::InvalidUrl(self.url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RequestError::InvalidUrl(self.url.clone()).into());
        }
        if !matches!(self.method.as_str(), "GET" | "POST" | "HEAD" | "PUT" | "DELETE") {
            return Err(RequestError::InvalidMethod(self.method.clone()).into());
        }
        Ok(())
    }

    /// Copy re-issued after a block or a retryable failure: same url, new id,
    /// dupefilter bypassed, proxy detached so the next dispatch attaches a
    /// fresh one.
    pub fn retry_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.id = Uuid::now_v7();
        copy.dont_filter = true;
        copy.proxy = None;
        copy
    }

    /// Canonical identity used by the shared dupefilter.
    pub fn fingerprint(&self) -> String {
        let canonical = format!(
            "{}\n{}\n{}",
            self.method.to_uppercase(),
            canonicalize_url(&self.url),
            self.body
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default()
        );
        md5(canonical.as_bytes())
    }
}

/// Sorts query pairs and drops the fragment; unparsable urls are used as-is.
pub fn canonicalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    url.set_fragment(None);
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url.to_string()
}
