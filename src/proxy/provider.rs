use crate::errors::{ProxyError, Result};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const CODE_OK: &str = "0";
const CODE_BUSY: &str = "10001";

/// What one call to the issuing API produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    /// A fresh proxy, as `http://ip:port`
    Issued(String),
    /// Provider is overloaded; try again after the pacing interval
    Busy,
    /// Any other reply. Retrying would only burn quota.
    Rejected { code: String, body: String },
}

/// The external proxy-issuing service.
///
/// `Err` means the call itself failed (transport, undecodable body); the
/// acquisition loop treats it like `Rejected`.
#[async_trait]
pub trait ProxyApi: Send + Sync {
    async fn issue(&self) -> Result<IssueOutcome>;
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    #[serde(rename = "ERRORCODE")]
    error_code: Value,
    #[serde(rename = "RESULT", default)]
    result: Value,
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decodes `{ERRORCODE, RESULT: [{ip, port}]}`.
pub fn parse_reply(status: u16, body: &str) -> Result<IssueOutcome> {
    if status != 200 {
        return Ok(IssueOutcome::Rejected {
            code: format!("http {status}"),
            body: body.to_string(),
        });
    }
    let reply: ApiReply = serde_json::from_str(body)
        .map_err(|e| ProxyError::UnexpectedResponse(format!("{e}: {body}")))?;
    let code = scalar(&reply.error_code).unwrap_or_default();
    match code.as_str() {
        CODE_OK => {
            let first = reply.result.get(0);
            let ip = first.and_then(|r| r.get("ip")).and_then(scalar);
            let port = first.and_then(|r| r.get("port")).and_then(scalar);
            match (ip, port) {
                (Some(ip), Some(port)) if !ip.is_empty() && !port.is_empty() => {
                    Ok(IssueOutcome::Issued(format!("http://{ip}:{port}")))
                }
                _ => Err(ProxyError::UnexpectedResponse(format!(
                    "success reply without ip/port: {body}"
                ))
                .into()),
            }
        }
        CODE_BUSY => Ok(IssueOutcome::Busy),
        _ => Ok(IssueOutcome::Rejected {
            code,
            body: body.to_string(),
        }),
    }
}

/// reqwest client for the issuing API.
pub struct HttpProxyApi {
    client: reqwest::Client,
    url: String,
}

impl HttpProxyApi {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::GetProxy(Box::new(e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ProxyApi for HttpProxyApi {
    async fn issue(&self) -> Result<IssueOutcome> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ProxyError::GetProxy(Box::new(e)))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::GetProxy(Box::new(e)))?;
        debug!("Issuing API replied {status}: {body}");
        parse_reply(status, &body)
    }
}
