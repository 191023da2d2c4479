//! Pluggable HTTP fetch capability used by the probe and the identifier.
//!
//! Production code uses [`ReqwestFetcher`]; tests and embedders may provide any
//! other [`HttpFetch`] implementation.

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client, Response};
use thiserror::Error;
use tracing::debug;

use crate::config::ScanConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Head,
    Get,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn head(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            method: Method::Head,
            timeout,
        }
    }

    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            timeout,
        }
    }
}

/// A response as seen by the identifier. Header names are stored lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    /// Body text, present only for GET requests with a textual content type.
    pub body: Option<String>,
}

impl FetchResponse {
    pub fn new(status: u16, status_text: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Get header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_html(&self) -> bool {
        self.content_type()
            .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
            .unwrap_or(false)
    }

    pub fn is_json(&self) -> bool {
        self.content_type()
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    /// Nothing accepted the connection (refused, reset, DNS failure).
    #[error("connection failed: {0}")]
    Connect(String),

    /// Something answered, but not with a response that can be read.
    #[error("response not readable: {0}")]
    Blocked(String),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// [`HttpFetch`] backed by reqwest. HEAD probes never follow redirects; detail GETs follow up to three.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    probe_client: Client,
    detail_client: Client,
    max_body_bytes: usize,
}

impl ReqwestFetcher {
    pub fn new(config: &ScanConfig) -> reqwest::Result<Self> {
        let probe_client = Client::builder()
            .user_agent(&config.user_agent)
            .no_proxy()
            .redirect(redirect::Policy::none())
            .build()?;
        let detail_client = Client::builder()
            .user_agent(&config.user_agent)
            .no_proxy()
            .redirect(redirect::Policy::limited(3))
            .build()?;
        Ok(Self {
            probe_client,
            detail_client,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let (client, method) = match request.method {
            Method::Head => (&self.probe_client, reqwest::Method::HEAD),
            Method::Get => (&self.detail_client, reqwest::Method::GET),
        };

        let mut resp = client
            .request(method, &request.url)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let mut out = FetchResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: None,
        };

        if request.method == Method::Get && is_textual(out.content_type()) {
            let bytes = read_body_capped(&mut resp, self.max_body_bytes).await?;
            out.body = Some(String::from_utf8_lossy(&bytes).into_owned());
        }
        Ok(out)
    }
}

fn is_textual(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("text/") || ct.contains("html") || ct.contains("json")
        })
        .unwrap_or(false)
}

/// Read at most `limit` bytes. A body that breaks off midway keeps what arrived.
async fn read_body_capped(resp: &mut Response, limit: usize) -> Result<Vec<u8>, FetchError> {
    let mut body = Vec::new();
    loop {
        match resp.chunk().await {
            Ok(Some(chunk)) => {
                let remaining = limit - body.len();
                if chunk.len() >= remaining {
                    body.extend_from_slice(&chunk[..remaining]);
                    debug!("response body truncated at {} bytes", limit);
                    break;
                }
                body.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(e) if body.is_empty() => return Err(classify(e)),
            Err(e) => {
                debug!(error = %e, "body read failed after {} bytes", body.len());
                break;
            }
        }
    }
    Ok(body)
}

fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_connect() {
        FetchError::Connect(describe(&e))
    } else if e.is_request() || e.is_body() || e.is_decode() {
        FetchError::Blocked(describe(&e))
    } else {
        FetchError::Other(describe(&e))
    }
}

/// Flatten the error's source chain into one line.
fn describe(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let resp = FetchResponse::new(200, "OK").with_header("Content-Type", "text/html; charset=utf-8");
        assert_eq!(resp.header("content-type"), Some("text/html; charset=utf-8"));
        assert_eq!(resp.header("CONTENT-TYPE"), Some("text/html; charset=utf-8"));
        assert!(resp.is_html());
        assert!(!resp.is_json());
    }

    #[test]
    fn json_content_types() {
        let resp = FetchResponse::new(200, "OK").with_header("content-type", "application/problem+json");
        assert!(resp.is_json());
    }

    #[test]
    fn textual_detection() {
        assert!(is_textual(Some("text/plain")));
        assert!(is_textual(Some("application/json")));
        assert!(is_textual(Some("application/xhtml+xml")));
        assert!(!is_textual(Some("image/png")));
        assert!(!is_textual(None));
    }
}
