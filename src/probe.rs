use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::debug;

use crate::fetch::{FetchError, FetchRequest, HttpFetch};
use crate::types::{Health, HealthReport, ProbeErrorKind, ProbeResult, ScanTarget};

/// Decides whether anything answers HTTP on `host:port` within a deadline.
///
/// Any response counts as reachable, including one that cannot be read. The
/// deadline is enforced here, independently of the fetcher: the request future
/// is dropped (and the request cancelled) once it expires.
#[derive(Clone)]
pub struct ReachabilityProbe {
    fetcher: Arc<dyn HttpFetch>,
    timeout: Duration,
}

impl ReachabilityProbe {
    pub fn new(fetcher: Arc<dyn HttpFetch>, timeout: Duration) -> Self {
        Self { fetcher, timeout }
    }

    pub async fn probe(&self, host: &str, port: u16) -> ProbeResult {
        self.probe_with_timeout(host, port, self.timeout).await
    }

    pub async fn probe_with_timeout(&self, host: &str, port: u16, timeout: Duration) -> ProbeResult {
        let target = ScanTarget::new(host, port);
        let request = FetchRequest::head(format!("{}/", target.url()), timeout);
        let start = Instant::now();

        let outcome = time::timeout(timeout, self.fetcher.fetch(&request)).await;
        let result = match outcome {
            Ok(Ok(_)) | Ok(Err(FetchError::Blocked(_))) => {
                ProbeResult::reachable(port, start.elapsed().as_millis() as u64)
            }
            Ok(Err(FetchError::Timeout)) | Err(_) => {
                ProbeResult::unreachable(port, ProbeErrorKind::Timeout)
            }
            Ok(Err(FetchError::Connect(_))) => ProbeResult::unreachable(port, ProbeErrorKind::Network),
            Ok(Err(FetchError::Other(msg))) => {
                debug!(port, error = %msg, "probe failed for an unclassified reason");
                ProbeResult::unreachable(port, ProbeErrorKind::Unknown)
            }
        };
        debug!(host, port, accessible = result.accessible, "probe finished");
        result
    }
}

/// HEAD the app once and report whether it looks healthy.
///
/// `healthy` for 2xx/3xx, `error` for any other status or an unreadable answer,
/// `down` when nothing answered in time.
pub async fn check_health(fetcher: &dyn HttpFetch, url: &str, timeout: Duration) -> HealthReport {
    let request = FetchRequest::head(url, timeout);
    let start = Instant::now();
    match time::timeout(timeout, fetcher.fetch(&request)).await {
        Ok(Ok(resp)) => HealthReport {
            status: if (200..400).contains(&resp.status) {
                Health::Healthy
            } else {
                Health::Error
            },
            response_time: Some(start.elapsed().as_millis() as u64),
            status_code: Some(resp.status),
            error: None,
        },
        Ok(Err(FetchError::Blocked(msg))) => HealthReport {
            status: Health::Error,
            response_time: Some(start.elapsed().as_millis() as u64),
            status_code: None,
            error: Some(msg),
        },
        Ok(Err(e)) => HealthReport {
            status: Health::Down,
            response_time: None,
            status_code: None,
            error: Some(e.to_string()),
        },
        Err(_) => HealthReport {
            status: Health::Down,
            response_time: None,
            status_code: None,
            error: Some(FetchError::Timeout.to_string()),
        },
    }
}
