use std::time::Duration;

use crate::error::ScanError;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(2000);
pub const DEFAULT_IDENTIFY_TIMEOUT: Duration = Duration::from_millis(3000);
pub const DEFAULT_CONCURRENCY: usize = 10;
pub const MAX_CONCURRENCY: usize = 256;
/// Upper bound on how much of a response body is read for fingerprinting.
pub const DEFAULT_MAX_BODY_BYTES: usize = 512 * 1024;

/// Tunables shared by the probe, the identifier and the batch scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub probe_timeout: Duration,
    pub identify_timeout: Duration,
    pub concurrency: usize,
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            identify_timeout: DEFAULT_IDENTIFY_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            user_agent: format!("devport-scan/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ScanError> {
        validate_concurrency(self.concurrency)
    }
}

pub fn validate_concurrency(concurrency: usize) -> Result<(), ScanError> {
    if concurrency == 0 || concurrency > MAX_CONCURRENCY {
        return Err(ScanError::InvalidConcurrency {
            got: concurrency,
            max: MAX_CONCURRENCY,
        });
    }
    Ok(())
}

/// Accept bare hostnames and IP literals; reject anything that would change the URL shape.
pub fn validate_host(host: &str) -> Result<(), ScanError> {
    let bracketed = host.len() > 2 && host.starts_with('[') && host.ends_with(']');
    let ok = !host.is_empty()
        && host.len() <= 253
        && host.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, '.' | '-' | '_')
                || (bracketed && matches!(c, ':' | '[' | ']'))
        });
    if ok {
        Ok(())
    } else {
        Err(ScanError::InvalidHost(host.to_string()))
    }
}
