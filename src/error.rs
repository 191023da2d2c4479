use thiserror::Error;

/// Errors surfaced to callers of the scanner's host operations.
///
/// Individual probe and identification failures never show up here; they are
/// folded into the per-port results instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("a scan is already in progress")]
    AlreadyScanning,

    #[error("concurrency must be between 1 and {max}, got {got}")]
    InvalidConcurrency { got: usize, max: usize },

    #[error("invalid host: {0:?}")]
    InvalidHost(String),
}
