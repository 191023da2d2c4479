use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{validate_concurrency, validate_host, ScanConfig};
use crate::error::ScanError;
use crate::fetch::{HttpFetch, ReqwestFetcher};
use crate::identify::ServiceIdentifier;
use crate::ports::PortCatalog;
use crate::probe::ReachabilityProbe;
use crate::types::{ProbeResult, ScanMode, ScanResultRecord, ScanStatus, ScanTarget};

/// Scan state shared between the running scan and status readers.
///
/// Only the active scan writes; readers never wait on a probe.
#[derive(Debug, Default)]
pub struct SharedProgress {
    scanning: AtomicBool,
    progress: AtomicU8,
    results: RwLock<BTreeMap<u16, ScanResultRecord>>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }

    fn advance(&self, percent: u8) {
        self.progress.fetch_max(percent.min(100), Ordering::SeqCst);
    }
}

/// Releases the scanning slot when dropped, leaving progress at 100.
struct ScanGuard {
    state: Arc<SharedProgress>,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.state.progress.store(100, Ordering::SeqCst);
        self.state.scanning.store(false, Ordering::SeqCst);
    }
}

/// Batch port scanner with a per-session result table.
///
/// - At most one scan runs at a time; a second start is rejected.
/// - Ports are probed in fixed-size batches, each batch joined before the next starts.
/// - Progress advances only at batch boundaries.
/// - Reachable ports are identified before the scan is reported finished.
#[derive(Clone)]
pub struct Scanner {
    catalog: Arc<PortCatalog>,
    fetcher: Arc<dyn HttpFetch>,
    probe: ReachabilityProbe,
    identifier: ServiceIdentifier,
    config: ScanConfig,
    state: Arc<SharedProgress>,
}

impl Scanner {
    pub fn new(fetcher: Arc<dyn HttpFetch>, catalog: Arc<PortCatalog>, config: ScanConfig) -> Self {
        let probe = ReachabilityProbe::new(fetcher.clone(), config.probe_timeout);
        let identifier =
            ServiceIdentifier::new(fetcher.clone(), catalog.clone(), config.identify_timeout);
        Self {
            catalog,
            fetcher,
            probe,
            identifier,
            config,
            state: Arc::new(SharedProgress::new()),
        }
    }

    /// Scanner backed by a real HTTP client.
    pub fn with_reqwest(catalog: Arc<PortCatalog>, config: ScanConfig) -> reqwest::Result<Self> {
        let fetcher = Arc::new(ReqwestFetcher::new(&config)?);
        Ok(Self::new(fetcher, catalog, config))
    }

    pub fn catalog(&self) -> &PortCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &dyn HttpFetch {
        self.fetcher.as_ref()
    }

    /// Begin a scan in the background. Results land in the result table.
    pub fn start_scan(
        &self,
        host: &str,
        mode: ScanMode,
        concurrency: usize,
    ) -> Result<JoinHandle<Vec<ScanResultRecord>>, ScanError> {
        let guard = self.begin(host, concurrency)?;
        let this = self.clone();
        let host = host.to_string();
        Ok(tokio::spawn(async move {
            this.run(guard, &host, mode, concurrency).await
        }))
    }

    /// Run a scan to completion and return the records it produced, ascending by port.
    pub async fn scan(
        &self,
        host: &str,
        mode: ScanMode,
        concurrency: usize,
    ) -> Result<Vec<ScanResultRecord>, ScanError> {
        let guard = self.begin(host, concurrency)?;
        Ok(self.run(guard, host, mode, concurrency).await)
    }

    pub async fn status(&self) -> ScanStatus {
        ScanStatus {
            is_scanning: self.state.is_scanning(),
            progress: self.state.progress(),
            result_count: self.state.results.read().await.len(),
        }
    }

    /// Snapshot of the result table, ascending by port.
    pub async fn results(&self) -> Vec<ScanResultRecord> {
        self.state.results.read().await.values().cloned().collect()
    }

    pub async fn clear_results(&self) {
        self.state.results.write().await.clear();
    }

    fn begin(&self, host: &str, concurrency: usize) -> Result<ScanGuard, ScanError> {
        validate_host(host)?;
        validate_concurrency(concurrency)?;
        if self
            .state
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(host, "scan rejected: another scan is running");
            return Err(ScanError::AlreadyScanning);
        }
        self.state.progress.store(0, Ordering::SeqCst);
        Ok(ScanGuard {
            state: self.state.clone(),
        })
    }

    async fn run(
        &self,
        guard: ScanGuard,
        host: &str,
        mode: ScanMode,
        concurrency: usize,
    ) -> Vec<ScanResultRecord> {
        let span = info_span!("scan", host, %mode);
        let records = async {
            let ports = self.catalog.candidate_ports(mode);
            info!(ports = ports.len(), concurrency, "scan started");

            let accessible = self.probe_all(host, &ports, concurrency).await;
            debug!(open = accessible.len(), "reachability pass done");

            let records = self.identify_all(host, accessible, concurrency).await;
            let mut table = self.state.results.write().await;
            for record in &records {
                table.insert(record.port(), record.clone());
            }
            info!(open = records.len(), stored = table.len(), "scan finished");
            records
        }
        .instrument(span)
        .await;
        drop(guard);
        records
    }

    async fn probe_all(&self, host: &str, ports: &[u16], concurrency: usize) -> Vec<ProbeResult> {
        let total = ports.len();
        let mut processed = 0usize;
        let mut accessible = Vec::new();

        for batch in ports.chunks(concurrency) {
            let mut set = JoinSet::new();
            for &port in batch {
                let probe = self.probe.clone();
                let host = host.to_string();
                set.spawn(async move { probe.probe(&host, port).await });
            }
            while let Some(res) = set.join_next().await {
                match res {
                    Ok(result) if result.accessible => accessible.push(result),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "probe task failed"),
                }
            }
            processed += batch.len();
            self.state.advance(percent(processed, total));
        }
        accessible
    }

    async fn identify_all(
        &self,
        host: &str,
        accessible: Vec<ProbeResult>,
        concurrency: usize,
    ) -> Vec<ScanResultRecord> {
        let mut records = Vec::with_capacity(accessible.len());
        for batch in accessible.chunks(concurrency) {
            let mut set = JoinSet::new();
            for probe_result in batch.iter().cloned() {
                let identifier = self.identifier.clone();
                let target = ScanTarget::new(host, probe_result.port);
                set.spawn(async move {
                    let service = identifier.identify(&target.host, target.port).await;
                    ScanResultRecord::new(&target, probe_result, service)
                });
            }
            while let Some(res) = set.join_next().await {
                match res {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(error = %e, "identification task failed"),
                }
            }
        }
        records.sort_by_key(ScanResultRecord::port);
        records
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as f64 / total as f64) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_and_finishes_at_100() {
        assert_eq!(percent(0, 3), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn progress_never_goes_backwards() {
        let state = SharedProgress::new();
        state.advance(40);
        state.advance(20);
        assert_eq!(state.progress(), 40);
        state.advance(250);
        assert_eq!(state.progress(), 100);
    }
}
