use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use devport_scan::config::ScanConfig;
use devport_scan::logging::{self, LogConfig, LogFormat};
use devport_scan::ports::{self, PortCatalog};
use devport_scan::scanner::Scanner;
use devport_scan::server;
use devport_scan::types::{ScanMode, ScanResultRecord};

/// devport-scan: find local dev servers and guess what they are.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "devport-scan",
    version,
    about = "Find web dev servers on localhost and fingerprint them over HTTP.",
    long_about = None
)]
struct Cli {
    /// Host to scan.
    #[arg(long, default_value = server::DEFAULT_HOST)]
    host: String,

    /// Deep scan: add queue/monitoring/container ports and the numeric dev ranges.
    #[arg(long, default_value_t = false)]
    deep: bool,

    /// Probes in flight per batch.
    #[arg(long, default_value_t = devport_scan::config::DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Reachability probe timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 2000)]
    timeout_ms: u64,

    /// Identification request timeout in milliseconds.
    #[arg(long = "identify-timeout-ms", default_value_t = 3000)]
    identify_timeout_ms: u64,

    /// Extra ports file (one port or range per line) merged into the candidate list.
    #[arg(long)]
    ports: Option<PathBuf>,

    /// Write results as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Serve the JSON API on this address instead of running a one-shot scan.
    #[arg(long)]
    serve: Option<String>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    /// Log format: pretty, compact or json.
    #[arg(long = "log-format", default_value = "compact")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&LogConfig {
        level: cli.log_level.clone(),
        format: cli.log_format,
    });

    let config = ScanConfig {
        probe_timeout: Duration::from_millis(cli.timeout_ms),
        identify_timeout: Duration::from_millis(cli.identify_timeout_ms),
        concurrency: cli.concurrency,
        ..ScanConfig::default()
    };
    config.validate()?;

    let mut builder = PortCatalog::builder();
    if let Some(path) = cli.ports.as_deref() {
        let extra = ports::load_ports_from_path(path)?;
        info!(count = extra.len(), file = %path.display(), "loaded extra ports");
        builder = builder.extra_ports(extra);
    }
    let catalog = Arc::new(builder.build());
    let scanner = Scanner::with_reqwest(catalog, config).context("failed to build HTTP client")?;

    if let Some(bind) = cli.serve.as_deref() {
        let shutdown = CancellationToken::new();
        let on_ctrl_c = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            on_ctrl_c.cancel();
        });
        return server::spawn_server(bind, scanner, shutdown).await;
    }

    let mode = if cli.deep { ScanMode::Deep } else { ScanMode::Quick };
    let total = scanner.catalog().candidate_ports(mode).len();
    println!(
        "Scanning {} ({} mode, {} ports, concurrency {})...",
        cli.host, mode, total, cli.concurrency
    );
    let results = scanner.scan(&cli.host, mode, cli.concurrency).await?;
    print_results_table(&results);

    if let Some(path) = cli.output.as_deref() {
        if let Err(e) = write_results_json(path, &results) {
            warn!(error = %e, "failed to write JSON results");
            eprintln!("Failed to write JSON to {}: {}", path.display(), e);
        } else {
            println!("Wrote JSON results to {}", path.display());
        }
    }
    Ok(())
}

fn print_results_table(results: &[ScanResultRecord]) {
    let port_w = 5usize;
    let lat_w = "latency_ms".len();
    let mut name_w = "service".len();
    let mut fw_w = "framework".len();
    for r in results {
        name_w = name_w.max(r.service.name.chars().count().min(40));
        fw_w = fw_w.max(r.service.framework.as_deref().unwrap_or("-").len());
    }

    println!("\nOpen ports: {}", results.len());
    println!(
        "{:>port_w$}  {:<name_w$}  {:<10}  {:<fw_w$}  {:>lat_w$}  {:<8}  note",
        "port", "service", "category", "framework", "latency_ms", "verified",
    );
    println!(
        "{:-<port_w$}  {:-<name_w$}  {:-<10}  {:-<fw_w$}  {:-<lat_w$}  {:-<8}  {:-<4}",
        "", "", "", "", "", "", "",
    );
    for r in results {
        let name: String = r.service.name.chars().take(40).collect();
        let note = match (&r.service.identification_error, &r.service.title) {
            (Some(err), _) => format!("identification failed: {:?}", err).to_lowercase(),
            (None, Some(title)) => title.chars().take(50).collect(),
            (None, None) => r.service.server.clone().unwrap_or_default(),
        };
        println!(
            "{:>port_w$}  {:<name_w$}  {:<10}  {:<fw_w$}  {:>lat_w$}  {:<8}  {}",
            r.port(),
            name,
            r.service.category.as_str(),
            r.service.framework.as_deref().unwrap_or("-"),
            r.probe
                .response_time
                .map(|ms| ms.to_string())
                .unwrap_or_else(|| "-".into()),
            if r.service.verified { "yes" } else { "no" },
            note,
        );
    }
}

fn write_results_json(path: &std::path::Path, results: &[ScanResultRecord]) -> anyhow::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, results)?;
    Ok(())
}
