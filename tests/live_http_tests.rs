use std::sync::Arc;
use std::time::Duration;

use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use devport_scan::config::ScanConfig;
use devport_scan::fetch::{HttpFetch, ReqwestFetcher};
use devport_scan::identify::ServiceIdentifier;
use devport_scan::ports::PortCatalog;
use devport_scan::probe::ReachabilityProbe;
use devport_scan::types::{IdentificationError, ProbeErrorKind};

const PAGE: &str = r#"<!doctype html>
<html><head><title>  Shop
  Admin </title></head>
<body><div id="root" data-reactroot=""></div></body></html>"#;

async fn index() -> impl IntoResponse {
    (
        [
            (header::SERVER, "nginx/1.25.3"),
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
        ],
        PAGE,
    )
}

async fn serve_app() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = Router::new().route("/", get(index));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// Accepts connections and greets them with an SSH banner instead of HTTP.
async fn serve_ssh_banner() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let _ = sock.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await;
                let mut buf = [0u8; 1024];
                while matches!(sock.read(&mut buf).await, Ok(n) if n > 0) {}
            });
        }
    });
    port
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn fetcher() -> Arc<dyn HttpFetch> {
    Arc::new(ReqwestFetcher::new(&ScanConfig::default()).unwrap())
}

#[tokio::test]
async fn live_http_app_is_probed_and_identified() {
    let port = serve_app().await;
    let fetcher = fetcher();

    let probe = ReachabilityProbe::new(fetcher.clone(), Duration::from_secs(2));
    let result = probe.probe("127.0.0.1", port).await;
    assert!(result.accessible);
    assert!(result.response_time.is_some());

    let identifier = ServiceIdentifier::new(fetcher, Arc::new(PortCatalog::builtin()), Duration::from_secs(3));
    let info = identifier.identify("127.0.0.1", port).await;
    assert_eq!(info.identification_error, None);
    assert_eq!(info.server_type.as_deref(), Some("nginx"));
    assert_eq!(info.server_version.as_deref(), Some("1.25.3"));
    assert_eq!(info.framework.as_deref(), Some("React"));
    assert_eq!(info.title.as_deref(), Some("Shop Admin"));
    assert_eq!(info.http_status, Some(200));
    assert!(info.verified);
}

#[tokio::test]
async fn closed_port_is_a_network_failure() {
    let port = closed_port().await;
    let probe = ReachabilityProbe::new(fetcher(), Duration::from_secs(2));
    let result = probe.probe("127.0.0.1", port).await;
    assert!(!result.accessible);
    assert_eq!(result.error_kind, Some(ProbeErrorKind::Network));
    assert_eq!(result.response_time, None);
}

#[tokio::test]
async fn non_http_listener_counts_as_reachable_but_unreadable() {
    let port = serve_ssh_banner().await;
    let fetcher = fetcher();

    let probe = ReachabilityProbe::new(fetcher.clone(), Duration::from_secs(2));
    assert!(probe.probe("127.0.0.1", port).await.accessible);

    let identifier = ServiceIdentifier::new(fetcher, Arc::new(PortCatalog::builtin()), Duration::from_secs(3));
    let info = identifier.identify("127.0.0.1", port).await;
    assert_eq!(info.identification_error, Some(IdentificationError::Cors));
    assert!(!info.verified);
}
