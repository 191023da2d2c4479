#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use devport_scan::config::ScanConfig;
use devport_scan::fetch::{FetchError, FetchRequest, FetchResponse, HttpFetch, Method};
use devport_scan::ports::PortCatalog;
use devport_scan::scanner::Scanner;

/// What a fake port answers to HEAD and GET.
#[derive(Clone)]
pub struct Route {
    pub head: Result<FetchResponse, FetchError>,
    pub get: Result<FetchResponse, FetchError>,
}

impl Route {
    pub fn html(body: &str) -> Self {
        let resp = FetchResponse::new(200, "OK")
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body(body);
        Self {
            head: Ok(FetchResponse::new(200, "OK")),
            get: Ok(resp),
        }
    }

    /// Answers the probe, but the detail request cannot be read.
    pub fn unreadable() -> Self {
        Self {
            head: Err(FetchError::Blocked("opaque response".into())),
            get: Err(FetchError::Blocked("opaque response".into())),
        }
    }

    /// Never answers.
    pub fn silent() -> Self {
        Self {
            head: Err(FetchError::Timeout),
            get: Err(FetchError::Timeout),
        }
    }
}

/// In-memory [`HttpFetch`]: unknown ports refuse the connection.
///
/// Every request takes `latency`; `hang_on` ports never complete, so only the
/// caller's deadline ends them. Tracks the peak number of requests in flight.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<u16, Route>>,
    hang_on: Mutex<Vec<u16>>,
    hang_get_on: Mutex<Vec<u16>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    requests: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    pub fn route(self, port: u16, route: Route) -> Self {
        self.set_route(port, route);
        self
    }

    pub fn hang(self, port: u16) -> Self {
        self.hang_on.lock().unwrap().push(port);
        self
    }

    /// HEAD answers per the route; GET never completes.
    pub fn hang_get(self, port: u16) -> Self {
        self.hang_get_on.lock().unwrap().push(port);
        self
    }

    pub fn set_route(&self, port: u16, route: Route) {
        self.routes.lock().unwrap().insert(port, route);
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

fn port_of(url: &str) -> u16 {
    url.trim_start_matches("http://")
        .trim_end_matches('/')
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .expect("test URLs carry a port")
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HttpFetch for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let port = port_of(&request.url);
        let hangs = self.hang_on.lock().unwrap().contains(&port)
            || (request.method == Method::Get && self.hang_get_on.lock().unwrap().contains(&port));
        if hangs {
            std::future::pending::<()>().await;
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let route = self.routes.lock().unwrap().get(&port).cloned();
        match (route, request.method) {
            (Some(r), Method::Head) => r.head,
            (Some(r), Method::Get) => r.get,
            (None, _) => Err(FetchError::Connect("connection refused".into())),
        }
    }
}

pub fn scanner_with(fetcher: Arc<ScriptedFetcher>, catalog: PortCatalog) -> Scanner {
    Scanner::new(fetcher, Arc::new(catalog), ScanConfig::default())
}
