use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::debug;

use crate::fetch::{FetchError, FetchRequest, FetchResponse, HttpFetch};
use crate::ports::PortCatalog;
use crate::signatures::SignatureSet;
use crate::types::{Category, IdentificationError, ScanTarget, ServiceInfo, ServicePatch};

/// Refines the catalog's guess for a reachable port from a live `GET /`.
///
/// Never fails: errors are recorded on the returned [`ServiceInfo`] and the
/// catalog-seeded fields are kept as they were.
#[derive(Clone)]
pub struct ServiceIdentifier {
    fetcher: Arc<dyn HttpFetch>,
    catalog: Arc<PortCatalog>,
    signatures: Arc<SignatureSet>,
    timeout: Duration,
}

impl ServiceIdentifier {
    pub fn new(fetcher: Arc<dyn HttpFetch>, catalog: Arc<PortCatalog>, timeout: Duration) -> Self {
        Self {
            fetcher,
            catalog,
            signatures: Arc::new(SignatureSet::builtin()),
            timeout,
        }
    }

    pub async fn identify(&self, host: &str, port: u16) -> ServiceInfo {
        let seed = ServiceInfo::seeded(self.catalog.lookup(port));
        let target = ScanTarget::new(host, port);
        let request = FetchRequest::get(format!("{}/", target.url()), self.timeout);

        match time::timeout(self.timeout, self.fetcher.fetch(&request)).await {
            Ok(Ok(resp)) => {
                let info = refine(&self.signatures, &seed, &resp);
                debug!(
                    port,
                    name = %info.name,
                    framework = info.framework.as_deref().unwrap_or("-"),
                    verified = info.verified,
                    "service identified"
                );
                info
            }
            Ok(Err(e)) => {
                debug!(port, error = %e, "identification failed");
                failed(seed, classify_error(&e), e.to_string())
            }
            Err(_) => {
                debug!(port, "identification timed out");
                failed(
                    seed,
                    IdentificationError::Timeout,
                    format!("no response within {} ms", self.timeout.as_millis()),
                )
            }
        }
    }
}

/// Apply every signature rule that fires for `resp` on top of `seed`.
///
/// Each step is a `(predicate, patch)` pair; the fold produces a fresh
/// [`ServiceInfo`] per applied patch, so the last patch to set a field wins.
pub fn refine(signatures: &SignatureSet, seed: &ServiceInfo, resp: &FetchResponse) -> ServiceInfo {
    let mut patches: Vec<ServicePatch> = Vec::new();

    if let Some(server) = resp.header("server") {
        patches.extend(signatures.server_patches(server).into_iter().map(|(_, p)| p));
    }
    if let Some(powered_by) = resp.header("x-powered-by") {
        patches.extend(signatures.powered_by_patch(powered_by));
    }

    let base = with_response_metadata(seed, resp);
    let mut info = patches.iter().fold(base, |acc, p| acc.apply(p));

    match resp.body.as_deref() {
        Some(body) if resp.is_html() => {
            info = signatures
                .body_patches(body)
                .iter()
                .fold(info, |acc, p| acc.apply(p));
            if let Some(title) = signatures.extract_title(body) {
                let rename = info.framework.is_none() && info.is_placeholder_name();
                info = info.apply(&ServicePatch {
                    name: rename.then(|| title.clone()),
                    title: Some(title),
                    ..Default::default()
                });
            }
            info = info.apply(&verified_patch());
        }
        Some(body) if resp.is_json() => {
            if info.framework.is_none() {
                info = info.apply(&ServicePatch {
                    name: Some("JSON API".to_string()),
                    category: Some(Category::Api),
                    icon: Some("🔗".to_string()),
                    ..Default::default()
                });
            }
            if serde_json::from_str::<serde_json::Value>(body).is_ok() {
                info = info.apply(&verified_patch());
            } else {
                debug!("JSON content type with an unparsable body");
            }
        }
        _ => {}
    }
    info
}

fn verified_patch() -> ServicePatch {
    ServicePatch {
        verified: Some(true),
        ..Default::default()
    }
}

/// Status line plus the auxiliary headers stored verbatim.
fn with_response_metadata(seed: &ServiceInfo, resp: &FetchResponse) -> ServiceInfo {
    let header = |name: &str| resp.header(name).map(str::to_string);
    ServiceInfo {
        http_status: Some(resp.status),
        http_status_text: Some(resp.status_text.clone()),
        server: header("server"),
        powered_by: header("x-powered-by"),
        via: header("via"),
        content_type: header("content-type"),
        x_framework: header("x-framework"),
        generated_by: header("x-generated-by"),
        runtime: header("x-runtime"),
        has_request_id: resp.header("x-request-id").is_some(),
        app_version: header("x-version").or_else(|| header("x-app-version")),
        ..seed.clone()
    }
}

fn failed(seed: ServiceInfo, kind: IdentificationError, message: String) -> ServiceInfo {
    ServiceInfo {
        identification_error: Some(kind),
        error_message: Some(message),
        ..seed
    }
}

/// Map a fetch failure onto the coarse identification error taxonomy.
pub fn classify_error(err: &FetchError) -> IdentificationError {
    match err {
        FetchError::Timeout => IdentificationError::Timeout,
        FetchError::Connect(_) => IdentificationError::Network,
        FetchError::Blocked(_) => IdentificationError::Cors,
        FetchError::Other(msg) => classify_message(msg),
    }
}

fn classify_message(msg: &str) -> IdentificationError {
    let m = msg.to_ascii_lowercase();
    if m.contains("cors") || m.contains("cross-origin") || m.contains("opaque") {
        IdentificationError::Cors
    } else if m.contains("timed out") || m.contains("timeout") || m.contains("abort") {
        IdentificationError::Timeout
    } else if m.contains("network") || m.contains("connect") || m.contains("dns") {
        IdentificationError::Network
    } else {
        IdentificationError::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KnownPortEntry, UNKNOWN_SERVICE_NAME};

    fn sigs() -> SignatureSet {
        SignatureSet::builtin()
    }

    fn html(body: &str) -> FetchResponse {
        FetchResponse::new(200, "OK")
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_body(body)
    }

    fn react_seed() -> ServiceInfo {
        let entry = KnownPortEntry::new(3000, "React / Node.js", Category::Frontend, "⚛️");
        ServiceInfo::seeded(Some(&entry))
    }

    #[test]
    fn react_marker_sets_framework_and_verifies() {
        let info = refine(&sigs(), &react_seed(), &html(r#"<div data-reactroot=""></div>"#));
        assert_eq!(info.framework.as_deref(), Some("React"));
        assert_eq!(info.category, Category::Frontend);
        assert!(info.verified);
        assert_eq!(info.http_status, Some(200));
    }

    #[test]
    fn later_body_rule_wins() {
        let body = r#"<html><head><script type="module" src="/@vite/client"></script></head>
                      <body><div data-reactroot></div></body></html>"#;
        let info = refine(&sigs(), &react_seed(), &html(body));
        assert_eq!(info.framework.as_deref(), Some("Vite"));
        assert_eq!(info.name, "Vite Dev Server");
    }

    #[test]
    fn title_becomes_name_for_unknown_ports() {
        let seed = ServiceInfo::seeded(None);
        let info = refine(&sigs(), &seed, &html("<title>Admin Console</title>"));
        assert_eq!(info.title.as_deref(), Some("Admin Console"));
        assert_eq!(info.name, "Admin Console");
    }

    #[test]
    fn title_does_not_replace_catalog_name() {
        let info = refine(&sigs(), &react_seed(), &html("<title>Hello</title>"));
        assert_eq!(info.title.as_deref(), Some("Hello"));
        assert_eq!(info.name, "React / Node.js");
    }

    #[test]
    fn server_header_cascade_and_aux_headers() {
        let resp = FetchResponse::new(404, "Not Found")
            .with_header("Server", "nginx/1.25.3")
            .with_header("Via", "1.1 varnish")
            .with_header("X-Request-Id", "abc")
            .with_header("X-App-Version", "2.3.0")
            .with_header("X-Runtime", "0.012");
        let info = refine(&sigs(), &ServiceInfo::seeded(None), &resp);
        assert_eq!(info.name, "nginx");
        assert_eq!(info.server_type.as_deref(), Some("nginx"));
        assert_eq!(info.server_version.as_deref(), Some("1.25.3"));
        assert_eq!(info.server.as_deref(), Some("nginx/1.25.3"));
        assert_eq!(info.via.as_deref(), Some("1.1 varnish"));
        assert_eq!(info.app_version.as_deref(), Some("2.3.0"));
        assert_eq!(info.runtime.as_deref(), Some("0.012"));
        assert!(info.has_request_id);
        assert_eq!(info.http_status_text.as_deref(), Some("Not Found"));
        // no body was inspected
        assert!(!info.verified);
    }

    #[test]
    fn gunicorn_backend_keeps_python_identity() {
        let resp = FetchResponse::new(200, "OK").with_header("Server", "gunicorn/21.2.0");
        let info = refine(&sigs(), &ServiceInfo::seeded(None), &resp);
        assert_eq!(info.name, "Gunicorn");
        assert_eq!(info.server_type.as_deref(), Some("gunicorn"));
    }

    #[test]
    fn react_page_with_loading_class_stays_react() {
        let body = r#"<div id="root" data-reactroot=""></div><div class="loading-app"></div>"#;
        let info = refine(&sigs(), &react_seed(), &html(body));
        assert_eq!(info.framework.as_deref(), Some("React"));
    }

    #[test]
    fn powered_by_overrides_server() {
        let resp = FetchResponse::new(200, "OK")
            .with_header("Server", "nginx")
            .with_header("X-Powered-By", "Express");
        let info = refine(&sigs(), &ServiceInfo::seeded(None), &resp);
        assert_eq!(info.name, "Express");
        assert_eq!(info.framework.as_deref(), Some("Express"));
        assert_eq!(info.powered_by.as_deref(), Some("Express"));
        assert_eq!(info.server_version, None);
    }

    #[test]
    fn json_api_classification() {
        let resp = FetchResponse::new(200, "OK")
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"ok"}"#);
        let info = refine(&sigs(), &ServiceInfo::seeded(None), &resp);
        assert_eq!(info.name, "JSON API");
        assert_eq!(info.category, Category::Api);
        assert!(info.verified);
    }

    #[test]
    fn json_keeps_known_framework() {
        let resp = FetchResponse::new(200, "OK")
            .with_header("content-type", "application/json")
            .with_header("x-powered-by", "Express")
            .with_body("{}");
        let info = refine(&sigs(), &ServiceInfo::seeded(None), &resp);
        assert_eq!(info.name, "Express");
        assert_eq!(info.category, Category::Backend);
    }

    #[test]
    fn malformed_json_is_not_verified() {
        let resp = FetchResponse::new(200, "OK")
            .with_header("content-type", "application/json")
            .with_body("{oops");
        let info = refine(&sigs(), &ServiceInfo::seeded(None), &resp);
        assert_eq!(info.category, Category::Api);
        assert!(!info.verified);
    }

    #[test]
    fn failure_keeps_seed() {
        let seed = ServiceInfo::seeded(None);
        let info = failed(seed.clone(), IdentificationError::Cors, "blocked".into());
        assert_eq!(info.name, UNKNOWN_SERVICE_NAME);
        assert_eq!(info.identification_error, Some(IdentificationError::Cors));
        assert_eq!(info.verified, seed.verified);
    }

    #[test]
    fn error_classification() {
        assert_eq!(classify_error(&FetchError::Timeout), IdentificationError::Timeout);
        assert_eq!(
            classify_error(&FetchError::Connect("refused".into())),
            IdentificationError::Network
        );
        assert_eq!(
            classify_error(&FetchError::Blocked("bad response".into())),
            IdentificationError::Cors
        );
        assert_eq!(
            classify_error(&FetchError::Other("Failed to fetch: CORS policy".into())),
            IdentificationError::Cors
        );
        assert_eq!(
            classify_error(&FetchError::Other("operation timed out".into())),
            IdentificationError::Timeout
        );
        assert_eq!(
            classify_error(&FetchError::Other("weird".into())),
            IdentificationError::Unknown
        );
    }
}
