use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ::time::{format_description::well_known, OffsetDateTime};

/// Coarse service category attached to catalog entries and identified services.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Web,
    Frontend,
    Backend,
    Database,
    Queue,
    Monitoring,
    Container,
    Mail,
    Cache,
    Dev,
    Static,
    System,
    Api,
    #[default]
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Web => "web",
            Category::Frontend => "frontend",
            Category::Backend => "backend",
            Category::Database => "database",
            Category::Queue => "queue",
            Category::Monitoring => "monitoring",
            Category::Container => "container",
            Category::Mail => "mail",
            Category::Cache => "cache",
            Category::Dev => "dev",
            Category::Static => "static",
            Category::System => "system",
            Category::Api => "api",
            Category::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static a-priori knowledge about the service conventionally found on a port.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KnownPortEntry {
    pub port: u16,
    pub name: &'static str,
    pub category: Category,
    pub icon: &'static str,
    pub framework: Option<&'static str>,
    pub verified_by_default: bool,
    pub note: Option<&'static str>,
}

impl KnownPortEntry {
    pub const fn new(port: u16, name: &'static str, category: Category, icon: &'static str) -> Self {
        Self {
            port,
            name,
            category,
            icon,
            framework: None,
            verified_by_default: false,
            note: None,
        }
    }

    pub const fn framework(mut self, framework: &'static str) -> Self {
        self.framework = Some(framework);
        self
    }

    pub const fn note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    pub const fn verified(mut self) -> Self {
        self.verified_by_default = true;
        self
    }
}

/// Which candidate port universe to scan.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[default]
    Quick,
    Deep,
}

impl FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(ScanMode::Quick),
            "deep" => Ok(ScanMode::Deep),
            other => Err(format!("unknown scan mode: {other}")),
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Quick => f.write_str("quick"),
            ScanMode::Deep => f.write_str("deep"),
        }
    }
}

/// A single host:port pair to probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanTarget {
    pub host: String,
    pub port: u16,
}

impl ScanTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base URL of the target, e.g. `http://localhost:3000`.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Why a reachability probe failed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeErrorKind {
    Timeout,
    Network,
    Unknown,
}

/// Outcome of one reachability probe.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub port: u16,
    pub accessible: bool,
    /// Milliseconds from request start to response; only set when accessible.
    pub response_time: Option<u64>,
    pub error_kind: Option<ProbeErrorKind>,
}

impl ProbeResult {
    pub fn reachable(port: u16, response_time: u64) -> Self {
        Self {
            port,
            accessible: true,
            response_time: Some(response_time),
            error_kind: None,
        }
    }

    pub fn unreachable(port: u16, kind: ProbeErrorKind) -> Self {
        Self {
            port,
            accessible: false,
            response_time: None,
            error_kind: Some(kind),
        }
    }
}

/// Best-effort classification of a failed identification request.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IdentificationError {
    /// Something answered but the response could not be read.
    Cors,
    Network,
    Timeout,
    Unknown,
}

/// Name used for ports the catalog knows nothing about.
pub const UNKNOWN_SERVICE_NAME: &str = "Unknown Service";
pub const UNKNOWN_SERVICE_ICON: &str = "🔌";

/// What is known about the service answering on a port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub name: String,
    pub category: Category,
    pub icon: String,
    pub framework: Option<String>,
    pub title: Option<String>,
    pub server: Option<String>,
    pub server_type: Option<String>,
    pub server_version: Option<String>,
    pub powered_by: Option<String>,
    pub content_type: Option<String>,
    pub runtime: Option<String>,
    pub app_version: Option<String>,
    pub via: Option<String>,
    pub x_framework: Option<String>,
    pub generated_by: Option<String>,
    pub has_request_id: bool,
    pub identification_error: Option<IdentificationError>,
    pub error_message: Option<String>,
    pub http_status: Option<u16>,
    pub http_status_text: Option<String>,
    pub verified: bool,
}

impl ServiceInfo {
    /// Seed for a port, from its catalog entry when there is one.
    pub fn seeded(entry: Option<&KnownPortEntry>) -> Self {
        match entry {
            Some(e) => Self {
                name: e.name.to_string(),
                category: e.category,
                icon: e.icon.to_string(),
                framework: e.framework.map(str::to_string),
                verified: e.verified_by_default,
                ..Self::unknown()
            },
            None => Self::unknown(),
        }
    }

    fn unknown() -> Self {
        Self {
            name: UNKNOWN_SERVICE_NAME.to_string(),
            category: Category::Unknown,
            icon: UNKNOWN_SERVICE_ICON.to_string(),
            framework: None,
            title: None,
            server: None,
            server_type: None,
            server_version: None,
            powered_by: None,
            content_type: None,
            runtime: None,
            app_version: None,
            via: None,
            x_framework: None,
            generated_by: None,
            has_request_id: false,
            identification_error: None,
            error_message: None,
            http_status: None,
            http_status_text: None,
            verified: false,
        }
    }

    pub fn is_placeholder_name(&self) -> bool {
        self.name == UNKNOWN_SERVICE_NAME
    }

    /// Return a copy with every field the patch sets replaced.
    pub fn apply(&self, patch: &ServicePatch) -> Self {
        let mut next = self.clone();
        if let Some(name) = &patch.name {
            next.name = name.clone();
        }
        if let Some(category) = patch.category {
            next.category = category;
        }
        if let Some(icon) = &patch.icon {
            next.icon = icon.clone();
        }
        if let Some(framework) = &patch.framework {
            next.framework = Some(framework.clone());
        }
        if let Some(server_type) = &patch.server_type {
            next.server_type = Some(server_type.clone());
        }
        if let Some(version) = &patch.server_version {
            next.server_version = Some(version.clone());
        }
        if let Some(title) = &patch.title {
            next.title = Some(title.clone());
        }
        if let Some(verified) = patch.verified {
            next.verified = verified;
        }
        next
    }
}

/// A partial update to a [`ServiceInfo`]; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServicePatch {
    pub name: Option<String>,
    pub category: Option<Category>,
    pub icon: Option<String>,
    pub framework: Option<String>,
    pub server_type: Option<String>,
    pub server_version: Option<String>,
    pub title: Option<String>,
    pub verified: Option<bool>,
}

/// One stored scan finding: probe outcome, identification and location.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanResultRecord {
    #[serde(flatten)]
    pub probe: ProbeResult,
    #[serde(flatten)]
    pub service: ServiceInfo,
    pub host: String,
    pub last_seen: String,
    pub url: String,
}

impl ScanResultRecord {
    pub fn new(target: &ScanTarget, probe: ProbeResult, service: ServiceInfo) -> Self {
        Self {
            probe,
            service,
            host: target.host.clone(),
            last_seen: now_rfc3339(),
            url: target.url(),
        }
    }

    pub fn port(&self) -> u16 {
        self.probe.port
    }
}

/// Snapshot of the scanner state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    pub is_scanning: bool,
    pub progress: u8,
    pub result_count: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Error,
    Down,
}

/// Result of a single health check against a known app URL.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: Health,
    pub response_time: Option<u64>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

pub(crate) fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_from_catalog_entry() {
        let entry = KnownPortEntry::new(5432, "PostgreSQL", Category::Database, "🐘");
        let info = ServiceInfo::seeded(Some(&entry));
        assert_eq!(info.name, "PostgreSQL");
        assert_eq!(info.category, Category::Database);
        assert!(!info.verified);
    }

    #[test]
    fn seeded_verified_by_default() {
        let entry = KnownPortEntry::new(1, "x", Category::System, "*").verified();
        assert!(ServiceInfo::seeded(Some(&entry)).verified);
    }

    #[test]
    fn unknown_port_gets_placeholder() {
        let info = ServiceInfo::seeded(None);
        assert!(info.is_placeholder_name());
        assert_eq!(info.category, Category::Unknown);
    }

    #[test]
    fn apply_leaves_base_untouched() {
        let base = ServiceInfo::seeded(None);
        let patch = ServicePatch {
            framework: Some("React".into()),
            category: Some(Category::Frontend),
            ..Default::default()
        };
        let next = base.apply(&patch);
        assert_eq!(next.framework.as_deref(), Some("React"));
        assert_eq!(next.category, Category::Frontend);
        assert_eq!(next.name, UNKNOWN_SERVICE_NAME);
        assert_eq!(base.framework, None);
    }

    #[test]
    fn record_serializes_flat_camel_case() {
        let target = ScanTarget::new("localhost", 3000);
        let rec = ScanResultRecord::new(
            &target,
            ProbeResult::reachable(3000, 4),
            ServiceInfo::seeded(None),
        );
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["port"], 3000);
        assert_eq!(v["accessible"], true);
        assert_eq!(v["responseTime"], 4);
        assert_eq!(v["url"], "http://localhost:3000");
        assert_eq!(v["category"], "unknown");
        assert!(v.get("lastSeen").is_some());
    }

    #[test]
    fn scan_mode_parses() {
        assert_eq!("Deep".parse::<ScanMode>().unwrap(), ScanMode::Deep);
        assert!("full".parse::<ScanMode>().is_err());
    }
}
