use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::types::{Category, KnownPortEntry, ScanMode};

pub const WEB_SERVER_PORTS: &[u16] = &[
    80, 443, 8000, 8008, 8080, 8081, 8082, 8083, 8443, 8888, 9000, 9080, 9090,
];

pub const DEV_SERVER_PORTS: &[u16] = &[
    3000, 3001, 3002, 3003, 3004, 3005, 3006, 3007, 3008, 3009, 4000, 4001, 4002, 4003, 4200,
    4201, 4300, 5000, 5001, 5002, 5003, 5173, 5174, 5175, 6006, 8000, 8001, 8002, 8003, 24678,
];

pub const DATABASE_PORTS: &[u16] = &[3306, 5432, 27017, 6379, 9200, 9300, 5984, 7474, 8529];

pub const MESSAGE_QUEUE_PORTS: &[u16] = &[5672, 15672, 9092, 61616];

pub const MONITORING_PORTS: &[u16] = &[9090, 9091, 3000, 8080, 9000, 9200, 5601, 3001, 8888];

pub const API_GATEWAY_PORTS: &[u16] = &[8080, 8000, 3000, 4000];

pub const STATIC_SITE_PORTS: &[u16] = &[1313, 4000, 8000, 3000];

pub const CONTAINER_PORTS: &[u16] = &[2375, 2376, 8001, 10250, 6443];

/// Inclusive numeric ranges swept in deep mode. A tuning knob, not a contract.
pub const DEFAULT_DEEP_RANGES: &[(u16, u16)] = &[
    (3000, 3099),
    (4000, 4099),
    (5000, 5099),
    (8000, 8099),
    (9000, 9099),
];

const BUILTIN_ENTRIES: &[KnownPortEntry] = &[
    // system / mail
    KnownPortEntry::new(22, "SSH", Category::System, "🔐"),
    KnownPortEntry::new(25, "SMTP", Category::Mail, "📧"),
    KnownPortEntry::new(80, "HTTP Server", Category::Web, "🌐"),
    KnownPortEntry::new(443, "HTTPS Server", Category::Web, "🔒"),
    KnownPortEntry::new(1025, "MailHog SMTP", Category::Mail, "📧").note("MailHog / Mailpit SMTP"),
    KnownPortEntry::new(1080, "MailCatcher", Category::Mail, "📬"),
    KnownPortEntry::new(8025, "MailHog UI", Category::Mail, "📬").note("MailHog / Mailpit web UI"),
    // frontend dev servers
    KnownPortEntry::new(3000, "React / Node.js", Category::Frontend, "⚛️")
        .note("create-react-app, Next.js, Express, Grafana"),
    KnownPortEntry::new(3001, "React Alt", Category::Frontend, "⚛️"),
    KnownPortEntry::new(3002, "Dev Server", Category::Dev, "🛠️"),
    KnownPortEntry::new(3003, "Dev Server", Category::Dev, "🛠️"),
    KnownPortEntry::new(4200, "Angular", Category::Frontend, "🅰️").framework("Angular"),
    KnownPortEntry::new(4201, "Angular Alt", Category::Frontend, "🅰️").framework("Angular"),
    KnownPortEntry::new(4300, "Angular SSR", Category::Frontend, "🅰️").framework("Angular"),
    KnownPortEntry::new(5173, "Vite", Category::Frontend, "⚡").framework("Vite"),
    KnownPortEntry::new(5174, "Vite Alt", Category::Frontend, "⚡").framework("Vite"),
    KnownPortEntry::new(5175, "Vite Alt", Category::Frontend, "⚡").framework("Vite"),
    KnownPortEntry::new(4173, "Vite Preview", Category::Frontend, "⚡").framework("Vite"),
    KnownPortEntry::new(6006, "Storybook", Category::Dev, "📚").framework("Storybook"),
    KnownPortEntry::new(8081, "Metro Bundler", Category::Dev, "📱")
        .note("React Native Metro; also a common HTTP alternate"),
    KnownPortEntry::new(19000, "Expo", Category::Dev, "📱"),
    KnownPortEntry::new(24678, "Vite HMR", Category::Dev, "🔥"),
    // backend
    KnownPortEntry::new(4000, "Jekyll / GraphQL", Category::Static, "💎")
        .note("Jekyll serve, Phoenix, Apollo GraphQL"),
    KnownPortEntry::new(4001, "Dev Server", Category::Dev, "🛠️"),
    KnownPortEntry::new(5000, "Flask / Python", Category::Backend, "🐍").framework("Flask"),
    KnownPortEntry::new(5001, "Flask Alt", Category::Backend, "🐍"),
    KnownPortEntry::new(8000, "Django / Python", Category::Backend, "🐍")
        .note("Django runserver, uvicorn, php -S"),
    KnownPortEntry::new(8001, "Kubernetes Proxy", Category::Container, "☸️")
        .note("kubectl proxy; also Django alternate"),
    KnownPortEntry::new(8008, "HTTP Alt", Category::Web, "🌐"),
    KnownPortEntry::new(8080, "Dev Server", Category::Web, "🌐")
        .note("Tomcat, Spring Boot, webpack-dev-server"),
    KnownPortEntry::new(8082, "HTTP Alt", Category::Web, "🌐"),
    KnownPortEntry::new(8083, "HTTP Alt", Category::Web, "🌐"),
    KnownPortEntry::new(8443, "HTTPS Alt", Category::Web, "🔒"),
    KnownPortEntry::new(8888, "Jupyter", Category::Dev, "📓").framework("Jupyter"),
    KnownPortEntry::new(9000, "PHP / SonarQube", Category::Backend, "🐘")
        .note("php-fpm, SonarQube, Portainer, MinIO"),
    KnownPortEntry::new(9080, "HTTP Alt", Category::Web, "🌐"),
    KnownPortEntry::new(1313, "Hugo", Category::Static, "📝").framework("Hugo"),
    KnownPortEntry::new(4567, "Sinatra", Category::Backend, "💎").framework("Sinatra"),
    KnownPortEntry::new(3333, "Rails Alt", Category::Backend, "💎"),
    KnownPortEntry::new(8787, "RStudio Server", Category::Dev, "📊"),
    // api
    KnownPortEntry::new(8090, "API Server", Category::Api, "🔗"),
    KnownPortEntry::new(9229, "Node Inspector", Category::Dev, "🐞").note("node --inspect"),
    // databases / caches
    KnownPortEntry::new(3306, "MySQL", Category::Database, "🐬"),
    KnownPortEntry::new(5432, "PostgreSQL", Category::Database, "🐘"),
    KnownPortEntry::new(27017, "MongoDB", Category::Database, "🍃"),
    KnownPortEntry::new(6379, "Redis", Category::Cache, "🟥"),
    KnownPortEntry::new(11211, "Memcached", Category::Cache, "🧠"),
    KnownPortEntry::new(9200, "Elasticsearch", Category::Database, "🔍"),
    KnownPortEntry::new(9300, "Elasticsearch Transport", Category::Database, "🔍"),
    KnownPortEntry::new(5984, "CouchDB", Category::Database, "🛋️"),
    KnownPortEntry::new(7474, "Neo4j Browser", Category::Database, "🕸️"),
    KnownPortEntry::new(8529, "ArangoDB", Category::Database, "🥑"),
    KnownPortEntry::new(8086, "InfluxDB", Category::Database, "📈"),
    KnownPortEntry::new(8123, "ClickHouse", Category::Database, "🗄️"),
    KnownPortEntry::new(5050, "pgAdmin", Category::Database, "🐘"),
    KnownPortEntry::new(8978, "CloudBeaver", Category::Database, "🗄️"),
    // queues
    KnownPortEntry::new(5672, "RabbitMQ", Category::Queue, "🐰"),
    KnownPortEntry::new(15672, "RabbitMQ Management", Category::Queue, "🐰"),
    KnownPortEntry::new(9092, "Kafka", Category::Queue, "📨"),
    KnownPortEntry::new(61616, "ActiveMQ", Category::Queue, "📨"),
    KnownPortEntry::new(8161, "ActiveMQ Console", Category::Queue, "📨"),
    KnownPortEntry::new(4222, "NATS", Category::Queue, "📨"),
    // monitoring
    KnownPortEntry::new(9090, "Prometheus", Category::Monitoring, "🔥"),
    KnownPortEntry::new(9091, "Prometheus Pushgateway", Category::Monitoring, "🔥"),
    KnownPortEntry::new(9093, "Alertmanager", Category::Monitoring, "🚨"),
    KnownPortEntry::new(9100, "Node Exporter", Category::Monitoring, "📊"),
    KnownPortEntry::new(5601, "Kibana", Category::Monitoring, "📊"),
    KnownPortEntry::new(16686, "Jaeger UI", Category::Monitoring, "🔎"),
    KnownPortEntry::new(9411, "Zipkin", Category::Monitoring, "🔎"),
    // containers
    KnownPortEntry::new(2375, "Docker API", Category::Container, "🐳"),
    KnownPortEntry::new(2376, "Docker API (TLS)", Category::Container, "🐳"),
    KnownPortEntry::new(6443, "Kubernetes API", Category::Container, "☸️"),
    KnownPortEntry::new(10250, "Kubelet", Category::Container, "☸️"),
    KnownPortEntry::new(9443, "Portainer", Category::Container, "🐳"),
    KnownPortEntry::new(5005, "Docker Registry", Category::Container, "🐳")
        .note("local Docker registry"),
];

/// Immutable port knowledge base plus the candidate port universe for each scan mode.
#[derive(Debug, Clone)]
pub struct PortCatalog {
    entries: BTreeMap<u16, KnownPortEntry>,
    deep_ranges: Vec<(u16, u16)>,
    extra_ports: Vec<u16>,
}

impl Default for PortCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PortCatalog {
    /// Catalog built from the embedded entry table with the default deep ranges.
    pub fn builtin() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::with_builtin_entries()
    }

    /// Exact port match; no range inference.
    pub fn lookup(&self, port: u16) -> Option<&KnownPortEntry> {
        self.entries.get(&port)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &KnownPortEntry> {
        self.entries.values()
    }

    pub fn extra_ports(&self) -> &[u16] {
        &self.extra_ports
    }

    /// Unique candidate ports for `mode`, in ascending order.
    ///
    /// Quick mode covers the curated web, dev-server and database lists; deep mode
    /// adds queues, monitoring, gateways, static sites, containers and the numeric
    /// ranges. User supplied extra ports are included in both.
    pub fn candidate_ports(&self, mode: ScanMode) -> Vec<u16> {
        let mut set: BTreeSet<u16> = BTreeSet::new();
        set.extend(WEB_SERVER_PORTS);
        set.extend(DEV_SERVER_PORTS);
        set.extend(DATABASE_PORTS);
        if mode == ScanMode::Deep {
            set.extend(MESSAGE_QUEUE_PORTS);
            set.extend(MONITORING_PORTS);
            set.extend(API_GATEWAY_PORTS);
            set.extend(STATIC_SITE_PORTS);
            set.extend(CONTAINER_PORTS);
            for &(start, end) in &self.deep_ranges {
                set.extend(start..=end);
            }
        }
        set.extend(&self.extra_ports);
        set.into_iter().collect()
    }
}

/// Assembles a [`PortCatalog`]. A later `insert` for a port replaces the earlier entry.
#[derive(Debug, Clone)]
pub struct CatalogBuilder {
    entries: BTreeMap<u16, KnownPortEntry>,
    deep_ranges: Vec<(u16, u16)>,
    extra_ports: Vec<u16>,
}

impl CatalogBuilder {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
            deep_ranges: DEFAULT_DEEP_RANGES.to_vec(),
            extra_ports: Vec::new(),
        }
    }

    fn with_builtin_entries() -> Self {
        BUILTIN_ENTRIES
            .iter()
            .cloned()
            .fold(Self::empty(), CatalogBuilder::insert)
    }

    pub fn insert(mut self, entry: KnownPortEntry) -> Self {
        if let Some(previous) = self.entries.insert(entry.port, entry) {
            debug!(
                port = previous.port,
                replaced = previous.name,
                "catalog entry replaced by a later registration"
            );
        }
        self
    }

    /// Replace the deep-mode numeric ranges. Inverted ranges are ignored.
    pub fn deep_ranges(mut self, ranges: impl IntoIterator<Item = (u16, u16)>) -> Self {
        self.deep_ranges = ranges.into_iter().filter(|(a, b)| a <= b).collect();
        self
    }

    pub fn extra_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.extra_ports
            .extend(ports.into_iter().filter(|&p| p != 0));
        self
    }

    pub fn build(self) -> PortCatalog {
        let mut extra_ports = self.extra_ports;
        extra_ports.sort_unstable();
        extra_ports.dedup();
        PortCatalog {
            entries: self.entries,
            deep_ranges: self.deep_ranges,
            extra_ports,
        }
    }
}

/// Parse a ports file content into a deduplicated list of TCP ports (1..=65535).
///
/// Supported formats per line:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - comments: everything after `#` is ignored
/// - whitespace and blank lines are ignored
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }

        if let Some((a, b)) = line.split_once('-') {
            let start = parse_port_str(a.trim())
                .with_context(|| format!("line {line_no}: invalid start in range: {a}"))?;
            let end = parse_port_str(b.trim())
                .with_context(|| format!("line {line_no}: invalid end in range: {b}"))?;
            if start > end {
                bail!("line {line_no}: invalid range {start}-{end} (start > end)");
            }
            for p in start..=end {
                if seen.insert(p) {
                    out.push(p);
                }
            }
            continue;
        }

        let p = parse_port_str(line)
            .with_context(|| format!("line {line_no}: invalid port value: {line}"))?;
        if seen.insert(p) {
            out.push(p);
        }
    }

    Ok(out)
}

/// Load a ports list from a file path. Errors if the file cannot be read or parsed.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
