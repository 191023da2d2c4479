//! Header and body signature tables used to fingerprint HTTP services.
//!
//! Header signatures are grouped; within a group the first matching signature
//! wins, and every group is consulted in order. Body signatures are not
//! exclusive: all matching ones apply in table order, so later ones win.

use regex::{Regex, RegexBuilder};

use crate::types::{Category, ServicePatch};

/// Static description of a header signature.
#[derive(Debug, Clone, Copy)]
struct HeaderRule {
    /// Case-insensitive regex; capture group 1, when present, is the version.
    pattern: &'static str,
    name: &'static str,
    category: Category,
    icon: &'static str,
    framework: Option<&'static str>,
    server_type: &'static str,
}

const fn rule(
    pattern: &'static str,
    name: &'static str,
    category: Category,
    icon: &'static str,
    server_type: &'static str,
) -> HeaderRule {
    HeaderRule {
        pattern,
        name,
        category,
        icon,
        framework: None,
        server_type,
    }
}

const fn framework_rule(
    pattern: &'static str,
    name: &'static str,
    category: Category,
    icon: &'static str,
    server_type: &'static str,
    framework: &'static str,
) -> HeaderRule {
    HeaderRule {
        pattern,
        name,
        category,
        icon,
        framework: Some(framework),
        server_type,
    }
}

const WEB_SERVER_RULES: &[HeaderRule] = &[
    rule(r"\bopenresty(?:/([\d.]+))?", "OpenResty", Category::Web, "🟩", "openresty"),
    rule(r"\bnginx(?:/([\d.]+))?", "nginx", Category::Web, "🟩", "nginx"),
    rule(r"^apache(?:/([\d.]+))?(?:\s|$)", "Apache", Category::Web, "🪶", "apache"),
    rule(r"\bcaddy(?:/([\d.]+))?", "Caddy", Category::Web, "🔐", "caddy"),
    rule(r"\btraefik(?:/([\d.]+))?", "Traefik", Category::Web, "🚦", "traefik"),
    rule(r"\benvoy", "Envoy", Category::Web, "🛰️", "envoy"),
    rule(r"\bmicrosoft-iis(?:/([\d.]+))?", "IIS", Category::Web, "🪟", "iis"),
    rule(r"\blighttpd(?:/([\d.]+))?", "lighttpd", Category::Web, "🪶", "lighttpd"),
    rule(r"\blitespeed", "LiteSpeed", Category::Web, "⚡", "litespeed"),
    rule(r"\bh2o(?:/([\d.]+))?", "H2O", Category::Web, "💧", "h2o"),
];

const NODE_RULES: &[HeaderRule] = &[
    rule(r"^deno(?:/([\d.]+))?", "Deno", Category::Backend, "🦕", "deno"),
    rule(r"^bun(?:/([\d.]+))?", "Bun", Category::Backend, "🥟", "bun"),
    framework_rule(r"^express", "Express", Category::Backend, "🟢", "node", "Express"),
    rule(r"^node(?:\.js)?(?:/v?([\d.]+))?", "Node.js", Category::Backend, "🟢", "node"),
];

const PYTHON_RULES: &[HeaderRule] = &[
    framework_rule(r"\bwerkzeug(?:/([\d.]+))?", "Flask", Category::Backend, "🐍", "werkzeug", "Flask"),
    framework_rule(r"\bwsgiserver(?:/([\d.]+))?", "Django", Category::Backend, "🐍", "wsgiserver", "Django"),
    rule(r"\bgunicorn(?:/([\d.]+))?", "Gunicorn", Category::Backend, "🐍", "gunicorn"),
    rule(r"\buvicorn", "Uvicorn", Category::Backend, "🐍", "uvicorn"),
    rule(r"\bhypercorn", "Hypercorn", Category::Backend, "🐍", "hypercorn"),
    rule(r"\bdaphne", "Daphne", Category::Backend, "🐍", "daphne"),
    rule(r"\bwaitress", "Waitress", Category::Backend, "🐍", "waitress"),
    framework_rule(r"\btornadoserver(?:/([\d.]+))?", "Tornado", Category::Backend, "🐍", "tornado", "Tornado"),
    rule(r"\bsimplehttp(?:/([\d.]+))?", "Python HTTP Server", Category::Static, "🐍", "simplehttp"),
];

const RUBY_RULES: &[HeaderRule] = &[
    rule(r"^puma(?:\s+([\d.]+))?", "Puma", Category::Backend, "💎", "puma"),
    rule(r"^thin(?:\s+([\d.]+))?", "Thin", Category::Backend, "💎", "thin"),
    rule(r"\bwebrick(?:/([\d.]+))?", "WEBrick", Category::Backend, "💎", "webrick"),
    rule(r"\bpassenger(?:/([\d.]+))?", "Passenger", Category::Backend, "💎", "passenger"),
    rule(r"\bunicorn", "Unicorn", Category::Backend, "💎", "unicorn"),
];

const JVM_RULES: &[HeaderRule] = &[
    framework_rule(r"\bapache-coyote(?:/([\d.]+))?", "Tomcat", Category::Backend, "🐱", "tomcat", "Tomcat"),
    rule(r"\bjetty(?:\((\d+(?:\.\d+)*)[^)]*\))?", "Jetty", Category::Backend, "☕", "jetty"),
    rule(r"\bnetty", "Netty", Category::Backend, "☕", "netty"),
    rule(r"\bundertow(?:/([\d.]+))?", "Undertow", Category::Backend, "☕", "undertow"),
    rule(r"\bglassfish", "GlassFish", Category::Backend, "☕", "glassfish"),
];

const DOTNET_RULES: &[HeaderRule] = &[
    framework_rule(r"\bkestrel", "Kestrel", Category::Backend, "🟣", "kestrel", "ASP.NET Core"),
    rule(r"\bmicrosoft-httpapi(?:/([\d.]+))?", "HTTP.sys", Category::Backend, "🟣", "httpsys"),
];

const GO_RULES: &[HeaderRule] = &[
    rule(r"\bfasthttp", "fasthttp", Category::Backend, "🐹", "fasthttp"),
    rule(r"\bminio", "MinIO", Category::Database, "🪣", "minio"),
];

const RUST_RULES: &[HeaderRule] = &[
    framework_rule(r"\bactix-web(?:/([\d.]+))?", "Actix Web", Category::Backend, "🦀", "actix", "Actix"),
    framework_rule(r"^rocket", "Rocket", Category::Backend, "🦀", "rocket", "Rocket"),
    framework_rule(r"^warp", "Warp", Category::Backend, "🦀", "warp", "Warp"),
];

const PHP_RULES: &[HeaderRule] = &[
    rule(r"\bphp(?:/([\d.]+))?", "PHP", Category::Backend, "🐘", "php"),
];

const CDN_RULES: &[HeaderRule] = &[
    rule(r"\bcloudflare", "Cloudflare", Category::Web, "☁️", "cloudflare"),
    rule(r"\bcloudfront", "CloudFront", Category::Web, "☁️", "cloudfront"),
    rule(r"\bvercel", "Vercel", Category::Web, "▲", "vercel"),
    rule(r"\bnetlify", "Netlify", Category::Web, "☁️", "netlify"),
    rule(r"\bamazons3", "Amazon S3", Category::Static, "🪣", "s3"),
    rule(r"\bakamai", "Akamai", Category::Web, "☁️", "akamai"),
];

const SERVER_GROUPS: &[(&str, &[HeaderRule])] = &[
    ("web", WEB_SERVER_RULES),
    ("node", NODE_RULES),
    ("python", PYTHON_RULES),
    ("ruby", RUBY_RULES),
    ("jvm", JVM_RULES),
    ("dotnet", DOTNET_RULES),
    ("go", GO_RULES),
    ("rust", RUST_RULES),
    ("php", PHP_RULES),
    ("cdn", CDN_RULES),
];

const POWERED_BY_RULES: &[HeaderRule] = &[
    framework_rule(r"\bexpress", "Express", Category::Backend, "🟢", "node", "Express"),
    rule(r"\bphp(?:/([\d.]+))?", "PHP", Category::Backend, "🐘", "php"),
    framework_rule(r"\basp\.net", "ASP.NET", Category::Backend, "🟣", "aspnet", "ASP.NET"),
    framework_rule(r"\bnext\.js(?:\s+([\d.]+))?", "Next.js", Category::Frontend, "▲", "node", "Next.js"),
];

/// Static description of a body signature. Needles are lowercase substrings.
#[derive(Debug, Clone, Copy)]
struct BodyRule {
    needles: &'static [&'static str],
    name: &'static str,
    category: Category,
    icon: &'static str,
    framework: &'static str,
}

const BODY_RULES: &[BodyRule] = &[
    BodyRule {
        needles: &["data-reactroot", "data-reactid", "__react_devtools_global_hook__", "_reactrootcontainer"],
        name: "React App",
        category: Category::Frontend,
        icon: "⚛️",
        framework: "React",
    },
    BodyRule {
        needles: &["__next_data__", "/_next/static"],
        name: "Next.js App",
        category: Category::Frontend,
        icon: "▲",
        framework: "Next.js",
    },
    BodyRule {
        needles: &["data-v-app", "__vue__", "data-server-rendered"],
        name: "Vue App",
        category: Category::Frontend,
        icon: "💚",
        framework: "Vue",
    },
    BodyRule {
        needles: &["__nuxt__", "/_nuxt/"],
        name: "Nuxt App",
        category: Category::Frontend,
        icon: "💚",
        framework: "Nuxt",
    },
    BodyRule {
        needles: &["ng-version", " ng-app", "data-ng-app", "<app-root"],
        name: "Angular App",
        category: Category::Frontend,
        icon: "🅰️",
        framework: "Angular",
    },
    BodyRule {
        needles: &["svelte-", "__svelte"],
        name: "Svelte App",
        category: Category::Frontend,
        icon: "🧡",
        framework: "Svelte",
    },
    BodyRule {
        needles: &["__sveltekit", "data-sveltekit"],
        name: "SvelteKit App",
        category: Category::Frontend,
        icon: "🧡",
        framework: "SvelteKit",
    },
    BodyRule {
        needles: &["/@vite/client"],
        name: "Vite Dev Server",
        category: Category::Frontend,
        icon: "⚡",
        framework: "Vite",
    },
    BodyRule {
        needles: &["csrfmiddlewaretoken", "__admin_media_prefix__", "the install worked successfully"],
        name: "Django",
        category: Category::Backend,
        icon: "🐍",
        framework: "Django",
    },
    BodyRule {
        needles: &["laravel"],
        name: "Laravel",
        category: Category::Backend,
        icon: "🔴",
        framework: "Laravel",
    },
    BodyRule {
        needles: &["storybook"],
        name: "Storybook",
        category: Category::Dev,
        icon: "📚",
        framework: "Storybook",
    },
    BodyRule {
        needles: &["jupyter"],
        name: "Jupyter",
        category: Category::Dev,
        icon: "📓",
        framework: "Jupyter",
    },
    BodyRule {
        needles: &["swagger-ui", "openapi", "redoc"],
        name: "API Docs",
        category: Category::Api,
        icon: "📘",
        framework: "Swagger",
    },
];

const TITLE_MAX_CHARS: usize = 200;

/// A header signature with its regex compiled.
#[derive(Debug, Clone)]
struct CompiledHeaderRule {
    regex: Regex,
    rule: HeaderRule,
}

impl CompiledHeaderRule {
    fn compile(rule: &HeaderRule) -> Self {
        let regex = RegexBuilder::new(rule.pattern)
            .case_insensitive(true)
            .build()
            .expect("signature patterns are static and valid");
        Self { regex, rule: *rule }
    }

    fn patch_for(&self, value: &str) -> Option<ServicePatch> {
        let caps = self.regex.captures(value)?;
        Some(ServicePatch {
            name: Some(self.rule.name.to_string()),
            category: Some(self.rule.category),
            icon: Some(self.rule.icon.to_string()),
            framework: self.rule.framework.map(str::to_string),
            server_type: Some(self.rule.server_type.to_string()),
            server_version: caps.get(1).map(|m| m.as_str().to_string()),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone)]
struct SignatureGroup {
    label: &'static str,
    rules: Vec<CompiledHeaderRule>,
}

impl SignatureGroup {
    fn compile(label: &'static str, rules: &[HeaderRule]) -> Self {
        Self {
            label,
            rules: rules.iter().map(CompiledHeaderRule::compile).collect(),
        }
    }

    /// First matching rule in the group, if any.
    fn first_match(&self, value: &str) -> Option<ServicePatch> {
        self.rules.iter().find_map(|r| r.patch_for(value))
    }
}

/// All fingerprinting tables, compiled once and shared read-only.
#[derive(Debug, Clone)]
pub struct SignatureSet {
    server_groups: Vec<SignatureGroup>,
    powered_by: SignatureGroup,
    title: Regex,
}

impl Default for SignatureSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SignatureSet {
    pub fn builtin() -> Self {
        Self {
            server_groups: SERVER_GROUPS
                .iter()
                .map(|(label, rules)| SignatureGroup::compile(label, rules))
                .collect(),
            powered_by: SignatureGroup::compile("powered-by", POWERED_BY_RULES),
            title: Regex::new(r"(?is)<title[^>]*>(.*?)</title>")
                .expect("title pattern is static and valid"),
        }
    }

    /// Patches from the `Server` header, at most one per group, in group order.
    pub fn server_patches(&self, server: &str) -> Vec<(&'static str, ServicePatch)> {
        self.server_groups
            .iter()
            .filter_map(|g| g.first_match(server).map(|p| (g.label, p)))
            .collect()
    }

    /// Patch from the `X-Powered-By` header; first match wins.
    pub fn powered_by_patch(&self, powered_by: &str) -> Option<ServicePatch> {
        self.powered_by.first_match(powered_by)
    }

    /// Patches for every body signature that fires, in table order.
    pub fn body_patches(&self, body: &str) -> Vec<ServicePatch> {
        let lowered = body.to_lowercase();
        BODY_RULES
            .iter()
            .filter(|r| r.needles.iter().any(|n| lowered.contains(n)))
            .map(|r| ServicePatch {
                name: Some(r.name.to_string()),
                category: Some(r.category),
                icon: Some(r.icon.to_string()),
                framework: Some(r.framework.to_string()),
                ..Default::default()
            })
            .collect()
    }

    /// Text of the first `<title>` element, whitespace-collapsed and entity-decoded.
    pub fn extract_title(&self, body: &str) -> Option<String> {
        let raw = self.title.captures(body)?.get(1)?.as_str();
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        let decoded = decode_entities(&collapsed);
        if decoded.is_empty() {
            return None;
        }
        Some(decoded.chars().take(TITLE_MAX_CHARS).collect())
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
