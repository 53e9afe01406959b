// src/config/model.rs

use serde::Deserialize;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [run]
/// iteration_count = 3
/// stop_on_error = true
///
/// [run.timeout]
/// script = "5s"
/// global = "2m"
///
/// [run.parallel]
/// partitions = 4
///
/// [[proxy]]
/// match = ["https://*.example.com/*"]
/// host = "proxy.local"
/// port = 3128
/// bypass = ["internal.example.com"]
///
/// [[certificate]]
/// match = ["https://secure.example.com/*"]
/// key = "certs/client.key"
/// cert = "certs/client.crt"
/// ```
///
/// All sections are optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub run: RunSection,

    #[serde(default)]
    pub proxy: Vec<ProxyEntry>,

    #[serde(default)]
    pub certificate: Vec<CertificateConfig>,
}

/// Validated configuration. Build it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub run: RunSection,
    pub proxy: Vec<ProxyEntry>,
    pub certificate: Vec<CertificateConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        run: RunSection,
        proxy: Vec<ProxyEntry>,
        certificate: Vec<CertificateConfig>,
    ) -> Self {
        Self {
            run,
            proxy,
            certificate,
        }
    }
}

/// `[run]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    #[serde(default = "default_iteration_count")]
    pub iteration_count: usize,

    #[serde(default)]
    pub stop_on_error: bool,

    #[serde(default)]
    pub abort_on_error: bool,

    /// Ask the requester for protocol-level history.
    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub timeout: TimeoutSection,

    /// Present when iterations should run in parallel.
    #[serde(default)]
    pub parallel: Option<ParallelSection>,
}

fn default_iteration_count() -> usize {
    1
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            iteration_count: default_iteration_count(),
            stop_on_error: false,
            abort_on_error: false,
            verbose: false,
            timeout: TimeoutSection::default(),
            parallel: None,
        }
    }
}

/// `[run.timeout]`: durations such as `"500ms"`, `"5s"`, `"2m"`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutSection {
    #[serde(default)]
    pub script: Option<String>,

    #[serde(default)]
    pub global: Option<String>,

    #[serde(default)]
    pub request: Option<String>,
}

/// `[run.parallel]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParallelSection {
    /// Maximum number of iterations in flight.
    pub partitions: usize,
}

/// `[[proxy]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyEntry {
    #[serde(rename = "match", default = "default_match")]
    pub patterns: Vec<String>,

    pub host: String,

    pub port: u16,

    #[serde(default)]
    pub tunnel: bool,

    #[serde(default)]
    pub disabled: bool,

    /// Hosts (globs allowed) that never go through this proxy.
    #[serde(default)]
    pub bypass: Vec<String>,
}

fn default_match() -> Vec<String> {
    vec!["<all_urls>".to_string()]
}

/// `[[certificate]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateConfig {
    #[serde(rename = "match")]
    pub patterns: Vec<String>,

    #[serde(default)]
    pub key: Option<String>,

    #[serde(default)]
    pub cert: Option<String>,

    #[serde(default)]
    pub passphrase: Option<String>,
}
