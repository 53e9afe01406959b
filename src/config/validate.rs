// src/config/validate.rs

use std::path::PathBuf;
use std::time::Duration;

use crate::collection::ProxyConfig;
use crate::config::model::{CertificateConfig, ConfigFile, ProxyEntry, RawConfigFile};
use crate::engine::{RunOptions, Timeouts};
use crate::errors::{Result, RunError};
use crate::pipeline::{CertificateEntry, CertificateList, ProxyList, ProxyRule, UrlPatterns};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = RunError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.run, raw.proxy, raw.certificate))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_run_section(cfg)?;
    for (idx, entry) in cfg.proxy.iter().enumerate() {
        build_proxy_rule(idx, entry)?;
    }
    for (idx, entry) in cfg.certificate.iter().enumerate() {
        build_certificate(idx, entry)?;
    }
    Ok(())
}

fn validate_run_section(cfg: &RawConfigFile) -> Result<()> {
    let run = &cfg.run;

    if run.iteration_count == 0 {
        return Err(RunError::ConfigError(
            "[run].iteration_count must be >= 1 (got 0)".to_string(),
        ));
    }

    if let Some(parallel) = &run.parallel
        && parallel.partitions == 0
    {
        return Err(RunError::ConfigError(
            "[run.parallel].partitions must be >= 1 (got 0)".to_string(),
        ));
    }

    parse_duration("script", run.timeout.script.as_deref())?;
    parse_duration("global", run.timeout.global.as_deref())?;
    parse_duration("request", run.timeout.request.as_deref())?;
    Ok(())
}

fn parse_duration(field: &str, value: Option<&str>) -> Result<Option<Duration>> {
    let Some(value) = value else {
        return Ok(None);
    };
    humantime::parse_duration(value.trim())
        .map(Some)
        .map_err(|err| {
            RunError::ConfigError(format!(
                "[run.timeout].{field} has invalid duration '{value}': {err}"
            ))
        })
}

fn compile_patterns(section: &str, idx: usize, patterns: &[String]) -> Result<UrlPatterns> {
    if patterns.is_empty() {
        return Err(RunError::ConfigError(format!(
            "[[{section}]] #{idx} needs at least one `match` pattern"
        )));
    }
    UrlPatterns::new(patterns)
        .map_err(|err| RunError::ConfigError(format!("[[{section}]] #{idx}: {err:#}")))
}

fn build_proxy_rule(idx: usize, entry: &ProxyEntry) -> Result<ProxyRule> {
    if entry.host.trim().is_empty() {
        return Err(RunError::ConfigError(format!(
            "[[proxy]] #{idx} has an empty host"
        )));
    }
    if entry.port == 0 {
        return Err(RunError::ConfigError(format!(
            "[[proxy]] #{idx} port must be non-zero"
        )));
    }

    let patterns = compile_patterns("proxy", idx, &entry.patterns)?;
    let proxy = ProxyConfig {
        host: entry.host.trim().to_string(),
        port: entry.port,
        tunnel: entry.tunnel,
    };
    let rule = ProxyRule::new(patterns, proxy, &entry.bypass)
        .map_err(|err| RunError::ConfigError(format!("[[proxy]] #{idx} bypass: {err:#}")))?;
    Ok(rule.disabled(entry.disabled))
}

fn build_certificate(idx: usize, entry: &CertificateConfig) -> Result<CertificateEntry> {
    if entry.key.is_none() && entry.cert.is_none() {
        return Err(RunError::ConfigError(format!(
            "[[certificate]] #{idx} needs a `key` or a `cert`"
        )));
    }
    Ok(CertificateEntry {
        patterns: compile_patterns("certificate", idx, &entry.patterns)?,
        key: entry.key.as_ref().map(PathBuf::from),
        cert: entry.cert.as_ref().map(PathBuf::from),
        passphrase: entry.passphrase.clone(),
    })
}

impl ConfigFile {
    pub fn timeouts(&self) -> Result<Timeouts> {
        let t = &self.run.timeout;
        Ok(Timeouts {
            script: parse_duration("script", t.script.as_deref())?,
            global: parse_duration("global", t.global.as_deref())?,
            request: parse_duration("request", t.request.as_deref())?,
        })
    }

    pub fn proxy_list(&self) -> Result<ProxyList> {
        let rules = self
            .proxy
            .iter()
            .enumerate()
            .map(|(idx, entry)| build_proxy_rule(idx, entry))
            .collect::<Result<Vec<_>>>()?;
        Ok(ProxyList::new(rules))
    }

    pub fn certificate_list(&self) -> Result<CertificateList> {
        let entries = self
            .certificate
            .iter()
            .enumerate()
            .map(|(idx, entry)| build_certificate(idx, entry))
            .collect::<Result<Vec<_>>>()?;
        Ok(CertificateList::new(entries))
    }

    /// Run options described by this file. Data rows, environment and
    /// globals are left empty for the caller to fill.
    pub fn run_options(&self) -> Result<RunOptions> {
        Ok(RunOptions {
            iteration_count: self.run.iteration_count,
            stop_on_error: self.run.stop_on_error,
            abort_on_error: self.run.abort_on_error,
            verbose: self.run.verbose,
            timeout: self.timeouts()?,
            parallel: self.run.parallel.as_ref().map(|p| p.partitions),
            proxies: self.proxy_list()?,
            certificates: self.certificate_list()?,
            ..RunOptions::default()
        })
    }
}
