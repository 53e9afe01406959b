// src/pipeline/proxy.rs

//! Proxy stage and the static proxy list.
//!
//! Resolution order:
//! 1. a proxy set explicitly on the request is kept as is;
//! 2. the system proxy resolver, when configured (errors warn and fall
//!    through);
//! 3. the static proxy list, first matching rule wins.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::collection::ProxyConfig;
use crate::errors::PipelineError;
use crate::exec::ProxyResolver;

use super::url_match::{UrlPatterns, host_of};
use super::{Payload, PipelineReport, Stage, StageContext};

/// One `[[proxy]]` entry.
#[derive(Debug, Clone)]
pub struct ProxyRule {
    pub patterns: UrlPatterns,
    pub proxy: ProxyConfig,
    pub disabled: bool,
    bypass: GlobSet,
}

impl ProxyRule {
    pub fn new<S: AsRef<str>>(
        patterns: UrlPatterns,
        proxy: ProxyConfig,
        bypass: &[S],
    ) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for host in bypass {
            builder.add(Glob::new(&host.as_ref().trim().to_ascii_lowercase())?);
        }
        Ok(Self {
            patterns,
            proxy,
            disabled: false,
            bypass: builder.build()?,
        })
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn applies_to(&self, url: &str) -> bool {
        !self.disabled && self.patterns.matches(url) && !self.bypass.is_match(host_of(url))
    }
}

/// Static proxy list, consulted after the system proxy.
#[derive(Debug, Clone, Default)]
pub struct ProxyList {
    rules: Vec<ProxyRule>,
}

impl ProxyList {
    pub fn new(rules: Vec<ProxyRule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[ProxyRule] {
        &self.rules
    }
}

impl ProxyResolver for ProxyList {
    fn resolve(&self, url: &str) -> Option<ProxyConfig> {
        self.rules
            .iter()
            .find(|rule| rule.applies_to(url))
            .map(|rule| rule.proxy.clone())
    }
}

pub async fn run(
    payload: &mut Payload,
    ctx: &StageContext,
    report: &mut PipelineReport,
) -> Result<(), PipelineError> {
    let url = {
        let request = payload.request_mut(Stage::Proxy)?;
        if request.proxy.is_some() {
            return Ok(());
        }
        request.url.clone()
    };

    let mut resolved = None;
    if let Some(system) = &ctx.system_proxy {
        match system.system_proxy(&url).await {
            Ok(found) => resolved = found,
            Err(err) => report.warn(
                ctx,
                Stage::Proxy,
                format!("unable to resolve system proxy for {url}: {err:#}"),
            ),
        }
    }

    if resolved.is_none() {
        resolved = ctx.proxies.as_ref().and_then(|list| list.resolve(&url));
    }

    if let Some(proxy) = resolved {
        debug!(url = %url, host = %proxy.host, port = proxy.port, "proxy selected");
        payload.request_mut(Stage::Proxy)?.proxy = Some(proxy);
    }
    Ok(())
}
