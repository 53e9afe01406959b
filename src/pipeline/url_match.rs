// src/pipeline/url_match.rs

//! URL match patterns for the proxy and certificate lists.
//!
//! A pattern looks like a URL with `*` wildcards:
//!
//! ```text
//! https://*.example.com/*
//! http+https://localhost:8080/api/*
//! <all_urls>
//! ```
//!
//! `http+https://` expands to both schemes. A pattern without a path matches
//! every path on that host.

use std::fmt;

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

const ALL_URLS: &str = "<all_urls>";

#[derive(Clone)]
pub struct UrlPatterns {
    sources: Vec<String>,
    set: GlobSet,
}

impl fmt::Debug for UrlPatterns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlPatterns")
            .field("sources", &self.sources)
            .finish()
    }
}

impl Default for UrlPatterns {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            set: GlobSet::empty(),
        }
    }
}

impl UrlPatterns {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut sources = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            for expanded in expand(pattern) {
                let glob = GlobBuilder::new(&expanded)
                    .case_insensitive(true)
                    .literal_separator(false)
                    .build()
                    .with_context(|| format!("invalid URL match pattern '{pattern}'"))?;
                builder.add(glob);
            }
            sources.push(pattern.to_string());
        }

        let set = builder
            .build()
            .context("failed to compile URL match patterns")?;
        Ok(Self { sources, set })
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn matches(&self, url: &str) -> bool {
        !self.sources.is_empty() && self.set.is_match(normalize_url(url))
    }
}

fn expand(pattern: &str) -> Vec<String> {
    if pattern == ALL_URLS {
        return vec!["*".to_string()];
    }

    let (schemes, rest) = match pattern.split_once("://") {
        Some(("http+https", rest)) => (vec!["http", "https"], rest),
        Some((scheme, rest)) => (vec![scheme], rest),
        None => (vec!["*"], pattern),
    };
    let rest = if rest.contains('/') {
        rest.to_string()
    } else {
        format!("{rest}/*")
    };

    schemes
        .into_iter()
        .map(|scheme| format!("{scheme}://{rest}"))
        .collect()
}

/// Canonical form matched against patterns: `scheme://host[:port]/path`,
/// with a default `http` scheme, no query, no fragment.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => ("http".to_string(), url),
    };
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let (host, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let host = host.rsplit('@').next().unwrap_or(host).to_ascii_lowercase();
    format!("{scheme}://{host}{path}")
}

/// Host part of a URL, lowercased and without port or credentials.
pub fn host_of(url: &str) -> String {
    let normalized = normalize_url(url);
    let after_scheme = normalized
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(&normalized);
    let authority = after_scheme.split('/').next().unwrap_or_default();
    authority
        .split(':')
        .next()
        .unwrap_or_default()
        .to_string()
}
