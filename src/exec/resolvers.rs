// src/exec/resolvers.rs

//! Resolver seams consumed by the pipeline and the nested dispatcher.

use serde_json::Value;

use crate::collection::{ProxyConfig, Request};
use crate::exec::BoxFuture;
use crate::variables::{ScopeName, Variable};

/// One secret-flagged variable awaiting resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretRequest {
    pub scope: ScopeName,
    pub variable: Variable,
    pub context: Value,
}

/// Resolver answer for one [`SecretRequest`], matched by position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretResolution {
    pub resolved_value: Option<String>,
    pub error: Option<String>,
    /// Whether the value may be shown unmasked.
    pub safe: Option<bool>,
}

pub trait SecretResolver: Send + Sync {
    fn resolve<'a>(
        &'a self,
        secrets: Vec<SecretRequest>,
        request: &'a Request,
    ) -> BoxFuture<'a, anyhow::Result<Vec<SecretResolution>>>;
}

/// Resolves a request id to a runnable collection (JSON) for nested runs.
pub trait RequestResolver: Send + Sync {
    fn resolve<'a>(&'a self, request_id: &'a str) -> BoxFuture<'a, anyhow::Result<Value>>;
}

/// Static proxy lookup by URL.
pub trait ProxyResolver: Send + Sync {
    fn resolve(&self, url: &str) -> Option<ProxyConfig>;
}

/// Operating-system proxy lookup.
pub trait SystemProxyResolver: Send + Sync {
    fn system_proxy<'a>(&'a self, url: &'a str) -> BoxFuture<'a, anyhow::Result<Option<ProxyConfig>>>;
}
