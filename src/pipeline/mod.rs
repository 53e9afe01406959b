// src/pipeline/mod.rs

//! Per-item preparation pipeline.
//!
//! Stages run strictly in [`STAGE_ORDER`]; each one finishes before the next
//! starts. Correctable problems are warned about through the console sink and
//! the pipeline carries on with a degraded payload. Structural problems
//! (no item, no request) stop the pipeline with a [`PipelineError`].
//!
//! - [`variables`] expands placeholders into a resolved copy of the item.
//! - [`auth`] signs the request with the item's effective auth.
//! - [`secrets`] resolves secret-flagged variables.
//! - [`files`] loads form-data files and file bodies.
//! - [`proxy`] picks a proxy.
//! - [`certificates`] attaches a client certificate.

pub mod auth;
pub mod certificates;
pub mod files;
pub mod proxy;
pub mod secrets;
pub mod url_match;
pub mod variables;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::collection::{Auth, Item, Request};
use crate::engine::cursor::Cursor;
use crate::engine::observer::ConsoleSink;
use crate::errors::PipelineError;
use crate::exec::{ProxyResolver, SecretResolver, SystemProxyResolver};
use crate::fs::FileResolver;
use crate::variables::{ScopeName, ScopeSet};

pub use auth::{AuthHandler, AuthRegistry};
pub use certificates::{CertificateEntry, CertificateList};
pub use proxy::{ProxyList, ProxyRule};
pub use url_match::UrlPatterns;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Variables,
    Authorize,
    Secrets,
    Files,
    Proxy,
    Certificates,
}

pub const STAGE_ORDER: [Stage; 6] = [
    Stage::Variables,
    Stage::Authorize,
    Stage::Secrets,
    Stage::Files,
    Stage::Proxy,
    Stage::Certificates,
];

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Variables => "variables",
            Stage::Authorize => "authorize",
            Stage::Secrets => "secrets",
            Stage::Files => "files",
            Stage::Proxy => "proxy",
            Stage::Certificates => "certificates",
        }
    }

    async fn run(
        self,
        payload: &mut Payload,
        ctx: &StageContext,
        report: &mut PipelineReport,
    ) -> Result<(), PipelineError> {
        match self {
            Stage::Variables => variables::run(payload, ctx, report).await,
            Stage::Authorize => auth::run(payload, ctx, report).await,
            Stage::Secrets => secrets::run(payload, ctx, report).await,
            Stage::Files => files::run(payload, ctx, report).await,
            Stage::Proxy => proxy::run(payload, ctx, report).await,
            Stage::Certificates => certificates::run(payload, ctx, report).await,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transient per-item, per-iteration record the stages operate on.
#[derive(Debug, Clone)]
pub struct Payload {
    /// The item as written in the collection (after prerequest edits).
    pub unresolved: Arc<Item>,
    /// The resolved item; filled by the variables stage.
    pub item: Option<Item>,
    /// Effective auth inherited from the ancestor chain.
    pub auth: Option<Auth>,
    /// Scopes visible to this step (data row included).
    pub scopes: ScopeSet,
    pub coords: Cursor,
}

impl Payload {
    pub fn new(unresolved: Arc<Item>, auth: Option<Auth>, scopes: ScopeSet, coords: Cursor) -> Self {
        Self {
            unresolved,
            item: None,
            auth,
            scopes,
            coords,
        }
    }

    pub fn request(&self, stage: Stage) -> Result<&Request, PipelineError> {
        let item = self.item.as_ref().ok_or(PipelineError::MissingItem {
            stage: stage.name(),
        })?;
        item.request
            .as_ref()
            .ok_or_else(|| PipelineError::MissingRequest {
                item: item.label().to_string(),
            })
    }

    pub fn request_mut(&mut self, stage: Stage) -> Result<&mut Request, PipelineError> {
        let item = self.item.as_mut().ok_or(PipelineError::MissingItem {
            stage: stage.name(),
        })?;
        let label = item.label().to_string();
        item.request
            .as_mut()
            .ok_or(PipelineError::MissingRequest { item: label })
    }

    /// The prepared request, consuming the payload.
    pub fn into_request(self) -> Option<Request> {
        self.item.and_then(|item| item.request)
    }
}

/// Run-wide collaborators the stages consult.
#[derive(Clone)]
pub struct StageContext {
    pub auth: Arc<AuthRegistry>,
    pub files: Option<Arc<dyn FileResolver>>,
    pub secrets: Option<Arc<dyn SecretResolver>>,
    pub system_proxy: Option<Arc<dyn SystemProxyResolver>>,
    pub proxies: Option<Arc<dyn ProxyResolver>>,
    pub certificates: Arc<CertificateList>,
    pub console: ConsoleSink,
}

impl fmt::Debug for StageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("auth", &self.auth)
            .field("files", &self.files)
            .field("secrets", &self.secrets.is_some())
            .field("system_proxy", &self.system_proxy.is_some())
            .field("proxies", &self.proxies.is_some())
            .field("certificates", &self.certificates)
            .finish()
    }
}

impl StageContext {
    /// Same context, reporting console output at `cursor`.
    pub fn at(&self, cursor: &Cursor) -> Self {
        Self {
            console: self.console.at(cursor),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretFailure {
    pub scope: ScopeName,
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub completed: Vec<Stage>,
    pub warnings: Vec<String>,
    pub secret_errors: Vec<SecretFailure>,
}

impl PipelineReport {
    /// Record a correctable problem and surface it on the console.
    pub fn warn(&mut self, ctx: &StageContext, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        warn!(stage = %stage, position = ctx.console.cursor().position(), "{message}");
        ctx.console.warn(message.clone());
        self.warnings.push(message);
    }
}

pub struct Pipeline;

impl Pipeline {
    pub async fn run(payload: &mut Payload, ctx: &StageContext) -> Result<PipelineReport, PipelineError> {
        let mut report = PipelineReport::default();
        for stage in STAGE_ORDER {
            if let Err(err) = stage.run(payload, ctx, &mut report).await {
                debug!(stage = %stage, error = %err, "pipeline stopped");
                return Err(err);
            }
            report.completed.push(stage);
        }
        Ok(report)
    }
}
