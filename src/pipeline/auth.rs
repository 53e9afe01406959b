// src/pipeline/auth.rs

//! Authorization stage and the handler registry.
//!
//! Signature algorithms live outside the crate; they plug in as
//! [`AuthHandler`]s keyed by auth type. `noauth`, `bearer` and `apikey` are
//! registered by default.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::collection::{Auth, Request};
use crate::errors::{AuthError, PipelineError};

use super::url_match::normalize_url;
use super::{Payload, PipelineReport, Stage, StageContext};

pub trait AuthHandler: Send + Sync {
    /// Sign `request` in place using the (already substituted) auth params.
    fn authorize(&self, auth: &Auth, request: &mut Request) -> Result<(), AuthError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl AuthHandler for NoAuth {
    fn authorize(&self, _auth: &Auth, _request: &mut Request) -> Result<(), AuthError> {
        Ok(())
    }
}

/// `Authorization: Bearer <token>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerAuth;

impl AuthHandler for BearerAuth {
    fn authorize(&self, auth: &Auth, request: &mut Request) -> Result<(), AuthError> {
        let token = auth
            .param("token")
            .ok_or_else(|| AuthError::MissingParam("token".to_string()))?;
        request.set_header("Authorization", format!("Bearer {token}"));
        Ok(())
    }
}

/// `key`/`value` sent as a header (default) or query parameter (`in =
/// "query"`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiKeyAuth;

impl AuthHandler for ApiKeyAuth {
    fn authorize(&self, auth: &Auth, request: &mut Request) -> Result<(), AuthError> {
        let key = auth
            .param("key")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AuthError::MissingParam("key".to_string()))?;
        let value = auth.param("value").unwrap_or_default();

        match auth.param("in").unwrap_or("header") {
            "header" => request.set_header(key, value),
            "query" => request.add_query_param(key, value),
            other => {
                return Err(AuthError::Invalid(format!(
                    "unsupported apikey location '{other}'"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct AuthRegistry {
    handlers: HashMap<String, Arc<dyn AuthHandler>>,
}

impl fmt::Debug for AuthRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("AuthRegistry").field("kinds", &kinds).finish()
    }
}

impl Default for AuthRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl AuthRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::empty()
            .with(Auth::NOAUTH, NoAuth)
            .with("bearer", BearerAuth)
            .with("apikey", ApiKeyAuth)
    }

    pub fn with(mut self, kind: impl Into<String>, handler: impl AuthHandler + 'static) -> Self {
        self.register(kind, Arc::new(handler));
        self
    }

    pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn AuthHandler>) {
        self.handlers.insert(kind.into(), handler);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn AuthHandler>> {
        self.handlers.get(kind)
    }
}

pub async fn run(
    payload: &mut Payload,
    ctx: &StageContext,
    report: &mut PipelineReport,
) -> Result<(), PipelineError> {
    let Some(auth) = payload.auth.clone() else {
        return Ok(());
    };
    let request = payload.request_mut(Stage::Authorize)?;

    let Some(handler) = ctx.auth.get(&auth.kind) else {
        report.warn(
            ctx,
            Stage::Authorize,
            format!("no handler registered for auth type '{}'", auth.kind),
        );
        return Ok(());
    };

    if let Err(err) = handler.authorize(&auth, request) {
        report.warn(
            ctx,
            Stage::Authorize,
            format!("{} auth could not sign the request: {err}", auth.kind),
        );
        return Ok(());
    }

    // Signing may rewrite the URL.
    request.url = request.url.trim().to_string();
    debug!(kind = %auth.kind, url = %normalize_url(&request.url), "request authorized");
    Ok(())
}
