// src/pipeline/secrets.rs

//! Secret resolution stage.
//!
//! Secret-flagged variables from the environment, globals and collection
//! variables are handed to the secret resolver in one batch. Resolved values
//! replace the variable values for this payload only; per-secret failures
//! are collected and warned about, never fatal.
//!
//! The stage always finishes with a substitution pass that expands the
//! secret placeholders the variables stage held back.

use serde_json::{Value, json};
use tracing::debug;

use crate::errors::PipelineError;
use crate::exec::SecretRequest;
use crate::variables::{ScopeName, Substitutor, Variable};

use super::variables::{substitute_auth, substitute_request};
use super::{Payload, PipelineReport, SecretFailure, Stage, StageContext};

const SECRET_SCOPES: [ScopeName; 3] = [
    ScopeName::Environment,
    ScopeName::Globals,
    ScopeName::CollectionVariables,
];

pub async fn run(
    payload: &mut Payload,
    ctx: &StageContext,
    report: &mut PipelineReport,
) -> Result<(), PipelineError> {
    let pending = collect(payload);

    if !pending.is_empty()
        && let Some(resolver) = &ctx.secrets
    {
        let request = payload.request(Stage::Secrets)?.clone();
        let keys: Vec<(ScopeName, String)> = pending
            .iter()
            .map(|s| (s.scope, s.variable.key.clone()))
            .collect();

        match resolver.resolve(pending, &request).await {
            Ok(results) => {
                for ((scope, key), result) in keys.into_iter().zip(results) {
                    if let Some(error) = result.error {
                        report.warn(
                            ctx,
                            Stage::Secrets,
                            format!("unable to resolve secret '{key}' in {scope}: {error}"),
                        );
                        report.secret_errors.push(SecretFailure { scope, key, error });
                        continue;
                    }
                    if let Some(value) = result.resolved_value {
                        debug!(%scope, key = %key, "secret resolved");
                        let resolved = payload.scopes.scope_mut(scope);
                        if let Some(existing) = resolved.variable(&key).cloned() {
                            resolved.insert(Variable {
                                value: Value::String(value),
                                ..existing
                            });
                        }
                    }
                }
            }
            Err(err) => {
                let error = format!("{err:#}");
                report.warn(
                    ctx,
                    Stage::Secrets,
                    format!("secret resolver failed: {error}"),
                );
                for (scope, key) in keys {
                    report.secret_errors.push(SecretFailure {
                        scope,
                        key,
                        error: error.clone(),
                    });
                }
            }
        }
    }

    let sub = Substitutor::new(&payload.scopes);
    let auth = payload.auth.as_ref().map(|auth| substitute_auth(auth, &sub));
    let item = payload.item.as_mut().ok_or(PipelineError::MissingItem {
        stage: Stage::Secrets.name(),
    })?;
    if let Some(request) = item.request.as_mut() {
        substitute_request(request, &sub);
    }
    payload.auth = auth;
    Ok(())
}

fn collect(payload: &Payload) -> Vec<SecretRequest> {
    let context = json!({
        "item": payload.unresolved.id,
        "iteration": payload.coords.iteration(),
    });
    let mut pending = Vec::new();
    for scope in SECRET_SCOPES {
        for variable in payload.scopes.scope(scope).iter() {
            if variable.is_secret() && !variable.disabled {
                pending.push(SecretRequest {
                    scope,
                    variable: variable.clone(),
                    context: context.clone(),
                });
            }
        }
    }
    pending
}
