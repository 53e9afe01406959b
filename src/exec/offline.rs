// src/exec/offline.rs

//! Collaborators that need neither network nor a sandbox.

use std::time::Instant;

use serde_json::json;
use tracing::{debug, warn};

use crate::collection::{Header, Request};
use crate::errors::ScriptError;
use crate::exec::BoxFuture;
use crate::exec::host::{ScriptHost, ScriptInvocation, ScriptResult};
use crate::exec::requester::{
    HistoryEntry, RequestOptions, RequestOutcome, Requester, Response, ResponseStartHook,
};

/// Answers every request with `200 OK` and a JSON body describing the
/// request it received.
#[derive(Debug, Clone, Default)]
pub struct EchoRequester;

impl EchoRequester {
    fn echo(request: &Request) -> String {
        let headers: serde_json::Map<String, serde_json::Value> = request
            .headers
            .iter()
            .filter(|h| !h.disabled)
            .map(|h| (h.key.clone(), json!(h.value)))
            .collect();
        json!({
            "method": request.method,
            "url": request.url,
            "headers": headers,
        })
        .to_string()
    }
}

impl Requester for EchoRequester {
    fn send<'a>(
        &'a self,
        request: Request,
        options: &'a RequestOptions,
        on_response_start: ResponseStartHook<'a>,
    ) -> BoxFuture<'a, RequestOutcome> {
        Box::pin(async move {
            let started = Instant::now();
            let mut response = Response::new(200, "OK");
            response.headers = vec![Header::new("Content-Type", "application/json")];
            on_response_start(&response);

            response.body = Self::echo(&request);
            response.response_time = started.elapsed();
            debug!(method = %request.method, url = %request.url, "echoed request");

            let mut outcome = RequestOutcome::success(request, response);
            if options.verbose {
                outcome.history.push(HistoryEntry {
                    kind: "echo".to_string(),
                    message: "request answered locally".to_string(),
                });
            }
            outcome
        })
    }
}

/// Host that does not run scripts. Every invocation succeeds with an empty
/// result.
#[derive(Debug, Clone, Default)]
pub struct PassiveHost;

impl ScriptHost for PassiveHost {
    fn execute(&self, invocation: ScriptInvocation) -> BoxFuture<'_, Result<ScriptResult, ScriptError>> {
        Box::pin(async move {
            warn!(
                script = %invocation.script.id,
                listen = %invocation.context.listen,
                item = %invocation.context.item.label(),
                "no script host configured; skipping script"
            );
            Ok(ScriptResult::default())
        })
    }
}
