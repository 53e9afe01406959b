// src/engine/item.rs

//! One item at one cursor position:
//! prerequest scripts, preparation pipeline, request, test scripts.

use std::sync::Arc;

use tracing::debug;

use crate::collection::{FlatItem, Request, Script};
use crate::engine::controller::RunContext;
use crate::engine::cursor::Cursor;
use crate::engine::nested::{NestedExecutor, ParentFrame};
use crate::engine::observer::ScriptExecution;
use crate::errors::{RunError, ScriptError};
use crate::exec::{
    NextRequest, Response, ResponseStartHook, ScriptContext, ScriptInvocation, ScriptResult,
    SkipFlag,
};
use crate::pipeline::{Payload, Pipeline};
use crate::types::Listen;
use crate::variables::ScopeSet;

/// How an item step ended.
#[derive(Debug)]
pub(crate) enum ItemOutcome {
    /// The `item` trigger has fired, with the step's first error if any.
    Completed {
        error: Option<RunError>,
        next_request: Option<NextRequest>,
    },
    /// `abort_on_error` hit: no completion triggers fired for this item.
    Abort(RunError),
    /// The run was cancelled while the step was suspended.
    Cancelled,
}

/// Mutable state of one item step.
struct ItemStep {
    scopes: ScopeSet,
    next_request: Option<NextRequest>,
}

#[derive(Default)]
struct EventOutcome {
    executions: Vec<ScriptExecution>,
    error: Option<ScriptError>,
    /// Last request replacement handed back by a script.
    request: Option<Request>,
}

impl RunContext {
    pub(crate) async fn run_item(&self, cursor: &Cursor) -> ItemOutcome {
        let flat = &self.items[cursor.position()];
        let item = flat.item.as_ref();
        let mut step = ItemStep {
            scopes: self.scopes_for(cursor.iteration()),
            next_request: None,
        };

        self.observer.before_item(cursor, item);

        // Prerequest scripts see (and may replace) the unresolved request.
        let mut unresolved = item.clone();
        self.observer.before_prerequest(cursor, &flat.prerequest, item);
        let Some(prerequest) = self
            .execute_event(
                Listen::Prerequest,
                flat,
                cursor,
                &mut step,
                unresolved.request.clone().unwrap_or_default(),
                None,
            )
            .await
        else {
            return ItemOutcome::Cancelled;
        };
        self.observer.prerequest(
            prerequest.error.as_ref(),
            cursor,
            &prerequest.executions,
            item,
        );
        if let Some(err) = prerequest.error {
            return self.fail_item(cursor, flat, RunError::Script(err), step.next_request);
        }
        if let Some(request) = prerequest.request {
            unresolved.request = Some(request);
        }

        let mut payload = Payload::new(
            Arc::new(unresolved),
            flat.auth.clone(),
            step.scopes.clone(),
            cursor.clone(),
        );
        let report = match Pipeline::run(&mut payload, &self.stages.at(cursor)).await {
            Ok(report) => report,
            Err(err) => {
                return self.fail_item(cursor, flat, RunError::Pipeline(err), step.next_request);
            }
        };
        debug!(
            position = cursor.position(),
            warnings = report.warnings.len(),
            secret_errors = report.secret_errors.len(),
            "item prepared"
        );
        let Some(request) = payload.into_request() else {
            let err = crate::errors::PipelineError::MissingRequest {
                item: item.label().to_string(),
            };
            return self.fail_item(cursor, flat, RunError::Pipeline(err), step.next_request);
        };

        self.observer.before_request(cursor, &request, item);
        let sent = request.clone();
        let on_response_start: ResponseStartHook<'_> = Box::new(|response: &Response| {
            self.observer.response_start(cursor, response, &sent);
        });
        let send = self
            .collaborators
            .requester
            .send(request, &self.request_options, on_response_start);
        let Some(outcome) = self.control.cancellable(send).await else {
            return ItemOutcome::Cancelled;
        };
        self.observer.request(
            outcome.error.as_ref(),
            cursor,
            outcome.response.as_ref(),
            &outcome.request,
            &outcome.history,
        );

        // A transport error that still produced a response completes the
        // step normally.
        let mut error = None;
        if let Some(err) = &outcome.error
            && outcome.response.is_none()
        {
            let err = RunError::Transport(err.clone());
            if self.options.abort_on_error {
                return ItemOutcome::Abort(err);
            }
            error = Some(err);
        }

        self.observer.before_test(cursor, &flat.test, item);
        let Some(test) = self
            .execute_event(
                Listen::Test,
                flat,
                cursor,
                &mut step,
                outcome.request.clone(),
                outcome.response.clone(),
            )
            .await
        else {
            return ItemOutcome::Cancelled;
        };
        self.observer
            .test(test.error.as_ref(), cursor, &test.executions, item);
        if let Some(err) = test.error {
            let err = RunError::Script(err);
            if self.options.abort_on_error {
                return ItemOutcome::Abort(err);
            }
            error.get_or_insert(err);
        }

        self.complete_item(cursor, flat, error, step.next_request)
    }

    fn fail_item(
        &self,
        cursor: &Cursor,
        flat: &FlatItem,
        error: RunError,
        next_request: Option<NextRequest>,
    ) -> ItemOutcome {
        if self.options.abort_on_error {
            return ItemOutcome::Abort(error);
        }
        self.complete_item(cursor, flat, Some(error), next_request)
    }

    fn complete_item(
        &self,
        cursor: &Cursor,
        flat: &FlatItem,
        error: Option<RunError>,
        next_request: Option<NextRequest>,
    ) -> ItemOutcome {
        self.observer.item(error.as_ref(), cursor, &flat.item);
        self.lock().items_completed += 1;
        ItemOutcome::Completed {
            error,
            next_request,
        }
    }

    /// Run every script of one event in order. The first failing script
    /// ends the event. `None` means the run was cancelled meanwhile.
    async fn execute_event(
        &self,
        listen: Listen,
        flat: &FlatItem,
        cursor: &Cursor,
        step: &mut ItemStep,
        mut request: Request,
        response: Option<Response>,
    ) -> Option<EventOutcome> {
        let mut outcome = EventOutcome::default();

        for script in flat.scripts(listen) {
            if self.control.is_aborting() {
                return None;
            }

            let skip = SkipFlag::default();
            let invocation = self.invocation(
                listen,
                script,
                flat,
                cursor,
                step,
                request.clone(),
                response.clone(),
                &skip,
            );
            let Some(result) = self
                .control
                .cancellable(self.run_script(invocation, &skip))
                .await
            else {
                skip.mark();
                return None;
            };

            match result {
                Ok(result) => {
                    self.apply_result(cursor, step, &result);
                    if let Some(replaced) = &result.request {
                        request = replaced.clone();
                        outcome.request = Some(replaced.clone());
                    }
                    let execution = ScriptExecution {
                        script_id: script.id.clone(),
                        listen,
                        result: Some(result),
                        error: None,
                    };
                    self.observer.script(None, cursor, &execution);
                    outcome.executions.push(execution);
                }
                Err(err) => {
                    debug!(position = cursor.position(), script = %script.id, error = %err, "script failed");
                    self.observer.exception(cursor, &err);
                    let execution = ScriptExecution {
                        script_id: script.id.clone(),
                        listen,
                        result: None,
                        error: Some(err.clone()),
                    };
                    self.observer.script(Some(&err), cursor, &execution);
                    outcome.executions.push(execution);
                    outcome.error = Some(err);
                    break;
                }
            }
        }

        Some(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn invocation(
        &self,
        listen: Listen,
        script: &Script,
        flat: &FlatItem,
        cursor: &Cursor,
        step: &ItemStep,
        request: Request,
        response: Option<Response>,
        skip: &SkipFlag,
    ) -> ScriptInvocation {
        let console = self.stages.console.at(cursor);
        let nested = NestedExecutor::new(
            Arc::clone(&self.nested),
            ParentFrame {
                cursor: cursor.clone(),
                persisted: step.scopes.clone(),
                skip: skip.clone(),
                console: console.clone(),
            },
        );
        ScriptInvocation {
            script: script.clone(),
            context: ScriptContext {
                listen,
                item: Arc::clone(&flat.item),
                request,
                response,
                scopes: step.scopes.clone(),
                cursor: cursor.clone(),
            },
            timeout: self.options.timeout.script,
            console,
            nested,
            skip: skip.clone(),
        }
    }

    async fn run_script(
        &self,
        invocation: ScriptInvocation,
        skip: &SkipFlag,
    ) -> Result<ScriptResult, ScriptError> {
        let execution = self.collaborators.host.execute(invocation);
        match self.options.timeout.script {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(result) => result,
                Err(_) => {
                    skip.mark();
                    Err(ScriptError::Timeout(limit))
                }
            },
            None => execution.await,
        }
    }

    /// Make a script's writes visible to the rest of the step and persist
    /// them (shared state, or the iteration's partition).
    fn apply_result(&self, cursor: &Cursor, step: &mut ItemStep, result: &ScriptResult) {
        if !result.mutations.is_empty() {
            step.scopes.apply(&result.mutations);
            self.record(cursor.iteration(), &result.mutations);
        }
        if !result.assertions.is_empty() {
            self.observer.assertion(cursor, &result.assertions);
        }
        if let Some(next) = &result.next_request {
            step.next_request = Some(next.clone());
        }
    }
}
