// src/engine/nested.rs

//! Nested request execution.
//!
//! A script may ask for another request to be run and wait for the result.
//! The dispatcher resolves the request id to a collection, builds a child
//! controller through the run's [`ControllerFactory`], runs it to completion
//! with the parent's host, and hands the child's variable mutations,
//! response and exception back to the waiting script.
//!
//! Errors from here go back to the calling script only; they never end the
//! parent run.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::collection::{Collection, Request, flatten};
use crate::engine::cursor::Cursor;
use crate::engine::observer::{ConsoleSink, Observer, ScriptExecution};
use crate::engine::options::{Collaborators, MAX_NESTING_DEPTH, RunOptions};
use crate::errors::{NestedError, ScriptError, TransportError};
use crate::exec::{BoxFuture, HistoryEntry, Response, SkipFlag};
use crate::types::ConsoleLevel;
use crate::variables::{ScopeMutations, ScopeName, ScopeSet, VariableScope};

/// A script's request for a nested run.
#[derive(Debug, Clone, Default)]
pub struct NestedRequest {
    pub request_id: String,
    /// Written into the child's local scope.
    pub overrides: VariableScope,
    /// Full snapshot of the scopes as the calling script sees them, its
    /// uncommitted writes included. Scopes that differ from the persisted
    /// parent state replace it.
    pub in_flight: Option<ScopeSet>,
}

impl NestedRequest {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Self::default()
        }
    }

    pub fn with_overrides(mut self, overrides: VariableScope) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_in_flight(mut self, in_flight: ScopeSet) -> Self {
        self.in_flight = Some(in_flight);
        self
    }
}

/// What the child run reports back to the calling script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestedOutcome {
    /// Mutations of every child script execution, per scope, in order.
    pub mutations: ScopeMutations,
    pub response: Option<Response>,
    pub exception: Option<ScriptError>,
    /// The child run's `done` error, if any.
    pub error: Option<String>,
}

/// Bookkeeping for one in-flight nested run.
#[derive(Debug, Clone)]
pub struct NestedRunRecord {
    pub request_id: String,
    pub parent_cursor: Cursor,
    pub nesting_depth: usize,
    pub variables: ScopeSet,
}

/// Per-run dispatcher. Holds what every child of this run is built from.
pub struct NestedDispatcher {
    depth: usize,
    options: RunOptions,
    collaborators: Collaborators,
    active: Mutex<Vec<NestedRunRecord>>,
}

impl fmt::Debug for NestedDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestedDispatcher")
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl NestedDispatcher {
    pub fn new(options: &RunOptions, collaborators: &Collaborators) -> Self {
        Self {
            depth: options.nesting_depth,
            options: options.clone(),
            collaborators: collaborators.clone(),
            active: Mutex::new(Vec::new()),
        }
    }

    /// Nesting depth of the run this dispatcher belongs to.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Nested runs currently in flight.
    pub fn active(&self) -> Vec<NestedRunRecord> {
        lock_records(&self.active).clone()
    }

    pub async fn dispatch(
        &self,
        parent: &ParentFrame,
        request: NestedRequest,
    ) -> Result<NestedOutcome, NestedError> {
        let depth = self.depth + 1;
        if depth > MAX_NESTING_DEPTH {
            warn!(request_id = %request.request_id, depth, "nested execution rejected: max depth exceeded");
            return Err(NestedError::DepthExceeded {
                max: MAX_NESTING_DEPTH,
            });
        }

        let collection = self.resolve(&request.request_id).await?;

        let mut variables = parent.persisted.clone();
        if let Some(in_flight) = &request.in_flight {
            variables.overlay(in_flight);
        }
        if !request.overrides.is_empty() {
            variables
                .scope_mut(ScopeName::Local)
                .overlay(&request.overrides);
        }

        let record = NestedRunRecord {
            request_id: request.request_id.clone(),
            parent_cursor: parent.cursor.clone(),
            nesting_depth: depth,
            variables: variables.clone(),
        };
        info!(request_id = %record.request_id, depth, parent = %record.parent_cursor, "starting nested run");
        let _active = ActiveRecord::push(&self.active, record);

        let options = RunOptions {
            iteration_count: 1,
            data: Vec::new(),
            stop_on_error: false,
            abort_on_error: true,
            parallel: None,
            nesting_depth: depth,
            ..self.options.clone()
        };
        let child = (self.collaborators.controller_factory)(
            collection,
            options,
            self.collaborators.for_child(),
        )
        .with_scopes(variables);

        let recorder = Arc::new(ChildRunRecorder::new(parent.console.clone()));
        // Boxed so each nesting level gets its own heap frame.
        let report = Box::pin(child.run(Arc::clone(&recorder) as Arc<dyn Observer>)).await;

        let mut outcome = recorder.take();
        outcome.error = report.error.as_ref().map(ToString::to_string);
        if parent.skip.is_skipped() {
            debug!(request_id = %request.request_id, "parent moved on; discarding nested response");
            outcome.response = None;
            outcome.exception = None;
        }
        debug!(request_id = %request.request_id, depth, error = ?outcome.error, "nested run finished");
        Ok(outcome)
    }

    async fn resolve(&self, request_id: &str) -> Result<Collection, NestedError> {
        let resolver =
            self.collaborators
                .request_resolver
                .as_ref()
                .ok_or_else(|| NestedError::Resolve {
                    request_id: request_id.to_string(),
                    message: "no request resolver configured".to_string(),
                })?;

        let raw = resolver
            .resolve(request_id)
            .await
            .map_err(|err| NestedError::Resolve {
                request_id: request_id.to_string(),
                message: format!("{err:#}"),
            })?;

        parse_runnable(request_id, raw)
    }

}

/// Keeps a record in the active list for as long as its nested run is
/// being driven, including when the parent drops the dispatch early.
struct ActiveRecord<'a> {
    active: &'a Mutex<Vec<NestedRunRecord>>,
    request_id: String,
    parent_cursor: Cursor,
}

impl<'a> ActiveRecord<'a> {
    fn push(active: &'a Mutex<Vec<NestedRunRecord>>, record: NestedRunRecord) -> Self {
        let guard = Self {
            active,
            request_id: record.request_id.clone(),
            parent_cursor: record.parent_cursor.clone(),
        };
        lock_records(active).push(record);
        guard
    }
}

impl Drop for ActiveRecord<'_> {
    fn drop(&mut self) {
        let mut records = lock_records(self.active);
        if let Some(idx) = records
            .iter()
            .position(|r| r.request_id == self.request_id && r.parent_cursor == self.parent_cursor)
        {
            records.remove(idx);
        }
    }
}

fn lock_records(active: &Mutex<Vec<NestedRunRecord>>) -> MutexGuard<'_, Vec<NestedRunRecord>> {
    active.lock().unwrap_or_else(|e| e.into_inner())
}

fn parse_runnable(request_id: &str, raw: Value) -> Result<Collection, NestedError> {
    let malformed = |message: String| NestedError::Malformed {
        request_id: request_id.to_string(),
        message,
    };

    if raw.is_null() || raw.as_object().is_some_and(|o| o.is_empty()) {
        return Err(malformed("resolver returned nothing".to_string()));
    }
    let collection: Collection =
        serde_json::from_value(raw).map_err(|err| malformed(err.to_string()))?;
    if flatten(&collection).is_empty() {
        return Err(malformed("collection contains no request".to_string()));
    }
    Ok(collection)
}

/// The calling script's side of a nested run.
#[derive(Debug, Clone)]
pub struct ParentFrame {
    pub cursor: Cursor,
    /// Scopes the calling script was started with.
    pub persisted: ScopeSet,
    pub skip: SkipFlag,
    pub console: ConsoleSink,
}

/// Handle given to a script host so the running script can start nested
/// runs.
#[derive(Debug, Clone)]
pub struct NestedExecutor {
    dispatcher: Arc<NestedDispatcher>,
    frame: ParentFrame,
}

impl NestedExecutor {
    pub fn new(dispatcher: Arc<NestedDispatcher>, frame: ParentFrame) -> Self {
        Self { dispatcher, frame }
    }

    pub fn depth(&self) -> usize {
        self.dispatcher.depth()
    }

    pub fn execute(&self, request: NestedRequest) -> BoxFuture<'_, Result<NestedOutcome, NestedError>> {
        Box::pin(self.dispatcher.dispatch(&self.frame, request))
    }
}

#[derive(Default)]
struct Recorded {
    mutations: ScopeMutations,
    response: Option<Response>,
    exception: Option<ScriptError>,
}

/// Observer attached to a child run: gathers what goes back to the parent
/// script and forwards console output to the parent run.
struct ChildRunRecorder {
    console: ConsoleSink,
    recorded: Mutex<Recorded>,
}

impl ChildRunRecorder {
    fn new(console: ConsoleSink) -> Self {
        Self {
            console,
            recorded: Mutex::new(Recorded::default()),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Recorded) -> R) -> R {
        let mut recorded = self.recorded.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut recorded)
    }

    fn take(&self) -> NestedOutcome {
        let recorded = self.with(std::mem::take);
        NestedOutcome {
            mutations: recorded.mutations,
            response: recorded.response,
            exception: recorded.exception,
            error: None,
        }
    }
}

impl Observer for ChildRunRecorder {
    fn script(&self, _error: Option<&ScriptError>, _cursor: &Cursor, execution: &ScriptExecution) {
        if let Some(result) = &execution.result {
            self.with(|r| r.mutations.extend(result.mutations.clone()));
        }
    }

    fn request(
        &self,
        _error: Option<&TransportError>,
        _cursor: &Cursor,
        response: Option<&Response>,
        _request: &Request,
        _history: &[HistoryEntry],
    ) {
        if let Some(response) = response {
            self.with(|r| r.response = Some(response.clone()));
        }
    }

    fn exception(&self, _cursor: &Cursor, error: &ScriptError) {
        self.with(|r| r.exception = Some(error.clone()));
    }

    fn console(&self, _cursor: &Cursor, level: ConsoleLevel, args: &[Value]) {
        self.console.emit(level, args);
    }
}
