// src/engine/observer.rs

//! Trigger surface of a run.
//!
//! Observers are the only way to watch a run progress. Every trigger has a
//! no-op default so an observer implements just what it cares about.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::collection::{Item, Request, Script};
use crate::engine::cursor::Cursor;
use crate::errors::{RunError, ScriptError, TransportError};
use crate::exec::{Assertion, HistoryEntry, Response, ScriptResult};
use crate::types::{ConsoleLevel, Lifecycle, Listen};

/// Outcome of one script run, as reported by the `script`, `prerequest`
/// and `test` triggers.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptExecution {
    pub script_id: String,
    pub listen: Listen,
    pub result: Option<ScriptResult>,
    pub error: Option<ScriptError>,
}

#[allow(unused_variables)]
pub trait Observer: Send + Sync {
    fn start(&self, cursor: &Cursor) {}

    fn before_iteration(&self, cursor: &Cursor) {}

    fn iteration(&self, error: Option<&RunError>, cursor: &Cursor) {}

    fn before_item(&self, cursor: &Cursor, item: &Item) {}

    fn item(&self, error: Option<&RunError>, cursor: &Cursor, item: &Item) {}

    fn before_prerequest(&self, cursor: &Cursor, scripts: &[Script], item: &Item) {}

    fn prerequest(
        &self,
        error: Option<&ScriptError>,
        cursor: &Cursor,
        results: &[ScriptExecution],
        item: &Item,
    ) {
    }

    fn before_test(&self, cursor: &Cursor, scripts: &[Script], item: &Item) {}

    fn test(
        &self,
        error: Option<&ScriptError>,
        cursor: &Cursor,
        results: &[ScriptExecution],
        item: &Item,
    ) {
    }

    fn before_request(&self, cursor: &Cursor, request: &Request, item: &Item) {}

    fn request(
        &self,
        error: Option<&TransportError>,
        cursor: &Cursor,
        response: Option<&Response>,
        request: &Request,
        history: &[HistoryEntry],
    ) {
    }

    /// Response headers are in; the body may still be streaming. Not fired
    /// for requests a script sends itself.
    fn response_start(&self, cursor: &Cursor, response: &Response, request: &Request) {}

    fn script(&self, error: Option<&ScriptError>, cursor: &Cursor, execution: &ScriptExecution) {}

    fn console(&self, cursor: &Cursor, level: ConsoleLevel, args: &[Value]) {}

    fn exception(&self, cursor: &Cursor, error: &ScriptError) {}

    fn assertion(&self, cursor: &Cursor, assertions: &[Assertion]) {}

    fn pause(&self, cursor: &Cursor) {}

    fn resume(&self, cursor: &Cursor) {}

    fn abort(&self, error: Option<&RunError>) {}

    fn done(&self, error: Option<&RunError>) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Turns triggers into tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn start(&self, cursor: &Cursor) {
        info!(run = %cursor.run_ref(), items = cursor.length(), iterations = cursor.cycles(), "run started");
    }

    fn before_iteration(&self, cursor: &Cursor) {
        debug!(iteration = cursor.iteration(), "iteration starting");
    }

    fn iteration(&self, error: Option<&RunError>, cursor: &Cursor) {
        match error {
            Some(err) => warn!(iteration = cursor.iteration(), error = %err, "iteration stopped"),
            None => info!(iteration = cursor.iteration(), "iteration complete"),
        }
    }

    fn before_item(&self, cursor: &Cursor, item: &Item) {
        debug!(iteration = cursor.iteration(), position = cursor.position(), item = %item.label(), "item starting");
    }

    fn item(&self, error: Option<&RunError>, cursor: &Cursor, item: &Item) {
        match error {
            Some(err) => warn!(
                iteration = cursor.iteration(),
                position = cursor.position(),
                item = %item.label(),
                error = %err,
                "item failed"
            ),
            None => debug!(iteration = cursor.iteration(), position = cursor.position(), item = %item.label(), "item complete"),
        }
    }

    fn request(
        &self,
        error: Option<&TransportError>,
        cursor: &Cursor,
        response: Option<&Response>,
        request: &Request,
        _history: &[HistoryEntry],
    ) {
        let code = response.map(|r| r.code);
        match error {
            Some(err) => warn!(position = cursor.position(), method = %request.method, url = %request.url, ?code, error = %err, "request failed"),
            None => info!(position = cursor.position(), method = %request.method, url = %request.url, ?code, "request complete"),
        }
    }

    fn console(&self, cursor: &Cursor, level: ConsoleLevel, args: &[Value]) {
        let message = args
            .iter()
            .map(crate::variables::value_to_string)
            .collect::<Vec<_>>()
            .join(" ");
        match level {
            ConsoleLevel::Warn => warn!(position = cursor.position(), "{message}"),
            ConsoleLevel::Error => error!(position = cursor.position(), "{message}"),
            ConsoleLevel::Debug => debug!(position = cursor.position(), "{message}"),
            ConsoleLevel::Log | ConsoleLevel::Info => info!(position = cursor.position(), "{message}"),
        }
    }

    fn exception(&self, cursor: &Cursor, error: &ScriptError) {
        warn!(position = cursor.position(), error = %error, "script exception");
    }

    fn assertion(&self, cursor: &Cursor, assertions: &[Assertion]) {
        for a in assertions {
            if a.passed {
                debug!(position = cursor.position(), assertion = %a.name, "assertion passed");
            } else {
                warn!(position = cursor.position(), assertion = %a.name, error = ?a.error, "assertion failed");
            }
        }
    }

    fn pause(&self, cursor: &Cursor) {
        info!(iteration = cursor.iteration(), position = cursor.position(), "run paused");
    }

    fn resume(&self, cursor: &Cursor) {
        info!(iteration = cursor.iteration(), position = cursor.position(), "run resumed");
    }

    fn abort(&self, error: Option<&RunError>) {
        warn!(error = ?error.map(ToString::to_string), "run aborted");
    }

    fn done(&self, error: Option<&RunError>) {
        match error {
            Some(err) => warn!(error = %err, "run finished with error"),
            None => info!("run finished"),
        }
    }
}

/// Console channel handed to stages and script hosts.
///
/// Messages are dropped once the run has reached a terminal state, so
/// nothing reaches observers after `done`.
#[derive(Clone)]
pub struct ConsoleSink {
    observer: Arc<dyn Observer>,
    lifecycle: watch::Receiver<Lifecycle>,
    cursor: Cursor,
}

impl std::fmt::Debug for ConsoleSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleSink")
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl ConsoleSink {
    pub fn new(
        observer: Arc<dyn Observer>,
        lifecycle: watch::Receiver<Lifecycle>,
        cursor: Cursor,
    ) -> Self {
        Self {
            observer,
            lifecycle,
            cursor,
        }
    }

    /// Same sink, reporting at `cursor`.
    pub fn at(&self, cursor: &Cursor) -> Self {
        Self {
            cursor: cursor.clone(),
            ..self.clone()
        }
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn emit(&self, level: ConsoleLevel, args: &[Value]) {
        if self.lifecycle.borrow().is_terminal() {
            return;
        }
        self.observer.console(&self.cursor, level, args);
    }

    pub fn log(&self, level: ConsoleLevel, message: impl Into<String>) {
        self.emit(level, &[Value::String(message.into())]);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(ConsoleLevel::Warn, message);
    }
}
