use std::sync::Mutex;
use std::time::Duration;

use runwright::collection::{Item, Request, Script};
use runwright::engine::{Cursor, Observer, ScriptExecution};
use runwright::errors::{RunError, ScriptError, TransportError};
use runwright::exec::{Assertion, HistoryEntry, Response};
use runwright::types::ConsoleLevel;
use serde_json::Value;
use tokio::sync::Notify;

/// One trigger as recorded by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub trigger: &'static str,
    pub iteration: Option<usize>,
    pub position: Option<usize>,
    pub item: Option<String>,
    pub error: Option<String>,
    /// Trigger-specific detail: url, script id, console text, assertion names.
    pub detail: Option<String>,
}

impl Event {
    fn new(trigger: &'static str) -> Self {
        Self {
            trigger,
            iteration: None,
            position: None,
            item: None,
            error: None,
            detail: None,
        }
    }

    fn at(mut self, cursor: &Cursor) -> Self {
        self.iteration = Some(cursor.iteration());
        self.position = Some(cursor.position());
        self
    }

    fn item(mut self, item: &Item) -> Self {
        self.item = Some(item.label().to_string());
        self
    }

    fn error(mut self, error: Option<impl ToString>) -> Self {
        self.error = error.map(|e| e.to_string());
        self
    }

    fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// An observer that records every trigger in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
    changed: Notify,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
        self.changed.notify_waiters();
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn triggers(&self) -> Vec<&'static str> {
        self.events().into_iter().map(|e| e.trigger).collect()
    }

    pub fn of(&self, trigger: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.trigger == trigger)
            .collect()
    }

    pub fn count(&self, trigger: &str) -> usize {
        self.of(trigger).len()
    }

    /// `(iteration, item)` for every completed item, in order.
    pub fn completed_items(&self) -> Vec<(usize, String)> {
        self.of("item")
            .into_iter()
            .map(|e| (e.iteration.unwrap_or_default(), e.item.unwrap_or_default()))
            .collect()
    }

    pub fn console_messages(&self) -> Vec<String> {
        self.of("console")
            .into_iter()
            .filter_map(|e| e.detail)
            .collect()
    }

    /// Error text handed to `done`; `None` if `done` has not fired or had
    /// no error.
    pub fn done_error(&self) -> Option<String> {
        self.of("done").into_iter().next().and_then(|e| e.error)
    }

    /// Wait until `trigger` has fired at least `n` times (5s cap).
    pub async fn wait_for(&self, trigger: &str, n: usize) {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                if self.count(trigger) >= n {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {n} x '{trigger}'"));
    }
}

impl Observer for RecordingObserver {
    fn start(&self, cursor: &Cursor) {
        self.push(Event::new("start").at(cursor));
    }

    fn before_iteration(&self, cursor: &Cursor) {
        self.push(Event::new("before_iteration").at(cursor));
    }

    fn iteration(&self, error: Option<&RunError>, cursor: &Cursor) {
        self.push(Event::new("iteration").at(cursor).error(error));
    }

    fn before_item(&self, cursor: &Cursor, item: &Item) {
        self.push(Event::new("before_item").at(cursor).item(item));
    }

    fn item(&self, error: Option<&RunError>, cursor: &Cursor, item: &Item) {
        self.push(Event::new("item").at(cursor).item(item).error(error));
    }

    fn before_prerequest(&self, cursor: &Cursor, _scripts: &[Script], item: &Item) {
        self.push(Event::new("before_prerequest").at(cursor).item(item));
    }

    fn prerequest(
        &self,
        error: Option<&ScriptError>,
        cursor: &Cursor,
        _results: &[ScriptExecution],
        item: &Item,
    ) {
        self.push(Event::new("prerequest").at(cursor).item(item).error(error));
    }

    fn before_test(&self, cursor: &Cursor, _scripts: &[Script], item: &Item) {
        self.push(Event::new("before_test").at(cursor).item(item));
    }

    fn test(
        &self,
        error: Option<&ScriptError>,
        cursor: &Cursor,
        _results: &[ScriptExecution],
        item: &Item,
    ) {
        self.push(Event::new("test").at(cursor).item(item).error(error));
    }

    fn before_request(&self, cursor: &Cursor, request: &Request, item: &Item) {
        self.push(
            Event::new("before_request")
                .at(cursor)
                .item(item)
                .detail(request.url.clone()),
        );
    }

    fn request(
        &self,
        error: Option<&TransportError>,
        cursor: &Cursor,
        response: Option<&Response>,
        request: &Request,
        _history: &[HistoryEntry],
    ) {
        let code = response.map_or("-".to_string(), |r| r.code.to_string());
        self.push(
            Event::new("request")
                .at(cursor)
                .error(error)
                .detail(format!("{} {}", code, request.url)),
        );
    }

    fn response_start(&self, cursor: &Cursor, response: &Response, request: &Request) {
        self.push(
            Event::new("response_start")
                .at(cursor)
                .detail(format!("{} {}", response.code, request.url)),
        );
    }

    fn script(&self, error: Option<&ScriptError>, cursor: &Cursor, execution: &ScriptExecution) {
        self.push(
            Event::new("script")
                .at(cursor)
                .error(error)
                .detail(execution.script_id.clone()),
        );
    }

    fn console(&self, cursor: &Cursor, _level: ConsoleLevel, args: &[Value]) {
        let text = args
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        self.push(Event::new("console").at(cursor).detail(text));
    }

    fn exception(&self, cursor: &Cursor, error: &ScriptError) {
        self.push(Event::new("exception").at(cursor).error(Some(error)));
    }

    fn assertion(&self, cursor: &Cursor, assertions: &[Assertion]) {
        let names = assertions
            .iter()
            .map(|a| format!("{}={}", a.name, if a.passed { "pass" } else { "fail" }))
            .collect::<Vec<_>>()
            .join(",");
        self.push(Event::new("assertion").at(cursor).detail(names));
    }

    fn pause(&self, cursor: &Cursor) {
        self.push(Event::new("pause").at(cursor));
    }

    fn resume(&self, cursor: &Cursor) {
        self.push(Event::new("resume").at(cursor));
    }

    fn abort(&self, error: Option<&RunError>) {
        self.push(Event::new("abort").error(error));
    }

    fn done(&self, error: Option<&RunError>) {
        self.push(Event::new("done").error(error));
    }
}
