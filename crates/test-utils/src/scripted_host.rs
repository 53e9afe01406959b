//! A script host that interprets a tiny line-based language instead of
//! JavaScript. One command per line:
//!
//! ```text
//! set <scope> <key> <value>    # value is JSON if it parses, else a string; {{vars}} expand
//! unset <scope> <key>
//! clear <scope>
//! record <key>                 # remember the resolved value of <key>
//! throw <message>
//! next <item>|null             # setNextRequest
//! sleep <millis>
//! hang                         # never finish
//! run <request-id> [k=v ...]   # nested execution with local overrides
//! assert <name> pass|fail
//! log <message>
//! header <key> <value>         # replace the request, adding a header
//! url <value>                  # replace the request url
//! ```
//!
//! Scopes: `local`, `data`, `collection`, `environment`, `globals`.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use runwright::collection::Header;
use runwright::engine::NestedRequest;
use runwright::errors::ScriptError;
use runwright::exec::{
    Assertion, BoxFuture, NextRequest, ScriptHost, ScriptInvocation, ScriptResult,
};
use runwright::types::{ConsoleLevel, Listen};
use runwright::variables::{ScopeName, Substitutor, VariableMutation, VariableScope};
use serde_json::Value;

/// One script execution as seen by the host.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub script_id: String,
    pub listen: Listen,
    pub item: String,
    pub iteration: usize,
    pub position: usize,
    pub url: String,
    pub response_code: Option<u16>,
}

/// Result of a `run` line.
#[derive(Debug, Clone)]
pub struct NestedCall {
    pub script_id: String,
    pub request_id: String,
    /// Nesting depth of the run whose script issued the call.
    pub caller_depth: usize,
    pub response_code: Option<u16>,
    pub exception: Option<String>,
    /// Child run error, or the dispatcher's refusal.
    pub error: Option<String>,
    /// Whether the dispatcher refused before running anything.
    pub rejected: bool,
}

#[derive(Debug, Default)]
pub struct ScriptedHost {
    invocations: Mutex<Vec<Invocation>>,
    recorded: Mutex<Vec<(String, Option<String>)>>,
    nested: Mutex<Vec<NestedCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    clear_timers: AtomicUsize,
    disposed: AtomicUsize,
}

fn scope_name(name: &str) -> Result<ScopeName, ScriptError> {
    match name {
        "local" => Ok(ScopeName::Local),
        "data" => Ok(ScopeName::Data),
        "collection" => Ok(ScopeName::CollectionVariables),
        "environment" => Ok(ScopeName::Environment),
        "globals" => Ok(ScopeName::Globals),
        other => Err(ScriptError::Host(format!("unknown scope '{other}'"))),
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn split2(rest: &str) -> (&str, &str) {
    let rest = rest.trim();
    match rest.split_once(' ') {
        Some((a, b)) => (a, b.trim()),
        None => (rest, ""),
    }
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Script ids in execution order.
    pub fn script_ids(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.script_id).collect()
    }

    /// `(key, value)` pairs remembered by `record` lines.
    pub fn recorded(&self) -> Vec<(String, Option<String>)> {
        self.recorded.lock().unwrap().clone()
    }

    /// Values remembered for one key, in order.
    pub fn recorded_values(&self, key: &str) -> Vec<Option<String>> {
        self.recorded()
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn nested_calls(&self) -> Vec<NestedCall> {
        self.nested.lock().unwrap().clone()
    }

    /// Most scripts this host ever ran at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn clear_timers_calls(&self) -> usize {
        self.clear_timers.load(Ordering::SeqCst)
    }

    pub fn dispose_calls(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    async fn interpret(&self, invocation: ScriptInvocation) -> Result<ScriptResult, ScriptError> {
        let ScriptInvocation {
            script,
            context,
            console,
            nested,
            ..
        } = invocation;

        self.invocations.lock().unwrap().push(Invocation {
            script_id: script.id.clone(),
            listen: context.listen,
            item: context.item.label().to_string(),
            iteration: context.cursor.iteration(),
            position: context.cursor.position(),
            url: context.request.url.clone(),
            response_code: context.response.as_ref().map(|r| r.code),
        });

        let mut scopes = context.scopes.clone();
        let mut request = context.request.clone();
        let mut result = ScriptResult::default();

        for line in script.exec.iter().flat_map(|l| l.lines()) {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (command, rest) = split2(line);

            match command {
                "set" => {
                    let (scope, rest) = split2(rest);
                    let (key, value) = split2(rest);
                    let scope = scope_name(scope)?;
                    let value = parse_value(&Substitutor::new(&scopes).substitute(value));
                    let mutation = VariableMutation::Set {
                        key: key.to_string(),
                        value,
                    };
                    scopes.scope_mut(scope).apply(std::slice::from_ref(&mutation));
                    result.mutations.push(scope, mutation);
                }
                "unset" => {
                    let (scope, key) = split2(rest);
                    let scope = scope_name(scope)?;
                    scopes.scope_mut(scope).unset(key);
                    result.mutations.unset(scope, key);
                }
                "clear" => {
                    let scope = scope_name(rest)?;
                    scopes.scope_mut(scope).clear();
                    result.mutations.push(scope, VariableMutation::Clear);
                }
                "record" => {
                    let value = Substitutor::new(&scopes).lookup(rest);
                    self.recorded.lock().unwrap().push((rest.to_string(), value));
                }
                "throw" => return Err(ScriptError::thrown(rest)),
                "next" => {
                    result.next_request = Some(match rest {
                        "null" => NextRequest::Stop,
                        target => NextRequest::Item(target.to_string()),
                    });
                }
                "sleep" => {
                    let millis = rest
                        .parse::<u64>()
                        .map_err(|e| ScriptError::Host(format!("bad sleep '{rest}': {e}")))?;
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                }
                "hang" => std::future::pending::<()>().await,
                "run" => {
                    let mut parts = rest.split_whitespace();
                    let request_id = parts.next().unwrap_or_default().to_string();
                    let overrides = VariableScope::from_pairs(parts.filter_map(|kv| {
                        kv.split_once('=').map(|(k, v)| (k.to_string(), parse_value(v)))
                    }));
                    let call = NestedRequest::new(request_id.clone())
                        .with_overrides(overrides)
                        .with_in_flight(scopes.clone());

                    let mut record = NestedCall {
                        script_id: script.id.clone(),
                        request_id,
                        caller_depth: nested.depth(),
                        response_code: None,
                        exception: None,
                        error: None,
                        rejected: false,
                    };
                    match nested.execute(call).await {
                        Ok(outcome) => {
                            scopes.apply(&outcome.mutations);
                            result.mutations.extend(outcome.mutations);
                            record.response_code = outcome.response.map(|r| r.code);
                            record.exception = outcome.exception.map(|e| e.to_string());
                            record.error = outcome.error;
                        }
                        Err(err) => {
                            console.warn(err.to_string());
                            record.error = Some(err.to_string());
                            record.rejected = true;
                        }
                    }
                    self.nested.lock().unwrap().push(record);
                }
                "assert" => {
                    let (name, verdict) = split2(rest);
                    result.assertions.push(match verdict {
                        "pass" => Assertion::passed(name),
                        _ => Assertion::failed(name, "assertion failed"),
                    });
                }
                "log" => console.log(ConsoleLevel::Log, rest),
                "header" => {
                    let (key, value) = split2(rest);
                    request.headers.push(Header::new(key, value));
                    result.request = Some(request.clone());
                }
                "url" => {
                    request.url = rest.to_string();
                    result.request = Some(request.clone());
                }
                other => {
                    return Err(ScriptError::Host(format!("unknown command '{other}'")));
                }
            }
        }

        Ok(result)
    }
}

/// Decrements the in-flight counter however the script ends.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptHost for ScriptedHost {
    fn execute(
        &self,
        invocation: ScriptInvocation,
    ) -> BoxFuture<'_, Result<ScriptResult, ScriptError>> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);
            self.interpret(invocation).await
        })
    }

    fn clear_timers(&self) {
        self.clear_timers.fetch_add(1, Ordering::SeqCst);
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}
