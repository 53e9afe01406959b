// src/exec/host.rs

//! The script host seam.
//!
//! A host executes one script per call. It is shared by reference between a
//! run and every nested run it spawns; [`HostHandle`] serialises calls made
//! by one run level so the host never sees two scripts from the same level
//! at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::collection::{Item, Request, Script};
use crate::engine::cursor::Cursor;
use crate::engine::nested::NestedExecutor;
use crate::engine::observer::ConsoleSink;
use crate::errors::ScriptError;
use crate::exec::BoxFuture;
use crate::exec::requester::Response;
use crate::types::Listen;
use crate::variables::{ScopeMutations, ScopeSet};

/// `setNextRequest` signal returned by a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextRequest {
    /// End the current iteration.
    Stop,
    /// Jump to the item with this id or name.
    Item(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub name: String,
    pub passed: bool,
    pub skipped: bool,
    pub error: Option<String>,
}

impl Assertion {
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            skipped: false,
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            skipped: false,
            error: Some(error.into()),
        }
    }
}

/// What a host reports after running one script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptResult {
    /// Variable writes, per scope, in the order the script made them.
    pub mutations: ScopeMutations,
    /// Replacement request (prerequest scripts may edit it).
    pub request: Option<Request>,
    pub next_request: Option<NextRequest>,
    pub assertions: Vec<Assertion>,
    pub return_value: Option<Value>,
}

/// State visible to the script.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    pub listen: Listen,
    pub item: Arc<Item>,
    pub request: Request,
    pub response: Option<Response>,
    pub scopes: ScopeSet,
    pub cursor: Cursor,
}

/// Set when the run has moved on from a script invocation (timeout, abort).
/// Anything the invocation produces afterwards is discarded.
#[derive(Debug, Clone, Default)]
pub struct SkipFlag(Arc<AtomicBool>);

impl SkipFlag {
    pub fn mark(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_skipped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct ScriptInvocation {
    pub script: Script,
    pub context: ScriptContext,
    pub timeout: Option<Duration>,
    pub console: ConsoleSink,
    /// Entry point for nested request execution from this script.
    pub nested: NestedExecutor,
    pub skip: SkipFlag,
}

pub trait ScriptHost: Send + Sync {
    fn execute(&self, invocation: ScriptInvocation) -> BoxFuture<'_, Result<ScriptResult, ScriptError>>;

    /// Clear timers and intervals registered by scripts.
    fn clear_timers(&self) {}

    /// Release the underlying sandbox.
    fn dispose(&self) {}
}

/// Shared reference to a script host plus the execution slot of one run
/// level.
#[derive(Clone)]
pub struct HostHandle {
    host: Arc<dyn ScriptHost>,
    slot: Arc<Mutex<()>>,
    owned: bool,
}

impl std::fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHandle")
            .field("owned", &self.owned)
            .finish_non_exhaustive()
    }
}

impl HostHandle {
    /// Handle that owns the host: the run disposes it when it terminates.
    pub fn owned(host: Arc<dyn ScriptHost>) -> Self {
        Self {
            host,
            slot: Arc::new(Mutex::new(())),
            owned: true,
        }
    }

    /// Handle that borrows the host: disposal is left to the caller.
    pub fn borrowed(host: Arc<dyn ScriptHost>) -> Self {
        Self {
            owned: false,
            ..Self::owned(host)
        }
    }

    /// Same host, new execution slot, never disposes. Used for nested runs.
    pub fn shared(&self) -> Self {
        Self::borrowed(Arc::clone(&self.host))
    }

    pub async fn execute(&self, invocation: ScriptInvocation) -> Result<ScriptResult, ScriptError> {
        let _slot = self.slot.lock().await;
        self.host.execute(invocation).await
    }

    pub fn clear_timers(&self) {
        self.host.clear_timers();
    }

    pub fn dispose(&self) {
        if self.owned {
            self.host.dispose();
        }
    }
}
