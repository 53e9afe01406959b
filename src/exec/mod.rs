// src/exec/mod.rs

//! Collaborator interfaces consumed by the run controller.
//!
//! The crate never sends HTTP itself and never executes script code; both
//! are plugged in through the traits here so tests (and embedders) can swap
//! them freely.
//!
//! - [`requester`] is the HTTP seam ([`Requester`]).
//! - [`host`] is the script host seam ([`ScriptHost`]) plus [`HostHandle`],
//!   which shares one host between a run and its nested runs.
//! - [`resolvers`] holds the secret, request and proxy resolver traits.
//! - [`offline`] provides `EchoRequester` and `PassiveHost`, used by the CLI
//!   when no real transport or sandbox is wired in.

use std::future::Future;
use std::pin::Pin;

pub mod host;
pub mod offline;
pub mod requester;
pub mod resolvers;

pub use host::{
    Assertion, HostHandle, NextRequest, ScriptContext, ScriptHost, ScriptInvocation, ScriptResult,
    SkipFlag,
};
pub use offline::{EchoRequester, PassiveHost};
pub use requester::{
    HistoryEntry, RequestOptions, RequestOutcome, Requester, Response, ResponseStartHook,
};
pub use resolvers::{
    ProxyResolver, RequestResolver, SecretRequest, SecretResolution, SecretResolver,
    SystemProxyResolver,
};

/// Boxed, sendable future returned by every collaborator method.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
