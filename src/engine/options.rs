// src/engine/options.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::collection::Collection;
use crate::exec::{
    HostHandle, ProxyResolver, RequestResolver, Requester, SecretResolver, SystemProxyResolver,
};
use crate::fs::FileResolver;
use crate::pipeline::{AuthRegistry, CertificateList, ProxyList};
use crate::variables::VariableScope;

use super::controller::RunController;

/// Nested runs deeper than this are rejected.
pub const MAX_NESTING_DEPTH: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    /// Per script invocation; expiry is a recoverable script error.
    pub script: Option<Duration>,
    /// Whole run; expiry aborts the run with "callback timed out".
    pub global: Option<Duration>,
    /// Forwarded to the requester.
    pub request: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub iteration_count: usize,
    /// Per-iteration data rows; the last row repeats once exhausted.
    pub data: Vec<VariableScope>,
    pub stop_on_error: bool,
    pub abort_on_error: bool,
    pub timeout: Timeouts,
    /// Run iterations concurrently with at most this many in flight.
    pub parallel: Option<usize>,
    pub verbose: bool,
    pub proxies: ProxyList,
    pub certificates: CertificateList,
    /// 0 for a top-level run.
    pub nesting_depth: usize,
    pub environment: VariableScope,
    pub globals: VariableScope,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            iteration_count: 1,
            data: Vec::new(),
            stop_on_error: false,
            abort_on_error: false,
            timeout: Timeouts::default(),
            parallel: None,
            verbose: false,
            proxies: ProxyList::default(),
            certificates: CertificateList::default(),
            nesting_depth: 0,
            environment: VariableScope::new(),
            globals: VariableScope::new(),
        }
    }
}

impl RunOptions {
    /// Number of iterations to run, at least one.
    pub fn cycles(&self) -> usize {
        self.iteration_count.max(1)
    }

    /// Data row for `iteration`.
    pub fn data_row(&self, iteration: usize) -> VariableScope {
        match self.data.len() {
            0 => VariableScope::new(),
            len => self.data[iteration.min(len - 1)].clone(),
        }
    }

    /// Partition count in parallel mode, `None` for a sequential run.
    pub fn partitions(&self) -> Option<usize> {
        self.parallel.filter(|n| *n > 0)
    }
}

/// Builds the controller for a nested run.
pub type ControllerFactory =
    Arc<dyn Fn(Collection, RunOptions, Collaborators) -> RunController + Send + Sync>;

/// External collaborators of a run.
#[derive(Clone)]
pub struct Collaborators {
    pub requester: Arc<dyn Requester>,
    pub host: HostHandle,
    pub auth: Arc<AuthRegistry>,
    pub files: Option<Arc<dyn FileResolver>>,
    pub secrets: Option<Arc<dyn SecretResolver>>,
    pub request_resolver: Option<Arc<dyn RequestResolver>>,
    pub system_proxy: Option<Arc<dyn SystemProxyResolver>>,
    /// Replaces the static proxy list from the options when set.
    pub proxy_resolver: Option<Arc<dyn ProxyResolver>>,
    pub controller_factory: ControllerFactory,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("host", &self.host)
            .field("auth", &self.auth)
            .field("files", &self.files)
            .field("secrets", &self.secrets.is_some())
            .field("request_resolver", &self.request_resolver.is_some())
            .field("system_proxy", &self.system_proxy.is_some())
            .finish_non_exhaustive()
    }
}

impl Collaborators {
    pub fn new(requester: Arc<dyn Requester>, host: HostHandle) -> Self {
        Self {
            requester,
            host,
            auth: Arc::new(AuthRegistry::with_defaults()),
            files: None,
            secrets: None,
            request_resolver: None,
            system_proxy: None,
            proxy_resolver: None,
            controller_factory: Arc::new(RunController::new),
        }
    }

    pub fn with_auth(mut self, auth: AuthRegistry) -> Self {
        self.auth = Arc::new(auth);
        self
    }

    pub fn with_files(mut self, files: Arc<dyn FileResolver>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretResolver>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn with_request_resolver(mut self, resolver: Arc<dyn RequestResolver>) -> Self {
        self.request_resolver = Some(resolver);
        self
    }

    pub fn with_system_proxy(mut self, resolver: Arc<dyn SystemProxyResolver>) -> Self {
        self.system_proxy = Some(resolver);
        self
    }

    pub fn with_proxy_resolver(mut self, resolver: Arc<dyn ProxyResolver>) -> Self {
        self.proxy_resolver = Some(resolver);
        self
    }

    pub fn with_controller_factory(mut self, factory: ControllerFactory) -> Self {
        self.controller_factory = factory;
        self
    }

    /// Collaborators for a nested run: everything shared, host included,
    /// but the child never disposes the host.
    pub fn for_child(&self) -> Self {
        Self {
            host: self.host.shared(),
            ..self.clone()
        }
    }
}
