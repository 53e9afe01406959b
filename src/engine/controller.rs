// src/engine/controller.rs

//! The run controller.
//!
//! [`RunController`] owns everything a run needs and, once started, drives
//! iterations and items until traversal ends, the stop policy ends the run,
//! or the run is aborted. [`RunHandle`] is the control surface of a run
//! started in the background.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::collection::{Collection, FlatItem, flatten};
use crate::engine::control::{Halt, RunControl};
use crate::engine::cursor::{Advance, Cursor};
use crate::engine::item::ItemOutcome;
use crate::engine::nested::NestedDispatcher;
use crate::engine::observer::{ConsoleSink, Observer};
use crate::engine::options::{Collaborators, RunOptions};
use crate::engine::partition::PartitionManager;
use crate::errors::{Result, RunError};
use crate::exec::{ProxyResolver, RequestOptions};
use crate::pipeline::StageContext;
use crate::types::Lifecycle;
use crate::variables::{ScopeMutations, ScopeName, ScopeSet};

/// Final state of a run.
#[derive(Debug)]
pub struct RunReport {
    /// Iterations whose `before_iteration` fired, ascending.
    pub iterations_started: Vec<usize>,
    /// Iterations whose `iteration` trigger fired, ascending.
    pub iterations_completed: Vec<usize>,
    pub items_completed: usize,
    /// The error handed to `done`.
    pub error: Option<RunError>,
    pub lifecycle: Lifecycle,
    /// Shared variable state after the run (partitions merged).
    pub scopes: ScopeSet,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.lifecycle == Lifecycle::Done
    }
}

pub struct RunController {
    items: Vec<FlatItem>,
    options: RunOptions,
    collaborators: Collaborators,
    scopes: ScopeSet,
    control: Arc<RunControl>,
}

impl fmt::Debug for RunController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunController")
            .field("items", &self.items.len())
            .field("options", &self.options)
            .field("lifecycle", &self.control.lifecycle())
            .finish_non_exhaustive()
    }
}

impl RunController {
    pub fn new(collection: Collection, options: RunOptions, collaborators: Collaborators) -> Self {
        let items = flatten(&collection);
        let scopes = ScopeSet::new(
            collection.variables,
            options.environment.clone(),
            options.globals.clone(),
        );
        Self {
            items,
            options,
            collaborators,
            scopes,
            control: Arc::new(RunControl::new()),
        }
    }

    /// Start from these scopes instead of the collection variables and the
    /// environment/globals in the options.
    pub fn with_scopes(mut self, scopes: ScopeSet) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn items(&self) -> &[FlatItem] {
        &self.items
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.control.lifecycle()
    }

    /// Release the host without running. A no-op for borrowed hosts.
    pub fn dispose(self) {
        self.collaborators.host.dispose();
    }

    /// Spawn the run in the background.
    pub fn start(self, observer: Arc<dyn Observer>) -> RunHandle {
        let control = Arc::clone(&self.control);
        let task = tokio::spawn(self.run(observer));
        RunHandle { control, task }
    }

    /// Run to completion.
    pub async fn run(self, observer: Arc<dyn Observer>) -> RunReport {
        let RunController {
            items,
            options,
            collaborators,
            scopes,
            control,
        } = self;

        let base = Cursor::new(items.len(), options.cycles());
        let console = ConsoleSink::new(Arc::clone(&observer), control.subscribe(), base.clone());
        let proxies: Option<Arc<dyn ProxyResolver>> = match &collaborators.proxy_resolver {
            Some(resolver) => Some(Arc::clone(resolver)),
            None if !options.proxies.is_empty() => Some(Arc::new(options.proxies.clone())),
            None => None,
        };
        let stages = StageContext {
            auth: Arc::clone(&collaborators.auth),
            files: collaborators.files.clone(),
            secrets: collaborators.secrets.clone(),
            system_proxy: collaborators.system_proxy.clone(),
            proxies,
            certificates: Arc::new(options.certificates.clone()),
            console,
        };
        let request_options = RequestOptions {
            timeout: options.timeout.request,
            verbose: options.verbose,
        };
        let partitions = options
            .partitions()
            .map(|_| PartitionManager::new(base.cycles(), scopes.clone()));
        let nested = Arc::new(NestedDispatcher::new(&options, &collaborators));

        let ctx = Arc::new(RunContext {
            items,
            options,
            collaborators,
            control,
            observer,
            stages,
            nested,
            base,
            request_options,
            state: Mutex::new(RunState {
                shared: scopes,
                partitions,
                iterations_started: Vec::new(),
                iterations_completed: Vec::new(),
                items_completed: 0,
            }),
        });
        ctx.execute().await
    }
}

/// Control surface of a run started with [`RunController::start`].
#[derive(Debug)]
pub struct RunHandle {
    control: Arc<RunControl>,
    task: JoinHandle<RunReport>,
}

impl RunHandle {
    /// Pause at the next item boundary.
    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    /// Abort at the next suspension point. `error` is handed to `abort` and
    /// `done`.
    pub fn abort(&self, error: Option<RunError>) -> bool {
        self.control.request_abort(error)
    }

    /// Abort if still running; an owned host is released when the run
    /// reaches its terminal state.
    pub fn dispose(&self) {
        if !self.control.lifecycle().is_terminal() {
            self.control.request_abort(None);
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.control.lifecycle()
    }

    /// Shared control surface, for callers that abort from another task
    /// while `join` is pending.
    pub fn control(&self) -> Arc<RunControl> {
        Arc::clone(&self.control)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<RunReport> {
        self.task
            .await
            .map_err(|err| RunError::Other(anyhow!("run task failed: {err}")))
    }
}

pub(crate) struct RunState {
    pub(crate) shared: ScopeSet,
    pub(crate) partitions: Option<PartitionManager>,
    pub(crate) iterations_started: Vec<usize>,
    pub(crate) iterations_completed: Vec<usize>,
    pub(crate) items_completed: usize,
}

/// Everything a started run shares between its iteration workers.
pub(crate) struct RunContext {
    pub(crate) items: Vec<FlatItem>,
    pub(crate) options: RunOptions,
    pub(crate) collaborators: Collaborators,
    pub(crate) control: Arc<RunControl>,
    pub(crate) observer: Arc<dyn Observer>,
    pub(crate) stages: StageContext,
    pub(crate) nested: Arc<NestedDispatcher>,
    pub(crate) base: Cursor,
    pub(crate) request_options: RequestOptions,
    state: Mutex<RunState>,
}

enum IterationOutcome {
    Completed,
    /// `stop_on_error`: the `iteration` trigger fired with this error.
    Stopped(RunError),
    /// `abort_on_error`: nothing fired for the failing item.
    Aborted(RunError),
    Cancelled,
}

impl RunContext {
    pub(crate) fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Scopes an item of `iteration` starts from.
    pub(crate) fn scopes_for(&self, iteration: usize) -> ScopeSet {
        let mut scopes = {
            let mut state = self.lock();
            let RunState {
                shared, partitions, ..
            } = &mut *state;
            match partitions {
                Some(partitions) => partitions
                    .materialize(iteration)
                    .unwrap_or_else(|| shared.clone()),
                None => shared.clone(),
            }
        };
        if !self.options.data.is_empty() {
            scopes.data = Arc::new(self.options.data_row(iteration));
        }
        scopes
    }

    /// Persist script mutations. Data-row writes only live for the step.
    pub(crate) fn record(&self, iteration: usize, mutations: &ScopeMutations) {
        let persisted = mutations.without(ScopeName::Data);
        if persisted.is_empty() {
            return;
        }
        let mut state = self.lock();
        match state.partitions.as_mut() {
            Some(partitions) => partitions.record(iteration, &persisted),
            None => state.shared.apply(&persisted),
        }
    }

    async fn execute(self: Arc<Self>) -> RunReport {
        self.control.transition(Lifecycle::Running);
        info!(
            run = %self.base.run_ref(),
            items = self.base.length(),
            iterations = self.base.cycles(),
            depth = self.options.nesting_depth,
            parallel = ?self.options.partitions(),
            "run starting"
        );
        self.observer.start(&self.base);

        let drive = self.drive();
        let failure = match self.options.timeout.global {
            Some(limit) => {
                tokio::pin!(drive);
                tokio::select! {
                    failure = &mut drive => failure,
                    _ = tokio::time::sleep(limit) => {
                        warn!(?limit, "global timeout reached; aborting run");
                        self.control.request_abort(Some(RunError::CallbackTimedOut));
                        self.clear_timers();
                        drive.await
                    }
                }
            }
            None => drive.await,
        };

        self.finish(failure)
    }

    async fn drive(self: &Arc<Self>) -> Option<RunError> {
        if self.base.is_empty() {
            debug!("nothing to run");
            return None;
        }
        match self.options.partitions() {
            Some(permits) => self.drive_parallel(permits).await,
            None => self.drive_sequential().await,
        }
    }

    async fn drive_sequential(&self) -> Option<RunError> {
        for iteration in 0..self.base.cycles() {
            if self.control.should_stop() {
                return None;
            }
            match self.run_iteration(iteration).await {
                IterationOutcome::Completed => {}
                IterationOutcome::Stopped(err) | IterationOutcome::Aborted(err) => {
                    return Some(err);
                }
                IterationOutcome::Cancelled => return None,
            }
        }
        None
    }

    async fn drive_parallel(self: &Arc<Self>, permits: usize) -> Option<RunError> {
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut workers = JoinSet::new();

        for iteration in 0..self.base.cycles() {
            if !self.pause_point(&self.base.for_iteration(iteration)).await {
                break;
            }
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
                _ = self.control.cancelled() => None,
            };
            let Some(permit) = permit else { break };
            if self.control.should_stop() {
                break;
            }

            let ctx = Arc::clone(self);
            workers.spawn(async move {
                let _permit = permit;
                (iteration, ctx.run_iteration(iteration).await)
            });
        }

        // The lowest failing iteration decides the run error, as it would
        // in a sequential run.
        let mut failure: Option<(usize, RunError)> = None;
        while let Some(joined) = workers.join_next().await {
            let (iteration, err) = match joined {
                Ok((iteration, IterationOutcome::Stopped(err)))
                | Ok((iteration, IterationOutcome::Aborted(err))) => (iteration, err),
                Ok(_) => continue,
                Err(join_err) => {
                    error!(error = %join_err, "iteration worker failed");
                    (usize::MAX, RunError::Other(anyhow!("iteration worker failed: {join_err}")))
                }
            };
            if failure.as_ref().is_none_or(|(first, _)| iteration < *first) {
                failure = Some((iteration, err));
            }
        }

        let mut state = self.lock();
        if let Some(partitions) = state.partitions.take() {
            partitions.merge_into(&mut state.shared);
            state.partitions = Some(partitions);
        }
        failure.map(|(_, err)| err)
    }

    async fn run_iteration(&self, iteration: usize) -> IterationOutcome {
        let mut cursor = self.base.for_iteration(iteration);
        self.lock().iterations_started.push(iteration);
        self.observer.before_iteration(&cursor);

        loop {
            if !self.pause_point(&cursor).await {
                return IterationOutcome::Cancelled;
            }
            match self.control.halted() {
                Halt::Abrupt => return IterationOutcome::Cancelled,
                Halt::Graceful => break,
                Halt::None => {}
            }

            match self.run_item(&cursor).await {
                ItemOutcome::Cancelled => return IterationOutcome::Cancelled,
                ItemOutcome::Abort(err) => {
                    warn!(iteration, position = cursor.position(), error = %err, "aborting run on error");
                    self.control.halt(Halt::Abrupt);
                    return IterationOutcome::Aborted(err);
                }
                ItemOutcome::Completed {
                    error: Some(err), ..
                } if self.options.stop_on_error => {
                    warn!(iteration, position = cursor.position(), error = %err, "stopping run on error");
                    self.control.halt(Halt::Graceful);
                    self.complete_iteration(Some(&err), &cursor);
                    return IterationOutcome::Stopped(err);
                }
                ItemOutcome::Completed { next_request, .. } => {
                    match cursor.advance(&self.items, next_request.as_ref()) {
                        Advance::Step(next) => cursor = next,
                        Advance::EndIteration => break,
                        Advance::UnknownTarget(target) => {
                            warn!(iteration, target = %target, "next request not found; ending iteration");
                            self.stages
                                .console
                                .at(&cursor)
                                .warn(format!("unable to find next request '{target}'"));
                            break;
                        }
                    }
                }
            }
        }

        self.complete_iteration(None, &cursor);
        IterationOutcome::Completed
    }

    fn complete_iteration(&self, error: Option<&RunError>, cursor: &Cursor) {
        self.observer.iteration(error, cursor);
        self.lock().iterations_completed.push(cursor.iteration());
    }

    /// Item-boundary pause. Returns `false` if the run was aborted instead
    /// of resumed.
    async fn pause_point(&self, cursor: &Cursor) -> bool {
        if self.control.is_aborting() {
            return false;
        }
        if self.control.lifecycle() != Lifecycle::Paused {
            return true;
        }
        if self.control.begin_pause() {
            self.observer.pause(cursor);
        }
        if self.control.wait_while_paused().await {
            self.observer.resume(cursor);
        }
        !self.control.is_aborting()
    }

    /// Timers belong to the top-level run; a nested run shares the host
    /// with a script that is still waiting on it.
    fn clear_timers(&self) {
        if self.options.nesting_depth == 0 {
            self.collaborators.host.clear_timers();
        }
    }

    fn finish(&self, failure: Option<RunError>) -> RunReport {
        self.clear_timers();

        let error = if self.control.is_aborting() {
            let reason = self.control.take_abort_reason().or(failure);
            self.control.transition(Lifecycle::Aborted);
            self.observer.abort(reason.as_ref());
            reason
        } else {
            self.control.transition(Lifecycle::Done);
            failure
        };
        self.observer.done(error.as_ref());
        self.collaborators.host.dispose();

        let mut state = self.lock();
        state.iterations_started.sort_unstable();
        state.iterations_completed.sort_unstable();
        info!(
            run = %self.base.run_ref(),
            lifecycle = %self.control.lifecycle(),
            items = state.items_completed,
            error = ?error.as_ref().map(ToString::to_string),
            "run finished"
        );
        RunReport {
            iterations_started: std::mem::take(&mut state.iterations_started),
            iterations_completed: std::mem::take(&mut state.iterations_completed),
            items_completed: state.items_completed,
            error,
            lifecycle: self.control.lifecycle(),
            scopes: state.shared.clone(),
        }
    }
}
