// src/engine/mod.rs

//! Run engine.
//!
//! This module ties together:
//! - the cursor that walks `iterations x items`
//! - the run controller and its control surface (pause, resume, abort)
//! - the per-item step (prerequest, pipeline, request, test)
//! - nested runs started from scripts
//! - partitioned variable state for parallel iterations
//!
//! [`controller`] is the async shell; [`cursor`] and [`partition`] hold the
//! pure pieces it drives.

pub mod control;
pub mod controller;
pub mod cursor;
mod item;
pub mod nested;
pub mod observer;
pub mod options;
pub mod partition;

pub use control::{Halt, RunControl};
pub use controller::{RunController, RunHandle, RunReport};
pub use cursor::{Advance, Cursor, CursorRef};
pub use nested::{
    NestedDispatcher, NestedExecutor, NestedOutcome, NestedRequest, NestedRunRecord, ParentFrame,
};
pub use observer::{ConsoleSink, NoopObserver, Observer, ScriptExecution, TracingObserver};
pub use options::{Collaborators, ControllerFactory, MAX_NESTING_DEPTH, RunOptions, Timeouts};
pub use partition::{Partition, PartitionManager};
