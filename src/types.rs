use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a single run.
///
/// Transitions are monotonic except `Running` <-> `Paused`. `Aborted` and
/// `Done` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Idle,
    Running,
    Paused,
    Aborting,
    Aborted,
    Done,
}

impl Lifecycle {
    pub fn is_terminal(self) -> bool {
        matches!(self, Lifecycle::Aborted | Lifecycle::Done)
    }

    /// Whether an abort has been requested or completed.
    pub fn is_aborting(self) -> bool {
        matches!(self, Lifecycle::Aborting | Lifecycle::Aborted)
    }

    pub fn can_transition_to(self, next: Lifecycle) -> bool {
        use Lifecycle::{Aborted, Aborting, Done, Idle, Paused, Running};

        match (self, next) {
            (Idle, Running) | (Idle, Aborting) | (Idle, Done) => true,
            (Running, Paused) | (Running, Aborting) | (Running, Done) => true,
            (Paused, Running) | (Paused, Aborting) | (Paused, Done) => true,
            (Aborting, Aborted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lifecycle::Idle => "idle",
            Lifecycle::Running => "running",
            Lifecycle::Paused => "paused",
            Lifecycle::Aborting => "aborting",
            Lifecycle::Aborted => "aborted",
            Lifecycle::Done => "done",
        };
        f.write_str(s)
    }
}

/// Which script event an item listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Listen {
    Prerequest,
    Test,
}

impl fmt::Display for Listen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listen::Prerequest => f.write_str("prerequest"),
            Listen::Test => f.write_str("test"),
        }
    }
}

/// Level of a `console` trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}
