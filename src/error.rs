//! Error taxonomy for the engine.

use crate::future::FutureId;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Closed taxonomy of engine-level failures.
///
/// Only [`EngineError::TaskBody`] is recoverable per-branch: it marks the
/// originating future FAILED and poisons its transitive dependents with
/// [`EngineError::UpstreamTaskFailed`]. Every other variant ends the whole
/// run.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// DAG validation found a cycle; `path` is one concrete example cycle.
    #[error("cycle detected: {}", format_path(.0))]
    CycleDetected(Vec<FutureId>),

    /// A task name was registered twice without `allow_redefine`.
    #[error("task {0:?} already registered")]
    TaskRedefined(String),

    /// Attached to a SKIPPED future whose dependency failed or was skipped.
    /// Never raised by user code directly.
    #[error("upstream future {0:?} failed or was skipped")]
    UpstreamTaskFailed(FutureId),

    /// The runner's battery guard tripped below the critical threshold.
    #[error("battery level too low to continue: {reading}%")]
    BatteryLevelLow {
        /// The battery reading, in percent, that triggered the abort.
        reading: u8,
    },

    /// Raised by any task-facing collaborator while the offline guard is
    /// active.
    #[error("network access denied by offline guard")]
    NetworkDisabled,

    /// Wraps a task body's own error, preserving its message and source
    /// chain via `anyhow`.
    #[error("task body failed: {0}")]
    TaskBody(#[from] crate::task::TaskBodyError),

    /// The per-run wall-clock deadline elapsed before all futures settled.
    #[error("run exceeded its deadline")]
    DeadlineExceeded,

    /// The run was cancelled before all futures settled.
    #[error("run was cancelled: {0}")]
    Cancelled(String),

    /// An argument or node referenced by an edge is missing from the graph.
    #[error("dangling reference to future {0:?}")]
    DanglingReference(FutureId),

    /// A capability the core deliberately does not implement (e.g. dynamic
    /// workflow-module loading); see `workflow::load_workflow_module`.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A downcast of a type-erased argument failed at dispatch time.
    #[error("argument type mismatch for task {task}: {detail}")]
    ArgTypeMismatch {
        /// Name of the task whose argument failed to downcast.
        task: String,
        /// Human-readable description of the mismatch.
        detail: String,
    },
}

fn format_path(path: &[FutureId]) -> String {
    path.iter()
        .map(|id| id.0.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
