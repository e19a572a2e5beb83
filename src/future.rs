//! Futures: placeholders for a task invocation's eventual result.

use crate::error::{EngineError, EngineResult};
use crate::task::TaskObject;
use crate::value::{downcast, ArgValue};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-unique identifier for a [`RawFuture`], also used for deterministic
/// topological tie-breaking via the monotonic counter it's drawn from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FutureId(pub u64);

impl fmt::Debug for FutureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FutureId({})", self.0)
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_future_id() -> FutureId {
    FutureId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Terminal and non-terminal states a future passes through.
///
/// Once a future leaves `Pending` its arguments may no longer change; once
/// it reaches a terminal state (`Completed`, `Failed`, `Skipped`) it never
/// changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl FutureState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FutureState::Completed | FutureState::Failed | FutureState::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FutureState::Pending => "PENDING",
            FutureState::Running => "RUNNING",
            FutureState::Completed => "COMPLETED",
            FutureState::Failed => "FAILED",
            FutureState::Skipped => "SKIPPED",
        }
    }
}

/// An argument slot: either a captured value or a reference to another
/// future whose result will be substituted in at dispatch time.
pub enum ArgSlot {
    Value(Arc<dyn ArgValue>),
    FutureRef(Arc<RawFuture>),
}

impl ArgSlot {
    pub fn dependency(&self) -> Option<Arc<RawFuture>> {
        match self {
            ArgSlot::Value(_) => None,
            ArgSlot::FutureRef(f) => Some(f.clone()),
        }
    }
}

/// Typed argument to a task call: either a literal value or the future of
/// an upstream task. Constructed explicitly (`Arg::Value`/`Arg::Future`)
/// rather than through a blanket `From` to avoid ambiguous conversions.
pub enum Arg<T> {
    Value(T),
    Future(TaskFuture<T>),
}

impl<T: ArgValue> From<TaskFuture<T>> for Arg<T> {
    fn from(f: TaskFuture<T>) -> Self {
        Arg::Future(f)
    }
}

/// Mutable cell inside a [`RawFuture`]; the only part of a future the
/// runner is allowed to write to.
struct FutureCell {
    state: FutureState,
    result: Option<Arc<dyn ArgValue>>,
    error: Option<Arc<EngineError>>,
    cached: bool,
}

/// The type-erased, reference-counted node backing every [`TaskFuture<T>`].
/// Held behind `Arc` so both the typed handle returned to callers and the
/// [`crate::dag::Dag`] that discovers it via `dependencies` share the same
/// storage — there's no separate "arena", the future graph IS the arena.
pub struct RawFuture {
    pub id: FutureId,
    /// Creation order, used to break ties deterministically in the ready
    /// queue and topological sort.
    pub seq: u64,
    pub task: Arc<dyn TaskObject>,
    pub args: Vec<ArgSlot>,
    pub kwargs: Vec<(String, ArgSlot)>,
    /// Dependency futures, derived from `args`/`kwargs` at construction.
    pub dependencies: Vec<Arc<RawFuture>>,
    cell: Mutex<FutureCell>,
    condvar: Condvar,
}

impl RawFuture {
    pub(crate) fn new(
        task: Arc<dyn TaskObject>,
        args: Vec<ArgSlot>,
        kwargs: Vec<(String, ArgSlot)>,
    ) -> Arc<Self> {
        let dependencies = args
            .iter()
            .chain(kwargs.iter().map(|(_, slot)| slot))
            .filter_map(ArgSlot::dependency)
            .collect();
        Arc::new(Self {
            id: next_future_id(),
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            task,
            args,
            kwargs,
            dependencies,
            cell: Mutex::new(FutureCell {
                state: FutureState::Pending,
                result: None,
                error: None,
                cached: false,
            }),
            condvar: Condvar::new(),
        })
    }

    pub fn state(&self) -> FutureState {
        self.cell.lock().state
    }

    pub fn was_cache_hit(&self) -> bool {
        self.cell.lock().cached
    }

    pub fn result_value(&self) -> Option<Arc<dyn ArgValue>> {
        self.cell.lock().result.clone()
    }

    pub fn error_value(&self) -> Option<Arc<EngineError>> {
        self.cell.lock().error.clone()
    }

    /// Transition PENDING -> RUNNING. Called only by the runner.
    pub(crate) fn mark_running(&self) {
        let mut cell = self.cell.lock();
        debug_assert_eq!(cell.state, FutureState::Pending);
        cell.state = FutureState::Running;
    }

    /// Transition RUNNING -> COMPLETED, publishing the result and waking
    /// any callers blocked in `result()`.
    pub(crate) fn mark_completed(&self, value: Arc<dyn ArgValue>, cached: bool) {
        let mut cell = self.cell.lock();
        cell.state = FutureState::Completed;
        cell.result = Some(value);
        cell.cached = cached;
        self.condvar.notify_all();
    }

    /// Transition RUNNING -> FAILED, preserving the originating error.
    pub(crate) fn mark_failed(&self, error: Arc<EngineError>) {
        let mut cell = self.cell.lock();
        cell.state = FutureState::Failed;
        cell.error = Some(error);
        self.condvar.notify_all();
    }

    /// Transition PENDING -> SKIPPED (upstream failure, cancellation, or a
    /// battery/deadline abort cutting the run short).
    pub(crate) fn mark_skipped(&self, error: Arc<EngineError>) {
        let mut cell = self.cell.lock();
        cell.state = FutureState::Skipped;
        cell.error = Some(error);
        self.condvar.notify_all();
    }

    /// Block the calling thread until this future reaches a terminal state.
    pub fn wait_terminal(&self) -> FutureState {
        let mut cell = self.cell.lock();
        while !cell.state.is_terminal() {
            self.condvar.wait(&mut cell);
        }
        cell.state
    }
}

static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// A typed handle to a [`RawFuture`]. Cheap to clone; all clones refer to
/// the same underlying node.
pub struct TaskFuture<T> {
    pub(crate) inner: Arc<RawFuture>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("id", &self.inner.id)
            .field("task", &self.inner.task.name())
            .field("state", &self.inner.state())
            .finish()
    }
}

impl<T: ArgValue + Clone> TaskFuture<T> {
    pub(crate) fn from_raw(inner: Arc<RawFuture>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> FutureId {
        self.inner.id
    }

    pub fn state(&self) -> FutureState {
        self.inner.state()
    }

    /// Block until this future is COMPLETED, FAILED, or SKIPPED and return
    /// its value or re-raise the stored error.
    pub fn result(&self) -> EngineResult<T> {
        match self.inner.wait_terminal() {
            FutureState::Completed => {
                let value = self
                    .inner
                    .result_value()
                    .expect("COMPLETED future without a stored result");
                downcast(&value, self.inner.task.name())
            }
            FutureState::Failed | FutureState::Skipped => {
                let err = self
                    .inner
                    .error_value()
                    .expect("terminal non-completed future without a stored error");
                Err((*err).clone())
            }
            other => unreachable!("wait_terminal returned a non-terminal state {other:?}"),
        }
    }

    /// Erase the value type, keeping only the graph node — used to collect
    /// heterogeneous terminal futures into a [`crate::dag::Dag`].
    pub fn erased(&self) -> Arc<RawFuture> {
        self.inner.clone()
    }
}
