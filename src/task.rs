//! Task registry: wraps pure functions so that calling them records a graph
//! node instead of executing immediately.

use crate::error::{EngineError, EngineResult};
use crate::future::{Arg, ArgSlot, FutureId, RawFuture, TaskFuture};
use crate::value::{downcast, ArgValue};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Wraps any error a task body returns, preserving its message and source
/// chain. Wrapped in `Arc` so the error can be cloned into every
/// transitively-dependent SKIPPED future.
#[derive(Error, Clone)]
#[error("{0}")]
pub struct TaskBodyError(pub Arc<anyhow::Error>);

impl fmt::Debug for TaskBodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl TaskBodyError {
    pub fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}

/// Stable digest of a task's identity, folded into cache keys alongside the
/// digest of its resolved arguments.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskFingerprint(pub [u8; 32]);

impl fmt::Debug for TaskFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskFingerprint({})", hex::encode(self.0))
    }
}

impl TaskFingerprint {
    fn new(name: &str, version: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(version.as_bytes());
        Self(hasher.finalize().into())
    }
}

/// Type-erased task, dispatched by the runner with already-resolved
/// arguments (raw values or upstream results, never a `Future`).
pub trait TaskObject: Send + Sync {
    fn name(&self) -> &str;
    fn fingerprint(&self) -> TaskFingerprint;
    fn invoke(&self, args: &[Arc<dyn ArgValue>]) -> Result<Arc<dyn ArgValue>, TaskBodyError>;

    /// Reconstruct a cached result from its persisted JSON bytes. Only the
    /// task knows its concrete return type, so this is where a cache hit
    /// is turned back into a typed `Arc<dyn ArgValue>`.
    fn result_from_cache_bytes(&self, bytes: &[u8]) -> Result<Arc<dyn ArgValue>, TaskBodyError>;
}

struct TaskMeta {
    name: String,
    fingerprint: TaskFingerprint,
}

macro_rules! impl_task_arity {
    ($task_ty:ident, [$($a:ident : $na:ident),*]) => {
        /// A registered task wrapper. Calling it does not execute the
        /// underlying function; it allocates a future node and returns a
        /// handle to it.
        pub struct $task_ty<$($a: ArgValue + Clone,)* R: ArgValue + Clone + serde::de::DeserializeOwned> {
            meta: Arc<TaskMeta>,
            func: Arc<dyn Fn($($a),*) -> anyhow::Result<R> + Send + Sync>,
        }

        impl<$($a: ArgValue + Clone,)* R: ArgValue + Clone + serde::de::DeserializeOwned> Clone for $task_ty<$($a,)* R> {
            fn clone(&self) -> Self {
                Self { meta: self.meta.clone(), func: self.func.clone() }
            }
        }

        impl<$($a: ArgValue + Clone,)* R: ArgValue + Clone + serde::de::DeserializeOwned> fmt::Debug for $task_ty<$($a,)* R> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($task_ty)).field("name", &self.meta.name).finish()
            }
        }

        impl<$($a: ArgValue + Clone,)* R: ArgValue + Clone + serde::de::DeserializeOwned> TaskObject for $task_ty<$($a,)* R> {
            fn name(&self) -> &str {
                &self.meta.name
            }

            fn fingerprint(&self) -> TaskFingerprint {
                self.meta.fingerprint
            }

            #[allow(unused_variables, unused_mut, unused_assignments)]
            fn invoke(&self, args: &[Arc<dyn ArgValue>]) -> Result<Arc<dyn ArgValue>, TaskBodyError> {
                let mut idx = 0;
                $(
                    let $na: $a = downcast(&args[idx], &self.meta.name)
                        .map_err(|e| TaskBodyError::new(anyhow::anyhow!(e)))?;
                    idx += 1;
                )*
                (self.func)($($na),*)
                    .map(|v| Arc::new(v) as Arc<dyn ArgValue>)
                    .map_err(TaskBodyError::new)
            }

            fn result_from_cache_bytes(&self, bytes: &[u8]) -> Result<Arc<dyn ArgValue>, TaskBodyError> {
                serde_json::from_slice::<R>(bytes)
                    .map(|v| Arc::new(v) as Arc<dyn ArgValue>)
                    .map_err(|e| TaskBodyError::new(anyhow::anyhow!(e)))
            }
        }

        impl<$($a: ArgValue + Clone + 'static,)* R: ArgValue + Clone + serde::de::DeserializeOwned + 'static> $task_ty<$($a,)* R> {
            #[allow(clippy::too_many_arguments)]
            pub fn call(&self, $($na: impl Into<Arg<$a>>),*) -> TaskFuture<R> {
                #[allow(unused_mut)]
                let mut args = Vec::new();
                $(
                    args.push(match $na.into() {
                        Arg::Value(v) => ArgSlot::Value(Arc::new(v)),
                        Arg::Future(f) => ArgSlot::FutureRef(f.erased()),
                    });
                )*
                let raw = RawFuture::new(Arc::new(self.clone()), args, Vec::new());
                TaskFuture::from_raw(raw)
            }
        }
    };
}

impl_task_arity!(Task0, []);
impl_task_arity!(Task1, [A: a]);
impl_task_arity!(Task2, [A: a, B: b]);

/// Registry mapping task names to their fingerprints, enforcing the
/// one-to-one `name -> task` invariant.
pub struct TaskRegistry {
    names: Mutex<HashMap<String, TaskFingerprint>>,
    allow_redefine: bool,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            names: Mutex::new(HashMap::new()),
            allow_redefine: false,
        }
    }

    /// A registry that permits redefining an existing task name, for use in
    /// tests that re-register tasks across cases.
    pub fn with_allow_redefine() -> Self {
        Self {
            names: Mutex::new(HashMap::new()),
            allow_redefine: true,
        }
    }

    fn reserve(&self, name: &str, fingerprint: TaskFingerprint) -> EngineResult<()> {
        let mut names = self.names.lock().expect("task registry mutex poisoned");
        if names.contains_key(name) && !self.allow_redefine {
            return Err(EngineError::TaskRedefined(name.to_string()));
        }
        names.insert(name.to_string(), fingerprint);
        Ok(())
    }

    pub fn register0<R: ArgValue + Clone + serde::de::DeserializeOwned + 'static>(
        &self,
        name: &str,
        f: impl Fn() -> anyhow::Result<R> + Send + Sync + 'static,
    ) -> EngineResult<Task0<R>> {
        self.register0_versioned(name, "", f)
    }

    pub fn register0_versioned<R: ArgValue + Clone + serde::de::DeserializeOwned + 'static>(
        &self,
        name: &str,
        version: &str,
        f: impl Fn() -> anyhow::Result<R> + Send + Sync + 'static,
    ) -> EngineResult<Task0<R>> {
        let fingerprint = TaskFingerprint::new(name, version);
        self.reserve(name, fingerprint)?;
        Ok(Task0 {
            meta: Arc::new(TaskMeta {
                name: name.to_string(),
                fingerprint,
            }),
            func: Arc::new(f),
        })
    }

    pub fn register1<A: ArgValue + Clone + 'static, R: ArgValue + Clone + serde::de::DeserializeOwned + 'static>(
        &self,
        name: &str,
        f: impl Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
    ) -> EngineResult<Task1<A, R>> {
        self.register1_versioned(name, "", f)
    }

    pub fn register1_versioned<A: ArgValue + Clone + 'static, R: ArgValue + Clone + serde::de::DeserializeOwned + 'static>(
        &self,
        name: &str,
        version: &str,
        f: impl Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
    ) -> EngineResult<Task1<A, R>> {
        let fingerprint = TaskFingerprint::new(name, version);
        self.reserve(name, fingerprint)?;
        Ok(Task1 {
            meta: Arc::new(TaskMeta {
                name: name.to_string(),
                fingerprint,
            }),
            func: Arc::new(f),
        })
    }

    pub fn register2<
        A: ArgValue + Clone + 'static,
        B: ArgValue + Clone + 'static,
        R: ArgValue + Clone + serde::de::DeserializeOwned + 'static,
    >(
        &self,
        name: &str,
        f: impl Fn(A, B) -> anyhow::Result<R> + Send + Sync + 'static,
    ) -> EngineResult<Task2<A, B, R>> {
        self.register2_versioned(name, "", f)
    }

    pub fn register2_versioned<
        A: ArgValue + Clone + 'static,
        B: ArgValue + Clone + 'static,
        R: ArgValue + Clone + serde::de::DeserializeOwned + 'static,
    >(
        &self,
        name: &str,
        version: &str,
        f: impl Fn(A, B) -> anyhow::Result<R> + Send + Sync + 'static,
    ) -> EngineResult<Task2<A, B, R>> {
        let fingerprint = TaskFingerprint::new(name, version);
        self.reserve(name, fingerprint)?;
        Ok(Task2 {
            meta: Arc::new(TaskMeta {
                name: name.to_string(),
                fingerprint,
            }),
            func: Arc::new(f),
        })
    }
}

/// An identifier into [`TaskRegistry`] for introspection, e.g. by a
/// monitoring UI that wants a task's name without holding its typed handle.
pub fn id_of<T: ArgValue + Clone>(future: &TaskFuture<T>) -> FutureId {
    future.id()
}
