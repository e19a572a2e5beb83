//! A task-graph execution engine for resource-constrained edge
//! environments. Users register pure functions as tasks; calling a task
//! does not execute it, it records a [`future::TaskFuture`] node. Terminal
//! futures are collected into a [`dag::Dag`], validated, and handed to a
//! [`runner::Runner`] that schedules execution across a worker pool while
//! honoring battery/RAM-aware parallelism, a content-addressed
//! [`cache::ResultCache`], and an [`offline_guard::OfflineGuard`] for
//! network-free runs.

pub mod cache;
pub mod config;
pub mod dag;
pub mod error;
pub mod future;
pub mod offline_guard;
pub mod policy;
pub mod runner;
pub mod task;
pub mod value;
pub mod workflow;

pub use cache::{CacheKey, ResultCache};
pub use config::EngineConfig;
pub use dag::Dag;
pub use error::{EngineError, EngineResult};
pub use future::{Arg, FutureId, FutureState, TaskFuture};
pub use offline_guard::{NetworkGate, NetworkPolicy, OfflineGuard};
pub use policy::{AdaptivePolicy, BatteryProbe, PolicyDecision, RamProbe, ResourceReading};
pub use runner::{CancellationToken, RunRecord, Runner};
pub use task::{Task0, Task1, Task2, TaskObject, TaskRegistry};
pub use value::{ArgDigest, ArgValue};
pub use workflow::{load_workflow_module, WorkflowModule};
