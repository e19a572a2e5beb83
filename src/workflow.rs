//! Workflow module contract: a loadable unit exposing terminal futures to
//! run. Dynamic loading from a path or `module:function` reference has no
//! safe equivalent to Python's `importlib` in a statically compiled binary,
//! so `load_workflow_module` documents the contract but does not implement
//! it — a real front-end resolves workflows via compiled crates or a plugin
//! ABI, which is outside this engine's job.

use crate::error::{EngineError, EngineResult};
use crate::future::RawFuture;
use std::sync::Arc;

/// A workflow exposes its terminal futures through `main`; the DAG is then
/// built by reverse-traversing their `dependencies`.
pub trait WorkflowModule: Send + Sync + std::fmt::Debug {
    fn main(&self) -> Vec<Arc<RawFuture>>;
}

/// Resolves a `path` or `module:function` reference to a [`WorkflowModule`].
///
/// Always returns [`EngineError::Unsupported`]: there is no dynamic-loading
/// primitive in this language that the core can implement safely. Callers
/// that want this contract link a [`WorkflowModule`] implementation
/// directly instead.
pub fn load_workflow_module(path_or_ref: &str) -> EngineResult<Box<dyn WorkflowModule>> {
    Err(EngineError::Unsupported(format!(
        "dynamic workflow loading is not implemented; link a WorkflowModule directly instead of resolving {path_or_ref:?}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_loading_is_a_documented_stub() {
        let err = load_workflow_module("demos/battery_aware_demo.rs:main").unwrap_err();
        assert!(matches!(err, EngineError::Unsupported(_)));
    }
}
