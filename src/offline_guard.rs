//! RAII offline guard: temporarily denies network-backed tasks for the
//! lifetime of a scope, always restoring the previous policy on drop even
//! if the scope unwinds via panic.

use crate::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use std::sync::Arc;

/// Implemented by any collaborator a task body calls into that can make a
/// network request. `check` is meant to be called right before the actual
/// I/O; a deliberately network-free task never needs to consult it.
pub trait NetworkPolicy: Send + Sync {
    fn check(&self) -> EngineResult<()>;
}

/// Always permits network access; the default when no guard is active.
struct AllowAll;

impl NetworkPolicy for AllowAll {
    fn check(&self) -> EngineResult<()> {
        Ok(())
    }
}

/// Always denies network access.
struct DenyAll;

impl NetworkPolicy for DenyAll {
    fn check(&self) -> EngineResult<()> {
        Err(EngineError::NetworkDisabled)
    }
}

/// Per-engine stack of active network policies. The top of the stack wins;
/// an empty stack means unrestricted access.
#[derive(Clone)]
pub struct NetworkGate {
    stack: Arc<Mutex<Vec<Arc<dyn NetworkPolicy>>>>,
}

impl Default for NetworkGate {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkGate {
    pub fn new() -> Self {
        Self {
            stack: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Called by task bodies before any network operation.
    pub fn check(&self) -> EngineResult<()> {
        let stack = self.stack.lock();
        match stack.last() {
            Some(policy) => policy.check(),
            None => AllowAll.check(),
        }
    }

    /// Push `DenyAll` for the lifetime of the returned guard.
    pub fn go_offline(&self) -> OfflineGuard {
        self.push(Arc::new(DenyAll))
    }

    fn push(&self, policy: Arc<dyn NetworkPolicy>) -> OfflineGuard {
        self.stack.lock().push(policy);
        OfflineGuard {
            gate: self.clone(),
        }
    }
}

/// While alive, network-backed tasks see [`EngineError::NetworkDisabled`]
/// from [`NetworkGate::check`]. Dropping it — including via an unwinding
/// panic — always pops exactly the entry it pushed.
#[must_use = "the offline guard only takes effect while it is alive; binding it to `_` drops it immediately"]
pub struct OfflineGuard {
    gate: NetworkGate,
}

impl Drop for OfflineGuard {
    fn drop(&mut self) {
        self.gate.stack.lock().pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_is_allowed_by_default() {
        let gate = NetworkGate::new();
        assert!(gate.check().is_ok());
    }

    #[test]
    fn guard_denies_network_while_held() {
        let gate = NetworkGate::new();
        let guard = gate.go_offline();
        assert!(matches!(gate.check(), Err(EngineError::NetworkDisabled)));
        drop(guard);
        assert!(gate.check().is_ok());
    }

    #[test]
    fn guard_restores_policy_even_on_panic() {
        let gate = NetworkGate::new();
        let gate2 = gate.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = gate2.go_offline();
            panic!("simulated task panic while offline");
        }));
        assert!(result.is_err());
        assert!(gate.check().is_ok());
    }

    #[test]
    fn nested_guards_restore_in_lifo_order() {
        let gate = NetworkGate::new();
        let outer = gate.go_offline();
        {
            let _inner = gate.go_offline();
            assert!(gate.check().is_err());
        }
        assert!(gate.check().is_err(), "outer guard should still be active");
        drop(outer);
        assert!(gate.check().is_ok());
    }
}
