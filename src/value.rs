//! Type-erased argument/result values and their content digests.
//!
//! Every value that flows through the graph — a raw argument, a task's
//! resolved result — is stored behind `Arc<dyn ArgValue>`. Fingerprinting
//! (see [`crate::cache`]) needs a canonical digest of each value; types that
//! can't provide one fall back to [`ArgDigest::Opaque`], which disables
//! caching for any future that consumes them.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A value that can sit in a future's argument list or be its result.
///
/// `fmt_debug` exists because `dyn ArgValue` can't inherit a blanket
/// `Debug` impl from a supertrait bound; it forwards to the concrete
/// type's own `Debug::fmt`.
pub trait ArgValue: Any + Send + Sync {
    /// Upcast for downcasting back to a concrete type at dispatch time.
    fn as_any(&self) -> &dyn Any;

    /// Canonical digest of this value, or `Opaque` if none can be derived.
    fn digest(&self) -> ArgDigest;

    /// Canonical JSON encoding, or `None` if the concrete type can't
    /// provide one. Used to persist a task's result to the cache; the
    /// corresponding read side is [`crate::task::TaskObject::result_from_cache_bytes`],
    /// which knows the concrete return type and can deserialize back into it.
    fn to_json_bytes(&self) -> Option<Vec<u8>>;

    /// Forward to the concrete type's `Debug` impl.
    fn fmt_debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl fmt::Debug for dyn ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_debug(f)
    }
}

/// Digest of an [`ArgValue`], used to build cache keys.
#[derive(Clone, PartialEq, Eq)]
pub enum ArgDigest {
    /// A stable 32-byte digest of the value's canonical form.
    Hash([u8; 32]),
    /// No stable digest is available; caching is disabled for consumers.
    Opaque,
}

impl fmt::Debug for ArgDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgDigest::Hash(bytes) => write!(f, "Hash({})", hex::encode(bytes)),
            ArgDigest::Opaque => write!(f, "Opaque"),
        }
    }
}

/// Blanket impl: any serializable, debuggable, thread-safe value is
/// automatically an [`ArgValue`] whose digest is `sha256` of its canonical
/// JSON encoding. Types that cannot implement `Serialize` must provide a
/// manual impl that returns [`ArgDigest::Opaque`] from `digest`.
impl<T> ArgValue for T
where
    T: Any + Send + Sync + fmt::Debug + Serialize,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn digest(&self) -> ArgDigest {
        match serde_json::to_vec(self) {
            Ok(bytes) => {
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                ArgDigest::Hash(hasher.finalize().into())
            }
            Err(_) => ArgDigest::Opaque,
        }
    }

    fn to_json_bytes(&self) -> Option<Vec<u8>> {
        serde_json::to_vec(self).ok()
    }

    fn fmt_debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Downcast a shared [`ArgValue`] to a concrete type, or produce a
/// descriptive mismatch error.
pub fn downcast<T: Clone + 'static>(
    value: &Arc<dyn ArgValue>,
    task: &str,
) -> crate::error::EngineResult<T> {
    value
        .as_any()
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| crate::error::EngineError::ArgTypeMismatch {
            task: task.to_string(),
            detail: format!("expected {}, got {:?}", std::any::type_name::<T>(), value),
        })
}
