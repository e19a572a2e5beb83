//! Content-addressed result cache with an in-memory tier, an optional
//! on-disk tier, and single-flight de-duplication of concurrent computations
//! for the same key.

use crate::task::TaskFingerprint;
use crate::value::ArgDigest;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const MAGIC: &[u8; 4] = b"EFC1";
const FORMAT_VERSION: u8 = 1;

/// On-disk envelope, bincode-encoded after the magic/version prefix so the
/// format stays self-describing even as the envelope's fields evolve.
#[derive(Serialize, Deserialize)]
struct DiskEnvelope {
    stored_at_unix: i64,
    bytes: Vec<u8>,
}

/// Identifies one cacheable computation: a task plus the digests of its
/// resolved arguments. Two calls with the same key are the same computation.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CacheKey {
    fingerprint: [u8; 32],
    arg_digests: Vec<ArgDigestKey>,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum ArgDigestKey {
    Hash([u8; 32]),
    /// An opaque (non-serializable) argument makes the whole key
    /// non-reusable: every build gets a fresh, effectively-unique slot.
    Unique(u64),
}

static OPAQUE_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

impl CacheKey {
    pub fn new(task: TaskFingerprint, arg_digests: &[ArgDigest]) -> Self {
        let arg_digests = arg_digests
            .iter()
            .map(|d| match d {
                ArgDigest::Hash(bytes) => ArgDigestKey::Hash(*bytes),
                ArgDigest::Opaque => ArgDigestKey::Unique(
                    OPAQUE_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
                ),
            })
            .collect();
        Self {
            fingerprint: task.0,
            arg_digests,
        }
    }

    /// Whether this key is eligible to ever be reused; a key containing an
    /// opaque argument is synthetically unique and should not be cached.
    pub fn is_cacheable(&self) -> bool {
        self.arg_digests
            .iter()
            .all(|d| matches!(d, ArgDigestKey::Hash(_)))
    }

    fn file_name(&self) -> String {
        let mut hasher = sha2::Sha256::new();
        use sha2::Digest;
        hasher.update(self.fingerprint);
        for d in &self.arg_digests {
            match d {
                ArgDigestKey::Hash(b) => hasher.update(b),
                ArgDigestKey::Unique(n) => hasher.update(n.to_le_bytes()),
            };
        }
        hex::encode(hasher.finalize())
    }
}

#[derive(Clone)]
struct CacheEntry {
    bytes: Vec<u8>,
    stored_at: DateTime<Utc>,
}

type InFlightResult = Result<CacheEntry, crate::task::TaskBodyError>;
type InFlightHandle = Arc<(Mutex<Option<InFlightResult>>, parking_lot::Condvar)>;

/// Either a ready result or, while another thread is computing it, a handle
/// to wait on — used internally by [`ResultCache::single_flight`].
enum Slot {
    Ready(CacheEntry),
    InFlight(InFlightHandle),
}

/// Two-tier cache: an always-on in-memory `DashMap`, and an optional
/// directory where entries are persisted as `magic(4) | version(1) |
/// bincode(DiskEnvelope)`, written to a temp file and renamed into place
/// so a crash mid-write can never leave a partially-written entry visible.
pub struct ResultCache {
    memory: DashMap<CacheKey, Slot>,
    disk_dir: Option<PathBuf>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ResultCache {
    pub fn in_memory() -> Self {
        Self {
            memory: DashMap::new(),
            disk_dir: None,
        }
    }

    pub fn with_disk_dir(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            memory: DashMap::new(),
            disk_dir: Some(dir),
        })
    }

    /// Fetch a cached value no older than `max_age`, checking memory first
    /// and falling back to disk. There is no implicit expiry policy beyond
    /// what the caller asks for here.
    pub fn get(&self, key: &CacheKey, max_age: Option<Duration>) -> Option<Vec<u8>> {
        if let Some(entry) = self.memory.get(key) {
            if let Slot::Ready(entry) = entry.value() {
                if within_age(entry.stored_at, max_age) {
                    return Some(entry.bytes.clone());
                }
                return None;
            }
        }
        let entry = self.read_disk(key)?;
        if within_age(entry.stored_at, max_age) {
            self.memory.insert(key.clone(), Slot::Ready(entry.clone()));
            Some(entry.bytes)
        } else {
            None
        }
    }

    pub fn put(&self, key: &CacheKey, bytes: Vec<u8>) {
        if !key.is_cacheable() {
            return;
        }
        let entry = CacheEntry {
            bytes,
            stored_at: Utc::now(),
        };
        self.write_disk(key, &entry);
        self.memory.insert(key.clone(), Slot::Ready(entry));
    }

    /// Ensure only one thread actually runs `compute` for a given key at a
    /// time; concurrent callers for the same key block on the first
    /// caller's result — or, if it fails, the same error — instead of
    /// duplicating the work.
    pub fn single_flight<F>(
        &self,
        key: &CacheKey,
        compute: F,
    ) -> Result<Vec<u8>, crate::task::TaskBodyError>
    where
        F: FnOnce() -> Result<Vec<u8>, crate::task::TaskBodyError>,
    {
        let wait_handle = loop {
            match self.memory.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(occ) => match occ.get() {
                    Slot::Ready(entry) => return Ok(entry.bytes.clone()),
                    Slot::InFlight(handle) => break handle.clone(),
                },
                dashmap::mapref::entry::Entry::Vacant(vac) => {
                    let handle: InFlightHandle = Arc::new((Mutex::new(None), parking_lot::Condvar::new()));
                    vac.insert(Slot::InFlight(handle.clone()));
                    let outcome = compute();
                    let published = match &outcome {
                        Ok(bytes) => {
                            let entry = CacheEntry {
                                bytes: bytes.clone(),
                                stored_at: Utc::now(),
                            };
                            self.write_disk(key, &entry);
                            self.memory.insert(key.clone(), Slot::Ready(entry.clone()));
                            Ok(entry)
                        }
                        Err(e) => {
                            // Don't leave a permanent cache entry for a failed
                            // computation; the next caller should retry it.
                            self.memory.remove(key);
                            Err(e.clone())
                        }
                    };
                    let (lock, condvar) = &*handle;
                    *lock.lock() = Some(published);
                    condvar.notify_all();
                    return outcome;
                }
            }
        };
        debug!("joining in-flight computation for cache key");
        let (lock, condvar) = &*wait_handle;
        let mut guard = lock.lock();
        while guard.is_none() {
            condvar.wait(&mut guard);
        }
        guard.clone().unwrap().map(|entry| entry.bytes)
    }

    fn disk_path(&self, key: &CacheKey) -> Option<PathBuf> {
        self.disk_dir.as_ref().map(|dir| dir.join(key.file_name()))
    }

    fn read_disk(&self, key: &CacheKey) -> Option<CacheEntry> {
        let path = self.disk_path(key)?;
        let mut file = fs::File::open(&path).ok()?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).ok()?;
        parse_disk_entry(&buf)
    }

    fn write_disk(&self, key: &CacheKey, entry: &CacheEntry) {
        let Some(path) = self.disk_path(key) else {
            return;
        };
        let tmp = path.with_extension("tmp");
        if let Err(e) = write_disk_entry(&tmp, entry).and_then(|()| fs::rename(&tmp, &path)) {
            warn!(error = %e, "failed to persist cache entry to disk");
        }
    }
}

fn within_age(stored_at: DateTime<Utc>, max_age: Option<Duration>) -> bool {
    match max_age {
        None => true,
        Some(max_age) => {
            let age = Utc::now().signed_duration_since(stored_at);
            age.to_std().map(|age| age <= max_age).unwrap_or(false)
        }
    }
}

fn write_disk_entry(path: &Path, entry: &CacheEntry) -> std::io::Result<()> {
    let envelope = DiskEnvelope {
        stored_at_unix: entry.stored_at.timestamp(),
        bytes: entry.bytes.clone(),
    };
    let body = bincode::serialize(&envelope)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let mut file = fs::File::create(path)?;
    file.write_all(MAGIC)?;
    file.write_all(&[FORMAT_VERSION])?;
    file.write_all(&body)?;
    Ok(())
}

fn parse_disk_entry(buf: &[u8]) -> Option<CacheEntry> {
    if buf.len() < 5 || &buf[0..4] != MAGIC || buf[4] != FORMAT_VERSION {
        return None;
    }
    let envelope: DiskEnvelope = bincode::deserialize(&buf[5..]).ok()?;
    let stored_at = DateTime::from_timestamp(envelope.stored_at_unix, 0)?;
    Some(CacheEntry {
        bytes: envelope.bytes,
        stored_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskObject, TaskRegistry};

    fn key_for(fp: TaskFingerprint, digests: &[ArgDigest]) -> CacheKey {
        CacheKey::new(fp, digests)
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = ResultCache::in_memory();
        let reg = TaskRegistry::new();
        let t = reg.register0("t", || Ok(1i64)).unwrap();
        let key = key_for(t.fingerprint(), &[]);
        cache.put(&key, b"hello".to_vec());
        assert_eq!(cache.get(&key, None), Some(b"hello".to_vec()));
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let cache = ResultCache::in_memory();
        let reg = TaskRegistry::new();
        let t = reg.register0("t", || Ok(1i64)).unwrap();
        let key = key_for(t.fingerprint(), &[]);
        cache.put(&key, b"hello".to_vec());
        assert_eq!(cache.get(&key, Some(Duration::from_secs(0))), None);
    }

    #[test]
    fn opaque_argument_is_never_cached() {
        let reg = TaskRegistry::new();
        let t = reg.register0("t", || Ok(1i64)).unwrap();
        let key = key_for(t.fingerprint(), &[ArgDigest::Opaque]);
        assert!(!key.is_cacheable());
        let cache = ResultCache::in_memory();
        cache.put(&key, b"hello".to_vec());
        assert_eq!(cache.get(&key, None), None);
    }

    #[test]
    fn disk_round_trips_across_cache_instances() {
        let dir = tempfile::tempdir().unwrap();
        let reg = TaskRegistry::new();
        let t = reg.register0("t", || Ok(1i64)).unwrap();
        let key = key_for(t.fingerprint(), &[]);

        let cache = ResultCache::with_disk_dir(dir.path()).unwrap();
        cache.put(&key, b"persisted".to_vec());

        let reopened = ResultCache::with_disk_dir(dir.path()).unwrap();
        assert_eq!(reopened.get(&key, None), Some(b"persisted".to_vec()));
    }

    #[test]
    fn single_flight_runs_compute_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let cache = Arc::new(ResultCache::in_memory());
        let reg = TaskRegistry::new();
        let t = reg.register0("t", || Ok(1i64)).unwrap();
        let key = key_for(t.fingerprint(), &[]);
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = calls.clone();
        let result = cache.single_flight(&key, || {
            c1.fetch_add(1, Ordering::SeqCst);
            Ok(b"computed".to_vec())
        });
        assert_eq!(result.unwrap(), b"computed".to_vec());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let result2 = cache.single_flight(&key, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(b"should-not-run".to_vec())
        });
        assert_eq!(result2.unwrap(), b"computed".to_vec());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn single_flight_propagates_failure_to_waiters_without_caching_it() {
        use crate::task::TaskBodyError;

        let cache = ResultCache::in_memory();
        let reg = TaskRegistry::new();
        let t = reg.register0("t", || Ok(1i64)).unwrap();
        let key = key_for(t.fingerprint(), &[]);

        let err = cache
            .single_flight(&key, || Err(TaskBodyError::new(anyhow::anyhow!("boom"))))
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(cache.get(&key, None), None);

        // A later call retries rather than replaying the stale failure.
        let ok = cache.single_flight(&key, || Ok(b"recovered".to_vec()));
        assert_eq!(ok.unwrap(), b"recovered".to_vec());
    }
}
