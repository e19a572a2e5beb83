//! The runner: executes a validated DAG across a bounded worker pool,
//! propagating failures and producing a terminal status per future.
//!
//! Mirrors the project's work-stealing executor in shape — a shutdown
//! flag, `WorkerHandle`s, atomic metrics — but replaces the steal queue
//! with the scheduler's explicit two-channel handoff: dispatch is
//! centrally ordered by the coordinator for deterministic scheduling,
//! not work-stolen.

use crate::cache::{CacheKey, ResultCache};
use crate::config::EngineConfig;
use crate::dag::Dag;
use crate::error::EngineError;
use crate::future::{FutureId, FutureState, RawFuture};
use crate::policy::{AdaptivePolicy, BatteryProbe, RamProbe, ResourceReading};
use crate::task::TaskBodyError;
use crate::value::ArgValue;
use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{info, warn};

/// Cooperative cancellation signal; cheap to clone and share with whatever
/// external trigger (SIGINT handler, UI button) should stop a run.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Start/end/duration/cache-hit record for one future, accumulated in a
/// [`RunRecord`].
#[derive(Debug, Clone)]
pub struct FutureBenchmark {
    pub task_name: String,
    pub duration: Option<Duration>,
    pub status: &'static str,
    pub cached: bool,
}

/// Per-future status and benchmarks for a single completed (or aborted)
/// run. Lives only for the duration of that run.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub benchmarks: HashMap<FutureId, FutureBenchmark>,
    /// Set when at least one future ended FAILED or SKIPPED due to a
    /// task-body error; the run itself still returns `Ok`, per the
    /// engine's failsafe-by-default propagation policy.
    pub had_failures: bool,
    pub elapsed: Duration,
}

#[derive(Default)]
struct RunMetrics {
    dispatched: AtomicUsize,
    completed: AtomicUsize,
    cache_hits: AtomicUsize,
}

struct WorkerHandle {
    thread: Option<thread::JoinHandle<()>>,
    #[allow(dead_code)]
    id: usize,
}

enum Job {
    Run {
        raw: Arc<RawFuture>,
        args: Vec<Arc<dyn ArgValue>>,
        cache_key: Option<CacheKey>,
    },
    Shutdown,
}

struct CompletionMsg {
    id: FutureId,
    outcome: Result<Arc<dyn ArgValue>, TaskBodyError>,
    cache_key: Option<CacheKey>,
}

fn spawn_worker(
    id: usize,
    work_rx: Receiver<Job>,
    completion_tx: Sender<CompletionMsg>,
    metrics: Arc<RunMetrics>,
) -> WorkerHandle {
    let thread = thread::Builder::new()
        .name(format!("edgeflow-worker-{id}"))
        .spawn(move || {
            while let Ok(job) = work_rx.recv() {
                match job {
                    Job::Shutdown => break,
                    Job::Run { raw, args, cache_key } => {
                        raw.mark_running();
                        let outcome = raw.task.invoke(&args);
                        metrics.completed.fetch_add(1, Ordering::Relaxed);
                        let msg = CompletionMsg {
                            id: raw.id,
                            outcome,
                            cache_key,
                        };
                        if completion_tx.send(msg).is_err() {
                            break;
                        }
                    }
                }
            }
        })
        .expect("failed to spawn worker thread");
    WorkerHandle {
        thread: Some(thread),
        id,
    }
}

fn resolve_args(raw: &RawFuture) -> Result<Vec<Arc<dyn ArgValue>>, FutureId> {
    raw.args
        .iter()
        .map(|slot| match slot {
            crate::future::ArgSlot::Value(v) => Ok(v.clone()),
            crate::future::ArgSlot::FutureRef(dep) => match dep.state() {
                FutureState::Completed => Ok(dep
                    .result_value()
                    .expect("COMPLETED dependency without a stored result")),
                FutureState::Failed | FutureState::Skipped => Err(dep.id),
                other => unreachable!(
                    "dependency {:?} not terminal ({other:?}) when its dependent was dispatched",
                    dep.id
                ),
            },
        })
        .collect()
}

fn snapshot_watched_paths(paths: &[PathBuf]) -> HashMap<PathBuf, Option<SystemTime>> {
    paths
        .iter()
        .map(|p| (p.clone(), fs::metadata(p).and_then(|m| m.modified()).ok()))
        .collect()
}

fn watch_invalidated(paths: &[PathBuf], snapshot: &HashMap<PathBuf, Option<SystemTime>>) -> bool {
    paths.iter().any(|p| {
        let current = fs::metadata(p).and_then(|m| m.modified()).ok();
        snapshot.get(p).copied().flatten() != current
    })
}

fn decrement_successors(
    dag: &Dag,
    id: FutureId,
    pending: &mut HashMap<FutureId, usize>,
    ready: &mut VecDeque<FutureId>,
) {
    let mut newly_ready: Vec<FutureId> = Vec::new();
    for &succ in dag.successors(id) {
        if let Some(count) = pending.get_mut(&succ) {
            *count -= 1;
            if *count == 0 {
                newly_ready.push(succ);
            }
        }
    }
    newly_ready.sort_by_key(|nid| dag.node(*nid).expect("successor missing from dag").seq);
    ready.extend(newly_ready);
}

/// Executes DAGs with resource-aware worker counts, a content-addressed
/// cache, and cooperative cancellation.
pub struct Runner {
    config: EngineConfig,
    cache: Option<Arc<ResultCache>>,
    battery_probe: Option<BatteryProbe>,
    ram_probe: Option<RamProbe>,
    task_statuses: Arc<DashMap<FutureId, &'static str>>,
}

impl Runner {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cache: None,
            battery_probe: None,
            ram_probe: None,
            task_statuses: Arc::new(DashMap::new()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_battery_probe(mut self, probe: BatteryProbe) -> Self {
        self.battery_probe = Some(probe);
        self
    }

    pub fn with_ram_probe(mut self, probe: RamProbe) -> Self {
        self.ram_probe = Some(probe);
        self
    }

    /// Live snapshot of every future's current state, safe for concurrent
    /// read by a monitoring UI while a run is in flight.
    pub fn task_statuses(&self) -> Arc<DashMap<FutureId, &'static str>> {
        self.task_statuses.clone()
    }

    pub fn run(&self, dag: &Dag, cancel: CancellationToken) -> Result<RunRecord, EngineError> {
        let start = Instant::now();
        let metrics = Arc::new(RunMetrics::default());

        let reading = ResourceReading {
            battery_percent: self.battery_probe.as_ref().and_then(|p| p()),
            free_ram_mb: self.ram_probe.as_ref().and_then(|p| p()),
        };
        let policy = AdaptivePolicy::with_thresholds(self.config.max_workers, self.config.thresholds);
        let decision = policy.decide(reading, self.config.failsafe);
        info!(
            workers = decision.worker_count,
            battery_mode = decision.battery_mode_active,
            "run starting"
        );

        let watch_snapshot = snapshot_watched_paths(&self.config.watched_paths);

        // An explicit `with_cache` override always wins; otherwise a configured
        // `cache_dir` gets its own on-disk cache for this run rather than
        // silently running without one.
        let cache: Option<Arc<ResultCache>> = match &self.cache {
            Some(cache) => Some(cache.clone()),
            None => match &self.config.cache_dir {
                Some(dir) => match ResultCache::with_disk_dir(dir) {
                    Ok(cache) => Some(Arc::new(cache)),
                    Err(e) => {
                        warn!(error = %e, dir = %dir.display(), "failed to open configured cache_dir, running without a cache");
                        None
                    }
                },
                None => None,
            },
        };

        self.task_statuses.clear();
        for node in dag.nodes() {
            self.task_statuses.insert(node.id, "PENDING");
        }

        let (work_tx, work_rx) = unbounded::<Job>();
        let (completion_tx, completion_rx) = unbounded::<CompletionMsg>();
        let mut workers: Vec<WorkerHandle> = (0..decision.worker_count)
            .map(|id| spawn_worker(id, work_rx.clone(), completion_tx.clone(), metrics.clone()))
            .collect();
        drop(work_rx);
        drop(completion_tx);

        let mut pending: HashMap<FutureId, usize> =
            dag.nodes().map(|n| (n.id, dag.in_degree(n.id))).collect();
        let mut ready: VecDeque<FutureId> = dag
            .topo_order()
            .iter()
            .copied()
            .filter(|id| pending[id] == 0)
            .collect();
        let mut in_flight: usize = 0;
        // Tracks, per cacheable key, which future is the one actually computing
        // it (the "leader") and which ready futures arrived with the same key
        // while the leader was still running (the "followers"); followers are
        // never dispatched to a worker and instead get the leader's outcome
        // replayed onto them when it completes.
        let mut in_flight_keys: HashMap<CacheKey, FutureId> = HashMap::new();
        let mut waiting_on_key: HashMap<CacheKey, Vec<FutureId>> = HashMap::new();
        let mut benchmarks: HashMap<FutureId, FutureBenchmark> = HashMap::new();
        let mut dispatch_times: HashMap<FutureId, Instant> = HashMap::new();
        let mut had_failures = false;
        let total = dag.nodes().count();
        let mut finished = 0usize;

        let abort_reason = 'scheduling: loop {
            if finished >= total {
                break 'scheduling None;
            }

            if cancel.is_cancelled() {
                warn!("run cancelled, waiting up to the grace period for in-flight tasks");
                break 'scheduling Some(EngineError::Cancelled("cancelled by caller".to_string()));
            }
            if let Some(deadline) = self.config.deadline {
                if start.elapsed() >= deadline {
                    break 'scheduling Some(EngineError::DeadlineExceeded);
                }
            }
            if let Some(critical) = self.config.battery_critical_percent {
                if let Some(level) = self.battery_probe.as_ref().and_then(|p| p()) {
                    if level < critical {
                        break 'scheduling Some(EngineError::BatteryLevelLow { reading: level });
                    }
                }
            }

            while in_flight < decision.worker_count {
                let Some(id) = ready.pop_front() else { break };
                let raw = dag.node(id).expect("ready id missing from dag").clone();

                match resolve_args(&raw) {
                    Err(failed_dep) => {
                        let err = Arc::new(EngineError::UpstreamTaskFailed(failed_dep));
                        raw.mark_skipped(err);
                        self.task_statuses.insert(id, "SKIPPED");
                        benchmarks.insert(
                            id,
                            FutureBenchmark {
                                task_name: raw.task.name().to_string(),
                                duration: Some(Duration::ZERO),
                                status: "SKIPPED",
                                cached: false,
                            },
                        );
                        had_failures = true;
                        finished += 1;
                        decrement_successors(dag, id, &mut pending, &mut ready);
                        continue;
                    }
                    Ok(args) => {
                        let cache_key = cache.as_ref().map(|_| {
                            let digests: Vec<_> = args.iter().map(|a| a.digest()).collect();
                            CacheKey::new(raw.task.fingerprint(), &digests)
                        });

                        if let (Some(cache), Some(key)) = (&cache, &cache_key) {
                            if key.is_cacheable() {
                                if let Some(bytes) = cache.get(key, self.config.cache_max_age) {
                                    if let Ok(value) = raw.task.result_from_cache_bytes(&bytes) {
                                        raw.mark_completed(value, true);
                                        self.task_statuses.insert(id, "COMPLETED");
                                        metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
                                        benchmarks.insert(
                                            id,
                                            FutureBenchmark {
                                                task_name: raw.task.name().to_string(),
                                                duration: Some(Duration::ZERO),
                                                status: "COMPLETED",
                                                cached: true,
                                            },
                                        );
                                        finished += 1;
                                        decrement_successors(dag, id, &mut pending, &mut ready);
                                        continue;
                                    }
                                }
                            }
                        }

                        if let Some(key) = &cache_key {
                            if key.is_cacheable() {
                                if in_flight_keys.contains_key(key) {
                                    // Another already-dispatched future is computing this
                                    // exact key right now; ride along instead of running
                                    // the task body a second time.
                                    waiting_on_key.entry(key.clone()).or_default().push(id);
                                    self.task_statuses.insert(id, "RUNNING");
                                    benchmarks.insert(
                                        id,
                                        FutureBenchmark {
                                            task_name: raw.task.name().to_string(),
                                            duration: None,
                                            status: "RUNNING",
                                            cached: false,
                                        },
                                    );
                                    continue;
                                }
                                in_flight_keys.insert(key.clone(), id);
                            }
                        }

                        self.task_statuses.insert(id, "RUNNING");
                        benchmarks.insert(
                            id,
                            FutureBenchmark {
                                task_name: raw.task.name().to_string(),
                                duration: None,
                                status: "RUNNING",
                                cached: false,
                            },
                        );
                        dispatch_times.insert(id, Instant::now());
                        metrics.dispatched.fetch_add(1, Ordering::Relaxed);
                        work_tx
                            .send(Job::Run { raw: raw.clone(), args, cache_key })
                            .expect("worker pool disconnected while dispatching");
                        in_flight += 1;
                    }
                }
            }

            if in_flight == 0 {
                if ready.is_empty() {
                    break 'scheduling None;
                }
                continue;
            }

            match completion_rx.recv() {
                Ok(msg) => {
                    let raw = dag.node(msg.id).expect("completion for unknown future").clone();
                    in_flight -= 1;
                    finished += 1;
                    let duration = dispatch_times.remove(&msg.id).map(|t| t.elapsed());
                    if let Some(b) = benchmarks.get_mut(&msg.id) {
                        b.duration = duration;
                    }

                    // Every future that arrived while this key's computation was
                    // already running gets the same outcome replayed onto it below,
                    // without a second invocation of the task body.
                    let followers: Vec<FutureId> = msg
                        .cache_key
                        .as_ref()
                        .filter(|key| key.is_cacheable())
                        .map(|key| {
                            in_flight_keys.remove(key);
                            waiting_on_key.remove(key).unwrap_or_default()
                        })
                        .unwrap_or_default();

                    match msg.outcome {
                        Ok(value) => {
                            if decision.allow_cache_writes {
                                if let (Some(cache), Some(key)) = (&cache, &msg.cache_key) {
                                    if key.is_cacheable()
                                        && !watch_invalidated(&self.config.watched_paths, &watch_snapshot)
                                    {
                                        let bytes = value.to_json_bytes().expect(
                                            "task result serialization must succeed for any well-formed value",
                                        );
                                        cache.put(key, bytes);
                                    }
                                }
                            }
                            for follower_id in &followers {
                                let fraw = dag.node(*follower_id).expect("follower missing from dag").clone();
                                fraw.mark_completed(value.clone(), true);
                                self.task_statuses.insert(*follower_id, "COMPLETED");
                                if let Some(b) = benchmarks.get_mut(follower_id) {
                                    b.status = "COMPLETED";
                                    b.cached = true;
                                    b.duration = Some(Duration::ZERO);
                                }
                            }
                            raw.mark_completed(value, false);
                            self.task_statuses.insert(msg.id, "COMPLETED");
                            if let Some(b) = benchmarks.get_mut(&msg.id) {
                                b.status = "COMPLETED";
                            }
                        }
                        Err(e) => {
                            for follower_id in &followers {
                                let fraw = dag.node(*follower_id).expect("follower missing from dag").clone();
                                fraw.mark_failed(Arc::new(EngineError::TaskBody(e.clone())));
                                self.task_statuses.insert(*follower_id, "FAILED");
                                if let Some(b) = benchmarks.get_mut(follower_id) {
                                    b.status = "FAILED";
                                }
                            }
                            raw.mark_failed(Arc::new(EngineError::TaskBody(e)));
                            self.task_statuses.insert(msg.id, "FAILED");
                            had_failures = true;
                            if let Some(b) = benchmarks.get_mut(&msg.id) {
                                b.status = "FAILED";
                            }
                        }
                    }
                    finished += followers.len();
                    decrement_successors(dag, msg.id, &mut pending, &mut ready);
                    for follower_id in &followers {
                        decrement_successors(dag, *follower_id, &mut pending, &mut ready);
                    }
                }
                Err(_) => {
                    break 'scheduling Some(EngineError::Cancelled(
                        "worker pool disconnected unexpectedly".to_string(),
                    ));
                }
            }
        };

        if let Some(reason) = &abort_reason {
            // Already-started tasks are allowed to finish; Rust has no safe
            // way to preempt a running OS thread, so "grace period" here
            // means "wait for the in-flight batch, bounded by
            // cancel_grace_period", not a forced kill. A future that was only
            // riding along on someone else's in-flight computation (never
            // itself dispatched to a worker) is not waited for here — it gets
            // marked SKIPPED below along with everything else non-terminal.
            while in_flight > 0 {
                match completion_rx.recv_timeout(self.config.cancel_grace_period) {
                    Ok(msg) => {
                        in_flight -= 1;
                        let raw = dag.node(msg.id).expect("completion for unknown future").clone();
                        match msg.outcome {
                            Ok(value) => {
                                raw.mark_completed(value, false);
                                self.task_statuses.insert(msg.id, "COMPLETED");
                            }
                            Err(e) => {
                                raw.mark_failed(Arc::new(EngineError::TaskBody(e)));
                                self.task_statuses.insert(msg.id, "FAILED");
                            }
                        }
                    }
                    Err(_) => break,
                }
            }
            for node in dag.nodes() {
                if !node.state().is_terminal() {
                    node.mark_skipped(Arc::new(reason.clone()));
                    self.task_statuses.insert(node.id, "SKIPPED");
                }
            }
        }

        for _ in &workers {
            let _ = work_tx.send(Job::Shutdown);
        }
        for w in &mut workers {
            if let Some(handle) = w.thread.take() {
                let _ = handle.join();
            }
        }

        match abort_reason {
            Some(reason) => Err(reason),
            None => Ok(RunRecord {
                benchmarks,
                had_failures,
                elapsed: start.elapsed(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::Dag;
    use crate::future::Arg;
    use crate::task::TaskRegistry;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    #[test]
    fn linear_chain_executes_in_order() {
        let reg = TaskRegistry::new();
        let a = reg.register0("a", || Ok(2i64)).unwrap();
        let b = reg.register1("b", |x: i64| Ok(x * 3)).unwrap();
        let fa = a.call();
        let fb = b.call(fa.clone());
        let dag = Dag::from_futures(vec![fb.erased()]).unwrap();

        let runner = Runner::new(EngineConfig::builder().max_workers(2).build());
        let record = runner.run(&dag, CancellationToken::new()).unwrap();
        assert!(!record.had_failures);
        assert_eq!(fb.result().unwrap(), 6);
    }

    #[test]
    fn diamond_runs_independent_branches_and_joins() {
        let reg = TaskRegistry::new();
        let r = reg.register0("r", || Ok(2i64)).unwrap();
        let l = reg.register1("l", |x: i64| Ok(x + 1)).unwrap();
        let m = reg.register1("m", |x: i64| Ok(x * 3)).unwrap();
        let j = reg.register2("j", |a: i64, b: i64| Ok(a + b)).unwrap();

        let fr = r.call();
        let fl = l.call(fr.clone());
        let fm = m.call(fr.clone());
        let fj = j.call(fl.clone(), fm.clone());
        let dag = Dag::from_futures(vec![fj.erased()]).unwrap();

        let runner = Runner::new(EngineConfig::builder().max_workers(4).build());
        runner.run(&dag, CancellationToken::new()).unwrap();
        assert_eq!(fj.result().unwrap(), 3 + 6);
    }

    #[test]
    fn failure_skips_dependents_but_not_independent_branches() {
        let reg = TaskRegistry::new();
        let boom = reg.register0("boom", || -> anyhow::Result<i64> { anyhow::bail!("kaboom") }).unwrap();
        let dependent = reg.register1("dependent", |x: i64| Ok(x + 1)).unwrap();
        let independent = reg.register0("independent", || Ok(42i64)).unwrap();

        let fb = boom.call();
        let fd = dependent.call(fb.clone());
        let fi = independent.call();
        let dag = Dag::from_futures(vec![fd.erased(), fi.erased()]).unwrap();

        let runner = Runner::new(EngineConfig::builder().max_workers(2).build());
        let record = runner.run(&dag, CancellationToken::new()).unwrap();
        assert!(record.had_failures);
        assert!(fd.result().is_err());
        assert_eq!(fi.result().unwrap(), 42);
    }

    #[test]
    fn cache_hit_skips_re_execution() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ResultCache::with_disk_dir(dir.path()).unwrap());
        let calls = Arc::new(StdAtomicUsize::new(0));

        let reg = TaskRegistry::new();
        let c1 = calls.clone();
        let expensive = reg
            .register1("expensive", move |x: i64| {
                c1.fetch_add(1, Ordering::SeqCst);
                Ok(x * 2)
            })
            .unwrap();

        let f1 = expensive.call(Arg::Value(10i64));
        let dag1 = Dag::from_futures(vec![f1.erased()]).unwrap();
        let runner1 = Runner::new(EngineConfig::builder().max_workers(1).build()).with_cache(cache.clone());
        runner1.run(&dag1, CancellationToken::new()).unwrap();
        assert_eq!(f1.result().unwrap(), 20);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let f2 = expensive.call(Arg::Value(10i64));
        let dag2 = Dag::from_futures(vec![f2.erased()]).unwrap();
        let runner2 = Runner::new(EngineConfig::builder().max_workers(1).build()).with_cache(cache);
        runner2.run(&dag2, CancellationToken::new()).unwrap();
        assert_eq!(f2.result().unwrap(), 20);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second run should be a cache hit");
    }

    #[test]
    fn two_ready_futures_with_an_identical_cache_key_run_the_body_once() {
        let cache = Arc::new(ResultCache::in_memory());
        let calls = Arc::new(StdAtomicUsize::new(0));

        let reg = TaskRegistry::new();
        let c1 = calls.clone();
        let expensive = reg
            .register1("expensive_dedup", move |x: i64| {
                c1.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                Ok(x * 2)
            })
            .unwrap();

        let f1 = expensive.call(Arg::Value(5i64));
        let f2 = expensive.call(Arg::Value(5i64));
        let dag = Dag::from_futures(vec![f1.erased(), f2.erased()]).unwrap();

        let runner = Runner::new(EngineConfig::builder().max_workers(4).build()).with_cache(cache);
        let record = runner.run(&dag, CancellationToken::new()).unwrap();

        assert!(!record.had_failures);
        assert_eq!(f1.result().unwrap(), 10);
        assert_eq!(f2.result().unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second in-flight future should ride along, not re-run the body");
    }

    #[test]
    fn configured_cache_dir_is_honored_without_an_explicit_with_cache_call() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(StdAtomicUsize::new(0));

        let reg = TaskRegistry::new();
        let c1 = calls.clone();
        let expensive = reg
            .register1("expensive_from_config", move |x: i64| {
                c1.fetch_add(1, Ordering::SeqCst);
                Ok(x * 3)
            })
            .unwrap();

        let config = EngineConfig::builder().max_workers(1).cache_dir(dir.path()).build();

        let f1 = expensive.call(Arg::Value(7i64));
        let dag1 = Dag::from_futures(vec![f1.erased()]).unwrap();
        Runner::new(config.clone()).run(&dag1, CancellationToken::new()).unwrap();
        assert_eq!(f1.result().unwrap(), 21);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let f2 = expensive.call(Arg::Value(7i64));
        let dag2 = Dag::from_futures(vec![f2.erased()]).unwrap();
        Runner::new(config).run(&dag2, CancellationToken::new()).unwrap();
        assert_eq!(f2.result().unwrap(), 21);
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "a runner with no with_cache call should still honor a configured cache_dir"
        );
    }

    #[test]
    fn battery_guard_aborts_run_before_dispatch() {
        let reg = TaskRegistry::new();
        let a = reg.register0("a", || Ok(1i64)).unwrap();
        let fa = a.call();
        let dag = Dag::from_futures(vec![fa.erased()]).unwrap();

        let config = EngineConfig::builder()
            .max_workers(1)
            .battery_critical_percent(Some(10))
            .build();
        let runner = Runner::new(config).with_battery_probe(Arc::new(|| Some(3)));
        let err = runner.run(&dag, CancellationToken::new()).unwrap_err();
        assert!(matches!(err, EngineError::BatteryLevelLow { reading: 3 }));
        assert_eq!(fa.state(), FutureState::Skipped);
    }

    #[test]
    fn pre_cancelled_token_aborts_immediately() {
        let reg = TaskRegistry::new();
        let a = reg.register0("a", || Ok(1i64)).unwrap();
        let fa = a.call();
        let dag = Dag::from_futures(vec![fa.erased()]).unwrap();

        let runner = Runner::new(EngineConfig::builder().max_workers(1).build());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = runner.run(&dag, cancel).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled(_)));
    }
}
