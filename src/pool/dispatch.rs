// src/pool/dispatch.rs
//
// The pool and its coordinator.
//
// **Architecture Decision**: one coordinator thread owns the queue and every
// worker slot. Submissions, results, context exits and shutdown requests
// all arrive as events on a single channel and are applied one at a time,
// so there is no lock around pool state and a job can only ever be in one
// place: the queue, one busy slot, or resolved.
//
// After every event the coordinator:
// 1. expires overdue jobs and recycles their slots
// 2. retries respawns for slots left without a context
// 3. dispatches queue heads to idle slots, lowest slot first
// 4. publishes a stats snapshot

use crate::engine::{CompressionOutcome, ImageRecompressor, Recompress};
use crate::error::{CompressError, Result};
use crate::pool::config::PoolConfig;
use crate::pool::job::{Job, JobHandle, JobId};
use crate::pool::reconcile::{MetadataStore, Reconciler};
use crate::pool::worker::{BusyJob, Worker};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Minimum delay between attempts to respawn a slot whose context could not
/// be started.
const RESPAWN_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ShutdownMode {
    /// Finish queued and in-flight jobs.
    Drain,
    /// Reject queued jobs, finish in-flight ones.
    Abort,
}

#[derive(Debug)]
pub(crate) enum Event {
    Submit(Job),
    Finished {
        slot: usize,
        generation: u64,
        job_id: JobId,
        outcome: CompressionOutcome,
    },
    Exited {
        slot: usize,
        generation: u64,
    },
    Shutdown(ShutdownMode),
}

/// Snapshot of pool bookkeeping.
///
/// Gauges (`idle`, `busy`, `recycling`, `queued`) describe the moment the
/// snapshot was published; counters accumulate over the pool's lifetime.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub pool_size: usize,
    pub idle: usize,
    pub busy: usize,
    pub recycling: usize,
    pub queued: usize,
    /// Highest number of simultaneously busy slots seen.
    pub peak_busy: usize,
    /// Jobs that reached the coordinator.
    pub submitted: u64,
    pub compressed: u64,
    pub skipped: u64,
    /// Unit failures and metadata failures.
    pub failed: u64,
    pub crashed: u64,
    pub timed_out: u64,
    /// Jobs refused at admission (queue full, shutting down).
    pub rejected: u64,
    /// Contexts started to replace crashed or abandoned ones.
    pub restarts: u64,
    /// Contexts left running past their deadline.
    pub abandoned: u64,
}

impl PoolStats {
    fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            idle: pool_size,
            ..Self::default()
        }
    }

    /// Slots with a running context.
    pub fn live_workers(&self) -> usize {
        self.idle + self.busy
    }

    /// Jobs that reached a terminal state after being admitted.
    pub fn resolved(&self) -> u64 {
        self.compressed + self.skipped + self.failed + self.crashed + self.timed_out
    }
}

/// A fixed-size pool of compression workers.
///
/// ```no_run
/// use gallery_compressor::{CompressionPool, InMemoryMetadata, PoolConfig};
/// use std::sync::Arc;
///
/// let store = Arc::new(InMemoryMetadata::new());
/// store.insert("/users/alice/images-1.jpg", 812_000);
///
/// let pool = CompressionPool::new(PoolConfig::default(), store.clone())?;
/// let handle = pool.submit(std::env::current_dir()?.join("users/alice/images-1.jpg"));
/// let outcome = handle.wait()?;
/// println!("{:?}", outcome.new_size());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct CompressionPool {
    events: Sender<Event>,
    accepting: AtomicBool,
    next_id: Mutex<u64>,
    stats: Arc<Mutex<PoolStats>>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
    pool_size: usize,
}

impl CompressionPool {
    /// Start a pool running [`ImageRecompressor`] with `config.settings`.
    pub fn new(config: PoolConfig, store: Arc<dyn MetadataStore>) -> Result<Self> {
        let unit: Arc<dyn Recompress> = Arc::new(ImageRecompressor::new(config.settings.clone()));
        Self::with_unit(config, unit, store)
    }

    /// Start a pool running an arbitrary compression unit.
    pub fn with_unit(
        config: PoolConfig,
        unit: Arc<dyn Recompress>,
        store: Arc<dyn MetadataStore>,
    ) -> Result<Self> {
        config.validate()?;
        let pool_size = config.pool_size;
        let (events_tx, events_rx) = unbounded();

        let mut workers = Vec::with_capacity(pool_size);
        for slot in 0..pool_size {
            let worker = Worker::spawn(slot, &unit, &events_tx)
                .map_err(|e| CompressError::spawn_failed(format!("worker {slot}"), e))?;
            workers.push(worker);
        }

        let stats = Arc::new(Mutex::new(PoolStats::new(pool_size)));
        let coordinator = Coordinator {
            workers,
            queue: VecDeque::new(),
            unit,
            reconciler: Reconciler::new(config.storage, store),
            events: events_rx,
            events_tx: events_tx.clone(),
            job_timeout: config.job_timeout,
            max_queue_depth: config.max_queue_depth,
            counters: PoolStats::new(pool_size),
            published: Arc::clone(&stats),
            shutdown: None,
        };

        let handle = thread::Builder::new()
            .name("compress-coordinator".to_string())
            .spawn(move || coordinator.run())
            .map_err(|e| CompressError::spawn_failed("coordinator", e))?;

        info!(
            pool_size,
            job_timeout_ms = config.job_timeout.map(|t| t.as_millis() as u64),
            max_queue_depth = config.max_queue_depth,
            "compression pool started"
        );

        Ok(Self {
            events: events_tx,
            accepting: AtomicBool::new(true),
            next_id: Mutex::new(0),
            stats,
            coordinator: Mutex::new(Some(handle)),
            pool_size,
        })
    }

    /// Queue one file. Never blocks on compression.
    ///
    /// Admission failures (queue full, pool shut down) resolve the returned
    /// handle with the corresponding error.
    pub fn submit(&self, path: impl Into<PathBuf>) -> JobHandle {
        let path = path.into();
        // ids and channel order must agree, so both happen under the lock
        let mut next_id = self.next_id.lock();
        let (job, handle) = Job::new(JobId::new(*next_id), path);
        *next_id += 1;

        if !self.accepting.load(Ordering::Acquire) {
            drop(next_id);
            debug!(job = %job.id, "submit after shutdown");
            job.fail(CompressError::pool_shut_down());
            return handle;
        }

        if let Err(err) = self.events.send(Event::Submit(job)) {
            drop(next_id);
            if let Event::Submit(job) = err.into_inner() {
                job.fail(CompressError::pool_shut_down());
            }
        }
        handle
    }

    /// Queue several files, in order.
    pub fn submit_all<I, P>(&self, paths: I) -> Vec<JobHandle>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        paths.into_iter().map(|path| self.submit(path)).collect()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.lock().clone()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting jobs, finish everything already queued or running,
    /// then stop the workers. Blocks until done. Safe to call repeatedly.
    pub fn shutdown(&self) {
        self.stop(ShutdownMode::Drain);
    }

    /// Stop accepting jobs and reject everything still queued with
    /// `PoolShutDown`. Jobs already running finish normally.
    pub fn shutdown_now(&self) {
        self.stop(ShutdownMode::Abort);
    }

    fn stop(&self, mode: ShutdownMode) {
        self.accepting.store(false, Ordering::Release);
        let Some(handle) = self.coordinator.lock().take() else {
            return;
        };
        let _ = self.events.send(Event::Shutdown(mode));
        if handle.join().is_err() {
            error!("compression pool coordinator panicked");
        }
    }
}

impl Drop for CompressionPool {
    fn drop(&mut self) {
        self.stop(ShutdownMode::Drain);
    }
}

struct Coordinator {
    workers: Vec<Worker>,
    queue: VecDeque<Job>,
    unit: Arc<dyn Recompress>,
    reconciler: Reconciler,
    events: Receiver<Event>,
    // kept for respawning contexts, so `events` never disconnects
    events_tx: Sender<Event>,
    job_timeout: Option<Duration>,
    max_queue_depth: usize,
    counters: PoolStats,
    published: Arc<Mutex<PoolStats>>,
    shutdown: Option<ShutdownMode>,
}

impl Coordinator {
    fn run(mut self) {
        loop {
            let event = match self.next_wakeup() {
                Some(at) => match self.events.recv_deadline(at) {
                    Ok(event) => Some(event),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.events.recv() {
                    Ok(event) => Some(event),
                    Err(_) => break,
                },
            };
            if let Some(event) = event {
                self.handle(event);
            }

            let now = Instant::now();
            self.expire_overdue(now);
            self.retry_respawns(now);
            self.dispatch();
            self.publish();

            if self.is_drained() {
                break;
            }
        }

        // submissions that raced with shutdown
        for event in self.events.try_iter() {
            if let Event::Submit(job) = event {
                self.counters.rejected += 1;
                job.fail(CompressError::pool_shut_down());
            }
        }
        *self.published.lock() = self.counters.clone();

        for worker in self.workers.drain(..) {
            worker.stop();
        }
        info!(
            compressed = self.counters.compressed,
            skipped = self.counters.skipped,
            failed = self.counters.failed,
            crashed = self.counters.crashed,
            timed_out = self.counters.timed_out,
            "compression pool stopped"
        );
    }

    /// Earliest job deadline or respawn retry.
    fn next_wakeup(&self) -> Option<Instant> {
        self.workers
            .iter()
            .filter_map(|w| w.deadline().or_else(|| w.respawn_due(RESPAWN_BACKOFF)))
            .min()
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Submit(job) => self.admit(job),
            Event::Finished {
                slot,
                generation,
                job_id,
                outcome,
            } => {
                let Some(busy) = self.workers.get_mut(slot).and_then(|w| w.finish(generation, job_id))
                else {
                    debug!(worker = slot, generation, job = %job_id, "ignoring result from retired context");
                    return;
                };
                self.complete(slot, busy, outcome);
            }
            Event::Exited { slot, generation } => self.context_exited(slot, generation),
            Event::Shutdown(mode) => self.begin_shutdown(mode),
        }
    }

    fn admit(&mut self, job: Job) {
        self.counters.submitted += 1;
        if self.shutdown.is_some() {
            self.counters.rejected += 1;
            job.fail(CompressError::pool_shut_down());
            return;
        }
        if self.max_queue_depth > 0 && self.queue.len() >= self.max_queue_depth {
            self.counters.rejected += 1;
            warn!(job = %job.id, path = %job.path.display(), queued = self.queue.len(), "queue full, rejecting job");
            job.fail(CompressError::queue_full(self.max_queue_depth));
            return;
        }
        debug!(job = %job.id, path = %job.path.display(), "job queued");
        self.queue.push_back(job);
    }

    fn complete(&mut self, slot: usize, busy: BusyJob, outcome: CompressionOutcome) {
        let BusyJob { job, started, .. } = busy;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let waited_ms = started.duration_since(job.submitted_at).as_millis() as u64;

        match outcome {
            CompressionOutcome::Ok { new_size } => {
                match self.reconciler.reconcile(&job.path, new_size) {
                    Ok(()) => {
                        self.counters.compressed += 1;
                        debug!(worker = slot, job = %job.id, new_size, elapsed_ms, waited_ms, "job compressed");
                        job.compressed(new_size);
                    }
                    Err(err) => {
                        self.counters.failed += 1;
                        job.fail(err);
                    }
                }
            }
            CompressionOutcome::Skipped { reason } => {
                self.counters.skipped += 1;
                debug!(worker = slot, job = %job.id, %reason, "job skipped");
                job.skipped(reason);
            }
            CompressionOutcome::Failed { error } => {
                self.counters.failed += 1;
                warn!(
                    worker = slot,
                    job = %job.id,
                    path = %job.path.display(),
                    category = error.category().as_str(),
                    error = %error,
                    "recompression failed"
                );
                job.fail(error);
            }
        }
    }

    fn context_exited(&mut self, slot: usize, generation: u64) {
        let Some(worker) = self.workers.get_mut(slot) else {
            return;
        };
        let Some(crash) = worker.exited(generation) else {
            debug!(worker = slot, generation, "retired context exited");
            return;
        };

        self.counters.crashed += u64::from(crash.job.is_some());
        match crash.job {
            Some(BusyJob { job, .. }) => {
                error!(
                    worker = slot,
                    job = %job.id,
                    path = %job.path.display(),
                    panic = %crash.message,
                    "worker context crashed"
                );
                let err = CompressError::worker_crashed(slot, &job.path, crash.message);
                job.fail(err);
            }
            None => {
                error!(worker = slot, panic = %crash.message, "idle worker context exited");
            }
        }
        self.respawn(slot);
    }

    fn expire_overdue(&mut self, now: Instant) {
        let Some(timeout) = self.job_timeout else {
            return;
        };
        for slot in 0..self.workers.len() {
            if !self.workers[slot].is_overdue(now) {
                continue;
            }
            let Some(BusyJob { job, .. }) = self.workers[slot].abandon() else {
                continue;
            };
            self.counters.timed_out += 1;
            self.counters.abandoned += 1;
            let timeout_ms = timeout.as_millis() as u64;
            warn!(
                worker = slot,
                job = %job.id,
                path = %job.path.display(),
                timeout_ms,
                "job timed out, abandoning worker context"
            );
            let err = CompressError::job_timed_out(slot, &job.path, timeout_ms);
            job.fail(err);
            self.respawn(slot);
        }
    }

    fn retry_respawns(&mut self, now: Instant) {
        for slot in 0..self.workers.len() {
            let due = self.workers[slot]
                .respawn_due(RESPAWN_BACKOFF)
                .is_some_and(|at| at <= now);
            if due {
                self.respawn(slot);
            }
        }
    }

    fn respawn(&mut self, slot: usize) {
        let worker = &mut self.workers[slot];
        match worker.recycle(&self.unit, &self.events_tx) {
            Ok(()) => self.counters.restarts += 1,
            Err(e) => error!(
                worker = slot,
                error = %e,
                retry_in_ms = RESPAWN_BACKOFF.as_millis() as u64,
                "failed to start replacement worker context"
            ),
        }
    }

    fn dispatch(&mut self) {
        while !self.queue.is_empty() {
            let Some(slot) = self.workers.iter().position(Worker::is_idle) else {
                return;
            };
            let Some(job) = self.queue.pop_front() else {
                return;
            };
            let job_id = job.id;
            match self.workers[slot].assign(job, self.job_timeout) {
                Ok(()) => debug!(worker = slot, job = %job_id, "job dispatched"),
                Err(job) => {
                    // context died between jobs; its exit event is now stale
                    warn!(worker = slot, "worker context gone before dispatch");
                    self.queue.push_front(job);
                    self.respawn(slot);
                }
            }
        }
    }

    fn begin_shutdown(&mut self, mode: ShutdownMode) {
        if self.shutdown != Some(ShutdownMode::Abort) {
            self.shutdown = Some(mode);
        }
        info!(?mode, queued = self.queue.len(), "compression pool shutting down");
        if mode == ShutdownMode::Abort {
            for job in self.queue.drain(..) {
                self.counters.rejected += 1;
                job.fail(CompressError::pool_shut_down());
            }
        }
    }

    fn is_drained(&self) -> bool {
        self.shutdown.is_some()
            && self.queue.is_empty()
            && !self.workers.iter().any(Worker::is_busy)
    }

    fn publish(&mut self) {
        let busy = self.workers.iter().filter(|w| w.is_busy()).count();
        self.counters.idle = self.workers.iter().filter(|w| w.is_idle()).count();
        self.counters.busy = busy;
        self.counters.recycling = self.workers.iter().filter(|w| w.is_recycling()).count();
        self.counters.queued = self.queue.len();
        self.counters.peak_busy = self.counters.peak_busy.max(busy);
        *self.published.lock() = self.counters.clone();
    }
}
