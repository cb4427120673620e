// src/pool/job.rs
//
// Jobs and their handles.
//
// Each job owns a one-shot result slot. The submitter holds the read side
// (`JobHandle`), the coordinator holds the write side (`Completer`) inside
// the `Job`. Resolving consumes the job, so a second resolution cannot be
// written down. A job dropped unresolved resolves as `PoolShutDown`.

use crate::error::CompressError;
use parking_lot::{Condvar, Mutex};
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Identifier assigned at submission; increases in queue order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

impl JobId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Successful terminal state of a job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// File replaced and its record updated.
    Compressed { path: PathBuf, new_size: u64 },
    /// File left as it was.
    Skipped {
        path: PathBuf,
        reason: Cow<'static, str>,
    },
}

impl JobOutcome {
    pub fn path(&self) -> &Path {
        match self {
            JobOutcome::Compressed { path, .. } | JobOutcome::Skipped { path, .. } => path,
        }
    }

    pub fn new_size(&self) -> Option<u64> {
        match self {
            JobOutcome::Compressed { new_size, .. } => Some(*new_size),
            JobOutcome::Skipped { .. } => None,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, JobOutcome::Compressed { .. })
    }
}

/// What a [`JobHandle`] resolves to.
pub type JobResult = Result<JobOutcome, CompressError>;

#[derive(Debug, Default)]
struct Slot {
    result: Option<JobResult>,
    resolved: bool,
    taken: bool,
    waker: Option<Waker>,
}

#[derive(Debug, Default)]
struct Shared {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Shared {
    fn resolve(&self, result: JobResult) {
        let waker = {
            let mut slot = self.slot.lock();
            if slot.resolved {
                return;
            }
            slot.result = Some(result);
            slot.resolved = true;
            slot.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Read side of a job: wait for it, poll it, or just drop it.
///
/// Dropping a handle does not cancel the job. `JobHandle` is also a
/// [`Future`], so async callers can `.await` it; it does not need a
/// particular runtime.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    path: PathBuf,
    shared: Arc<Shared>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the job reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.shared.slot.lock().resolved
    }

    /// Block the calling thread until the job resolves.
    pub fn wait(self) -> JobResult {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(result) = take_result(&mut slot) {
                return result;
            }
            self.shared.ready.wait(&mut slot);
        }
    }

    /// Block for at most `timeout`. On expiry the handle is handed back so
    /// the caller can keep waiting later.
    pub fn wait_for(self, timeout: Duration) -> Result<JobResult, JobHandle> {
        let deadline = Instant::now() + timeout;
        let outcome = {
            let mut slot = self.shared.slot.lock();
            loop {
                if let Some(result) = take_result(&mut slot) {
                    break Some(result);
                }
                if self.shared.ready.wait_until(&mut slot, deadline).timed_out() {
                    break take_result(&mut slot);
                }
            }
        };
        outcome.ok_or(self)
    }
}

fn take_result(slot: &mut Slot) -> Option<JobResult> {
    if slot.taken {
        panic!("job result was already taken");
    }
    let result = slot.result.take()?;
    slot.taken = true;
    Some(result)
}

impl Future for JobHandle {
    type Output = JobResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<JobResult> {
        let mut slot = self.shared.slot.lock();
        if let Some(result) = take_result(&mut slot) {
            return Poll::Ready(result);
        }
        let stale = slot
            .waker
            .as_ref()
            .map_or(true, |waker| !waker.will_wake(cx.waker()));
        if stale {
            slot.waker = Some(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Write side of a job's result slot.
#[derive(Debug)]
struct Completer {
    shared: Option<Arc<Shared>>,
}

impl Completer {
    fn complete(mut self, result: JobResult) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(result);
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(Err(CompressError::pool_shut_down()));
        }
    }
}

/// One submitted path, owned by the coordinator until it resolves.
#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) id: JobId,
    pub(crate) path: PathBuf,
    pub(crate) submitted_at: Instant,
    completer: Completer,
}

impl Job {
    pub(crate) fn new(id: JobId, path: PathBuf) -> (Job, JobHandle) {
        let shared = Arc::new(Shared::default());
        let handle = JobHandle {
            id,
            path: path.clone(),
            shared: Arc::clone(&shared),
        };
        let job = Job {
            id,
            path,
            submitted_at: Instant::now(),
            completer: Completer {
                shared: Some(shared),
            },
        };
        (job, handle)
    }

    pub(crate) fn compressed(self, new_size: u64) {
        let Job {
            path, completer, ..
        } = self;
        completer.complete(Ok(JobOutcome::Compressed { path, new_size }));
    }

    pub(crate) fn skipped(self, reason: Cow<'static, str>) {
        let Job {
            path, completer, ..
        } = self;
        completer.complete(Ok(JobOutcome::Skipped { path, reason }));
    }

    pub(crate) fn fail(self, error: CompressError) {
        self.completer.complete(Err(error));
    }
}
