// src/pool/worker.rs
//
// Worker slots.
//
// A slot is a fixed position in the pool. Its execution context is one
// dedicated thread that receives an assignment, runs the compression unit
// and reports back. The context shares nothing mutable with the pool: it
// owns its assignment receiver, a clone of the event sender and an `Arc`
// of the immutable unit.
//
// Contexts are replaced in place (same slot, next generation) after a crash
// or a timeout. Events carry the generation that produced them, so anything
// a retired context says afterwards is recognised as stale.

use crate::engine::{panic_message, CompressionOutcome, Recompress};
use crate::pool::dispatch::Event;
use crate::pool::job::{Job, JobId};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Work handed to a context.
#[derive(Debug)]
pub(crate) struct Assignment {
    pub(crate) job_id: JobId,
    pub(crate) path: PathBuf,
}

/// The job a busy slot is working on.
#[derive(Debug)]
pub(crate) struct BusyJob {
    pub(crate) job: Job,
    pub(crate) started: Instant,
    pub(crate) deadline: Option<Instant>,
}

#[derive(Debug)]
pub(crate) enum WorkerState {
    Idle,
    Busy(BusyJob),
    /// No live context; a respawn is pending.
    Recycling { last_attempt: Instant },
}

/// A context that exited while it was the slot's current generation.
pub(crate) struct Crash {
    pub(crate) job: Option<BusyJob>,
    pub(crate) message: String,
}

struct Context {
    assignments: Sender<Assignment>,
    thread: JoinHandle<()>,
}

pub(crate) struct Worker {
    slot: usize,
    generation: u64,
    state: WorkerState,
    context: Option<Context>,
    jobs_completed: u64,
    restarts: u64,
}

impl Worker {
    /// Start slot `slot` with its first context.
    pub(crate) fn spawn(
        slot: usize,
        unit: &Arc<dyn Recompress>,
        events: &Sender<Event>,
    ) -> std::io::Result<Worker> {
        let context = start_context(slot, 0, unit, events)?;
        Ok(Worker {
            slot,
            generation: 0,
            state: WorkerState::Idle,
            context: Some(context),
            jobs_completed: 0,
            restarts: 0,
        })
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub(crate) fn restarts(&self) -> u64 {
        self.restarts
    }

    pub(crate) fn is_idle(&self) -> bool {
        matches!(self.state, WorkerState::Idle)
    }

    pub(crate) fn is_busy(&self) -> bool {
        matches!(self.state, WorkerState::Busy(_))
    }

    pub(crate) fn is_recycling(&self) -> bool {
        matches!(self.state, WorkerState::Recycling { .. })
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        match &self.state {
            WorkerState::Busy(busy) => busy.deadline,
            _ => None,
        }
    }

    pub(crate) fn is_overdue(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| deadline <= now)
    }

    /// When the next respawn attempt is due, if the slot is recycling.
    pub(crate) fn respawn_due(&self, backoff: Duration) -> Option<Instant> {
        match self.state {
            WorkerState::Recycling { last_attempt } => Some(last_attempt + backoff),
            _ => None,
        }
    }

    /// Hand an idle slot its next job. The job comes back if the context
    /// can no longer take it.
    pub(crate) fn assign(&mut self, job: Job, timeout: Option<Duration>) -> Result<(), Job> {
        debug_assert!(self.is_idle(), "slot {} is not idle", self.slot);
        let Some(context) = self.context.as_ref().filter(|_| self.is_idle()) else {
            return Err(job);
        };

        let assignment = Assignment {
            job_id: job.id,
            path: job.path.clone(),
        };
        match context.assignments.try_send(assignment) {
            Ok(()) => {
                let started = Instant::now();
                self.state = WorkerState::Busy(BusyJob {
                    job,
                    started,
                    deadline: timeout.map(|t| started + t),
                });
                Ok(())
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => Err(job),
        }
    }

    /// Accept a result. Returns the finished job unless the result is stale.
    pub(crate) fn finish(&mut self, generation: u64, job_id: JobId) -> Option<BusyJob> {
        if generation != self.generation {
            return None;
        }
        match &self.state {
            WorkerState::Busy(busy) if busy.job.id == job_id => {}
            _ => return None,
        }
        let WorkerState::Busy(busy) = std::mem::replace(&mut self.state, WorkerState::Idle)
        else {
            return None;
        };
        self.jobs_completed += 1;
        Some(busy)
    }

    /// Handle the exit of the context of `generation`.
    ///
    /// Returns `None` for a retired generation. Otherwise the thread is
    /// joined to recover its panic message and the slot is left without a
    /// context, ready for [`Worker::recycle`].
    pub(crate) fn exited(&mut self, generation: u64) -> Option<Crash> {
        if generation != self.generation {
            return None;
        }
        let context = self.context.take()?;
        drop(context.assignments);
        let message = match context.thread.join() {
            Err(payload) => panic_message(payload.as_ref()).into_owned(),
            Ok(()) => "context exited unexpectedly".to_string(),
        };

        let job = match std::mem::replace(
            &mut self.state,
            WorkerState::Recycling {
                last_attempt: Instant::now(),
            },
        ) {
            WorkerState::Busy(busy) => Some(busy),
            _ => None,
        };
        Some(Crash { job, message })
    }

    /// Walk away from a context that is stuck on its job.
    ///
    /// Threads cannot be killed. The context keeps running until the unit
    /// returns; its assignment channel is closed so it exits right after,
    /// and its result carries a retired generation.
    pub(crate) fn abandon(&mut self) -> Option<BusyJob> {
        let WorkerState::Busy(_) = self.state else {
            return None;
        };
        // dropping the JoinHandle detaches the thread
        self.context = None;
        match std::mem::replace(
            &mut self.state,
            WorkerState::Recycling {
                last_attempt: Instant::now(),
            },
        ) {
            WorkerState::Busy(busy) => Some(busy),
            _ => None,
        }
    }

    /// Start a new context in this slot. On failure the slot stays
    /// `Recycling` and the caller retries later.
    pub(crate) fn recycle(
        &mut self,
        unit: &Arc<dyn Recompress>,
        events: &Sender<Event>,
    ) -> std::io::Result<()> {
        // a context still attached here is dead; detach it
        self.context = None;
        self.generation += 1;
        self.restarts += 1;
        match start_context(self.slot, self.generation, unit, events) {
            Ok(context) => {
                self.context = Some(context);
                self.state = WorkerState::Idle;
                debug!(
                    worker = self.slot,
                    generation = self.generation,
                    "worker context restarted"
                );
                Ok(())
            }
            Err(e) => {
                self.context = None;
                self.state = WorkerState::Recycling {
                    last_attempt: Instant::now(),
                };
                Err(e)
            }
        }
    }

    /// Close the context's channel and wait for it to exit.
    pub(crate) fn stop(mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        drop(context.assignments);
        if context.thread.join().is_err() {
            warn!(worker = self.slot, "worker context panicked while stopping");
        }
        debug!(
            worker = self.slot,
            jobs_completed = self.jobs_completed,
            restarts = self.restarts,
            "worker stopped"
        );
    }
}

fn start_context(
    slot: usize,
    generation: u64,
    unit: &Arc<dyn Recompress>,
    events: &Sender<Event>,
) -> std::io::Result<Context> {
    // capacity 1: a context never holds more than the job it is running
    let (assignments, rx) = bounded(1);
    let unit = Arc::clone(unit);
    let events = events.clone();
    let thread = thread::Builder::new()
        .name(format!("compress-worker-{slot}"))
        .spawn(move || run_context(slot, generation, unit, rx, events))?;
    Ok(Context {
        assignments,
        thread,
    })
}

fn run_context(
    slot: usize,
    generation: u64,
    unit: Arc<dyn Recompress>,
    assignments: Receiver<Assignment>,
    events: Sender<Event>,
) {
    let _notice = ExitNotice {
        slot,
        generation,
        events: events.clone(),
    };

    for Assignment { job_id, path } in assignments.iter() {
        let outcome: CompressionOutcome = unit.recompress(&path);
        let finished = Event::Finished {
            slot,
            generation,
            job_id,
            outcome,
        };
        if events.send(finished).is_err() {
            break;
        }
    }
}

/// Tells the coordinator a context is gone, including by unwinding.
struct ExitNotice {
    slot: usize,
    generation: u64,
    events: Sender<Event>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.events.send(Event::Exited {
            slot: self.slot,
            generation: self.generation,
        });
    }
}
