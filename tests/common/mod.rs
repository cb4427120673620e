// tests/common/mod.rs
//
// Shared helpers for the pool integration tests.

#![allow(dead_code)]

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use gallery_compressor::{
    CompressionOutcome, MetadataStore, PoolConfig, Recompress, ReconcileError, StorageLayout,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const WAIT: Duration = Duration::from_secs(10);

/// A storage root inside a temp dir, laid out like the gallery's `users/`.
pub struct Storage {
    _dir: TempDir,
    pub layout: StorageLayout,
}

impl Storage {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("users");
        std::fs::create_dir_all(root.join("alice")).unwrap();
        Self {
            _dir: dir,
            layout: StorageLayout::new(root, "/users"),
        }
    }

    /// Absolute path of one of alice's uploads.
    pub fn path(&self, name: &str) -> PathBuf {
        self.layout.root().join("alice").join(name)
    }

    /// Record key for one of alice's uploads.
    pub fn key(&self, name: &str) -> String {
        format!("/users/alice/{name}")
    }

    pub fn config(&self, pool_size: usize) -> PoolConfig {
        PoolConfig::default()
            .with_pool_size(pool_size)
            .with_storage(self.layout.clone())
    }
}

/// A store that accepts every update.
pub fn accept_all() -> Arc<dyn MetadataStore> {
    Arc::new(|_: &str, _: u64| -> Result<(), ReconcileError> { Ok(()) })
}

pub fn unit<F>(f: F) -> Arc<dyn Recompress>
where
    F: Fn(&Path) -> CompressionOutcome + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

/// Poll `cond` until it holds or `WAIT` passes.
pub fn wait_until<F: FnMut() -> bool>(mut cond: F) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Holds named jobs inside the unit until the test releases them.
pub struct Gate {
    started: Receiver<String>,
    releases: Mutex<HashMap<String, Sender<()>>>,
}

impl Gate {
    /// Next file name a worker started on.
    pub fn next_started(&self) -> String {
        self.started.recv_timeout(WAIT).expect("no job started in time")
    }

    pub fn release(&self, name: &str) {
        self.releases.lock().remove(name);
    }

    pub fn release_all(&self) {
        self.releases.lock().clear();
    }
}

/// A unit that blocks on every name in `held` until released, then returns
/// `outcome(path)`.
pub fn gated<F>(held: &[&str], outcome: F) -> (Arc<dyn Recompress>, Gate)
where
    F: Fn(&Path) -> CompressionOutcome + Send + Sync + 'static,
{
    let (started_tx, started_rx) = unbounded();
    let mut releases = HashMap::new();
    let mut waits = HashMap::new();
    for name in held {
        let (tx, rx) = bounded::<()>(0);
        releases.insert(name.to_string(), tx);
        waits.insert(name.to_string(), rx);
    }

    let unit = unit(move |path: &Path| {
        let name = file_name(path);
        let _ = started_tx.send(name.clone());
        if let Some(rx) = waits.get(&name) {
            // returns once the sender is dropped
            let _ = rx.recv();
        }
        outcome(path)
    });
    let gate = Gate {
        started: started_rx,
        releases: Mutex::new(releases),
    };
    (unit, gate)
}

struct ThreadWaker(thread::Thread);

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }
}

/// Minimal executor: poll on this thread, park between wakeups.
pub fn block_on<F: Future>(fut: F) -> F::Output {
    let mut fut = Box::pin(fut);
    let waker = Waker::from(Arc::new(ThreadWaker(thread::current())));
    let mut cx = Context::from_waker(&waker);
    loop {
        if let Poll::Ready(out) = Pin::as_mut(&mut fut).poll(&mut cx) {
            return out;
        }
        thread::park();
    }
}
