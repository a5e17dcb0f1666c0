//! `Ckydb`: a `Store` behind a mutex, plus the two background workers
//! (vacuum, log roller) described by the concurrency model. This is
//! the crate's public lifecycle object — not a CLI or network facade,
//! just the locking/threading discipline the bare `Store` needs to be
//! used safely from more than one call site.
use crate::error::Result;
use crate::store::Store;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};
use log::warn;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const ROLL_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Default threshold, in kilobytes, at which the active log is rolled.
pub const DEFAULT_MAX_FILE_SIZE_KB: u64 = 4 * 1024;
/// Default period, in seconds, between vacuum cycles.
pub const DEFAULT_VACUUM_INTERVAL_SEC: u64 = 5 * 60;

/// A running ckydb database: a `Store` guarded by a single mutex so
/// that `set/get/delete/clear` are linearizable, with a vacuum worker
/// and a log-roller worker running against that same in-memory Store.
pub struct Ckydb {
    store: Arc<Mutex<Store>>,
    vacuum_interval: Duration,
    max_file_size_kb: u64,
    // Holding the sender keeps the channel open; dropping it (on
    // close()) makes every worker's recv_timeout return Disconnected
    // on its next wakeup, which both workers treat as "exit".
    exit_signal: Option<crossbeam::channel::Sender<()>>,
    vacuum_thread: Option<JoinHandle<()>>,
    roll_thread: Option<JoinHandle<()>>,
}

impl Ckydb {
    /// Opens (creating if necessary) the database at `db_path`, loads
    /// it, and starts the background workers.
    pub fn new(db_path: impl Into<PathBuf>, max_file_size_kb: u64, vacuum_interval_sec: u64) -> Result<Self> {
        let mut store = Store::new(db_path, max_file_size_kb);
        store.load()?;

        let mut db = Self {
            store: Arc::new(Mutex::new(store)),
            vacuum_interval: Duration::from_secs(vacuum_interval_sec),
            max_file_size_kb,
            exit_signal: None,
            vacuum_thread: None,
            roll_thread: None,
        };
        db.start();
        Ok(db)
    }

    /// Sets the given key `k` to the value `v`, serialized by the
    /// shared lock.
    pub fn set(&self, k: &str, v: &str) -> Result<()> {
        self.lock().set(k, v)
    }

    /// Gets the value corresponding to the given key `k`.
    pub fn get(&self, k: &str) -> Result<String> {
        self.lock().get(k)
    }

    /// Deletes the value for the given key `k`.
    pub fn delete(&self, k: &str) -> Result<()> {
        self.lock().delete(k)
    }

    /// Clears all data in the database.
    pub fn clear(&self) -> Result<()> {
        self.lock().clear()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts the vacuum and log-roller workers. A no-op if they are
    /// already running.
    pub fn start(&mut self) {
        if self.exit_signal.is_some() {
            return;
        }

        let (tx, rx) = bounded::<()>(0);
        self.exit_signal = Some(tx);

        self.vacuum_thread = Some(spawn_worker(
            Arc::clone(&self.store),
            rx.clone(),
            self.vacuum_interval,
            |store| store.load().and_then(|_| store.vacuum()),
            "vacuum",
        ));

        let max_file_size_kb = self.max_file_size_kb;
        self.roll_thread = Some(spawn_worker(
            Arc::clone(&self.store),
            rx,
            ROLL_CHECK_INTERVAL,
            move |store| {
                store.load()?;
                if store.log_file_size()? >= max_file_size_kb as f64 {
                    store.roll_log()?;
                }
                Ok(())
            },
            "roll-log",
        ));
    }

    /// Stops both background workers and waits for them to exit.
    /// Idempotent; safe to call before `start()` (a no-op then) and
    /// safe to call again after `start()` restarts them.
    pub fn close(&mut self) {
        self.exit_signal.take();
        if let Some(handle) = self.vacuum_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.roll_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Ckydb {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_worker<F>(
    store: Arc<Mutex<Store>>,
    exit: Receiver<()>,
    interval: Duration,
    mut cycle: F,
    name: &'static str,
) -> JoinHandle<()>
where
    F: FnMut(&mut Store) -> Result<()> + Send + 'static,
{
    thread::spawn(move || loop {
        match exit.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let mut store = match store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = cycle(&mut store) {
            warn!("{} cycle failed: {}", name, err);
        }
    })
}
