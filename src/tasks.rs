//! Bounded collection of in-flight non-blocking tasks.
//!
//! Each worker is tracked as a join handle plus a shared done flag set by
//! the worker on exit. A background reaper joins finished workers; on
//! shutdown the container drains with a timeout and abandons whatever is
//! still running (the handles are dropped, detaching the tasks; their
//! metadata remains on disk).

use crate::error::{AgentError, AgentResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

const REAPER_INTERVAL: Duration = Duration::from_millis(500);

/// Sets the shared done flag when dropped, so the flag is raised on every
/// worker exit path, panics included.
pub struct DoneGuard {
    flag: Arc<AtomicBool>,
}

impl DoneGuard {
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

struct TaskEntry {
    handle: JoinHandle<()>,
    done: Arc<AtomicBool>,
}

/// Bounded container of in-flight workers with a background reaper
pub struct TaskContainer {
    name: String,
    entries: Arc<Mutex<Vec<TaskEntry>>>,
    capacity: usize,
    reaper: JoinHandle<()>,
}

impl TaskContainer {
    pub fn new(name: &str, capacity: usize) -> Self {
        let entries: Arc<Mutex<Vec<TaskEntry>>> = Arc::new(Mutex::new(Vec::new()));
        let reaper = tokio::spawn(reap_loop(Arc::clone(&entries)));

        Self {
            name: name.to_string(),
            entries,
            capacity,
            reaper,
        }
    }

    /// Track a spawned worker. Finished entries are reaped first; fails
    /// when the container is still at capacity afterwards.
    pub fn add(&self, handle: JoinHandle<()>, done: Arc<AtomicBool>) -> AgentResult<()> {
        let mut entries = self.entries.lock().expect("task container lock poisoned");
        entries.retain(|entry| !entry.done.load(Ordering::SeqCst));

        if entries.len() >= self.capacity {
            return Err(AgentError::capacity(format!(
                "'{}' already holds {} tasks",
                self.name, self.capacity
            )));
        }

        entries.push(TaskEntry { handle, done });
        Ok(())
    }

    /// Whether a further `add` would be rejected
    pub fn at_capacity(&self) -> bool {
        let mut entries = self.entries.lock().expect("task container lock poisoned");
        entries.retain(|entry| !entry.done.load(Ordering::SeqCst));
        entries.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("task container lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for in-flight workers to complete, up to the drain timeout.
    /// Returns the number of workers abandoned.
    pub async fn drain(&self, timeout: Duration) -> usize {
        self.reaper.abort();

        let entries: Vec<TaskEntry> = {
            let mut entries = self.entries.lock().expect("task container lock poisoned");
            entries.drain(..).collect()
        };

        if entries.is_empty() {
            return 0;
        }
        debug!(container = %self.name, tasks = entries.len(), "draining task container");

        let deadline = Instant::now() + timeout;
        let mut abandoned = 0;
        for entry in entries {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, entry.handle).await {
                Ok(_) => {}
                Err(_) => abandoned += 1,
            }
        }

        if abandoned > 0 {
            warn!(
                container = %self.name,
                abandoned,
                "tasks still running after the drain timeout were abandoned"
            );
        }
        abandoned
    }
}

impl Drop for TaskContainer {
    fn drop(&mut self) {
        self.reaper.abort();
    }
}

async fn reap_loop(entries: Arc<Mutex<Vec<TaskEntry>>>) {
    let mut interval = tokio::time::interval(REAPER_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let finished: Vec<TaskEntry> = {
            let mut entries = entries.lock().expect("task container lock poisoned");
            let mut finished = Vec::new();
            let mut index = 0;
            while index < entries.len() {
                if entries[index].done.load(Ordering::SeqCst) {
                    finished.push(entries.swap_remove(index));
                } else {
                    index += 1;
                }
            }
            finished
        };

        for entry in finished {
            // The done flag is set, so this join returns promptly
            let _ = entry.handle.await;
        }
    }
}
