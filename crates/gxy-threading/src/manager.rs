//! Named threads with per-thread local storage (§2 Thread Manager / Pool row).
//!
//! The original Galaxy `ThreadManager` tracks the comms, worker, ray-queue
//! and pool threads by name so they can be joined at shutdown and so
//! per-thread diagnostics (the Event Log, §4.1 of SPEC_FULL) can be keyed by
//! a stable name rather than an OS thread id. `ThreadManager` here is that
//! registry: [`ThreadManager::spawn`] starts a named thread and keeps its
//! `JoinHandle`, and [`ThreadManager::join_all`] drains them at shutdown.

use std::collections::HashMap;
use std::thread::JoinHandle;

use tracing::{debug, info};

/// A registered, named thread.
pub struct ThreadHandle {
    pub name: String,
    join: JoinHandle<()>,
}

/// Process-wide registry of named threads.
#[derive(Default)]
pub struct ThreadManager {
    handles: Vec<ThreadHandle>,
}

impl ThreadManager {
    pub fn new() -> Self {
        ThreadManager {
            handles: Vec::new(),
        }
    }

    /// Spawn a thread named `name` running `body`, and register it.
    pub fn spawn<F>(&mut self, name: impl Into<String>, body: F) -> std::io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        debug!(thread = %name, "spawning");
        let join = std::thread::Builder::new()
            .name(name.clone())
            .spawn(body)?;
        self.handles.push(ThreadHandle { name, join });
        Ok(())
    }

    /// Names of every thread currently registered (not necessarily alive).
    pub fn names(&self) -> Vec<&str> {
        self.handles.iter().map(|h| h.name.as_str()).collect()
    }

    /// Join every registered thread, in registration order. Threads that
    /// already exited return immediately; a panic inside a thread surfaces
    /// as a logged warning rather than propagating, since one thread
    /// crashing should not stop the others from being joined and
    /// accounted for.
    pub fn join_all(&mut self) {
        for h in self.handles.drain(..) {
            match h.join.join() {
                Ok(()) => info!(thread = %h.name, "joined"),
                Err(_) => tracing::warn!(thread = %h.name, "thread panicked"),
            }
        }
    }
}

/// Process-wide per-thread local storage, keyed by thread name rather than
/// `std::thread::LocalKey`, so non-owning code (e.g. the Event Log) can look
/// up a value for a thread it didn't spawn.
#[derive(Default)]
pub struct ThreadLocalStore<T> {
    values: parking_lot::Mutex<HashMap<String, T>>,
}

impl<T: Clone> ThreadLocalStore<T> {
    pub fn new() -> Self {
        ThreadLocalStore {
            values: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, thread_name: impl Into<String>, value: T) {
        self.values.lock().insert(thread_name.into(), value);
    }

    pub fn get(&self, thread_name: &str) -> Option<T> {
        self.values.lock().get(thread_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn spawn_and_join_all_runs_body() {
        let ran = Arc::new(AtomicBool::new(false));
        let mut mgr = ThreadManager::new();
        let ran2 = ran.clone();
        mgr.spawn("worker", move || ran2.store(true, Ordering::SeqCst))
            .unwrap();
        mgr.join_all();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn names_reflects_registration() {
        let mut mgr = ThreadManager::new();
        mgr.spawn("comms", || {}).unwrap();
        mgr.spawn("ray-queue", || {}).unwrap();
        let names = mgr.names();
        assert_eq!(names, vec!["comms", "ray-queue"]);
        mgr.join_all();
    }

    #[test]
    fn thread_local_store_roundtrip() {
        let store: ThreadLocalStore<i32> = ThreadLocalStore::new();
        store.set("comms", 7);
        assert_eq!(store.get("comms"), Some(7));
        assert_eq!(store.get("worker"), None);
    }
}
