//! The `Work` trait and the `RuntimeHandle` seam it acts through (§3, §9).
//!
//! Every Work subclass in the original is a C++ polymorphic type with two
//! hooks (`Serialize`/`Action`/`CollectiveAction`). Rust favors a closed set
//! of variants over open-ended subclassing (§9 design note: "Implement as a
//! closed set of registered variants with a factory keyed by stable `uint32`
//! tags"), but each concrete Work type still needs to *act* — send more
//! messages, touch a keyed-object registry, enqueue ray packets — without
//! `gxy-message` depending on every crate that defines a Work type (which
//! would be a dependency cycle, since those crates depend on `gxy-message`
//! for `Work` itself).
//!
//! `RuntimeHandle` is the seam: a trait object each Work's `action`/
//! `collective_action` receives, giving it exactly the primitives the
//! original's `Application`/`MessageManager` exposed (rank, size, send,
//! broadcast) plus an [`Extensions`] type-map any higher layer can stash its
//! own shared state in (the keyed-object registry, the ray queue manager,
//! …) and downcast back out. This is the same pattern `http::Extensions` /
//! `actix_web::web::Data` use to let middleware-style code reach
//! application state without a generic parameter threading through every
//! layer.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};

use crate::SharedBuffer;

/// A serializable unit of action (§3 Work).
pub trait Work: Any + Send + Sync + fmt::Debug {
    /// Registered Work-Registry type tag.
    fn work_type_id(&self) -> u32;

    /// Whether the comms thread should run [`Work::collective_action`]
    /// itself, holding the collective communicator, instead of handing this
    /// Work to the worker thread for [`Work::action`].
    fn is_collective(&self) -> bool {
        false
    }

    /// Serialize this Work's payload for the wire.
    fn serialize(&self) -> SharedBuffer;

    /// Non-collective action, run by the worker thread. Returns `false` to
    /// signal a fatal error (§7: "non-collective actions that fail simply
    /// stop processing the message").
    fn action(&self, _rt: &dyn RuntimeHandle) -> bool {
        true
    }

    /// Collective action, run by the comms thread while holding the
    /// collective communicator. `is_root` is set only on the process where
    /// the broadcast originated. Returns `false` to signal a fatal error
    /// that should trigger `Application::Kill` (§7).
    fn collective_action(&self, _rt: &dyn RuntimeHandle, _is_root: bool) -> bool {
        true
    }

    /// Upcast for the [`Extensions`]-style downcasting used in tests and by
    /// callers that need to recover a concrete Work type after dispatch.
    fn as_any(&self) -> &dyn Any;
}

/// The primitives a `Work::action`/`collective_action` needs from the
/// runtime it's executing under, without naming the concrete transport or
/// application type.
pub trait RuntimeHandle: Send + Sync {
    fn rank(&self) -> i32;
    fn size(&self) -> i32;

    /// Send `work` point-to-point to `dest`.
    fn send_work(&self, work: Arc<dyn Work>, dest: i32);

    /// Broadcast `work` rooted at this process. If `blocking`, the returned
    /// [`BroadcastWaiter`] is `Some` and resolves once the *local* action has
    /// run (§4.4 "Wait semantics").
    fn broadcast_work(
        &self,
        work: Arc<dyn Work>,
        collective: bool,
        blocking: bool,
    ) -> Option<BroadcastWaiter>;

    /// Process-wide type map for shared application state (keyed-object
    /// registry, ray queue manager, …) that concrete Work impls downcast
    /// out of.
    fn extensions(&self) -> &Extensions;
}

/// A type-keyed map of `Arc<dyn Any + Send + Sync>` values, the same pattern
/// `http::Extensions` uses, so unrelated crates can share state through a
/// `RuntimeHandle` without a dependency cycle.
#[derive(Default)]
pub struct Extensions {
    map: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Extensions {
    pub fn new() -> Self {
        Extensions {
            map: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert<T: Any + Send + Sync>(&self, value: Arc<T>) {
        self.map.lock().unwrap().insert(TypeId::of::<T>(), value);
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.map
            .lock()
            .unwrap()
            .get(&TypeId::of::<T>())
            .cloned()
            .map(|v| v.downcast::<T>().expect("TypeId-keyed map is internally consistent"))
    }
}

/// A blocking broadcast's completion signal (§4.4 "Blocking broadcasts").
///
/// Created on the sender for a blocking broadcast; the sender calls
/// [`BroadcastWaiter::wait`] and resumes only after the *local* collective
/// or non-collective action has run — not after remote actions complete.
#[derive(Clone)]
pub struct BroadcastWaiter {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl BroadcastWaiter {
    pub fn new() -> Self {
        BroadcastWaiter {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Signal that the local action has completed.
    pub fn signal(&self) {
        let (lock, cvar) = &*self.inner;
        let mut done = lock.lock().unwrap();
        *done = true;
        cvar.notify_all();
    }

    /// Block until [`BroadcastWaiter::signal`] has been called.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut done = lock.lock().unwrap();
        while !*done {
            done = cvar.wait(done).unwrap();
        }
    }
}

impl Default for BroadcastWaiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Counter(std::sync::atomic::AtomicI32);

    #[test]
    fn extensions_roundtrip_by_type() {
        let ext = Extensions::new();
        ext.insert(Arc::new(Counter(std::sync::atomic::AtomicI32::new(5))));
        let c = ext.get::<Counter>().unwrap();
        assert_eq!(c.0.load(std::sync::atomic::Ordering::SeqCst), 5);
        assert!(ext.get::<String>().is_none());
    }

    #[test]
    fn broadcast_waiter_wait_returns_after_signal() {
        let w = BroadcastWaiter::new();
        let w2 = w.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            w2.signal();
        });
        w.wait();
        handle.join().unwrap();
    }
}
