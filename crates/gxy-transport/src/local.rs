//! `LocalTransport`: the default [`Transport`] (§11 "Real-MPI posture"),
//! running the exact wire protocol of §4.4 over simulated in-process ranks
//! — each rank is a `std::thread`, not a remote process — so every
//! broadcast-tree/collective/quiescence invariant in §8 can be exercised in
//! a single test binary without linking `libmpi`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};
use gxy_message::{BroadcastWaiter, Extensions, Header, Message, RuntimeHandle, Work, WorkRegistry};
use gxy_threading::ThreadManager;
use tracing::{trace, warn};

use crate::tree;
use crate::Transport;

/// Shared state for one simulated rank, split out from [`LocalTransport`]
/// so it can be handed to the comms/worker threads as a plain `Arc` while
/// `LocalTransport` itself owns the `JoinHandle`s (mirrors the teacher's
/// `ThreadManager` holding handles separately from the state threads act
/// on).
struct Inner {
    rank: i32,
    size: i32,
    network_tx: Vec<Sender<Message>>,
    outgoing: gxy_message::MessageQueue,
    incoming: gxy_message::MessageQueue,
    work_registry: Arc<WorkRegistry>,
    extensions: Extensions,
    paused: AtomicBool,
    running: AtomicBool,
}

impl RuntimeHandle for Inner {
    fn rank(&self) -> i32 {
        self.rank
    }

    fn size(&self) -> i32 {
        self.size
    }

    fn send_work(&self, work: Arc<dyn Work>, dest: i32) {
        let _ = self
            .outgoing
            .enqueue(Message::point_to_point(self.rank, dest, work));
    }

    fn broadcast_work(
        &self,
        work: Arc<dyn Work>,
        collective: bool,
        blocking: bool,
    ) -> Option<BroadcastWaiter> {
        let content = work.serialize();
        let waiter = blocking.then(BroadcastWaiter::new);
        let msg = Message {
            header: Header {
                broadcast_root: self.rank,
                sender: self.rank,
                dest: -1,
                type_id: work.work_type_id(),
                collective,
                content_size: content.size() as u32,
            },
            content,
            local_work: Some(work),
            waiter: waiter.clone(),
        };
        let _ = self.outgoing.enqueue(msg);
        waiter
    }

    fn extensions(&self) -> &Extensions {
        &self.extensions
    }
}

impl Inner {
    /// Forward a copy of `msg` to every child this rank owns in the tree
    /// rooted at `msg.header.broadcast_root` (§4.4 "Broadcast tree").
    fn forward(&self, msg: &Message) {
        let (left, right) = tree::children(self.rank, msg.header.broadcast_root, self.size);
        for child in [left, right].into_iter().flatten() {
            let forwarded = Message {
                header: Header {
                    sender: self.rank,
                    ..msg.header.clone()
                },
                content: msg.content.clone(),
                local_work: None,
                waiter: None,
            };
            if self.network_tx[child as usize].send(forwarded).is_err() {
                warn!(dest = child, "network channel closed, dropping forward");
            }
        }
    }

    /// Export a locally-originated message (from `outgoing`, still carrying
    /// `local_work`) onto the network and/or the local dispatch path.
    fn export(self: &Arc<Self>, msg: Message) {
        if !msg.is_broadcast() {
            if self.network_tx[msg.header.dest as usize]
                .send(msg.wire_only())
                .is_err()
            {
                warn!(dest = msg.header.dest, "network channel closed, dropping send");
            }
            return;
        }

        self.forward(&msg);
        self.dispatch_local(msg, true);
    }

    /// A broadcast or point-to-point message that arrived over the network
    /// (`local_work` always `None` here — it crossed a "process" boundary).
    fn handle_incoming(self: &Arc<Self>, msg: Message) {
        if msg.is_broadcast() {
            self.forward(&msg);
        }

        let work = match self.work_registry.deserialize(msg.header.type_id, msg.content.get()) {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "failed to deserialize incoming Work, dropping message");
                return;
            }
        };
        let msg = Message {
            local_work: Some(work),
            ..msg
        };
        self.dispatch_local(msg, false);
    }

    /// Run a message's action on whichever thread the protocol assigns it:
    /// collective actions run inline on the comms thread holding the
    /// collective communicator (here: nothing to hold, since there's no
    /// real MPI communicator — the synchronization is simply "runs before
    /// this thread does anything else"); non-collective actions are hand
    /// off to the worker thread via the incoming queue (§4.4 "Collective vs
    /// non-collective").
    fn dispatch_local(self: &Arc<Self>, msg: Message, is_root: bool) {
        if msg.header.collective {
            let work = msg.local_work.as_ref().expect("collective dispatch always carries local_work");
            let ok = work.collective_action(self.as_ref(), is_root);
            if !ok {
                warn!(rank = self.rank, type_id = msg.header.type_id, "collective action failed");
            }
            if let Some(w) = &msg.waiter {
                w.signal();
            }
        } else if let Err(e) = self.incoming.enqueue(msg) {
            warn!(error = %e, "failed to enqueue for worker thread");
        }
    }
}

/// The default [`Transport`]/[`RuntimeHandle`] implementation: one simulated
/// rank, backed by a comms thread and a worker thread (§4.4 "two dedicated
/// threads plus a pool").
pub struct LocalTransport {
    inner: Arc<Inner>,
    threads: Mutex<ThreadManager>,
}

impl LocalTransport {
    pub fn rank(&self) -> i32 {
        self.inner.rank
    }

    /// Process-wide Work Registry this rank deserializes incoming messages
    /// through.
    pub fn work_registry(&self) -> &Arc<WorkRegistry> {
        &self.inner.work_registry
    }
}

impl RuntimeHandle for LocalTransport {
    fn rank(&self) -> i32 {
        self.inner.rank()
    }
    fn size(&self) -> i32 {
        self.inner.size()
    }
    fn send_work(&self, work: Arc<dyn Work>, dest: i32) {
        self.inner.send_work(work, dest)
    }
    fn broadcast_work(&self, work: Arc<dyn Work>, collective: bool, blocking: bool) -> Option<BroadcastWaiter> {
        self.inner.broadcast_work(work, collective, blocking)
    }
    fn extensions(&self) -> &Extensions {
        self.inner.extensions()
    }
}

impl Transport for LocalTransport {
    fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.outgoing.kill();
        self.inner.incoming.kill();
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.shutdown();
        self.threads.lock().unwrap().join_all();
    }
}

const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(1);

fn comms_loop(inner: Arc<Inner>, network_rx: Receiver<Message>) {
    while inner.running.load(Ordering::SeqCst) {
        // (d) a paused comms thread does not probe, export, or purge.
        if inner.paused.load(Ordering::SeqCst) {
            std::thread::sleep(POLL_INTERVAL);
            continue;
        }

        // (a) probe for an incoming message.
        match network_rx.try_recv() {
            Ok(msg) => inner.handle_incoming(msg),
            Err(crossbeam_channel::TryRecvError::Empty) => {}
            Err(crossbeam_channel::TryRecvError::Disconnected) => break,
        }

        // (b) drain the outgoing queue.
        loop {
            match inner.outgoing.try_dequeue() {
                Ok(Some(msg)) => inner.export(msg),
                Ok(None) => break,
                Err(_) => return,
            }
        }

        // (c) purge completed sends: a no-op here, since `Sender::send`
        // over a local channel has nothing left in flight once it returns;
        // a real-MPI implementation purges completed nonblocking requests
        // at this point instead (§4.4 "Send buffer lifecycle").

        std::thread::sleep(POLL_INTERVAL);
    }
    trace!(rank = inner.rank, "comms thread exiting");
}

fn worker_loop(inner: Arc<Inner>) {
    while let Some(msg) = inner.incoming.dequeue() {
        let Some(work) = msg.local_work.as_ref() else {
            warn!("worker thread received message with no local Work, dropping");
            continue;
        };
        if !work.action(inner.as_ref()) {
            warn!(rank = inner.rank, type_id = msg.header.type_id, "non-collective action failed");
        }
        if let Some(w) = &msg.waiter {
            w.signal();
        }
    }
    trace!(rank = inner.rank, "worker thread exiting");
}

/// Spin up a simulated cluster of `size` ranks sharing one [`WorkRegistry`]
/// (real processes would each load the same registrations independently;
/// sharing the instance here is equivalent and avoids re-registering every
/// Work type once per simulated rank).
pub fn spawn_cluster(size: i32, work_registry: Arc<WorkRegistry>) -> Vec<Arc<LocalTransport>> {
    assert!(size > 0, "cluster size must be positive");

    let mut network_tx = Vec::with_capacity(size as usize);
    let mut network_rx = Vec::with_capacity(size as usize);
    for _ in 0..size {
        let (tx, rx) = crossbeam_channel::unbounded();
        network_tx.push(tx);
        network_rx.push(rx);
    }

    let mut ranks = Vec::with_capacity(size as usize);
    for (rank, rx) in network_rx.into_iter().enumerate() {
        let rank = rank as i32;
        let inner = Arc::new(Inner {
            rank,
            size,
            network_tx: network_tx.clone(),
            outgoing: gxy_message::MessageQueue::new(format!("rank{rank}-outgoing")),
            incoming: gxy_message::MessageQueue::new(format!("rank{rank}-incoming")),
            work_registry: work_registry.clone(),
            extensions: Extensions::new(),
            paused: AtomicBool::new(false),
            running: AtomicBool::new(true),
        });

        let mut threads = ThreadManager::new();
        let comms_inner = inner.clone();
        threads
            .spawn(format!("gxy-comms-{rank}"), move || comms_loop(comms_inner, rx))
            .expect("failed to spawn comms thread");
        let worker_inner = inner.clone();
        threads
            .spawn(format!("gxy-worker-{rank}"), move || worker_loop(worker_inner))
            .expect("failed to spawn worker thread");

        ranks.push(Arc::new(LocalTransport {
            inner,
            threads: Mutex::new(threads),
        }));
    }
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;
    use gxy_buffer::SharedBuffer;
    use std::any::Any;
    use std::sync::atomic::AtomicI32;
    use std::time::Duration;

    #[derive(Debug)]
    struct Ping {
        from: AtomicI32,
        hits: Arc<AtomicI32>,
    }

    impl Work for Ping {
        fn work_type_id(&self) -> u32 {
            1
        }
        fn serialize(&self) -> SharedBuffer {
            SharedBuffer::from_vec(self.from.load(Ordering::SeqCst).to_le_bytes().to_vec())
        }
        fn action(&self, rt: &dyn RuntimeHandle) -> bool {
            self.hits.fetch_add(1, Ordering::SeqCst);
            let _ = rt.rank();
            true
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct BroadcastCounter {
        hits: Arc<AtomicI32>,
    }

    impl Work for BroadcastCounter {
        fn work_type_id(&self) -> u32 {
            2
        }
        fn is_collective(&self) -> bool {
            true
        }
        fn serialize(&self) -> SharedBuffer {
            SharedBuffer::new(0)
        }
        fn collective_action(&self, _rt: &dyn RuntimeHandle, _is_root: bool) -> bool {
            self.hits.fetch_add(1, Ordering::SeqCst);
            true
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// A registry whose deserializers hand every reconstructed `Ping`/
    /// `BroadcastCounter` the *same* shared counters, so a test's
    /// assertions observe actions run on a different simulated rank after
    /// crossing the (de)serialization boundary, not a throwaway local copy.
    fn registry(ping_hits: Arc<AtomicI32>, broadcast_hits: Arc<AtomicI32>) -> Arc<WorkRegistry> {
        let reg = Arc::new(WorkRegistry::new());
        reg.register(
            "Ping",
            Arc::new(move |b: &[u8]| {
                Arc::new(Ping {
                    from: AtomicI32::new(i32::from_le_bytes(b.try_into().unwrap())),
                    hits: ping_hits.clone(),
                }) as Arc<dyn Work>
            }),
        );
        reg.register(
            "BroadcastCounter",
            Arc::new(move |_: &[u8]| {
                Arc::new(BroadcastCounter {
                    hits: broadcast_hits.clone(),
                }) as Arc<dyn Work>
            }),
        );
        reg
    }

    #[test]
    fn point_to_point_send_reaches_one_destination() {
        let hits = Arc::new(AtomicI32::new(0));
        let cluster = spawn_cluster(3, registry(hits.clone(), Arc::new(AtomicI32::new(0))));
        cluster[0].send_work(
            Arc::new(Ping {
                from: AtomicI32::new(0),
                hits: hits.clone(),
            }),
            2,
        );
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn broadcast_reaches_every_rank() {
        let world = 8;
        let hits = Arc::new(AtomicI32::new(0));
        let cluster = spawn_cluster(world, registry(Arc::new(AtomicI32::new(0)), hits.clone()));
        let waiter = cluster[3].broadcast_work(
            Arc::new(BroadcastCounter { hits: hits.clone() }),
            true,
            true,
        );
        waiter.unwrap().wait();
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(hits.load(Ordering::SeqCst), world);
    }

    #[test]
    fn blocking_broadcast_waiter_resolves_after_local_action_only() {
        let hits = Arc::new(AtomicI32::new(0));
        let cluster = spawn_cluster(4, registry(Arc::new(AtomicI32::new(0)), hits.clone()));
        let waiter = cluster[0]
            .broadcast_work(Arc::new(BroadcastCounter { hits: hits.clone() }), true, true)
            .unwrap();
        waiter.wait();
        // The local (root) action has run; remote ones may still be in flight.
        assert!(hits.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn pause_stops_forward_progress() {
        let hits = Arc::new(AtomicI32::new(0));
        let cluster = spawn_cluster(2, registry(hits.clone(), Arc::new(AtomicI32::new(0))));
        cluster[0].pause();
        cluster[0].send_work(
            Arc::new(Ping {
                from: AtomicI32::new(0),
                hits: hits.clone(),
            }),
            1,
        );
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(hits.load(Ordering::SeqCst), 0, "paused rank should not have exported yet");
        cluster[0].resume();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
