//! `RenderingSet` — distributed quiescence detection and owner-side pixel
//! aggregation (§3 RenderingSet, §4.9).
//!
//! Every mutable counter lives behind one `parking_lot::Mutex<State>`, per
//! §5's "RenderingSet counters: guarded by a per-set mutex; `CheckLocalState`
//! is always invoked under it." The binary process tree (`parent =
//! (r-1)/2`) doubles as the reduction tree for the synchronous completion
//! check: since this runtime has no real MPI `allreduce`, the collective
//! sum is computed by having each process contribute its local four-vector
//! and forward the running total to its parent over the same tree a
//! broadcast uses — a textbook tree-reduce, not a spec-mandated message
//! (see DESIGN.md).

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use gxy_buffer::SharedBuffer;
use gxy_keyed::{ClassId, Key, KeyedObject, KeyedObjectRegistry};
use gxy_message::{RuntimeHandle, Work};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::rendering::Rendering;

/// Registered Work-registry type tags for the three collective/point-to-point
/// messages this module defines, assigned once at application startup and
/// threaded through so every `RenderingSet` constructs messages with the
/// same ids its peers expect (mirrors `gxy_keyed::commit`'s `work_type_id`
/// parameter).
#[derive(Clone, Copy, Debug)]
pub struct RenderingSetWorkIds {
    pub propagate_state: u32,
    pub synchronous_check: u32,
    pub reduce_check: u32,
    pub reset: u32,
}

struct State {
    parent: Option<i32>,
    left_id: Option<i32>,
    right_id: Option<i32>,
    local_raylist_count: i64,
    local_inflight_count: i64,
    active_camera_count: i64,
    left_busy: bool,
    right_busy: bool,
    last_busy: bool,
    n_pix_sent: u64,
    n_pix_received: u64,
    done: bool,
    check: Option<CheckRound>,
    topology_set: bool,
}

/// Accumulator for one in-flight synchronous completion check (§4.9
/// "Synchronous completion check").
struct CheckRound {
    sums: [i64; 4],
    children_reported: u8,
}

/// One frame's worth of distributed work (§3 RenderingSet).
pub struct RenderingSet {
    key: Key,
    class_id: ClassId,
    renderings: Vec<Rendering>,
    current_frame: AtomicU32,
    work_ids: RenderingSetWorkIds,
    state: Mutex<State>,
    wait_cond: Condvar,
}

impl RenderingSet {
    pub fn new(key: Key, class_id: ClassId, renderings: Vec<Rendering>, work_ids: RenderingSetWorkIds) -> Self {
        RenderingSet {
            key,
            class_id,
            renderings,
            current_frame: AtomicU32::new(0),
            work_ids,
            state: Mutex::new(State {
                parent: None,
                left_id: None,
                right_id: None,
                local_raylist_count: 0,
                local_inflight_count: 0,
                active_camera_count: 0,
                left_busy: false,
                right_busy: false,
                last_busy: true,
                n_pix_sent: 0,
                n_pix_received: 0,
                done: false,
                check: None,
                topology_set: false,
            }),
            wait_cond: Condvar::new(),
        }
    }

    pub fn renderings(&self) -> &[Rendering] {
        &self.renderings
    }

    pub fn rendering(&self, key: Key) -> Option<&Rendering> {
        self.renderings.iter().find(|r| r.key() == key)
    }

    pub fn current_frame(&self) -> u32 {
        self.current_frame.load(Ordering::SeqCst)
    }

    /// Whether `frame` is still the one being rendered (§5 "Cancellation":
    /// long-running traces must drop work stamped with a frame this no
    /// longer matches).
    pub fn is_active(&self, frame: u32) -> bool {
        self.current_frame() == frame
    }

    /// Derive this process's position in the binary process tree from
    /// `rt`'s rank/size (§4.9 "Process ranks form a binary tree by
    /// `parent = (r-1)/2`"). Idempotent; first call also marks every child
    /// slot that doesn't exist as not busy.
    fn ensure_topology(&self, rt: &dyn RuntimeHandle) {
        {
            let mut st = self.state.lock();
            if st.topology_set {
                return;
            }
            let r = rt.rank();
            let s = rt.size();
            st.parent = if r > 0 { Some((r - 1) / 2) } else { None };
            let left = 2 * r + 1;
            let right = 2 * r + 2;
            st.left_id = (left < s).then_some(left);
            st.right_id = (right < s).then_some(right);
            // Pessimistically assume any present child starts busy, same as
            // the original's startup convention: nobody reports idle until
            // it actually is.
            st.left_busy = st.left_id.is_some();
            st.right_busy = st.right_id.is_some();
            st.last_busy = true;
            st.topology_set = true;
        }
        // A leaf with zero counters is actually idle the moment its
        // topology is known; evaluate and propagate that now instead of
        // waiting for some later increment/decrement to notice.
        self.recompute_local_state(rt);
    }

    fn children_needed(st: &State) -> u8 {
        st.left_id.is_some() as u8 + st.right_id.is_some() as u8
    }

    pub fn local_raylist_count(&self) -> i64 {
        self.state.lock().local_raylist_count
    }

    pub fn local_inflight_count(&self) -> i64 {
        self.state.lock().local_inflight_count
    }

    pub fn active_camera_count(&self) -> i64 {
        self.state.lock().active_camera_count
    }

    pub fn pixel_counts(&self) -> (u64, u64) {
        let st = self.state.lock();
        (st.n_pix_sent, st.n_pix_received)
    }

    /// §4.9 "Asynchronous up-propagation": call after any event that might
    /// change local busy state (enqueue, dequeue, camera-pass begin/end,
    /// ack from peer).
    pub fn increment_raylist_count(&self, rt: &dyn RuntimeHandle) {
        self.ensure_topology(rt);
        self.state.lock().local_raylist_count += 1;
        self.check_local_state(rt);
    }

    pub fn decrement_raylist_count(&self, rt: &dyn RuntimeHandle) {
        self.ensure_topology(rt);
        self.state.lock().local_raylist_count -= 1;
        self.check_local_state(rt);
    }

    pub fn increment_inflight_count(&self) {
        self.state.lock().local_inflight_count += 1;
    }

    pub fn decrement_inflight_count(&self, rt: &dyn RuntimeHandle) {
        self.ensure_topology(rt);
        self.state.lock().local_inflight_count -= 1;
        self.check_local_state(rt);
    }

    pub fn camera_pass_begin(&self, rt: &dyn RuntimeHandle) {
        self.ensure_topology(rt);
        self.state.lock().active_camera_count += 1;
        self.check_local_state(rt);
    }

    pub fn camera_pass_end(&self, rt: &dyn RuntimeHandle) {
        self.ensure_topology(rt);
        self.state.lock().active_camera_count -= 1;
        self.check_local_state(rt);
    }

    pub fn record_pixel_sent(&self, n: usize) {
        self.state.lock().n_pix_sent += n as u64;
    }

    pub fn record_pixel_received(&self, n: usize) {
        self.state.lock().n_pix_received += n as u64;
    }

    /// §4.9 "Local state rule": busy iff local work is pending, a camera
    /// pass is active, or either child last reported busy.
    fn recompute_local_state(&self, rt: &dyn RuntimeHandle) {
        let mut st = self.state.lock();
        let currently_busy =
            st.local_raylist_count != 0 || st.active_camera_count != 0 || st.left_busy || st.right_busy;

        if currently_busy == st.last_busy {
            return;
        }
        st.last_busy = currently_busy;

        if !currently_busy && rt.rank() == 0 {
            drop(st);
            self.start_synchronous_check(rt);
        } else if let Some(parent) = st.parent {
            drop(st);
            trace!(key = self.key, busy = currently_busy, parent, "propagating state up");
            let msg = Arc::new(PropagateStateMsg {
                work_type_id: self.work_ids.propagate_state,
                rendering_set: self.key,
                busy: currently_busy,
                child: rt.rank(),
            });
            rt.send_work(msg, parent);
        } else if currently_busy {
            // Root, going busy: there's no parent to report to, but a
            // previously-finalized `done` is now stale.
            st.done = false;
        }
    }

    fn check_local_state(&self, rt: &dyn RuntimeHandle) {
        self.recompute_local_state(rt);
    }

    fn update_child_state(&self, busy: bool, child: i32, rt: &dyn RuntimeHandle) {
        self.ensure_topology(rt);
        {
            let mut st = self.state.lock();
            if Some(child) == st.left_id {
                st.left_busy = busy;
            } else {
                st.right_busy = busy;
            }
        }
        self.check_local_state(rt);
    }

    fn start_synchronous_check(&self, rt: &dyn RuntimeHandle) {
        debug!(key = self.key, "root observed idle transition, starting synchronous check");
        let msg = Arc::new(SynchronousCheckMsg {
            work_type_id: self.work_ids.synchronous_check,
            rendering_set: self.key,
        });
        rt.broadcast_work(msg, true, false);
    }

    /// Every process runs this when `SynchronousCheckMsg` reaches it:
    /// contribute the local four-vector, and if this is a leaf, begin
    /// forwarding the partial sum toward the root immediately.
    fn begin_check_round(&self, rt: &dyn RuntimeHandle) {
        self.ensure_topology(rt);
        let needed = {
            let mut st = self.state.lock();
            let local = [
                st.local_raylist_count,
                st.n_pix_sent as i64,
                st.n_pix_received as i64,
                st.active_camera_count,
            ];
            st.check = Some(CheckRound {
                sums: local,
                children_reported: 0,
            });
            Self::children_needed(&st)
        };
        if needed == 0 {
            self.finish_check(rt);
        }
    }

    /// A child's partial sum arrived; fold it in and, once every present
    /// child has reported, forward up (or finalize, on the root).
    fn contribute(&self, values: [i64; 4], rt: &dyn RuntimeHandle) {
        let done = {
            let mut st = self.state.lock();
            let round = st.check.as_mut().expect("contribute without an active check round");
            for i in 0..4 {
                round.sums[i] += values[i];
            }
            round.children_reported += 1;
            round.children_reported >= Self::children_needed(&st)
        };
        if done {
            self.finish_check(rt);
        }
    }

    fn finish_check(&self, rt: &dyn RuntimeHandle) {
        let (parent, sums) = {
            let st = self.state.lock();
            let round = st.check.as_ref().expect("finish_check without an active round");
            (st.parent, round.sums)
        };

        match parent {
            Some(parent) => {
                let msg = Arc::new(ReduceCheckMsg {
                    work_type_id: self.work_ids.reduce_check,
                    rendering_set: self.key,
                    values: sums,
                    from: rt.rank(),
                });
                rt.send_work(msg, parent);
            }
            None => {
                let [raylist, _sent, _received, camera] = sums;
                let quiescent = raylist == 0 && camera == 0;
                debug!(key = self.key, raylist, camera, quiescent, "synchronous check result");
                let mut st = self.state.lock();
                if quiescent {
                    st.done = true;
                    drop(st);
                    self.wait_cond.notify_all();
                } else {
                    // §4.9: "otherwise last_busy is forced back to true so
                    // another up-propagation will eventually occur."
                    st.last_busy = true;
                }
            }
        }
        self.state.lock().check = None;
    }

    /// Block until the frame has been finalized by the root's completion
    /// check (§4.9, §5 "RenderingSet: `wait_for_done` blocks until the
    /// finalize signal from the root's completion check").
    pub fn wait_for_done(&self) {
        let mut st = self.state.lock();
        while !st.done {
            self.wait_cond.wait(&mut st);
        }
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().done
    }

    /// §4.9 "Reset": reinitialize all counters for a re-render.
    fn local_reset(&self, rt: &dyn RuntimeHandle) {
        self.ensure_topology(rt);
        let mut st = self.state.lock();
        st.n_pix_sent = 0;
        st.n_pix_received = 0;
        st.local_raylist_count = 0;
        st.local_inflight_count = 0;
        st.active_camera_count = 0;
        st.left_busy = st.left_id.is_some();
        st.right_busy = st.right_id.is_some();
        st.last_busy = true;
        st.done = false;
        st.check = None;
        drop(st);
        for r in &self.renderings {
            r.local_reset();
        }
        // Same as construction: a childless rank is actually idle right
        // away, and needs to say so instead of waiting on `last_busy`'s
        // pessimistic default.
        self.recompute_local_state(rt);
    }

    pub fn advance_frame(&self) {
        self.current_frame.fetch_add(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for RenderingSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderingSet").field("key", &self.key).finish()
    }
}

impl KeyedObject for RenderingSet {
    fn key(&self) -> Key {
        self.key
    }

    fn class_id(&self) -> ClassId {
        self.class_id
    }

    fn serialize_state(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.renderings.len() as u32).to_le_bytes());
        for r in &self.renderings {
            out.extend_from_slice(&r.key().to_le_bytes());
            out.extend_from_slice(&r.camera().to_le_bytes());
            out.extend_from_slice(&r.visualization().to_le_bytes());
            out.extend_from_slice(&r.owner().to_le_bytes());
        }
    }

    fn deserialize_state(&self, _bytes: &[u8]) {
        // Rendering membership is fixed at construction time in this port;
        // a non-root replica is built with the same list by its factory
        // from the decoded bytes (see `CommitMsg::collective_action`'s
        // first-sight construction path), so there is nothing further to
        // apply here.
    }

    /// §4.6 step 3 / §12 "local_commit returning a bool 'already
    /// initialized' short-circuit": running twice is harmless, so this
    /// always does the (idempotent) topology setup and reports success.
    fn local_commit(&self, rt: &dyn RuntimeHandle) -> bool {
        self.ensure_topology(rt);
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Point-to-point, non-collective: a child reporting its busy state to its
/// parent (§4.9 "Asynchronous up-propagation").
#[derive(Debug)]
pub struct PropagateStateMsg {
    work_type_id: u32,
    rendering_set: Key,
    busy: bool,
    child: i32,
}

impl Work for PropagateStateMsg {
    fn work_type_id(&self) -> u32 {
        self.work_type_id
    }
    fn serialize(&self) -> SharedBuffer {
        let mut buf = Vec::with_capacity(13);
        buf.extend_from_slice(&self.rendering_set.to_le_bytes());
        buf.push(self.busy as u8);
        buf.extend_from_slice(&self.child.to_le_bytes());
        SharedBuffer::from_vec(buf)
    }
    fn action(&self, rt: &dyn RuntimeHandle) -> bool {
        lookup(rt, self.rendering_set, |rs| rs.update_child_state(self.busy, self.child, rt)).is_some()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PropagateStateMsg {
    pub fn decode(bytes: &[u8], work_type_id: u32) -> Option<Self> {
        if bytes.len() < 13 {
            return None;
        }
        Some(PropagateStateMsg {
            work_type_id,
            rendering_set: Key::from_le_bytes(bytes[0..8].try_into().ok()?),
            busy: bytes[8] != 0,
            child: i32::from_le_bytes(bytes[9..13].try_into().ok()?),
        })
    }
}

/// Collective broadcast from the root starting a completion check (§4.9
/// "Synchronous completion check").
#[derive(Debug)]
pub struct SynchronousCheckMsg {
    work_type_id: u32,
    rendering_set: Key,
}

impl Work for SynchronousCheckMsg {
    fn work_type_id(&self) -> u32 {
        self.work_type_id
    }
    fn is_collective(&self) -> bool {
        true
    }
    fn serialize(&self) -> SharedBuffer {
        SharedBuffer::from_vec(self.rendering_set.to_le_bytes().to_vec())
    }
    fn collective_action(&self, rt: &dyn RuntimeHandle, _is_root: bool) -> bool {
        lookup(rt, self.rendering_set, |rs| rs.begin_check_round(rt)).is_some()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl SynchronousCheckMsg {
    pub fn decode(bytes: &[u8], work_type_id: u32) -> Option<Self> {
        Some(SynchronousCheckMsg {
            work_type_id,
            rendering_set: Key::from_le_bytes(bytes.try_into().ok()?),
        })
    }
}

/// Point-to-point, non-collective: a child's partial sum forwarded to its
/// parent during a completion check (our tree-reduce substitute for a real
/// MPI `allreduce`; see module docs and DESIGN.md).
#[derive(Debug)]
pub struct ReduceCheckMsg {
    work_type_id: u32,
    rendering_set: Key,
    values: [i64; 4],
    from: i32,
}

impl Work for ReduceCheckMsg {
    fn work_type_id(&self) -> u32 {
        self.work_type_id
    }
    fn serialize(&self) -> SharedBuffer {
        let mut buf = Vec::with_capacity(8 + 32 + 4);
        buf.extend_from_slice(&self.rendering_set.to_le_bytes());
        for v in self.values {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.extend_from_slice(&self.from.to_le_bytes());
        SharedBuffer::from_vec(buf)
    }
    fn action(&self, rt: &dyn RuntimeHandle) -> bool {
        lookup(rt, self.rendering_set, |rs| rs.contribute(self.values, rt)).is_some()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ReduceCheckMsg {
    pub fn decode(bytes: &[u8], work_type_id: u32) -> Option<Self> {
        if bytes.len() < 44 {
            return None;
        }
        let mut values = [0i64; 4];
        for (i, v) in values.iter_mut().enumerate() {
            let off = 8 + i * 8;
            *v = i64::from_le_bytes(bytes[off..off + 8].try_into().ok()?);
        }
        Some(ReduceCheckMsg {
            work_type_id,
            rendering_set: Key::from_le_bytes(bytes[0..8].try_into().ok()?),
            values,
            from: i32::from_le_bytes(bytes[40..44].try_into().ok()?),
        })
    }
}

/// Collective broadcast reinitializing a RenderingSet's counters for a
/// re-render (§4.9 "Reset").
#[derive(Debug)]
pub struct ResetMsg {
    work_type_id: u32,
    rendering_set: Key,
}

impl ResetMsg {
    pub fn new(work_type_id: u32, rendering_set: Key) -> Self {
        ResetMsg { work_type_id, rendering_set }
    }

    pub fn decode(bytes: &[u8], work_type_id: u32) -> Option<Self> {
        Some(ResetMsg {
            work_type_id,
            rendering_set: Key::from_le_bytes(bytes.try_into().ok()?),
        })
    }
}

impl Work for ResetMsg {
    fn work_type_id(&self) -> u32 {
        self.work_type_id
    }
    fn is_collective(&self) -> bool {
        true
    }
    fn serialize(&self) -> SharedBuffer {
        SharedBuffer::from_vec(self.rendering_set.to_le_bytes().to_vec())
    }
    fn collective_action(&self, rt: &dyn RuntimeHandle, _is_root: bool) -> bool {
        lookup(rt, self.rendering_set, |rs| rs.local_reset(rt)).is_some()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Find the `RenderingSet` registered under `key` and run `f` against it.
/// Looking this up by value each time (rather than handing out `Arc`s)
/// avoids any unsafe downcasting of `Arc<dyn KeyedObject>`.
fn lookup<R>(rt: &dyn RuntimeHandle, key: Key, f: impl FnOnce(&RenderingSet) -> R) -> Option<R> {
    let registry = rt.extensions().get::<KeyedObjectRegistry>()?;
    let obj = registry.get(key)?;
    obj.as_any().downcast_ref::<RenderingSet>().map(f)
}

#[cfg(feature = "diagnostics")]
pub mod diagnostics {
    use super::*;

    /// Diagnostic broadcast printing every process's local busy/counts
    /// (§12 "RenderingSet::DumpState/DumpStateMsg"), for debugging stalled
    /// quiescence.
    #[derive(Debug)]
    pub struct DumpStateMsg {
        pub work_type_id: u32,
        pub rendering_set: Key,
    }

    impl Work for DumpStateMsg {
        fn work_type_id(&self) -> u32 {
            self.work_type_id
        }
        fn is_collective(&self) -> bool {
            true
        }
        fn serialize(&self) -> SharedBuffer {
            SharedBuffer::from_vec(self.rendering_set.to_le_bytes().to_vec())
        }
        fn collective_action(&self, rt: &dyn RuntimeHandle, _is_root: bool) -> bool {
            lookup(rt, self.rendering_set, |rs| {
                let st = rs.state.lock();
                tracing::info!(
                    rank = rt.rank(),
                    raylist = st.local_raylist_count,
                    inflight = st.local_inflight_count,
                    camera = st.active_camera_count,
                    left_busy = st.left_busy,
                    right_busy = st.right_busy,
                    last_busy = st.last_busy,
                    "RenderingSet dump_state"
                );
            });
            true
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }
}
