//! `Message`/`Header`, the `Work` trait, the Work Registry, and the blocking
//! FIFO `MessageQueue` (§3, §4.2, §4.5).

mod header;
mod queue;
mod registry;
mod work;

pub use gxy_buffer::SharedBuffer;
pub use header::{Header, BROADCAST_NONE};
pub use queue::{MessageQueue, QueueError};
pub use registry::{Deserializer, WorkRegistry, WorkRegistryError};
pub use work::{BroadcastWaiter, Extensions, RuntimeHandle, Work};

use std::sync::Arc;

/// A `Work` packaged for the wire: a fixed [`Header`] plus its serialized
/// payload, and — on the process that created it — the already-constructed
/// [`Work`] object, so the local/root dispatch path never needs to
/// round-trip through serialization (§4.4 "the outgoing queue carries the
/// local copy through the same code path").
#[derive(Clone)]
pub struct Message {
    pub header: Header,
    pub content: SharedBuffer,
    pub local_work: Option<Arc<dyn Work>>,
    /// Present only on the locally-originated copy of a blocking broadcast
    /// or send, so whichever thread runs the local action (comms thread for
    /// a collective, worker thread otherwise) can signal the sender once it
    /// has (§4.4 "Blocking broadcasts"). Not part of the wire format.
    pub waiter: Option<BroadcastWaiter>,
}

impl Message {
    /// Build a point-to-point message addressed to `dest` from `sender`.
    pub fn point_to_point(sender: i32, dest: i32, work: Arc<dyn Work>) -> Self {
        let content = work.serialize();
        Message {
            header: Header {
                broadcast_root: BROADCAST_NONE,
                sender,
                dest,
                type_id: work.work_type_id(),
                collective: work.is_collective(),
                content_size: content.size() as u32,
            },
            content,
            local_work: Some(work),
            waiter: None,
        }
    }

    /// Build a broadcast message rooted at `root`, originated by `sender`
    /// (always equal to `root` at creation time; `sender` is carried
    /// separately from `broadcast_root` so a forwarded copy can report who
    /// forwarded it last while `broadcast_root` remains the original root).
    pub fn broadcast(root: i32, work: Arc<dyn Work>) -> Self {
        let content = work.serialize();
        Message {
            header: Header {
                broadcast_root: root,
                sender: root,
                dest: -1,
                type_id: work.work_type_id(),
                collective: work.is_collective(),
                content_size: content.size() as u32,
            },
            content,
            local_work: Some(work),
            waiter: None,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.header.broadcast_root != BROADCAST_NONE
    }

    /// A copy of this message with `local_work` and `waiter` cleared,
    /// representing what a receiving process actually gets off the wire:
    /// header + bytes only.
    pub fn wire_only(&self) -> Self {
        Message {
            header: self.header.clone(),
            content: self.content.clone(),
            local_work: None,
            waiter: None,
        }
    }
}
