//! The Application's own private Work types (`QuitMsg`/`SyncMsg`/
//! `PrintMsg`), ported from `Application::QuitMsg`/`SyncMsg`/`PrintMsg` in
//! `src/framework/Application.{h,cpp}`.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gxy_buffer::SharedBuffer;
use gxy_message::{RuntimeHandle, Work};
use gxy_render::RayQueueManager;
use gxy_transport::Transport;
use tracing::{info, warn};

/// Shared per-rank state `QuitMsg`'s collective action reaches through
/// [`gxy_message::Extensions`] to actually stop this rank's loops (§5
/// "Cancellation"): the comms/worker pair inside [`Transport`], and
/// (looked up separately, since a rank need not have one installed) the
/// ray-queue worker's [`RayQueueManager`].
pub struct ApplicationControl {
    pub quitting: Arc<AtomicBool>,
    pub transport: Arc<dyn Transport>,
}

/// Collective broadcast that tells every process to stop (§5
/// "Cancellation": "`QuitApplication` broadcasts a quit that causes the
/// worker and comms loops to exit"). The original's `CollectiveAction` is a
/// no-op (`return true`) because the real work — MPI teardown — happens
/// elsewhere in `MessageManager`; here `Transport::shutdown` plays that
/// role directly, since there's no separate teardown path to defer to.
#[derive(Debug)]
pub struct QuitMsg {
    work_type_id: u32,
}

impl QuitMsg {
    pub fn new(work_type_id: u32) -> Self {
        QuitMsg { work_type_id }
    }
}

impl Work for QuitMsg {
    fn work_type_id(&self) -> u32 {
        self.work_type_id
    }
    fn is_collective(&self) -> bool {
        true
    }
    fn serialize(&self) -> SharedBuffer {
        SharedBuffer::new(0)
    }
    fn collective_action(&self, rt: &dyn RuntimeHandle, _is_root: bool) -> bool {
        match rt.extensions().get::<ApplicationControl>() {
            Some(control) => {
                control.quitting.store(true, Ordering::SeqCst);
                if let Some(queue) = rt.extensions().get::<RayQueueManager>() {
                    queue.kill();
                }
                control.transport.shutdown();
                true
            }
            None => {
                warn!("QuitMsg delivered with no ApplicationControl installed, cannot shut down");
                false
            }
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Collective barrier (§2 "global singletons", original's `SyncApplication`).
/// A blocking broadcast's local action already runs before the sender's
/// `broadcast_work` returns, so the barrier is the broadcast itself; the
/// action has nothing further to do.
#[derive(Debug)]
pub struct SyncMsg {
    work_type_id: u32,
}

impl SyncMsg {
    pub fn new(work_type_id: u32) -> Self {
        SyncMsg { work_type_id }
    }
}

impl Work for SyncMsg {
    fn work_type_id(&self) -> u32 {
        self.work_type_id
    }
    fn is_collective(&self) -> bool {
        true
    }
    fn serialize(&self) -> SharedBuffer {
        SharedBuffer::new(0)
    }
    fn collective_action(&self, _rt: &dyn RuntimeHandle, _is_root: bool) -> bool {
        true
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Point-to-point, always addressed to rank 0 (original's `Print`): lets any
/// process log a line through a single ordered sink instead of every rank
/// racing stderr directly.
#[derive(Debug)]
pub struct PrintMsg {
    work_type_id: u32,
    sender: i32,
    text: String,
}

impl PrintMsg {
    pub fn new(work_type_id: u32, sender: i32, text: impl Into<String>) -> Self {
        PrintMsg {
            work_type_id,
            sender,
            text: text.into(),
        }
    }

    pub fn decode(bytes: &[u8], work_type_id: u32) -> Option<Self> {
        let sender = i32::from_le_bytes(bytes.get(0..4)?.try_into().ok()?);
        let text = String::from_utf8(bytes.get(4..)?.to_vec()).ok()?;
        Some(PrintMsg {
            work_type_id,
            sender,
            text,
        })
    }
}

impl Work for PrintMsg {
    fn work_type_id(&self) -> u32 {
        self.work_type_id
    }
    fn serialize(&self) -> SharedBuffer {
        let mut out = Vec::with_capacity(4 + self.text.len());
        out.extend_from_slice(&self.sender.to_le_bytes());
        out.extend_from_slice(self.text.as_bytes());
        SharedBuffer::from_vec(out)
    }
    fn action(&self, _rt: &dyn RuntimeHandle) -> bool {
        info!(sender = self.sender, "{}", self.text);
        true
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}
