//! `CommitMsg`, the collective `Work` that drives the commit protocol
//! (§4.6 "Commit protocol").

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gxy_buffer::SharedBuffer;
use gxy_message::{RuntimeHandle, Work};
use tracing::warn;

use crate::object::{ClassId, Key};
use crate::registry::KeyedObjectRegistry;

/// Trailing wire sentinel the receiver verifies (§4.6: "appends a 16-bit
/// sentinel (`12345`)").
pub const SENTINEL: u16 = 12_345;

/// A `CommitMsg` for one object: carries the Key, class id (for first-sight
/// construction), and the serialized state (§4.6 serialization contract:
/// "prepends the Key and appends a 16-bit sentinel").
#[derive(Debug)]
pub struct CommitMsg {
    work_type_id: u32,
    key: Key,
    class_id: ClassId,
    state: Vec<u8>,
    /// Set by `collective_action` on this process; read back by
    /// [`commit`] once the broadcast's local action has run, since the
    /// same `Arc<CommitMsg>` is the one passed for the local dispatch path
    /// (§4.4: "the outgoing queue carries the local copy through the same
    /// code path").
    succeeded: AtomicBool,
}

impl CommitMsg {
    pub fn new(work_type_id: u32, key: Key, class_id: ClassId, state: Vec<u8>) -> Self {
        CommitMsg {
            work_type_id,
            key,
            class_id,
            state,
            succeeded: AtomicBool::new(false),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Encode `{key, class_id, state_len, state, sentinel}` for the wire.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 4 + 4 + self.state.len() + 2);
        buf.extend_from_slice(&self.key.to_le_bytes());
        buf.extend_from_slice(&self.class_id.to_le_bytes());
        buf.extend_from_slice(&(self.state.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.state);
        buf.extend_from_slice(&SENTINEL.to_le_bytes());
        buf
    }

    /// Decode a `CommitMsg` off the wire, verifying the trailing sentinel
    /// (§4.6: "the receiver verifies").
    pub fn decode(work_type_id: u32, bytes: &[u8]) -> Option<CommitMsg> {
        if bytes.len() < 8 + 4 + 4 + 2 {
            return None;
        }
        let key = Key::from_le_bytes(bytes[0..8].try_into().ok()?);
        let class_id = ClassId::from_le_bytes(bytes[8..12].try_into().ok()?);
        let state_len = u32::from_le_bytes(bytes[12..16].try_into().ok()?) as usize;
        let state_end = 16 + state_len;
        if bytes.len() != state_end + 2 {
            return None;
        }
        let state = bytes[16..state_end].to_vec();
        let sentinel = u16::from_le_bytes(bytes[state_end..state_end + 2].try_into().ok()?);
        if sentinel != SENTINEL {
            warn!(key, sentinel, "CommitMsg failed sentinel check");
            return None;
        }
        Some(CommitMsg::new(work_type_id, key, class_id, state))
    }
}

impl Work for CommitMsg {
    fn work_type_id(&self) -> u32 {
        self.work_type_id
    }

    fn is_collective(&self) -> bool {
        true
    }

    fn serialize(&self) -> SharedBuffer {
        SharedBuffer::from_vec(self.encode())
    }

    fn collective_action(&self, rt: &dyn RuntimeHandle, is_root: bool) -> bool {
        let registry = match rt.extensions().get::<KeyedObjectRegistry>() {
            Some(r) => r,
            None => {
                warn!("KeyedObjectRegistry not installed in RuntimeHandle extensions");
                self.succeeded.store(false, Ordering::SeqCst);
                return false;
            }
        };

        let obj = match registry.get(self.key) {
            Some(obj) => {
                if !is_root {
                    obj.deserialize_state(&self.state);
                }
                obj
            }
            None => match registry.construct(self.class_id, self.key) {
                Ok(obj) => {
                    obj.deserialize_state(&self.state);
                    registry.insert(obj.clone());
                    obj
                }
                Err(e) => {
                    warn!(error = %e, key = self.key, "failed to construct replica on first commit");
                    self.succeeded.store(false, Ordering::SeqCst);
                    return false;
                }
            },
        };

        let ok = obj.local_commit(rt);
        self.succeeded.store(ok, Ordering::SeqCst);
        ok
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `KeyedObject::Commit` (§4.6): serialize `obj`'s state, broadcast a
/// `CommitMsg` collectively and blockingly, and report whether the local
/// `local_commit` succeeded once the broadcast's local action has run.
pub fn commit(
    rt: &dyn RuntimeHandle,
    work_type_id: u32,
    obj: &Arc<dyn crate::object::KeyedObject>,
) -> bool {
    let mut state = Vec::new();
    obj.serialize_state(&mut state);
    let msg = Arc::new(CommitMsg::new(work_type_id, obj.key(), obj.class_id(), state));
    let waiter = rt.broadcast_work(msg.clone(), true, true);
    if let Some(waiter) = waiter {
        waiter.wait();
    }
    msg.succeeded()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let msg = CommitMsg::new(1, 42, 7, vec![1, 2, 3, 4]);
        let bytes = msg.encode();
        let decoded = CommitMsg::decode(1, &bytes).unwrap();
        assert_eq!(decoded.key, 42);
        assert_eq!(decoded.class_id, 7);
        assert_eq!(decoded.state, vec![1, 2, 3, 4]);
    }

    #[test]
    fn decode_rejects_bad_sentinel() {
        let msg = CommitMsg::new(1, 42, 7, vec![9, 9]);
        let mut bytes = msg.encode();
        let len = bytes.len();
        bytes[len - 1] ^= 0xff;
        assert!(CommitMsg::decode(1, &bytes).is_none());
    }
}
