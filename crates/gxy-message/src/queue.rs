//! Blocking FIFO message queue (§4.2).
//!
//! Built directly on `crossbeam_channel`: `enqueue` is a channel send,
//! `dequeue` a blocking receive, and `kill` closes the channel by dropping
//! the queue's own sender, which wakes every blocked `dequeue` with a
//! disconnect — exactly the "kill sets running=false and broadcasts the
//! condition, so dequeuers return a null message" behavior the spec
//! describes, without hand-rolling a mutex+condvar FIFO the ecosystem
//! already gives us for free.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use thiserror::Error;

use crate::Message;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message queue is closed")]
    Closed,
}

pub struct MessageQueue {
    name: String,
    tx: RwLock<Option<Sender<Message>>>,
    rx: Receiver<Message>,
}

impl MessageQueue {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        MessageQueue {
            name: name.into(),
            tx: RwLock::new(Some(tx)),
            rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append `m` and wake one blocked `dequeue`.
    pub fn enqueue(&self, m: Message) -> Result<(), QueueError> {
        let tx = self.tx.read().clone();
        match tx {
            Some(tx) => tx.send(m).map_err(|_| QueueError::Closed),
            None => Err(QueueError::Closed),
        }
    }

    /// Block until a message is available or the queue is killed, in which
    /// case return `None`.
    pub fn dequeue(&self) -> Option<Message> {
        self.rx.recv().ok()
    }

    /// Non-blocking dequeue: `Ok(None)` if currently empty but still
    /// running, `Err(QueueError::Closed)` once killed and drained.
    pub fn try_dequeue(&self) -> Result<Option<Message>, QueueError> {
        match self.rx.try_recv() {
            Ok(m) => Ok(Some(m)),
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(None),
            Err(crossbeam_channel::TryRecvError::Disconnected) => Err(QueueError::Closed),
        }
    }

    /// Stop accepting new messages and wake every blocked `dequeue`.
    pub fn kill(&self) {
        *self.tx.write() = None;
    }

    pub fn is_running(&self) -> bool {
        self.tx.read().is_some()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Header, BROADCAST_NONE};
    use gxy_buffer::SharedBuffer;

    fn msg() -> Message {
        Message {
            header: Header {
                broadcast_root: BROADCAST_NONE,
                sender: 0,
                dest: 1,
                type_id: 1,
                collective: false,
                content_size: 0,
            },
            content: SharedBuffer::new(0),
            local_work: None,
            waiter: None,
        }
    }

    #[test]
    fn fifo_order() {
        let q = MessageQueue::new("test");
        q.enqueue(msg()).unwrap();
        q.enqueue(msg()).unwrap();
        assert_eq!(q.len(), 2);
        assert!(q.dequeue().is_some());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn kill_unblocks_dequeue() {
        let q = std::sync::Arc::new(MessageQueue::new("test"));
        let q2 = q.clone();
        let handle = std::thread::spawn(move || q2.dequeue());
        std::thread::sleep(std::time::Duration::from_millis(20));
        q.kill();
        let result = handle.join().unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn enqueue_after_kill_errors() {
        let q = MessageQueue::new("test");
        q.kill();
        assert!(matches!(q.enqueue(msg()), Err(QueueError::Closed)));
    }
}
