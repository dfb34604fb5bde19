//! Ray Queue Manager: the per-process queue `RayList` packets sit in
//! between arrival (primary-ray generation, a peer's `SendRaysMsg`, or a
//! local split-and-forward) and the dedicated worker thread that hands them
//! to the [`crate::Renderer`] (§4.3 "Ray Queue Manager").
//!
//! Two priority lanes, not one: primary rays (priority 3) drain ahead of
//! secondary rays — shadow/AO spawned mid-trace (priority 2) — so a process
//! finishes existing work before starting new camera rays, matching the
//! original's `RayQManager` dequeue-order contract.

use crossbeam_channel::{Receiver, Select, Sender, TryRecvError};
use parking_lot::RwLock;
use thiserror::Error;

use crate::raylist::RayList;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RayPriority {
    Secondary = 2,
    Primary = 3,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("ray queue is closed")]
    Closed,
}

pub struct RayQueueManager {
    primary_tx: RwLock<Option<Sender<RayList>>>,
    primary_rx: Receiver<RayList>,
    secondary_tx: RwLock<Option<Sender<RayList>>>,
    secondary_rx: Receiver<RayList>,
}

impl Default for RayQueueManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RayQueueManager {
    pub fn new() -> Self {
        let (ptx, prx) = crossbeam_channel::unbounded();
        let (stx, srx) = crossbeam_channel::unbounded();
        RayQueueManager {
            primary_tx: RwLock::new(Some(ptx)),
            primary_rx: prx,
            secondary_tx: RwLock::new(Some(stx)),
            secondary_rx: srx,
        }
    }

    pub fn enqueue(&self, priority: RayPriority, list: RayList) -> Result<(), QueueError> {
        let lane = match priority {
            RayPriority::Primary => &self.primary_tx,
            RayPriority::Secondary => &self.secondary_tx,
        };
        let tx = lane.read().clone();
        match tx {
            Some(tx) => tx.send(list).map_err(|_| QueueError::Closed),
            None => Err(QueueError::Closed),
        }
    }

    /// Block until a packet is available from either lane, primary first,
    /// or until both lanes are killed and drained, in which case return
    /// `None`.
    pub fn dequeue(&self) -> Option<RayList> {
        loop {
            match self.primary_rx.try_recv() {
                Ok(r) => return Some(r),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => match self.secondary_rx.try_recv() {
                    Ok(r) => return Some(r),
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => return None,
                },
            }
            if let Ok(r) = self.secondary_rx.try_recv() {
                return Some(r);
            }

            let mut sel = Select::new();
            sel.recv(&self.primary_rx);
            sel.recv(&self.secondary_rx);
            // Blocks until either lane has a message or is disconnected;
            // doesn't consume it, so the next loop iteration's try_recv
            // picks it up in priority order.
            sel.ready();
        }
    }

    pub fn kill(&self) {
        *self.primary_tx.write() = None;
        *self.secondary_tx.write() = None;
    }

    pub fn is_empty(&self) -> bool {
        self.primary_rx.is_empty() && self.secondary_rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.primary_rx.len() + self.secondary_rx.len()
    }
}
