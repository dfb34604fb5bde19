//! Sketch of a [`Transport`] backed by the real `mpi` (rsmpi) crate, for
//! environments with `libmpi` installed (§11 "Real-MPI posture"). Not built
//! or tested in this workspace's default configuration — enable with
//! `--features real-mpi`; see DESIGN.md for why it stops at a sketch.
//!
//! The shape mirrors `LocalTransport`: a comms thread doing `Communicator`
//! probes/sends against `mpi::topology::SimpleCommunicator`, and a worker
//! thread draining the incoming queue. The pieces that differ are the ones
//! that must: real nonblocking sends (`immediate_send`) need an explicit
//! purge of completed `Request`s instead of `LocalTransport`'s no-op, and
//! collective actions run under an actual `Communicator` rather than a
//! reference to `Inner`.

use std::sync::Arc;

use gxy_message::{BroadcastWaiter, Extensions, RuntimeHandle, Work};
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

pub struct RsmpiTransport {
    world: SimpleCommunicator,
    extensions: Extensions,
}

impl RsmpiTransport {
    /// `mpi::initialize_with_threading(mpi::Threading::Multiple)` must have
    /// already run (§5 "MPI must be initialized at THREAD_MULTIPLE");
    /// constructing this from the returned `Universe`'s world communicator
    /// is the caller's job, matching `MessageManager::setup_mpi`.
    pub fn new(world: SimpleCommunicator) -> Self {
        RsmpiTransport {
            world,
            extensions: Extensions::new(),
        }
    }
}

impl RuntimeHandle for RsmpiTransport {
    fn rank(&self) -> i32 {
        self.world.rank()
    }

    fn size(&self) -> i32 {
        self.world.size()
    }

    fn send_work(&self, _work: Arc<dyn Work>, _dest: i32) {
        unimplemented!(
            "real-mpi transport is a sketch; wire-format send via immediate_send belongs here"
        );
    }

    fn broadcast_work(
        &self,
        _work: Arc<dyn Work>,
        _collective: bool,
        _blocking: bool,
    ) -> Option<BroadcastWaiter> {
        unimplemented!(
            "real-mpi transport is a sketch; broadcast-tree forwarding over immediate_send belongs here"
        );
    }

    fn extensions(&self) -> &Extensions {
        &self.extensions
    }
}

impl crate::Transport for RsmpiTransport {
    fn pause(&self) {
        unimplemented!("sketch")
    }
    fn resume(&self) {
        unimplemented!("sketch")
    }
    fn shutdown(&self) {
        unimplemented!("sketch")
    }
}
