//! Message Manager (§4.4): wire protocol, broadcast-tree forwarding, and
//! collective/non-collective dispatch, behind the [`Transport`] trait.
//!
//! See §11 of the expanded spec for why this crate ships `LocalTransport`
//! by default rather than linking a real MPI binding.

mod local;
#[cfg(feature = "real-mpi")]
mod real_mpi;
mod tree;

pub use gxy_message::RuntimeHandle;
pub use local::{spawn_cluster, LocalTransport};
#[cfg(feature = "real-mpi")]
pub use real_mpi::RsmpiTransport;
pub use tree::{children, position_of};

/// The control surface the original's `MessageManager::Pause`/`Run` and
/// shutdown path provide, layered on top of [`RuntimeHandle`]'s
/// send/broadcast primitives (§12 "Pause/Run on the Message Manager").
pub trait Transport: RuntimeHandle {
    /// Stop the comms thread's poll loop without tearing it down.
    fn pause(&self);
    /// Resume polling after [`Transport::pause`].
    fn resume(&self);
    /// Stop accepting new work and join the comms/worker threads.
    fn shutdown(&self);
}
