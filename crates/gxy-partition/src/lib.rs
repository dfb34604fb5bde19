//! Structured 3-D decomposition of a global box across processes (§4.7).

mod geometry;
mod partitioning;

pub use geometry::{Face, Subbox, Vec3, Vec3i};
pub use partitioning::{factor, Partitioning, PartitioningError, NO_NEIGHBOR};
