//! Rendering layer built on the messaging/keyed-object substrate: ray
//! classification, pixel aggregation, and the distributed quiescence
//! protocol that tells an application when a frame is finished (§3, §4.8,
//! §4.9).

mod raylist;
mod ray_queue;
mod renderer;
mod rendering;
mod renderingset;

pub use raylist::{classify, Classification, Pixel, RayList, RayType, Termination};
pub use ray_queue::{RayPriority, RayQueueManager};
pub use renderer::{AckRaysMsg, Renderer, RendererError, RendererWorkIds, SendPixelsMsg, SendRaysMsg};
pub use rendering::{Framebuffer, Rendering};
pub use renderingset::{
    PropagateStateMsg, RenderingSet, RenderingSetWorkIds, ResetMsg, ReduceCheckMsg, SynchronousCheckMsg,
};

#[cfg(feature = "diagnostics")]
pub use renderingset::diagnostics::DumpStateMsg;
