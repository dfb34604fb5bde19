//! The intersector seam. §1 treats ray/geometry intersection as "opaque
//! predicates" out of scope for this core; [`Tracer`] is the hook external
//! collaborators (the actual intersector) plug into the ray-queue worker
//! loop that owns everything downstream of a [`Termination`] stamp.

use gxy_render::RayList;

/// Stamps every ray in a dequeued [`RayList`] with its [`gxy_render::Termination`],
/// mutating `raylist.termination` in place. The real implementation lives
/// outside this repo (§1 Non-goals); [`NullTracer`] below is only good
/// enough to drive tests.
pub trait Tracer: Send + Sync {
    fn trace(&self, raylist: &mut RayList);
}

/// Terminates every ray as [`gxy_render::Termination::Opaque`] without
/// looking at geometry at all — enough to exercise the ray-queue worker
/// and `Renderer::dispatch` pipeline in tests without a real intersector.
pub struct NullTracer;

impl Tracer for NullTracer {
    fn trace(&self, raylist: &mut RayList) {
        for t in raylist.termination.iter_mut() {
            *t = Some(gxy_render::Termination::Opaque);
        }
    }
}
