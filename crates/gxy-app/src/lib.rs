//! Runtime context crate: the single `Application` every other `gxy-*`
//! crate is wired through (§9 "Global singletons": "Expose them via a
//! single `runtime` context passed explicitly to constructors; avoid
//! ambient globals to keep tests composable"). Ported from
//! `src/framework/Application.{h,cpp}`.

mod application;
mod control;
mod registry;
mod tracer;

pub use application::{AppError, Application};
pub use control::{ApplicationControl, PrintMsg, QuitMsg, SyncMsg};
pub use registry::{build_work_registry, WorkTypeIds};
pub use tracer::{NullTracer, Tracer};
