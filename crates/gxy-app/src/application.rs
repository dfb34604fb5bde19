//! [`Application`]: the single runtime context §9's "Global singletons"
//! design note asks for ("The application object, event tracker, thread
//! manager, and message manager are process-wide. Expose them via a single
//! `runtime` context passed explicitly to constructors"), ported from
//! `src/framework/Application.{h,cpp}`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use gxy_config::GxyConfig;
use gxy_keyed::KeyedObjectRegistry;
use gxy_log::{EventLog, ThreadRecorder};
use gxy_message::RuntimeHandle;
use gxy_partition::Partitioning;
use gxy_render::{RayList, RayQueueManager, Renderer};
use gxy_threading::{ThreadManager, ThreadPool, ThreadPoolError};
use gxy_transport::{spawn_cluster, LocalTransport, Transport};
use thiserror::Error;
use tracing::warn;

use crate::control::{ApplicationControl, PrintMsg, QuitMsg, SyncMsg};
use crate::registry::{build_work_registry, WorkTypeIds};
use crate::tracer::Tracer;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] ThreadPoolError),
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// One simulated rank's runtime context: the `Transport` it sends/broadcasts
/// through, the process-wide keyed-object and ray-queue state, and the
/// thread roster §5 assigns this process (comms + worker, owned by
/// `Transport`; ray-queue worker and the `N` pool threads, owned here).
pub struct Application {
    transport: Arc<LocalTransport>,
    work_ids: WorkTypeIds,
    keyed_objects: Arc<KeyedObjectRegistry>,
    ray_queue: Arc<RayQueueManager>,
    thread_pool: ThreadPool,
    threads: Mutex<ThreadManager>,
    event_log: Arc<EventLog>,
    recorder: ThreadRecorder,
    quitting: Arc<AtomicBool>,
    config: GxyConfig,
}

impl Application {
    /// Build a simulated `size`-rank cluster, one `Application` per rank,
    /// sharing a single Work Registry (§9 "one-time registration step at
    /// program start") and each with its own `KeyedObjectRegistry` /
    /// `RayQueueManager` / thread pool installed in its `Transport`'s
    /// extensions so every registered Work type can reach them.
    pub fn launch(size: i32, config: GxyConfig) -> Result<Vec<Application>, AppError> {
        let (work_registry, work_ids) = build_work_registry();
        let ranks = spawn_cluster(size, work_registry);

        ranks
            .into_iter()
            .map(|transport| {
                let keyed_objects = Arc::new(KeyedObjectRegistry::new());
                let ray_queue = Arc::new(RayQueueManager::new());
                let quitting = Arc::new(AtomicBool::new(false));
                let event_log = Arc::new(EventLog::new());
                let recorder = event_log.for_thread(format!("app-{}", transport.rank()));

                transport.extensions().insert(keyed_objects.clone());
                transport.extensions().insert(ray_queue.clone());
                transport.extensions().insert(Arc::new(ApplicationControl {
                    quitting: quitting.clone(),
                    transport: transport.clone() as Arc<dyn Transport>,
                }));

                let thread_pool = ThreadPool::new(&format!("gxy-pool-{}", transport.rank()), config.nthreads as usize)?;

                Ok(Application {
                    transport,
                    work_ids,
                    keyed_objects,
                    ray_queue,
                    thread_pool,
                    threads: Mutex::new(ThreadManager::new()),
                    event_log,
                    recorder,
                    quitting,
                    config: config.clone(),
                })
            })
            .collect()
    }

    pub fn rank(&self) -> i32 {
        self.transport.rank()
    }

    pub fn size(&self) -> i32 {
        RuntimeHandle::size(self.transport.as_ref())
    }

    pub fn transport(&self) -> &Arc<LocalTransport> {
        &self.transport
    }

    pub fn work_ids(&self) -> WorkTypeIds {
        self.work_ids
    }

    pub fn keyed_objects(&self) -> &Arc<KeyedObjectRegistry> {
        &self.keyed_objects
    }

    pub fn ray_queue(&self) -> &Arc<RayQueueManager> {
        &self.ray_queue
    }

    pub fn thread_pool(&self) -> &ThreadPool {
        &self.thread_pool
    }

    pub fn config(&self) -> &GxyConfig {
        &self.config
    }

    /// Original's `Application::Print`: ship a line to rank 0 instead of
    /// racing every rank's stderr directly.
    pub fn print(&self, text: impl Into<String>) {
        let msg = Arc::new(PrintMsg::new(self.work_ids.print, self.rank(), text));
        self.transport.send_work(msg, 0);
    }

    /// Original's `Application::Log`: append to this rank's own event log,
    /// replayed by [`Application::dump_log`] at shutdown (§5 "Event log:
    /// per-thread, no sharing").
    pub fn log(&self, text: impl Into<String>) {
        self.recorder.record("app_log", text);
    }

    pub fn dump_log(&self) {
        self.event_log.dump_all();
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> bool {
        !self.is_quitting()
    }

    pub fn pause(&self) {
        self.transport.pause();
    }

    pub fn run(&self) {
        self.transport.resume();
    }

    /// Original's `Application::QuitApplication`: broadcast the quit
    /// collectively and block until this rank's own shutdown has run.
    pub fn quit_application(&self) {
        let msg = Arc::new(QuitMsg::new(self.work_ids.quit));
        if let Some(waiter) = self.transport.broadcast_work(msg, true, true) {
            waiter.wait();
        }
        self.thread_pool.wait();
        self.threads.lock().unwrap().join_all();
    }

    /// Original's `Application::SyncApplication`: a blocking collective
    /// barrier with no payload.
    pub fn sync_application(&self) {
        let msg = Arc::new(SyncMsg::new(self.work_ids.sync));
        if let Some(waiter) = self.transport.broadcast_work(msg, true, true) {
            waiter.wait();
        }
    }

    /// Spawn this rank's ray-queue worker thread (§5 thread roster): drain
    /// `RayQueueManager`, hand each packet to the (external, §1 "opaque
    /// predicates") `tracer`, then to `Renderer::dispatch`. Exits once the
    /// queue is killed, either by [`Application::quit_application`] or
    /// directly by a caller done rendering.
    pub fn spawn_ray_worker(
        &self,
        tracer: Arc<dyn Tracer>,
        renderer: Arc<Renderer>,
        partitioning: Arc<Partitioning>,
    ) -> Result<(), AppError> {
        let transport = self.transport.clone();
        let ray_queue = self.ray_queue.clone();
        let name = format!("gxy-ray-worker-{}", self.rank());
        self.threads.lock().unwrap().spawn(name, move || {
            while let Some(mut raylist) = ray_queue.dequeue() {
                tracer.trace(&mut raylist);
                if let Err(e) = renderer.dispatch(transport.as_ref(), partitioning.as_ref(), raylist) {
                    warn!(error = %e, "ray dispatch failed");
                }
            }
        })?;
        Ok(())
    }

    pub fn enqueue_rays(&self, priority: gxy_render::RayPriority, raylist: RayList) {
        if self.ray_queue.enqueue(priority, raylist).is_err() {
            warn!("attempted to enqueue rays after the ray queue was killed");
        }
    }
}
