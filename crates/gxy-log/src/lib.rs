//! Per-thread timestamped event recording and process-wide `tracing` setup.
//!
//! Galaxy's original Event Log stamps every thread's notable transitions
//! (queue push/pop, collective start/end, ray packet arrival) with a
//! monotonic timestamp and dumps each thread's trace to a per-process,
//! per-thread file at shutdown. Here the recording itself rides on
//! `tracing` (so every event is also visible live via `RUST_LOG`), and
//! `EventLog` keeps the original's "dump everything at shutdown" behavior
//! by retaining an in-memory ring per registered thread that `dump_all`
//! replays through `tracing` (and, when a non-blocking file writer was
//! installed by [`init`], through `tracing-appender`) on process exit.

use std::time::Instant;

use parking_lot::Mutex;
use tracing::{info, info_span};
use tracing_appender::non_blocking::WorkerGuard;

/// One recorded event: a monotonic timestamp relative to [`EventLog::epoch`]
/// and a short tag describing what happened.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub elapsed: std::time::Duration,
    pub tag: &'static str,
    pub detail: String,
}

struct ThreadLog {
    thread_name: String,
    records: Mutex<Vec<EventRecord>>,
}

/// Process-wide registry of per-thread event logs.
///
/// Each thread that wants to participate calls [`EventLog::for_thread`] once
/// (typically at thread-start) to obtain a [`ThreadRecorder`] handle; that
/// handle is cheap to clone and is what call sites actually push records
/// through.
pub struct EventLog {
    epoch: Instant,
    threads: Mutex<Vec<std::sync::Arc<ThreadLog>>>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        EventLog {
            epoch: Instant::now(),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Register a new thread-local recorder under `thread_name`.
    pub fn for_thread(&self, thread_name: impl Into<String>) -> ThreadRecorder {
        let log = std::sync::Arc::new(ThreadLog {
            thread_name: thread_name.into(),
            records: Mutex::new(Vec::new()),
        });
        self.threads.lock().push(log.clone());
        ThreadRecorder {
            epoch: self.epoch,
            log,
        }
    }

    /// Replay every registered thread's records through `tracing`, in
    /// thread-registration order. Intended to run once, at process
    /// shutdown, mirroring the original's "dumped per process+thread" rule.
    pub fn dump_all(&self) {
        let threads = self.threads.lock();
        for t in threads.iter() {
            let span = info_span!("event_log.dump", thread = %t.thread_name);
            let _enter = span.enter();
            for r in t.records.lock().iter() {
                info!(elapsed_us = r.elapsed.as_micros() as u64, tag = r.tag, detail = %r.detail);
            }
        }
    }

    /// Total record count across every registered thread.
    pub fn len(&self) -> usize {
        self.threads.lock().iter().map(|t| t.records.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A cheap-to-clone handle a single thread uses to append to its own log.
#[derive(Clone)]
pub struct ThreadRecorder {
    epoch: Instant,
    log: std::sync::Arc<ThreadLog>,
}

impl ThreadRecorder {
    /// Record an event tagged `tag` with an arbitrary detail string. Also
    /// emits a live `tracing::event!` at `TRACE` level so the event is
    /// visible under `RUST_LOG=trace` without waiting for shutdown.
    pub fn record(&self, tag: &'static str, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::trace!(target: "event_log", thread = %self.log.thread_name, tag, %detail);
        self.log.records.lock().push(EventRecord {
            elapsed: self.epoch.elapsed(),
            tag,
            detail,
        });
    }
}

/// Install a global `tracing` subscriber writing to stderr plus, if
/// `file_dir` is given, a non-blocking rolling file appender under that
/// directory (one file per process, named by `process_name`). Returns the
/// [`WorkerGuard`] the caller must keep alive for the life of the process;
/// dropping it flushes and stops the background writer thread.
pub fn init(process_name: &str, file_dir: Option<&std::path::Path>) -> Option<WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match file_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::never(dir, format!("{process_name}.log"));
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            let stderr_layer = fmt::layer().with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate_per_thread() {
        let log = EventLog::new();
        let comms = log.for_thread("comms");
        let worker = log.for_thread("worker");

        comms.record("recv", "header for type=3");
        worker.record("dequeue", "msg #1");
        comms.record("send", "to rank 2");

        assert_eq!(log.len(), 3);
    }

    #[test]
    fn dump_all_does_not_panic_on_empty_log() {
        let log = EventLog::new();
        log.dump_all();
        assert!(log.is_empty());
    }
}
