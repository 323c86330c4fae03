//! Worker pools

mod kernel;
mod threads;

// Re-export
pub use kernel::*;
pub use threads::*;

use rtcore::error::{Result, RtError};
use rtcore::ray::{RayQuery, RayRecord, RayTracer, TraceEvent, TraceObserver};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// One ray to trace, tagged with its position in the run.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Job {
    /// Sequence number.
    pub seq: u64,

    /// The ray.
    pub query: RayQuery,
}

/// Receives the outcome of every job, from any worker thread.
pub type ResultCallback = Arc<dyn Fn(u64, Result<RayRecord>) + Send + Sync>;

/// Receives trace events, from any worker thread.
pub type DiagnosticCallback = Arc<dyn Fn(u64, TraceEvent) + Send + Sync>;

/// Executes jobs concurrently and reports results through callbacks. Results
/// may arrive in any order.
pub trait WorkerPool: Send {
    /// Starts the workers and returns how many are running. Callbacks must be
    /// set first.
    ///
    /// * `workers` - Requested number of workers.
    fn configure(&mut self, workers: usize) -> Result<usize>;

    /// Sets the result callback.
    ///
    /// * `callback` - The callback.
    fn set_result_callback(&mut self, callback: ResultCallback);

    /// Sets or clears the trace event callback. A pool with a diagnostic
    /// callback runs a single worker so that events of different rays do not
    /// interleave.
    ///
    /// * `callback` - The callback.
    fn set_diagnostic_callback(&mut self, callback: Option<DiagnosticCallback>);

    /// Queues jobs, blocking while the pool is saturated.
    ///
    /// * `jobs` - The jobs.
    fn dispatch(&mut self, jobs: Vec<Job>) -> Result<()>;

    /// Finishes queued jobs and stops the workers.
    fn shutdown(&mut self) -> Result<()>;

    /// Returns true if the backend owns the whole machine while a bundle runs.
    fn is_exclusive(&self) -> bool;

    /// Returns the number of running workers.
    fn workers(&self) -> usize;
}

/// Forwards trace events of one job to a diagnostic callback.
struct CallbackObserver<'a> {
    seq: u64,
    callback: Option<&'a DiagnosticCallback>,
}

impl<'a> TraceObserver for CallbackObserver<'a> {
    fn wants_events(&self) -> bool {
        self.callback.is_some()
    }

    fn on_ray(&mut self, event: TraceEvent) {
        if let Some(cb) = self.callback {
            cb(self.seq, event);
        }
    }
}

/// Traces one job and reports the result. A panicking tracer is reported as
/// a consistency error.
///
/// * `tracer`        - The tracer.
/// * `job`           - The job.
/// * `on_result`     - Result callback.
/// * `on_diagnostic` - Optional trace event callback.
pub(crate) fn run_job(
    tracer: &dyn RayTracer,
    job: Job,
    on_result: &ResultCallback,
    on_diagnostic: Option<&DiagnosticCallback>,
) {
    let mut observer = CallbackObserver {
        seq: job.seq,
        callback: on_diagnostic,
    };
    let result = panic::catch_unwind(AssertUnwindSafe(|| tracer.trace(&job.query, job.seq, &mut observer)))
        .unwrap_or_else(|payload| {
            Err(RtError::Consistency(format!(
                "worker panicked tracing ray {}: {}",
                job.seq,
                panic_message(payload.as_ref())
            )))
        });
    on_result(job.seq, result);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Returns the error for a pool used before `configure()`.
pub(crate) fn not_running() -> RtError {
    RtError::Consistency("worker pool is not running".to_string())
}

/// Returns the error for `configure()` without a result callback.
pub(crate) fn no_result_callback() -> RtError {
    RtError::Consistency("worker pool has no result callback".to_string())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
