//! Kernel Pool

use super::*;
use rayon::prelude::*;
use rtcore::ray::ArcRayTracer;

/// Traces each dispatched bundle as one data-parallel launch across every
/// core. The launch owns the machine until the bundle is done, so the pool
/// reports a single worker.
pub struct KernelPool {
    /// The tracer.
    tracer: ArcRayTracer,

    /// Result callback.
    on_result: Option<ResultCallback>,

    /// Trace event callback.
    on_diagnostic: Option<DiagnosticCallback>,

    /// Launch pool; `None` until configured and after shutdown.
    pool: Option<rayon::ThreadPool>,
}

impl KernelPool {
    /// Creates a new `KernelPool`.
    ///
    /// * `tracer` - The tracer.
    pub fn new(tracer: ArcRayTracer) -> Self {
        Self {
            tracer,
            on_result: None,
            on_diagnostic: None,
            pool: None,
        }
    }
}

impl WorkerPool for KernelPool {
    fn configure(&mut self, _workers: usize) -> Result<usize> {
        if self.pool.is_some() {
            return Err(RtError::Consistency("worker pool is already running".to_string()));
        }
        if self.on_result.is_none() {
            return Err(no_result_callback());
        }
        // Events of one launch would interleave across lanes.
        let lanes = if self.on_diagnostic.is_some() { 1 } else { num_cpus::get() };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(lanes)
            .thread_name(|i| format!("rtrace-kernel-{i}"))
            .build()
            .map_err(|e| RtError::System(format!("cannot start kernel pool: {e}")))?;
        self.pool = Some(pool);
        debug!("kernel pool ready with {lanes} lanes");
        Ok(1)
    }

    fn set_result_callback(&mut self, callback: ResultCallback) {
        self.on_result = Some(callback);
    }

    fn set_diagnostic_callback(&mut self, callback: Option<DiagnosticCallback>) {
        self.on_diagnostic = callback;
    }

    fn dispatch(&mut self, jobs: Vec<Job>) -> Result<()> {
        let (Some(pool), Some(on_result)) = (self.pool.as_ref(), self.on_result.as_ref()) else {
            return Err(not_running());
        };
        let tracer = self.tracer.as_ref();
        let on_diagnostic = self.on_diagnostic.as_ref();
        pool.install(|| {
            jobs.into_par_iter()
                .for_each(|job| run_job(tracer, job, on_result, on_diagnostic));
        });
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.pool = None;
        self.on_result = None;
        self.on_diagnostic = None;
        Ok(())
    }

    fn is_exclusive(&self) -> bool {
        true
    }

    fn workers(&self) -> usize {
        usize::from(self.pool.is_some())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
