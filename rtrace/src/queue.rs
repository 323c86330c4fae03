//! Bundle Queue

use super::pool::*;
use super::sink::*;
use rtcore::context::RunContext;
use rtcore::error::{Result, RtError};
use rtcore::ray::RayBundle;
use std::sync::Arc;

/// Numbers rays, hands them to a worker pool and provides flush barriers.
pub struct BundleQueue {
    pool: Box<dyn WorkerPool>,
    sink: ResultSink,
    ctx: Arc<RunContext>,

    /// Sequence number of the next ray.
    next_seq: u64,

    /// Workers running.
    workers: usize,
}

impl BundleQueue {
    /// Connects `pool` to `sink` and starts the workers.
    ///
    /// * `pool`    - Worker pool, not yet configured.
    /// * `sink`    - Result sink.
    /// * `workers` - Requested number of workers.
    /// * `trace`   - Deliver trace events to the sink.
    /// * `ctx`     - Run context; counts traced rays and flushes.
    pub fn new(
        mut pool: Box<dyn WorkerPool>,
        sink: ResultSink,
        workers: usize,
        trace: bool,
        ctx: Arc<RunContext>,
    ) -> Result<Self> {
        let handle = sink.handle();
        let counter = Arc::clone(&ctx);
        pool.set_result_callback(Arc::new(move |seq, result| {
            counter.add_ray_traced();
            handle.on_result(seq, result);
        }));
        if trace {
            let handle = sink.handle();
            let on_diagnostic: DiagnosticCallback = Arc::new(move |seq, event| handle.on_diagnostic(seq, event));
            pool.set_diagnostic_callback(Some(on_diagnostic));
        } else {
            pool.set_diagnostic_callback(None);
        }
        let workers = pool.configure(workers)?;
        info!(
            "{} {} worker(s) ready",
            workers,
            if pool.is_exclusive() { "kernel" } else { "thread" }
        );
        Ok(Self {
            pool,
            sink,
            ctx,
            next_seq: 0,
            workers,
        })
    }

    /// Returns the number of running workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Returns the number of rays submitted.
    pub fn submitted(&self) -> u64 {
        self.next_seq
    }

    /// Queues the rays of a bundle, skipping flush sentinels. Blocks while
    /// the pool is saturated. Returns the number of rays queued.
    ///
    /// * `bundle` - The rays.
    pub fn submit(&mut self, bundle: &RayBundle) -> Result<usize> {
        if let Some(e) = self.sink.failure() {
            return Err(e);
        }
        let jobs: Vec<Job> = bundle
            .rays()
            .iter()
            .filter(|q| !q.is_sentinel())
            .enumerate()
            .map(|(i, &query)| Job {
                seq: self.next_seq + i as u64,
                query,
            })
            .collect();
        let n = jobs.len();
        self.next_seq += n as u64;
        if n > 0 {
            self.pool.dispatch(jobs)?;
        }
        Ok(n)
    }

    /// Waits until every submitted ray is written and the output flushed.
    pub fn flush(&mut self) -> Result<()> {
        self.sink.barrier(self.next_seq)?;
        self.ctx.add_flush();
        Ok(())
    }

    /// Writes everything outstanding, stops the workers and returns the
    /// output stream. The first error wins.
    pub fn finish(mut self) -> Result<OutputStream> {
        let drained = self.sink.barrier(self.next_seq);
        let stopped = self.pool.shutdown();
        drop(self.pool);
        let out = self.sink.finish();
        drained.and(stopped).and(out)
    }

    /// Returns the first failure seen by the sink.
    pub fn failure(&self) -> Option<RtError> {
        self.sink.failure()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
