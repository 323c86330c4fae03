//! Thread Pool

use super::*;
use crossbeam_channel::{bounded, Sender};
use rtcore::ray::ArcRayTracer;
use std::thread::{self, JoinHandle};

/// Jobs queued per worker before `dispatch()` blocks.
const QUEUE_PER_WORKER: usize = 4;

/// A fixed set of OS threads pulling jobs from a bounded channel.
pub struct ThreadPool {
    /// The tracer shared by every worker.
    tracer: ArcRayTracer,

    /// Result callback.
    on_result: Option<ResultCallback>,

    /// Trace event callback.
    on_diagnostic: Option<DiagnosticCallback>,

    /// Job channel; `None` until configured and after shutdown.
    sender: Option<Sender<Job>>,

    /// Worker threads.
    handles: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Creates a new `ThreadPool`. No threads run until `configure()`.
    ///
    /// * `tracer` - The tracer.
    pub fn new(tracer: ArcRayTracer) -> Self {
        Self {
            tracer,
            on_result: None,
            on_diagnostic: None,
            sender: None,
            handles: Vec::new(),
        }
    }
}

impl WorkerPool for ThreadPool {
    fn configure(&mut self, workers: usize) -> Result<usize> {
        if self.sender.is_some() {
            return Err(RtError::Consistency("worker pool is already running".to_string()));
        }
        let on_result = self.on_result.clone().ok_or_else(no_result_callback)?;
        let n = if self.on_diagnostic.is_some() { 1 } else { workers.max(1) };

        let (tx, rx) = bounded::<Job>(n * QUEUE_PER_WORKER);
        for i in 0..n {
            let rxc = rx.clone();
            let tracer = Arc::clone(&self.tracer);
            let on_result = Arc::clone(&on_result);
            let on_diagnostic = self.on_diagnostic.clone();
            let handle = thread::Builder::new()
                .name(format!("rtrace-worker-{i}"))
                .spawn(move || {
                    for job in rxc.iter() {
                        run_job(tracer.as_ref(), job, &on_result, on_diagnostic.as_ref());
                    }
                })
                .map_err(|e| RtError::system("cannot start worker thread", e))?;
            self.handles.push(handle);
        }
        drop(rx); // Each worker holds its own receiver.

        self.sender = Some(tx);
        debug!("started {n} worker threads");
        Ok(n)
    }

    fn set_result_callback(&mut self, callback: ResultCallback) {
        self.on_result = Some(callback);
    }

    fn set_diagnostic_callback(&mut self, callback: Option<DiagnosticCallback>) {
        self.on_diagnostic = callback;
    }

    fn dispatch(&mut self, jobs: Vec<Job>) -> Result<()> {
        let tx = self.sender.as_ref().ok_or_else(not_running)?;
        for job in jobs {
            tx.send(job).map_err(|_| not_running())?;
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        // Closing the channel lets workers finish the queue and exit.
        self.sender = None;
        let mut panicked = 0;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        self.on_result = None;
        self.on_diagnostic = None;
        if panicked > 0 {
            return Err(RtError::Consistency(format!("{panicked} worker thread(s) panicked")));
        }
        Ok(())
    }

    fn is_exclusive(&self) -> bool {
        false
    }

    fn workers(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            debug!("worker pool shutdown: {e}");
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::tests::*;
    use super::*;
    use rtcore::geometry::Float;
    use std::sync::Mutex;

    fn pool(delay_ms: u64) -> (ThreadPool, Arc<Mutex<Vec<(u64, Result<RayRecord>)>>>) {
        let results = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&results);
        let mut pool = ThreadPool::new(Arc::new(StubTracer { delay_ms }));
        pool.set_result_callback(Arc::new(move |seq: u64, res: Result<RayRecord>| {
            r.lock().unwrap().push((seq, res))
        }));
        (pool, results)
    }

    #[test]
    fn traces_every_job() {
        let (mut pool, results) = pool(0);
        assert_eq!(pool.configure(3).unwrap(), 3);
        assert_eq!(pool.workers(), 3);
        assert!(!pool.is_exclusive());
        let xs: Vec<Float> = (0..50).map(|i| i as Float).collect();
        pool.dispatch(jobs(&xs)).unwrap();
        pool.shutdown().unwrap();

        let mut results = results.lock().unwrap();
        results.sort_by_key(|(seq, _)| *seq);
        assert_eq!(results.len(), 50);
        for (i, (seq, res)) in results.iter().enumerate() {
            assert_eq!(*seq, i as u64);
            assert_eq!(res.as_ref().unwrap().length, i as Float);
        }
    }

    #[test]
    fn diagnostic_callback_forces_one_worker() {
        let (mut pool, _) = pool(0);
        let ignore: DiagnosticCallback = Arc::new(|_: u64, _: TraceEvent| {});
        pool.set_diagnostic_callback(Some(ignore));
        assert_eq!(pool.configure(8).unwrap(), 1);
    }

    #[test]
    fn misuse_is_a_consistency_error() {
        let mut bare = ThreadPool::new(Arc::new(StubTracer { delay_ms: 0 }));
        assert!(matches!(bare.configure(2), Err(RtError::Consistency(_))));
        assert!(matches!(bare.dispatch(jobs(&[1.0])), Err(RtError::Consistency(_))));

        let (mut pool, _) = pool(0);
        pool.configure(1).unwrap();
        assert!(matches!(pool.configure(1), Err(RtError::Consistency(_))));
    }

    #[test]
    fn failures_are_reported_not_fatal_to_threads() {
        let (mut pool, results) = pool(0);
        pool.configure(2).unwrap();
        pool.dispatch(jobs(&[-1.0, Float::NAN, 2.0])).unwrap();
        pool.shutdown().unwrap();
        let results = results.lock().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|(_, r)| r.is_err()).count(), 2);
    }
}
