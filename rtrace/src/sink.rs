//! Result Sink

use super::output::*;
use super::trace::*;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use rtcore::context::RunContext;
use rtcore::error::{Result, RtError};
use rtcore::ray::{RayRecord, TraceEvent};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

/// Output stream owned by the sink.
pub type OutputStream = Box<dyn Write + Send>;

enum SinkMessage {
    Diagnostic(u64, TraceEvent),
    Result(u64, Result<RayRecord>),
    Barrier(u64, Sender<Result<()>>),
    Close,
}

/// Sends results to a `ResultSink` from any thread.
#[derive(Clone)]
pub struct SinkHandle {
    tx: Sender<SinkMessage>,
}

impl SinkHandle {
    /// Delivers the outcome of a ray.
    ///
    /// * `seq`    - Sequence number.
    /// * `result` - The record, or the error that ended tracing.
    pub fn on_result(&self, seq: u64, result: Result<RayRecord>) {
        // A closed sink has already reported its own error.
        let _ = self.tx.send(SinkMessage::Result(seq, result));
    }

    /// Delivers a trace event. Events of a ray are written before its result.
    ///
    /// * `seq`   - Sequence number.
    /// * `event` - The event.
    pub fn on_diagnostic(&self, seq: u64, event: TraceEvent) {
        let _ = self.tx.send(SinkMessage::Diagnostic(seq, event));
    }
}

/// Writes results in sequence order regardless of the order they arrive in.
/// Runs on its own thread; the first failure is kept and fails every later
/// barrier.
pub struct ResultSink {
    handle: SinkHandle,
    thread: Option<JoinHandle<Result<OutputStream>>>,
    failure: Arc<OnceLock<RtError>>,
}

impl ResultSink {
    /// Starts a sink writing to `output`.
    ///
    /// * `output` - Output stream.
    /// * `spec`   - Output specification.
    /// * `filter` - Trace event filter.
    /// * `ctx`    - Run context; counts emitted results.
    pub fn new(output: OutputStream, spec: OutputSpec, filter: TraceFilter, ctx: Arc<RunContext>) -> Result<Self> {
        let (tx, rx) = unbounded();
        let failure = Arc::new(OnceLock::new());
        let mut emitter = Emitter {
            out: output,
            spec,
            filter,
            ctx,
            next: 0,
            slots: BTreeMap::new(),
            waiters: Vec::new(),
            failure: Arc::clone(&failure),
        };
        let thread = thread::Builder::new()
            .name("rtrace-sink".to_string())
            .spawn(move || emitter.run(rx))
            .map_err(|e| RtError::system("cannot start result sink", e))?;
        Ok(Self {
            handle: SinkHandle { tx },
            thread: Some(thread),
            failure,
        })
    }

    /// Returns a handle for delivering results.
    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    /// Returns the first failure, if any.
    pub fn failure(&self) -> Option<RtError> {
        self.failure.get().cloned()
    }

    /// Blocks until every ray numbered below `upto` is written and the output
    /// is flushed.
    ///
    /// * `upto` - One past the last sequence number to wait for.
    pub fn barrier(&self, upto: u64) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.handle
            .tx
            .send(SinkMessage::Barrier(upto, ack_tx))
            .map_err(|_| self.closed())?;
        ack_rx.recv().map_err(|_| self.closed())?
    }

    /// Stops the sink once everything delivered so far is written, and
    /// returns the output stream.
    pub fn finish(mut self) -> Result<OutputStream> {
        let _ = self.handle.tx.send(SinkMessage::Close);
        let thread = self.thread.take().ok_or_else(|| self.closed())?;
        thread
            .join()
            .map_err(|_| RtError::Consistency("result sink panicked".to_string()))?
    }

    fn closed(&self) -> RtError {
        self.failure()
            .unwrap_or_else(|| RtError::Consistency("result sink is closed".to_string()))
    }
}

impl Drop for ResultSink {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.tx.send(SinkMessage::Close);
            let _ = thread.join();
        }
    }
}

/// Trace events and result of one ray waiting for its turn.
#[derive(Default)]
struct Slot {
    events: Vec<TraceEvent>,
    result: Option<RayRecord>,
}

/// State of the sink thread.
struct Emitter {
    out: OutputStream,
    spec: OutputSpec,
    filter: TraceFilter,
    ctx: Arc<RunContext>,

    /// Next sequence number to write.
    next: u64,

    /// Rays that arrived ahead of `next`.
    slots: BTreeMap<u64, Slot>,

    /// Barriers waiting for `next` to reach their mark.
    waiters: Vec<(u64, Sender<Result<()>>)>,

    failure: Arc<OnceLock<RtError>>,
}

impl Emitter {
    fn run(&mut self, rx: Receiver<SinkMessage>) -> Result<OutputStream> {
        for msg in rx.iter() {
            match msg {
                SinkMessage::Diagnostic(seq, event) => {
                    if seq >= self.next {
                        self.slots.entry(seq).or_default().events.push(event);
                    }
                }
                SinkMessage::Result(seq, Ok(rec)) => {
                    if seq >= self.next {
                        self.slots.entry(seq).or_default().result = Some(rec);
                        self.drain();
                    }
                }
                SinkMessage::Result(seq, Err(e)) => {
                    error!("ray {seq}: {e}");
                    self.fail(e);
                }
                SinkMessage::Barrier(upto, ack) => {
                    self.waiters.push((upto, ack));
                }
                SinkMessage::Close => break,
            }
            self.release_waiters();
        }

        if self.failure.get().is_none() && !self.slots.is_empty() {
            self.fail(RtError::Consistency(format!(
                "{} ray(s) not written at close",
                self.slots.len()
            )));
        }
        if let Err(e) = self.out.flush() {
            self.fail(e.into());
        }
        for (_, ack) in self.waiters.drain(..) {
            let _ = ack.send(Err(self.failure.get().cloned().unwrap_or_else(|| {
                RtError::Consistency("result sink closed before barrier".to_string())
            })));
        }
        match self.failure.get() {
            Some(e) => Err(e.clone()),
            None => Ok(std::mem::replace(&mut self.out, Box::new(std::io::sink()))),
        }
    }

    /// Writes every ray that is ready, in order.
    fn drain(&mut self) {
        if self.failure.get().is_some() {
            return;
        }
        while self.slots.get(&self.next).map_or(false, |s| s.result.is_some()) {
            let Some(slot) = self.slots.remove(&self.next) else {
                break;
            };
            if let Err(e) = self.emit(slot) {
                self.fail(e);
                return;
            }
            self.ctx.add_result_emitted();
            self.next += 1;
        }
    }

    fn emit(&mut self, slot: Slot) -> Result<()> {
        for event in slot.events.iter().filter(|e| self.filter.accepts(&e.record)) {
            self.spec.write_event(&mut self.out, event)?;
        }
        if let Some(rec) = slot.result {
            self.spec.write_result(&mut self.out, &rec)?;
        }
        Ok(())
    }

    /// Acknowledges the barriers that are satisfied, or all of them after a
    /// failure.
    fn release_waiters(&mut self) {
        if self.waiters.is_empty() {
            return;
        }
        if let Some(e) = self.failure.get() {
            for (_, ack) in self.waiters.drain(..) {
                let _ = ack.send(Err(e.clone()));
            }
            return;
        }
        if !self.waiters.iter().any(|(upto, _)| *upto <= self.next) {
            return;
        }
        let flushed = self.out.flush().map_err(RtError::from);
        if let Err(e) = &flushed {
            self.fail(e.clone());
        }
        let next = self.next;
        let (ready, waiting): (Vec<_>, Vec<_>) = self.waiters.drain(..).partition(|(upto, _)| *upto <= next);
        self.waiters = waiting;
        for (_, ack) in ready {
            let _ = ack.send(flushed.clone());
        }
        if flushed.is_err() {
            self.release_waiters();
        }
    }

    fn fail(&mut self, e: RtError) {
        if self.failure.set(e).is_ok() {
            self.slots.clear();
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rtcore::codec::OutputFormat;
    use rtcore::geometry::{Float, Vector3};
    use rtcore::ray::RayQuery;
    use std::io;
    use std::sync::Mutex;

    /// Output stream that can be read back while the sink owns it.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn record(x: Float) -> RayRecord {
        let mut r = RayRecord::miss(&RayQuery::new(Vector3::ZERO, Vector3::new(0.0, 0.0, 1.0)));
        r.length = x;
        r
    }

    fn sink(spec: &str, out: OutputStream) -> (ResultSink, Arc<RunContext>) {
        let ctx = Arc::new(RunContext::new());
        let spec = OutputSpec::parse(spec, OutputFormat::Ascii, false, &ctx).unwrap();
        let sink = ResultSink::new(out, spec, TraceFilter::default(), Arc::clone(&ctx)).unwrap();
        (sink, ctx)
    }

    #[test]
    fn reorders_results() {
        let buf = SharedBuf::default();
        let (sink, ctx) = sink("L", Box::new(buf.clone()));
        let h = sink.handle();
        for seq in [2, 0, 3, 1] {
            h.on_result(seq, Ok(record(seq as Float)));
        }
        sink.barrier(4).unwrap();
        assert_eq!(
            buf.text(),
            "0.000000e+00\t\n1.000000e+00\t\n2.000000e+00\t\n3.000000e+00\t\n"
        );
        assert_eq!(ctx.stats().results_emitted, 4);
        sink.finish().unwrap();
    }

    #[test]
    fn barrier_waits_for_late_results() {
        let buf = SharedBuf::default();
        let (sink, _) = sink("L", Box::new(buf.clone()));
        let h = sink.handle();
        h.on_result(1, Ok(record(1.0)));
        let late = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(50));
            h.on_result(0, Ok(record(0.0)));
        });
        sink.barrier(2).unwrap();
        assert_eq!(buf.text().lines().count(), 2);
        late.join().unwrap();
        // Nothing outstanding.
        sink.barrier(2).unwrap();
        sink.finish().unwrap();
    }

    #[test]
    fn events_precede_their_result() {
        let buf = SharedBuf::default();
        let (sink, _) = sink("Ltw", Box::new(buf.clone()));
        let h = sink.handle();
        h.on_result(1, Ok(record(1.0)));
        h.on_diagnostic(0, TraceEvent { depth: 1, record: record(5.0) });
        h.on_diagnostic(0, TraceEvent { depth: 0, record: record(0.0) });
        h.on_result(0, Ok(record(0.0)));
        sink.barrier(2).unwrap();
        assert_eq!(
            buf.text(),
            "\t1.000000e+00\t\n1.000000e+00\t\n0.000000e+00\t\n1.000000e+00\t\n"
        );
        sink.finish().unwrap();
    }

    #[test]
    fn failure_fails_barriers() {
        let (sink, _) = sink("v", Box::new(io::sink()));
        let h = sink.handle();
        h.on_result(0, Err(RtError::Consistency("boom".to_string())));
        h.on_result(1, Ok(record(1.0)));
        assert_eq!(sink.barrier(2), Err(RtError::Consistency("boom".to_string())));
        assert!(sink.failure().is_some());
        assert!(sink.finish().is_err());
    }

    #[test]
    fn write_errors_are_system_errors() {
        let (sink, ctx) = sink("v", Box::new(FailingWriter));
        sink.handle().on_result(0, Ok(record(0.0)));
        assert!(matches!(sink.barrier(1), Err(RtError::System(_))));
        assert_eq!(ctx.stats().results_emitted, 0);
    }

    #[test]
    fn close_with_missing_rays() {
        let (sink, _) = sink("v", Box::new(io::sink()));
        sink.handle().on_result(3, Ok(record(0.0)));
        assert!(matches!(sink.finish(), Err(RtError::Consistency(_))));
    }
}
