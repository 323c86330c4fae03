use ambient::AmbientCache;
use crossbeam_channel::{bounded, Receiver, Sender};
use proptest::prelude::*;
use rtcore::app::Options;
use rtcore::codec::{OutputFormat, VectorFormat};
use rtcore::context::RunContext;
use rtcore::error::{Result, RtError};
use rtcore::geometry::Vector3;
use rtcore::ray::{RayQuery, RayRecord, RayTracer, TraceObserver};
use rtrace::*;
use scene::parse_scene;
use std::io::{self, BufReader, Cursor, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const SCENE: &str = "
    sky .2 .2 .2
    material white plastic .5 .5 .5
    material lamp light 4 4 4
    sphere ball white 0 0 -5 1
    sphere bulb lamp 0 5 0 1
";

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

/// Keeps only what was written before the last flush visible.
#[derive(Clone, Default)]
struct FlushedBuf {
    pending: Arc<Mutex<Vec<u8>>>,
    flushed: Arc<Mutex<Vec<u8>>>,
}

impl Write for FlushedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut pending = self.pending.lock().unwrap();
        self.flushed.lock().unwrap().append(&mut pending);
        Ok(())
    }
}

impl FlushedBuf {
    fn text(&self) -> String {
        String::from_utf8(self.flushed.lock().unwrap().clone()).unwrap()
    }
}

/// Hands out its text, then blocks like an idle terminal until the paired
/// sender is dropped.
struct HeldOpen {
    text: Cursor<Vec<u8>>,
    hold: Receiver<()>,
}

impl Read for HeldOpen {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.text.read(buf)? {
            0 => {
                let _ = self.hold.recv();
                Ok(0)
            }
            n => Ok(n),
        }
    }
}

fn held_open(text: &str) -> (Sender<()>, BufReader<HeldOpen>) {
    let (release, hold) = bounded(0);
    let input = HeldOpen {
        text: Cursor::new(text.as_bytes().to_vec()),
        hold,
    };
    (release, BufReader::new(input))
}

/// Polls `done` for up to five seconds.
fn wait_for(done: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(5) {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn session(args: &str, ambient: AmbientCache) -> Session {
    let argv: Vec<String> = args.split_whitespace().map(String::from).collect();
    let options = Options::from_args(&argv).unwrap();
    let ctx = Arc::new(RunContext::new());
    let settings = RtraceSettings::from_options(&options, &ctx).unwrap();
    let scene = Arc::new(parse_scene(SCENE, "test").unwrap());
    Session::new(settings, scene, Arc::new(ambient), ctx)
}

#[test]
fn ascii_round_trip() {
    let s = session("rtrace -h- -ovL s.scn", AmbientCache::new(None));
    let out = SharedBuf::default();
    let input = "0 0 0 0 0 -1\n0 0 0 0 1 0\n0 0 0 1 0 0\n";
    let stats = s.run(Cursor::new(input), Box::new(out.clone())).unwrap();
    assert_eq!(stats.results_emitted, 3);

    let text = out.text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("4.000000e+00\t"));
    assert_eq!(
        lines[1],
        "4.000000e+00\t4.000000e+00\t4.000000e+00\t4.000000e+00\t"
    );
    assert!(lines[2].starts_with("2.000000e-01\t2.000000e-01\t2.000000e-01\t"));
}

#[test]
fn ascii_direction_flushed_after_sentinel() {
    let s = session("rtrace -h- -od s.scn", AmbientCache::new(None));
    let out = FlushedBuf::default();
    let (release, input) = held_open("0 0 0 1 0 0\n0 0 0 0 0 0\n");
    let run = {
        let out = out.clone();
        thread::spawn(move || s.run(input, Box::new(out)))
    };

    // The input is still open.
    assert!(wait_for(|| !out.text().is_empty()));
    assert_eq!(out.text(), "1.000000e+00\t0.000000e+00\t0.000000e+00\t\n");
    assert!(!run.is_finished());

    drop(release);
    let stats = run.join().unwrap().unwrap();
    assert_eq!(stats.results_emitted, 1);
    assert_eq!(stats.flushes, 1);
}

#[test]
fn signal_while_waiting_for_input_drains() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("amb.dat");
    let s = session("rtrace -h- -ab 1 -ad 16 -ov s.scn", AmbientCache::new(Some(file.clone())));
    let ctx = Arc::clone(s.context());
    let out = FlushedBuf::default();
    let (release, input) = held_open("0 0 0 0 0 -1\n");
    let run = {
        let out = out.clone();
        thread::spawn(move || s.run(input, Box::new(out)))
    };

    assert!(wait_for(|| ctx.stats().rays_traced == 1));
    ctx.raise_interrupt(15);
    assert!(wait_for(|| run.is_finished()));
    assert_eq!(run.join().unwrap().unwrap_err(), RtError::interrupted(15));

    // The pending result was written and the cache synced.
    assert_eq!(out.text().lines().count(), 1);
    assert!(file.exists());
    drop(release);
}

#[test]
fn interval_two_flushes_twice() {
    let s = session("rtrace -h- -x 2 -y 0 s.scn", AmbientCache::new(None));
    let input = "0 0 0 0 0 -1\n0 0 0 0 1 0\n0 0 0 1 0 0\n0 0 0 -1 0 0\n";
    let stats = s.run(Cursor::new(input), Box::new(io::sink())).unwrap();
    assert_eq!(stats.flushes, 2);
    assert_eq!(stats.results_emitted, 4);
}

#[test]
fn binary_double_output() {
    let s = session("rtrace -h- -fdd -ov s.scn", AmbientCache::new(None));
    let mut input = Vec::new();
    for v in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]] {
        rtcore::codec::write_vector(&mut input, VectorFormat::Double, &Vector3::from(v)).unwrap();
    }
    let out = SharedBuf::default();
    let stats = s.run(Cursor::new(input), Box::new(out.clone())).unwrap();
    // The second pair is a sentinel.
    assert_eq!(stats.results_emitted, 1);
    assert_eq!(out.0.lock().unwrap().len(), 24);
}

#[test]
fn malformed_input_after_flushing_prefix() {
    let s = session("rtrace -h- -x 1 -y 0 -ov s.scn", AmbientCache::new(None));
    let out = SharedBuf::default();
    let err = s
        .run(Cursor::new("0 0 0 0 1 0\n0 0 0 0 x 0\n"), Box::new(out.clone()))
        .unwrap_err();
    assert!(matches!(err, RtError::Format(_)));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(out.text().lines().count(), 1);
}

#[test]
fn persisted_ambient_warms_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("amb.dat");
    let args = "rtrace -h- -ab 1 -ad 16 -ov s.scn";
    let input = "0 0 0 0 0 -1\n";

    let cold = session(args, AmbientCache::new(Some(file.clone())));
    cold.run(Cursor::new(input), Box::new(io::sink())).unwrap();
    let cold_samples: u32 = cold.ambient().records().iter().map(|(_, r)| r.samples).sum();
    assert!(cold_samples > 0);

    let warm = session(args, AmbientCache::new(Some(file.clone())));
    warm.run(Cursor::new(input), Box::new(io::sink())).unwrap();
    let warm_samples: u32 = warm.ambient().records().iter().map(|(_, r)| r.samples).sum();
    assert!(warm_samples > cold_samples);
}

/// Returns the x origin as the value after a delay that shrinks with the
/// sequence number, so later rays finish first.
struct DelayTracer;

impl RayTracer for DelayTracer {
    fn trace(&self, q: &RayQuery, seq: u64, _obs: &mut dyn TraceObserver) -> Result<RayRecord> {
        thread::sleep(Duration::from_millis(20u64.saturating_sub(seq * 2)));
        let mut r = RayRecord::miss(q);
        r.length = q.origin.x;
        Ok(r)
    }
}

#[test]
fn output_order_survives_worker_delay() {
    let ctx = Arc::new(RunContext::new());
    let spec = OutputSpec::parse("L", OutputFormat::Ascii, false, &ctx).unwrap();
    let out = SharedBuf::default();
    let sink = ResultSink::new(Box::new(out.clone()), spec, TraceFilter::default(), Arc::clone(&ctx)).unwrap();
    let pool = Box::new(ThreadPool::new(Arc::new(DelayTracer)));
    let mut queue = BundleQueue::new(pool, sink, 4, false, Arc::clone(&ctx)).unwrap();

    let input: String = (0..10).map(|i| format!("{i} 0 0 0 0 1\n")).collect();
    let reader = RayReader::new(Cursor::new(input), VectorFormat::Ascii);
    run_rays(reader, &mut queue, 5, 0, &ctx).unwrap();
    queue.finish().unwrap();

    let values: Vec<f64> = out
        .text()
        .lines()
        .map(|l| l.trim_end().parse().unwrap())
        .collect();
    assert_eq!(values, (0..10).map(f64::from).collect::<Vec<_>>());
    assert_eq!(ctx.stats().flushes, 2);
}

/// Completes each dispatch on its own thread after a delay, and records for
/// every ray how many barriers had completed when it was dispatched.
struct RecordingPool {
    ctx: Arc<RunContext>,
    callback: Option<ResultCallback>,
    dispatched: Arc<Mutex<Vec<(u64, u64)>>>,
    running: Vec<JoinHandle<()>>,
}

impl WorkerPool for RecordingPool {
    fn configure(&mut self, _workers: usize) -> Result<usize> {
        Ok(1)
    }

    fn set_result_callback(&mut self, callback: ResultCallback) {
        self.callback = Some(callback);
    }

    fn set_diagnostic_callback(&mut self, _callback: Option<DiagnosticCallback>) {}

    fn dispatch(&mut self, jobs: Vec<Job>) -> Result<()> {
        let flushes = self.ctx.stats().flushes;
        self.dispatched
            .lock()
            .unwrap()
            .extend(jobs.iter().map(|j| (j.seq, flushes)));
        let callback = self.callback.clone().unwrap();
        self.running.push(thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            for job in jobs {
                callback(job.seq, Ok(RayRecord::miss(&job.query)));
            }
        }));
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        for t in self.running.drain(..) {
            t.join().unwrap();
        }
        Ok(())
    }

    fn is_exclusive(&self) -> bool {
        false
    }

    fn workers(&self) -> usize {
        1
    }
}

#[test]
fn no_ray_dispatched_ahead_of_its_barrier() {
    let ctx = Arc::new(RunContext::new());
    let spec = OutputSpec::parse("o", OutputFormat::Ascii, false, &ctx).unwrap();
    let sink = ResultSink::new(Box::new(io::sink()), spec, TraceFilter::default(), Arc::clone(&ctx)).unwrap();
    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let pool = Box::new(RecordingPool {
        ctx: Arc::clone(&ctx),
        callback: None,
        dispatched: Arc::clone(&dispatched),
        running: Vec::new(),
    });
    let mut queue = BundleQueue::new(pool, sink, 1, false, Arc::clone(&ctx)).unwrap();

    let input: String = (0..7).map(|i| format!("{i} 0 0 0 0 1\n")).collect();
    let reader = RayReader::new(Cursor::new(input), VectorFormat::Ascii);
    run_rays(reader, &mut queue, 2, 0, &ctx).unwrap();
    queue.finish().unwrap();

    let dispatched = dispatched.lock().unwrap();
    assert_eq!(dispatched.len(), 7);
    for &(seq, flushes) in dispatched.iter() {
        // Barriers follow rays 1, 3 and 5.
        assert!(flushes >= seq / 2, "ray {seq} dispatched after {flushes} barriers");
    }
    assert_eq!(ctx.stats().flushes, 3);
}

struct Echo;

impl RayTracer for Echo {
    fn trace(&self, q: &RayQuery, _seq: u64, _obs: &mut dyn TraceObserver) -> Result<RayRecord> {
        Ok(RayRecord::miss(q))
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn one_result_per_traced_ray(
        zero in proptest::collection::vec(any::<bool>(), 0..40),
        interval in 0usize..5,
    ) {
        let ctx = Arc::new(RunContext::new());
        let spec = OutputSpec::parse("o", OutputFormat::Ascii, false, &ctx).unwrap();
        let out = SharedBuf::default();
        let sink = ResultSink::new(Box::new(out.clone()), spec, TraceFilter::default(), Arc::clone(&ctx)).unwrap();
        let pool = Box::new(ThreadPool::new(Arc::new(DelayTracer)));
        let mut queue = BundleQueue::new(pool, sink, 3, false, Arc::clone(&ctx)).unwrap();

        let input: String = zero
            .iter()
            .enumerate()
            .map(|(i, &z)| format!("{i} 0 0 0 0 {}\n", if z { 0 } else { 1 }))
            .collect();
        let reader = RayReader::new(Cursor::new(input), VectorFormat::Ascii);
        run_rays(reader, &mut queue, interval, 0, &ctx).unwrap();
        queue.finish().unwrap();

        let expected = zero.iter().filter(|z| !**z).count();
        prop_assert_eq!(out.text().lines().count(), expected);
        prop_assert_eq!(ctx.stats().results_emitted, expected as u64);
    }

    #[test]
    fn barrier_at_least_every_interval(count in 0usize..30, interval in 1usize..5) {
        let ctx = Arc::new(RunContext::new());
        let spec = OutputSpec::parse("o", OutputFormat::Ascii, false, &ctx).unwrap();
        let sink = ResultSink::new(Box::new(io::sink()), spec, TraceFilter::default(), Arc::clone(&ctx)).unwrap();
        let pool = Box::new(ThreadPool::new(Arc::new(Echo)));
        let mut queue = BundleQueue::new(pool, sink, 2, false, Arc::clone(&ctx)).unwrap();

        let input: String = (0..count).map(|i| format!("{i} 0 0 0 0 1\n")).collect();
        let reader = RayReader::new(Cursor::new(input), VectorFormat::Ascii);
        run_rays(reader, &mut queue, interval, 0, &ctx).unwrap();
        queue.finish().unwrap();

        prop_assert!(ctx.stats().flushes >= (count / interval) as u64);
    }
}
