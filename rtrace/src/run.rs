//! Ray loop

use super::queue::*;
use super::reader::*;
use rtcore::context::RunContext;
use rtcore::error::{Result, RtError};
use rtcore::ray::RayBundle;
use std::io::BufRead;

/// Reads rays until the input ends or the ray budget is used up, queueing
/// them in bundles of `flush_interval` rays (one at a time when it is 0).
/// The queue is flushed after every full bundle and at every sentinel that
/// follows unflushed rays. Malformed input flushes the rays read before it,
/// then fails. An interrupt is noticed between bundles and while waiting
/// for input; the queue is flushed before returning it as an error.
///
/// * `reader`         - Ray source.
/// * `queue`          - Destination queue.
/// * `flush_interval` - Rays per bundle, 0 for unbounded.
/// * `budget`         - Number of rays to read, 0 for no limit.
/// * `ctx`            - Run context.
pub fn run_rays<R>(
    reader: RayReader<R>,
    queue: &mut BundleQueue,
    flush_interval: usize,
    budget: u64,
    ctx: &RunContext,
) -> Result<()>
where
    R: BufRead + Send + 'static,
{
    let capacity = flush_interval.max(1);
    let mut feed = BundleFeed::start(reader, capacity)?;
    let mut bundle = RayBundle::with_capacity(capacity);
    let mut remaining = budget;
    let mut pending = false;

    loop {
        if let Some(signo) = ctx.interrupted() {
            queue.flush()?;
            return Err(RtError::interrupted(signo));
        }

        let mut n = match feed.read_bundle(&mut bundle, ctx) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e @ RtError::Interrupted { .. }) => {
                queue.flush()?;
                return Err(e);
            }
            Err(e) => {
                if !bundle.is_empty() {
                    ctx.add_rays_read(traceable(&bundle));
                    queue.submit(&bundle)?;
                }
                queue.flush()?;
                return Err(e);
            }
        };
        if budget > 0 && n as u64 > remaining {
            ctx.warn("extra ray(s) past end of input");
            n = remaining as usize;
            bundle.truncate(n);
        }

        let rays = traceable(&bundle);
        ctx.add_rays_read(rays);
        queue.submit(&bundle)?;

        // A lone sentinel with nothing queued needs no barrier.
        pending |= rays > 0;
        let full = flush_interval > 0 && n == flush_interval;
        if pending && (full || bundle.ends_with_sentinel()) {
            queue.flush()?;
            pending = false;
        }

        if budget > 0 {
            remaining -= n as u64;
            if remaining == 0 {
                break;
            }
        }
    }

    if budget > 0 && remaining > 0 {
        ctx.warn("unexpected EOF on input");
    }
    Ok(())
}

fn traceable(bundle: &RayBundle) -> u64 {
    bundle.rays().iter().filter(|q| !q.is_sentinel()).count() as u64
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputSpec;
    use crate::pool::ThreadPool;
    use crate::sink::ResultSink;
    use crate::trace::TraceFilter;
    use rtcore::codec::{OutputFormat, VectorFormat};
    use rtcore::ray::{RayQuery, RayRecord, RayTracer, TraceObserver};
    use std::io::{self, Cursor};
    use std::sync::Arc;

    struct Echo;

    impl RayTracer for Echo {
        fn trace(&self, q: &RayQuery, _seq: u64, _obs: &mut dyn TraceObserver) -> Result<RayRecord> {
            Ok(RayRecord::miss(q))
        }
    }

    fn run(text: &str, flush_interval: usize, budget: u64) -> (Result<()>, Arc<RunContext>) {
        let ctx = Arc::new(RunContext::new());
        let spec = OutputSpec::parse("o", OutputFormat::Ascii, false, &ctx).unwrap();
        let sink = ResultSink::new(Box::new(io::sink()), spec, TraceFilter::default(), Arc::clone(&ctx)).unwrap();
        let pool = Box::new(ThreadPool::new(Arc::new(Echo)));
        let mut queue = BundleQueue::new(pool, sink, 2, false, Arc::clone(&ctx)).unwrap();
        let reader = RayReader::new(Cursor::new(text.as_bytes().to_vec()), VectorFormat::Ascii);
        let result = run_rays(reader, &mut queue, flush_interval, budget, &ctx);
        queue.finish().unwrap();
        (result, ctx)
    }

    fn rays(n: usize) -> String {
        (0..n).map(|i| format!("{i} 0 0 0 0 1\n")).collect()
    }

    #[test]
    fn flushes_on_full_bundles() {
        let (res, ctx) = run(&rays(4), 2, 0);
        res.unwrap();
        let s = ctx.stats();
        assert_eq!(s.rays_read, 4);
        assert_eq!(s.results_emitted, 4);
        assert_eq!(s.flushes, 2);
    }

    #[test]
    fn every_full_bundle_is_a_barrier() {
        for interval in 1..=3 {
            for count in 1..=7 {
                let (res, ctx) = run(&rays(count), interval, 0);
                res.unwrap();
                let s = ctx.stats();
                assert_eq!(s.results_emitted, count as u64);
                assert!(
                    s.flushes >= (count / interval) as u64,
                    "interval {interval}, {count} rays: {} flushes",
                    s.flushes
                );
            }
        }
    }

    #[test]
    fn sentinel_after_full_bundle_adds_no_barrier() {
        let text = format!("{}0 0 0 0 0 0\n", rays(2));
        let (res, ctx) = run(&text, 1, 0);
        res.unwrap();
        assert_eq!(ctx.stats().flushes, 2);
    }

    #[test]
    fn unbounded_interval_flushes_at_sentinels_only() {
        let text = format!("{}0 0 0 0 0 0\n{}", rays(3), rays(2));
        let (res, ctx) = run(&text, 0, 0);
        res.unwrap();
        let s = ctx.stats();
        assert_eq!(s.rays_read, 5);
        assert_eq!(s.flushes, 1);
        assert_eq!(s.results_emitted, 5);
    }

    #[test]
    fn lone_sentinel_does_not_flush() {
        let (res, ctx) = run("0 0 0 0 0 0\n", 0, 0);
        res.unwrap();
        assert_eq!(ctx.stats().flushes, 0);
        assert_eq!(ctx.stats().rays_read, 0);
    }

    #[test]
    fn budget_limits_reading() {
        let (res, ctx) = run(&rays(5), 2, 3);
        res.unwrap();
        let s = ctx.stats();
        assert_eq!(s.rays_read, 3);
        assert_eq!(s.warnings, 1);

        let (res, ctx) = run(&rays(2), 1, 4);
        res.unwrap();
        assert_eq!(ctx.stats().rays_read, 2);
        assert_eq!(ctx.stats().warnings, 1);
    }

    #[test]
    fn malformed_input_flushes_prefix() {
        let text = format!("{}1 2 3\n", rays(3));
        let (res, ctx) = run(&text, 2, 0);
        assert!(matches!(res, Err(RtError::Format(_))));
        let s = ctx.stats();
        assert_eq!(s.rays_read, 3);
        assert_eq!(s.results_emitted, 3);
    }

    #[test]
    fn interrupt_stops_between_bundles() {
        let ctx = Arc::new(RunContext::new());
        ctx.raise_interrupt(15);
        let spec = OutputSpec::parse("o", OutputFormat::Ascii, false, &ctx).unwrap();
        let sink = ResultSink::new(Box::new(io::sink()), spec, TraceFilter::default(), Arc::clone(&ctx)).unwrap();
        let mut queue = BundleQueue::new(Box::new(ThreadPool::new(Arc::new(Echo))), sink, 1, false, Arc::clone(&ctx)).unwrap();
        let reader = RayReader::new(Cursor::new(rays(2).into_bytes()), VectorFormat::Ascii);
        let res = run_rays(reader, &mut queue, 1, 0, &ctx);
        assert_eq!(res, Err(RtError::interrupted(15)));
        assert_eq!(ctx.stats().rays_read, 0);
        queue.finish().unwrap();
    }
}
