//! Per-run counters and interrupt state.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

/// Shared interrupt flag. Holds 0 while running, or the number of the
/// signal that requested a drain.
pub type InterruptFlag = Arc<AtomicI32>;

/// Counters and state for one run of the ray pipeline. A persistent daemon
/// keeps one context for its lifetime and calls `reset()` before each
/// activation.
#[derive(Debug, Default)]
pub struct RunContext {
    /// Non-sentinel rays read from input.
    rays_read: AtomicU64,

    /// Rays handed to the tracer and completed.
    rays_traced: AtomicU64,

    /// Results written by the sink.
    results_emitted: AtomicU64,

    /// Flush barriers completed.
    flushes: AtomicU64,

    /// Warnings reported.
    warnings: AtomicU64,

    /// Generation number; bumped by `reset()`.
    generation: AtomicU64,

    /// Set by the signal supervisor.
    interrupt: InterruptFlag,
}

/// A copy of the counters at one point in time.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub rays_read: u64,
    pub rays_traced: u64,
    pub results_emitted: u64,
    pub flushes: u64,
    pub warnings: u64,
    pub generation: u64,
}

impl RunContext {
    /// Creates a new context with its own interrupt flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new context that observes an existing interrupt flag.
    ///
    /// * `interrupt` - The flag raised by the signal supervisor.
    pub fn with_interrupt(interrupt: InterruptFlag) -> Self {
        Self {
            interrupt,
            ..Self::default()
        }
    }

    /// Returns the interrupt flag so it can be shared with a supervisor.
    pub fn interrupt_flag(&self) -> InterruptFlag {
        Arc::clone(&self.interrupt)
    }

    /// Requests a drain on behalf of signal `signo`. The first request wins.
    ///
    /// * `signo` - Signal number.
    pub fn raise_interrupt(&self, signo: i32) {
        let _ = self
            .interrupt
            .compare_exchange(0, signo, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Returns the pending signal number, if a drain was requested.
    pub fn interrupted(&self) -> Option<i32> {
        match self.interrupt.load(Ordering::SeqCst) {
            0 => None,
            n => Some(n),
        }
    }

    /// Zeroes the counters and moves to the next generation. The interrupt
    /// flag is left alone; a drain request outlives the activation.
    pub fn reset(&self) {
        self.rays_read.store(0, Ordering::Relaxed);
        self.rays_traced.store(0, Ordering::Relaxed);
        self.results_emitted.store(0, Ordering::Relaxed);
        self.flushes.store(0, Ordering::Relaxed);
        self.warnings.store(0, Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the current generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn add_rays_read(&self, n: u64) {
        self.rays_read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_ray_traced(&self) {
        self.rays_traced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_result_emitted(&self) {
        self.results_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Logs a warning and counts it.
    ///
    /// * `msg` - The message.
    pub fn warn(&self, msg: &str) {
        warn!("{msg}");
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> RunStats {
        RunStats {
            rays_read: self.rays_read.load(Ordering::Relaxed),
            rays_traced: self.rays_traced.load(Ordering::Relaxed),
            results_emitted: self.results_emitted.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            warnings: self.warnings.load(Ordering::Relaxed),
            generation: self.generation(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_zeroes_counters_and_bumps_generation() {
        let ctx = RunContext::new();
        ctx.add_rays_read(3);
        ctx.add_ray_traced();
        ctx.add_result_emitted();
        ctx.add_flush();
        ctx.warn("test warning");
        let s = ctx.stats();
        assert_eq!((s.rays_read, s.rays_traced, s.results_emitted, s.flushes, s.warnings), (3, 1, 1, 1, 1));

        ctx.reset();
        let s = ctx.stats();
        assert_eq!(s, RunStats { generation: 1, ..RunStats::default() });
    }

    #[test]
    fn first_interrupt_wins_and_survives_reset() {
        let ctx = RunContext::new();
        assert_eq!(ctx.interrupted(), None);
        ctx.raise_interrupt(15);
        ctx.raise_interrupt(2);
        ctx.reset();
        assert_eq!(ctx.interrupted(), Some(15));
    }

    #[test]
    fn shared_flag() {
        let flag = InterruptFlag::default();
        let ctx = RunContext::with_interrupt(Arc::clone(&flag));
        flag.store(1, Ordering::SeqCst);
        assert_eq!(ctx.interrupted(), Some(1));
    }
}
