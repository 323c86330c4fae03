//! Fatal signal supervision.
//!
//! Signals are received by a dedicated thread. While no stream is running the
//! first signal ends the process at once. While one is, it raises the
//! interrupt flag so the run loop drains, also when it is waiting for input,
//! and a watchdog ends the process if the drain takes longer than the grace
//! period.
//! A second signal always ends the process immediately.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use rtcore::context::InterruptFlag;
use rtcore::error::{signal_name, Result, RtError};
use signal_hook::consts::signal::*;
use signal_hook::iterator::{Handle, Signals};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Signals that end a one-shot run.
pub const FATAL_SIGNALS: [i32; 7] = [SIGHUP, SIGINT, SIGPIPE, SIGALRM, SIGTERM, SIGXCPU, SIGXFSZ];

/// Signals that end a daemon. A client hanging up must not take the daemon
/// down, so broken pipes stay ignored and surface as write errors.
pub const DAEMON_SIGNALS: [i32; 6] = [SIGHUP, SIGINT, SIGALRM, SIGTERM, SIGXCPU, SIGXFSZ];

/// Time allowed for a drain before the process is ended anyway.
pub const DRAIN_GRACE: Duration = Duration::from_secs(15);

/// Called with the signal number before exiting on a signal that arrived
/// while idle.
pub type IdleHook = Box<dyn Fn(i32) + Send>;

/// Counts running streams.
#[derive(Clone, Debug, Default)]
pub struct Activity(Arc<AtomicUsize>);

impl Activity {
    /// Marks a stream as running until the returned guard is dropped.
    pub fn enter(&self) -> Busy {
        self.0.fetch_add(1, Ordering::SeqCst);
        Busy(Arc::clone(&self.0))
    }

    /// Returns the number of running streams.
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// A running stream; see `Activity::enter()`.
#[derive(Debug)]
pub struct Busy(Arc<AtomicUsize>);

impl Drop for Busy {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns the signal thread. Dropping it stops the thread and cancels a
/// pending watchdog.
pub struct SignalSupervisor {
    handle: Handle,
    activity: Activity,
    thread: Option<JoinHandle<()>>,
}

impl SignalSupervisor {
    /// Installs handlers for `signals` and starts the supervising thread.
    ///
    /// * `signals`   - Signals to supervise.
    /// * `interrupt` - Flag raised to request a drain.
    /// * `grace`     - Time allowed for a drain.
    /// * `on_idle`   - Cleanup run before exiting on a signal while idle.
    pub fn start(signals: &[i32], interrupt: InterruptFlag, grace: Duration, on_idle: IdleHook) -> Result<Self> {
        let mut incoming =
            Signals::new(signals).map_err(|e| RtError::system("cannot install signal handlers", e))?;
        let handle = incoming.handle();
        let activity = Activity::default();
        let running = activity.clone();

        let thread = thread::Builder::new()
            .name("rtrace-signals".to_string())
            .spawn(move || {
                // Held while a drain is under way; dropping it cancels the
                // watchdog.
                let mut watchdog: Option<Sender<()>> = None;
                for signo in incoming.forever() {
                    if watchdog.is_some() {
                        error!("{}: exiting without finishing", signal_name(signo));
                        process::exit(128 + signo);
                    }
                    if running.count() == 0 {
                        info!("{}: exiting", signal_name(signo));
                        on_idle(signo);
                        process::exit(128 + signo);
                    }
                    warn!("{}: finishing current stream", signal_name(signo));
                    let _ = interrupt.compare_exchange(0, signo, Ordering::SeqCst, Ordering::SeqCst);
                    watchdog = Some(start_watchdog(signo, grace));
                }
            })
            .map_err(|e| RtError::system("cannot start signal thread", e))?;

        Ok(Self {
            handle,
            activity,
            thread: Some(thread),
        })
    }

    /// Returns the counter of running streams.
    pub fn activity(&self) -> Activity {
        self.activity.clone()
    }

    /// Marks a stream as running until the returned guard is dropped.
    pub fn busy(&self) -> Busy {
        self.activity.enter()
    }
}

impl Drop for SignalSupervisor {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("signal thread panicked");
            }
        }
    }
}

fn start_watchdog(signo: i32, grace: Duration) -> Sender<()> {
    let (cancel, cancelled) = bounded::<()>(0);
    let spawned = thread::Builder::new()
        .name("rtrace-watchdog".to_string())
        .spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(grace) {
                error!("{}: drain did not finish in {}s", signal_name(signo), grace.as_secs());
                process::exit(128 + signo);
            }
        });
    if let Err(e) = spawned {
        error!("cannot start watchdog: {e}");
    }
    cancel
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
