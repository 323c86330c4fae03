//! Persistence state machine.

use rtcore::error::{Result, RtError};
use std::fmt;
use std::path::{Path, PathBuf};

/// How the process persists between ray streams.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PersistMode {
    /// Run once and exit.
    None,

    /// Run the first stream, then leave a child serving later ones.
    Single,

    /// Serve streams with independent sibling pipelines.
    Parallel,

    /// The child left behind by `Single`.
    Child,
}

/// Lifecycle states.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PersistState {
    /// Not persistent; about to run once.
    None,

    /// Will run, then hand over to a child.
    ArmedSingle,

    /// Will start the sibling daemon.
    ArmedParallel,

    /// Idle, blocked until an activation arrives.
    Waiting,

    /// Tracing a stream.
    Running,

    /// Between streams; about to hand over or re-arm.
    ChildLoop,

    /// A fatal signal arrived while running; finishing the stream.
    Draining,

    /// Done.
    Exited,
}

/// Inputs to the state machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PersistEvent {
    /// Begin the first stream.
    Start,

    /// The current stream ended.
    StreamDone,

    /// A child process was started; `child` is true on the child's side.
    Forked { child: bool },

    /// Go back to waiting.
    Rearm,

    /// An activation arrived.
    Activated,

    /// A fatal signal arrived.
    Signal(i32),

    /// A fatal error occurred.
    Fatal,
}

impl fmt::Display for PersistState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// State of a (possibly) persistent process.
#[derive(Clone, Debug)]
pub struct PersistenceState {
    /// Persistence mode.
    mode: PersistMode,

    /// Lock file; `None` when not persistent.
    lock_file: Option<PathBuf>,

    /// Number of streams started.
    generation: u64,

    /// Current state.
    state: PersistState,
}

impl PersistenceState {
    /// Creates the state for a mode.
    ///
    /// * `mode`      - Persistence mode.
    /// * `lock_file` - Lock file, required unless `mode` is `None`.
    pub fn new(mode: PersistMode, lock_file: Option<PathBuf>) -> Result<Self> {
        if (mode == PersistMode::None) != lock_file.is_none() {
            return Err(RtError::Consistency(format!(
                "persist mode {mode:?} does not match lock file {lock_file:?}"
            )));
        }
        let state = match mode {
            PersistMode::None => PersistState::None,
            PersistMode::Single => PersistState::ArmedSingle,
            PersistMode::Parallel => PersistState::ArmedParallel,
            PersistMode::Child => PersistState::ChildLoop,
        };
        Ok(Self {
            mode,
            lock_file,
            generation: 0,
            state,
        })
    }

    /// Returns the mode.
    pub fn mode(&self) -> PersistMode {
        self.mode
    }

    /// Returns the lock file.
    pub fn lock_file(&self) -> Option<&Path> {
        self.lock_file.as_deref()
    }

    /// Returns the number of streams started.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the current state.
    pub fn state(&self) -> PersistState {
        self.state
    }

    /// Applies an event and returns the new state.
    ///
    /// * `event` - The event.
    pub fn apply(&mut self, event: PersistEvent) -> Result<PersistState> {
        use PersistEvent as E;
        use PersistState as S;

        let next = match (self.state, event) {
            (S::None | S::ArmedSingle, E::Start) => S::Running,
            (S::Waiting, E::Activated) => S::Running,

            (S::Running, E::StreamDone) if self.mode == PersistMode::None => S::Exited,
            (S::Running, E::StreamDone) => S::ChildLoop,
            (S::Running, E::Signal(_) | E::Fatal) => S::Draining,
            (S::Draining, E::StreamDone) => S::Exited,

            (S::ChildLoop, E::Forked { child: false }) if self.mode == PersistMode::Single => S::Exited,
            (S::ChildLoop, E::Forked { child: true }) if self.mode == PersistMode::Child => S::Waiting,
            (S::ChildLoop, E::Rearm) if matches!(self.mode, PersistMode::Child | PersistMode::Parallel) => {
                S::Waiting
            }

            (S::ArmedParallel, E::Forked { child: false }) => S::Exited,
            (S::ArmedParallel, E::Forked { child: true }) => S::Waiting,

            (S::Waiting | S::ChildLoop, E::Signal(_) | E::Fatal) => S::Exited,

            (state, event) => {
                return Err(RtError::Consistency(format!(
                    "persist state {state} cannot handle {event:?}"
                )))
            }
        };
        if next == S::Running {
            self.generation += 1;
        }
        trace!("persist {} -> {next} on {event:?}", self.state);
        self.state = next;
        Ok(next)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
