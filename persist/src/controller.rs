//! PersistController

use super::daemon::*;
use super::signals::*;
use super::state::*;
use crossbeam_channel::{unbounded, RecvTimeoutError};
use rtcore::app::{Options, PersistRole};
use rtcore::context::{RunContext, RunStats};
use rtcore::error::{Result, RtError};
use rtcore::fileutil::{absolute_path, FileLock};
use rtrace::{OutputStream, Session};
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Drives one process through its persistence lifecycle: a one-shot run, the
/// first run of a single-mode daemon, a single-mode child, the parallel
/// daemon, or a client of an already running daemon.
pub struct PersistController {
    options: Options,
    role: Option<PersistRole>,
    state: PersistenceState,
}

impl PersistController {
    /// Creates a new `PersistController` from the command line options.
    ///
    /// * `options` - Command line options.
    pub fn new(options: Options) -> Result<Self> {
        let role = options.persist_role;
        let (mode, lock_file) = match (options.persist_file(), role) {
            (None, None) => (PersistMode::None, None),
            (None, Some(_)) => return Err(RtError::Usage("persist role requires a persist file".to_string())),
            (Some((path, parallel)), role) => {
                let mode = match (parallel, role) {
                    (false, None) => PersistMode::Single,
                    (false, Some(PersistRole::Child)) => PersistMode::Child,
                    (true, None | Some(PersistRole::Parallel)) => PersistMode::Parallel,
                    _ => {
                        return Err(RtError::Usage(
                            "persist role does not match persist option".to_string(),
                        ))
                    }
                };
                (mode, Some(absolute_path(path)?))
            }
        };
        Ok(Self {
            options,
            role,
            state: PersistenceState::new(mode, lock_file)?,
        })
    }

    /// Returns the persistence state.
    pub fn state(&self) -> &PersistenceState {
        &self.state
    }

    /// Runs to completion and returns the exit status.
    pub fn run(mut self) -> Result<i32> {
        match (self.state.mode(), self.role) {
            (PersistMode::None, _) => self.run_once(),
            (PersistMode::Single, _) => self.run_single(),
            (PersistMode::Child, _) => self.run_child(),
            (PersistMode::Parallel, None) => self.run_parallel_client(),
            (PersistMode::Parallel, Some(_)) => self.run_parallel_daemon(),
        }
    }

    fn lock_file(&self) -> Result<PathBuf> {
        self.state
            .lock_file()
            .map(Path::to_path_buf)
            .ok_or_else(|| RtError::Consistency("persistent process without a lock file".to_string()))
    }

    /// Traces standard input to standard output once.
    fn run_once(&mut self) -> Result<i32> {
        let ctx = Arc::new(RunContext::new());
        let supervisor = SignalSupervisor::start(&FATAL_SIGNALS, ctx.interrupt_flag(), DRAIN_GRACE, Box::new(|_| {}))?;
        let session = Session::from_options(&self.options, ctx)?;

        self.state.apply(PersistEvent::Start)?;
        let result = {
            let _busy = supervisor.busy();
            session.run(stdin_stream(), stdout_stream())
        };
        end_stream(&mut self.state, &result, true)?;
        result.map(|_| 0)
    }

    /// Forwards to a running child, or runs the first stream and leaves a
    /// child behind to serve later ones.
    fn run_single(&mut self) -> Result<i32> {
        let lock_file = self.lock_file()?;
        let socket = socket_path(&lock_file);
        let lock = loop {
            if let Some(stream) = connect(&socket)? {
                return client(stream);
            }
            if let Some(lock) = FileLock::try_exclusive(&lock_file)? {
                break lock;
            }
            // Another invocation runs its first stream; wait for its hand-over.
            debug!("waiting for {}", lock_file.display());
            drop(FileLock::shared(&lock_file)?);
        };

        let ctx = Arc::new(RunContext::new());
        let supervisor = SignalSupervisor::start(&FATAL_SIGNALS, ctx.interrupt_flag(), DRAIN_GRACE, Box::new(|_| {}))?;
        let session = Session::from_options(&self.options, ctx)?;

        self.state.apply(PersistEvent::Start)?;
        let result = {
            let _busy = supervisor.busy();
            session.run(stdin_stream(), stdout_stream())
        };
        if end_stream(&mut self.state, &result, true)? == PersistState::Exited {
            return result.map(|_| 0);
        }
        // Broken pipes while handing over are errors, not signals.
        drop(supervisor);

        let mut handoff = Vec::new();
        let records = hand_over(&session, &mut handoff)?;
        let child = spawn_daemon(PersistRole::Child, &handoff)?;
        debug!("handed {records} ambient records to process {}", child.id());
        self.state.apply(PersistEvent::Forked { child: false })?;
        info!("handed {} over to process {}", lock_file.display(), child.id());
        drop(lock);
        Ok(0)
    }

    /// Serves activations one at a time, holding the lock file while each
    /// one runs.
    fn run_child(&mut self) -> Result<i32> {
        let lock_file = self.lock_file()?;
        let session = Session::from_options(&self.options, Arc::new(RunContext::new()))?;
        let records = take_over(&session, &mut io::stdin().lock())?;
        debug!("took over {records} ambient records");
        let endpoint = Endpoint::bind(&socket_path(&lock_file))?;
        let supervisor = daemon_supervisor(&endpoint, &session)?;
        notify_ready()?;

        self.state.apply(PersistEvent::Forked { child: true })?;
        loop {
            let stream = endpoint.accept()?;
            self.state.apply(PersistEvent::Activated)?;
            let result = {
                let _busy = supervisor.busy();
                let _lock = FileLock::exclusive(&lock_file)?;
                serve(&session, stream)
            };
            log_activation(0, self.state.generation(), &result);
            if end_stream(&mut self.state, &result, false)? == PersistState::Exited {
                return result.map(|_| 0);
            }
            self.state.apply(PersistEvent::Rearm)?;
        }
    }

    /// Forwards to the parallel daemon, starting it first if needed.
    fn run_parallel_client(&mut self) -> Result<i32> {
        let socket = socket_path(&self.lock_file()?);
        if let Some(stream) = connect(&socket)? {
            return client(stream);
        }
        spawn_daemon(PersistRole::Parallel, &[])?;
        self.state.apply(PersistEvent::Forked { child: false })?;
        match connect(&socket)? {
            Some(stream) => client(stream),
            None => Err(RtError::System(format!(
                "no persistent process listening on {}",
                socket.display()
            ))),
        }
    }

    /// Holds the lock file for its lifetime and serves activations with one
    /// sibling pipeline per CPU.
    fn run_parallel_daemon(&mut self) -> Result<i32> {
        let lock_file = self.lock_file()?;
        let Some(_lock) = FileLock::try_exclusive(&lock_file)? else {
            // Another daemon won the race and serves the socket.
            notify_ready()?;
            return Ok(0);
        };

        let session = Session::from_options(&self.options, Arc::new(RunContext::new()))?;
        let endpoint = Endpoint::bind(&socket_path(&lock_file))?;
        let supervisor = daemon_supervisor(&endpoint, &session)?;
        let activity = supervisor.activity();

        let (tx, rx) = unbounded::<Result<()>>();
        for id in 1..=num_cpus::get() {
            let sibling = session.sibling();
            let listener = endpoint.listener()?;
            let activity = activity.clone();
            let lock_file = lock_file.clone();
            let tx = tx.clone();
            thread::Builder::new()
                .name(format!("rtrace-sibling-{id}"))
                .spawn(move || {
                    let _ = tx.send(run_sibling(id, &sibling, &listener, &activity, lock_file));
                })
                .map_err(|e| RtError::system("cannot start sibling", e))?;
        }
        drop(tx);
        notify_ready()?;

        let first = rx
            .recv()
            .map_err(|_| RtError::Consistency("siblings exited without a result".to_string()))?;
        // Let siblings still draining finish their streams.
        while activity.count() > 0 {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Err(e)) => debug!("sibling: {e}"),
                Ok(Ok(())) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        first.map(|_| 0)
    }
}

/// One independent pipeline of the parallel daemon.
fn run_sibling(
    id: usize,
    session: &Session,
    listener: &UnixListener,
    activity: &Activity,
    lock_file: PathBuf,
) -> Result<()> {
    let mut state = PersistenceState::new(PersistMode::Parallel, Some(lock_file))?;
    state.apply(PersistEvent::Forked { child: true })?;
    loop {
        let stream = accept(listener)?;
        state.apply(PersistEvent::Activated)?;
        let result = {
            let _busy = activity.enter();
            serve(session, stream)
        };
        log_activation(id, state.generation(), &result);
        if end_stream(&mut state, &result, false)? == PersistState::Exited {
            return result.map(drop);
        }
        state.apply(PersistEvent::Rearm)?;
    }
}

/// Moves `state` past the end of a stream. Interrupted streams drain; other
/// failures drain only when `fatal` is set, otherwise they were reported to
/// the client and the process carries on.
///
/// * `state`  - Persistence state in `Running`.
/// * `result` - Outcome of the stream.
/// * `fatal`  - Whether a failed stream ends the process.
fn end_stream<T>(state: &mut PersistenceState, result: &Result<T>, fatal: bool) -> Result<PersistState> {
    match result {
        Err(RtError::Interrupted { signo, .. }) => {
            state.apply(PersistEvent::Signal(*signo))?;
        }
        Err(_) if fatal => {
            state.apply(PersistEvent::Fatal)?;
        }
        _ => {}
    }
    state.apply(PersistEvent::StreamDone)
}

fn log_activation(sibling: usize, generation: u64, result: &Result<RunStats>) {
    match result {
        Ok(stats) => info!(
            "activation {generation} (sibling {sibling}): {} rays, {} results",
            stats.rays_read, stats.results_emitted
        ),
        Err(e) => warn!("activation {generation} (sibling {sibling}): {e}"),
    }
}

/// Supervisor for a daemon; a signal while idle removes the socket.
fn daemon_supervisor(endpoint: &Endpoint, session: &Session) -> Result<SignalSupervisor> {
    let socket = endpoint.path().to_path_buf();
    SignalSupervisor::start(
        &DAEMON_SIGNALS,
        session.context().interrupt_flag(),
        DRAIN_GRACE,
        Box::new(move |_| {
            if let Err(e) = fs::remove_file(&socket) {
                debug!("remove {}: {e}", socket.display());
            }
        }),
    )
}

/// Forwards standard input to a daemon and its reply to standard output.
fn client(stream: UnixStream) -> Result<i32> {
    debug!("forwarding to persistent process");
    let mut out = io::stdout().lock();
    let (code, message) = run_client(stream, io::stdin(), &mut out)?;
    if !message.is_empty() {
        error!("{message}");
    }
    Ok(code)
}

fn stdin_stream() -> BufReader<io::Stdin> {
    BufReader::new(io::stdin())
}

fn stdout_stream() -> OutputStream {
    Box::new(BufWriter::new(io::stdout()))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
