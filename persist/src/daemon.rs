//! Socket endpoint, process spawning and activation serving.

use super::framing::*;
use ambient::{decode_records, encode_records};
use rtcore::app::{PersistRole, PERSIST_ROLE_ARG};
use rtcore::context::RunStats;
use rtcore::error::{Result, RtError};
use rtcore::fileutil::sidecar_path;
use rtrace::Session;
use std::env;
use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;

/// Line a spawned daemon prints on its standard output once it accepts
/// activations.
pub const READY: &str = "ready";

/// Returns the socket path that belongs to a lock file.
///
/// * `lock_file` - The persist lock file.
pub fn socket_path(lock_file: &Path) -> PathBuf {
    sidecar_path(lock_file, ".sock")
}

/// A listening socket. The socket file is removed on drop.
#[derive(Debug)]
pub struct Endpoint {
    listener: UnixListener,
    path: PathBuf,
}

impl Endpoint {
    /// Binds the socket. A socket file nobody listens on is replaced.
    ///
    /// * `path` - Socket path.
    pub fn bind(path: &Path) -> Result<Self> {
        if path.exists() {
            if UnixStream::connect(path).is_ok() {
                return Err(RtError::System(format!("{} is already being served", path.display())));
            }
            fs::remove_file(path)
                .map_err(|e| RtError::system(&format!("cannot remove stale socket {}", path.display()), e))?;
        }
        let listener = UnixListener::bind(path)
            .map_err(|e| RtError::system(&format!("cannot bind {}", path.display()), e))?;
        debug!("listening on {}", path.display());
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Returns the socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until a client connects.
    pub fn accept(&self) -> Result<UnixStream> {
        accept(&self.listener)
    }

    /// Returns another handle to the listening socket for a sibling.
    pub fn listener(&self) -> Result<UnixListener> {
        self.listener
            .try_clone()
            .map_err(|e| RtError::system("cannot share listening socket", e))
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("remove {}: {e}", self.path.display());
        }
    }
}

/// Blocks until a client connects to `listener`.
///
/// * `listener` - The listening socket.
pub fn accept(listener: &UnixListener) -> Result<UnixStream> {
    let (stream, _) = listener
        .accept()
        .map_err(|e| RtError::system("cannot accept activation", e))?;
    Ok(stream)
}

/// Connects to a running daemon. Returns `None` when nobody is listening.
///
/// * `path` - Socket path.
pub fn connect(path: &Path) -> Result<Option<UnixStream>> {
    match UnixStream::connect(path) {
        Ok(stream) => Ok(Some(stream)),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused) => Ok(None),
        Err(e) => Err(RtError::system(&format!("cannot connect to {}", path.display()), e)),
    }
}

/// Returns the hidden argument that starts the program in `role`.
///
/// * `role` - Role of the new process.
pub fn role_arg(role: PersistRole) -> String {
    let name = match role {
        PersistRole::Child => "child",
        PersistRole::Parallel => "parallel",
    };
    format!("{PERSIST_ROLE_ARG}={name}")
}

/// Starts the current executable again with the same arguments in `role`,
/// writes `handoff` to its standard input and waits until it reports that
/// it is ready.
///
/// * `role`    - Role of the new process.
/// * `handoff` - Ambient records for the new process; see `hand_over()`.
pub fn spawn_daemon(role: PersistRole, handoff: &[u8]) -> Result<Child> {
    let fail = |e: io::Error| RtError::system("cannot fork child for persist function", e);

    let exe = env::current_exe().map_err(fail)?;
    let mut child = Command::new(exe)
        .arg(role_arg(role))
        .args(env::args_os().skip(1))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(fail)?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| RtError::Consistency("spawned child has no hand-over pipe".to_string()))?;
    stdin.write_all(handoff).map_err(fail)?;
    drop(stdin);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RtError::Consistency("spawned child has no readiness pipe".to_string()))?;
    let mut line = String::new();
    BufReader::new(stdout).read_line(&mut line).map_err(fail)?;
    if line.trim_end() != READY {
        let status = match child.try_wait() {
            Ok(Some(status)) => status.to_string(),
            _ => "no readiness report".to_string(),
        };
        return Err(RtError::System(format!("cannot fork child for persist function: {status}")));
    }
    info!("persistent process {} ready", child.id());
    Ok(child)
}

/// Writes the in-memory ambient records of `session` for a process taking
/// over from it. Nothing is written for an empty cache. Returns the number
/// of records written.
///
/// * `session` - The session handing over.
/// * `w`       - Destination.
pub fn hand_over<W: Write>(session: &Session, w: &mut W) -> Result<usize> {
    let records = session.ambient().records();
    if !records.is_empty() {
        w.write_all(&encode_records(records.iter().map(|(k, r)| (k, r))))?;
        w.flush()?;
    }
    Ok(records.len())
}

/// Joins ambient records written by `hand_over()` into the cache of
/// `session`. Empty input carries no records. Returns the number read.
///
/// * `session` - The session taking over.
/// * `r`       - Source, read to its end.
pub fn take_over<R: Read>(session: &Session, r: &mut R) -> Result<usize> {
    let mut bytes = Vec::new();
    r.read_to_end(&mut bytes)?;
    if bytes.is_empty() {
        return Ok(0);
    }
    let records = decode_records(&bytes)?;
    let n = records.len();
    session.ambient().merge(records);
    Ok(n)
}

/// Tells the spawning process that activations are being accepted.
pub fn notify_ready() -> Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "{READY}")?;
    out.flush()?;
    Ok(())
}

/// Serves one activation: runs the framed ray stream arriving on `stream`
/// through `session` and replies with the framed results followed by the
/// exit status. A client that went away is only logged; the outcome of the
/// run is returned.
///
/// * `session` - The loaded session.
/// * `stream`  - Connection to the client.
pub fn serve(session: &Session, stream: UnixStream) -> Result<RunStats> {
    let input = FrameReader::new(BufReader::new(stream.try_clone()?));
    let output = BufWriter::new(FrameWriter::new(stream.try_clone()?));
    let result = session.run(input, Box::new(output));

    let (code, message) = match &result {
        Ok(_) => (0, String::new()),
        Err(e) => (e.exit_code(), e.to_string()),
    };
    let mut stream = stream;
    if let Err(e) = write_status(&mut stream, code, &message) {
        warn!("cannot report status to client: {e}");
    }
    result
}

/// Forwards `input` to a daemon and copies its results to `output`. Returns
/// the daemon's exit status and error message. Input is sent a chunk at a
/// time as it arrives, and each reply frame is flushed to `output` as soon
/// as it is received.
///
/// * `stream` - Connection to the daemon.
/// * `input`  - Ray stream.
/// * `output` - Result stream.
pub fn run_client<R, W>(stream: UnixStream, input: R, output: &mut W) -> Result<(i32, String)>
where
    R: Read + Send + 'static,
    W: Write,
{
    let tx = FrameWriter::new(stream.try_clone()?);
    let feeder = thread::Builder::new()
        .name("rtrace-client".to_string())
        .spawn(move || forward(input, tx))
        .map_err(|e| RtError::system("cannot start input thread", e))?;

    let mut rx = FrameReader::new(BufReader::new(stream));
    loop {
        let chunk = rx.fill_buf()?;
        if chunk.is_empty() {
            break;
        }
        output.write_all(chunk)?;
        let n = chunk.len();
        rx.consume(n);
        output.flush()?;
    }
    let status = read_status(&mut rx.into_inner())?;

    // The daemon may stop reading early; a feeder still blocked on input is
    // left behind.
    if feeder.is_finished() {
        match feeder.join() {
            Ok(Err(e)) => debug!("input stream: {e}"),
            Err(_) => warn!("input thread panicked"),
            Ok(Ok(())) => {}
        }
    }
    Ok(status)
}

/// Copies `input` into frames, one per read, flushing each.
fn forward<R: Read, W: Write>(mut input: R, mut tx: FrameWriter<W>) -> io::Result<()> {
    let mut buf = [0; 8192];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        tx.write_all(&buf[..n])?;
        tx.flush()?;
    }
    tx.finish().map(drop)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    #[derive(Clone, Default)]
    struct SharedOut(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedOut {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn socket_next_to_lock_file() {
        assert_eq!(socket_path(Path::new("/tmp/rt.pf")), PathBuf::from("/tmp/rt.pf.sock"));
        assert_eq!(role_arg(PersistRole::Child), "--persist-role=child");
        assert_eq!(role_arg(PersistRole::Parallel), "--persist-role=parallel");
    }

    #[test]
    fn endpoint_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt.pf.sock");
        assert!(connect(&path).unwrap().is_none());

        let endpoint = Endpoint::bind(&path).unwrap();
        assert!(Endpoint::bind(&path).is_err());
        let client = connect(&path).unwrap();
        assert!(client.is_some());
        endpoint.accept().unwrap();

        drop(endpoint);
        assert!(!path.exists());
    }

    #[test]
    fn stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt.pf.sock");
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());
        assert!(connect(&path).unwrap().is_none());

        let endpoint = Endpoint::bind(&path).unwrap();
        assert!(connect(&path).unwrap().is_some());
        drop(endpoint);
    }

    #[test]
    fn client_copies_reply_and_status() {
        let (client_end, mut daemon_end) = UnixStream::pair().unwrap();
        let daemon = thread::spawn(move || {
            let mut rays = String::new();
            FrameReader::new(BufReader::new(daemon_end.try_clone().unwrap()))
                .read_to_string(&mut rays)
                .unwrap();
            let mut w = FrameWriter::new(daemon_end.try_clone().unwrap());
            w.write_all(rays.to_uppercase().as_bytes()).unwrap();
            w.finish().unwrap();
            write_status(&mut daemon_end, 2, "system - disk full").unwrap();
        });

        let mut out = Vec::new();
        let status = run_client(client_end, io::Cursor::new(b"abc\n".to_vec()), &mut out).unwrap();
        daemon.join().unwrap();
        assert_eq!(out, b"ABC\n");
        assert_eq!(status, (2, "system - disk full".to_string()));
    }

    #[test]
    fn client_forwards_input_while_it_is_open() {
        let (client_end, daemon_end) = UnixStream::pair().unwrap();
        let daemon = thread::spawn(move || {
            let mut daemon_end = daemon_end;
            let mut rx = FrameReader::new(BufReader::new(daemon_end.try_clone().unwrap()));
            let mut line = String::new();
            rx.read_line(&mut line).unwrap();
            let mut w = FrameWriter::new(daemon_end.try_clone().unwrap());
            w.write_all(line.to_uppercase().as_bytes()).unwrap();
            w.flush().unwrap();
            io::copy(&mut rx, &mut io::sink()).unwrap();
            w.finish().unwrap();
            write_status(&mut daemon_end, 0, "").unwrap();
        });

        let (input, mut feed) = io::pipe().unwrap();
        feed.write_all(b"abc\n").unwrap();
        let out = SharedOut::default();
        let client = {
            let mut out = out.clone();
            thread::spawn(move || run_client(client_end, input, &mut out))
        };

        let start = Instant::now();
        while out.0.lock().unwrap().as_slice() != b"ABC\n" {
            assert!(start.elapsed() < Duration::from_secs(5), "no reply while input is open");
            thread::sleep(Duration::from_millis(10));
        }

        drop(feed);
        assert_eq!(client.join().unwrap().unwrap(), (0, String::new()));
        daemon.join().unwrap();
    }
}
