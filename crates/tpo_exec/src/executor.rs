//! The blocking process runner.
//!
//! Each run spawns the child in its own process group (on unix), drains both
//! pipes on reader threads so a chatty toolchain can never dead-lock on a full
//! pipe, and polls for exit, timeout, or cancellation. Once the child is gone
//! the whole group is killed, whatever the reason it ended, so no grandchild
//! outlives the run or keeps the pipes open. Readers can forward each line to
//! a [`LineSink`] as it arrives.

use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tpo_common::CancelToken;
use tracing::{debug, warn};

use crate::command::CommandSpec;
use crate::error::ExecError;

/// Per-stream capture limit used when none is configured.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long the readers get to reach end-of-file after the child is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Longest partial line held back before it is streamed anyway.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Everything observed about a finished (or killed) child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, absent when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Terminating signal number (unix only).
    pub signal: Option<i32>,
    /// Captured standard output, lossily decoded as UTF-8.
    pub stdout: String,
    /// Captured standard error, lossily decoded as UTF-8.
    pub stderr: String,
    /// Whether stdout exceeded the capture limit. The head is kept.
    pub stdout_truncated: bool,
    /// Whether stderr exceeded the capture limit. The head is kept.
    pub stderr_truncated: bool,
    /// Wall-clock time from spawn to exit.
    pub duration: Duration,
}

impl ProcessOutput {
    /// True when the child exited normally with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// True when the child was terminated by a signal rather than exiting.
    pub fn killed_by_signal(&self) -> bool {
        self.exit_code.is_none()
    }
}

/// The pipe a streamed line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl OutputStream {
    /// `"stdout"` or `"stderr"`.
    pub fn as_str(self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Receives every output line, without its terminator, while the child runs.
///
/// Called from the reader threads, so lines of the two streams interleave in
/// arrival order. Streaming is independent of the capture limit: lines past
/// the limit are still delivered.
pub type LineSink = Arc<dyn Fn(OutputStream, &str) + Send + Sync>;

enum Ending {
    Exited,
    TimedOut,
    Cancelled,
}

/// Runs external commands with bounded output capture.
///
/// The executor is stateless apart from its capture limit and may be shared
/// freely between threads.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    max_output_bytes: usize,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_BYTES)
    }
}

impl ProcessExecutor {
    /// Creates an executor keeping at most `max_output_bytes` of each stream.
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    /// The per-stream capture limit.
    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    /// Runs `spec` in `working_dir`, killing it after `timeout`.
    pub fn run(
        &self,
        working_dir: &Path,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> Result<ProcessOutput, ExecError> {
        self.run_streaming(working_dir, spec, timeout, &CancelToken::new(), None)
    }

    /// Like [`run`](Self::run), but also kills the child once `cancel` fires.
    pub fn run_cancellable(
        &self,
        working_dir: &Path,
        spec: &CommandSpec,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ProcessOutput, ExecError> {
        self.run_streaming(working_dir, spec, timeout, cancel, None)
    }

    /// Like [`run_cancellable`](Self::run_cancellable), forwarding each output
    /// line to `sink` as soon as the child writes it.
    pub fn run_streaming(
        &self,
        working_dir: &Path,
        spec: &CommandSpec,
        timeout: Duration,
        cancel: &CancelToken,
        sink: Option<&LineSink>,
    ) -> Result<ProcessOutput, ExecError> {
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled {
                program: spec.program.clone(),
                partial: None,
            });
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate_process_group(&mut cmd);

        debug!(command = %spec, dir = %working_dir.display(), "spawning");
        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let cap = self.max_output_bytes;
        let stdout_reader = child
            .stdout
            .take()
            .map(|r| Reader::spawn(r, OutputStream::Stdout, cap, sink.cloned()));
        let stderr_reader = child
            .stderr
            .take()
            .map(|r| Reader::spawn(r, OutputStream::Stderr, cap, sink.cloned()));

        let (status, ending) = match wait_with_deadline(&mut child, timeout, cancel) {
            Ok(done) => done,
            Err(source) => {
                kill_process_group(&mut child);
                return Err(ExecError::Wait {
                    program: spec.program.clone(),
                    source,
                });
            }
        };
        let duration = start.elapsed();
        if let Ending::Exited = ending {
            // Background children left behind would hold the pipes open.
            kill_group(child.id());
        }

        let drain_until = Instant::now() + READER_GRACE;
        let (stdout, stdout_truncated) = Reader::finish(stdout_reader, drain_until);
        let (stderr, stderr_truncated) = Reader::finish(stderr_reader, drain_until);

        let output = ProcessOutput {
            exit_code: status.code(),
            signal: exit_signal(&status),
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            duration,
        };

        match ending {
            Ending::Exited => {
                debug!(
                    command = %spec.program,
                    exit_code = ?output.exit_code,
                    signal = ?output.signal,
                    elapsed_ms = duration.as_millis() as u64,
                    "process finished"
                );
                Ok(output)
            }
            Ending::TimedOut => {
                warn!(command = %spec.program, ?timeout, "process timed out, killed");
                Err(ExecError::Timeout {
                    program: spec.program.clone(),
                    timeout,
                    partial: Box::new(output),
                })
            }
            Ending::Cancelled => {
                debug!(command = %spec.program, "process cancelled, killed");
                Err(ExecError::Cancelled {
                    program: spec.program.clone(),
                    partial: Some(Box::new(output)),
                })
            }
        }
    }
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
    cancel: &CancelToken,
) -> io::Result<(ExitStatus, Ending)> {
    let deadline = Instant::now().checked_add(timeout);

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, Ending::Exited));
        }
        let ending = if cancel.is_cancelled() {
            Some(Ending::Cancelled)
        } else if deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Ending::TimedOut)
        } else {
            None
        };
        if let Some(ending) = ending {
            kill_process_group(child);
            let status = child.wait()?;
            return Ok((status, ending));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Bytes kept from one stream, shared between its reader thread and the
/// runner so the runner can take what arrived even if the reader never ends.
#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Capture {
    /// Appends `chunk`, keeping at most `cap` bytes from the start.
    fn push(&mut self, chunk: &[u8], cap: usize) {
        if self.truncated {
            return;
        }
        let remaining = cap.saturating_sub(self.bytes.len());
        if chunk.len() <= remaining {
            self.bytes.extend_from_slice(chunk);
        } else {
            self.bytes.extend_from_slice(&chunk[..remaining]);
            self.truncated = true;
        }
    }
}

/// Splits a byte stream into lines for a [`LineSink`].
struct LineSplitter {
    stream: OutputStream,
    sink: LineSink,
    pending: Vec<u8>,
}

impl LineSplitter {
    fn feed(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        let mut start = 0;
        while let Some(pos) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            self.emit(start, end);
            start = end + 1;
        }
        self.pending.drain(..start);
        if self.pending.len() > MAX_LINE_BYTES {
            self.emit(0, self.pending.len());
            self.pending.clear();
        }
    }

    fn finish(&mut self) {
        if !self.pending.is_empty() {
            self.emit(0, self.pending.len());
            self.pending.clear();
        }
    }

    fn emit(&self, start: usize, end: usize) {
        let line = String::from_utf8_lossy(&self.pending[start..end]);
        (self.sink)(self.stream, line.strip_suffix('\r').unwrap_or(&*line));
    }
}

/// Reads `reader` to the end into `capture`, streaming lines if asked.
///
/// Bytes past the capture limit are still read and streamed but not kept,
/// so the writer never blocks.
fn pump<R: Read>(
    mut reader: R,
    cap: usize,
    capture: &Mutex<Capture>,
    mut lines: Option<LineSplitter>,
) -> io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        capture.lock().push(&chunk[..n], cap);
        if let Some(lines) = lines.as_mut() {
            lines.feed(&chunk[..n]);
        }
    }
    if let Some(lines) = lines.as_mut() {
        lines.finish();
    }
    Ok(())
}

struct Reader {
    stream: OutputStream,
    capture: Arc<Mutex<Capture>>,
    handle: JoinHandle<io::Result<()>>,
}

impl Reader {
    fn spawn<R: Read + Send + 'static>(
        reader: R,
        stream: OutputStream,
        cap: usize,
        sink: Option<LineSink>,
    ) -> Self {
        let capture = Arc::new(Mutex::new(Capture::default()));
        let shared = Arc::clone(&capture);
        let lines = sink.map(|sink| LineSplitter {
            stream,
            sink,
            pending: Vec::new(),
        });
        let handle = std::thread::spawn(move || pump(reader, cap, &shared, lines));
        Self {
            stream,
            capture,
            handle,
        }
    }

    /// Waits until `until` for end-of-file, then returns what was captured.
    /// A reader still blocked at that point is left behind and its stream
    /// is reported truncated.
    fn finish(reader: Option<Reader>, until: Instant) -> (String, bool) {
        let Some(reader) = reader else {
            return (String::new(), false);
        };
        let stream = reader.stream.as_str();
        while !reader.handle.is_finished() && Instant::now() < until {
            std::thread::sleep(POLL_INTERVAL);
        }
        let mut abandoned = false;
        if reader.handle.is_finished() {
            match reader.handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(stream, error = %e, "failed to read child output"),
                Err(_) => warn!(stream, "output reader thread panicked"),
            }
        } else {
            warn!(stream, "output pipe still open after the process ended, giving up on it");
            abandoned = true;
        }
        let capture = reader.capture.lock();
        (
            String::from_utf8_lossy(&capture.bytes).into_owned(),
            capture.truncated || abandoned,
        )
    }
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

fn kill_process_group(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
}

/// Kills every process left in the group led by `pgid`. An empty group is
/// not an error.
#[cfg(unix)]
fn kill_group(pgid: u32) {
    let pgid = pgid as libc::pid_t;
    // SAFETY: kill(2) with a negative pid only signals the group we created.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!(pgid, error = %err, "killpg failed");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
