//! Child process supervision shared by every invocation kind.

use std::io::{self, Read};
use std::process::Child;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Poll interval while waiting for a child to exit.
pub const POLL_INTERVAL_MS: u64 = 50;

/// Windows `CREATE_NO_WINDOW` process creation flag.
pub const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

/// Extra time given to the pipe readers once the process tree is gone.
const READER_GRACE_MS: u64 = 500;

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

enum ReaderEvent {
    Chunk(Stream, Vec<u8>),
    Closed,
}

/// Wait for `child` with a timeout.
///
/// stdout/stderr are drained on background threads while the process runs;
/// a child writing more than a pipe buffer would otherwise block forever.
/// On timeout the whole process tree is killed and whatever the child wrote
/// before that is still returned.
///
/// When the child exits on its own, descendants left in its process group are
/// killed too, and the readers are only awaited until the deadline. A
/// background job holding the pipes cannot extend the wait.
pub fn wait_with_timeout(child: &mut Child, timeout_secs: u64) -> io::Result<WaitOutcome> {
    let start = Instant::now();
    let deadline = start + Duration::from_secs(timeout_secs);
    let interval = Duration::from_millis(POLL_INTERVAL_MS);

    let (tx, rx) = mpsc::channel();
    let mut readers = 0;
    if let Some(out) = child.stdout.take() {
        spawn_reader(Stream::Stdout, out, tx.clone());
        readers += 1;
    }
    if let Some(err) = child.stderr.take() {
        spawn_reader(Stream::Stderr, err, tx.clone());
        readers += 1;
    }
    drop(tx);

    let mut output = CollectedOutput::new(rx, readers);

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                kill_process_tree(child);
                output.collect_until(deadline);
                let (stdout, stderr) = output.into_strings();
                return Ok(WaitOutcome {
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                    timed_out: false,
                });
            }
            Ok(None) => {}
            Err(e) => {
                kill_process_tree(child);
                let _ = child.wait();
                return Err(e);
            }
        }

        if Instant::now() >= deadline {
            kill_process_tree(child);
            let _ = child.wait();
            output.collect_until(Instant::now());
            let (stdout, stderr) = output.into_strings();
            return Ok(WaitOutcome {
                stdout,
                stderr,
                exit_code: -1,
                timed_out: true,
            });
        }

        output.drain_ready();
        thread::sleep(interval);
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: Stream,
    mut reader: R,
    tx: mpsc::Sender<ReaderEvent>,
) {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(ReaderEvent::Chunk(stream, buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = tx.send(ReaderEvent::Closed);
    });
}

/// Output gathered from the reader threads. Readers still blocked when the
/// wait ends are abandoned; their pipes close when the holders die.
struct CollectedOutput {
    rx: Receiver<ReaderEvent>,
    open: usize,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl CollectedOutput {
    fn new(rx: Receiver<ReaderEvent>, open: usize) -> Self {
        Self {
            rx,
            open,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    fn record(&mut self, event: ReaderEvent) {
        match event {
            ReaderEvent::Chunk(Stream::Stdout, bytes) => self.stdout.extend_from_slice(&bytes),
            ReaderEvent::Chunk(Stream::Stderr, bytes) => self.stderr.extend_from_slice(&bytes),
            ReaderEvent::Closed => self.open = self.open.saturating_sub(1),
        }
    }

    fn drain_ready(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.record(event);
        }
    }

    /// Receive until every reader has closed or `deadline` (plus a short
    /// grace) has passed.
    fn collect_until(&mut self, deadline: Instant) {
        let limit = deadline.max(Instant::now()) + Duration::from_millis(READER_GRACE_MS);
        while self.open > 0 {
            let remaining = limit.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(event) => self.record(event),
                Err(RecvTimeoutError::Timeout) => {
                    tracing::debug!(open_readers = self.open, "Output readers still open at deadline");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.drain_ready();
    }

    fn into_strings(self) -> (String, String) {
        (
            String::from_utf8_lossy(&self.stdout).into_owned(),
            String::from_utf8_lossy(&self.stderr).into_owned(),
        )
    }
}

/// Children are spawned as process-group leaders (see `runner`), so the
/// group id equals the child pid. The group outlives a reaped leader while
/// any member is alive.
#[cfg(unix)]
fn kill_process_tree(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        tracing::debug!(pid = child.id(), error = %e, "killpg failed, killing child only");
    }
    let _ = child.kill();
}

#[cfg(windows)]
fn kill_process_tree(child: &mut Child) {
    use std::os::windows::process::CommandExt;

    let _ = std::process::Command::new("taskkill")
        .args(["/T", "/F", "/PID", &child.id().to_string()])
        .creation_flags(CREATE_NO_WINDOW)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
    let _ = child.kill();
}

#[cfg(not(any(unix, windows)))]
fn kill_process_tree(child: &mut Child) {
    let _ = child.kill();
}
