//! Helpers for running child processes with timeouts and bounded output.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::io::interrupt::Interrupt;

/// How often a running child is checked for interrupts.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for pipe readers once the child is gone. Background
/// grandchildren can hold the pipes open indefinitely.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Why the child stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEnd {
    Exited(i32),
    TimedOut,
    Interrupted,
}

/// Captured child process output. Each stream keeps its newest bytes.
#[derive(Debug)]
pub struct CommandOutput {
    pub end: ProcessEnd,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_dropped: usize,
    pub stderr_dropped: usize,
}

impl CommandOutput {
    /// Stdout followed by stderr.
    pub fn combined(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.stdout.len() + self.stderr.len());
        buf.extend_from_slice(&self.stdout);
        buf.extend_from_slice(&self.stderr);
        buf
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds what is kept
/// per stream; older bytes are discarded first. A raised `interrupt` stops the child early.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    interrupt: &Interrupt,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // Own process group: the whole tree can be killed, and a terminal Ctrl-C
    // reaches the runner instead of the child.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    let end = wait_with_deadline(&mut child, timeout, interrupt)?;

    let (stdout, stdout_dropped) = collect_output(&stdout_rx, "stdout");
    let (stderr, stderr_dropped) = collect_output(&stderr_rx, "stderr");
    if stdout_dropped > 0 || stderr_dropped > 0 {
        debug!(stdout_dropped, stderr_dropped, "output truncated");
    }

    debug!(end = ?end, "command finished");
    Ok(CommandOutput {
        end,
        stdout,
        stderr,
        stdout_dropped,
        stderr_dropped,
    })
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
    interrupt: &Interrupt,
) -> Result<ProcessEnd> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Some(status) = child
            .wait_timeout(remaining.min(POLL_INTERVAL))
            .context("wait for command")?
        {
            return Ok(ProcessEnd::Exited(exit_code(status)));
        }
        if interrupt.is_set() {
            warn!("command interrupted, killing");
            kill_tree(child)?;
            return Ok(ProcessEnd::Interrupted);
        }
        if Instant::now() >= deadline {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            kill_tree(child)?;
            return Ok(ProcessEnd::TimedOut);
        }
    }
}

fn kill_tree(child: &mut Child) -> Result<()> {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        if let Err(e) = Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            warn!(err = %e, "failed to kill process group");
        }
    }
    // The group kill usually got there first.
    if let Err(e) = child.kill() {
        debug!(err = %e, "kill after group kill");
    }
    child.wait().context("wait command after kill")?;
    Ok(())
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

type ReaderResult = Result<(Vec<u8>, usize)>;

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> mpsc::Receiver<ReaderResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver may have given up on us already.
        let _ = tx.send(read_stream_tail(reader, limit));
    });
    rx
}

fn collect_output(rx: &mpsc::Receiver<ReaderResult>, label: &str) -> (Vec<u8>, usize) {
    match rx.recv_timeout(READER_GRACE) {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!(stream = label, err = %e, "failed to read output");
            (Vec::new(), 0)
        }
        Err(_) => {
            warn!(stream = label, "output reader did not finish, dropping output");
            (Vec::new(), 0)
        }
    }
}

/// Read a stream to the end, keeping only the newest `limit` bytes.
fn read_stream_tail<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > limit {
            let excess = buf.len() - limit;
            buf.drain(..excess);
            dropped += excess;
        }
    }

    Ok((buf, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_then_stderr() {
        let out = run_command_with_timeout(
            sh("echo out; echo err >&2; exit 3"),
            Duration::from_secs(5),
            1000,
            &Interrupt::new(),
        )
        .expect("run");
        assert_eq!(out.end, ProcessEnd::Exited(3));
        assert_eq!(String::from_utf8_lossy(&out.combined()), "out\nerr\n");
    }

    #[test]
    fn keeps_newest_bytes_when_output_exceeds_limit() {
        let out = run_command_with_timeout(
            sh("printf 'abcdefghij'"),
            Duration::from_secs(5),
            4,
            &Interrupt::new(),
        )
        .expect("run");
        assert_eq!(out.stdout, b"ghij");
        assert_eq!(out.stdout_dropped, 6);
    }

    #[test]
    fn kills_on_timeout() {
        let started = Instant::now();
        let out = run_command_with_timeout(
            sh("sleep 5"),
            Duration::from_millis(200),
            1000,
            &Interrupt::new(),
        )
        .expect("run");
        assert_eq!(out.end, ProcessEnd::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn pending_interrupt_stops_child() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let out = run_command_with_timeout(
            sh("sleep 5"),
            Duration::from_secs(10),
            1000,
            &interrupt,
        )
        .expect("run");
        assert_eq!(out.end, ProcessEnd::Interrupted);
    }

    #[test]
    fn read_stream_tail_counts_dropped_bytes() {
        let data = vec![b'x'; 20_000];
        let (kept, dropped) = read_stream_tail(&data[..], 100).expect("read");
        assert_eq!(kept.len(), 100);
        assert_eq!(dropped, 19_900);
    }
}
