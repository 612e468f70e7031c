//! Blocking subprocess execution with a deadline.
//!
//! Output is redirected to anonymous temp files rather than pipes so a chatty child can never
//! block on a full pipe while we poll for its exit.

use std::io::{self, Read, Seek, SeekFrom};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

#[derive(Debug)]
pub(crate) enum Completion {
    Exited(ProcessOutput),
    /// The deadline passed; the child was killed and reaped.
    TimedOut,
}

impl Completion {
    /// Output of a zero-exit run, `None` on failure or timeout.
    pub fn success(self) -> Option<ProcessOutput> {
        match self {
            Self::Exited(output) if output.status.success() => Some(output),
            _ => None,
        }
    }
}

/// Spawn `command` and wait for it at most `timeout`.
///
/// Spawn failures (including a missing executable, `io::ErrorKind::NotFound`) are returned as
/// errors; a non-zero exit is an `Exited` completion for the caller to inspect.
pub(crate) fn run_with_timeout(command: &mut Command, timeout: Duration) -> io::Result<Completion> {
    let mut stdout = tempfile::tempfile()?;
    let mut stderr = tempfile::tempfile()?;
    let mut child = command
        .stdin(Stdio::null())
        .stdout(stdout.try_clone()?)
        .stderr(stderr.try_clone()?)
        .spawn()?;

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            // The child may exit between try_wait and kill.
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!(
                target = "memvid::process",
                program = ?command.get_program(),
                timeout_secs = timeout.as_secs_f64(),
                "subprocess timed out"
            );
            return Ok(Completion::TimedOut);
        }
        thread::sleep(POLL_INTERVAL);
    };

    let mut out = Vec::new();
    stdout.seek(SeekFrom::Start(0))?;
    stdout.read_to_end(&mut out)?;
    let mut err = Vec::new();
    stderr.seek(SeekFrom::Start(0))?;
    stderr.read_to_end(&mut err)?;

    Ok(Completion::Exited(ProcessOutput {
        status,
        stdout: out,
        stderr: String::from_utf8_lossy(&err).into_owned(),
    }))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf hello; printf oops >&2; exit 3"]);
        let Completion::Exited(output) =
            run_with_timeout(&mut cmd, Duration::from_secs(10)).expect("spawn")
        else {
            panic!("unexpected timeout");
        };
        assert_eq!(output.stdout, b"hello");
        assert_eq!(output.stderr, "oops");
        assert_eq!(output.status.code(), Some(3));
    }

    #[test]
    fn kills_on_deadline() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let started = Instant::now();
        let completion = run_with_timeout(&mut cmd, Duration::from_millis(100)).expect("spawn");
        assert!(matches!(completion, Completion::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_not_found() {
        let mut cmd = Command::new("memvid-definitely-not-a-program");
        let err = run_with_timeout(&mut cmd, Duration::from_secs(1)).expect_err("missing");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
