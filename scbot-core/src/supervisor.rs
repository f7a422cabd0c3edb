//! Process supervision.
//!
//! Two classes of invocation: [`run_with_timeout`] for interpreters that may
//! hang or exit 0 without doing anything (success is judged by the caller from
//! the produced artifact), and [`run_to_completion`] for encoders whose exit
//! code is authoritative.

use crate::error::{ProcessError, SetupError};
use std::ffi::OsStr;
use std::process::{Command, ExitStatus, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const STDERR_TAIL_LINES: usize = 20;

/// What a timeout-bounded run observed. Informational only.
#[derive(Debug, Clone, Copy)]
pub struct Supervised {
    /// `None` when exit could not be confirmed before the deadline.
    pub status: Option<ExitStatus>,
    pub elapsed: Duration,
}

impl Supervised {
    pub fn timed_out(&self) -> bool {
        self.status.is_none()
    }
}

/// Spawn `program` with all standard streams detached and wait up to `timeout`.
///
/// The child is killed afterwards whether or not it exited, so a process that
/// sits on a prompt after finishing its work never outlives the call. A missed
/// deadline is logged, not returned as an error.
pub fn run_with_timeout<I, S>(program: &str, args: I, timeout: Duration) -> std::io::Result<Supervised>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let started = Instant::now();
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    debug!(program, pid = child.id(), "spawned supervised process");

    let deadline = started + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) if Instant::now() >= deadline => {
                warn!(
                    program,
                    timeout_ms = timeout.as_millis() as u64,
                    "could not confirm exit in time"
                );
                break None;
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                warn!(program, error = %e, "could not poll child status");
                break None;
            }
        }
    };

    if let Err(e) = child.kill() {
        debug!(program, error = %e, "kill after wait");
    }
    let _ = child.wait();

    let elapsed = started.elapsed();
    debug!(program, ?status, elapsed_ms = elapsed.as_millis() as u64, "supervised process finished");
    Ok(Supervised { status, elapsed })
}

/// Run `program` until it exits on its own. No timeout; non-zero exit is a failure.
pub fn run_to_completion<I, S>(program: &str, args: I) -> Result<Output, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(ProcessError::Exit {
            program: program.to_string(),
            status: output.status,
            stderr: stderr_tail(&output.stderr),
        });
    }
    Ok(output)
}

/// Basic health invocation (`sclang -h`, `scsynth -v`, ...).
pub fn probe(program: &str, flag: &str) -> Result<(), SetupError> {
    match run_to_completion(program, [flag]) {
        Ok(_) => {
            debug!(program, flag, "health check passed");
            Ok(())
        }
        Err(ProcessError::Spawn { program, source }) => Err(SetupError::MissingExecutable { program, source }),
        Err(e @ ProcessError::Exit { .. }) => Err(SetupError::HealthCheck {
            program: program.to_string(),
            flag: flag.to_string(),
            detail: e.to_string(),
        }),
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
