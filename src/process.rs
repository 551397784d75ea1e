//! Run a subprocess with a deadline, interrupt handling, and a drained
//! output pipe.
//!
//! This module knows nothing about Swift; it only manages child processes.
//! On Unix the child runs in its own process group so that grandchildren
//! (test binaries spawned by the build tool) are signalled together with it.
//!
//! The child's merged stdout/stderr goes to a pipe that is read to the end on
//! a dedicated thread. Reading concurrently is required: a child that fills
//! the pipe buffer while nobody reads would block forever and then be
//! misreported as a timeout.

use std::io::Read;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use camino::Utf8Path;
use subprocess::{Popen, PopenConfig, Redirection};
use tracing::{debug, info, warn};

use crate::interrupt::check_interrupted;
use crate::Result;

/// How frequently to check whether the child finished.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long a terminated child gets to exit before the stronger signal.
const TERMINATE_GRACE: Duration = Duration::from_millis(200);

/// How the child ended, before any interpretation of its output.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ExitKind {
    /// Exited with status 0.
    Success,
    /// Exited nonzero or was killed by an unrelated signal.
    Failure,
    /// Forcibly terminated after the deadline.
    Timeout,
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub kind: ExitKind,
    /// Merged stdout and stderr.
    pub output: String,
    pub duration: Duration,
}

/// Run `argv` in `cwd`, killing it if it outlives `timeout`.
pub fn run_with_deadline(
    argv: &[String],
    cwd: &Utf8Path,
    timeout: Duration,
) -> Result<ProcessOutput> {
    let start = Instant::now();
    debug!(?argv, %cwd, ?timeout, "spawn");
    let mut child = Popen::create(
        argv,
        PopenConfig {
            stdin: Redirection::None,
            stdout: Redirection::Pipe,
            stderr: Redirection::Merge,
            cwd: Some(cwd.as_os_str().to_owned()),
            ..setpgid_on_unix()
        },
    )
    .with_context(|| format!("failed to spawn {}", argv.join(" ")))?;
    let mut stdout = child.stdout.take().expect("child has a piped stdout");
    let reader = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        buf
    });
    let kind = loop {
        if start.elapsed() > timeout {
            info!(
                "timeout after {:.1}s, terminating child process",
                start.elapsed().as_secs_f32()
            );
            terminate_child(&mut child)?;
            break ExitKind::Timeout;
        }
        if let Err(e) = check_interrupted() {
            debug!("interrupted, terminating child process");
            terminate_child(&mut child)?;
            let _ = reader.join();
            return Err(e);
        }
        if let Some(status) = child
            .wait_timeout(WAIT_POLL_INTERVAL)
            .context("wait for child")?
        {
            break if status.success() {
                ExitKind::Success
            } else {
                ExitKind::Failure
            };
        }
    };
    let bytes = reader.join().unwrap_or_default();
    Ok(ProcessOutput {
        kind,
        output: String::from_utf8_lossy(&bytes).into_owned(),
        duration: start.elapsed(),
    })
}

/// Terminate the child, gently and then harshly, and reap it.
fn terminate_child(child: &mut Popen) -> Result<()> {
    signal_child(child, false)?;
    thread::sleep(TERMINATE_GRACE);
    if child.poll().is_none() {
        signal_child(child, true)?;
    }
    match child
        .wait_timeout(Duration::from_secs(10))
        .context("wait for child after termination")?
    {
        Some(status) => debug!(?status, "terminated child exited"),
        None => warn!("child did not exit after termination"),
    }
    Ok(())
}

#[cfg(unix)]
fn signal_child(child: &mut Popen, harsh: bool) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let signal = if harsh { Signal::SIGKILL } else { Signal::SIGTERM };
    let Some(pid) = child.pid() else {
        // Already reaped; nothing left to signal.
        return Ok(());
    };
    let raw_pid =
        i32::try_from(pid).with_context(|| format!("pid {pid} out of range for a signal"))?;
    if let Err(errno) = killpg(Pid::from_raw(raw_pid), signal) {
        // ESRCH means we raced with a normal exit.
        if errno != Errno::ESRCH {
            let message = format!("failed to send {signal} to child process group: {errno}");
            warn!("{}", message);
            return Err(anyhow!(message));
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn signal_child(child: &mut Popen, harsh: bool) -> Result<()> {
    let result = if harsh { child.kill() } else { child.terminate() };
    if let Err(e) = result {
        // most likely we raced and it's already gone
        let message = format!("failed to terminate child: {e}");
        warn!("{}", message);
        return Err(anyhow!(message));
    }
    Ok(())
}

#[cfg(unix)]
fn setpgid_on_unix() -> PopenConfig {
    PopenConfig {
        setpgid: true,
        ..Default::default()
    }
}

#[cfg(not(unix))]
fn setpgid_on_unix() -> PopenConfig {
    Default::default()
}
