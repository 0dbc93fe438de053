use std::{
    convert::TryFrom,
    fmt, io,
    os::unix::process::CommandExt,
    process::{ChildStderr, ChildStdout, Command, Stdio},
};

use nix::{
    errno::Errno,
    sys::{
        signal::{kill, sigprocmask, SigSet, SigmaskHow, Signal},
        wait::{waitpid, WaitPidFlag, WaitStatus},
    },
    unistd::Pid,
};

use crate::error::{Error, Result};

/// The supervised command.
pub struct Child {
    pid: Pid,
}

/// Read ends of the supervised command's output pipes.
pub struct Pipes {
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// How the supervised command ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChildStatus {
    Exited(i32),
    Signaled(Signal),
}

impl ChildStatus {
    /// Exit code to report for this status, `128 + N` for a signal N.
    pub const fn code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(signal) => 128 + signal as i32,
        }
    }
}

impl fmt::Display for ChildStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with status {}", code),
            Self::Signaled(signal) => write!(f, "killed by {}", signal),
        }
    }
}

/// Starts `cmd` with stdout and stderr connected to fresh pipes.
///
/// The environment is inherited and stdin is `/dev/null`. The write ends of
/// the pipes only stay open in the child. The child starts with an empty
/// signal mask whatever the supervisor has blocked, see [`reset_sigmask`].
pub fn spawn(cmd: &[String]) -> Result<(Child, Pipes)> {
    let (program, args) = cmd
        .split_first()
        .ok_or_else(|| Error::Config("cmd must not be empty".into()))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    reset_sigmask(&mut command);
    debug!("Assembled command {:?}", command);

    let mut child = command.spawn().map_err(|source| Error::Spawn {
        cmd: cmd.join(" "),
        source,
    })?;

    let pid = i32::try_from(child.id())
        .map(Pid::from_raw)
        .map_err(|_| Error::Config(format!("pid {} out of range", child.id())))?;

    match (child.stdout.take(), child.stderr.take()) {
        (Some(stdout), Some(stderr)) => Ok((Child { pid }, Pipes { stdout, stderr })),
        _ => Err(Error::Config("child output pipes were not created".into())),
    }
}

/// Unblocks every signal in the child before it execs.
///
/// The mask of the spawning thread is inherited across exec, and the
/// supervisor blocks everything it waits for.
#[allow(unsafe_code)]
fn reset_sigmask(command: &mut Command) {
    // Only async-signal-safe calls between fork and exec: no logging here.
    unsafe {
        command.pre_exec(|| {
            sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&SigSet::all()), None)
                .map_err(io::Error::from)
        });
    }
}

impl Child {
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// Forwards `signal` to the child, logging failures.
    pub fn signal(&self, signal: Signal) {
        info!(
            "Forwarding signal {}({}) to child pid {}",
            signal, signal as i32, self.pid
        );
        if let Err(err) = kill(self.pid, signal) {
            warn!("Couldn't forward {} to child pid {}: {}", signal, self.pid, err);
        }
    }
}

/// Makes orphaned descendants re-parent to this process instead of PID 1.
#[cfg(target_os = "linux")]
pub fn become_subreaper() -> Result<()> {
    nix::sys::prctl::set_child_subreaper(true)?;
    debug!("Registered as child subreaper");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn become_subreaper() -> Result<()> {
    Err(Error::Config("subreaper is only supported on Linux".into()))
}

/// Collects every exited process without blocking.
///
/// As PID 1 the supervisor inherits orphaned descendants, so anything may be
/// reaped here. Returns the status of `child` if it was among them.
pub fn reap(child: Pid) -> Result<Option<ChildStatus>> {
    let mut found = None;

    loop {
        let (pid, status) = match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => (pid, ChildStatus::Exited(code)),
            Ok(WaitStatus::Signaled(pid, signal, _)) => (pid, ChildStatus::Signaled(signal)),
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
            Ok(other) => {
                trace!("Ignoring {:?}", other);
                continue;
            }
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(err.into()),
        };

        if pid == child {
            if let ChildStatus::Signaled(signal) = status {
                info!("Child received signal {}", signal);
            }
            info!("Child exited with status: {}", status.code());
            found = Some(status);
        } else {
            debug!("Reaped orphaned process {} ({})", pid, status);
        }
    }

    Ok(found)
}
