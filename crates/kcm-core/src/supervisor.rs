//! Spawning, signalling, and probing supervised processes.
//!
//! Supervised services are opaque children identified only by their OS pid.
//! They are detached from the invoking terminal so they outlive the tool.

use std::ffi::OsString;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, info};

const SUPERVISOR_TARGET: &str = "kcm::supervisor";

/// Command line and environment for a detached service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments passed verbatim.
    pub args: Vec<OsString>,
    /// Working directory of the child.
    pub working_dir: PathBuf,
    /// Complete environment of the child; nothing is inherited.
    pub env: Vec<(OsString, OsString)>,
}

/// Operations the lifecycle manager needs from the operating system.
pub trait ProcessSupervisor {
    /// Starts `spec` detached from the caller and returns its pid.
    fn spawn_detached(&self, spec: &LaunchSpec) -> Result<u32, SupervisorError>;

    /// Sends a graceful termination request without waiting for exit.
    fn terminate(&self, pid: u32) -> Result<(), SupervisorError>;

    /// Reports whether `pid` names a live process owned by this user.
    ///
    /// A live process owned by someone else is an
    /// [`SupervisorError::OwnershipViolation`].
    fn is_alive(&self, pid: u32) -> Result<bool, SupervisorError>;
}

impl<T: ProcessSupervisor + ?Sized> ProcessSupervisor for &T {
    fn spawn_detached(&self, spec: &LaunchSpec) -> Result<u32, SupervisorError> {
        (**self).spawn_detached(spec)
    }

    fn terminate(&self, pid: u32) -> Result<(), SupervisorError> {
        (**self).terminate(pid)
    }

    fn is_alive(&self, pid: u32) -> Result<bool, SupervisorError> {
        (**self).is_alive(pid)
    }
}

/// Supervisor backed by real processes and signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSupervisor;

impl ProcessSupervisor for SystemSupervisor {
    fn spawn_detached(&self, spec: &LaunchSpec) -> Result<u32, SupervisorError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .env_clear()
            .envs(spec.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);
        let child = command.spawn().map_err(|source| SupervisorError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let pid = child.id();
        info!(
            target: SUPERVISOR_TARGET,
            pid,
            program = %spec.program.display(),
            "spawned detached process"
        );
        Ok(pid)
    }

    fn terminate(&self, pid: u32) -> Result<(), SupervisorError> {
        let target = to_pid(pid)?;
        kill(target, Signal::SIGTERM).map_err(|source| SupervisorError::Signal { pid, source })?;
        debug!(target: SUPERVISOR_TARGET, pid, "sent SIGTERM");
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> Result<bool, SupervisorError> {
        let target = to_pid(pid)?;
        reap(target);
        match kill(target, None) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(Errno::EPERM) => Err(SupervisorError::OwnershipViolation { pid }),
            Err(source) => Err(SupervisorError::Probe { pid, source }),
        }
    }
}

/// Collects the exit status of our own exited children so they stop
/// answering existence probes. Unrelated pids yield `ECHILD`, which is fine.
fn reap(pid: Pid) {
    if let Ok(status) = waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        debug!(target: SUPERVISOR_TARGET, ?status, "reaped child");
    }
}

fn to_pid(pid: u32) -> Result<Pid, SupervisorError> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(Pid::from_raw(raw)),
        _ => Err(SupervisorError::InvalidPid { pid }),
    }
}

/// Errors raised while supervising processes.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The child could not be started.
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        /// Executable that failed to start.
        program: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The termination signal could not be delivered.
    #[error("failed to signal process {pid}: {source}")]
    Signal {
        /// Target process.
        pid: u32,
        /// Errno reported by `kill(2)`.
        #[source]
        source: Errno,
    },
    /// Probing the process failed for an unexpected reason.
    #[error("failed to probe process {pid}: {source}")]
    Probe {
        /// Probed process.
        pid: u32,
        /// Errno reported by `kill(2)`.
        #[source]
        source: Errno,
    },
    /// A tracked pid belongs to another user.
    #[error("process {pid} is owned by another user; refusing to continue")]
    OwnershipViolation {
        /// Offending pid.
        pid: u32,
    },
    /// The pid cannot address a single process.
    #[error("invalid process id {pid}")]
    InvalidPid {
        /// Rejected pid.
        pid: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::thread;
    use std::time::{Duration, Instant};

    fn sleep_spec(seconds: &str) -> Option<LaunchSpec> {
        let program = ["/bin/sleep", "/usr/bin/sleep"]
            .into_iter()
            .map(Path::new)
            .find(|path| path.exists())?;
        Some(LaunchSpec {
            program: program.to_path_buf(),
            args: vec![OsString::from(seconds)],
            working_dir: std::env::temp_dir(),
            env: vec![(OsString::from("PATH"), OsString::from("/usr/bin:/bin"))],
        })
    }

    fn wait_until_dead(supervisor: &SystemSupervisor, pid: u32) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if !supervisor.is_alive(pid).expect("probe") {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn spawned_process_is_alive_until_terminated() {
        let Some(spec) = sleep_spec("30") else {
            return;
        };
        let supervisor = SystemSupervisor;
        let pid = supervisor.spawn_detached(&spec).expect("spawn sleep");
        assert!(supervisor.is_alive(pid).expect("probe"));
        supervisor.terminate(pid).expect("terminate");
        assert!(wait_until_dead(&supervisor, pid), "sleep should exit on SIGTERM");
    }

    #[test]
    fn exited_child_is_reported_dead() {
        let Some(spec) = sleep_spec("0") else {
            return;
        };
        let supervisor = SystemSupervisor;
        let pid = supervisor.spawn_detached(&spec).expect("spawn sleep");
        assert!(wait_until_dead(&supervisor, pid));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let spec = LaunchSpec {
            program: PathBuf::from("/nonexistent/kcm-test-binary"),
            args: Vec::new(),
            working_dir: std::env::temp_dir(),
            env: Vec::new(),
        };
        let error = SystemSupervisor
            .spawn_detached(&spec)
            .expect_err("spawn must fail");
        assert!(matches!(error, SupervisorError::Spawn { .. }));
    }

    #[test]
    fn zero_pid_is_never_probed() {
        assert!(matches!(
            SystemSupervisor.is_alive(0),
            Err(SupervisorError::InvalidPid { pid: 0 })
        ));
    }
}
