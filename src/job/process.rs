#![forbid(unsafe_code)]

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use crate::error::CclError;

/// Set by the agent inside its own sessions; a worker that inherits it
/// believes it is nested and changes behaviour.
pub const NESTED_SESSION_VAR: &str = "CLAUDECODE";

pub const STATE_DIR_VAR: &str = "CCL_STATE_DIR";
pub const CONFIG_VAR: &str = "CCL_CONFIG";

/// A long-lived child to start without a controlling terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedSpawn {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Complete environment for the child; nothing else is inherited.
    pub env: Vec<(OsString, OsString)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Gone,
    /// The probe itself failed; callers treat this like `Alive`.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    NoSuchProcess,
}

/// The OS process operations the job lifecycle depends on.
pub trait ProcessControl: Send + Sync {
    /// Starts `spec` detached and returns its pid.
    fn spawn_detached(&self, spec: &DetachedSpawn) -> Result<u32, CclError>;

    /// Sends SIGTERM to `pid`.
    fn terminate(&self, pid: u32) -> Result<Delivery, CclError>;

    /// Non-blocking existence check for `pid`.
    fn probe(&self, pid: u32) -> Liveness;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcess;

impl ProcessControl for SystemProcess {
    fn spawn_detached(&self, spec: &DetachedSpawn) -> Result<u32, CclError> {
        let mut cmd = std::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .env_clear()
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|source| CclError::Spawn {
            program: spec.program.display().to_string(),
            source,
        })?;
        let pid = child.id();

        // Reap the child when it exits so a long-lived launcher (the dashboard)
        // does not accumulate zombies. The thread dies with the launcher.
        std::thread::spawn(move || {
            let _ = child.wait();
        });

        tracing::debug!(pid, program = %spec.program.display(), "spawned detached process");
        Ok(pid)
    }

    fn terminate(&self, pid: u32) -> Result<Delivery, CclError> {
        let Some(target) = to_pid(pid) else {
            return Ok(Delivery::NoSuchProcess);
        };
        match kill(target, Signal::SIGTERM) {
            Ok(()) => Ok(Delivery::Delivered),
            Err(Errno::ESRCH) => Ok(Delivery::NoSuchProcess),
            Err(e) => Err(CclError::Other(format!(
                "failed to signal process {pid}: {e}"
            ))),
        }
    }

    fn probe(&self, pid: u32) -> Liveness {
        let Some(target) = to_pid(pid) else {
            return Liveness::Gone;
        };
        match kill(target, None) {
            Ok(()) | Err(Errno::EPERM) => Liveness::Alive,
            Err(Errno::ESRCH) => Liveness::Gone,
            Err(e) => {
                tracing::debug!(pid, error = %e, "process probe failed");
                Liveness::Unknown
            }
        }
    }
}

/// Pids `0` and anything outside `i32` would address process groups or be
/// invalid, so they never map to a signal target.
fn to_pid(pid: u32) -> Option<Pid> {
    let raw = i32::try_from(pid).ok()?;
    (raw > 0).then(|| Pid::from_raw(raw))
}

/// Environment for a detached supervisor: the launcher's environment minus
/// the nested-session marker, plus the two locations the supervisor needs.
pub fn supervisor_env(
    inherited: impl IntoIterator<Item = (OsString, OsString)>,
    state_dir: &std::path::Path,
    config_file: &std::path::Path,
) -> Vec<(OsString, OsString)> {
    let mut env: Vec<(OsString, OsString)> = inherited
        .into_iter()
        .filter(|(k, _)| {
            k != NESTED_SESSION_VAR && k != STATE_DIR_VAR && k != CONFIG_VAR
        })
        .collect();
    env.push((STATE_DIR_VAR.into(), state_dir.as_os_str().to_owned()));
    env.push((CONFIG_VAR.into(), config_file.as_os_str().to_owned()));
    env
}

/// Moves the calling process into a new session with no controlling terminal.
pub fn detach_session() {
    match nix::unistd::setsid() {
        Ok(sid) => tracing::debug!(sid = sid.as_raw(), "detached into new session"),
        // EPERM: already a process-group leader, nothing left to detach from.
        Err(e) => tracing::debug!(error = %e, "setsid skipped"),
    }
}
