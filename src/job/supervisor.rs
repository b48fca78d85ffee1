#![forbid(unsafe_code)]

//! Runs one job's agent process to completion and records how it ended.
//!
//! The supervisor is meant to live in its own detached process (`ccl run <id>`)
//! so the job outlives whatever launched it.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Child;
use tokio::signal::unix::{SignalKind, signal};

use crate::config::{ClaudeConfig, Config};
use crate::error::CclError;
use crate::hooks::{HookDispatcher, HookEvent, HookVars};
use crate::job::model::{Job, JobStatus};
use crate::job::process::{Delivery, ProcessControl};
use crate::job::store::JobStore;

/// Agent argv for one job, without the program name.
#[must_use]
pub fn agent_args(claude: &ClaudeConfig, session_id: &str, prompt: String) -> Vec<String> {
    let mut args: Vec<String> = [
        "-p",
        "--output-format",
        "stream-json",
        "--verbose",
        "--session-id",
        session_id,
    ]
    .into_iter()
    .map(str::to_owned)
    .collect();
    if claude.skip_permissions {
        args.push("--dangerously-skip-permissions".to_owned());
    }
    if !claude.system_prompt.is_empty() {
        args.push("--append-system-prompt".to_owned());
        args.push(claude.system_prompt.clone());
    }
    args.extend(claude.extra_flags.iter().cloned());
    args.push(prompt);
    args
}

pub struct Supervisor {
    store: JobStore,
    claude: ClaudeConfig,
    hooks: HookDispatcher,
    procs: Arc<dyn ProcessControl>,
}

impl Supervisor {
    #[must_use]
    pub fn new(store: JobStore, cfg: &Config, procs: Arc<dyn ProcessControl>) -> Self {
        Self {
            store,
            claude: cfg.claude.clone(),
            hooks: HookDispatcher::new(&cfg.hooks),
            procs,
        }
    }

    /// Runs job `id` and returns the status it was resolved to.
    ///
    /// A failed spawn still resolves the job to `error` (with its hook) before
    /// the spawn error is returned.
    pub async fn run(&self, id: &str) -> Result<JobStatus, CclError> {
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| CclError::Other(format!("failed to install SIGTERM handler: {e}")))?;

        let mut job = self.store.read(id)?;
        job.mark_started();
        let session_id = job.ensure_session_id().to_owned();
        let args = agent_args(&self.claude, &session_id, job.prompt());

        self.store.ensure_dir()?;
        let log_path = self.store.log_path(id)?;
        let log = std::fs::File::create(&log_path).map_err(|source| CclError::Write {
            path: log_path.clone(),
            source,
        })?;
        let log_err = log.try_clone().map_err(|source| CclError::Write {
            path: log_path.clone(),
            source,
        })?;

        let mut cmd = tokio::process::Command::new(&self.claude.binary);
        cmd.args(&args)
            .current_dir(&job.directory)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                tracing::error!(
                    job_id = id,
                    binary = %self.claude.binary,
                    error = %source,
                    "failed to start agent"
                );
                self.finish(&mut job, JobStatus::Error).await;
                return Err(CclError::Spawn {
                    program: self.claude.binary.clone(),
                    source,
                });
            }
        };

        job.pid = child.id();
        match self.store.replace(&job) {
            Ok(true) => {}
            Ok(false) => {
                self.abandon(id, &mut child, &log_path).await;
                return Err(CclError::not_found(id));
            }
            Err(e) => tracing::warn!(job_id = id, error = %e, "failed to record agent pid"),
        }
        tracing::info!(job_id = id, pid = ?job.pid, "agent started");

        let exit = loop {
            tokio::select! {
                res = child.wait() => break res,
                Some(()) = sigterm.recv() => self.relay_terminate(&job),
            }
        };

        let status = match exit {
            Ok(exit) if exit.success() => JobStatus::Done,
            Ok(exit) => {
                let err = CclError::ProcessFailed { code: exit.code() };
                tracing::info!(job_id = id, "{err}");
                JobStatus::Error
            }
            Err(e) => {
                tracing::warn!(job_id = id, error = %e, "failed to wait for agent");
                JobStatus::Error
            }
        };
        self.finish(&mut job, status).await;
        Ok(status)
    }

    /// Stops an agent whose record was deleted before its pid was recorded,
    /// and removes the log that no record refers to anymore.
    async fn abandon(&self, id: &str, child: &mut Child, log_path: &Path) {
        tracing::info!(job_id = id, "job removed before the agent attached; stopping it");
        let _ = child.start_kill();
        let _ = child.wait().await;
        if let Err(e) = std::fs::remove_file(log_path)
            && e.kind() != ErrorKind::NotFound
        {
            tracing::warn!(job_id = id, error = %e, "failed to remove orphaned job log");
        }
    }

    fn relay_terminate(&self, job: &Job) {
        let Some(pid) = job.live_pid() else {
            return;
        };
        match self.procs.terminate(pid) {
            Ok(Delivery::Delivered) => {
                tracing::info!(job_id = %job.id, pid, "forwarded SIGTERM to agent");
            }
            Ok(Delivery::NoSuchProcess) => {}
            Err(e) => {
                tracing::warn!(job_id = %job.id, pid, error = %e, "failed to forward SIGTERM");
            }
        }
    }

    /// Persists the terminal status and fires its hook, unless the record was
    /// deleted meanwhile (kill and clean own the hooks of a deleted job).
    async fn finish(&self, job: &mut Job, status: JobStatus) {
        job.mark_finished(status);
        match self.store.replace(job) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(
                    job_id = %job.id,
                    %status,
                    "job removed while running; not recording exit"
                );
                return;
            }
            Err(e) => tracing::warn!(job_id = %job.id, error = %e, "failed to record job exit"),
        }
        let event = if status == JobStatus::Done {
            HookEvent::Done
        } else {
            HookEvent::Error
        };
        self.hooks
            .fire(event, &HookVars::for_job(job, status.as_str()))
            .await;
    }
}
