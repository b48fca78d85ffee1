#![forbid(unsafe_code)]

//! Job state machine: the user-facing actions and the transitions they make.
//!
//! ```text
//! create ──> pending ──approve──> working ──exit 0──────────> done
//!   │           │                   │  └──exit != 0, gone──> error
//!   └───────────┼──────────────────>┤
//!             deny                 kill        done, error ──clean──> (removed)
//!               └──> (removed) <────┘
//! ```

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{ClaudeConfig, Config};
use crate::error::CclError;
use crate::hooks::{HookDispatcher, HookEvent, HookVars};
use crate::job::liveness;
use crate::job::model::{Job, JobStatus, new_job_id, now_unix};
use crate::job::process::{DetachedSpawn, Delivery, ProcessControl, supervisor_env};
use crate::job::store::JobStore;

/// Where a detached supervisor is started from, and what it is told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTarget {
    /// The `ccl` executable that understands `run <id>`.
    pub exe: PathBuf,
    pub state_dir: PathBuf,
    pub config_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub directory: PathBuf,
    pub task: String,
    pub image: Option<PathBuf>,
    /// Wait for `approve` instead of starting right away.
    pub pending: bool,
}

/// How to hand a job's agent session back to an interactive terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePlan {
    pub directory: PathBuf,
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for ResumePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cd {} && {} {}",
            self.directory.display(),
            self.program,
            self.args.join(" ")
        )
    }
}

pub struct JobControl {
    store: JobStore,
    hooks: HookDispatcher,
    claude: ClaudeConfig,
    procs: Arc<dyn ProcessControl>,
    launch: LaunchTarget,
}

impl JobControl {
    #[must_use]
    pub fn new(
        store: JobStore,
        cfg: &Config,
        procs: Arc<dyn ProcessControl>,
        launch: LaunchTarget,
    ) -> Self {
        Self {
            store,
            hooks: HookDispatcher::new(&cfg.hooks),
            claude: cfg.claude.clone(),
            procs,
            launch,
        }
    }

    #[must_use]
    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Records a new job and, unless it is pending, launches its supervisor.
    pub async fn create(&self, req: NewJob) -> Result<Job, CclError> {
        if req.task.trim().is_empty() {
            return Err(CclError::Other("task must not be empty".to_owned()));
        }
        let status = if req.pending {
            JobStatus::Pending
        } else {
            JobStatus::Working
        };
        let mut job = Job::new(String::new(), status, req.directory, req.task);
        job.image = req.image.filter(|p| !p.as_os_str().is_empty());
        job.ensure_session_id();
        if status == JobStatus::Working {
            job.mark_started();
        }

        let created = now_unix();
        loop {
            job.id = new_job_id(created, |id| self.store.exists(id));
            if self.store.insert(&job)? {
                break;
            }
        }
        tracing::info!(job_id = %job.id, %status, "job created");

        if status == JobStatus::Pending {
            self.fire(HookEvent::Pending, &job, "pending").await;
        } else {
            self.start_supervisor(&mut job).await?;
        }
        Ok(job)
    }

    /// `pending` -> `working`, then launches the supervisor.
    pub async fn approve(&self, id: &str) -> Result<Job, CclError> {
        let mut job = self.store.read(id)?;
        require(&job, JobStatus::Pending, "approve")?;
        job.mark_started();
        if !self.store.replace(&job)? {
            return Err(CclError::not_found(id));
        }
        self.start_supervisor(&mut job).await?;
        Ok(job)
    }

    /// Removes a pending job. Returns the removed record.
    pub async fn deny(&self, id: &str) -> Result<Job, CclError> {
        let job = self.store.read(id)?;
        require(&job, JobStatus::Pending, "deny")?;
        self.store.delete(id)?;
        self.fire(HookEvent::Kill, &job, "denied").await;
        Ok(job)
    }

    /// Signals a working job's agent and removes the job.
    pub async fn kill(&self, id: &str) -> Result<Job, CclError> {
        let job = self.store.read(id)?;
        require(&job, JobStatus::Working, "kill")?;
        if let Some(pid) = job.live_pid() {
            match self.procs.terminate(pid)? {
                Delivery::Delivered => tracing::info!(job_id = id, pid, "sent SIGTERM to agent"),
                Delivery::NoSuchProcess => tracing::debug!(job_id = id, pid, "agent already gone"),
            }
        }
        match self.store.delete(id) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.fire(HookEvent::Kill, &job, "killed").await;
        Ok(job)
    }

    /// Removes one finished job.
    pub fn clean(&self, id: &str) -> Result<Job, CclError> {
        let mut job = self.store.read(id)?;
        liveness::reconcile(&self.store, self.procs.as_ref(), &mut job)?;
        if !job.status.is_terminal() {
            return Err(CclError::InvalidTransition {
                id: id.to_owned(),
                status: job.status,
                action: "clean",
            });
        }
        self.store.delete(id)?;
        Ok(job)
    }

    /// Removes every finished job, or every job at all with `force`.
    /// Processes of removed working jobs are left running.
    pub fn clean_all(&self, force: bool) -> Result<usize, CclError> {
        let mut removed = 0;
        for job in self.list(None)? {
            if !force && !job.status.is_terminal() {
                continue;
            }
            match self.store.delete(&job.id) {
                Ok(()) => removed += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        tracing::info!(removed, force, "cleaned jobs");
        Ok(removed)
    }

    /// All jobs (optionally of one status) after repairing stale ones.
    pub fn list(&self, filter: Option<JobStatus>) -> Result<Vec<Job>, CclError> {
        let mut jobs = self.store.list()?;
        liveness::reconcile_all(&self.store, self.procs.as_ref(), &mut jobs);
        if let Some(status) = filter {
            jobs.retain(|j| j.status == status);
        }
        Ok(jobs)
    }

    pub fn status(&self, id: &str) -> Result<Job, CclError> {
        let mut job = self.store.read(id)?;
        liveness::reconcile(&self.store, self.procs.as_ref(), &mut job)?;
        Ok(job)
    }

    pub fn resume_plan(&self, id: &str) -> Result<ResumePlan, CclError> {
        let job = self.store.read(id)?;
        let Some(session_id) = job.session_id.filter(|s| !s.is_empty()) else {
            return Err(CclError::Other(format!("job {id} has no session to resume")));
        };
        let mut args = vec!["--resume".to_owned(), session_id];
        if self.claude.skip_permissions {
            args.push("--dangerously-skip-permissions".to_owned());
        }
        Ok(ResumePlan {
            directory: job.directory,
            program: self.claude.binary.clone(),
            args,
        })
    }

    /// Starts the detached supervisor for an already-`working` record. If it
    /// cannot be started the job is resolved to `error` and the spawn error returned.
    async fn start_supervisor(&self, job: &mut Job) -> Result<(), CclError> {
        let spec = DetachedSpawn {
            program: self.launch.exe.clone(),
            args: vec![OsString::from("run"), OsString::from(&job.id)],
            env: supervisor_env(
                std::env::vars_os(),
                &self.launch.state_dir,
                &self.launch.config_file,
            ),
        };
        match self.procs.spawn_detached(&spec) {
            Ok(pid) => {
                tracing::info!(job_id = %job.id, supervisor_pid = pid, "supervisor launched");
                self.fire(HookEvent::Start, job, "working").await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "failed to launch supervisor");
                job.mark_finished(JobStatus::Error);
                if self.store.replace(job)? {
                    self.fire(HookEvent::Error, job, "error").await;
                }
                Err(e)
            }
        }
    }

    async fn fire(&self, event: HookEvent, job: &Job, status: &str) {
        self.hooks.fire(event, &HookVars::for_job(job, status)).await;
    }
}

fn require(job: &Job, status: JobStatus, action: &'static str) -> Result<(), CclError> {
    if job.status == status {
        Ok(())
    } else {
        Err(CclError::InvalidTransition {
            id: job.id.clone(),
            status: job.status,
            action,
        })
    }
}
