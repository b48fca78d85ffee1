#![forbid(unsafe_code)]

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Working,
    Done,
    Error,
}

impl JobStatus {
    pub const ALL: [Self; 4] = [Self::Pending, Self::Working, Self::Done, Self::Error];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Working => "working",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// `done` and `error` are terminal; only `clean` moves a job out of them.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted job record.
///
/// `pid` is only set once a supervisor has actually started the agent; a
/// `working` record without a pid is a job whose supervisor has not attached yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub directory: PathBuf,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl Job {
    #[must_use]
    pub fn new(id: String, status: JobStatus, directory: PathBuf, task: String) -> Self {
        Self {
            id,
            status,
            directory,
            task,
            image: None,
            pid: None,
            session_id: None,
            created_at: Some(now_rfc3339()),
            started_at: None,
            finished_at: None,
        }
    }

    /// Returns the session id, assigning a fresh one first if the record has none.
    pub fn ensure_session_id(&mut self) -> &str {
        self.session_id
            .get_or_insert_with(new_session_id)
            .as_str()
    }

    /// Live pid, ignoring the `0` that older records used for "unset".
    #[must_use]
    pub fn live_pid(&self) -> Option<u32> {
        self.pid.filter(|p| *p > 0)
    }

    /// Moves the job to `working`, stamping `started_at` once.
    pub fn mark_started(&mut self) {
        self.status = JobStatus::Working;
        if self.started_at.is_none() {
            self.started_at = Some(now_rfc3339());
        }
        self.ensure_session_id();
    }

    /// Moves the job to a terminal status, stamping `finished_at` once.
    pub fn mark_finished(&mut self, status: JobStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        if self.finished_at.is_none() {
            self.finished_at = Some(now_rfc3339());
        }
    }

    /// Task text handed to the agent, with the image reference prepended.
    #[must_use]
    pub fn prompt(&self) -> String {
        match self.image.as_deref() {
            Some(image) if !image.as_os_str().is_empty() => format!(
                "Read and reference this image: {}\n\n{}",
                image.display(),
                self.task
            ),
            _ => self.task.clone(),
        }
    }
}

/// Timestamp-derived id; `taken` reports ids already in use so collisions get a `-N` suffix.
#[must_use]
pub fn new_job_id(unix_secs: i64, taken: impl Fn(&str) -> bool) -> String {
    let base = unix_secs.to_string();
    if !taken(&base) {
        return base;
    }
    let mut n = 1u32;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[must_use]
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

#[must_use]
pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_owned())
}

#[must_use]
pub fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
