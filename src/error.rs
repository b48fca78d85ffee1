#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

use crate::job::model::JobStatus;

#[derive(Debug, Error)]
pub enum CclError {
    #[error("job {id} not found")]
    NotFound { id: String },

    #[error("job {id} is {status}, cannot {action}")]
    InvalidTransition {
        id: String,
        status: JobStatus,
        action: &'static str,
    },

    #[error("invalid job ID '{0}'")]
    InvalidId(String),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("agent exited with {}", exit_code_label(.code))]
    ProcessFailed { code: Option<i32> },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("hook template error: {0}")]
    Template(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl CclError {
    #[must_use]
    pub fn not_found(id: &str) -> Self {
        Self::NotFound { id: id.to_owned() }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "no exit code (killed by signal)".to_owned(),
    }
}
