#![forbid(unsafe_code)]

//! Read-triggered repair of `working` records whose agent process is gone.
//!
//! Nothing polices records in the background: a job whose process died without
//! its supervisor recording the exit stays `working` until the next reader
//! looks at it. That window is expected. Repairs go through
//! [`JobStore::replace`], so concurrent readers racing on the same record only
//! produce identical rewrites, and a record deleted meanwhile stays deleted.

use crate::error::CclError;
use crate::job::model::{Job, JobStatus};
use crate::job::process::{Liveness, ProcessControl};
use crate::job::store::JobStore;

/// Marks `job` as `error` if it claims to be working but its pid is gone.
/// `finished_at` is left unset: the exit was never observed.
///
/// Returns whether the job was repaired.
pub fn reconcile(
    store: &JobStore,
    procs: &dyn ProcessControl,
    job: &mut Job,
) -> Result<bool, CclError> {
    if job.status != JobStatus::Working {
        return Ok(false);
    }
    let Some(pid) = job.live_pid() else {
        return Ok(false);
    };
    if procs.probe(pid) != Liveness::Gone {
        return Ok(false);
    }

    // The supervisor reaps its child just before recording the exit; take
    // its result if it already landed.
    match store.read(&job.id) {
        Ok(fresh) if fresh.status != JobStatus::Working || fresh.live_pid() != Some(pid) => {
            *job = fresh;
            return Ok(false);
        }
        Ok(_) => {}
        Err(e) if e.is_not_found() => return Ok(false),
        Err(e) => return Err(e),
    }

    tracing::info!(job_id = %job.id, pid, "agent process gone; marking job as error");
    job.status = JobStatus::Error;
    store.replace(job)?;
    Ok(true)
}

/// Reconciles every job in place. A failed repair is logged and the job is
/// still returned with its corrected status.
pub fn reconcile_all(store: &JobStore, procs: &dyn ProcessControl, jobs: &mut [Job]) -> usize {
    let mut repaired = 0;
    for job in jobs.iter_mut() {
        match reconcile(store, procs, job) {
            Ok(true) => repaired += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "failed to persist stale job repair");
            }
        }
    }
    repaired
}
