#![forbid(unsafe_code)]

use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::CclError;
use crate::job::model::Job;

/// Flat-file job store: `<dir>/<id>.json` records plus `<dir>/<id>.log` agent output.
///
/// Every write goes to its own temp file first and is renamed into place, so
/// concurrent readers only ever see a complete record.
#[derive(Debug, Clone)]
pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<(), CclError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| CclError::Write {
            path: self.dir.clone(),
            source,
        })
    }

    pub fn record_path(&self, id: &str) -> Result<PathBuf, CclError> {
        validate_job_id(id)?;
        Ok(self.dir.join(format!("{id}.json")))
    }

    pub fn log_path(&self, id: &str) -> Result<PathBuf, CclError> {
        validate_job_id(id)?;
        Ok(self.dir.join(format!("{id}.log")))
    }

    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.record_path(id).is_ok_and(|p| p.exists())
    }

    pub fn write(&self, job: &Job) -> Result<(), CclError> {
        let path = self.record_path(&job.id)?;
        let staged = self.stage(job)?;
        staged.persist(&path).map_err(|e| CclError::Write {
            path,
            source: e.error,
        })?;
        Ok(())
    }

    /// Creates a new record, failing with `false` if the id is already taken.
    ///
    /// The staged file is linked into place, which both publishes it
    /// atomically and refuses to clobber.
    pub fn insert(&self, job: &Job) -> Result<bool, CclError> {
        let path = self.record_path(&job.id)?;
        let staged = self.stage(job)?;
        match staged.persist_noclobber(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(CclError::Write {
                path,
                source: e.error,
            }),
        }
    }

    /// Writes the encoded record to a fresh temp file in the state dir. Each
    /// writer gets its own file, so concurrent writers never share bytes.
    fn stage(&self, job: &Job) -> Result<NamedTempFile, CclError> {
        self.ensure_dir()?;
        let data = serde_json::to_vec_pretty(job)
            .map_err(|e| CclError::Other(format!("failed to encode job {}: {e}", job.id)))?;
        let write_err = |source: std::io::Error| CclError::Write {
            path: self.dir.clone(),
            source,
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{}.", job.id))
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(write_err)?;
        tmp.write_all(&data).map_err(write_err)?;
        Ok(tmp)
    }

    /// Writes `job` only if its record still exists. Returns `false` when the
    /// record has been deleted in the meantime, in which case nothing is written.
    pub fn replace(&self, job: &Job) -> Result<bool, CclError> {
        if !self.record_path(&job.id)?.exists() {
            return Ok(false);
        }
        self.write(job)?;
        Ok(true)
    }

    pub fn read(&self, id: &str) -> Result<Job, CclError> {
        let path = self.record_path(id)?;
        let data = match std::fs::read(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(CclError::not_found(id)),
            Err(source) => return Err(CclError::Read { path, source }),
        };
        serde_json::from_slice(&data).map_err(|e| CclError::Read {
            path,
            source: std::io::Error::new(ErrorKind::InvalidData, e),
        })
    }

    /// All readable records sorted by id. Unparseable files are skipped.
    pub fn list(&self) -> Result<Vec<Job>, CclError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CclError::Read {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut jobs: Vec<Job> = Vec::new();
        for entry in entries {
            let Ok(entry) = entry else {
                continue;
            };
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Ok(data) = std::fs::read(&path) else {
                continue;
            };
            let Ok(job) = serde_json::from_slice::<Job>(&data) else {
                tracing::debug!(path = %path.display(), "skipping unreadable job record");
                continue;
            };
            jobs.push(job);
        }
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    /// Removes the log (if any) and then the record. A missing record is `NotFound`.
    pub fn delete(&self, id: &str) -> Result<(), CclError> {
        let log = self.log_path(id)?;
        if let Err(e) = std::fs::remove_file(&log)
            && e.kind() != ErrorKind::NotFound
        {
            tracing::warn!(job_id = id, error = %e, "failed to remove job log");
        }
        let path = self.record_path(id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CclError::not_found(id)),
            Err(source) => Err(CclError::Write { path, source }),
        }
    }
}

fn validate_job_id(id: &str) -> Result<(), CclError> {
    if id.trim().is_empty()
        || id.contains('/')
        || id.contains('\\')
        || id.contains("..")
        || id.contains('\0')
    {
        return Err(CclError::InvalidId(id.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::JobStatus;

    fn job(id: &str, status: JobStatus) -> Job {
        Job::new(
            id.to_owned(),
            status,
            PathBuf::from("/tmp/project"),
            format!("task {id}"),
        )
    }

    #[test]
    fn write_then_read_returns_same_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JobStore::new(dir.path().join("state"));
        let mut j = job("100", JobStatus::Working);
        j.pid = Some(4242);
        j.session_id = Some("sess".to_owned());
        store.write(&j).unwrap();

        assert_eq!(store.read("100").unwrap(), j);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("state"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| name != "100.json")
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn read_missing_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JobStore::new(dir.path().to_path_buf());
        let err = store.read("nope").unwrap_err();
        assert!(err.is_not_found(), "{err}");
    }

    #[test]
    fn list_sorts_by_id_and_skips_corrupt_and_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JobStore::new(dir.path().to_path_buf());
        store.write(&job("300", JobStatus::Done)).unwrap();
        store.write(&job("100", JobStatus::Pending)).unwrap();
        store.write(&job("200", JobStatus::Error)).unwrap();
        std::fs::write(dir.path().join("999.json"), b"{\"id\":").unwrap();
        std::fs::write(dir.path().join("150.json.tmp"), b"{}").unwrap();
        std::fs::write(dir.path().join("100.log"), b"line\n").unwrap();

        let ids: Vec<String> = store.list().unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, ["100", "200", "300"]);
    }

    #[test]
    fn list_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JobStore::new(dir.path().join("absent"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn overwrite_never_mixes_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JobStore::new(dir.path().to_path_buf());
        let mut a = job("100", JobStatus::Pending);
        a.task = "a".repeat(4096);
        let mut b = job("100", JobStatus::Working);
        b.task = "b".to_owned();
        b.pid = Some(7);

        store.write(&a).unwrap();
        let writer = {
            let store = store.clone();
            let (a, b) = (a.clone(), b.clone());
            std::thread::spawn(move || {
                for i in 0..200 {
                    store.write(if i % 2 == 0 { &b } else { &a }).unwrap();
                }
            })
        };
        while !writer.is_finished() {
            for seen in store.list().unwrap() {
                assert!(seen == a || seen == b);
            }
        }
        writer.join().unwrap();
        assert_eq!(store.list().unwrap(), vec![a]);
    }

    #[test]
    fn concurrent_writers_to_one_id_stay_readable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JobStore::new(dir.path().to_path_buf());
        let mut a = job("1", JobStatus::Working);
        a.task = "a".repeat(200_000);
        let mut b = a.clone();
        b.status = JobStatus::Error;

        store.write(&a).unwrap();
        let writers: Vec<_> = [a.clone(), b.clone()]
            .into_iter()
            .map(|j| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..300 {
                        store.write(&j).unwrap();
                    }
                })
            })
            .collect();

        while writers.iter().any(|w| !w.is_finished()) {
            let seen = store.read("1").unwrap();
            assert!(seen == a || seen == b);
            assert_eq!(store.list().unwrap().len(), 1);
        }
        for w in writers {
            w.join().unwrap();
        }
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, ["1.json"]);
    }

    #[test]
    fn delete_removes_record_and_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JobStore::new(dir.path().to_path_buf());
        store.write(&job("100", JobStatus::Done)).unwrap();
        let log = store.log_path("100").unwrap();
        std::fs::write(&log, b"{}\n").unwrap();

        store.delete("100").unwrap();
        assert!(!log.exists());
        assert!(!store.exists("100"));
        assert!(store.delete("100").unwrap_err().is_not_found());
    }

    #[test]
    fn delete_without_log_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JobStore::new(dir.path().to_path_buf());
        store.write(&job("100", JobStatus::Pending)).unwrap();
        store.delete("100").unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn replace_does_not_resurrect_deleted_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JobStore::new(dir.path().to_path_buf());
        let mut j = job("100", JobStatus::Working);
        store.write(&j).unwrap();

        j.pid = Some(11);
        assert!(store.replace(&j).unwrap());
        assert_eq!(store.read("100").unwrap().pid, Some(11));

        store.delete("100").unwrap();
        j.status = JobStatus::Done;
        assert!(!store.replace(&j).unwrap());
        assert!(!store.exists("100"));
    }

    #[test]
    fn insert_refuses_taken_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JobStore::new(dir.path().to_path_buf());
        let first = job("100", JobStatus::Pending);
        let mut second = job("100", JobStatus::Working);
        second.task = "other".to_owned();

        assert!(store.insert(&first).unwrap());
        assert!(!store.insert(&second).unwrap());
        assert_eq!(store.read("100").unwrap(), first);
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn rejects_path_like_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JobStore::new(dir.path().to_path_buf());
        for bad in ["", "../x", "a/b", "a\\b"] {
            assert!(matches!(store.read(bad), Err(CclError::InvalidId(_))));
        }
    }
}
