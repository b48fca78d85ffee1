#![forbid(unsafe_code)]

//! Human-facing formatting shared by the CLI and the dashboard.

pub mod table;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::config;
use crate::job::model::Job;

/// Elapsed run time: start to finish, or start to now while running.
#[must_use]
pub fn job_duration(job: &Job) -> String {
    let Some(start) = job.started_at.as_deref().and_then(parse_rfc3339) else {
        return "-".to_owned();
    };
    let end = job
        .finished_at
        .as_deref()
        .and_then(parse_rfc3339)
        .unwrap_or_else(OffsetDateTime::now_utc);
    if end < start {
        return "-".to_owned();
    }
    format_duration(end - start)
}

#[must_use]
pub fn format_duration(d: time::Duration) -> String {
    if d < time::Duration::minutes(1) {
        return format!("{}s", d.whole_seconds());
    }
    if d < time::Duration::hours(1) {
        return format!("{}m", d.whole_minutes());
    }
    let hours = d.whole_hours();
    let minutes = (d - time::Duration::hours(hours)).whole_minutes();
    format!("{hours}h {minutes}m")
}

fn parse_rfc3339(s: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339).ok()
}

#[must_use]
pub fn display_dir(job: &Job, tilde_home: bool) -> String {
    let dir = job.directory.to_string_lossy();
    if tilde_home {
        config::tilde_path(&dir)
    } else {
        dir.into_owned()
    }
}

/// First line of `s`, cut to `max` chars with a trailing `...`.
#[must_use]
pub fn truncate(s: &str, max: usize) -> String {
    let first = s.lines().next().unwrap_or_default();
    let mut out: String = first.chars().take(max).collect();
    if first.chars().count() > max || first.len() < s.trim_end().len() {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::job::model::JobStatus;

    #[test]
    fn durations() {
        assert_eq!(format_duration(time::Duration::seconds(42)), "42s");
        assert_eq!(format_duration(time::Duration::seconds(125)), "2m");
        assert_eq!(format_duration(time::Duration::minutes(135)), "2h 15m");
    }

    #[test]
    fn job_duration_uses_finish_time() {
        let mut job = Job::new(
            "1".to_owned(),
            JobStatus::Done,
            PathBuf::from("/tmp"),
            "t".to_owned(),
        );
        assert_eq!(job_duration(&job), "-");
        job.started_at = Some("2024-05-01T10:00:00Z".to_owned());
        job.finished_at = Some("2024-05-01T10:03:30Z".to_owned());
        assert_eq!(job_duration(&job), "3m");
    }

    #[test]
    fn truncate_keeps_first_line() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer task text", 8), "a longer...");
        assert_eq!(truncate("line one\nline two", 20), "line one...");
    }
}
