#![forbid(unsafe_code)]

//! Lifecycle hooks: user-configured shell commands fired on job transitions.
//!
//! A hook never affects the transition that fired it. Template errors and
//! failing commands are logged and skipped.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use crate::config::HooksConfig;
use crate::error::CclError;
use crate::job::model::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Start,
    Pending,
    Done,
    Error,
    Kill,
}

impl HookEvent {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Start => "on_start",
            Self::Pending => "on_pending",
            Self::Done => "on_done",
            Self::Error => "on_error",
            Self::Kill => "on_kill",
        }
    }

    #[must_use]
    pub fn templates(self, cfg: &HooksConfig) -> &[String] {
        match self {
            Self::Start => &cfg.on_start,
            Self::Pending => &cfg.on_pending,
            Self::Done => &cfg.on_done,
            Self::Error => &cfg.on_error,
            Self::Kill => &cfg.on_kill,
        }
    }
}

/// Values available to hook templates as `{{.ID}}`, `{{.Task}}`, `{{.Dir}}`,
/// `{{.Status}}` and `{{.SessionID}}` (or the lowercase `{{id}}` forms).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookVars {
    pub id: String,
    pub task: String,
    pub dir: String,
    pub status: String,
    pub session_id: String,
}

impl HookVars {
    #[must_use]
    pub fn for_job(job: &Job, status: &str) -> Self {
        Self {
            id: job.id.clone(),
            task: job.task.clone(),
            dir: job.directory.to_string_lossy().into_owned(),
            status: status.to_owned(),
            session_id: job.session_id.clone().unwrap_or_default(),
        }
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        let key = name
            .strip_prefix('.')
            .unwrap_or(name)
            .to_ascii_lowercase()
            .replace('_', "");
        Some(match key.as_str() {
            "id" => &self.id,
            "task" => &self.task,
            "dir" | "directory" => &self.dir,
            "status" => &self.status,
            "sessionid" => &self.session_id,
            _ => return None,
        })
    }
}

/// Substitutes every `{{ name }}` placeholder. Values are inserted verbatim.
pub fn render_template(template: &str, vars: &HookVars) -> Result<String, CclError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(CclError::Template(format!(
                "unclosed '{{{{' in {template:?}"
            )));
        };
        let name = after[..end].trim();
        let value = vars.lookup(name).ok_or_else(|| {
            CclError::Template(format!("unknown variable '{name}' in {template:?}"))
        })?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookReport {
    pub ran: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct HookDispatcher {
    hooks: HooksConfig,
    timeout: Duration,
}

impl HookDispatcher {
    #[must_use]
    pub fn new(hooks: &HooksConfig) -> Self {
        Self {
            timeout: hooks.timeout(),
            hooks: hooks.clone(),
        }
    }

    /// Runs every hook of `event` concurrently as `sh -c` and waits for them,
    /// each bounded by the configured timeout.
    pub async fn fire(&self, event: HookEvent, vars: &HookVars) -> HookReport {
        let mut report = HookReport::default();
        let mut set = tokio::task::JoinSet::new();

        for template in event.templates(&self.hooks) {
            let cmd = match render_template(template, vars) {
                Ok(cmd) => cmd,
                Err(e) => {
                    tracing::warn!(
                        hook = event.name(),
                        job_id = %vars.id,
                        error = %e,
                        "skipping hook"
                    );
                    report.failed += 1;
                    continue;
                }
            };
            let dir = vars.dir.clone();
            let timeout = self.timeout;
            set.spawn(async move {
                run_hook(&cmd, Path::new(&dir), timeout)
                    .await
                    .map_err(|e| (cmd, e))
            });
        }

        while let Some(res) = set.join_next().await {
            report.ran += 1;
            match res {
                Ok(Ok(())) => {}
                Ok(Err((cmd, e))) => {
                    report.failed += 1;
                    tracing::warn!(
                        hook = event.name(),
                        job_id = %vars.id,
                        command = %cmd,
                        error = %e,
                        "hook failed"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        hook = event.name(),
                        job_id = %vars.id,
                        error = %e,
                        "hook task panicked"
                    );
                }
            }
        }
        report
    }
}

async fn run_hook(cmd: &str, dir: &Path, timeout: Duration) -> anyhow::Result<()> {
    let mut command = tokio::process::Command::new("sh");
    command
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    if dir.is_dir() {
        command.current_dir(dir);
    }

    let mut child = command.spawn()?;
    let Ok(status) = tokio::time::timeout(timeout, child.wait()).await else {
        let _ = child.kill().await;
        anyhow::bail!("timed out after {timeout:?}");
    };
    let status = status?;
    if !status.success() {
        anyhow::bail!("exited with {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> HookVars {
        HookVars {
            id: "123".to_owned(),
            task: "fix the bug".to_owned(),
            dir: "/home/user/project".to_owned(),
            status: "done".to_owned(),
            session_id: "abc-def".to_owned(),
        }
    }

    fn hooks_with(event: HookEvent, cmds: &[String]) -> HooksConfig {
        let mut cfg = HooksConfig::default();
        let list = match event {
            HookEvent::Start => &mut cfg.on_start,
            HookEvent::Pending => &mut cfg.on_pending,
            HookEvent::Done => &mut cfg.on_done,
            HookEvent::Error => &mut cfg.on_error,
            HookEvent::Kill => &mut cfg.on_kill,
        };
        list.extend_from_slice(cmds);
        cfg
    }

    #[test]
    fn renders_go_style_and_plain_placeholders() {
        let out = render_template("Job {{.ID}} is {{.Status}}: {{.Task}}", &vars()).unwrap();
        assert_eq!(out, "Job 123 is done: fix the bug");

        let out = render_template("{{ dir }} {{session_id}} {{.SessionID}}", &vars()).unwrap();
        assert_eq!(out, "/home/user/project abc-def abc-def");

        assert_eq!(render_template("plain }} text", &vars()).unwrap(), "plain }} text");
    }

    #[test]
    fn malformed_templates_are_errors() {
        assert!(matches!(
            render_template("echo {{.ID", &vars()),
            Err(CclError::Template(_))
        ));
        assert!(matches!(
            render_template("echo {{.Nope}}", &vars()),
            Err(CclError::Template(_))
        ));
    }

    #[tokio::test]
    async fn fire_runs_hooks_with_expanded_vars() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("out");
        let marker = dir.path().join("fired");
        let cfg = hooks_with(
            HookEvent::Done,
            &[
                format!("echo '{{{{.ID}}}}:{{{{.Status}}}}' > {}", out.display()),
                format!("touch {}", marker.display()),
            ],
        );

        let report = HookDispatcher::new(&cfg).fire(HookEvent::Done, &vars()).await;
        assert_eq!(report, HookReport { ran: 2, failed: 0 });
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "123:done\n");
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn failures_are_counted_not_propagated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("still-ran");
        let cfg = hooks_with(
            HookEvent::Error,
            &[
                "exit 3".to_owned(),
                "echo {{.Missing}}".to_owned(),
                format!("touch {}", marker.display()),
            ],
        );

        let report = HookDispatcher::new(&cfg).fire(HookEvent::Error, &vars()).await;
        assert_eq!(report, HookReport { ran: 2, failed: 2 });
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn hung_hook_is_killed_after_timeout() {
        let mut cfg = hooks_with(HookEvent::Kill, &["sleep 30".to_owned()]);
        cfg.timeout = "100ms".to_owned();

        let started = std::time::Instant::now();
        let report = HookDispatcher::new(&cfg).fire(HookEvent::Kill, &vars()).await;
        assert_eq!(report.failed, 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn no_hooks_is_a_no_op() {
        let report = HookDispatcher::new(&HooksConfig::default())
            .fire(HookEvent::Start, &vars())
            .await;
        assert_eq!(report, HookReport::default());
    }
}
