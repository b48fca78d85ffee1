use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use assert_cmd::Command;

struct Env {
    _root: tempfile::TempDir,
    state: PathBuf,
    config: PathBuf,
    project: PathBuf,
}

impl Env {
    fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let state = root.path().join("state");
        let config = root.path().join("config.toml");
        let project = root.path().join("project");
        std::fs::create_dir_all(&project).expect("mkdir project");
        Self {
            state,
            config,
            project,
            _root: root,
        }
    }

    fn ccl(&self) -> Command {
        let mut cmd = Command::cargo_bin("ccl").expect("ccl binary");
        cmd.env("CCL_STATE_DIR", &self.state)
            .env("CCL_CONFIG", &self.config)
            .env_remove("CLAUDECODE")
            .env_remove("CCL_LOG");
        cmd
    }

    fn stdout(&self, args: &[&str]) -> String {
        let out = self.ccl().args(args).assert().success().get_output().clone();
        String::from_utf8(out.stdout).expect("utf8 stdout")
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        serde_json::from_str(&self.stdout(args)).expect("json stdout")
    }

    fn new_job(&self, extra: &[&str]) -> String {
        let dir = self.project.to_string_lossy().into_owned();
        let mut args = vec!["new", "--dir", dir.as_str(), "--task", "fix the tests", "--json"];
        args.extend_from_slice(extra);
        let v = self.json(&args);
        v["id"].as_str().expect("id").to_owned()
    }

    /// Points `claude.binary` at a shell script with the given body.
    fn use_agent(&self, body: &str) -> PathBuf {
        let script = self.project.join("agent.sh");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).expect("write agent");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod agent");
        write_config(&self.config, &script);
        script
    }
}

fn write_config(path: &Path, agent: &Path) {
    let toml = format!(
        "[claude]\nbinary = \"{}\"\nskip_permissions = false\n",
        agent.display()
    );
    std::fs::write(path, toml).expect("write config");
}

#[test]
fn pending_job_is_listed_and_can_be_denied() {
    let env = Env::new();
    let id = env.new_job(&["--pending"]);

    let jobs = env.json(&["list", "--json"]);
    let jobs = jobs.as_array().expect("array");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["id"], id.as_str());
    assert_eq!(jobs[0]["status"], "pending");
    assert_eq!(jobs[0]["task"], "fix the tests");

    let status = env.json(&["status", &id, "--json"]);
    assert_eq!(status["status"], "pending");
    assert!(status.get("pid").is_none());

    let filtered = env.json(&["list", "--status", "done", "--json"]);
    assert_eq!(filtered, serde_json::json!([]));

    assert!(env.stdout(&["deny", &id]).contains(&format!("Denied job {id}")));
    assert_eq!(env.stdout(&["list"]).trim(), "No jobs.");
}

#[test]
fn wrong_state_and_unknown_ids_fail() {
    let env = Env::new();
    let id = env.new_job(&["--pending"]);

    env.ccl().args(["kill", &id]).assert().failure();
    env.ccl().args(["clean", &id]).assert().failure();
    env.ccl().args(["status", "999"]).assert().failure();
    env.ccl().args(["logs", &id]).assert().failure();

    // Still there after the refused operations.
    assert_eq!(env.json(&["status", &id, "--json"])["status"], "pending");
}

#[test]
fn resume_dry_run_prints_the_command() {
    let env = Env::new();
    let agent = env.use_agent("exit 0");
    let id = env.new_job(&["--pending"]);
    let sid = env.json(&["status", &id, "--json"])["session_id"]
        .as_str()
        .expect("session id")
        .to_owned();

    let out = env.stdout(&["resume", &id, "--dry-run"]);
    assert_eq!(
        out.trim(),
        format!(
            "cd {} && {} --resume {sid}",
            env.project.display(),
            agent.display()
        )
    );
    // Dry runs leave the job alone.
    assert_eq!(env.json(&["status", &id, "--json"])["status"], "pending");
}

#[test]
fn approved_job_runs_to_done_and_keeps_its_log() {
    let env = Env::new();
    env.use_agent(
        r#"echo '{"type":"assistant","message":{"content":[{"type":"text","text":"hello from agent"},{"type":"tool_use","name":"Edit"}]}}'
echo '{"type":"result","subtype":"success"}'
exit 0"#,
    );
    let id = env.new_job(&["--pending"]);
    assert!(env.stdout(&["approve", &id]).contains(&format!("Approved job {id}")));

    let deadline = Instant::now() + Duration::from_secs(20);
    let job = loop {
        let job = env.json(&["status", &id, "--json"]);
        if job["status"] == "done" {
            break job;
        }
        assert!(Instant::now() < deadline, "job never finished: {job}");
        std::thread::sleep(Duration::from_millis(100));
    };
    assert!(job["started_at"].is_string());
    assert!(job["finished_at"].is_string());

    let rendered = env.stdout(&["logs", &id]);
    assert_eq!(rendered, "hello from agent\n[tool: Edit]\n[result: success]\n");

    let raw = env.stdout(&["logs", &id, "--json"]);
    assert_eq!(raw.lines().count(), 2);

    // A finished job is followed to the end and the command returns.
    let followed = env.stdout(&["logs", &id, "--follow"]);
    assert_eq!(followed, rendered);

    assert!(env.stdout(&["clean", &id]).contains(&format!("Cleaned job {id}")));
    env.ccl().args(["status", &id]).assert().failure();
}

#[test]
fn failing_agent_resolves_to_error() {
    let env = Env::new();
    env.use_agent("echo oops >&2\nexit 3");
    let id = env.new_job(&[]);

    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let job = env.json(&["status", &id, "--json"]);
        if job["status"] == "error" {
            break;
        }
        assert_ne!(job["status"], "done");
        assert!(Instant::now() < deadline, "job never finished: {job}");
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[test]
fn clean_all_force_removes_everything() {
    let env = Env::new();
    env.new_job(&["--pending"]);
    env.new_job(&["--pending"]);

    assert_eq!(env.stdout(&["clean", "--all"]).trim(), "Cleaned 2 job(s).");
    assert_eq!(env.json(&["list", "--json"]), serde_json::json!([]));
}

#[test]
fn new_rejects_missing_directory() {
    let env = Env::new();
    env.ccl()
        .args(["new", "--dir", "/definitely/not/here", "--task", "x"])
        .assert()
        .failure();
    assert_eq!(env.json(&["list", "--json"]), serde_json::json!([]));
}

#[test]
fn config_set_then_get() {
    let env = Env::new();
    env.ccl()
        .args(["config", "set", "ui.refresh_interval_ms", "250"])
        .assert()
        .success();
    assert_eq!(
        env.stdout(&["config", "get", "ui.refresh_interval_ms"]).trim(),
        "250"
    );
    env.ccl()
        .args(["config", "get", "no.such.key"])
        .assert()
        .failure();
}

#[test]
fn version_mentions_the_package() {
    let env = Env::new();
    assert!(env.stdout(&["version"]).starts_with("ccl version "));
}
