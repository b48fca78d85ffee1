#![forbid(unsafe_code)]

use std::io::{Read as _, Write as _};
use std::os::unix::process::CommandExt as _;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{CommandFactory as _, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{self, Config, ConfigPaths};
use crate::job::lifecycle::{JobControl, LaunchTarget, NewJob};
use crate::job::model::{Job, JobStatus};
use crate::job::process::{self, NESTED_SESSION_VAR, SystemProcess};
use crate::job::store::JobStore;
use crate::job::supervisor::Supervisor;
use crate::logs::{self, LogTail};
use crate::output::{self, table::Table};
use crate::tui;

/// Filter for diagnostics on stderr, e.g. `CCL_LOG=debug`.
const LOG_ENV: &str = "CCL_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "ccl",
    version,
    about = "Launch and supervise background coding-agent jobs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a job (started right away unless --pending)
    New(NewArgs),
    #[command(alias = "ls")]
    List(ListArgs),
    Status(StatusArgs),
    /// Show a job's agent output
    Logs(LogsArgs),
    /// Start a pending job
    Approve(IdArgs),
    /// Remove a pending job
    Deny(IdArgs),
    /// Stop a working job and remove it
    Kill(IdArgs),
    /// Remove finished jobs
    Clean(CleanArgs),
    /// Continue a job's agent session interactively
    Resume(ResumeArgs),
    /// Supervise one job (started detached by `new`/`approve`)
    #[command(hide = true)]
    Run(IdArgs),
    /// Live dashboard
    Ui,
    Config(ConfigArgs),
    Completion(CompletionArgs),
    Version,
}

#[derive(Debug, Parser)]
pub struct NewArgs {
    /// Project directory the agent works in
    #[arg(long = "dir")]
    pub dir: String,
    /// Task description
    #[arg(long = "task")]
    pub task: String,
    /// Image for the agent to reference
    #[arg(long = "image")]
    pub image: Option<String>,
    /// Wait for `ccl approve` before starting
    #[arg(long = "pending")]
    pub pending: bool,
    /// Output JSON
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Only jobs with this status (pending, working, done, error)
    #[arg(short = 's', long = "status", value_parser = parse_status)]
    pub status: Option<JobStatus>,
    /// Output in JSON format
    #[arg(long = "json", conflicts_with = "csv")]
    pub json: bool,
    /// Output as CSV
    #[arg(long = "csv")]
    pub csv: bool,
}

#[derive(Debug, Parser)]
pub struct StatusArgs {
    pub id: String,
    /// Output in JSON format
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct LogsArgs {
    pub id: String,
    /// Keep printing new output until the job finishes
    #[arg(short = 'f', long = "follow")]
    pub follow: bool,
    /// Print the raw NDJSON events
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct IdArgs {
    pub id: String,
}

#[derive(Debug, Parser)]
pub struct CleanArgs {
    /// A single finished job to remove
    #[arg(conflicts_with = "all")]
    pub id: Option<String>,
    /// Remove every job, including pending and working ones
    #[arg(long = "all")]
    pub all: bool,
}

#[derive(Debug, Parser)]
pub struct ResumeArgs {
    pub id: String,
    /// Print the resume command instead of running it
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

#[derive(Debug, Parser)]
pub struct CompletionArgs {
    pub shell: clap_complete::Shell,
}

#[derive(Debug, Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCmd,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    List,
    Set(ConfigSetArgs),
    Get(ConfigGetArgs),
}

#[derive(Debug, Parser)]
pub struct ConfigSetArgs {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Parser)]
pub struct ConfigGetArgs {
    pub key: String,
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();

    let dashboard = matches!(cli.cmd, None | Some(Commands::Ui)) && tui::is_tty();
    init_tracing(dashboard);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

/// Diagnostics go to stderr, except while the dashboard owns the terminal.
fn init_tracing(quiet: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();
    let _ = if quiet {
        builder.with_writer(std::io::sink).try_init()
    } else {
        builder.with_writer(std::io::stderr).try_init()
    };
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let paths = config::default_paths();
    match cli.cmd {
        None => cmd_default(&paths).await,
        Some(Commands::Completion(args)) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "ccl", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Config(args)) => match args.cmd {
            ConfigCmd::List => {
                print!("{}", config::list_resolved_toml(&paths.config_file)?);
                Ok(ExitCode::SUCCESS)
            }
            ConfigCmd::Set(set) => {
                config::set_value_string_at_path(&paths.config_file, &set.key, &set.value)?;
                println!("Set {} = {}", set.key, set.value);
                Ok(ExitCode::SUCCESS)
            }
            ConfigCmd::Get(get) => {
                match config::get_value_string_at_path(&paths.config_file, &get.key)? {
                    Some(v) => {
                        println!("{v}");
                        Ok(ExitCode::SUCCESS)
                    }
                    None => anyhow::bail!(
                        "configuration key '{}' not found - use 'ccl config list' to see available keys",
                        get.key
                    ),
                }
            }
        },
        Some(Commands::New(args)) => cmd_new(&paths, args).await,
        Some(Commands::List(args)) => cmd_list(&paths, &args),
        Some(Commands::Status(args)) => cmd_status(&paths, &args),
        Some(Commands::Logs(args)) => cmd_logs(&paths, &args).await,
        Some(Commands::Approve(args)) => {
            let job = job_control(&paths, &config::load_lenient(&paths.config_file))?
                .approve(&args.id)
                .await?;
            println!("Approved job {}", job.id);
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Deny(args)) => {
            let job = job_control(&paths, &config::load_lenient(&paths.config_file))?
                .deny(&args.id)
                .await?;
            println!("Denied job {}", job.id);
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Kill(args)) => {
            let job = job_control(&paths, &config::load_lenient(&paths.config_file))?
                .kill(&args.id)
                .await?;
            println!("Killed job {}", job.id);
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Clean(args)) => cmd_clean(&paths, &args),
        Some(Commands::Resume(args)) => cmd_resume(&paths, &args),
        Some(Commands::Run(args)) => cmd_run(&paths, &args.id).await,
        Some(Commands::Ui) => cmd_ui(&paths).await,
        Some(Commands::Version) => Ok(cmd_version()),
    }
}

fn job_control(paths: &ConfigPaths, cfg: &Config) -> anyhow::Result<JobControl> {
    let exe = std::env::current_exe().context("failed to locate the ccl executable")?;
    Ok(JobControl::new(
        JobStore::new(paths.state_dir.clone()),
        cfg,
        Arc::new(SystemProcess),
        LaunchTarget {
            exe,
            state_dir: paths.state_dir.clone(),
            config_file: paths.config_file.clone(),
        },
    ))
}

async fn cmd_default(paths: &ConfigPaths) -> anyhow::Result<ExitCode> {
    if tui::is_tty() {
        return cmd_ui(paths).await;
    }
    let args = ListArgs {
        status: None,
        json: false,
        csv: false,
    };
    cmd_list(paths, &args)
}

async fn cmd_new(paths: &ConfigPaths, args: NewArgs) -> anyhow::Result<ExitCode> {
    let cfg = config::load(&paths.config_file)
        .with_context(|| format!("config {}", paths.config_file.display()))?;

    let directory = config::expand_path(&args.dir);
    if !directory.is_dir() {
        anyhow::bail!("directory {} does not exist", directory.display());
    }
    let image = args.image.as_deref().map(config::expand_path);

    let control = job_control(paths, &cfg)?;
    let job = control
        .create(NewJob {
            directory,
            task: args.task,
            image,
            pending: args.pending,
        })
        .await?;

    if args.json {
        let out = serde_json::json!({ "id": job.id, "status": job.status });
        println!("{out}");
    } else {
        println!("{}", job.id);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_list(paths: &ConfigPaths, args: &ListArgs) -> anyhow::Result<ExitCode> {
    let cfg = config::load_lenient(&paths.config_file);
    let jobs = job_control(paths, &cfg)?.list(args.status)?;

    if args.json {
        let mut s = serde_json::to_string_pretty(&jobs)?;
        s.push('\n');
        print!("{s}");
        return Ok(ExitCode::SUCCESS);
    }

    if args.csv {
        let mut t = Table::new([
            "id",
            "status",
            "directory",
            "task",
            "session_id",
            "pid",
            "created_at",
            "started_at",
            "finished_at",
        ]);
        for job in &jobs {
            t.row([
                job.id.clone(),
                job.status.to_string(),
                job.directory.to_string_lossy().into_owned(),
                job.task.clone(),
                job.session_id.clone().unwrap_or_default(),
                job.pid.map(|p| p.to_string()).unwrap_or_default(),
                job.created_at.clone().unwrap_or_default(),
                job.started_at.clone().unwrap_or_default(),
                job.finished_at.clone().unwrap_or_default(),
            ]);
        }
        t.print_csv()?;
        return Ok(ExitCode::SUCCESS);
    }

    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(ExitCode::SUCCESS);
    }

    let mut t = Table::new(["ID", "STATUS", "DIR", "TASK", "TIME"]);
    for job in &jobs {
        t.row([
            job.id.clone(),
            job.status.to_string(),
            output::display_dir(job, cfg.ui.tilde_home),
            output::truncate(&job.task, 60),
            output::job_duration(job),
        ]);
    }
    t.print()?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_status(paths: &ConfigPaths, args: &StatusArgs) -> anyhow::Result<ExitCode> {
    let cfg = config::load_lenient(&paths.config_file);
    let job = job_control(paths, &cfg)?.status(&args.id)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(ExitCode::SUCCESS);
    }
    print_job_details(&job, cfg.ui.tilde_home);
    Ok(ExitCode::SUCCESS)
}

fn print_job_details(job: &Job, tilde_home: bool) {
    println!("ID:        {}", job.id);
    println!("Status:    {}", job.status);
    println!("Directory: {}", output::display_dir(job, tilde_home));
    println!("Task:      {}", job.task);
    if let Some(image) = &job.image {
        println!("Image:     {}", image.display());
    }
    if let Some(pid) = job.live_pid() {
        println!("PID:       {pid}");
    }
    if let Some(sid) = &job.session_id {
        println!("Session:   {sid}");
    }
    for (label, value) in [
        ("Created:  ", &job.created_at),
        ("Started:  ", &job.started_at),
        ("Finished: ", &job.finished_at),
    ] {
        if let Some(v) = value {
            println!("{label} {v}");
        }
    }
    if job.started_at.is_some() {
        println!("Duration:  {}", output::job_duration(job));
    }
}

async fn cmd_logs(paths: &ConfigPaths, args: &LogsArgs) -> anyhow::Result<ExitCode> {
    let cfg = config::load_lenient(&paths.config_file);
    let control = job_control(paths, &cfg)?;
    let path = control.store().log_path(&args.id)?;
    let mut file = std::fs::File::open(&path)
        .map_err(|_| anyhow::anyhow!("no log file for job {}", args.id))?;

    if !args.follow {
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut out = std::io::stdout().lock();
        if args.json {
            out.write_all(&data)?;
        } else {
            out.write_all(logs::render_all(&data).as_bytes())?;
        }
        out.flush()?;
        return Ok(ExitCode::SUCCESS);
    }

    let json = args.json;
    let emit = |line: &[u8]| -> std::io::Result<()> {
        let mut out = std::io::stdout().lock();
        if json {
            out.write_all(line)?;
            out.write_all(b"\n")?;
        } else {
            out.write_all(logs::render_line(line).as_bytes())?;
        }
        out.flush()
    };
    let still_running = || {
        control
            .status(&args.id)
            .is_ok_and(|job| !job.status.is_terminal())
    };

    let mut tail = LogTail::new();
    tokio::select! {
        res = logs::follow(&mut file, &mut tail, logs::FOLLOW_INTERVAL, emit, still_running) => res?,
        _ = tokio::signal::ctrl_c() => {}
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_clean(paths: &ConfigPaths, args: &CleanArgs) -> anyhow::Result<ExitCode> {
    let cfg = config::load_lenient(&paths.config_file);
    let control = job_control(paths, &cfg)?;
    if let Some(id) = &args.id {
        control.clean(id)?;
        println!("Cleaned job {id}");
    } else {
        let removed = control.clean_all(args.all)?;
        println!("Cleaned {removed} job(s).");
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_resume(paths: &ConfigPaths, args: &ResumeArgs) -> anyhow::Result<ExitCode> {
    let cfg = config::load_lenient(&paths.config_file);
    let control = job_control(paths, &cfg)?;
    let plan = control.resume_plan(&args.id)?;

    if args.dry_run {
        println!("{plan}");
        return Ok(ExitCode::SUCCESS);
    }

    // The interactive session takes over; the job is no longer tracked.
    control.store().delete(&args.id)?;
    let err = std::process::Command::new(&plan.program)
        .args(&plan.args)
        .current_dir(&plan.directory)
        .env_remove(NESTED_SESSION_VAR)
        .exec();
    Err(anyhow::anyhow!("failed to run {}: {err}", plan.program))
}

async fn cmd_run(paths: &ConfigPaths, id: &str) -> anyhow::Result<ExitCode> {
    process::detach_session();
    let store = JobStore::new(paths.state_dir.clone());

    let cfg = match config::load(&paths.config_file) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(job_id = id, error = %format!("{e:#}"), "unusable config; failing job");
            if let Ok(mut job) = store.read(id) {
                job.mark_finished(JobStatus::Error);
                let _ = store.replace(&job);
            }
            return Err(e);
        }
    };

    let status = Supervisor::new(store, &cfg, Arc::new(SystemProcess))
        .run(id)
        .await?;
    tracing::info!(job_id = id, %status, "job finished");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_ui(paths: &ConfigPaths) -> anyhow::Result<ExitCode> {
    if !tui::is_tty() {
        anyhow::bail!("the dashboard requires a TTY");
    }
    let cfg = config::load_lenient(&paths.config_file);
    let control = job_control(paths, &cfg)?;
    tui::dashboard::run(&control, &cfg.ui).await?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_version() -> ExitCode {
    println!("ccl version {}", env!("CARGO_PKG_VERSION"));
    if let Some(commit) = option_env!("CCL_GIT_COMMIT") {
        println!("  commit: {commit}");
    }
    if let Some(date) = option_env!("CCL_BUILD_DATE") {
        println!("  built: {date}");
    }
    println!("  rust: {}", rustc_version_runtime::version());
    println!(
        "  os/arch: {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    ExitCode::SUCCESS
}

fn parse_status(s: &str) -> Result<JobStatus, String> {
    JobStatus::parse(s).ok_or_else(|| {
        format!("unknown status '{s}' (expected pending, working, done or error)")
    })
}
