#![forbid(unsafe_code)]

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::CclError;
use crate::job::process::{CONFIG_VAR, STATE_DIR_VAR};

const DEFAULT_SYSTEM_PROMPT: &str = "You are the user's trusted programmer. Do not ask questions. \
Complete the entire task before stopping. If you encounter issues, debug and fix them. \
When finished, end with a 1-2 sentence summary.";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub claude: ClaudeConfig,
    pub hooks: HooksConfig,
    pub ui: UiConfig,
}

/// How the agent binary is launched for each job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClaudeConfig {
    pub binary: String,
    pub skip_permissions: bool,
    pub system_prompt: String,
    pub extra_flags: Vec<String>,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_owned(),
            skip_permissions: true,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            extra_flags: Vec::new(),
        }
    }
}

/// Shell command templates per lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HooksConfig {
    pub on_start: Vec<String>,
    pub on_pending: Vec<String>,
    pub on_done: Vec<String>,
    pub on_error: Vec<String>,
    pub on_kill: Vec<String>,
    pub timeout: String,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            on_start: Vec::new(),
            on_pending: Vec::new(),
            on_done: Vec::new(),
            on_error: Vec::new(),
            on_kill: Vec::new(),
            timeout: "60s".to_owned(),
        }
    }
}

impl HooksConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UiConfig {
    pub refresh_interval_ms: u64,
    pub tilde_home: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 500,
            tilde_home: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub state_dir: PathBuf,
    pub config_file: PathBuf,
}

/// Resolves the state directory and config file from `CCL_STATE_DIR` / `CCL_CONFIG`,
/// falling back to the XDG-style locations under the home directory.
#[must_use]
pub fn default_paths() -> ConfigPaths {
    resolve_paths(
        std::env::var_os(STATE_DIR_VAR),
        std::env::var_os(CONFIG_VAR),
    )
}

#[must_use]
pub fn resolve_paths(state_dir: Option<OsString>, config_file: Option<OsString>) -> ConfigPaths {
    let home = home_dir().unwrap_or_else(|| PathBuf::from("~"));
    let state_dir = state_dir
        .filter(|v| !v.is_empty())
        .map_or_else(
            || home.join(".local").join("state").join("ccl"),
            |v| expand_path(&v.to_string_lossy()),
        );
    let config_file = config_file
        .filter(|v| !v.is_empty())
        .map_or_else(
            || home.join(".config").join("ccl").join("config.toml"),
            |v| expand_path(&v.to_string_lossy()),
        );
    ConfigPaths {
        state_dir,
        config_file,
    }
}

fn home_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

#[must_use]
pub fn expand_tilde(input: &str) -> String {
    if let Some(rest) = input.strip_prefix("~/")
        && let Some(home) = home_dir()
    {
        return home.join(rest).to_string_lossy().to_string();
    }
    input.to_owned()
}

#[must_use]
pub fn tilde_path(input: &str) -> String {
    let Some(home) = home_dir() else {
        return input.to_owned();
    };
    let home_str = home.to_string_lossy();
    if let Some(rest) = input.strip_prefix(home_str.as_ref()) {
        if rest.is_empty() {
            return "~".to_owned();
        }
        if rest.starts_with(std::path::MAIN_SEPARATOR) {
            return format!("~{rest}");
        }
    }
    input.to_owned()
}

/// Expands `~/` and `$VAR`; relative results are anchored at the current directory.
#[must_use]
pub fn expand_path(input: &str) -> PathBuf {
    let p = PathBuf::from(expand_env_vars(&expand_tilde(input)));
    if p.is_absolute() {
        return p;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(p),
        Err(_) => p,
    }
}

fn expand_env_vars(input: &str) -> String {
    // Expand $VAR and ${VAR}. Leave unknown vars untouched.
    let Ok(re) = regex::Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?") else {
        return input.to_owned();
    };
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        std::env::var(key).unwrap_or_else(|_| caps[0].to_owned())
    })
    .to_string()
}

/// Strict load: a missing file yields defaults, a malformed one is an error.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    let (_doc, cfg) = load_from_file(path)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Like [`load`], but a broken config file only produces a warning.
#[must_use]
pub fn load_lenient(path: &Path) -> Config {
    match load(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %format!("{e:#}"),
                "ignoring unusable config, using defaults"
            );
            Config::default()
        }
    }
}

pub fn list_resolved_toml(path: &Path) -> anyhow::Result<String> {
    let cfg = load(path)?;
    Ok(toml::to_string_pretty(&cfg)?)
}

fn load_from_file(path: &Path) -> anyhow::Result<(toml_edit::DocumentMut, Config)> {
    if !path.exists() {
        return Ok((toml_edit::DocumentMut::new(), Config::default()));
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let doc = raw
        .parse::<toml_edit::DocumentMut>()
        .with_context(|| format!("failed to parse TOML in {}", path.display()))?;

    let cfg: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to deserialize TOML in {}", path.display()))?;
    Ok((doc, cfg))
}

pub fn get_value_string_at_path(path: &Path, key: &str) -> anyhow::Result<Option<String>> {
    let (_doc, cfg) = load_from_file(path)?;
    cfg.validate()?;
    Ok(lookup_value(&cfg, key).map(format_value_for_stdout))
}

pub fn set_value_string_at_path(path: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    let (mut doc, cfg) = load_from_file(path)?;
    cfg.validate()?;

    let item = parse_value_for_key(key, value)?;
    apply_set(&mut doc, key, item)?;

    // Validate by re-parsing the updated doc into a Config.
    let new_raw = doc.to_string();
    let new_cfg: Config = toml::from_str(&new_raw)
        .with_context(|| format!("config update produced invalid TOML for {}", path.display()))?;
    new_cfg.validate()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, new_raw.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<(), CclError> {
        if self.claude.binary.trim().is_empty() {
            return Err(CclError::Config(
                "claude.binary must not be empty".to_owned(),
            ));
        }
        if self.ui.refresh_interval_ms == 0 {
            return Err(CclError::Config(
                "ui.refresh_interval_ms must be >= 1".to_owned(),
            ));
        }
        if let Err(e) = parse_duration(&self.hooks.timeout) {
            return Err(CclError::Config(format!("hooks.timeout: {e}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyType {
    Bool,
    Int,
    String,
    List,
}

fn key_type(key: &str) -> Option<KeyType> {
    Some(match key {
        "claude.binary" | "claude.system_prompt" | "hooks.timeout" => KeyType::String,

        "claude.skip_permissions" | "ui.tilde_home" => KeyType::Bool,

        "ui.refresh_interval_ms" => KeyType::Int,

        "claude.extra_flags"
        | "hooks.on_start"
        | "hooks.on_pending"
        | "hooks.on_done"
        | "hooks.on_error"
        | "hooks.on_kill" => KeyType::List,

        _ => return None,
    })
}

fn parse_value_for_key(key: &str, value: &str) -> anyhow::Result<toml_edit::Item> {
    let invalid = |msg: String| CclError::Config(format!("invalid value for '{key}': {msg}"));
    let key_type =
        key_type(key).ok_or_else(|| CclError::Config(format!("unknown config key '{key}'")))?;
    let item = match key_type {
        KeyType::Bool => toml_edit::value(parse_bool(value).map_err(invalid)?),
        KeyType::Int => toml_edit::value(parse_int(value).map_err(invalid)?),
        KeyType::String => toml_edit::value(value),
        KeyType::List => toml_edit::value(parse_list(value).map_err(invalid)?),
    };
    Ok(item)
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("expected true|false, got '{other}'")),
    }
}

fn parse_int(s: &str) -> Result<i64, String> {
    s.trim()
        .parse::<i64>()
        .map_err(|e| format!("expected integer, got '{s}': {e}"))
}

/// `["a", "b"]` is parsed as a TOML array; anything else becomes a one-element list.
fn parse_list(s: &str) -> Result<toml_edit::Array, String> {
    let trimmed = s.trim();
    if !trimmed.starts_with('[') {
        let mut arr = toml_edit::Array::new();
        if !trimmed.is_empty() {
            arr.push(s);
        }
        return Ok(arr);
    }
    let parsed: toml_edit::Value = trimmed
        .parse()
        .map_err(|e| format!("expected a TOML array: {e}"))?;
    match parsed {
        toml_edit::Value::Array(arr) if arr.iter().all(toml_edit::Value::is_str) => Ok(arr),
        _ => Err("expected an array of strings".to_owned()),
    }
}

fn apply_set(
    doc: &mut toml_edit::DocumentMut,
    key: &str,
    value: toml_edit::Item,
) -> anyhow::Result<()> {
    let parts: Vec<&str> = key.split('.').filter(|p| !p.is_empty()).collect();
    let Some((leaf, tables)) = parts.split_last() else {
        return Err(CclError::Config(format!("invalid config key '{key}'")).into());
    };

    let mut cur = doc.as_table_mut();
    for &seg in tables {
        if !cur.contains_key(seg) {
            let mut t = toml_edit::Table::new();
            t.set_implicit(true);
            cur.insert(seg, toml_edit::Item::Table(t));
        }
        cur = cur[seg].as_table_mut().ok_or_else(|| {
            CclError::Config(format!("cannot set {key}: '{seg}' is not a table"))
        })?;
    }

    cur.insert(leaf, value);
    Ok(())
}

fn lookup_value(cfg: &Config, key: &str) -> Option<serde_json::Value> {
    let mut v = serde_json::to_value(cfg).ok()?;
    for seg in key.split('.').filter(|s| !s.is_empty()) {
        match v {
            serde_json::Value::Object(mut map) => {
                v = map.remove(seg)?;
            }
            _ => return None,
        }
    }
    Some(v)
}

fn format_value_for_stdout(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_owned(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s,
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    }
}

pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("empty duration");
    }

    let (num, unit) = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .map_or((s, ""), |i| s.split_at(i));
    let n: u64 = num
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;

    Ok(match unit {
        "ms" => Duration::from_millis(n),
        "s" | "" => Duration::from_secs(n),
        "m" => Duration::from_secs(n * 60),
        "h" => Duration::from_secs(n * 60 * 60),
        _ => anyhow::bail!("unsupported duration unit in '{s}' (use ms|s|m|h)"),
    })
}
