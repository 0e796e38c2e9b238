use crate::error::{Result, WardenError};
use crate::process::restart::RestartPolicy;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of the keys that declare an environment profile (`env_production`)
const PROFILE_PREFIX: &str = "env_";

/// Upper bound for `instances`
const MAX_INSTANCES: usize = 1024;

const VALID_SIGNALS: [&str; 7] = [
    "SIGTERM", "SIGINT", "SIGQUIT", "SIGKILL", "SIGHUP", "SIGUSR1", "SIGUSR2",
];

/// How instances of a descriptor relate to each other
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// One isolated process group per instance
    #[default]
    #[serde(alias = "fork_mode")]
    Fork,
    /// Instances form a pool sharing the supervisor's process group
    #[serde(alias = "cluster_mode")]
    Cluster,
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecMode::Fork => write!(f, "fork"),
            ExecMode::Cluster => write!(f, "cluster"),
        }
    }
}

/// What happens to an instance's stdout/stderr
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdioMode {
    /// Piped and written to per-instance log files
    #[default]
    Capture,
    /// Shared with the supervisor
    Inherit,
    /// Discarded
    Null,
}

/// `instances` accepts a number or `"max"` (one per CPU)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InstanceCount {
    Count(i64),
    Keyword(String),
}

impl Default for InstanceCount {
    fn default() -> Self {
        InstanceCount::Count(1)
    }
}

/// Flags passed to the interpreter, as a list or a single shell-like string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ArgList {
    List(Vec<String>),
    Line(String),
}

impl Default for ArgList {
    fn default() -> Self {
        ArgList::List(Vec::new())
    }
}

impl ArgList {
    fn into_vec(self) -> Vec<String> {
        match self {
            ArgList::List(list) => list,
            ArgList::Line(line) => line.split_whitespace().map(str::to_string).collect(),
        }
    }
}

/// Descriptor exactly as written in the file, before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDescriptor {
    #[serde(default)]
    pub name: String,

    /// Path or bare name of the executable (or the script given to `interpreter`)
    #[serde(default)]
    pub script: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Optional interpreter that runs `script`
    #[serde(default)]
    pub interpreter: Option<String>,

    #[serde(default)]
    pub interpreter_args: ArgList,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Base environment applied to every profile
    #[serde(default)]
    pub env: BTreeMap<String, Value>,

    #[serde(default)]
    pub instances: InstanceCount,

    #[serde(default)]
    pub exec_mode: ExecMode,

    #[serde(default = "default_autorestart")]
    pub autorestart: bool,

    #[serde(default = "default_max_restarts")]
    pub max_restarts: i64,

    #[serde(default = "default_restart_window")]
    pub restart_window_secs: u64,

    #[serde(default = "default_restart_delay")]
    pub restart_delay_ms: u64,

    #[serde(default = "default_max_restart_delay")]
    pub max_restart_delay_ms: u64,

    #[serde(default = "default_min_uptime")]
    pub min_uptime_ms: u64,

    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// Grace period before SIGKILL
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,

    #[serde(default)]
    pub stdio: StdioMode,

    /// Environment profiles (`env_<profile>`) and anything unrecognised
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_autorestart() -> bool {
    true
}

fn default_max_restarts() -> i64 {
    10
}

fn default_restart_window() -> u64 {
    60
}

fn default_restart_delay() -> u64 {
    1000
}

fn default_max_restart_delay() -> u64 {
    60_000
}

fn default_min_uptime() -> u64 {
    30_000
}

fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

fn default_stop_timeout() -> u64 {
    5000
}

/// A validated, immutable description of how to run one program
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessDescriptor {
    pub name: String,
    /// Resolved executable, or the script handed to the interpreter
    pub script: PathBuf,
    pub args: Vec<String>,
    pub interpreter: Option<PathBuf>,
    pub interpreter_args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub profiles: BTreeMap<String, BTreeMap<String, String>>,
    pub active_profile: Option<String>,
    pub instances: usize,
    pub exec_mode: ExecMode,
    pub restart: RestartPolicy,
    pub stop_signal: Signal,
    pub stop_timeout: Duration,
    pub stdio: StdioMode,
}

impl ProcessDescriptor {
    /// Validate a raw descriptor, collecting every violation.
    ///
    /// `profile` selects the environment profile; it must exist as
    /// `env_<profile>` when given.
    pub fn from_raw(raw: RawDescriptor, profile: Option<&str>) -> Result<Self> {
        let mut violations = Vec::new();

        let name = raw.name.trim().to_string();
        if name.is_empty() {
            violations.push("name must not be empty".to_string());
        }

        let cwd = raw.cwd.as_deref().map(expand_path);
        if let Some(ref dir) = cwd {
            if !dir.is_dir() {
                violations.push(format!(
                    "working directory does not exist: {}",
                    dir.display()
                ));
            }
        }

        let script = expand_env(raw.script.trim());
        let interpreter = raw.interpreter.as_deref().map(|i| expand_env(i.trim()));
        let (script, interpreter) =
            resolve_program(&script, interpreter.as_deref(), cwd.as_deref(), &mut violations);

        let instances = match raw.instances {
            InstanceCount::Count(n) if n < 1 => {
                violations.push(format!("instances must be at least 1 (got {})", n));
                0
            }
            InstanceCount::Count(n) if n as u64 > MAX_INSTANCES as u64 => {
                violations.push(format!("instances cannot exceed {}", MAX_INSTANCES));
                0
            }
            InstanceCount::Count(n) => n as usize,
            InstanceCount::Keyword(ref word) if word == "max" => {
                std::thread::available_parallelism().map_or(1, |n| n.get())
            }
            InstanceCount::Keyword(word) => {
                violations.push(format!("instances must be a number or \"max\" (got {:?})", word));
                0
            }
        };

        let env = match env_map(&raw.env) {
            Ok(env) => env.into_iter().map(|(k, v)| (k, expand_env(&v))).collect(),
            Err(e) => {
                violations.push(format!("env: {}", e));
                BTreeMap::new()
            }
        };

        let mut profiles = BTreeMap::new();
        for (key, value) in &raw.extra {
            match key.strip_prefix(PROFILE_PREFIX) {
                Some(profile_name) if !profile_name.is_empty() => match value {
                    Value::Object(map) => {
                        let entries: BTreeMap<String, Value> =
                            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                        match env_map(&entries) {
                            Ok(vars) => {
                                let vars = vars.into_iter().map(|(k, v)| (k, expand_env(&v)));
                                profiles.insert(profile_name.to_string(), vars.collect());
                            }
                            Err(e) => violations.push(format!("{}: {}", key, e)),
                        }
                    }
                    _ => violations.push(format!("{} must be a table of variables", key)),
                },
                _ => violations.push(format!("unknown field '{}'", key)),
            }
        }

        let active_profile = profile.map(str::to_string);
        if let Some(ref selected) = active_profile {
            if !profiles.contains_key(selected) {
                violations.push(format!(
                    "profile '{}' is not defined (expected {}{})",
                    selected, PROFILE_PREFIX, selected
                ));
            }
        }

        if raw.max_restarts < 1 {
            violations.push("max_restarts must be at least 1".to_string());
        }
        if raw.restart_window_secs < 1 {
            violations.push("restart_window_secs must be at least 1".to_string());
        }
        if raw.restart_delay_ms > raw.max_restart_delay_ms {
            violations.push(format!(
                "restart_delay_ms ({}) exceeds max_restart_delay_ms ({})",
                raw.restart_delay_ms, raw.max_restart_delay_ms
            ));
        }

        let stop_signal = match parse_signal(&raw.stop_signal) {
            Some(signal) => signal,
            None => {
                violations.push(format!(
                    "invalid stop_signal: {}. Must be one of: {}",
                    raw.stop_signal,
                    VALID_SIGNALS.join(", ")
                ));
                Signal::SIGTERM
            }
        };

        if !violations.is_empty() {
            let name = if name.is_empty() {
                "<unnamed>".to_string()
            } else {
                name
            };
            return Err(WardenError::Validation { name, violations });
        }

        Ok(Self {
            name,
            script,
            args: raw.args.iter().map(|a| expand_env(a)).collect(),
            interpreter,
            interpreter_args: raw.interpreter_args.into_vec(),
            cwd,
            env,
            profiles,
            active_profile,
            instances,
            exec_mode: raw.exec_mode,
            restart: RestartPolicy {
                enabled: raw.autorestart,
                max_restarts: raw.max_restarts as usize,
                window: Duration::from_secs(raw.restart_window_secs),
                base_delay: Duration::from_millis(raw.restart_delay_ms),
                max_delay: Duration::from_millis(raw.max_restart_delay_ms),
                min_uptime: Duration::from_millis(raw.min_uptime_ms),
            },
            stop_signal,
            stop_timeout: Duration::from_millis(raw.stop_timeout_ms),
            stdio: raw.stdio,
        })
    }

    /// Variables of the active profile, if one is selected
    pub fn profile_env(&self) -> Option<&BTreeMap<String, String>> {
        self.active_profile
            .as_ref()
            .and_then(|profile| self.profiles.get(profile))
    }

    /// Base environment overlaid with the active profile
    pub fn launch_env(&self) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        if let Some(profile) = self.profile_env() {
            env.extend(profile.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        env
    }

    /// Program and full argument list
    pub fn command_line(&self) -> (PathBuf, Vec<String>) {
        match self.interpreter {
            Some(ref interpreter) => {
                let mut args = self.interpreter_args.clone();
                args.push(self.script.to_string_lossy().into_owned());
                args.extend(self.args.iter().cloned());
                (interpreter.clone(), args)
            }
            None => {
                let mut args = self.interpreter_args.clone();
                args.extend(self.args.iter().cloned());
                (self.script.clone(), args)
            }
        }
    }

    /// True when `other` differs from `self` at most in the instance count
    pub fn same_launch_spec(&self, other: &ProcessDescriptor) -> bool {
        let mut resized = other.clone();
        resized.instances = self.instances;
        *self == resized
    }
}

/// Map a signal name to a nix signal
pub fn parse_signal(name: &str) -> Option<Signal> {
    match name {
        "SIGTERM" => Some(Signal::SIGTERM),
        "SIGINT" => Some(Signal::SIGINT),
        "SIGQUIT" => Some(Signal::SIGQUIT),
        "SIGKILL" => Some(Signal::SIGKILL),
        "SIGHUP" => Some(Signal::SIGHUP),
        "SIGUSR1" => Some(Signal::SIGUSR1),
        "SIGUSR2" => Some(Signal::SIGUSR2),
        _ => None,
    }
}

fn env_map(raw: &BTreeMap<String, Value>) -> std::result::Result<BTreeMap<String, String>, String> {
    raw.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return Err(format!("variable '{}' must be a string, number or bool", key)),
            };
            Ok((key.clone(), value))
        })
        .collect()
}

/// Resolve the executable (and the script, when an interpreter runs it)
fn resolve_program(
    script: &str,
    interpreter: Option<&str>,
    cwd: Option<&Path>,
    violations: &mut Vec<String>,
) -> (PathBuf, Option<PathBuf>) {
    if script.is_empty() {
        violations.push("script must not be empty".to_string());
        return (PathBuf::new(), None);
    }

    match interpreter {
        Some(interpreter) => {
            let resolved = resolve_command(interpreter, cwd);
            if resolved.is_none() {
                violations.push(format!("interpreter not found: {}", interpreter));
            }
            let script_path = relative_to(Path::new(script), cwd);
            if !script_path.is_file() {
                violations.push(format!("script not found: {}", script_path.display()));
            }
            (script_path, resolved)
        }
        None => match resolve_command(script, cwd) {
            Some(path) => (path, None),
            None => {
                violations.push(format!("command not found or not executable: {}", script));
                (PathBuf::from(script), None)
            }
        },
    }
}

/// Resolve a command the way a shell would: paths are checked directly,
/// bare names are searched on `PATH`.
pub fn resolve_command(command: &str, cwd: Option<&Path>) -> Option<PathBuf> {
    if command.contains('/') {
        let path = relative_to(Path::new(command), cwd);
        return is_executable(&path).then_some(path);
    }

    let search_path = std::env::var_os("PATH")?;
    std::env::split_paths(&search_path)
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
}

fn relative_to(path: &Path, cwd: Option<&Path>) -> PathBuf {
    match cwd {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Expand `$VAR` and `${VAR}` from the supervisor's environment.
/// Unknown variables are left untouched.
pub fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (var, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match std::env::var(var) {
            Ok(value) if !var.is_empty() => out.push_str(&value),
            _ => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}

fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(expand_env(&path.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn raw(name: &str, script: &str) -> RawDescriptor {
        toml::from_str(&format!("name = {:?}\nscript = {:?}\n", name, script)).unwrap()
    }

    fn violations(err: WardenError) -> Vec<String> {
        match err {
            WardenError::Validation { violations, .. } => violations,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults() {
        let descriptor = ProcessDescriptor::from_raw(raw("app", "/bin/sh"), None).unwrap();

        assert_eq!(descriptor.instances, 1);
        assert_eq!(descriptor.exec_mode, ExecMode::Fork);
        assert_eq!(descriptor.stdio, StdioMode::Capture);
        assert_eq!(descriptor.stop_signal, Signal::SIGTERM);
        assert_eq!(descriptor.stop_timeout, Duration::from_secs(5));
        assert!(descriptor.restart.enabled);
        assert_eq!(descriptor.restart.max_restarts, 10);
        assert_eq!(descriptor.restart.base_delay, Duration::from_secs(1));
        assert!(descriptor.active_profile.is_none());
    }

    #[test]
    fn test_bare_command_is_searched_on_path() {
        let descriptor = ProcessDescriptor::from_raw(raw("app", "sh"), None).unwrap();
        assert!(descriptor.script.is_absolute());
        assert!(descriptor.script.ends_with("sh"));
    }

    #[test]
    fn test_collects_all_violations() {
        let mut bad = raw("", "/nonexistent/binary");
        bad.instances = InstanceCount::Count(0);
        bad.stop_signal = "SIGBOGUS".to_string();
        bad.max_restarts = 0;

        let found = violations(ProcessDescriptor::from_raw(bad, Some("production")).unwrap_err());

        assert_eq!(found.len(), 6, "{:?}", found);
        assert!(found.iter().any(|v| v.contains("name must not be empty")));
        assert!(found.iter().any(|v| v.contains("command not found")));
        assert!(found.iter().any(|v| v.contains("instances must be at least 1")));
        assert!(found.iter().any(|v| v.contains("profile 'production'")));
        assert!(found.iter().any(|v| v.contains("max_restarts")));
        assert!(found.iter().any(|v| v.contains("invalid stop_signal")));
    }

    #[test]
    fn test_zero_restart_window_is_rejected() {
        let mut tight = raw("looper", "/bin/sh");
        tight.restart_window_secs = 0;
        tight.restart_delay_ms = 0;

        let found = violations(ProcessDescriptor::from_raw(tight, None).unwrap_err());
        assert_eq!(found, vec!["restart_window_secs must be at least 1".to_string()]);
    }

    #[test]
    fn test_profiles_and_launch_env() {
        let raw: RawDescriptor = toml::from_str(
            r#"
            name = "api"
            script = "/bin/sh"
            env = { PORT = 8080, MODE = "base" }
            env_production = { MODE = "prod", DEBUG = false }
            env_development = {}
            "#,
        )
        .unwrap();

        let descriptor = ProcessDescriptor::from_raw(raw, Some("production")).unwrap();
        assert_eq!(descriptor.profiles.len(), 2);

        let env = descriptor.launch_env();
        assert_eq!(env.get("PORT").map(String::as_str), Some("8080"));
        assert_eq!(env.get("MODE").map(String::as_str), Some("prod"));
        assert_eq!(env.get("DEBUG").map(String::as_str), Some("false"));
    }

    #[test]
    fn test_unknown_field_is_a_violation() {
        let raw: RawDescriptor = toml::from_str(
            r#"
            name = "api"
            script = "/bin/sh"
            max_memory = 1024
            "#,
        )
        .unwrap();

        let found = violations(ProcessDescriptor::from_raw(raw, None).unwrap_err());
        assert_eq!(found, vec!["unknown field 'max_memory'".to_string()]);
    }

    #[test]
    fn test_interpreter_command_line() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("server.js"), "").unwrap();

        let raw: RawDescriptor = toml::from_str(&format!(
            r#"
            name = "web"
            script = "server.js"
            cwd = {:?}
            interpreter = "sh"
            interpreter_args = "--max-old-space-size=4096 --trace"
            args = ["--port", "3000"]
            "#,
            dir.path()
        ))
        .unwrap();

        let descriptor = ProcessDescriptor::from_raw(raw, None).unwrap();
        let (program, args) = descriptor.command_line();

        assert!(program.ends_with("sh"));
        assert_eq!(
            args,
            vec![
                "--max-old-space-size=4096".to_string(),
                "--trace".to_string(),
                dir.path().join("server.js").to_string_lossy().into_owned(),
                "--port".to_string(),
                "3000".to_string(),
            ]
        );
    }

    #[test]
    fn test_instances_max_uses_cpu_count() {
        let mut raw = raw("pool", "/bin/sh");
        raw.instances = InstanceCount::Keyword("max".to_string());
        raw.exec_mode = ExecMode::Cluster;

        let descriptor = ProcessDescriptor::from_raw(raw, None).unwrap();
        assert!(descriptor.instances >= 1);
        assert_eq!(descriptor.exec_mode, ExecMode::Cluster);
    }

    #[test]
    fn test_same_launch_spec_ignores_instance_count() {
        let a = ProcessDescriptor::from_raw(raw("app", "/bin/sh"), None).unwrap();
        let mut b = a.clone();
        b.instances = 4;
        assert!(a.same_launch_spec(&b));
        assert_ne!(a, b);

        b.args.push("-c".to_string());
        assert!(!a.same_launch_spec(&b));
    }

    #[test]
    fn test_expand_env() {
        std::env::set_var("WARDEN_TEST_HOME", "/srv/app");
        std::env::set_var("WARDEN_TEST_HOME_EXTRA", "wrong");

        assert_eq!(expand_env("$WARDEN_TEST_HOME/bin"), "/srv/app/bin");
        assert_eq!(expand_env("${WARDEN_TEST_HOME}_x"), "/srv/app_x");
        assert_eq!(expand_env("$WARDEN_TEST_UNSET_VAR"), "$WARDEN_TEST_UNSET_VAR");
        assert_eq!(expand_env("cost: $5"), "cost: $5");
        assert_eq!(expand_env("${unterminated"), "${unterminated");
    }

    #[test]
    fn test_exec_mode_aliases() {
        let raw: RawDescriptor = toml::from_str(
            r#"
            name = "app"
            script = "/bin/sh"
            exec_mode = "cluster_mode"
            "#,
        )
        .unwrap();
        assert_eq!(raw.exec_mode, ExecMode::Cluster);
    }
}
