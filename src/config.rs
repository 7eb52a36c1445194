//! Runtime configuration from the environment (optionally seeded from a `.env` file).

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::{DEFAULT_BASE_URL, HEATZY_APPLICATION_ID};
use crate::http::DEFAULT_TIMEOUT_SECS;
use crate::services::heartbeat::{DEFAULT_HEARTBEATS_PER_SYNC, DEFAULT_HEARTBEAT_INTERVAL_SECS};

/// Host debug setting; selects the default log filter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DebugLevel {
    None,
    Verbose,
    All,
}

impl DebugLevel {
    pub fn from_value(value: i64) -> Option<DebugLevel> {
        match value {
            0 => Some(DebugLevel::None),
            62 => Some(DebugLevel::Verbose),
            -1 => Some(DebugLevel::All),
            _ => None,
        }
    }

    pub fn value(self) -> i64 {
        match self {
            DebugLevel::None => 0,
            DebugLevel::Verbose => 62,
            DebugLevel::All => -1,
        }
    }

    pub fn log_filter(self) -> &'static str {
        match self {
            DebugLevel::None => "info",
            DebugLevel::Verbose => "debug",
            DebugLevel::All => "trace",
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub username: String,
    pub password: String,
    pub debug_level: DebugLevel,
    pub api_url: String,
    pub application_id: String,
    pub http_timeout: Duration,
    /// Host heartbeat period.
    pub heartbeat_interval: Duration,
    pub heartbeats_per_sync: u32,
}

impl core::fmt::Debug for Config {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Config")
            .field("username", &self.username)
            .field("password", &"***")
            .field("debug_level", &self.debug_level)
            .field("api_url", &self.api_url)
            .field("application_id", &self.application_id)
            .field("http_timeout", &self.http_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("heartbeats_per_sync", &self.heartbeats_per_sync)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let username = var("HEATZY_USERNAME").ok_or_else(|| "HEATZY_USERNAME is required".to_string())?;
        let password = lookup("HEATZY_PASSWORD")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| "HEATZY_PASSWORD is required".to_string())?;

        let debug_level = match var("HEATZY_DEBUG_LEVEL") {
            Some(s) => s
                .parse::<i64>()
                .ok()
                .and_then(DebugLevel::from_value)
                .ok_or_else(|| format!("HEATZY_DEBUG_LEVEL must be one of 0, 62, -1 (got {})", s))?,
            None => DebugLevel::None,
        };

        let api_url = var("HEATZY_API_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            return Err(format!("HEATZY_API_URL must be an http(s) URL (got {})", api_url));
        }
        let application_id = var("HEATZY_APPLICATION_ID").unwrap_or_else(|| HEATZY_APPLICATION_ID.to_string());

        let http_timeout_secs = parse_positive(&var, "HTTP_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        let heartbeat_secs = parse_positive(&var, "HEARTBEAT_INTERVAL_SECS", DEFAULT_HEARTBEAT_INTERVAL_SECS)?;
        let heartbeats_per_sync = parse_positive(&var, "HEARTBEATS_PER_SYNC", u64::from(DEFAULT_HEARTBEATS_PER_SYNC))?;
        let heartbeats_per_sync =
            u32::try_from(heartbeats_per_sync).map_err(|_| "HEARTBEATS_PER_SYNC is too large".to_string())?;

        Ok(Config {
            username,
            password,
            debug_level,
            api_url,
            application_id,
            http_timeout: Duration::from_secs(http_timeout_secs),
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            heartbeats_per_sync,
        })
    }
}

fn parse_positive<F>(var: &F, key: &str, default: u64) -> Result<u64, String>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(s) => match s.parse::<u64>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(format!("{} must be a positive integer (got {})", key, s)),
        },
        None => Ok(default),
    }
}

/// Parse `KEY=value` lines; blank lines and `#` comments are skipped.
pub fn parse_env_file(contents: &str) -> Result<HashMap<String, String>, String> {
    let mut vars = HashMap::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("line {}: missing '='", index + 1))?;
        let key = key.trim();
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(format!("line {}: invalid variable name {:?}", index + 1, key));
        }
        let value = unquote(value.trim()).map_err(|e| format!("line {}: {}", index + 1, e))?;
        vars.insert(key.to_string(), value);
    }
    Ok(vars)
}

fn unquote(raw: &str) -> Result<String, String> {
    for quote in ['"', '\''] {
        if let Some(rest) = raw.strip_prefix(quote) {
            let end = rest
                .find(quote)
                .ok_or_else(|| format!("unterminated {} quote", quote))?;
            let tail = rest[end + 1..].trim();
            if !tail.is_empty() && !tail.starts_with('#') {
                return Err("unexpected characters after closing quote".to_string());
            }
            return Ok(rest[..end].to_string());
        }
    }
    Ok(raw.split(" #").next().unwrap_or_default().trim_end().to_string())
}

/// Load a `.env` file into the process environment without overriding
/// variables that are already set.
pub fn load_env_file(path: &Path) -> Result<usize, String> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let vars = parse_env_file(&contents).map_err(|e| format!("{}: {}", path.display(), e))?;
    let mut applied = 0;
    for (key, value) in vars {
        if std::env::var_os(&key).is_none() {
            // Updating process-level environment variables is unsafe on some targets.
            unsafe {
                std::env::set_var(key, value);
            }
            applied += 1;
        }
    }
    Ok(applied)
}

/// A `.env` file that was applied to the process environment.
#[derive(Debug)]
pub struct LoadedEnvFile {
    pub path: PathBuf,
    /// Named with `--env-file` rather than found in the working directory.
    pub explicit: bool,
    pub applied: usize,
}

/// Extract the `--env-file <path>` / `--env-file=<path>` option; any other
/// argument is an error.
pub fn env_file_arg<I>(args: I) -> Result<Option<PathBuf>, String>
where
    I: IntoIterator<Item = OsString>,
{
    let mut args = args.into_iter();
    let mut found: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        let arg = arg
            .into_string()
            .map_err(|_| "argument contains invalid UTF-8".to_string())?;
        let path = if arg == "--" {
            break;
        } else if arg == "--env-file" {
            args.next().map(PathBuf::from)
        } else if let Some(inline) = arg.strip_prefix("--env-file=") {
            Some(PathBuf::from(inline)).filter(|p| !p.as_os_str().is_empty())
        } else {
            return Err(format!("unrecognised argument: {}", arg));
        };
        let path = path.ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
        if found.replace(path).is_some() {
            return Err("`--env-file` provided more than once".to_string());
        }
    }
    Ok(found)
}

/// Apply the explicit env file, or `./.env` when none was named and one exists.
pub fn load_env(explicit: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    let (path, is_explicit) = match explicit {
        Some(path) if path.is_file() => (path, true),
        Some(path) => return Err(format!("env file not found: {}", path.display())),
        None => {
            let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
            let path = cwd.join(".env");
            if !path.is_file() {
                return Ok(None);
            }
            (path, false)
        }
    };
    let applied = load_env_file(&path)?;
    Ok(Some(LoadedEnvFile {
        path,
        explicit: is_explicit,
        applied,
    }))
}
