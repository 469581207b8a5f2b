//! Server configuration.
//!
//! [`Config`] is the startup configuration assembled by the entry point
//! (defaults, builder methods, `REDIS_*` environment variables).
//! [`RuntimeConfig`] is the named-parameter store behind CONFIG GET/SET:
//! values are validated on write and the dispatcher applies the dynamic
//! ones to their subsystems immediately.

use crate::pattern::glob_match;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Default server port.
pub const DEFAULT_PORT: u16 = 6379;

/// AOF fsync policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppendFsync {
    /// Fsync after every logged command
    Always,
    /// Fsync at most once per second
    #[default]
    Everysec,
    /// Let the OS schedule writes
    No,
}

impl AppendFsync {
    /// Parse a config value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Some(Self::Always),
            "everysec" => Some(Self::Everysec),
            "no" => Some(Self::No),
            _ => None,
        }
    }

    /// The config-file spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Everysec => "everysec",
            Self::No => "no",
        }
    }
}

/// Startup configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address
    pub bind: String,
    /// Port number
    pub port: u16,
    /// Maximum number of simultaneously connected clients
    pub max_clients: usize,
    /// TCP keepalive (seconds, 0 to disable)
    pub tcp_keepalive: u32,
    /// Idle client timeout (seconds, 0 to disable)
    pub timeout: u32,
    /// Require password
    pub requirepass: Option<String>,
    /// Working directory for persistence files
    pub dir: PathBuf,
    /// Snapshot filename
    pub dbfilename: String,
    /// Periodic snapshot interval (None disables the timer)
    pub save_interval: Option<Duration>,
    /// Enable AOF persistence
    pub appendonly: bool,
    /// AOF filename
    pub appendfilename: String,
    /// AOF fsync policy
    pub appendfsync: AppendFsync,
    /// Slowlog threshold in microseconds (negative disables)
    pub slowlog_log_slower_than: i64,
    /// Slowlog ring size
    pub slowlog_max_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_clients: 10_000,
            tcp_keepalive: 300,
            timeout: 0,
            requirepass: None,
            dir: PathBuf::from("."),
            dbfilename: "dump.cdb".to_string(),
            save_interval: Some(Duration::from_secs(300)),
            appendonly: false,
            appendfilename: "appendonly.aof".to_string(),
            appendfsync: AppendFsync::default(),
            slowlog_log_slower_than: 10_000,
            slowlog_max_len: 128,
        }
    }
}

impl Config {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the `REDIS_*` environment variables:
    /// `REDIS_STORAGE_PATH`, `REDIS_DATA_DIR`, `REDIS_SAVE_INTERVAL`,
    /// `REDIS_PASSWORD`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("REDIS_STORAGE_PATH") {
            let path = PathBuf::from(path);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    config.dir = parent.to_path_buf();
                }
            }
            if let Some(name) = path.file_name() {
                config.dbfilename = name.to_string_lossy().into_owned();
            }
        } else if let Ok(dir) = std::env::var("REDIS_DATA_DIR") {
            config.dir = PathBuf::from(dir);
        }

        if let Ok(interval) = std::env::var("REDIS_SAVE_INTERVAL") {
            match parse_duration(&interval) {
                Some(duration) if duration.is_zero() => config.save_interval = None,
                Some(duration) => config.save_interval = Some(duration),
                None => warn!("ignoring invalid REDIS_SAVE_INTERVAL: {interval}"),
            }
        }

        if let Ok(password) = std::env::var("REDIS_PASSWORD") {
            if !password.is_empty() {
                config.requirepass = Some(password);
            }
        }

        config
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the bind address.
    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.requirepass = Some(password.into());
        self
    }

    /// Enable AOF persistence.
    pub fn appendonly(mut self, enabled: bool) -> Self {
        self.appendonly = enabled;
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Full path of the snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(&self.dbfilename)
    }

    /// Full path of the AOF file.
    pub fn aof_path(&self) -> PathBuf {
        self.dir.join(&self.appendfilename)
    }
}

/// Parse a duration like `30s`, `5m`, `1h`, or bare seconds.
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let (num, unit) = s.split_at(s.len().checked_sub(1)?);
    let value: u64 = num.trim().parse().ok()?;
    match unit {
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

/// How a parameter value is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    /// Arbitrary string
    Text,
    /// Signed integer
    Integer,
    /// yes/no
    Boolean,
    /// One of the eviction policy tags
    EvictionPolicy,
    /// One of always/everysec/no
    FsyncPolicy,
}

#[derive(Debug, Clone)]
struct Param {
    value: String,
    kind: ParamKind,
    read_only: bool,
}

/// Named-parameter store behind CONFIG GET/SET.
#[derive(Debug)]
pub struct RuntimeConfig {
    params: RwLock<BTreeMap<String, Param>>,
}

impl RuntimeConfig {
    /// Build the parameter store from the startup configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut params = BTreeMap::new();
        let mut insert = |name: &str, value: String, kind: ParamKind, read_only: bool| {
            params.insert(
                name.to_string(),
                Param {
                    value,
                    kind,
                    read_only,
                },
            );
        };

        insert("maxmemory", "0".into(), ParamKind::Integer, false);
        insert(
            "maxmemory-policy",
            "noeviction".into(),
            ParamKind::EvictionPolicy,
            false,
        );
        insert("timeout", config.timeout.to_string(), ParamKind::Integer, false);
        insert(
            "tcp-keepalive",
            config.tcp_keepalive.to_string(),
            ParamKind::Integer,
            false,
        );
        insert("databases", "16".into(), ParamKind::Integer, true);
        insert("dir", config.dir.display().to_string(), ParamKind::Text, false);
        insert("dbfilename", config.dbfilename.clone(), ParamKind::Text, false);
        insert(
            "requirepass",
            config.requirepass.clone().unwrap_or_default(),
            ParamKind::Text,
            false,
        );
        insert(
            "maxclients",
            config.max_clients.to_string(),
            ParamKind::Integer,
            false,
        );
        insert(
            "slowlog-log-slower-than",
            config.slowlog_log_slower_than.to_string(),
            ParamKind::Integer,
            false,
        );
        insert(
            "slowlog-max-len",
            config.slowlog_max_len.to_string(),
            ParamKind::Integer,
            false,
        );
        insert(
            "appendonly",
            if config.appendonly { "yes" } else { "no" }.into(),
            ParamKind::Boolean,
            false,
        );
        insert(
            "appendfsync",
            config.appendfsync.as_str().into(),
            ParamKind::FsyncPolicy,
            false,
        );
        insert("appendfilename", config.appendfilename.clone(), ParamKind::Text, false);
        insert(
            "auto-aof-rewrite-percentage",
            "100".into(),
            ParamKind::Integer,
            false,
        );
        insert(
            "auto-aof-rewrite-min-size",
            "67108864".into(),
            ParamKind::Integer,
            false,
        );

        Self {
            params: RwLock::new(params),
        }
    }

    /// Look up a parameter value.
    pub fn get(&self, name: &str) -> Option<String> {
        self.params
            .read()
            .get(&name.to_ascii_lowercase())
            .map(|p| p.value.clone())
    }

    /// A parameter interpreted as an integer, with a fallback.
    pub fn get_i64(&self, name: &str, default: i64) -> i64 {
        self.get(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// A boolean parameter (`yes`/`no`).
    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name).map(|v| v == "yes").unwrap_or(false)
    }

    /// All parameters whose name matches `pattern` (CONFIG GET).
    pub fn matching(&self, pattern: &str) -> Vec<(String, String)> {
        self.params
            .read()
            .iter()
            .filter(|(name, _)| glob_match(pattern.as_bytes(), name.as_bytes()))
            .map(|(name, param)| (name.clone(), param.value.clone()))
            .collect()
    }

    /// Validate and store a parameter (CONFIG SET). Returns the normalized
    /// value. The caller is responsible for applying side effects to the
    /// relevant subsystem.
    pub fn set(&self, name: &str, value: &str) -> Result<String, String> {
        let name = name.to_ascii_lowercase();
        let mut params = self.params.write();

        let Some(param) = params.get_mut(&name) else {
            return Err(format!("Unknown option or number of arguments for CONFIG SET - '{name}'"));
        };
        if param.read_only {
            return Err(format!("parameter '{name}' is read-only"));
        }

        let normalized = match param.kind {
            ParamKind::Text => value.to_string(),
            ParamKind::Integer => {
                let parsed: i64 = value
                    .parse()
                    .map_err(|_| format!("argument couldn't be parsed into an integer: '{value}'"))?;
                parsed.to_string()
            }
            ParamKind::Boolean => match value.to_ascii_lowercase().as_str() {
                "yes" | "no" => value.to_ascii_lowercase(),
                _ => return Err(format!("argument must be 'yes' or 'no': '{value}'")),
            },
            ParamKind::EvictionPolicy => {
                const POLICIES: [&str; 8] = [
                    "noeviction",
                    "allkeys-lru",
                    "allkeys-lfu",
                    "allkeys-random",
                    "volatile-lru",
                    "volatile-lfu",
                    "volatile-random",
                    "volatile-ttl",
                ];
                let lower = value.to_ascii_lowercase();
                if !POLICIES.contains(&lower.as_str()) {
                    return Err(format!("invalid maxmemory policy: '{value}'"));
                }
                lower
            }
            ParamKind::FsyncPolicy => AppendFsync::parse(value)
                .ok_or_else(|| format!("invalid appendfsync value: '{value}'"))?
                .as_str()
                .to_string(),
        };

        param.value = normalized.clone();
        Ok(normalized)
    }
}
