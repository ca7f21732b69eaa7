use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default JVM flags applied to new servers.
pub const DEFAULT_JAVA_ARGS: &str =
    "-XX:+UseG1GC -XX:+ParallelRefProcEnabled -XX:MaxGCPauseMillis=200";

/// Tokens that identify the "server fully started" line of one server type.
///
/// A line marks the server as ready only when it contains both tokens.
///
/// # Examples
///
/// ```
/// use mc_runner::config::ReadyMarker;
///
/// let marker = ReadyMarker::default();
/// assert!(marker.matches(r#"[12:00:01 INFO]: Done (3.2s)! For help, type "help""#));
/// assert!(!marker.matches("[12:00:00 INFO]: Preparing spawn area"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyMarker {
    /// Token printed when world loading completes.
    pub completion_token: String,
    /// Token of the help prompt printed on the same line.
    pub help_token: String,
}

impl ReadyMarker {
    /// Returns true if `line` contains both tokens.
    pub fn matches(&self, line: &str) -> bool {
        line.contains(&self.completion_token) && line.contains(&self.help_token)
    }
}

impl Default for ReadyMarker {
    fn default() -> Self {
        Self {
            completion_token: "Done".to_string(),
            help_token: r#"For help, type "help""#.to_string(),
        }
    }
}

/// Configuration for the runner session.
///
/// Only `serversDir` is required; everything else falls back to the values
/// the desktop manager has always used.
///
/// # JSON Schema
///
/// ```json
/// {
///   "serversDir": "/home/alex/.local/share/mc-runner/servers",
///   "catalogPath": "/home/alex/.local/share/mc-runner/servers.json",
///   "javaPath": "/usr/lib/jvm/java-21/bin/java",
///   "logCapacity": 1000,
///   "stopGracePeriodMs": 30000,
///   "terminateGracePeriodMs": 5000,
///   "readyMarkers": {
///     "leafmc": { "completionToken": "Done", "helpToken": "For help, type \"help\"" }
///   }
/// }
/// ```
///
/// # Examples
///
/// ```
/// use mc_runner::config::ManagerConfig;
///
/// let config = ManagerConfig::parse_from_str(r#"{ "serversDir": "/srv/minecraft" }"#).unwrap();
/// assert_eq!(config.java_path, "java");
/// assert_eq!(config.log_capacity, 1000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerConfig {
    /// Parent directory of every server directory.
    pub servers_dir: PathBuf,

    /// Path of the persisted catalog. Defaults to `servers.json` next to
    /// `servers_dir`.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Java executable used to launch servers.
    #[serde(default = "default_java_path")]
    pub java_path: String,

    /// Console command written to stdin to request a graceful stop.
    #[serde(default = "default_stop_command")]
    pub stop_command: String,

    /// Maximum number of log entries kept per server.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    /// How long a stopping server may take before it is killed.
    #[serde(default = "default_stop_grace_period_ms")]
    pub stop_grace_period_ms: u64,

    /// How long a process may take to exit after SIGTERM before it is killed.
    #[serde(default = "default_terminate_grace_period_ms")]
    pub terminate_grace_period_ms: u64,

    /// Settling delay between stop and start during a restart.
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Sampling interval of the stats monitor.
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,

    /// Ready-line detection rules keyed by server type.
    #[serde(default)]
    pub ready_markers: HashMap<String, ReadyMarker>,
}

fn default_java_path() -> String {
    "java".to_string()
}

fn default_stop_command() -> String {
    "stop".to_string()
}

fn default_log_capacity() -> usize {
    1000
}

fn default_stop_grace_period_ms() -> u64 {
    30_000
}

fn default_terminate_grace_period_ms() -> u64 {
    5_000
}

fn default_restart_delay_ms() -> u64 {
    2_000
}

fn default_stats_interval_ms() -> u64 {
    5_000
}

impl ManagerConfig {
    /// Creates a configuration with default settings rooted at `servers_dir`.
    pub fn new(servers_dir: impl Into<PathBuf>) -> Self {
        Self {
            servers_dir: servers_dir.into(),
            catalog_path: None,
            java_path: default_java_path(),
            stop_command: default_stop_command(),
            log_capacity: default_log_capacity(),
            stop_grace_period_ms: default_stop_grace_period_ms(),
            terminate_grace_period_ms: default_terminate_grace_period_ms(),
            restart_delay_ms: default_restart_delay_ms(),
            stats_interval_ms: default_stats_interval_ms(),
            ready_markers: HashMap::new(),
        }
    }

    /// Loads a configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON
    /// * The JSON does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        Self::parse_from_str(&content)
    }

    /// Parses a configuration from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    /// Resolved path of the catalog store file.
    pub fn catalog_path(&self) -> PathBuf {
        match &self.catalog_path {
            Some(path) => path.clone(),
            None => self
                .servers_dir
                .parent()
                .unwrap_or(&self.servers_dir)
                .join("servers.json"),
        }
    }

    /// Ready marker for a server type, falling back to the default marker.
    pub fn ready_marker(&self, server_type: &str) -> ReadyMarker {
        self.ready_markers
            .get(server_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_millis(self.stop_grace_period_ms)
    }

    pub fn terminate_grace_period(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_period_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

/// Request to create a new server.
///
/// # Examples
///
/// ```
/// use mc_runner::config::NewServerConfig;
///
/// let request: NewServerConfig =
///     serde_json::from_str(r#"{ "name": "Survival", "version": "1.21.4-51" }"#).unwrap();
/// assert_eq!(request.server_type, "leafmc");
/// assert_eq!(request.port, 25565);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewServerConfig {
    /// User-facing label; also the source of the directory name.
    pub name: String,

    /// Server software; the jar must contain this string in its file name.
    #[serde(default = "default_server_type")]
    pub server_type: String,

    /// Build version of the server software.
    pub version: String,

    #[serde(default = "default_game_version")]
    pub game_version: String,

    #[serde(default = "default_ram_megabytes")]
    pub ram_megabytes: u32,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_java_args")]
    pub java_args: String,

    #[serde(default)]
    pub auto_start: bool,
}

fn default_server_type() -> String {
    "leafmc".to_string()
}

fn default_game_version() -> String {
    "latest".to_string()
}

fn default_ram_megabytes() -> u32 {
    2048
}

fn default_port() -> u16 {
    25565
}

fn default_java_args() -> String {
    DEFAULT_JAVA_ARGS.to_string()
}

impl NewServerConfig {
    /// Creates a request with default launch settings.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server_type: default_server_type(),
            version: version.into(),
            game_version: default_game_version(),
            ram_megabytes: default_ram_megabytes(),
            port: default_port(),
            java_args: default_java_args(),
            auto_start: false,
        }
    }
}
