// src/server/definition.rs
use crate::config::NewServerConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a server definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(Uuid);

impl ServerId {
    // Private constructor, only usable within our crate
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Status of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// No process; directory present
    Offline,
    /// Process spawned, ready line not seen yet
    Starting,
    /// Ready line seen
    Running,
    /// Stop command sent, waiting for exit
    Stopping,
    /// Spawn failed or the process could not be supervised
    Error,
    /// Directory was absent when the catalog was loaded
    Missing,
    /// Id is not in the catalog. Never persisted.
    Unknown,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Offline => "offline",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Error => "error",
            ServerStatus::Missing => "missing",
            ServerStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted server definition.
///
/// The catalog owns these; every value handed out by the controller is a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDefinition {
    pub id: ServerId,
    pub name: String,
    pub directory_path: PathBuf,
    pub server_type: String,
    pub version: String,
    pub game_version: String,
    pub ram_megabytes: u32,
    pub port: u16,
    pub java_args: String,
    pub status: ServerStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auto_start: bool,
}

impl ServerDefinition {
    /// Builds a fresh offline definition for `config` living in `directory_path`.
    pub(crate) fn from_request(config: &NewServerConfig, directory_path: PathBuf) -> Self {
        Self {
            id: ServerId::new(),
            name: config.name.clone(),
            directory_path,
            server_type: config.server_type.clone(),
            version: config.version.clone(),
            game_version: config.game_version.clone(),
            ram_megabytes: config.ram_megabytes,
            port: config.port,
            java_args: config.java_args.clone(),
            status: ServerStatus::Offline,
            created_at: Utc::now(),
            last_started_at: None,
            auto_start: config.auto_start,
        }
    }
}

/// Launch settings that may change between runs.
///
/// `None` fields are left untouched. Changes made while a server runs take
/// effect on its next start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerUpdate {
    pub ram_megabytes: Option<u32>,
    pub port: Option<u16>,
    pub java_args: Option<String>,
    pub auto_start: Option<bool>,
}

impl ServerUpdate {
    pub(crate) fn apply(&self, definition: &mut ServerDefinition) {
        if let Some(ram) = self.ram_megabytes {
            definition.ram_megabytes = ram;
        }
        if let Some(port) = self.port {
            definition.port = port;
        }
        if let Some(java_args) = &self.java_args {
            definition.java_args = java_args.clone();
        }
        if let Some(auto_start) = self.auto_start {
            definition.auto_start = auto_start;
        }
    }
}

/// Turns a user-facing name into a directory name.
///
/// Every character outside `[A-Za-z0-9_-]` becomes `_`.
///
/// # Examples
///
/// ```
/// use mc_runner::server::sanitize_name;
///
/// assert_eq!(sanitize_name("My Server!"), "My_Server_");
/// assert_eq!(sanitize_name("../etc"), "___etc");
/// ```
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
