//! Configuration module for MC Runner.
//!
//! This module handles parsing and validation of the runner configuration
//! and of requests to create new servers. Configurations are JSON, loaded
//! from files or strings.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use mc_runner::config::ManagerConfig;
//!
//! let config = ManagerConfig::from_file("mc-runner.json").unwrap();
//! println!("Servers live in {}", config.servers_dir.display());
//! ```
//!
//! Creating a configuration programmatically:
//!
//! ```
//! use mc_runner::config::{ManagerConfig, validate_config};
//!
//! let mut config = ManagerConfig::new("/srv/minecraft/servers");
//! config.java_path = "/usr/lib/jvm/java-21/bin/java".to_string();
//! validate_config(&config).unwrap();
//! ```
mod parser;
pub mod validator;

pub use parser::{DEFAULT_JAVA_ARGS, ManagerConfig, NewServerConfig, ReadyMarker};
pub use validator::{validate_config, validate_new_server};
