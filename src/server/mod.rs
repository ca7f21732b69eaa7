//! Server management module for MC Runner.
//!
//! This module owns everything about a server: its persisted definition, the
//! process running it, its console log, its runtime stats and the events it
//! publishes. The [`LifecycleController`] ties these together.
//! All public operations are instrumented with `tracing` spans.
//!
//! # Components
//!
//! * `catalog` - Persisted server definitions
//! * `definition` - Server identity, configuration and status
//! * `events` - Status and log notifications for subscribers
//! * `lifecycle` - The start/stop/restart/delete state machine
//! * `logs` - Bounded per-server console history
//! * `process` - Spawning and talking to server processes
//! * `scaffold` - Initial files of a new server directory
//! * `stats` - CPU, memory, uptime and player sampling
//!
//! # Examples
//!
//! Creating and starting a server:
//!
//! ```no_run
//! use mc_runner::McRunner;
//! use mc_runner::config::{ManagerConfig, NewServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> mc_runner::Result<()> {
//!     let runner = McRunner::new(ManagerConfig::new("/srv/minecraft/servers"))?;
//!     let controller = runner.controller();
//!
//!     let server = controller
//!         .create_server(NewServerConfig::new("Survival", "1.21.4-51"))
//!         .await?;
//!
//!     // The jar has to be downloaded into the server directory first
//!     controller.start_server(server.id).await?;
//!     println!("{} is {}", server.name, controller.get_status(server.id));
//!     Ok(())
//! }
//! ```
//!
//! Following status changes:
//!
//! ```no_run
//! use mc_runner::McRunner;
//! use mc_runner::config::ManagerConfig;
//!
//! #[tokio::main]
//! async fn main() -> mc_runner::Result<()> {
//!     let runner = McRunner::new(ManagerConfig::new("/srv/minecraft/servers"))?;
//!     let mut events = runner.controller().subscribe_status();
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{} -> {}", event.id, event.status);
//!     }
//!     Ok(())
//! }
//! ```
pub mod catalog;
pub mod definition;
pub mod events;
pub mod lifecycle;
pub mod logs;
mod monitor;
pub mod process;
pub mod scaffold;
pub mod stats;

pub use catalog::ServerCatalog;
pub use definition::{ServerDefinition, ServerId, ServerStatus, ServerUpdate, sanitize_name};
pub use events::{EventNotifier, LogAppended, StatusChanged, Subscription};
pub use lifecycle::LifecycleController;
pub use logs::{LogBuffer, LogEntry, LogSeverity};
pub use process::{LineSplitter, ProcessInfo, find_server_binary, launch_arguments};
pub use stats::{PlayerTracker, ProcessSample, RuntimeStats, StatsSampler, SysinfoSampler};
