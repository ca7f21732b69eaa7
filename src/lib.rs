/*!
 # MC Runner

 A Rust library for creating, running and supervising Minecraft server processes.

 ## Overview

 MC Runner provides functionality to:
 - Create server directories with their initial files
 - Start, stop, restart and delete server processes
 - Send console commands to running servers
 - Keep a bounded console history per server
 - Sample CPU, memory, uptime and player counts
 - Notify subscribers of status changes and new console output

 ## Basic Usage

 ```no_run
 use mc_runner::{McRunner, Result};
 use mc_runner::config::NewServerConfig;

 #[tokio::main]
 async fn main() -> Result<()> {
     // Create a runner from config file
     let runner = McRunner::from_config_file("mc-runner.json")?;
     let controller = runner.controller();

     // Register a new server
     let server = controller
         .create_server(NewServerConfig::new("Lobby", "1.21.4-51"))
         .await?;

     // Start it once the jar is in place
     controller.start_server(server.id).await?;

     // Talk to it
     controller.send_command(server.id, "say hello").await?;
     for entry in controller.get_logs(server.id, 20) {
         println!("[{}] {}", entry.timestamp, entry.message);
     }

     // Stop everything before exiting
     runner.shutdown().await;
     Ok(())
 }
 ```

 ## Features

 - **Lifecycle Management**: A single state machine per server with graceful stop and forced kill
 - **Persistence**: Server definitions survive restarts of the host application
 - **Events**: Broadcast status and log notifications to any number of subscribers
 - **Configuration**: Configure the runner through JSON config files
 - **Error Handling**: Comprehensive error handling
 - **Async Support**: Full async/await support
*/

pub mod config;
pub mod error;
pub mod files;
pub mod server;

pub use config::{ManagerConfig, NewServerConfig};
pub use error::{Error, Result};
pub use files::{FileManager, LocalFileManager};
pub use server::{
    LifecycleController, LogEntry, RuntimeStats, ServerDefinition, ServerId, ServerStatus,
};

use config::validate_config;
use server::{ServerCatalog, SysinfoSampler};
use std::path::Path;
use std::sync::Arc;

/// Configure and run Minecraft servers
///
/// This struct is the main entry point of a session: it loads the catalog,
/// owns the [`LifecycleController`] and tears every process down on
/// [`McRunner::shutdown`].
/// All public methods are instrumented with `tracing` spans.
pub struct McRunner {
    /// Configuration
    config: ManagerConfig,
    /// Controller owning every server process
    controller: LifecycleController,
}

impl McRunner {
    /// Create a new runner from a configuration file path
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(path), fields(config_path = ?path.as_ref()))]
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        tracing::info!("Loading configuration from file");
        let config = ManagerConfig::from_file(path)?;
        Self::new(config)
    }

    /// Create a new runner from a configuration string
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(config))]
    pub fn from_config_str(config: &str) -> Result<Self> {
        tracing::info!("Loading configuration from string");
        let config = ManagerConfig::parse_from_str(config)?;
        Self::new(config)
    }

    /// Create a new runner working on the local filesystem
    ///
    /// Creates the servers directory if needed and loads the catalog.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(config), fields(servers_dir = %config.servers_dir.display()))]
    pub fn new(config: ManagerConfig) -> Result<Self> {
        Self::with_file_manager(config, Arc::new(LocalFileManager::new()))
    }

    /// Create a new runner that routes directory operations through `files`
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(config, files))]
    pub fn with_file_manager(
        mut config: ManagerConfig,
        files: Arc<dyn FileManager>,
    ) -> Result<Self> {
        tracing::info!("Creating new McRunner");
        validate_config(&config)?;

        config.servers_dir = std::path::absolute(&config.servers_dir).map_err(|e| {
            Error::ConfigInvalid(format!(
                "Cannot resolve servers directory {}: {}",
                config.servers_dir.display(),
                e
            ))
        })?;
        std::fs::create_dir_all(&config.servers_dir).map_err(|e| {
            Error::Io(format!(
                "Failed to create {}: {}",
                config.servers_dir.display(),
                e
            ))
        })?;

        let catalog = ServerCatalog::load(config.catalog_path())?;
        tracing::debug!(num_servers = catalog.len(), "Catalog loaded");

        let controller = LifecycleController::new(
            config.clone(),
            catalog,
            files,
            Arc::new(SysinfoSampler::new()),
        )?;

        Ok(Self { config, controller })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The controller; clone it to share between tasks
    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    /// Start every server marked `autoStart`
    ///
    /// Servers that fail are skipped; the error lists all of them.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self))]
    pub async fn start_auto_servers(&self) -> Result<Vec<ServerId>> {
        let targets: Vec<ServerDefinition> = self
            .controller
            .list_servers()
            .into_iter()
            .filter(|server| server.auto_start)
            .collect();
        tracing::info!(num_servers = targets.len(), "Starting auto-start servers");

        let mut ids = Vec::new();
        let mut errors = Vec::new();

        for server in targets {
            match self.controller.start_server(server.id).await {
                Ok(()) => ids.push(server.id),
                Err(e) => {
                    tracing::error!(server_name = %server.name, error = %e, "Failed to start server");
                    errors.push((server.name, e));
                }
            }
        }

        if !errors.is_empty() {
            tracing::warn!(
                num_failed = errors.len(),
                "Some servers failed to start: {:?}",
                errors
                    .iter()
                    .map(|(name, _): &(String, Error)| name.as_str())
                    .collect::<Vec<_>>()
            );
            if errors.len() == 1 {
                return Err(errors.remove(0).1);
            }
            let error_msg = errors
                .iter()
                .map(|(name, e)| format!("{}: {}", name, e))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::Other(format!(
                "Multiple servers failed to start: {}",
                error_msg
            )));
        }

        tracing::info!(num_started = ids.len(), "Finished starting auto-start servers");
        Ok(ids)
    }

    /// Stop every running server and wait for the processes to exit
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down McRunner");
        self.controller.shutdown().await;
    }
}
