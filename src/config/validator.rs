use crate::config::{ManagerConfig, NewServerConfig};
use crate::error::{Error, Result};

/// Smallest heap the launch command will be built with.
pub const MIN_RAM_MEGABYTES: u32 = 512;

/// Validates a new server request
pub fn validate_new_server(config: &NewServerConfig) -> Result<()> {
    if config.name.trim().is_empty() {
        return Err(Error::ConfigInvalid("Server name is empty".to_string()));
    }

    if config.version.trim().is_empty() {
        return Err(Error::ConfigInvalid(format!(
            "Server '{}' has no version",
            config.name
        )));
    }

    if config.ram_megabytes < MIN_RAM_MEGABYTES {
        return Err(Error::ConfigInvalid(format!(
            "Server '{}' needs at least {} MB of RAM, got {}",
            config.name, MIN_RAM_MEGABYTES, config.ram_megabytes
        )));
    }

    if config.port == 0 {
        return Err(Error::ConfigInvalid(format!(
            "Server '{}' has port 0",
            config.name
        )));
    }

    Ok(())
}

/// Full configuration validation
pub fn validate_config(config: &ManagerConfig) -> Result<()> {
    if config.java_path.trim().is_empty() {
        return Err(Error::ConfigInvalid("javaPath is empty".to_string()));
    }

    if config.stop_command.trim().is_empty() {
        return Err(Error::ConfigInvalid("stopCommand is empty".to_string()));
    }

    if config.log_capacity == 0 {
        return Err(Error::ConfigInvalid(
            "logCapacity must be at least 1".to_string(),
        ));
    }

    if config.stats_interval_ms == 0 {
        return Err(Error::ConfigInvalid(
            "statsIntervalMs must be greater than zero".to_string(),
        ));
    }

    for (server_type, marker) in &config.ready_markers {
        if marker.completion_token.is_empty() || marker.help_token.is_empty() {
            return Err(Error::ConfigInvalid(format!(
                "Ready marker for '{}' has an empty token",
                server_type
            )));
        }
    }

    Ok(())
}
