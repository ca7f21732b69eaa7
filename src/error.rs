/// Error handling module for MC Runner.
///
/// This module defines the error types used throughout the library.
/// Every controller operation returns one of these rather than panicking,
/// so the presentation layer can show a readable message for a single
/// failed server without the manager going down.
///
/// # Example
///
/// ```
/// use mc_runner::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::ServerNotFound(id)) => println!("Server '{}' does not exist", id),
///         Err(Error::BinaryMissing(dir)) => println!("No server jar in {}", dir),
///         Err(Error::AlreadyRunning) => println!("Server is already running"),
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use thiserror::Error;

/// Errors that can occur in the mc-runner library.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to parse configuration from a file or string.
    ///
    /// This error occurs when:
    /// - The configuration file cannot be read
    /// - The configuration JSON is malformed
    /// - Field types are incorrect
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but contains invalid values.
    ///
    /// This error occurs when:
    /// - The java path or stop command is empty
    /// - A capacity or interval is zero
    /// - A new server request has no name, too little RAM or port 0
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Requested server id is not in the catalog.
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// The server already has a supervised process.
    #[error("Already running")]
    AlreadyRunning,

    /// The server has no supervised process.
    #[error("Not running")]
    NotRunning,

    /// No launchable server jar was found in the server directory.
    ///
    /// Downloading the jar is a separate, caller-initiated operation.
    #[error("Server jar not found in {0}. Please download it first.")]
    BinaryMissing(String),

    /// Creation requested a directory that already exists.
    #[error("Server with this name already exists: {0}")]
    NameConflict(String),

    /// The operating system refused to create the server process.
    #[error("Failed to start process: {0}")]
    SpawnFailure(String),

    /// A filesystem operation failed during create or delete.
    #[error("I/O error: {0}")]
    Io(String),

    /// The server catalog could not be read or written.
    ///
    /// This error occurs when:
    /// - The store file is not valid JSON
    /// - The store was written by a newer schema version
    /// - The store file cannot be replaced atomically
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Writing to the server's standard input failed.
    #[error("Communication error: {0}")]
    Communication(String),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for mc-runner operations.
pub type Result<T> = std::result::Result<T, Error>;
