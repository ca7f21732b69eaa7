//! Persisted collection of server definitions.
//!
//! The catalog is the single source of truth for server configuration. The
//! store is one JSON document:
//!
//! ```json
//! { "schemaVersion": 1, "servers": [ { "id": "...", "name": "...", ... } ] }
//! ```
//!
//! Every mutation rewrites the whole document through a temporary sibling
//! file followed by a rename, so readers never observe a partial write.

use crate::error::{Error, Result};
use crate::server::{ServerDefinition, ServerId, ServerStatus};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Schema version written by this crate
pub const CATALOG_SCHEMA_VERSION: u32 = 1;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCatalog {
    // Stores written before versioning have no field and read as 0
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    servers: Vec<serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredCatalogRef<'a> {
    schema_version: u32,
    servers: &'a [ServerDefinition],
}

/// Persisted server definitions
#[derive(Debug)]
pub struct ServerCatalog {
    path: PathBuf,
    servers: Vec<ServerDefinition>,
}

impl ServerCatalog {
    /// An empty catalog that will persist to `path`
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            servers: Vec::new(),
        }
    }

    /// Reads all persisted definitions.
    ///
    /// Each definition's directory is probed: status becomes `missing` if it is
    /// absent and `offline` otherwise. Entries that fail to decode, and
    /// duplicates of an id already read, are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] if the store exists but is not a JSON
    /// catalog, or was written by a newer schema version.
    #[tracing::instrument(skip(path), fields(catalog_path = ?path.as_ref()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No catalog store yet, starting empty");
                return Ok(Self::empty(path));
            }
            Err(e) => {
                return Err(Error::Catalog(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let stored: StoredCatalog = serde_json::from_str(&content)
            .map_err(|e| Error::Catalog(format!("Failed to parse {}: {}", path.display(), e)))?;

        if stored.schema_version > CATALOG_SCHEMA_VERSION {
            return Err(Error::Catalog(format!(
                "{} uses schema version {}, newest supported is {}",
                path.display(),
                stored.schema_version,
                CATALOG_SCHEMA_VERSION
            )));
        }

        let mut servers: Vec<ServerDefinition> = Vec::with_capacity(stored.servers.len());
        for (index, value) in stored.servers.into_iter().enumerate() {
            let mut definition: ServerDefinition = match serde_json::from_value(value) {
                Ok(definition) => definition,
                Err(e) => {
                    tracing::warn!(index, error = %e, "Skipping malformed server definition");
                    continue;
                }
            };

            if servers.iter().any(|s| s.id == definition.id) {
                tracing::warn!(server_id = %definition.id, "Skipping duplicate server definition");
                continue;
            }

            definition.status = if definition.directory_path.is_dir() {
                ServerStatus::Offline
            } else {
                tracing::warn!(
                    server_id = %definition.id,
                    directory = %definition.directory_path.display(),
                    "Server directory is missing"
                );
                ServerStatus::Missing
            };
            servers.push(definition);
        }

        tracing::info!(num_servers = servers.len(), "Loaded server catalog");
        Ok(Self { path, servers })
    }

    /// Path of the store file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All definitions in storage order
    pub fn list(&self) -> Vec<ServerDefinition> {
        self.servers.clone()
    }

    pub fn get(&self, id: ServerId) -> Option<&ServerDefinition> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: ServerId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Inserts or replaces by id and persists the full set.
    ///
    /// The in-memory set only changes once the store was written.
    pub fn upsert(&mut self, definition: ServerDefinition) -> Result<()> {
        let mut next = self.servers.clone();
        match next.iter_mut().find(|s| s.id == definition.id) {
            Some(existing) => *existing = definition,
            None => next.push(definition),
        }
        self.write(&next)?;
        self.servers = next;
        Ok(())
    }

    /// Deletes by id; no-op if absent.
    pub fn remove(&mut self, id: ServerId) -> Result<Option<ServerDefinition>> {
        let Some(index) = self.servers.iter().position(|s| s.id == id) else {
            return Ok(None);
        };

        let mut next = self.servers.clone();
        let removed = next.remove(index);
        self.write(&next)?;
        self.servers = next;
        Ok(Some(removed))
    }

    /// Applies `change` to one definition and persists. Returns the updated copy.
    pub(crate) fn modify(
        &mut self,
        id: ServerId,
        change: impl FnOnce(&mut ServerDefinition),
    ) -> Result<ServerDefinition> {
        let mut definition = self
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ServerNotFound(id.to_string()))?;
        change(&mut definition);
        self.upsert(definition.clone())?;
        Ok(definition)
    }

    /// Mutates one definition in memory, then persists.
    ///
    /// Used for runtime bookkeeping (status, last start) where memory must
    /// follow the transition even if the store cannot be written. Only
    /// [`Error::ServerNotFound`] means nothing changed.
    pub(crate) fn update_in_place(
        &mut self,
        id: ServerId,
        change: impl FnOnce(&mut ServerDefinition),
    ) -> Result<()> {
        let definition = self
            .servers
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::ServerNotFound(id.to_string()))?;
        change(definition);
        self.write(&self.servers)
    }

    /// The definition owning `directory`, if any
    pub fn find_by_directory(&self, directory: &Path) -> Option<&ServerDefinition> {
        self.servers.iter().find(|s| s.directory_path == directory)
    }

    fn write(&self, servers: &[ServerDefinition]) -> Result<()> {
        let document = StoredCatalogRef {
            schema_version: CATALOG_SCHEMA_VERSION,
            servers,
        };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| Error::Catalog(format!("Failed to serialize catalog: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Catalog(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        std::fs::write(&temp_path, json)
            .map_err(|e| Error::Catalog(format!("Failed to write {}: {}", temp_path.display(), e)))?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| {
            Error::Catalog(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;

        tracing::debug!(num_servers = servers.len(), "Persisted server catalog");
        Ok(())
    }
}
