//! Durable per-profile endpoint allocation.
//!
//! The registry is a YAML mapping from profile name to `{uuid, host, port}`
//! stored in a single file owned by [`EndpointRegistry`]. Every resolution
//! re-reads the file, mutates it and rewrites it; nothing is cached across
//! calls.
//!
//! # Port blocks
//!
//! Each allocation reserves three consecutive ports:
//!
//! ```text
//! port      control endpoint
//! port + 1  pub/sub endpoint
//! port + 2  stats endpoint
//! ```
//!
//! The allocator walks even ports upward from the base and rejects any
//! candidate whose block intersects an existing block.
//!
//! # Concurrency
//!
//! [`EndpointRegistry::resolve`] holds an advisory exclusive lock on a
//! sidecar `<file>.lock` for its read-modify-write. Writers that bypass
//! `resolve` (a manual edit, [`EndpointRegistry::save`] from another tool)
//! or filesystems without `flock` support still race, and the last writer
//! wins.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RegistryConfig;

/// Number of ports reserved per profile.
pub const PORTS_PER_PROFILE: u16 = 3;

/// Distance between allocation candidates.
pub const PORT_STEP: u16 = 2;

/// Persisted record of one profile's endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEndpoint {
    /// Profile name (the registry key; not repeated in the file).
    #[serde(skip)]
    pub profile: String,
    /// Stable identity of the profile, used in watcher names.
    pub uuid: String,
    /// Host the supervisor listens on.
    pub host: String,
    /// Control port; `port + 1` and `port + 2` are reserved alongside it.
    pub port: u16,
}

impl ProfileEndpoint {
    /// Control endpoint, e.g. `tcp://127.0.0.1:6000`.
    #[must_use]
    pub fn control_endpoint(&self) -> String {
        self.endpoint_at(0)
    }

    /// Pub/sub endpoint (`port + 1`).
    #[must_use]
    pub fn pubsub_endpoint(&self) -> String {
        self.endpoint_at(1)
    }

    /// Stats endpoint (`port + 2`).
    #[must_use]
    pub fn stats_endpoint(&self) -> String {
        self.endpoint_at(2)
    }

    /// Whether this endpoint's port block intersects the block at `port`.
    #[must_use]
    pub fn overlaps(&self, port: u16) -> bool {
        blocks_overlap(self.port, port)
    }

    fn endpoint_at(&self, offset: u16) -> String {
        format!("tcp://{}:{}", self.host, u32::from(self.port) + u32::from(offset))
    }
}

fn blocks_overlap(a: u16, b: u16) -> bool {
    a.abs_diff(b) < PORTS_PER_PROFILE
}

/// File-backed registry of profile endpoints.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    path: PathBuf,
    host: String,
    base_port: u16,
    max_port: u16,
}

impl EndpointRegistry {
    /// Creates a registry at `path` allocating on `host` from `base_port`
    /// up to `max_port` inclusive.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, host: impl Into<String>, base_port: u16, max_port: u16) -> Self {
        Self {
            path: path.into(),
            host: host.into(),
            base_port,
            max_port,
        }
    }

    /// Creates a registry from the `[registry]` configuration section.
    #[must_use]
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(
            config.path.clone(),
            config.host.clone(),
            config.base_port,
            config.max_port,
        )
    }

    /// Path of the registry file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads every record.
    ///
    /// A missing or blank file is an empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Corrupt`] if the file exists but cannot be
    /// parsed, or [`RegistryError::Io`] if it cannot be read.
    pub fn load(&self) -> Result<BTreeMap<String, ProfileEndpoint>, RegistryError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "registry file absent, starting empty");
                return Ok(BTreeMap::new());
            },
            Err(e) => return Err(RegistryError::io(&self.path, e)),
        };

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let mut entries: BTreeMap<String, ProfileEndpoint> =
            serde_yaml::from_str(&content).map_err(|e| RegistryError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        for (profile, entry) in &mut entries {
            entry.profile.clone_from(profile);
        }
        Ok(entries)
    }

    /// Overwrites the registry file with `entries`.
    ///
    /// The file is written to a temporary sibling, synced, then renamed into
    /// place so readers never observe a partial document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any filesystem step fails.
    pub fn save(&self, entries: &BTreeMap<String, ProfileEndpoint>) -> Result<(), RegistryError> {
        let yaml = serde_yaml::to_string(entries).map_err(RegistryError::Serialize)?;
        let dir = self.parent_dir()?;

        let mut temp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| RegistryError::io(&dir, e))?;
        temp.write_all(yaml.as_bytes())
            .map_err(|e| RegistryError::io(temp.path(), e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| RegistryError::io(temp.path(), e))?;
        temp.persist(&self.path)
            .map_err(|e| RegistryError::io(&self.path, e.error))?;
        Ok(())
    }

    /// Returns the record for `profile` without allocating.
    ///
    /// # Errors
    ///
    /// Propagates [`EndpointRegistry::load`] failures.
    pub fn get(&self, profile: &str) -> Result<Option<ProfileEndpoint>, RegistryError> {
        Ok(self.load()?.remove(profile))
    }

    /// Every record, ordered by profile name.
    ///
    /// # Errors
    ///
    /// Propagates [`EndpointRegistry::load`] failures.
    pub fn profiles(&self) -> Result<Vec<ProfileEndpoint>, RegistryError> {
        Ok(self.load()?.into_values().collect())
    }

    /// Returns the record for `profile`, allocating and persisting one if
    /// the profile is unknown.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidProfile`] for an empty name
    /// - [`RegistryError::Corrupt`] if the existing file cannot be parsed
    /// - [`RegistryError::PortExhausted`] if no block fits below `max_port`
    /// - [`RegistryError::Io`] on filesystem failures
    pub fn resolve(&self, profile: &str) -> Result<ProfileEndpoint, RegistryError> {
        if profile.trim().is_empty() {
            return Err(RegistryError::InvalidProfile(profile.to_string()));
        }

        let _lock = self.lock()?;
        let mut entries = self.load()?;
        if let Some(existing) = entries.get(profile) {
            debug!(profile, port = existing.port, "resolved existing endpoint");
            return Ok(existing.clone());
        }

        let port = self.allocate_port(&entries)?;
        let endpoint = ProfileEndpoint {
            profile: profile.to_string(),
            uuid: uuid::Uuid::new_v4().to_string(),
            host: self.host.clone(),
            port,
        };
        entries.insert(profile.to_string(), endpoint.clone());
        self.save(&entries)?;

        info!(profile, port, uuid = %endpoint.uuid, "allocated endpoint");
        Ok(endpoint)
    }

    /// Lowest free port for a new block.
    fn allocate_port(&self, entries: &BTreeMap<String, ProfileEndpoint>) -> Result<u16, RegistryError> {
        let mut candidate = self.base_port;
        while candidate <= self.max_port {
            if !entries.values().any(|entry| entry.overlaps(candidate)) {
                return Ok(candidate);
            }
            match candidate.checked_add(PORT_STEP) {
                Some(next) => candidate = next,
                None => break,
            }
        }
        Err(RegistryError::PortExhausted {
            base: self.base_port,
            limit: self.max_port,
        })
    }

    fn parent_dir(&self) -> Result<PathBuf, RegistryError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| RegistryError::io(&dir, e))?;
        Ok(dir)
    }

    /// Takes the advisory lock; released when the returned handle drops.
    fn lock(&self) -> Result<RegistryLock, RegistryError> {
        self.parent_dir()?;
        let mut lock_path = self.path.clone().into_os_string();
        lock_path.push(".lock");
        let lock_path = PathBuf::from(lock_path);

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| RegistryError::io(&lock_path, e))?;
        FileExt::lock_exclusive(&file)
            .map_err(|e| RegistryError::io(&lock_path, e))?;
        Ok(RegistryLock { file })
    }
}

struct RegistryLock {
    file: File,
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The registry file exists but is not a valid registry document.
    #[error("profile registry {} is corrupt ({reason}); fix or remove it by hand", path.display())]
    Corrupt {
        /// Registry file path.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// Every candidate block in the configured range is taken.
    #[error("no free port block between {base} and {limit}")]
    PortExhausted {
        /// First candidate port.
        base: u16,
        /// Last candidate port.
        limit: u16,
    },

    /// Profile names must be non-empty.
    #[error("invalid profile name: {0:?}")]
    InvalidProfile(String),

    /// Filesystem failure.
    #[error("registry I/O error on {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization failure.
    #[error("failed to serialize registry: {0}")]
    Serialize(#[source] serde_yaml::Error),
}

impl RegistryError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
