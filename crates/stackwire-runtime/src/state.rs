//! Persisted topology state.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use stackwire_core::Topology;

/// Errors from a state store.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not valid: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("state belongs to topology '{found}', expected '{expected}'")]
    Mismatch { expected: String, found: String },
}

/// Durable store of the last known topology per stack.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// The saved topology for `name`, if any.
    async fn load(&self, name: &str) -> Result<Option<Topology>, StateError>;

    async fn save(&self, topology: &Topology) -> Result<(), StateError>;
}

/// Keeps topologies in memory. State is lost with the process.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    topologies: RwLock<BTreeMap<String, Topology>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, name: &str) -> Result<Option<Topology>, StateError> {
        let topologies = self
            .topologies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(topologies.get(name).cloned())
    }

    async fn save(&self, topology: &Topology) -> Result<(), StateError> {
        let mut topologies = self
            .topologies
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        topologies.insert(topology.name.clone(), topology.clone());
        Ok(())
    }
}

/// Stores one topology as pretty JSON in a single file.
///
/// Writes go to a sibling temporary file first and are renamed into place,
/// so an interrupted save leaves the previous state readable.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a state file without a name check.
    pub fn read(path: impl AsRef<Path>) -> Result<Topology, StateError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, name: &str) -> Result<Option<Topology>, StateError> {
        let topology = match Self::read(&self.path) {
            Ok(topology) => topology,
            Err(StateError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if topology.name != name {
            return Err(StateError::Mismatch {
                expected: name.to_string(),
                found: topology.name,
            });
        }
        Ok(Some(topology))
    }

    async fn save(&self, topology: &Topology) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(topology)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), "State saved");
        Ok(())
    }
}
