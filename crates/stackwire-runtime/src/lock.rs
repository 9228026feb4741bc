//! Advisory per-topology locks.
//!
//! Only one apply may run against a topology at a time. A second apply
//! fails fast with [`LockError::Held`] instead of waiting.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Errors acquiring a lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("topology '{topology}' is locked by {holder}")]
    Held { topology: String, holder: String },

    #[error("lock I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Held lock. Released on drop.
pub struct LockGuard {
    topology: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(topology: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            topology: topology.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn topology(&self) -> &str {
        &self.topology
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("topology", &self.topology)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Exclusive access to a topology for the duration of an apply.
pub trait DeploymentLock: Send + Sync {
    fn acquire(&self, topology: &str) -> Result<LockGuard, LockError>;
}

/// In-process lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryLock {
    held: Arc<Mutex<BTreeSet<String>>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, topology: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(topology)
    }
}

impl DeploymentLock for MemoryLock {
    fn acquire(&self, topology: &str) -> Result<LockGuard, LockError> {
        let mut held = self
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !held.insert(topology.to_string()) {
            return Err(LockError::Held {
                topology: topology.to_string(),
                holder: "another apply in this process".to_string(),
            });
        }

        let set = Arc::clone(&self.held);
        let name = topology.to_string();
        Ok(LockGuard::new(topology, move || {
            set.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&name);
        }))
    }
}

/// Lock file `<dir>/<topology>.lock`, created exclusively.
///
/// A stale file left by a crashed run must be removed by hand.
#[derive(Debug, Clone)]
pub struct FileLock {
    dir: PathBuf,
}

impl FileLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, topology: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", topology))
    }
}

impl DeploymentLock for FileLock {
    fn acquire(&self, topology: &str) -> Result<LockGuard, LockError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(topology);

        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default();
                return Err(LockError::Held {
                    topology: topology.to_string(),
                    holder: if holder.is_empty() {
                        path.display().to_string()
                    } else {
                        holder
                    },
                });
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(
            file,
            "pid {} since {}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        )?;

        Ok(LockGuard::new(topology, move || {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove lock file");
            }
        }))
    }
}
