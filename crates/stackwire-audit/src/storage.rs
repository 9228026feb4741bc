//! Audit storage backends.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::AuditError;
use crate::event::DeployEvent;
use crate::logger::AuditFilter;

/// Trait for audit storage backends.
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Store an audit event.
    async fn store(&self, event: DeployEvent) -> Result<(), AuditError>;

    /// Query stored events. Backends that cannot read back return nothing.
    async fn query(&self, filter: AuditFilter) -> Result<Vec<DeployEvent>, AuditError>;
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullStorage;

impl NullStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditStorage for NullStorage {
    async fn store(&self, _event: DeployEvent) -> Result<(), AuditError> {
        Ok(())
    }

    async fn query(&self, _filter: AuditFilter) -> Result<Vec<DeployEvent>, AuditError> {
        Ok(vec![])
    }
}

/// Console storage (human-readable lines on stdout).
#[derive(Debug, Default)]
pub struct ConsoleStorage;

impl ConsoleStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditStorage for ConsoleStorage {
    async fn store(&self, event: DeployEvent) -> Result<(), AuditError> {
        println!("{}", event.to_log_line());
        Ok(())
    }

    async fn query(&self, _filter: AuditFilter) -> Result<Vec<DeployEvent>, AuditError> {
        Ok(vec![])
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    events: RwLock<Vec<DeployEvent>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored event.
    pub fn events(&self) -> Vec<DeployEvent> {
        self.events
            .read()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl AuditStorage for MemoryStorage {
    async fn store(&self, event: DeployEvent) -> Result<(), AuditError> {
        let mut events = self.events.write().map_err(|e| {
            AuditError::StorageError(format!("Failed to acquire write lock: {}", e))
        })?;
        events.push(event);
        Ok(())
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<DeployEvent>, AuditError> {
        let events = self.events.read().map_err(|e| {
            AuditError::StorageError(format!("Failed to acquire read lock: {}", e))
        })?;
        Ok(filter.apply(events.iter()))
    }
}

/// Appends events to a JSON Lines file.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Create a file storage, creating parent directories as needed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditStorage for FileStorage {
    async fn store(&self, event: DeployEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string(&event)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<DeployEvent>, AuditError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            events.push(serde_json::from_str::<DeployEvent>(line)?);
        }
        Ok(filter.apply(events.iter()))
    }
}

/// File storage that also echoes to the console.
#[derive(Debug)]
pub struct DualStorage {
    file: FileStorage,
    console: ConsoleStorage,
}

impl DualStorage {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        Ok(Self {
            file: FileStorage::new(path)?,
            console: ConsoleStorage::new(),
        })
    }
}

#[async_trait]
impl AuditStorage for DualStorage {
    async fn store(&self, event: DeployEvent) -> Result<(), AuditError> {
        self.console.store(event.clone()).await?;
        self.file.store(event).await
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<DeployEvent>, AuditError> {
        self.file.query(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DeployEventType;

    #[tokio::test]
    async fn test_console_storage() {
        let storage = ConsoleStorage::new();
        let event = DeployEvent::new(DeployEventType::PlanComputed, "ads");
        storage.store(event).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("audit/deploy.jsonl")).unwrap();

        storage
            .store(
                DeployEvent::builder(DeployEventType::StepApplied, "ads")
                    .node("resource:metrics")
                    .build(),
            )
            .await
            .unwrap();
        storage
            .store(DeployEvent::new(DeployEventType::ApplyCompleted, "ads"))
            .await
            .unwrap();
        storage
            .store(DeployEvent::new(DeployEventType::ApplyCompleted, "other"))
            .await
            .unwrap();

        let content = std::fs::read_to_string(storage.path()).unwrap();
        assert_eq!(content.lines().count(), 3);

        let filter = AuditFilter {
            topology: Some("ads".to_string()),
            ..Default::default()
        };
        let results = storage.query(filter).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].node.as_deref(), Some("resource:metrics"));
    }

    #[tokio::test]
    async fn test_memory_storage_filters_by_type() {
        let storage = MemoryStorage::new();
        storage
            .store(DeployEvent::new(DeployEventType::StepApplied, "ads"))
            .await
            .unwrap();
        storage
            .store(DeployEvent::new(DeployEventType::StepFailed, "ads"))
            .await
            .unwrap();

        let failed = storage
            .query(AuditFilter {
                event_type: Some(DeployEventType::StepFailed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(storage.events().len(), 2);
    }
}
