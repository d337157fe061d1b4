//! Persistence collaborator.
//!
//! The engine talks to storage through [`TopologyStore`], an explicitly
//! constructed handle with plain async request/response calls.
//! [`JsonFileStore`] keeps everything in one JSON document on disk;
//! [`MemoryStore`] is used by tests and can simulate a slow bootstrap or
//! failing writes.

use crate::error::{Result, TopologyError};
use crate::snapshot::{MetadataNamespace, NetworkStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use topo_types::EntityKind;
use tracing::warn;

#[async_trait]
pub trait TopologyStore: Send + Sync {
    /// Returns the persisted snapshot.
    ///
    /// `Ok(None)` means the store is still bootstrapping and the caller may
    /// ask again later. A store with nothing persisted yet answers with an
    /// empty snapshot.
    async fn get_snapshot(&self) -> Result<Option<NetworkStatus>>;

    async fn save_snapshot(&self, snapshot: &NetworkStatus) -> Result<()>;

    async fn get_metadata(&self, kind: EntityKind) -> Result<MetadataNamespace>;

    async fn save_metadata(&self, kind: EntityKind, namespace: &MetadataNamespace) -> Result<()>;
}

/// On-disk document layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub snapshot: Option<NetworkStatus>,
    /// Keyed by plural class label (`switches`, `interfaces`, `links`).
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataNamespace>,
}

/// Single-file JSON store.
///
/// Writes go to a temporary sibling first and are renamed into place, so
/// a crash mid-write never leaves a truncated document behind.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where an unparseable state file is moved on load.
    pub fn quarantine_path(&self) -> PathBuf {
        self.path.with_extension("json.corrupt")
    }

    async fn read_content(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TopologyError::persistence(format!(
                "Failed to read state file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn parse_document(&self, content: &str) -> Result<StoreDocument> {
        serde_json::from_str(content).map_err(|e| {
            TopologyError::persistence(format!(
                "Failed to parse state file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    async fn read_document(&self) -> Result<StoreDocument> {
        match self.read_content().await? {
            Some(content) => self.parse_document(&content),
            None => Ok(StoreDocument::default()),
        }
    }

    /// Moves the state file aside so later writes start a fresh document
    /// and the unreadable one is kept for inspection.
    async fn quarantine(&self) -> Result<PathBuf> {
        let _guard = self.write_lock.lock().await;
        let target = self.quarantine_path();
        tokio::fs::rename(&self.path, &target).await.map_err(|e| {
            TopologyError::persistence(format!(
                "Failed to move aside state file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(target)
    }

    async fn write_document(&self, document: &StoreDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    TopologyError::persistence(format!(
                        "Failed to create state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let json = serde_json::to_string_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(|e| {
            TopologyError::persistence(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            TopologyError::persistence(format!(
                "Failed to replace state file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    async fn update_document(&self, f: impl FnOnce(&mut StoreDocument) + Send) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_document().await?;
        f(&mut document);
        self.write_document(&document).await
    }
}

#[async_trait]
impl TopologyStore for JsonFileStore {
    async fn get_snapshot(&self) -> Result<Option<NetworkStatus>> {
        let Some(content) = self.read_content().await? else {
            return Ok(Some(NetworkStatus::default()));
        };
        match self.parse_document(&content) {
            Ok(document) => Ok(Some(document.snapshot.unwrap_or_default())),
            Err(e) => {
                let moved = self.quarantine().await?;
                warn!(
                    path = %self.path.display(),
                    moved_to = %moved.display(),
                    "Unreadable state file moved aside"
                );
                Err(e)
            }
        }
    }

    async fn save_snapshot(&self, snapshot: &NetworkStatus) -> Result<()> {
        let snapshot = snapshot.clone();
        self.update_document(move |doc| doc.snapshot = Some(snapshot))
            .await
    }

    async fn get_metadata(&self, kind: EntityKind) -> Result<MetadataNamespace> {
        let mut document = self.read_document().await?;
        Ok(document.metadata.remove(kind.plural()).unwrap_or_default())
    }

    async fn save_metadata(&self, kind: EntityKind, namespace: &MetadataNamespace) -> Result<()> {
        let namespace = namespace.clone();
        self.update_document(move |doc| {
            doc.metadata.insert(kind.plural().to_string(), namespace);
        })
        .await
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    snapshot: Option<NetworkStatus>,
    metadata: BTreeMap<EntityKind, MetadataNamespace>,
    not_ready_reads: u32,
    snapshot_reads: u32,
    fail_saves: bool,
    saved: Vec<NetworkStatus>,
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with `snapshot`.
    pub fn with_snapshot(snapshot: NetworkStatus) -> Self {
        let store = Self::new();
        store.state.lock().snapshot = Some(snapshot);
        store
    }

    /// Store pre-loaded with one metadata namespace.
    pub fn with_metadata(self, kind: EntityKind, namespace: MetadataNamespace) -> Self {
        self.state.lock().metadata.insert(kind, namespace);
        self
    }

    /// Answers "not ready" to the first `reads` snapshot requests.
    pub fn available_after(self, reads: u32) -> Self {
        self.state.lock().not_ready_reads = reads;
        self
    }

    pub fn fail_saves(&self, fail: bool) {
        self.state.lock().fail_saves = fail;
    }

    /// Number of snapshot requests seen so far.
    pub fn snapshot_reads(&self) -> u32 {
        self.state.lock().snapshot_reads
    }

    /// Every snapshot written, oldest first.
    pub fn saved_snapshots(&self) -> Vec<NetworkStatus> {
        self.state.lock().saved.clone()
    }

    pub fn last_snapshot(&self) -> Option<NetworkStatus> {
        self.state.lock().snapshot.clone()
    }

    pub fn metadata(&self, kind: EntityKind) -> MetadataNamespace {
        self.state
            .lock()
            .metadata
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TopologyStore for MemoryStore {
    async fn get_snapshot(&self) -> Result<Option<NetworkStatus>> {
        let mut state = self.state.lock();
        state.snapshot_reads += 1;
        if state.snapshot_reads <= state.not_ready_reads {
            return Ok(None);
        }
        Ok(Some(state.snapshot.clone().unwrap_or_default()))
    }

    async fn save_snapshot(&self, snapshot: &NetworkStatus) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_saves {
            return Err(TopologyError::persistence("save rejected"));
        }
        state.snapshot = Some(snapshot.clone());
        state.saved.push(snapshot.clone());
        Ok(())
    }

    async fn get_metadata(&self, kind: EntityKind) -> Result<MetadataNamespace> {
        Ok(self.metadata(kind))
    }

    async fn save_metadata(&self, kind: EntityKind, namespace: &MetadataNamespace) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_saves {
            return Err(TopologyError::persistence("save rejected"));
        }
        state.metadata.insert(kind, namespace.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SwitchRecord;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use topo_types::Metadata;

    fn snapshot_with_switch(id: &str) -> NetworkStatus {
        let mut snapshot = NetworkStatus::default();
        snapshot.switches.insert(
            id.to_string(),
            SwitchRecord {
                enabled: true,
                ..Default::default()
            },
        );
        snapshot
    }

    #[tokio::test]
    async fn test_json_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("topology.json"));
        assert_eq!(store.get_snapshot().await.unwrap(), Some(NetworkStatus::default()));
        assert!(store.get_metadata(EntityKind::Link).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_store_persists_snapshot_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("topology.json");
        let store = JsonFileStore::new(&path);

        store.save_snapshot(&snapshot_with_switch("A")).await.unwrap();
        let mut namespace = MetadataNamespace::new();
        namespace.insert("A".into(), Metadata::from_iter([("k".to_string(), json!("v"))]));
        store.save_metadata(EntityKind::Switch, &namespace).await.unwrap();

        let reopened = JsonFileStore::new(&path);
        let snapshot = reopened.get_snapshot().await.unwrap().unwrap();
        assert!(snapshot.switches["A"].enabled);
        assert_eq!(reopened.get_metadata(EntityKind::Switch).await.unwrap(), namespace);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_json_store_moves_corrupt_file_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileStore::new(&path);

        let err = store.get_snapshot().await.unwrap_err();
        assert!(matches!(err, TopologyError::Persistence(_)));
        assert!(!path.exists());
        assert_eq!(std::fs::read_to_string(store.quarantine_path()).unwrap(), "{not json");

        store.save_snapshot(&snapshot_with_switch("A")).await.unwrap();
        let snapshot = store.get_snapshot().await.unwrap().unwrap();
        assert!(snapshot.switches["A"].enabled);
        assert_eq!(std::fs::read_to_string(store.quarantine_path()).unwrap(), "{not json");
    }

    #[tokio::test]
    async fn test_memory_store_bootstrap_delay() {
        let store = MemoryStore::with_snapshot(snapshot_with_switch("A")).available_after(2);
        assert_eq!(store.get_snapshot().await.unwrap(), None);
        assert_eq!(store.get_snapshot().await.unwrap(), None);
        assert!(store.get_snapshot().await.unwrap().is_some());
        assert_eq!(store.snapshot_reads(), 3);
    }

    #[tokio::test]
    async fn test_memory_store_save_failure() {
        let store = MemoryStore::new();
        store.fail_saves(true);
        assert!(store.save_snapshot(&NetworkStatus::default()).await.is_err());
        assert!(store.saved_snapshots().is_empty());
    }
}
