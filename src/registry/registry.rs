use super::record::{ModelKind, ModelPurpose, ModelRecord};
use super::store::RecordStore;
use crate::error::{AgentError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Catalog of known models and the active-model pointer
///
/// Every mutation happens under one write lock and is persisted before the
/// lock is released, so readers never observe a partial update and the store
/// sees mutations in commit order. A failed save rolls the in-memory change
/// back.
pub struct ModelRegistry {
    records: RwLock<BTreeMap<String, ModelRecord>>,
    store: Arc<dyn RecordStore>,
}

impl ModelRegistry {
    /// Loads the persisted records. Legacy role tags are upgraded and a
    /// registry with several active records keeps only the newest.
    pub fn open(store: Arc<dyn RecordStore>) -> Result<Self> {
        let mut records = BTreeMap::new();
        for mut record in store.load()? {
            record.upgrade_legacy_role();
            records.insert(record.id.clone(), record);
        }

        let active: Vec<String> = records
            .values()
            .filter(|r| r.is_active)
            .map(|r| r.id.clone())
            .collect();
        if active.len() > 1 {
            warn!(active = ?active, "Multiple active models in store, keeping the newest");
            let keep = records
                .values()
                .filter(|r| r.is_active)
                .max_by_key(|r| r.created_at)
                .map(|r| r.id.clone());
            for record in records.values_mut() {
                record.is_active = Some(&record.id) == keep.as_ref();
            }
        }

        debug!(count = records.len(), "Model registry opened");
        Ok(Self {
            records: RwLock::new(records),
            store,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, ModelRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ModelRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, records: &BTreeMap<String, ModelRecord>) -> Result<()> {
        let snapshot: Vec<ModelRecord> = records.values().cloned().collect();
        self.store.save(&snapshot)
    }

    /// All records, oldest first
    pub fn list(&self) -> Vec<ModelRecord> {
        let mut records: Vec<ModelRecord> = self.read().values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub fn get(&self, id: &str) -> Option<ModelRecord> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn get_active(&self) -> Option<ModelRecord> {
        self.read().values().find(|r| r.is_active).cloned()
    }

    /// The active record, unless its purpose is `excluded`
    pub fn get_active_excluding(&self, excluded: ModelPurpose) -> Option<ModelRecord> {
        self.get_active().filter(|r| r.purpose != excluded)
    }

    /// The reserved intent model, if one is registered
    pub fn get_system_model(&self) -> Option<ModelRecord> {
        self.read()
            .values()
            .find(|r| r.purpose == ModelPurpose::SystemIntent)
            .cloned()
    }

    /// Makes `id` the only active record. Returns `false` and changes nothing
    /// when the id is unknown.
    pub fn set_active(&self, id: &str) -> Result<bool> {
        let mut records = self.write();
        if !records.contains_key(id) {
            debug!(model_id = id, "set_active on unknown model");
            return Ok(false);
        }

        let previous: Vec<(String, bool)> = records
            .values()
            .map(|r| (r.id.clone(), r.is_active))
            .collect();
        for record in records.values_mut() {
            record.is_active = record.id == id;
        }

        if let Err(e) = self.persist(&records) {
            for (rid, was_active) in previous {
                if let Some(record) = records.get_mut(&rid) {
                    record.is_active = was_active;
                }
            }
            return Err(e);
        }

        info!(model_id = id, "Active model changed");
        Ok(true)
    }

    /// Adds a record. An existing id is returned unchanged and nothing is
    /// overwritten.
    pub fn register(&self, record: ModelRecord) -> Result<ModelRecord> {
        let mut records = self.write();
        if let Some(existing) = records.get(&record.id) {
            debug!(model_id = %record.id, "Model already registered");
            return Ok(existing.clone());
        }

        let mut record = record;
        record.upgrade_legacy_role();
        if record.created_at == 0 {
            record.created_at = chrono::Utc::now().timestamp();
        }

        let previous_active: Option<String> = if record.is_active {
            let prev = records.values().find(|r| r.is_active).map(|r| r.id.clone());
            for other in records.values_mut() {
                other.is_active = false;
            }
            prev
        } else {
            None
        };

        let id = record.id.clone();
        records.insert(id.clone(), record.clone());

        if let Err(e) = self.persist(&records) {
            records.remove(&id);
            if let Some(prev) = previous_active {
                if let Some(record) = records.get_mut(&prev) {
                    record.is_active = true;
                }
            }
            return Err(e);
        }

        info!(model_id = %id, kind = ?record.kind, "Model registered");
        Ok(record)
    }

    /// Deletes a record and, for local models, its artifact
    ///
    /// Returns `Ok(false)` for an unknown id.
    ///
    /// # Errors
    ///
    /// `InvalidState` for base models, which are left untouched.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let record = match self.get(id) {
            Some(record) => record,
            None => return Ok(false),
        };
        if record.is_base_model {
            return Err(AgentError::invalid_state(format!(
                "cannot remove base model {}",
                id
            )));
        }

        // pulled models own a directory holding the artifact and its tokenizer
        let owned_dir = record
            .metadata
            .get("artifact_dir")
            .filter(|_| record.kind == ModelKind::Local)
            .map(PathBuf::from);
        if let Some(path) = owned_dir.or_else(|| record.artifact_path()) {
            remove_artifact(&path)?;
        }

        let mut records = self.write();
        let removed = match records.remove(id) {
            Some(removed) => removed,
            None => return Ok(false),
        };
        if let Err(e) = self.persist(&records) {
            records.insert(id.to_string(), removed);
            return Err(e);
        }

        info!(model_id = id, "Model removed");
        Ok(true)
    }
}

fn remove_artifact(path: &Path) -> Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => {
            debug!(path = %path.display(), "Artifact deleted");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::store::MemoryStore;
    use tempfile::TempDir;

    fn registry_with(records: Vec<ModelRecord>) -> (ModelRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_records(records));
        (ModelRegistry::open(store.clone()).unwrap(), store)
    }

    #[test]
    fn test_set_active_unknown_changes_nothing() {
        let (registry, store) = registry_with(vec![ModelRecord::local("m1", "M1", "/m1")]);

        assert!(!registry.set_active("missing").unwrap());
        assert!(!registry.get("m1").unwrap().is_active);
        assert!(registry.get_active().is_none());
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn test_set_active_switches() {
        let (registry, store) = registry_with(vec![
            ModelRecord::local("a", "A", "/a"),
            ModelRecord::local("b", "B", "/b"),
        ]);

        assert!(registry.set_active("a").unwrap());
        assert!(registry.set_active("b").unwrap());
        assert_eq!(registry.get_active().unwrap().id, "b");
        assert_eq!(registry.list().iter().filter(|r| r.is_active).count(), 1);

        let persisted = store.load().unwrap();
        assert_eq!(persisted.iter().filter(|r| r.is_active).count(), 1);
    }

    #[test]
    fn test_register_is_idempotent() {
        let (registry, _) = registry_with(vec![]);
        let first = registry
            .register(ModelRecord::local("a", "Original", "/a"))
            .unwrap();
        let second = registry
            .register(ModelRecord::local("a", "Replacement", "/other"))
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.get("a").unwrap().name, "Original");
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_register_active_record_keeps_single_active() {
        let (registry, _) = registry_with(vec![ModelRecord::local("a", "A", "/a")]);
        registry.set_active("a").unwrap();

        let mut b = ModelRecord::local("b", "B", "/b");
        b.is_active = true;
        registry.register(b).unwrap();

        assert_eq!(registry.get_active().unwrap().id, "b");
        assert!(!registry.get("a").unwrap().is_active);
    }

    #[test]
    fn test_active_excluding_system_intent() {
        let (registry, _) = registry_with(vec![
            ModelRecord::local("intent", "Intent", "/i").with_purpose(ModelPurpose::SystemIntent),
            ModelRecord::local("chat", "Chat", "/c"),
        ]);

        registry.set_active("intent").unwrap();
        assert!(registry
            .get_active_excluding(ModelPurpose::SystemIntent)
            .is_none());
        assert_eq!(registry.get_system_model().unwrap().id, "intent");

        registry.set_active("chat").unwrap();
        assert_eq!(
            registry
                .get_active_excluding(ModelPurpose::SystemIntent)
                .unwrap()
                .id,
            "chat"
        );
    }

    #[test]
    fn test_remove_base_model_is_invalid_state() {
        let (registry, _) = registry_with(vec![ModelRecord::local("base", "Base", "/b").base()]);

        let err = registry.remove("base").unwrap_err();
        assert!(matches!(err, AgentError::InvalidState(_)));
        assert!(registry.get("base").is_some());
    }

    #[test]
    fn test_remove_deletes_artifact() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("m.gguf");
        fs::write(&artifact, b"weights").unwrap();

        let (registry, _) = registry_with(vec![ModelRecord::local("m", "M", &artifact)]);
        assert!(registry.remove("m").unwrap());
        assert!(!artifact.exists());
        assert!(registry.get("m").is_none());
        assert!(!registry.remove("m").unwrap());
    }

    #[test]
    fn test_remove_deletes_owned_directory() {
        let dir = TempDir::new().unwrap();
        let model_dir = dir.path().join("phi3");
        fs::create_dir_all(&model_dir).unwrap();
        let artifact = model_dir.join("phi3.gguf");
        fs::write(&artifact, b"weights").unwrap();
        fs::write(model_dir.join("tokenizer.json"), b"{}").unwrap();

        let record = ModelRecord::local("phi3", "Phi", &artifact)
            .with_metadata("artifact_dir", model_dir.display().to_string());
        let (registry, _) = registry_with(vec![record]);

        assert!(registry.remove("phi3").unwrap());
        assert!(!model_dir.exists());
    }

    #[test]
    fn test_remove_cloud_record_touches_no_files() {
        let (registry, _) = registry_with(vec![ModelRecord::cloud(
            "gpt",
            "gpt-4o",
            "openai",
            "https://api.openai.com/v1",
        )]);
        assert!(registry.remove("gpt").unwrap());
    }

    #[test]
    fn test_open_repairs_multiple_active() {
        let mut a = ModelRecord::local("a", "A", "/a");
        a.is_active = true;
        a.created_at = 10;
        let mut b = ModelRecord::local("b", "B", "/b");
        b.is_active = true;
        b.created_at = 20;

        let (registry, _) = registry_with(vec![a, b]);
        assert_eq!(registry.get_active().unwrap().id, "b");
        assert_eq!(registry.list().iter().filter(|r| r.is_active).count(), 1);
    }

    struct FailingStore;

    impl RecordStore for FailingStore {
        fn load(&self) -> Result<Vec<ModelRecord>> {
            let mut a = ModelRecord::local("a", "A", "/a");
            a.is_active = true;
            Ok(vec![a, ModelRecord::local("b", "B", "/b")])
        }

        fn save(&self, _records: &[ModelRecord]) -> Result<()> {
            Err(AgentError::storage("disk full"))
        }
    }

    #[test]
    fn test_failed_save_rolls_back() {
        let registry = ModelRegistry::open(Arc::new(FailingStore)).unwrap();

        assert!(registry.set_active("b").is_err());
        assert_eq!(registry.get_active().unwrap().id, "a");

        assert!(registry.register(ModelRecord::local("c", "C", "/c")).is_err());
        assert!(registry.get("c").is_none());
    }
}
