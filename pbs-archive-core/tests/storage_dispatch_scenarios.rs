//! Integration scenarios for the storage dispatcher (spec.md §8 scenarios
//! 5 and 6): rename collision and max-storage-size pruning, driven through
//! the real dispatcher loop against in-memory fakes.

use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use anyhow::Error;

use pbs_archive_core::external::{IndexBackend, IndexedStorage, StorageBackend, StorageHandle, StorageState};
use pbs_archive_core::job::{ArchiveFileMode, JobOptions};
use pbs_archive_core::message::StorageMessage;
use pbs_archive_core::storage_dispatch::{run_dispatcher, StorageDispatcherContext, TempFileSpace};

struct FakeHandle {
    buf: Vec<u8>,
}

impl Write for FakeHandle {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StorageHandle for FakeHandle {
    fn size(&self) -> Result<u64, Error> {
        Ok(self.buf.len() as u64)
    }
}

#[derive(Default)]
struct FakeBackend {
    existing: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<String>>,
}

impl StorageBackend for FakeBackend {
    fn exists(&self, name: &str) -> Result<bool, Error> {
        Ok(self.existing.lock().unwrap().contains(name))
    }
    fn pre_process(&self, _name: &str, _created: i64, _initial: bool) -> Result<(), Error> {
        Ok(())
    }
    fn post_process(&self, _name: &str, _created: i64, _final_flag: bool) -> Result<(), Error> {
        Ok(())
    }
    fn create(&self, name: &str, _size: u64, _force: bool) -> Result<Box<dyn StorageHandle>, Error> {
        self.existing.lock().unwrap().insert(name.to_string());
        Ok(Box::new(FakeHandle { buf: Vec::new() }))
    }
    fn delete(&self, name: &str) -> Result<(), Error> {
        self.existing.lock().unwrap().remove(name);
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }
    fn prune_directories(&self, _name: &str) -> Result<(), Error> {
        Ok(())
    }
    fn is_paused(&self) -> bool {
        false
    }
    fn is_aborted(&self) -> bool {
        false
    }
}

#[derive(Default)]
struct FakeIndex {
    storages: Mutex<Vec<IndexedStorage>>,
    purged: Mutex<Vec<String>>,
    assigned: Mutex<Vec<(String, String)>>,
}

impl IndexBackend for FakeIndex {
    fn find_or_create_uuid(&self, _job_uuid: &str) -> Result<String, Error> {
        Ok("uuid-1".into())
    }
    fn new_entity(&self, _uuid_id: &str, _created: i64) -> Result<String, Error> {
        Ok("entity-1".into())
    }
    fn unlock_entity(&self, _entity_id: &str) -> Result<(), Error> {
        Ok(())
    }
    fn delete_entity(&self, _entity_id: &str) -> Result<(), Error> {
        Ok(())
    }
    fn prune_entity_if_empty(&self, _entity_id: &str) -> Result<(), Error> {
        Ok(())
    }
    fn list_storages_for_uuid(&self, _uuid_id: &str) -> Result<Vec<IndexedStorage>, Error> {
        Ok(self.storages.lock().unwrap().clone())
    }
    fn find_storage_by_name(&self, _uuid_id: &str, name: &str) -> Result<Option<IndexedStorage>, Error> {
        Ok(self
            .storages
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.name == name)
            .cloned())
    }
    fn new_storage(&self, entity_id: &str, name: &str, size: u64, created: i64) -> Result<String, Error> {
        let id = format!("storage-{name}");
        self.storages.lock().unwrap().push(IndexedStorage {
            storage_id: id.clone(),
            entity_id: entity_id.to_string(),
            name: name.to_string(),
            size,
            created,
            state: StorageState::UpdateRequested,
        });
        Ok(id)
    }
    fn assign_entity_to_storage(&self, storage_id: &str, entity_id: &str) -> Result<(), Error> {
        self.assigned
            .lock()
            .unwrap()
            .push((storage_id.to_string(), entity_id.to_string()));
        let mut storages = self.storages.lock().unwrap();
        if let Some(s) = storages.iter_mut().find(|s| s.storage_id == storage_id) {
            s.entity_id = entity_id.to_string();
        }
        Ok(())
    }
    fn set_storage_state(&self, storage_id: &str, state: StorageState, _checked: i64) -> Result<(), Error> {
        let mut storages = self.storages.lock().unwrap();
        if let Some(s) = storages.iter_mut().find(|s| s.storage_id == storage_id) {
            s.state = state;
        }
        Ok(())
    }
    fn update_storage_size(&self, storage_id: &str, size: u64) -> Result<(), Error> {
        let mut storages = self.storages.lock().unwrap();
        if let Some(s) = storages.iter_mut().find(|s| s.storage_id == storage_id) {
            s.size = size;
        }
        Ok(())
    }
    fn purge_storage(&self, storage_id: &str) -> Result<(), Error> {
        self.purged.lock().unwrap().push(storage_id.to_string());
        self.storages.lock().unwrap().retain(|s| s.storage_id != storage_id);
        Ok(())
    }
    fn purge_storages_by_name(&self, _uuid_id: &str, name: &str, except: &str) -> Result<(), Error> {
        self.storages
            .lock()
            .unwrap()
            .retain(|s| s.name != name || s.storage_id == except);
        Ok(())
    }
}

fn temp_file_with_content(tag: &str, content: &[u8]) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!(
        "pbs-archive-core-storage-test-{}-{}-{}",
        std::process::id(),
        tag,
        rand_suffix()
    ));
    std::fs::write(&path, content).unwrap();
    path
}

fn rand_suffix() -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

#[test]
fn rename_collision_appends_smallest_free_suffix() {
    let backend = Arc::new(FakeBackend::default());
    backend.existing.lock().unwrap().insert("a.bar".to_string());
    backend.existing.lock().unwrap().insert("a-0.bar".to_string());

    let mut options = JobOptions::default();
    options.archive_file_mode = ArchiveFileMode::Rename;

    let ctx = Arc::new(StorageDispatcherContext {
        options: Arc::new(options),
        backend: backend.clone(),
        index: None,
        uuid_id: "uuid-1".into(),
        abort: Arc::new(AtomicBool::new(false)),
        temp_space: TempFileSpace::new(0),
        fail_error: Arc::new(Mutex::new(None)),
    });

    let (tx, rx) = crossbeam_channel::unbounded();
    let src = temp_file_with_content("rename", b"hello");
    tx.send(StorageMessage {
        uuid_id: "uuid-1".into(),
        entity_id: "entity-1".into(),
        storage_id: None,
        intermediate_file_name: src,
        intermediate_file_size: 5,
        archive_name: "a.bar".into(),
    })
    .unwrap();
    drop(tx);

    run_dispatcher(ctx, rx);

    let existing = backend.existing.lock().unwrap();
    assert!(existing.contains("a-1.bar"));
    assert!(!existing.contains("a-2.bar"));
}

#[test]
fn max_storage_size_pruning_retains_budget() {
    let backend = Arc::new(FakeBackend::default());
    let index = Arc::new(FakeIndex::default());

    for (name, size, created) in [("old.bar", 100u64, 100i64), ("mid.bar", 200, 200), ("new.bar", 300, 300)] {
        backend.existing.lock().unwrap().insert(name.to_string());
        let id = index.new_storage("entity-1", name, size, created).unwrap();
        index.set_storage_state(&id, StorageState::Ok, created).unwrap();
    }

    let mut options = JobOptions::default();
    options.max_storage_size = 500;

    let ctx = Arc::new(StorageDispatcherContext {
        options: Arc::new(options),
        backend: backend.clone(),
        index: Some(index.clone() as Arc<dyn IndexBackend>),
        uuid_id: "uuid-1".into(),
        abort: Arc::new(AtomicBool::new(false)),
        temp_space: TempFileSpace::new(0),
        fail_error: Arc::new(Mutex::new(None)),
    });

    let (tx, rx) = crossbeam_channel::unbounded();
    let src = temp_file_with_content("prune", b"xxxxxxxxxxxxxxxxxxxx");
    tx.send(StorageMessage {
        uuid_id: "uuid-1".into(),
        entity_id: "entity-1".into(),
        storage_id: Some("storage-incoming".into()),
        intermediate_file_name: src,
        intermediate_file_size: 150,
        archive_name: "incoming.bar".into(),
    })
    .unwrap();
    drop(tx);

    run_dispatcher(ctx, rx);

    let remaining: u64 = index.storages.lock().unwrap().iter().map(|s| s.size).sum();
    assert!(remaining <= 350, "remaining={remaining}");
    assert!(backend.deleted.lock().unwrap().contains(&"old.bar".to_string()));
    assert!(backend.deleted.lock().unwrap().contains(&"mid.bar".to_string()));
    assert!(!backend.deleted.lock().unwrap().contains(&"new.bar".to_string()));
}

/// Append mode with no existing row sharing the new archive's name still
/// reassigns sibling storages in the same directory under the same UUID to
/// the new storage's entity (spec.md §4.4 step 8, second bullet).
#[test]
fn append_mode_reassigns_directory_siblings_to_new_entity() {
    let backend = Arc::new(FakeBackend::default());
    let index = Arc::new(FakeIndex::default());

    backend.existing.lock().unwrap().insert("dir/sibling.bar".to_string());
    let sibling_id = index
        .new_storage("old-entity", "dir/sibling.bar", 50, 10)
        .unwrap();
    index.set_storage_state(&sibling_id, StorageState::Ok, 10).unwrap();

    let mut options = JobOptions::default();
    options.archive_file_mode = ArchiveFileMode::Append;

    let ctx = Arc::new(StorageDispatcherContext {
        options: Arc::new(options),
        backend: backend.clone(),
        index: Some(index.clone() as Arc<dyn IndexBackend>),
        uuid_id: "uuid-1".into(),
        abort: Arc::new(AtomicBool::new(false)),
        temp_space: TempFileSpace::new(0),
        fail_error: Arc::new(Mutex::new(None)),
    });

    let (tx, rx) = crossbeam_channel::unbounded();
    let src = temp_file_with_content("append-sibling", b"new segment data");
    tx.send(StorageMessage {
        uuid_id: "uuid-1".into(),
        entity_id: "new-entity".into(),
        storage_id: Some("storage-new".into()),
        intermediate_file_name: src,
        intermediate_file_size: 17,
        archive_name: "dir/new.bar".into(),
    })
    .unwrap();
    drop(tx);

    run_dispatcher(ctx, rx);

    let assigned = index.assigned.lock().unwrap();
    assert!(
        assigned
            .iter()
            .any(|(storage_id, entity_id)| storage_id == &sibling_id && entity_id == "new-entity"),
        "expected sibling {sibling_id} reassigned to new-entity, got {assigned:?}"
    );
}
