//! External interfaces (spec.md §1, §6): the archive chunk encoder,
//! storage back-end and index database are treated as black boxes. This
//! module only declares the narrow `trait`s this crate calls through;
//! concrete implementations (crypto, delta reconstruction, PAR2, the
//! actual storage protocols, the relational index) are out of scope.

use std::io::Write;
use std::path::Path;

use anyhow::Error;

/// A handle to one open archive entry, returned by `ArchiveWriter::new_*`.
pub struct ArchiveEntryHandle(pub u64);

/// Per-entry `TRY_DELTA_COMPRESS`/`TRY_BYTE_COMPRESS` decision (spec.md
/// §4.2). The archive writer applies the job's configured algorithms
/// internally; this only tells it whether this particular entry qualifies,
/// since the decision (size threshold, compress-exclude match) is made by
/// the store routine, not the writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryCompressDecision {
    pub try_delta: bool,
    pub try_byte: bool,
}

/// The archive writer (spec.md §6 "Archive writer (consumed)"). Emits
/// typed entries, applies delta+byte compression and encryption
/// internally, and invokes `store` once a segment reaches its target
/// size.
pub trait ArchiveWriter: Send + Sync {
    fn new_file_entry(
        &self,
        path: &Path,
        size: u64,
        compress: EntryCompressDecision,
        crypt_algorithm: Option<&str>,
    ) -> Result<ArchiveEntryHandle, Error>;

    fn new_image_entry(
        &self,
        path: &Path,
        size: u64,
        block_size: u32,
        crypt_algorithm: Option<&str>,
    ) -> Result<ArchiveEntryHandle, Error>;

    fn new_directory_entry(&self, path: &Path) -> Result<ArchiveEntryHandle, Error>;
    fn new_link_entry(&self, path: &Path, target: &Path) -> Result<ArchiveEntryHandle, Error>;
    fn new_hardlink_entry(
        &self,
        paths: &[std::path::PathBuf],
        compress: EntryCompressDecision,
    ) -> Result<ArchiveEntryHandle, Error>;
    fn new_special_entry(&self, path: &Path) -> Result<ArchiveEntryHandle, Error>;

    /// Write one chunk of entry data. May internally invoke the
    /// storage-store callback once a segment is full.
    fn write_data(&self, entry: &ArchiveEntryHandle, buf: &[u8]) -> Result<(), Error>;

    fn close_entry(&self, entry: ArchiveEntryHandle) -> Result<(), Error>;

    /// Flushes any pending segment when `final_flag` is set (spec.md §6
    /// "close").
    fn close(&self, final_flag: bool) -> Result<(), Error>;

    /// Running compressed archive size, for progress reporting.
    fn current_size(&self) -> u64;
}

/// The storage back-end (spec.md §6 "Storage back-end (consumed)"). A
/// polymorphic sink for named blobs.
pub trait StorageBackend: Send + Sync {
    fn exists(&self, name: &str) -> Result<bool, Error>;
    fn pre_process(&self, name: &str, created: i64, initial: bool) -> Result<(), Error>;
    fn post_process(&self, name: &str, created: i64, final_flag: bool) -> Result<(), Error>;
    fn create(&self, name: &str, size: u64, force: bool) -> Result<Box<dyn StorageHandle>, Error>;
    fn delete(&self, name: &str) -> Result<(), Error>;
    fn prune_directories(&self, name: &str) -> Result<(), Error>;
    fn is_paused(&self) -> bool;
    fn is_aborted(&self) -> bool;
    fn printable_name(&self, name: &str) -> String {
        name.to_string()
    }
}

/// An open destination on the storage back-end, returned by `create`.
pub trait StorageHandle: Write + Send {
    fn size(&self) -> Result<u64, Error>;
}

/// State of an indexed storage row (spec.md §6 "Index (consumed)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageState {
    Ok,
    UpdateRequested,
    Error,
}

/// One row as returned by a storage listing, used by retention pruning
/// (spec.md §4.4 step 5).
#[derive(Debug, Clone)]
pub struct IndexedStorage {
    pub storage_id: String,
    pub entity_id: String,
    pub name: String,
    pub size: u64,
    pub created: i64,
    pub state: StorageState,
}

/// The index database (spec.md §6 "Index (consumed)"). UUID/Entity/
/// Storage rows, queried for retention and updated on storage
/// completion.
pub trait IndexBackend: Send + Sync {
    fn find_or_create_uuid(&self, job_uuid: &str) -> Result<String, Error>;
    fn new_entity(&self, uuid_id: &str, created: i64) -> Result<String, Error>;
    fn unlock_entity(&self, entity_id: &str) -> Result<(), Error>;
    fn delete_entity(&self, entity_id: &str) -> Result<(), Error>;
    fn prune_entity_if_empty(&self, entity_id: &str) -> Result<(), Error>;

    fn list_storages_for_uuid(&self, uuid_id: &str) -> Result<Vec<IndexedStorage>, Error>;
    fn find_storage_by_name(&self, uuid_id: &str, name: &str) -> Result<Option<IndexedStorage>, Error>;

    fn new_storage(
        &self,
        entity_id: &str,
        name: &str,
        size: u64,
        created: i64,
    ) -> Result<String, Error>;
    fn assign_entity_to_storage(&self, storage_id: &str, entity_id: &str) -> Result<(), Error>;
    fn set_storage_state(&self, storage_id: &str, state: StorageState, checked: i64) -> Result<(), Error>;
    fn update_storage_size(&self, storage_id: &str, size: u64) -> Result<(), Error>;
    fn purge_storage(&self, storage_id: &str) -> Result<(), Error>;
    fn purge_storages_by_name(&self, uuid_id: &str, name: &str, except: &str) -> Result<(), Error>;
}
