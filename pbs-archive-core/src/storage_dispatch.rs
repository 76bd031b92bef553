//! Storage dispatcher (spec.md §2 item 8, §4.4): single-consumer FIFO
//! receiving intermediate archive segments and transferring each to the
//! storage back-end with retry, rename/append policy, index update and
//! retention pruning.

use std::io::copy;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Error};
use crossbeam_channel::Receiver;

use crate::external::{IndexBackend, IndexedStorage, StorageBackend, StorageState};
use crate::job::{ArchiveFileMode, JobOptions};
use crate::message::StorageMessage;

/// Number of queued-but-unconsumed segments above which new archive
/// segments suspend (spec.md §5, §9 Open Question: "the '2' is
/// unexplained" -- carried verbatim, not re-derived).
pub const TEMP_FILE_SPACE_QUEUE_DEPTH: usize = 2;

const MAX_TRANSFER_RETRIES: u32 = 3;

/// Shared "bytes in flight" accumulator feeding `waitForTemporaryFileSpace`
/// (spec.md §5 "Storage-info lock"). The dispatcher decrements it after
/// each segment is consumed; producers (archive writer callbacks) block
/// on the paired condition variable when the cap is exceeded.
pub struct TempFileSpace {
    inner: Mutex<TempFileSpaceInner>,
    condvar: std::sync::Condvar,
    max_size: u64,
}

struct TempFileSpaceInner {
    bytes_in_flight: u64,
    segments_in_flight: usize,
}

impl TempFileSpace {
    pub fn new(max_size: u64) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(TempFileSpaceInner {
                bytes_in_flight: 0,
                segments_in_flight: 0,
            }),
            condvar: std::sync::Condvar::new(),
            max_size,
        })
    }

    /// Block until there is room for a new segment (spec.md §5
    /// `waitForTemporaryFileSpace`): suspends when the aggregate
    /// intermediate-file size exceeds `max_size` *and* more than
    /// [`TEMP_FILE_SPACE_QUEUE_DEPTH`] segments are queued.
    pub fn reserve(&self, size: u64) {
        if self.max_size == 0 {
            return;
        }
        let mut guard = self.inner.lock().unwrap();
        while guard.bytes_in_flight > self.max_size
            && guard.segments_in_flight > TEMP_FILE_SPACE_QUEUE_DEPTH
        {
            guard = self.condvar.wait(guard).unwrap();
        }
        guard.bytes_in_flight += size;
        guard.segments_in_flight += 1;
    }

    /// Signalled by the dispatcher after each segment is consumed.
    pub fn release(&self, size: u64) {
        let mut guard = self.inner.lock().unwrap();
        guard.bytes_in_flight = guard.bytes_in_flight.saturating_sub(size);
        guard.segments_in_flight = guard.segments_in_flight.saturating_sub(1);
        drop(guard);
        self.condvar.notify_all();
    }
}

pub struct StorageDispatcherContext {
    pub options: Arc<JobOptions>,
    pub backend: Arc<dyn StorageBackend>,
    pub index: Option<Arc<dyn IndexBackend>>,
    pub uuid_id: String,
    pub abort: Arc<AtomicBool>,
    pub temp_space: Arc<TempFileSpace>,
    pub fail_error: Arc<Mutex<Option<String>>>,
}

impl StorageDispatcherContext {
    fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    fn set_fail_error(&self, err: &Error) {
        let mut guard = self.fail_error.lock().unwrap();
        if guard.is_none() {
            *guard = Some(err.to_string());
        }
    }

    fn pause(&self) {
        while self.backend.is_paused() && !self.aborted() {
            std::thread::sleep(std::time::Duration::from_millis(500));
        }
    }
}

/// The dispatcher's main loop (spec.md §4.4). Runs until the channel
/// closes and drains; on abort, residual messages are purged instead of
/// transferred (spec.md §4.4 "At run end").
pub fn run_dispatcher(ctx: Arc<StorageDispatcherContext>, receiver: Receiver<StorageMessage>) {
    loop {
        let msg = match receiver.recv() {
            Ok(m) => m,
            Err(_) => break,
        };

        let size = msg.intermediate_file_size;

        if ctx.aborted() || ctx.fail_error.lock().unwrap().is_some() {
            purge_message(&ctx, msg);
            ctx.temp_space.release(size);
            continue;
        }

        if let Err(err) = process_one(&ctx, msg) {
            log::error!("ERROR: storage dispatch failed: {err}");
            ctx.set_fail_error(&err);
        }
        ctx.temp_space.release(size);
    }

    ctx.backend
        .post_process("", 0, true)
        .unwrap_or_else(|err| log::warn!("final post_process failed: {err}"));
}

fn purge_message(ctx: &StorageDispatcherContext, msg: StorageMessage) {
    if let (Some(index), Some(storage_id)) = (&ctx.index, msg.storage_id.clone()) {
        if let Err(err) = index.purge_storage(&storage_id) {
            log::warn!("failed to purge index row {storage_id}: {err}");
        }
    }
    msg.discard();
}

fn process_one(ctx: &StorageDispatcherContext, msg: StorageMessage) -> Result<(), Error> {
    ctx.pause();
    if ctx.aborted() {
        purge_message(ctx, msg);
        return Ok(());
    }

    let archive_name = resolve_target_name(ctx, &msg.archive_name)?;

    ctx.backend
        .pre_process(&archive_name, now(), true)
        .with_context(|| format!("pre_process failed for {archive_name}"))?;

    if ctx.options.max_storage_size > 0 {
        prune_for_space(ctx, msg.intermediate_file_size)?;
    }

    let transfer_result = transfer_with_retry(ctx, &msg.intermediate_file_name, &archive_name, msg.intermediate_file_size);

    match transfer_result {
        Ok(()) => {
            if let Some(index) = &ctx.index {
                update_index(ctx, index.as_ref(), &msg, &archive_name)?;
            }
            ctx.backend
                .post_process(&archive_name, now(), false)
                .with_context(|| format!("post_process failed for {archive_name}"))?;
            log::info!(
                "ENTRY_OK: stored {archive_name} ({} bytes)",
                msg.intermediate_file_size
            );
        }
        Err(err) => {
            if let Some(index) = &ctx.index {
                if let Some(storage_id) = &msg.storage_id {
                    index.set_storage_state(storage_id, StorageState::Error, now())?;
                }
            }
            msg.discard();
            return Err(err);
        }
    }

    msg.discard();
    Ok(())
}

/// Rename-collision loop (spec.md §4.4 step 3, §8 scenario 6): append
/// `-N` starting at 0 until a free name is found, for `archiveFileMode =
/// rename`. Leaves the name untouched for overwrite/append.
fn resolve_target_name(ctx: &StorageDispatcherContext, name: &str) -> Result<String, Error> {
    if ctx.options.archive_file_mode != ArchiveFileMode::Rename {
        return Ok(name.to_string());
    }
    if !ctx.backend.exists(name)? {
        return Ok(name.to_string());
    }

    let (stem, ext) = split_extension(name);
    let mut n = 0u32;
    loop {
        let candidate = match &ext {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        };
        if !ctx.backend.exists(&candidate)? {
            return Ok(candidate);
        }
        n += 1;
    }
}

fn split_extension(name: &str) -> (String, Option<String>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (name[..idx].to_string(), Some(name[idx + 1..].to_string())),
        _ => (name.to_string(), None),
    }
}

/// Prune old storages for this job UUID until `Σ sizes ≤ maxStorageSize -
/// newSize` (spec.md §4.4 step 5, §8 scenario 5). Oldest-first by
/// `createdDateTime`, among states OK/update-requested/error.
fn prune_for_space(ctx: &StorageDispatcherContext, new_size: u64) -> Result<(), Error> {
    let Some(index) = &ctx.index else { return Ok(()) };

    let mut storages = index.list_storages_for_uuid(&ctx.uuid_id)?;
    storages.retain(|s| {
        matches!(
            s.state,
            StorageState::Ok | StorageState::UpdateRequested | StorageState::Error
        )
    });
    storages.sort_by_key(|s| s.created);

    let budget = ctx.options.max_storage_size.saturating_sub(new_size);
    let mut total: u64 = storages.iter().map(|s| s.size).sum();

    let mut idx = 0;
    while total > budget && idx < storages.len() {
        let victim = &storages[idx];
        log::info!(
            "LOG_TYPE_STORAGE: pruning {} (size={}, created={})",
            victim.name,
            victim.size,
            victim.created
        );
        ctx.backend.delete(&victim.name)?;
        ctx.backend.prune_directories(&victim.name)?;
        index.purge_storage(&victim.storage_id)?;
        total = total.saturating_sub(victim.size);
        idx += 1;
    }
    Ok(())
}

/// Transfer with retry (spec.md §4.4 step 6): on error, close & delete the
/// destination, retry up to [`MAX_TRANSFER_RETRIES`] unless the error is
/// out-of-space.
fn transfer_with_retry(
    ctx: &StorageDispatcherContext,
    src_path: &PathBuf,
    dest_name: &str,
    size: u64,
) -> Result<(), Error> {
    let mut attempt = 0;
    loop {
        match transfer_once(ctx, src_path, dest_name, size) {
            Ok(()) => return Ok(()),
            Err(err) if is_enospc(&err) => return Err(err),
            Err(err) => {
                attempt += 1;
                ctx.backend.delete(dest_name).ok();
                if attempt >= MAX_TRANSFER_RETRIES {
                    return Err(err);
                }
                log::warn!("transfer of {dest_name} failed (attempt {attempt}): {err}, retrying");
            }
        }
    }
}

fn transfer_once(
    ctx: &StorageDispatcherContext,
    src_path: &PathBuf,
    dest_name: &str,
    size: u64,
) -> Result<(), Error> {
    let mut src = std::fs::File::open(src_path)
        .with_context(|| format!("failed to open intermediate file {src_path:?}"))?;
    let mut dest = ctx
        .backend
        .create(dest_name, size, false)
        .with_context(|| format!("failed to create destination {dest_name}"))?;
    copy(&mut src, &mut dest).with_context(|| format!("failed to transfer {dest_name}"))?;
    Ok(())
}

fn is_enospc(err: &Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<std::io::Error>())
        .any(|io_err| io_err.raw_os_error() == Some(libc::ENOSPC))
}

/// Index update (spec.md §4.4 step 8).
fn update_index(
    ctx: &StorageDispatcherContext,
    index: &dyn IndexBackend,
    msg: &StorageMessage,
    archive_name: &str,
) -> Result<(), Error> {
    let Some(storage_id) = &msg.storage_id else {
        return Ok(());
    };

    if ctx.options.archive_file_mode == ArchiveFileMode::Append {
        if let Some(existing) = index.find_storage_by_name(&ctx.uuid_id, archive_name)? {
            if existing.storage_id != *storage_id {
                // Assign the newly-indexed entries to the existing storage
                // row, then purge the now-empty new-storage row (spec.md
                // §4.4 step 8, first bullet).
                index.assign_entity_to_storage(storage_id, &existing.entity_id)?;
                index.purge_storage(storage_id)?;
                index.prune_entity_if_empty(&msg.entity_id)?;
                index.update_storage_size(&existing.storage_id, existing.size + msg.intermediate_file_size)?;
                index.set_storage_state(&existing.storage_id, StorageState::Ok, now())?;
                return Ok(());
            }
        }
    }

    // Keep the new storage row; purge any other rows with the same name
    // (spec.md §4.4 step 8, second bullet). This path is reached both for
    // non-append modes and for append mode when no existing row shares the
    // name.
    index.purge_storages_by_name(&ctx.uuid_id, archive_name, storage_id)?;

    if ctx.options.archive_file_mode == ArchiveFileMode::Append {
        // In append mode, also search sibling storages in the same
        // directory under the same UUID and reassign the new storage's
        // entity to them (spec.md §4.4 step 8, second bullet).
        let dir = directory_of(archive_name);
        for sibling in index.list_storages_for_uuid(&ctx.uuid_id)? {
            if sibling.storage_id == *storage_id {
                continue;
            }
            if directory_of(&sibling.name) == dir {
                index.assign_entity_to_storage(&sibling.storage_id, &msg.entity_id)?;
            }
        }
    }

    index.update_storage_size(storage_id, msg.intermediate_file_size)?;
    index.set_storage_state(storage_id, StorageState::Ok, now())?;
    Ok(())
}

/// Directory component of an archive name, for the sibling-storage search
/// above. Archive names are `/`-separated regardless of platform.
fn directory_of(name: &str) -> &str {
    match name.rfind('/') {
        Some(idx) => &name[..idx],
        None => "",
    }
}

fn now() -> i64 {
    proxmox_time::epoch_i64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_extension_keeps_stem_and_ext() {
        assert_eq!(split_extension("a.bar"), ("a".to_string(), Some("bar".to_string())));
        assert_eq!(split_extension("noext"), ("noext".to_string(), None));
        assert_eq!(split_extension(".hidden"), (".hidden".to_string(), None));
    }

    #[test]
    fn temp_file_space_releases_segments() {
        let space = TempFileSpace::new(100);
        space.reserve(50);
        space.release(50);
        // should not block: no outstanding reservation left.
        space.reserve(10);
        space.release(10);
    }

    #[test]
    fn prune_for_space_budgets_oldest_first() {
        let mut storages = vec![
            IndexedStorage {
                storage_id: "c".into(),
                entity_id: "e".into(),
                name: "c.bar".into(),
                size: 300,
                created: 300,
                state: StorageState::Ok,
            },
            IndexedStorage {
                storage_id: "a".into(),
                entity_id: "e".into(),
                name: "a.bar".into(),
                size: 100,
                created: 100,
                state: StorageState::Ok,
            },
            IndexedStorage {
                storage_id: "b".into(),
                entity_id: "e".into(),
                name: "b.bar".into(),
                size: 200,
                created: 200,
                state: StorageState::Ok,
            },
        ];
        storages.sort_by_key(|s| s.created);
        assert_eq!(storages[0].storage_id, "a");
        assert_eq!(storages[2].storage_id, "c");
    }
}
