//! Entry store workers (spec.md §2 item 7, §4.2).
//!
//! Each worker loops over the entry queue, dispatching by entry kind to one
//! of the store routines below. Thread shape is grounded on
//! `src/tools/parallel_handler.rs::ParallelHandler`: a fixed pool of OS
//! threads draining a bounded `crossbeam_channel` receiver, with a shared
//! sticky-error slot instead of returning per-item results.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Error;
use crossbeam_channel::Receiver;

use crate::external::{ArchiveWriter, EntryCompressDecision};
use crate::fragment_map::{ByteRange, FragmentMap};
use crate::incremental::{Cast, IncrementalMap};
use crate::job::JobOptions;
use crate::message::EntryWork;
use crate::progress::{CurrentEntry, ProgressAggregator};

/// Entry-streaming buffer size (spec.md §4.2 "read in buffers of 64 KiB").
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Recognized filesystem types whose block-used bitmap lets image store
/// skip unused blocks (spec.md §4.2 "Image"). The bitmap probe itself is
/// delegated to an external interface -- the list only decides whether
/// probing is attempted.
const RECOGNIZED_IMAGE_FILESYSTEMS: &[&str] = &[
    "fat12", "fat16", "fat32", "ext2", "ext3", "ext4", "reiserfs3.5", "reiserfs3.6", "reiserfs4",
    "exfat", "xfs",
];

/// Shared state every worker needs: progress/fragment lock, job options,
/// the archive writer, cancellation, and the set of paths that must never
/// be re-entered as entries (spec.md §4.2 "self-reference guard").
pub struct WorkerContext {
    pub options: Arc<JobOptions>,
    pub writer: Arc<dyn ArchiveWriter>,
    pub progress: Arc<ProgressAggregator>,
    pub fragments: Arc<Mutex<FragmentMap>>,
    pub abort: Arc<AtomicBool>,
    pub tmp_dir: PathBuf,
    pub produced_storage_files: Arc<Mutex<Vec<PathBuf>>>,
    pub fail_error: Arc<Mutex<Option<String>>>,
    /// The incremental map being built for this run (spec.md §4.3): each
    /// fully-stored regular file records its current cast here, so the
    /// controller can write it out atomically at run end.
    pub new_incremental: Arc<Mutex<IncrementalMap>>,
}

impl WorkerContext {
    fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    fn set_fail_error(&self, err: &Error) {
        let mut guard = self.fail_error.lock().unwrap();
        if guard.is_none() {
            *guard = Some(err.to_string());
        }
    }

    /// Self-reference guard: reject paths under the tool's temp directory
    /// or matching an already-produced storage file (spec.md §4.2 step i).
    fn is_self_reference(&self, path: &Path) -> bool {
        if path.starts_with(&self.tmp_dir) {
            return true;
        }
        self.produced_storage_files
            .lock()
            .unwrap()
            .iter()
            .any(|p| p == path)
    }
}

/// One worker's processing loop over the entry queue (spec.md §4.2).
pub fn run_worker(ctx: Arc<WorkerContext>, receiver: Receiver<EntryWork>) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        if ctx.aborted() {
            return;
        }
        let work = match receiver.recv() {
            Ok(w) => w,
            Err(_) => return, // queue closed and drained
        };

        if ctx.fail_error.lock().unwrap().is_some() {
            // Sticky fatal already set elsewhere; keep draining without
            // doing new work so the queue can close cleanly.
            continue;
        }

        if ctx.is_self_reference(work.primary_path()) {
            log::warn!("skipping self-referenced path {:?}", work.primary_path());
            continue;
        }

        ctx.progress.set_current_entry(Some(CurrentEntry {
            name: work.primary_path().to_string_lossy().to_string(),
            fragment_number: work.fragment().map(|f| f.fragment_number).unwrap_or(0),
            fragment_count: work.fragment().map(|f| f.fragment_count).unwrap_or(1),
        }));

        // ENTRY_TYPE_UNKNOWN has no case here: EntryWork is an exhaustive
        // sum type (spec.md §9's redesign of the C anonymous union), so
        // every variant this match sees is already a known kind.
        let result = match &work {
            EntryWork::File { .. } => store_file(&ctx, &work, &mut buf),
            EntryWork::Hardlink { .. } => store_hardlink(&ctx, &work, &mut buf),
            EntryWork::Image { .. } => store_image(&ctx, &work, &mut buf),
            EntryWork::Directory { path, .. } => store_metadata_only(&ctx, path, &work),
            EntryWork::Link { path, target, .. } => store_link(&ctx, path, target),
            EntryWork::Special { path, .. } => store_metadata_only(&ctx, path, &work),
        };

        if let Err(err) = result {
            log::error!("ERROR: entry {:?}: {err}", work.primary_path());
            ctx.progress.add_error(1, work.size());
            ctx.set_fail_error(&err);
        }
    }
}

/// Decide `TRY_DELTA_COMPRESS`/`TRY_BYTE_COMPRESS` (spec.md §4.2):
/// `TRY_DELTA_COMPRESS` iff size is above the threshold and a delta
/// algorithm is configured; `TRY_BYTE_COMPRESS` iff size is above the
/// threshold and none of the candidate paths match the compress-exclude
/// list.
fn compress_decision(ctx: &WorkerContext, size: u64, paths: &[&Path]) -> EntryCompressDecision {
    let above_threshold = size > ctx.options.compress.compress_min_file_size;
    let try_delta = above_threshold && ctx.options.compress.delta.is_some();
    // Compress-exclude patterns only ever name files, never directories, so
    // the directory-aware mode bits `Pattern::matches` consults for include
    // patterns don't apply here.
    let try_byte = above_threshold
        && !paths.iter().any(|p| {
            ctx.options
                .compress_excludes
                .any_matches(&p.to_string_lossy(), 0)
        });
    EntryCompressDecision { try_delta, try_byte }
}

fn store_file(ctx: &WorkerContext, work: &EntryWork, buf: &mut [u8]) -> Result<(), Error> {
    let (path, info, fragment) = match work {
        EntryWork::File { path, info, fragment } => (path, info, *fragment),
        _ => unreachable!(),
    };

    let compress = compress_decision(ctx, info.size, &[path]);

    if ctx.options.no_storage {
        ctx.progress.add_done(0, fragment.fragment_size);
        return Ok(());
    }

    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(err) => {
            log::warn!("ENTRY_ACCESS_DENIED: {path:?}: {err}");
            if ctx.options.skip_unreadable {
                ctx.progress.add_skipped(1, fragment.fragment_size);
                return Ok(());
            }
            return Err(err.into());
        }
    };
    file.seek(SeekFrom::Start(fragment.fragment_offset))?;

    let entry = ctx.writer.new_file_entry(
        path,
        fragment.fragment_size,
        compress,
        ctx.options.crypt.primary(),
    )?;

    let mut remaining = fragment.fragment_size;
    let mut written = 0u64;
    // A zero-size fragment (and therefore a zero-size file, since
    // fragments_for never splits an empty file into more than one piece)
    // is vacuously complete without ever touching the fragment map,
    // matching `FragmentNode::is_complete`'s `total_size == 0` case.
    let mut completed = fragment.fragment_size == 0;
    while remaining > 0 {
        if ctx.aborted() {
            ctx.writer.close_entry(entry)?;
            return Err(crate::error::ArchiveCoreError::Aborted.into());
        }
        let chunk = remaining.min(buf.len() as u64) as usize;
        let n = file.read(&mut buf[..chunk])?;
        if n == 0 {
            // Short read: file shrank underneath us. Terminate the
            // fragment early (spec.md §4.2 "File/Hardlink").
            log::warn!("ENTRY_INCOMPLETE: {path:?} shrank during read");
            break;
        }
        ctx.writer.write_data(&entry, &buf[..n])?;
        written += n as u64;
        remaining -= n as u64;

        // `record_fragment` inserts this chunk's range and, under the
        // same lock, checks completion and discards the node if so --
        // so exactly one call across every worker touching this path
        // observes `true`, however many fragments of it are in flight
        // concurrently (spec.md §8: "done.count … never exceeds
        // total.count").
        completed = record_fragment(ctx, &path.to_string_lossy(), info.size, fragment.fragment_offset + written - n as u64, n as u64);
        ctx.progress.add_done(0, n as u64);
        ctx.progress
            .update_archive_size(ctx.writer.current_size(), compression_ratio(info.size, ctx.writer.current_size()));
    }

    ctx.writer.close_entry(entry)?;

    if completed {
        log::info!("ENTRY_OK: {path:?} ({written} bytes)");
        ctx.progress.add_done(1, 0);
        ctx.new_incremental.lock().unwrap().insert(
            path.to_string_lossy().to_string(),
            Cast {
                mtime: info.mtime,
                ctime: info.ctime,
            },
        );
    }

    Ok(())
}

fn store_hardlink(ctx: &WorkerContext, work: &EntryWork, buf: &mut [u8]) -> Result<(), Error> {
    let (paths, info, fragment) = match work {
        EntryWork::Hardlink { paths, info, fragment } => (paths, info, *fragment),
        _ => unreachable!(),
    };

    if ctx.options.no_storage {
        ctx.progress.add_done(0, fragment.fragment_size);
        return Ok(());
    }

    let primary = &paths[0];
    let refs: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
    let compress = compress_decision(ctx, info.size, &refs);

    let mut file = File::open(primary)?;
    let entry = ctx.writer.new_hardlink_entry(paths, compress)?;

    let mut remaining = info.size;
    while remaining > 0 {
        if ctx.aborted() {
            ctx.writer.close_entry(entry)?;
            return Err(crate::error::ArchiveCoreError::Aborted.into());
        }
        let chunk = remaining.min(buf.len() as u64) as usize;
        let n = file.read(&mut buf[..chunk])?;
        if n == 0 {
            log::warn!("ENTRY_INCOMPLETE: hardlink group at {primary:?} shrank during read");
            break;
        }
        ctx.writer.write_data(&entry, &buf[..n])?;
        remaining -= n as u64;
    }
    ctx.writer.close_entry(entry)?;

    // Fragment count increments by one per path group, not per path;
    // progress.done.count advances by the number of paths (spec.md §4.2).
    ctx.progress.add_done(paths.len() as u64, info.size);
    log::info!("ENTRY_OK: hardlink group ({} paths) at {primary:?}", paths.len());
    Ok(())
}

fn store_image(ctx: &WorkerContext, work: &EntryWork, buf: &mut [u8]) -> Result<(), Error> {
    let (path, info, fragment) = match work {
        EntryWork::Image { path, info, fragment } => (path, info, *fragment),
        _ => unreachable!(),
    };

    if info.block_size == 0 || info.block_size as u64 > 64 * 1024 {
        return Err(crate::error::ArchiveCoreError::InvalidDeviceBlockSize(info.block_size as u64).into());
    }

    if ctx.options.no_storage {
        ctx.progress.add_done(0, fragment.fragment_size);
        return Ok(());
    }

    let used_bitmap = if !ctx.options.raw_images {
        probe_filesystem_bitmap(path)
    } else {
        None
    };

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(fragment.fragment_offset))?;

    let entry = ctx
        .writer
        .new_image_entry(path, fragment.fragment_size, info.block_size, ctx.options.crypt.primary())?;

    let block_size = info.block_size as u64;
    let mut offset = fragment.fragment_offset;
    let end = fragment.fragment_offset + fragment.fragment_size;
    while offset < end {
        if ctx.aborted() {
            ctx.writer.close_entry(entry)?;
            return Err(crate::error::ArchiveCoreError::Aborted.into());
        }
        let this_block = block_size.min(end - offset);
        let block_index = offset / block_size;
        if let Some(bitmap) = &used_bitmap {
            if !bitmap.is_used(block_index) {
                // Unused block: substitute zeros to preserve geometry.
                ctx.writer.write_data(&entry, &vec![0u8; this_block as usize])?;
                offset += this_block;
                ctx.progress.add_done(0, this_block);
                continue;
            }
        }
        let n = file.read(&mut buf[..this_block as usize])?;
        if n == 0 {
            break;
        }
        ctx.writer.write_data(&entry, &buf[..n])?;
        offset += n as u64;
        ctx.progress.add_done(0, n as u64);
    }
    ctx.writer.close_entry(entry)?;
    ctx.progress.add_done(1, 0);
    log::info!("ENTRY_OK: image {path:?}");
    Ok(())
}

fn store_metadata_only(ctx: &WorkerContext, path: &Path, work: &EntryWork) -> Result<(), Error> {
    if ctx.options.no_storage {
        ctx.progress.add_done(1, 0);
        return Ok(());
    }
    let entry = match work {
        EntryWork::Directory { .. } => ctx.writer.new_directory_entry(path)?,
        EntryWork::Special { .. } => ctx.writer.new_special_entry(path)?,
        _ => unreachable!(),
    };
    ctx.writer.close_entry(entry)?;
    ctx.progress.add_done(1, 0);
    log::info!("ENTRY_OK: {path:?}");
    Ok(())
}

fn store_link(ctx: &WorkerContext, path: &Path, target: &Path) -> Result<(), Error> {
    if ctx.options.no_storage {
        ctx.progress.add_done(1, 0);
        return Ok(());
    }
    let entry = ctx.writer.new_link_entry(path, target)?;
    ctx.writer.close_entry(entry)?;
    ctx.progress.add_done(1, 0);
    log::info!("ENTRY_OK: {path:?} -> {target:?}");
    Ok(())
}

/// Records one chunk's range and reports whether this call completed the
/// entry, atomically under the fragment-map lock (spec.md §5 "Progress/
/// fragment lock").
fn record_fragment(ctx: &WorkerContext, name: &str, total_size: u64, offset: u64, len: u64) -> bool {
    let mut fragments = ctx.fragments.lock().unwrap();
    fragments.record(name, total_size, ByteRange::new(offset, len))
}

fn compression_ratio(original: u64, compressed: u64) -> f64 {
    if original == 0 {
        return 1.0;
    }
    compressed as f64 / original as f64
}

/// Probed block-used bitmap for a recognized filesystem type (spec.md
/// §4.2 "Image"). The actual filesystem parsing is out of scope for this
/// crate (an external concern); only the type recognition and bitmap
/// query shape live here, behind a narrow trait so a real prober can be
/// plugged in.
pub trait UsedBlockBitmap {
    fn is_used(&self, block_index: u64) -> bool;
}

/// Best-effort filesystem-type probe. Returns `None` (raw mode) unless the
/// filesystem is one of [`RECOGNIZED_IMAGE_FILESYSTEMS`]; a real
/// implementation would inspect the superblock. Kept conservative here:
/// without a concrete prober wired in, every device is treated as raw so
/// no data is silently skipped by a guess.
fn probe_filesystem_bitmap(_path: &Path) -> Option<Box<dyn UsedBlockBitmap>> {
    None
}

#[allow(dead_code)]
fn recognized_filesystem(name: &str) -> bool {
    RECOGNIZED_IMAGE_FILESYSTEMS.contains(&name.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_ratio_of_zero_size_is_one() {
        assert_eq!(compression_ratio(0, 0), 1.0);
    }

    #[test]
    fn compression_ratio_is_compressed_over_original() {
        assert_eq!(compression_ratio(100, 40), 0.4);
    }

    #[test]
    fn recognized_filesystems_are_case_insensitive() {
        assert!(recognized_filesystem("EXT4"));
        assert!(recognized_filesystem("xfs"));
        assert!(!recognized_filesystem("btrfs"));
    }
}
