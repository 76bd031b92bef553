//! Enumerator (spec.md §2 item 5, §4.1): walks include entries, expands
//! directories, classifies each entry and dispatches it either into
//! totals (sum pass) or onto the entry queue (entry pass).
//!
//! Traversal is an explicit-stack depth-first walk, not recursion, per
//! spec.md §4.1 step 2 and the "replace nested-function closures with
//! plain parameterized search functions" redesign note in §9.

use std::collections::{HashMap, HashSet};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Error};
use crossbeam_channel::Sender;

use crate::error::ArchiveCoreError;
use crate::incremental::{Cast, IncrementalMap};
use crate::job::{ArchiveType, JobOptions, StoreType};
use crate::message::{DeviceInfo, EntryWork, FileInfo, FragmentInfo};
use crate::progress::ProgressAggregator;

const FS_IOC_GETFLAGS: libc::c_ulong = 0x8008_6601;
const FS_NODUMP_FL: libc::c_long = 0x0000_0040;

/// One entry discovered by the low-level file-type classifier.
enum Classified {
    File,
    Directory,
    Symlink,
    HardLink,
    Special,
}

fn classify(meta: &std::fs::Metadata) -> Classified {
    if meta.is_dir() {
        Classified::Directory
    } else if meta.file_type().is_symlink() {
        Classified::Symlink
    } else if meta.is_file() {
        if meta.nlink() > 1 {
            Classified::HardLink
        } else {
            Classified::File
        }
    } else {
        Classified::Special
    }
}

fn file_info(meta: &std::fs::Metadata) -> FileInfo {
    FileInfo {
        size: meta.size(),
        mtime: meta.mtime(),
        ctime: meta.ctime(),
        mode: meta.mode(),
        uid: meta.uid(),
        gid: meta.gid(),
        dev: meta.dev(),
        ino: meta.ino(),
        nlink: meta.nlink(),
        rdev: meta.rdev(),
    }
}

/// Best-effort `FS_IOC_GETFLAGS` read for the no-dump attribute. Treated
/// as "not set" on file systems that don't support the ioctl, matching
/// `pbs-client::pxar::create`'s pattern of ignoring unsupported-attribute
/// errors.
fn has_nodump_attr(path: &Path) -> bool {
    use std::os::unix::io::AsRawFd;
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut attr: libc::c_long = 0;
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), FS_IOC_GETFLAGS as _, &mut attr) };
    rc == 0 && (attr & FS_NODUMP_FL) != 0
}

fn has_nobackup_marker(dir: &Path) -> bool {
    dir.join(".nobackup").exists()
}

/// One stack frame of the explicit-stack depth-first traversal.
struct StackEntry {
    path: PathBuf,
}

#[derive(PartialEq, Eq, Hash, Clone, Copy)]
struct InodeId {
    dev: u64,
    ino: u64,
}

struct HardlinkGroup {
    expected_link_count: u64,
    paths: Vec<PathBuf>,
    info: FileInfo,
}

/// Whether this run only updates totals or actually emits work.
pub enum PassMode {
    Sum { progress: Arc<ProgressAggregator> },
    Entry { sender: Sender<EntryWork> },
}

pub struct Enumerator<'a> {
    options: &'a JobOptions,
    incremental: Option<&'a IncrementalMap>,
    abort: Arc<AtomicBool>,
    seen: HashSet<PathBuf>,
    hardlink_groups: HashMap<InodeId, HardlinkGroup>,
    matched_counts: HashMap<usize, u64>,
}

impl<'a> Enumerator<'a> {
    pub fn new(options: &'a JobOptions, incremental: Option<&'a IncrementalMap>, abort: Arc<AtomicBool>) -> Self {
        Self {
            options,
            incremental,
            abort,
            seen: HashSet::new(),
            hardlink_groups: HashMap::new(),
            matched_counts: HashMap::new(),
        }
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    /// Run one full pass over all include entries (spec.md §4.1).
    pub fn run(&mut self, mode: &mut PassMode) -> Result<(), Error> {
        for idx in 0..self.options.includes.len() {
            if self.aborted() {
                return Err(ArchiveCoreError::Aborted.into());
            }
            self.walk_include_entry(idx, mode)?;
        }

        // Emit any hardlink groups that never reached their expected
        // link count (spec.md §4.1 step 5).
        let remaining: Vec<_> = self.hardlink_groups.drain().map(|(_, g)| g).collect();
        for group in remaining {
            self.emit_hardlink(mode, group.paths, group.info);
        }

        if self.options.strict {
            for (idx, entry) in self.options.includes.iter().enumerate() {
                if self.matched_counts.get(&idx).copied().unwrap_or(0) == 0 {
                    return Err(
                        ArchiveCoreError::FileNotFound(entry.base_path.clone()).into(),
                    );
                }
            }
        }

        Ok(())
    }

    fn walk_include_entry(&mut self, idx: usize, mode: &mut PassMode) -> Result<(), Error> {
        let entry = self.options.includes[idx].clone();
        let base = PathBuf::from(&entry.base_path);

        let mut stack = vec![StackEntry { path: base }];

        while let Some(frame) = stack.pop() {
            if self.aborted() {
                return Err(ArchiveCoreError::Aborted.into());
            }

            let path = frame.path;

            if self.seen.contains(&path) {
                continue;
            }

            let meta = match std::fs::symlink_metadata(&path) {
                Ok(m) => m,
                Err(err) => {
                    if self.options.skip_unreadable {
                        log::warn!("skipping unreadable entry {path:?}: {err}");
                        continue;
                    }
                    return Err(err).with_context(|| format!("failed to stat {path:?}"));
                }
            };

            if !self.options.ignore_no_dump && has_nodump_attr(&path) {
                log::info!("ENTRY_EXCLUDED: no-dump attribute set: {path:?}");
                self.mark_skipped(mode, 0);
                continue;
            }

            let path_str = path.to_string_lossy().to_string();
            let st_mode = meta.mode();
            let is_directory = meta.is_dir();

            // `MatchList::matches` is only ever used here to gate an
            // *exclude*, not to gate descent: the teacher's
            // `pbs-client::pxar::create` walk descends into every
            // directory unconditionally and only `continue`s on an
            // exclude hit. An include pattern like `/data/*.txt` never
            // matches the directory `/data` itself, so requiring a
            // pattern match before descending would mean `/data` is
            // never `read_dir`'d and nothing under it is ever found.
            if self.options.excludes.any_matches(&path_str, st_mode) {
                continue;
            }

            let pattern_matched = entry.pattern.matches(&path_str, st_mode);
            if !pattern_matched && !is_directory {
                continue;
            }

            self.seen.insert(path.clone());
            if pattern_matched {
                self.matched_counts
                    .entry(idx)
                    .and_modify(|c| *c += 1)
                    .or_insert(1);
            }

            match classify(&meta) {
                Classified::Directory => {
                    if has_nobackup_marker(&path) {
                        log::info!("ENTRY_EXCLUDED: .nobackup marker: {path:?}");
                        continue;
                    }
                    // Emit the directory entry itself only if it actually
                    // matched the include pattern; descend into it either
                    // way so files further down the tree get a chance to
                    // match.
                    if pattern_matched {
                        self.dispatch_directory(mode, &path, &meta, entry.store_type);
                    }
                    if let Ok(read_dir) = std::fs::read_dir(&path) {
                        for child in read_dir.flatten() {
                            stack.push(StackEntry { path: child.path() });
                        }
                    } else if !self.options.skip_unreadable {
                        return Err(ArchiveCoreError::NotADirectory(path_str).into());
                    }
                }
                Classified::File => {
                    self.dispatch_file(mode, &path, &meta, entry.store_type)?;
                }
                Classified::Symlink => {
                    self.dispatch_symlink(mode, &path, &meta, entry.store_type)?;
                }
                Classified::HardLink => {
                    self.dispatch_hardlink(mode, &path, &meta);
                }
                Classified::Special => {
                    self.dispatch_special(mode, &path, &meta, entry.store_type)?;
                }
            }
        }

        Ok(())
    }

    fn mark_skipped(&mut self, mode: &mut PassMode, size: u64) {
        if let PassMode::Sum { progress } = mode {
            progress.add_skipped(1, size);
        }
    }

    fn dispatch_directory(
        &mut self,
        mode: &mut PassMode,
        path: &Path,
        meta: &std::fs::Metadata,
        store_type: StoreType,
    ) {
        if store_type != StoreType::File {
            return;
        }
        match mode {
            PassMode::Sum { progress } => progress.add_total(1, 0),
            PassMode::Entry { sender } => {
                let _ = sender.send(EntryWork::Directory {
                    path: path.to_path_buf(),
                    info: file_info(meta),
                });
            }
        }
    }

    fn dispatch_file(
        &mut self,
        mode: &mut PassMode,
        path: &Path,
        meta: &std::fs::Metadata,
        store_type: StoreType,
    ) -> Result<(), Error> {
        match store_type {
            StoreType::Image => {
                log::warn!("{path:?} is not a device, skipping image entry");
                return Ok(());
            }
            StoreType::File => {}
        }

        if self.options.archive_type.is_partial() {
            if let Some(incremental) = self.incremental {
                let current = Cast {
                    mtime: meta.mtime(),
                    ctime: meta.ctime(),
                };
                let path_str = path.to_string_lossy().to_string();
                if !incremental.is_changed(&path_str, current) {
                    return Ok(());
                }
            }
        }

        let info = file_info(meta);
        for fragment in fragments_for(info.size, self.options.fragment_size) {
            match mode {
                PassMode::Sum { progress } => progress.add_total(1, fragment.fragment_size),
                PassMode::Entry { sender } => {
                    let _ = sender.send(EntryWork::File {
                        path: path.to_path_buf(),
                        info: info.clone(),
                        fragment,
                    });
                }
            }
        }
        Ok(())
    }

    fn dispatch_symlink(
        &mut self,
        mode: &mut PassMode,
        path: &Path,
        meta: &std::fs::Metadata,
        store_type: StoreType,
    ) -> Result<(), Error> {
        match store_type {
            StoreType::File => {
                let target = std::fs::read_link(path).unwrap_or_default();
                match mode {
                    PassMode::Sum { progress } => progress.add_total(1, 0),
                    PassMode::Entry { sender } => {
                        let _ = sender.send(EntryWork::Link {
                            path: path.to_path_buf(),
                            target,
                            info: file_info(meta),
                        });
                    }
                }
                Ok(())
            }
            StoreType::Image => {
                // Resolve target, stat as device, fragment as image (spec §4.1 step 4).
                let target = std::fs::canonicalize(path)
                    .with_context(|| format!("failed to resolve symlink target {path:?}"))?;
                let dev_meta = std::fs::metadata(&target)
                    .with_context(|| format!("failed to stat device {target:?}"))?;
                self.dispatch_image(mode, path, &dev_meta)
            }
        }
    }

    fn dispatch_hardlink(&mut self, mode: &mut PassMode, path: &Path, meta: &std::fs::Metadata) {
        let id = InodeId {
            dev: meta.dev(),
            ino: meta.ino(),
        };
        let info = file_info(meta);

        let complete = {
            let group = self.hardlink_groups.entry(id).or_insert_with(|| HardlinkGroup {
                expected_link_count: meta.nlink(),
                paths: Vec::new(),
                info: info.clone(),
            });
            group.paths.push(path.to_path_buf());
            group.paths.len() as u64 == group.expected_link_count
        };

        if complete {
            if let Some(group) = self.hardlink_groups.remove(&id) {
                self.emit_hardlink(mode, group.paths, group.info);
            }
        }
    }

    fn emit_hardlink(&mut self, mode: &mut PassMode, paths: Vec<PathBuf>, info: FileInfo) {
        let fragment = FragmentInfo {
            fragment_number: 0,
            fragment_count: 1,
            fragment_offset: 0,
            fragment_size: info.size,
        };
        match mode {
            PassMode::Sum { progress } => progress.add_total(paths.len() as u64, info.size),
            PassMode::Entry { sender } => {
                let _ = sender.send(EntryWork::Hardlink {
                    paths,
                    info,
                    fragment,
                });
            }
        }
    }

    fn dispatch_special(
        &mut self,
        mode: &mut PassMode,
        path: &Path,
        meta: &std::fs::Metadata,
        store_type: StoreType,
    ) -> Result<(), Error> {
        let is_block_device = meta.file_type().is_block_device();
        if store_type == StoreType::Image && is_block_device {
            return self.dispatch_image(mode, path, meta);
        }

        match mode {
            PassMode::Sum { progress } => progress.add_total(1, 0),
            PassMode::Entry { sender } => {
                let _ = sender.send(EntryWork::Special {
                    path: path.to_path_buf(),
                    info: file_info(meta),
                });
            }
        }
        Ok(())
    }

    fn dispatch_image(
        &mut self,
        mode: &mut PassMode,
        path: &Path,
        meta: &std::fs::Metadata,
    ) -> Result<(), Error> {
        let size = meta.size();
        let block_size = 4096u32;
        if block_size == 0 || block_size as u64 > 64 * 1024 {
            return Err(ArchiveCoreError::InvalidDeviceBlockSize(block_size as u64).into());
        }
        let info = DeviceInfo {
            size,
            block_size,
            rdev: meta.rdev(),
        };
        for fragment in fragments_for(size, self.options.fragment_size) {
            match mode {
                PassMode::Sum { progress } => progress.add_total(1, fragment.fragment_size),
                PassMode::Entry { sender } => {
                    let _ = sender.send(EntryWork::Image {
                        path: path.to_path_buf(),
                        info: info.clone(),
                        fragment,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Fragment `[0, size)` into `ceil(size / fragment_size)` pieces (1 if
/// `fragment_size == 0`), covering the range exactly with no gaps or
/// overlaps (spec.md §8).
pub fn fragments_for(size: u64, fragment_size: u64) -> Vec<FragmentInfo> {
    if fragment_size == 0 || size == 0 {
        return vec![FragmentInfo {
            fragment_number: 0,
            fragment_count: 1,
            fragment_offset: 0,
            fragment_size: size,
        }];
    }

    let count = size.div_ceil(fragment_size);
    let mut fragments = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    for number in 0..count {
        let remaining = size - offset;
        let this_size = remaining.min(fragment_size);
        fragments.push(FragmentInfo {
            fragment_number: number as u32,
            fragment_count: count as u32,
            fragment_offset: offset,
            fragment_size: this_size,
        });
        offset += this_size;
    }
    fragments
}

/// Requires an instantiated `ArchiveType::Continuous` job to iterate a
/// row stream instead of a tree walk (spec.md §4.1 "Continuous mode
/// variant"). The journal itself is an external interface; this crate
/// only defines the shape it is consumed through.
pub trait ContinuousJournal {
    /// Next `(row_id, path)` pair, or `None` at end of stream.
    fn next_row(&mut self) -> Result<Option<(u64, PathBuf)>, Error>;
    /// Mark a row as stored after successful entry-pass emission.
    fn mark_stored(&mut self, row_id: u64) -> Result<(), Error>;
}

pub fn run_continuous_pass(
    options: &JobOptions,
    incremental: Option<&IncrementalMap>,
    abort: Arc<AtomicBool>,
    journal: &mut dyn ContinuousJournal,
    mode: &mut PassMode,
) -> Result<(), Error> {
    let mut enumerator = Enumerator::new(options, incremental, abort);
    while let Some((row_id, path)) = journal.next_row()? {
        if enumerator.aborted() {
            return Err(ArchiveCoreError::Aborted.into());
        }

        let meta = match std::fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(err) => {
                if options.skip_unreadable {
                    log::warn!("skipping unreadable journal entry {path:?}: {err}");
                    continue;
                }
                return Err(err).with_context(|| format!("failed to stat {path:?}"));
            }
        };

        if options.continuous_max_size > 0 && meta.size() > options.continuous_max_size {
            log::info!("ENTRY_EXCLUDED: continuous size cap: {path:?}");
            enumerator.mark_skipped(mode, meta.size());
            continue;
        }

        match classify(&meta) {
            Classified::Directory => enumerator.dispatch_directory(mode, &path, &meta, StoreType::File),
            Classified::File => enumerator.dispatch_file(mode, &path, &meta, StoreType::File)?,
            Classified::Symlink => enumerator.dispatch_symlink(mode, &path, &meta, StoreType::File)?,
            Classified::HardLink => enumerator.dispatch_hardlink(mode, &path, &meta),
            Classified::Special => enumerator.dispatch_special(mode, &path, &meta, StoreType::File)?,
        }

        if matches!(mode, PassMode::Entry { .. }) {
            journal.mark_stored(row_id)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_small_file_one_fragment() {
        let fragments = fragments_for(10, 0);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].fragment_offset, 0);
        assert_eq!(fragments[0].fragment_size, 10);
        assert_eq!(fragments[0].fragment_count, 1);
    }

    #[test]
    fn fragmented_file_covers_range_exactly() {
        let fragments = fragments_for(10, 4);
        assert_eq!(fragments.len(), 3);
        assert_eq!((fragments[0].fragment_offset, fragments[0].fragment_size), (0, 4));
        assert_eq!((fragments[1].fragment_offset, fragments[1].fragment_size), (4, 4));
        assert_eq!((fragments[2].fragment_offset, fragments[2].fragment_size), (8, 2));
        for f in &fragments {
            assert_eq!(f.fragment_count, 3);
        }
    }

    #[test]
    fn zero_size_file_yields_one_empty_fragment() {
        let fragments = fragments_for(0, 4);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].fragment_size, 0);
    }
}
