//! Work and storage messages (spec.md §3, §9 "Tagged variants for work
//! messages").
//!
//! The original C code uses an anonymous union with an external tag; per
//! spec.md §9 this is re-expressed as a sum type with one variant per
//! entry kind, so every owned field is visible to the type system and to
//! `Drop`.

use std::path::PathBuf;

/// Minimal file metadata carried with a work message. The archive writer
/// (an external interface, spec.md §1) owns the full stat structure; this
/// crate only needs what the enumerator and worker decide on.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub size: u64,
    pub mtime: i64,
    pub ctime: i64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub dev: u64,
    pub ino: u64,
    pub nlink: u64,
    pub rdev: u64,
}

/// Device metadata for image entries (block size, device node info).
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub size: u64,
    pub block_size: u32,
    pub rdev: u64,
}

/// Fragmentation parameters shared by file/image/hardlink variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentInfo {
    pub fragment_number: u32,
    pub fragment_count: u32,
    pub fragment_offset: u64,
    pub fragment_size: u64,
}

/// One unit of work produced by the enumerator and consumed by a worker
/// (spec.md §3 "Entry work message").
#[derive(Debug, Clone)]
pub enum EntryWork {
    File {
        path: PathBuf,
        info: FileInfo,
        fragment: FragmentInfo,
    },
    Image {
        path: PathBuf,
        info: DeviceInfo,
        fragment: FragmentInfo,
    },
    Directory {
        path: PathBuf,
        info: FileInfo,
    },
    Link {
        path: PathBuf,
        target: PathBuf,
        info: FileInfo,
    },
    Hardlink {
        /// All paths sharing the inode id, in the order they were visited.
        paths: Vec<PathBuf>,
        info: FileInfo,
        fragment: FragmentInfo,
    },
    Special {
        path: PathBuf,
        info: FileInfo,
    },
}

impl EntryWork {
    /// The primary path, used for logging, fragment-map keys and
    /// duplicate suppression (the first path for hardlink groups).
    pub fn primary_path(&self) -> &std::path::Path {
        match self {
            EntryWork::File { path, .. }
            | EntryWork::Image { path, .. }
            | EntryWork::Directory { path, .. }
            | EntryWork::Link { path, .. }
            | EntryWork::Special { path, .. } => path,
            EntryWork::Hardlink { paths, .. } => &paths[0],
        }
    }

    pub fn fragment(&self) -> Option<FragmentInfo> {
        match self {
            EntryWork::File { fragment, .. }
            | EntryWork::Image { fragment, .. }
            | EntryWork::Hardlink { fragment, .. } => Some(*fragment),
            _ => None,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            EntryWork::File { info, .. } | EntryWork::Directory { info, .. } => info.size,
            EntryWork::Link { info, .. } | EntryWork::Special { info, .. } => info.size,
            EntryWork::Hardlink { info, .. } => info.size,
            EntryWork::Image { info, .. } => info.size,
        }
    }
}

/// One completed archive segment awaiting transfer to the storage
/// back-end (spec.md §3 "Storage message"). Owns the intermediate file
/// name; invariant: the file exists until the message is processed or
/// explicitly discarded.
#[derive(Debug, Clone)]
pub struct StorageMessage {
    pub uuid_id: String,
    pub entity_id: String,
    pub storage_id: Option<String>,
    pub intermediate_file_name: PathBuf,
    pub intermediate_file_size: u64,
    pub archive_name: String,
}

impl StorageMessage {
    /// Delete the intermediate file if it still exists. Called both on
    /// the normal processed path and on queue-drain teardown, per
    /// spec.md §3's "freed by consumer or by queue-drain callback"
    /// lifecycle.
    pub fn discard(self) {
        if self.intermediate_file_name.exists() {
            if let Err(err) = std::fs::remove_file(&self.intermediate_file_name) {
                log::warn!(
                    "failed to remove intermediate file {:?}: {}",
                    self.intermediate_file_name,
                    err
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_info() -> FileInfo {
        FileInfo {
            size: 10,
            mtime: 0,
            ctime: 0,
            mode: 0o100644,
            uid: 0,
            gid: 0,
            dev: 1,
            ino: 1,
            nlink: 1,
            rdev: 0,
        }
    }

    #[test]
    fn hardlink_primary_path_is_first_visited() {
        let work = EntryWork::Hardlink {
            paths: vec!["/t/y".into(), "/t/x".into(), "/t/z".into()],
            info: file_info(),
            fragment: FragmentInfo {
                fragment_number: 0,
                fragment_count: 1,
                fragment_offset: 0,
                fragment_size: 10,
            },
        };
        assert_eq!(work.primary_path(), std::path::Path::new("/t/y"));
    }

    #[test]
    fn directory_has_no_fragment_info() {
        let work = EntryWork::Directory {
            path: "/t".into(),
            info: file_info(),
        };
        assert!(work.fragment().is_none());
    }
}
