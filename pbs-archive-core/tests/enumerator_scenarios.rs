//! Integration scenarios from spec.md §8: single small file, fragmented
//! file, hardlink group of three, and incremental no-change, all driven
//! through the real enumerator against on-disk fixtures.

use std::os::unix::fs::MetadataExt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use pbs_archive_core::enumerator::{Enumerator, PassMode};
use pbs_archive_core::incremental::{Cast, IncrementalMap};
use pbs_archive_core::job::{ArchiveType, JobOptions};
use pbs_archive_core::message::EntryWork;
use pbs_archive_core::pattern::{IncludeEntry, StoreType};
use pbs_archive_core::progress::ProgressAggregator;

fn fixture_dir(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "pbs-archive-core-enum-test-{}-{tag}-{:?}",
        std::process::id(),
        std::thread::current().id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn entry_pass(options: &JobOptions, incremental: Option<&IncrementalMap>) -> Vec<EntryWork> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let abort = Arc::new(AtomicBool::new(false));
    let mut enumerator = Enumerator::new(options, incremental, abort);
    let mut mode = PassMode::Entry { sender: tx };
    enumerator.run(&mut mode).unwrap();
    drop(mode);
    rx.try_iter().collect()
}

#[test]
fn single_small_file_emits_one_fragment() {
    let dir = fixture_dir("single-file");
    let file_path = dir.join("a");
    std::fs::write(&file_path, b"0123456789").unwrap();

    let mut options = JobOptions::default();
    options.includes = vec![IncludeEntry::new(file_path.to_str().unwrap(), StoreType::File).unwrap()];

    let messages = entry_pass(&options, None);
    assert_eq!(messages.len(), 1);
    match &messages[0] {
        EntryWork::File { info, fragment, .. } => {
            assert_eq!(info.size, 10);
            assert_eq!(fragment.fragment_count, 1);
            assert_eq!(fragment.fragment_offset, 0);
            assert_eq!(fragment.fragment_size, 10);
        }
        other => panic!("expected File, got {other:?}"),
    }

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn fragmented_file_covers_range_with_no_gaps() {
    let dir = fixture_dir("fragmented");
    let file_path = dir.join("a");
    std::fs::write(&file_path, b"0123456789").unwrap();

    let mut options = JobOptions::default();
    options.fragment_size = 4;
    options.includes = vec![IncludeEntry::new(file_path.to_str().unwrap(), StoreType::File).unwrap()];

    let messages = entry_pass(&options, None);
    assert_eq!(messages.len(), 3);
    let offsets_sizes: Vec<(u64, u64)> = messages
        .iter()
        .map(|m| match m {
            EntryWork::File { fragment, .. } => (fragment.fragment_offset, fragment.fragment_size),
            _ => panic!("expected File"),
        })
        .collect();
    assert_eq!(offsets_sizes, vec![(0, 4), (4, 4), (8, 2)]);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn hardlink_group_of_three_emits_one_message() {
    let dir = fixture_dir("hardlinks");
    let x = dir.join("x");
    std::fs::write(&x, b"data").unwrap();
    let y = dir.join("y");
    std::fs::hard_link(&x, &y).unwrap();
    let z = dir.join("z");
    std::fs::hard_link(&x, &z).unwrap();

    assert_eq!(std::fs::metadata(&x).unwrap().nlink(), 3);

    let mut options = JobOptions::default();
    options.includes = vec![IncludeEntry::new(&format!("{}/*", dir.display()), StoreType::File).unwrap()];

    let messages = entry_pass(&options, None);
    let hardlink_messages: Vec<_> = messages
        .iter()
        .filter(|m| matches!(m, EntryWork::Hardlink { .. }))
        .collect();
    assert_eq!(hardlink_messages.len(), 1);
    match hardlink_messages[0] {
        EntryWork::Hardlink { paths, .. } => assert_eq!(paths.len(), 3),
        _ => unreachable!(),
    }

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn incremental_no_change_emits_nothing() {
    let dir = fixture_dir("incremental");
    let file_path = dir.join("a");
    std::fs::write(&file_path, b"0123456789").unwrap();
    let meta = std::fs::metadata(&file_path).unwrap();

    let mut incremental = IncrementalMap::new();
    incremental.insert(
        file_path.to_str().unwrap(),
        Cast {
            mtime: meta.mtime(),
            ctime: meta.ctime(),
        },
    );

    let mut options = JobOptions::default();
    options.archive_type = ArchiveType::Incremental;
    options.includes = vec![IncludeEntry::new(file_path.to_str().unwrap(), StoreType::File).unwrap()];

    let messages = entry_pass(&options, Some(&incremental));
    assert!(messages.is_empty());

    let progress = ProgressAggregator::new(None);
    let abort = Arc::new(AtomicBool::new(false));
    let mut enumerator = Enumerator::new(&options, Some(&incremental), abort);
    let mut sum_mode = PassMode::Sum { progress: progress.clone() };
    enumerator.run(&mut sum_mode).unwrap();
    assert_eq!(progress.snapshot().total.count, 0);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn duplicate_suppression_emits_one_message_per_path() {
    let dir = fixture_dir("dup-suppress");
    let file_path = dir.join("a");
    std::fs::write(&file_path, b"data").unwrap();

    let mut options = JobOptions::default();
    // Two include entries that both match the same file.
    options.includes = vec![
        IncludeEntry::new(file_path.to_str().unwrap(), StoreType::File).unwrap(),
        IncludeEntry::new(file_path.to_str().unwrap(), StoreType::File).unwrap(),
    ];

    let messages = entry_pass(&options, None);
    assert_eq!(messages.len(), 1);

    std::fs::remove_dir_all(&dir).ok();
}
