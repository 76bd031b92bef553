//! Data model entities from spec.md §3: include entries, job options.

use serde::{Deserialize, Serialize};

use crate::pattern::{IncludeEntry, PatternList};

/// `archiveFileMode` (spec.md §3 "Job options" row).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFileMode {
    Overwrite,
    Append,
    Rename,
}

/// Compression algorithm pair applied by the archive writer (delta + byte).
/// Concrete algorithms are the archive writer's concern (spec.md §1); this
/// crate only carries the configuration through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressAlgorithms {
    pub delta: Option<String>,
    pub byte: Option<String>,
    /// Entries smaller than this are never compressed (spec.md §4.2).
    pub compress_min_file_size: u64,
}

/// Up to four configured crypt algorithms (spec.md §3 "Job options").
/// Only the first is ever passed to the archive writer's `newFileEntry`
/// (Open Question, SPEC_FULL.md §5) -- the remaining three are carried
/// but intentionally not wired anywhere.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryptAlgorithms {
    pub algorithms: Vec<String>,
    pub crypt_type: Option<String>,
    pub password_mode: Option<String>,
}

impl CryptAlgorithms {
    /// The only algorithm the archive writer ever sees.
    pub fn primary(&self) -> Option<&str> {
        self.algorithms.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveType {
    Full,
    Incremental,
    Differential,
    Continuous,
}

impl ArchiveType {
    pub fn is_partial(self) -> bool {
        matches!(self, ArchiveType::Incremental | ArchiveType::Differential)
    }
}

/// Job options (spec.md §3 "Job options" row). Immutable during a run.
/// Derives `Serialize`/`Deserialize` so it can be embedded in job
/// persistence the way `pbs-config`'s section-config entities are, even
/// though job persistence itself stays out of scope (spec.md §1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(skip)]
    pub includes: Vec<IncludeEntry>,
    #[serde(skip)]
    pub excludes: PatternList,
    #[serde(skip)]
    pub compress_excludes: PatternList,

    pub archive_type: ArchiveType,
    pub archive_file_mode: ArchiveFileMode,

    pub fragment_size: u64,
    pub max_storage_size: u64,
    pub max_tmp_size: u64,
    pub continuous_max_size: u64,

    pub compress: CompressAlgorithms,
    pub crypt: CryptAlgorithms,

    pub skip_unreadable: bool,
    pub no_storage: bool,
    pub dry_run: bool,
    pub no_stop_on_attribute_error: bool,
    pub ignore_no_dump: bool,
    pub raw_images: bool,
    pub test_created: bool,

    /// If an include pattern matches zero paths at entry-pass end and this
    /// is set, the run fails with `FILE_NOT_FOUND_` (spec.md §4.1).
    pub strict: bool,

    pub max_threads: usize,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            includes: Vec::new(),
            excludes: PatternList::new(),
            compress_excludes: PatternList::new(),
            archive_type: ArchiveType::Full,
            archive_file_mode: ArchiveFileMode::Overwrite,
            fragment_size: 0,
            max_storage_size: 0,
            max_tmp_size: 0,
            continuous_max_size: 0,
            compress: CompressAlgorithms::default(),
            crypt: CryptAlgorithms::default(),
            skip_unreadable: false,
            no_storage: false,
            dry_run: false,
            no_stop_on_attribute_error: false,
            ignore_no_dump: false,
            raw_images: false,
            test_created: false,
            strict: false,
            max_threads: num_cpus(),
        }
    }
}

/// CPU count, the default `maxThreads` per spec.md §4.5 step 8.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_use_cpu_count_threads() {
        let opts = JobOptions::default();
        assert!(opts.max_threads >= 1);
    }

    #[test]
    fn crypt_primary_is_first_configured_algorithm() {
        let crypt = CryptAlgorithms {
            algorithms: vec!["aes-256".into(), "twofish".into()],
            ..Default::default()
        };
        assert_eq!(crypt.primary(), Some("aes-256"));
    }

    #[test]
    fn archive_type_partial_classification() {
        assert!(ArchiveType::Incremental.is_partial());
        assert!(ArchiveType::Differential.is_partial());
        assert!(!ArchiveType::Full.is_partial());
        assert!(!ArchiveType::Continuous.is_partial());
    }
}
