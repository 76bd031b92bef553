//! Name/pattern matcher (spec §2 item 3, §3 "Pattern" row).
//!
//! Grounded on `pbs-client::pxar::create`, which drives a
//! `pathpatterns::MatchEntry` list against each candidate path; this
//! module generalizes that to the three pattern kinds
//! `original_source/bar/bar/patterns.h` actually distinguishes (glob,
//! regex, exact), each with an optional case-insensitive flag
//! (spec.md SPEC_FULL §3).

use anyhow::{Context, Error};
use pathpatterns::{MatchEntry, MatchList, MatchType, PatternFlag};
use regex::RegexBuilder;

/// One compiled pattern. Compiled once per pattern, per spec.md's
/// "Pattern" invariant.
#[derive(Clone)]
pub enum Pattern {
    Glob {
        entry: MatchEntry,
        case_insensitive: bool,
    },
    Regex {
        source: String,
        regex: regex::Regex,
    },
    Exact {
        text: String,
        case_insensitive: bool,
    },
}

impl Pattern {
    /// `pathpatterns` has no case-folding `MatchFlag` (confirmed against
    /// every `MatchEntry`/`MatchFlag` use in the corpus: only `ANCHORED` and
    /// `MATCH_DIRECTORIES` appear), so a case-insensitive glob is compiled
    /// against a lowercased pattern and matched against a lowercased path
    /// instead, the same fold `Pattern::Exact` already applies via
    /// `eq_ignore_ascii_case`.
    pub fn glob(pattern: &str, case_insensitive: bool) -> Result<Self, Error> {
        let compiled = if case_insensitive {
            pattern.to_ascii_lowercase()
        } else {
            pattern.to_string()
        };
        let entry = MatchEntry::parse_pattern(&compiled, PatternFlag::PATH_NAME, MatchType::Include)
            .with_context(|| format!("invalid glob pattern {pattern:?}"))?;
        Ok(Pattern::Glob {
            entry,
            case_insensitive,
        })
    }

    pub fn regex(pattern: &str, case_insensitive: bool) -> Result<Self, Error> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .with_context(|| format!("invalid regex pattern {pattern:?}"))?;
        Ok(Pattern::Regex {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn exact(text: &str, case_insensitive: bool) -> Self {
        Pattern::Exact {
            text: text.to_string(),
            case_insensitive,
        }
    }

    /// Test whether `path` matches this pattern. `path` is expected to be
    /// an absolute, `/`-separated path string, matching the convention
    /// `pbs-client::pxar::create` uses when calling `MatchList::matches`.
    /// `mode` is the entry's real `st_mode` (e.g. `pxar::mode::IFDIR` for a
    /// directory, as `pbs-datastore::catalog::get_file_mode` produces) so
    /// `pathpatterns`' directory-aware matching (trailing-`/`-anchored
    /// patterns, `MATCH_DIRECTORIES`) behaves the way the teacher's
    /// `pxar::create` walk relies on; passing a constant here is what let a
    /// directory always read as a non-directory.
    pub fn matches(&self, path: &str, mode: u32) -> bool {
        match self {
            Pattern::Glob {
                entry,
                case_insensitive,
            } => {
                let list = std::slice::from_ref(entry);
                let folded;
                let path_bytes = if *case_insensitive {
                    folded = path.to_ascii_lowercase();
                    folded.as_bytes()
                } else {
                    path.as_bytes()
                };
                matches!(
                    list.matches(path_bytes, || Ok::<_, std::convert::Infallible>(mode)),
                    Ok(Some(MatchType::Include))
                )
            }
            Pattern::Regex { regex, .. } => regex.is_match(path),
            Pattern::Exact {
                text,
                case_insensitive,
            } => {
                if *case_insensitive {
                    text.eq_ignore_ascii_case(path)
                } else {
                    text == path
                }
            }
        }
    }
}

/// An independent list of patterns evaluated with "first match wins"
/// semantics, used both for excludes and for compress-excludes.
#[derive(Clone, Default)]
pub struct PatternList {
    patterns: Vec<Pattern>,
}

impl PatternList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pattern: Pattern) {
        self.patterns.push(pattern);
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn any_matches(&self, path: &str, mode: u32) -> bool {
        self.patterns.iter().any(|p| p.matches(path, mode))
    }
}

/// `storeType` for an include entry (spec.md §3 "Include entry" row).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    File,
    Image,
}

/// One include entry: a pattern plus its store-type tag. Immutable during
/// a run.
#[derive(Clone)]
pub struct IncludeEntry {
    pub pattern: Pattern,
    pub store_type: StoreType,
    /// The literal, non-glob prefix of the pattern, used as the traversal
    /// base path (spec.md §4.1 algorithm step 1).
    pub base_path: String,
}

impl IncludeEntry {
    pub fn new(raw_pattern: &str, store_type: StoreType) -> Result<Self, Error> {
        let base_path = literal_prefix(raw_pattern);
        let pattern = Pattern::glob(raw_pattern, false)?;
        Ok(Self {
            pattern,
            store_type,
            base_path,
        })
    }
}

/// Split the include pattern at the first glob metacharacter; the literal
/// prefix becomes the base path (spec.md §4.1 step 1).
pub fn literal_prefix(pattern: &str) -> String {
    const META: &[char] = &['*', '?', '[', '{'];
    match pattern.find(META) {
        Some(idx) => {
            let prefix = &pattern[..idx];
            match prefix.rfind('/') {
                Some(slash) => prefix[..=slash].trim_end_matches('/').to_string(),
                None => String::from("."),
            }
        }
        None => pattern.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern_matches_only_itself() {
        let p = Pattern::exact("/t/a", false);
        assert!(p.matches("/t/a", 0));
        assert!(!p.matches("/t/b", 0));
    }

    #[test]
    fn exact_pattern_case_insensitive() {
        let p = Pattern::exact("/T/A", true);
        assert!(p.matches("/t/a", 0));
    }

    #[test]
    fn regex_pattern_matches_substrings() {
        let p = Pattern::regex(r"\.tmp$", false).unwrap();
        assert!(p.matches("/t/file.tmp", 0));
        assert!(!p.matches("/t/file.txt", 0));
    }

    #[test]
    fn glob_pattern_matches_case_sensitively_by_default() {
        let p = Pattern::glob("/t/*.TXT", false).unwrap();
        assert!(p.matches("/t/a.TXT", 0));
        assert!(!p.matches("/t/a.txt", 0));
    }

    #[test]
    fn glob_pattern_case_insensitive_folds_both_sides() {
        let p = Pattern::glob("/t/*.TXT", true).unwrap();
        assert!(p.matches("/t/a.txt", 0));
        assert!(p.matches("/t/A.Txt", 0));
    }

    #[test]
    fn literal_prefix_splits_at_first_metacharacter() {
        assert_eq!(literal_prefix("/home/user/*.txt"), "/home/user");
        assert_eq!(literal_prefix("/home/user/file"), "/home/user/file");
        assert_eq!(literal_prefix("*.txt"), ".");
    }

    #[test]
    fn pattern_list_any_matches() {
        let mut list = PatternList::new();
        list.push(Pattern::exact("/t/a", false));
        assert!(list.any_matches("/t/a", 0));
        assert!(!list.any_matches("/t/b", 0));
    }
}
