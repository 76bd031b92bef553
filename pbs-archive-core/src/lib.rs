//! Archive creation core: the subsystem that consumes a declarative
//! backup job description (include entries, exclude patterns,
//! compression/crypt policy, storage target) and produces a signed,
//! chunked archive on a storage back-end, optionally registering it in an
//! index database.
//!
//! The archive chunk encoder, storage back-end, index database, crypto,
//! delta-source reconstruction, PAR2 parity generation and continuous-mode
//! change journal are external interfaces ([`external`]), not owned by
//! this crate. CLI, config parsing, job persistence and logging setup stay
//! wholly out of scope; this crate only does enumeration, the entry store
//! workers, the storage dispatcher and the run controller that ties them
//! together.

pub mod controller;
pub mod dispatch;
pub mod enumerator;
pub mod error;
pub mod external;
pub mod fragment_map;
pub mod incremental;
pub mod job;
pub mod message;
pub mod pattern;
pub mod progress;
pub mod storage_dispatch;
pub mod worker;
