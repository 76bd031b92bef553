//! Incremental state: on-disk path -> (mtime, ctime) map (spec.md §2 item
//! 4, §4.3).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Error};

use crate::error::ArchiveCoreError;

const MAP_ID: &[u8; 32] = b"BAR incremental list\0\0\0\0\0\0\0\0\0\0\0\0";
const MAP_VERSION: u16 = 1;

/// The `(mtime, ctime)` change fingerprint (spec.md glossary "Cast").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cast {
    pub mtime: i64,
    pub ctime: i64,
}

/// Path -> cast map, case-sensitive keys (spec.md §3 "Incremental map").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncrementalMap {
    entries: BTreeMap<String, Cast>,
}

impl IncrementalMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Cast> {
        self.entries.get(key).copied()
    }

    pub fn insert(&mut self, key: impl Into<String>, cast: Cast) {
        self.entries.insert(key.into(), cast);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// "changed" iff absent from the map or the current cast differs
    /// (spec.md §4.3).
    pub fn is_changed(&self, key: &str, current: Cast) -> bool {
        match self.entries.get(key) {
            None => true,
            Some(stored) => *stored != current,
        }
    }

    /// Read the on-disk format described in spec.md §4.3:
    /// 32-byte ASCII id, u16 LE version, then records until EOF.
    pub fn read(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)
            .with_context(|| format!("failed to open incremental list {path:?}"))?;
        let mut reader = BufReader::new(file);

        let mut id = [0u8; 32];
        reader
            .read_exact(&mut id)
            .with_context(|| format!("failed to read incremental list header {path:?}"))?;
        if &id != MAP_ID {
            return Err(ArchiveCoreError::NotAnIncrementalFile(format!("{path:?}")).into());
        }

        let mut version_buf = [0u8; 2];
        reader.read_exact(&mut version_buf)?;
        let version = u16::from_le_bytes(version_buf);
        if version != MAP_VERSION {
            return Err(ArchiveCoreError::WrongIncrementalFileVersion(version).into());
        }

        let mut map = IncrementalMap::new();
        loop {
            let mut mtime_buf = [0u8; 8];
            match reader.read_exact(&mut mtime_buf) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            }
            let mtime = i64::from_le_bytes(mtime_buf);

            let mut ctime_buf = [0u8; 8];
            reader.read_exact(&mut ctime_buf)?;
            let ctime = i64::from_le_bytes(ctime_buf);

            let mut key_len_buf = [0u8; 2];
            reader.read_exact(&mut key_len_buf)?;
            let key_len = u16::from_le_bytes(key_len_buf) as usize;

            let mut key_buf = vec![0u8; key_len];
            reader.read_exact(&mut key_buf)?;
            let key = String::from_utf8(key_buf)
                .with_context(|| format!("non-utf8 key in incremental list {path:?}"))?;

            map.entries.insert(key, Cast { mtime, ctime });
        }

        Ok(map)
    }

    /// Write the map atomically: write to a temp file next to `path`,
    /// fsync, then rename (spec.md §4.3).
    pub fn write_atomic(&self, path: &Path) -> Result<(), Error> {
        let tmp_path = path.with_extension("tmp");
        {
            let file = File::create(&tmp_path)
                .with_context(|| format!("failed to create {tmp_path:?}"))?;
            let mut writer = BufWriter::new(&file);
            self.write_to(&mut writer)?;
            writer.flush()?;
            file.sync_all()
                .with_context(|| format!("failed to fsync {tmp_path:?}"))?;
        }
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename {tmp_path:?} to {path:?}"))?;
        Ok(())
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_all(MAP_ID)?;
        writer.write_all(&MAP_VERSION.to_le_bytes())?;
        for (key, cast) in &self.entries {
            if key.len() > u16::MAX as usize {
                bail!("incremental list key too long: {} bytes", key.len());
            }
            writer.write_all(&cast.mtime.to_le_bytes())?;
            writer.write_all(&cast.ctime.to_le_bytes())?;
            writer.write_all(&(key.len() as u16).to_le_bytes())?;
            writer.write_all(key.as_bytes())?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf).unwrap();
        buf
    }

    #[cfg(test)]
    fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let mut reader = BufReader::new(data);
        let mut id = [0u8; 32];
        reader.read_exact(&mut id)?;
        if &id != MAP_ID {
            bail!("bad id");
        }
        let mut version_buf = [0u8; 2];
        reader.read_exact(&mut version_buf)?;
        let mut map = IncrementalMap::new();
        loop {
            let mut mtime_buf = [0u8; 8];
            match reader.read_exact(&mut mtime_buf) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            }
            let mtime = i64::from_le_bytes(mtime_buf);
            let mut ctime_buf = [0u8; 8];
            reader.read_exact(&mut ctime_buf)?;
            let ctime = i64::from_le_bytes(ctime_buf);
            let mut key_len_buf = [0u8; 2];
            reader.read_exact(&mut key_len_buf)?;
            let key_len = u16::from_le_bytes(key_len_buf) as usize;
            let mut key_buf = vec![0u8; key_len];
            reader.read_exact(&mut key_buf)?;
            map.entries
                .insert(String::from_utf8(key_buf)?, Cast { mtime, ctime });
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_byte_exact() {
        let mut map = IncrementalMap::new();
        map.insert("/t/a", Cast { mtime: 100, ctime: 100 });
        map.insert("/t/b", Cast { mtime: 200, ctime: 150 });

        let bytes = map.to_bytes();
        let restored = IncrementalMap::from_bytes(&bytes).unwrap();
        assert_eq!(map, restored);
    }

    #[test]
    fn unchanged_cast_is_not_changed() {
        let mut map = IncrementalMap::new();
        map.insert("/t/a", Cast { mtime: 100, ctime: 100 });
        assert!(!map.is_changed("/t/a", Cast { mtime: 100, ctime: 100 }));
        assert!(map.is_changed("/t/a", Cast { mtime: 101, ctime: 100 }));
    }

    #[test]
    fn absent_key_is_changed() {
        let map = IncrementalMap::new();
        assert!(map.is_changed("/t/a", Cast { mtime: 0, ctime: 0 }));
    }

    #[test]
    fn rejects_wrong_id() {
        let mut bytes = vec![0u8; 34];
        bytes[..4].copy_from_slice(b"nope");
        let err = IncrementalMap::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("bad id"));
    }

    #[test]
    fn write_and_read_round_trip_on_disk() {
        let dir = std::env::temp_dir().join(format!(
            "pbs-archive-core-test-{}-{}",
            std::process::id(),
            line!()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("incremental.dat");

        let mut map = IncrementalMap::new();
        map.insert("/t/a", Cast { mtime: 1, ctime: 2 });
        map.write_atomic(&path).unwrap();

        let restored = IncrementalMap::read(&path).unwrap();
        assert_eq!(map, restored);

        std::fs::remove_dir_all(&dir).ok();
    }
}
