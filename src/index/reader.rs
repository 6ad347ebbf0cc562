use std::fs::File;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;

use crate::errors::HprofDelveError;
use crate::heap::object::{GcRoot, RootKind};
use crate::index::{IndexHeader, IndexKind, ObjectEntry, HEADER_LEN, INDEX_VERSION};

enum Source {
    Mapped(Mmap),
    Memory(Vec<u8>),
}

/// Validated read-only view over one index, either memory-mapped from disk or
/// over an owned buffer (in-memory parsing mode). Any validation failure is a
/// stale-index error, which callers treat as "absent, rebuild".
pub struct IndexReader {
    kind: IndexKind,
    header: IndexHeader,
    source: Source,
}

impl std::fmt::Debug for IndexReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexReader")
            .field("kind", &self.kind)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl IndexReader {
    pub fn open(dir: &Path, kind: IndexKind, fingerprint: u32) -> Result<Self, HprofDelveError> {
        let path = dir.join(kind.file_name());
        let file = File::open(&path).map_err(|e| HprofDelveError::StaleIndex {
            path: path.clone(),
            reason: format!("cannot open: {e}"),
        })?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| HprofDelveError::StaleIndex {
            path: path.clone(),
            reason: format!("cannot map: {e}"),
        })?;
        Self::validate(kind, path, Source::Mapped(mmap), fingerprint)
    }

    pub fn from_buffer(
        kind: IndexKind,
        buffer: Vec<u8>,
        fingerprint: u32,
    ) -> Result<Self, HprofDelveError> {
        Self::validate(kind, PathBuf::from("<memory>"), Source::Memory(buffer), fingerprint)
    }

    fn validate(
        kind: IndexKind,
        path: PathBuf,
        source: Source,
        fingerprint: u32,
    ) -> Result<Self, HprofDelveError> {
        let stale = |reason: String| HprofDelveError::StaleIndex {
            path: path.clone(),
            reason,
        };
        let bytes = match &source {
            Source::Mapped(mmap) => &mmap[..],
            Source::Memory(buffer) => buffer.as_slice(),
        };
        let header = IndexHeader::read_from(bytes)
            .ok_or_else(|| stale("truncated header".to_string()))?;
        if header.magic != kind.magic() {
            return Err(stale(format!(
                "magic mismatch, expected 0x{:08x} got 0x{:08x}",
                kind.magic(),
                header.magic
            )));
        }
        if header.version != INDEX_VERSION {
            return Err(stale(format!(
                "version mismatch, expected {INDEX_VERSION} got {}",
                header.version
            )));
        }
        if header.flags != fingerprint {
            return Err(stale(format!(
                "dump fingerprint mismatch, expected 0x{fingerprint:08x} got 0x{:08x}",
                header.flags
            )));
        }
        let expected_len = HEADER_LEN as u64 + header.entry_count * kind.entry_size() as u64;
        if bytes.len() as u64 != expected_len {
            return Err(stale(format!(
                "entry count {} inconsistent with file size {}",
                header.entry_count,
                bytes.len()
            )));
        }
        Ok(IndexReader {
            kind,
            header,
            source,
        })
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn entry_count(&self) -> u64 {
        self.header.entry_count
    }

    fn bytes(&self) -> &[u8] {
        match &self.source {
            Source::Mapped(mmap) => &mmap[..],
            Source::Memory(buffer) => buffer.as_slice(),
        }
    }

    /// Fixed-width entry `index`, or `None` past the end.
    pub fn entry(&self, index: u64) -> Option<&[u8]> {
        if index >= self.header.entry_count {
            return None;
        }
        let size = self.kind.entry_size();
        let start = HEADER_LEN + index as usize * size;
        Some(&self.bytes()[start..start + size])
    }

    pub fn object_entry(&self, id32: u32) -> Option<ObjectEntry> {
        self.entry(u64::from(id32)).map(ObjectEntry::read_from)
    }

    pub fn map_entry(&self, index: u64) -> Option<(u32, u64)> {
        self.entry(index).map(|buf| {
            (
                LittleEndian::read_u32(&buf[0..4]),
                LittleEndian::read_u64(&buf[4..12]),
            )
        })
    }

    pub fn root_entry(&self, index: u64) -> Option<GcRoot> {
        let buf = self.entry(index)?;
        let kind = RootKind::from_tag(buf[0])?;
        Some(GcRoot {
            kind,
            object_id32: LittleEndian::read_u32(&buf[1..5]),
            thread_serial: LittleEndian::read_i32(&buf[5..9]),
            frame_number: LittleEndian::read_i32(&buf[9..13]),
        })
    }

    /// Direct-addressed u32 slot (`inbound.idx`).
    pub fn u32_slot(&self, slot: u64) -> Option<u32> {
        self.entry(slot).map(LittleEndian::read_u32)
    }

    /// Direct-addressed u64 slot (`retained.idx`).
    pub fn u64_slot(&self, slot: u64) -> Option<u64> {
        self.entry(slot).map(LittleEndian::read_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::writer::IndexWriter;
    use std::io::Write as _;

    const FP: u32 = 0xabcd;

    #[test]
    fn disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = IndexWriter::create(dir.path(), IndexKind::ObjectMap, FP).unwrap();
        writer.append_map_entry(0, 0x1000).unwrap();
        writer.append_map_entry(1, 0x2000).unwrap();
        writer.commit().unwrap();

        let reader = IndexReader::open(dir.path(), IndexKind::ObjectMap, FP).unwrap();
        assert_eq!(reader.entry_count(), 2);
        assert_eq!(reader.map_entry(0), Some((0, 0x1000)));
        assert_eq!(reader.map_entry(1), Some((1, 0x2000)));
        assert_eq!(reader.map_entry(2), None);
    }

    #[test]
    fn memory_round_trip() {
        let mut writer = IndexWriter::in_memory(IndexKind::Inbound, FP).unwrap();
        for count in [3u32, 0, 9] {
            writer.append_u32(count).unwrap();
        }
        let buffer = writer.commit().unwrap().unwrap();
        let reader = IndexReader::from_buffer(IndexKind::Inbound, buffer, FP).unwrap();
        assert_eq!(reader.u32_slot(0), Some(3));
        assert_eq!(reader.u32_slot(1), Some(0));
        assert_eq!(reader.u32_slot(2), Some(9));
        assert_eq!(reader.u32_slot(3), None);
    }

    #[test]
    fn missing_file_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let err = IndexReader::open(dir.path(), IndexKind::Objects, FP).unwrap_err();
        assert!(err.is_stale_index());
    }

    #[test]
    fn truncated_file_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = IndexWriter::create(dir.path(), IndexKind::Inbound, FP).unwrap();
        writer.append_u32(1).unwrap();
        writer.append_u32(2).unwrap();
        writer.commit().unwrap();

        let path = dir.path().join("inbound.idx");
        let bytes = std::fs::read(&path).unwrap();
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&bytes[..bytes.len() - 2]).unwrap();
        drop(file);

        assert!(IndexReader::open(dir.path(), IndexKind::Inbound, FP)
            .unwrap_err()
            .is_stale_index());
    }

    #[test]
    fn wrong_magic_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = IndexWriter::create(dir.path(), IndexKind::Inbound, FP).unwrap();
        writer.append_u32(1).unwrap();
        writer.commit().unwrap();

        // an inbound payload under the retained file name has the wrong magic
        std::fs::rename(
            dir.path().join("inbound.idx"),
            dir.path().join("retained.idx"),
        )
        .unwrap();
        assert!(IndexReader::open(dir.path(), IndexKind::Retained, FP)
            .unwrap_err()
            .is_stale_index());
    }

    #[test]
    fn foreign_fingerprint_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = IndexWriter::create(dir.path(), IndexKind::Inbound, FP).unwrap();
        writer.append_u32(1).unwrap();
        writer.commit().unwrap();

        assert!(IndexReader::open(dir.path(), IndexKind::Inbound, FP ^ 1)
            .unwrap_err()
            .is_stale_index());
    }
}
