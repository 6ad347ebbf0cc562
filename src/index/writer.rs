use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::errors::HprofDelveError;
use crate::heap::object::GcRoot;
use crate::index::{IndexHeader, IndexKind, ObjectEntry, HEADER_LEN};

enum Sink {
    File {
        writer: BufWriter<File>,
        tmp_path: PathBuf,
        final_path: PathBuf,
    },
    Memory(Cursor<Vec<u8>>),
}

/// Streaming index writer. Entries are appended through a buffered sink; the
/// header (with the final entry count) is patched in on `commit`. Disk sinks
/// write to a `.tmp` name and rename on success, so a partially written index
/// is never observable under the final name. Dropping an uncommitted disk
/// writer removes the temp file.
pub struct IndexWriter {
    kind: IndexKind,
    fingerprint: u32,
    entry_count: u64,
    sink: Option<Sink>,
}

impl IndexWriter {
    pub fn create(dir: &Path, kind: IndexKind, fingerprint: u32) -> Result<Self, HprofDelveError> {
        fs::create_dir_all(dir)?;
        let final_path = dir.join(kind.file_name());
        let tmp_path = dir.join(format!("{}.tmp", kind.file_name()));
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        IndexHeader::new(kind, 0, fingerprint).write_to(&mut writer)?;
        Ok(IndexWriter {
            kind,
            fingerprint,
            entry_count: 0,
            sink: Some(Sink::File {
                writer,
                tmp_path,
                final_path,
            }),
        })
    }

    pub fn in_memory(kind: IndexKind, fingerprint: u32) -> Result<Self, HprofDelveError> {
        let mut cursor = Cursor::new(Vec::new());
        IndexHeader::new(kind, 0, fingerprint).write_to(&mut cursor)?;
        Ok(IndexWriter {
            kind,
            fingerprint,
            entry_count: 0,
            sink: Some(Sink::Memory(cursor)),
        })
    }

    fn sink_writer(&mut self) -> &mut dyn Write {
        match self.sink.as_mut().expect("writer already committed") {
            Sink::File { writer, .. } => writer,
            Sink::Memory(cursor) => cursor,
        }
    }

    pub fn append_object(&mut self, entry: &ObjectEntry) -> Result<(), HprofDelveError> {
        entry.write_to(self.sink_writer())?;
        self.entry_count += 1;
        Ok(())
    }

    /// `objectmap.idx` / `classmap.idx` entry: dense id plus dump address.
    pub fn append_map_entry(&mut self, id: u32, address: u64) -> Result<(), HprofDelveError> {
        let w = self.sink_writer();
        w.write_u32::<LittleEndian>(id)?;
        w.write_u64::<LittleEndian>(address)?;
        self.entry_count += 1;
        Ok(())
    }

    pub fn append_root(&mut self, root: &GcRoot) -> Result<(), HprofDelveError> {
        let w = self.sink_writer();
        w.write_u8(root.kind.tag())?;
        w.write_u32::<LittleEndian>(root.object_id32)?;
        w.write_i32::<LittleEndian>(root.thread_serial)?;
        w.write_i32::<LittleEndian>(root.frame_number)?;
        self.entry_count += 1;
        Ok(())
    }

    /// Direct-addressed `inbound.idx` slot.
    pub fn append_u32(&mut self, value: u32) -> Result<(), HprofDelveError> {
        self.sink_writer().write_u32::<LittleEndian>(value)?;
        self.entry_count += 1;
        Ok(())
    }

    /// Direct-addressed `retained.idx` slot.
    pub fn append_u64(&mut self, value: u64) -> Result<(), HprofDelveError> {
        self.sink_writer().write_u64::<LittleEndian>(value)?;
        self.entry_count += 1;
        Ok(())
    }

    /// Finish the index: patch the header with the final entry count and make
    /// the result observable. Returns the backing buffer for memory sinks.
    pub fn commit(mut self) -> Result<Option<Vec<u8>>, HprofDelveError> {
        let header = IndexHeader::new(self.kind, self.entry_count, self.fingerprint);
        match self.sink.take().expect("writer already committed") {
            Sink::File {
                mut writer,
                tmp_path,
                final_path,
            } => {
                writer.flush()?;
                let mut file = writer
                    .into_inner()
                    .map_err(|e| HprofDelveError::StdIoError(e.into_error()))?;
                file.seek(SeekFrom::Start(0))?;
                header.write_to(&mut file)?;
                file.sync_all()?;
                drop(file);
                fs::rename(&tmp_path, &final_path)?;
                Ok(None)
            }
            Sink::Memory(cursor) => {
                let mut buffer = cursor.into_inner();
                let mut patched = Vec::with_capacity(HEADER_LEN);
                header.write_to(&mut patched)?;
                buffer[..HEADER_LEN].copy_from_slice(&patched);
                Ok(Some(buffer))
            }
        }
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        if let Some(Sink::File { tmp_path, .. }) = self.sink.take() {
            let _ = fs::remove_file(tmp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_disk_writer_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut writer = IndexWriter::create(dir.path(), IndexKind::Inbound, 7).unwrap();
            writer.append_u32(1).unwrap();
            // dropped without commit
        }
        assert!(!dir.path().join("inbound.idx").exists());
        assert!(!dir.path().join("inbound.idx.tmp").exists());
    }

    #[test]
    fn memory_commit_patches_entry_count() {
        let mut writer = IndexWriter::in_memory(IndexKind::Retained, 7).unwrap();
        writer.append_u64(11).unwrap();
        writer.append_u64(22).unwrap();
        let buffer = writer.commit().unwrap().unwrap();
        let header = IndexHeader::read_from(&buffer).unwrap();
        assert_eq!(header.entry_count, 2);
        assert_eq!(header.flags, 7);
        assert_eq!(buffer.len(), HEADER_LEN + 16);
    }
}
