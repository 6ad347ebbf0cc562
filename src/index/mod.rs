//! On-disk index layout shared by the writer and reader.
//!
//! Six fixed-entry-size files live in a `<dump>.idx/` directory next to the
//! dump. Each starts with a 20-byte little-endian header (magic, version,
//! entry count, flags) and is memory-mapped for reads. The version is global
//! across all indexes and bumped together; any mismatch means rebuild.
//!
//! The `flags` word carries a fingerprint of the dump (length and capture
//! timestamp) so indexes built for a different dump file are rejected
//! instead of misread.

use std::io::{self, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

pub mod reader;
pub mod writer;

pub use reader::IndexReader;
pub use writer::IndexWriter;

pub const INDEX_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 20;

/// Object entry `flags` byte.
pub const FLAG_INSTANCE: u8 = 0;
pub const FLAG_OBJECT_ARRAY: u8 = 1;
pub const FLAG_PRIMITIVE_ARRAY: u8 = 2;
pub const FLAG_CLASS_STUB: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    Objects,
    ObjectMap,
    ClassMap,
    GcRoots,
    Inbound,
    Retained,
}

impl IndexKind {
    pub fn magic(self) -> u32 {
        match self {
            IndexKind::Objects => 0x4F_42_4A_53,  // "OBJS"
            IndexKind::ObjectMap => 0x4F_4D_41_50, // "OMAP"
            IndexKind::ClassMap => 0x43_4D_41_50,  // "CMAP"
            IndexKind::GcRoots => 0x47_43_52_54,   // "GCRT"
            IndexKind::Inbound => 0x49_4E_42_44,   // "INBD"
            IndexKind::Retained => 0x52_45_54_4E,  // "RETN"
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            IndexKind::Objects => "objects.idx",
            IndexKind::ObjectMap => "objectmap.idx",
            IndexKind::ClassMap => "classmap.idx",
            IndexKind::GcRoots => "gcroots.idx",
            IndexKind::Inbound => "inbound.idx",
            IndexKind::Retained => "retained.idx",
        }
    }

    pub fn entry_size(self) -> usize {
        match self {
            IndexKind::Objects => ObjectEntry::SIZE,
            IndexKind::ObjectMap | IndexKind::ClassMap => 12,
            IndexKind::GcRoots => 13,
            IndexKind::Inbound => 4,
            IndexKind::Retained => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub magic: u32,
    pub version: u32,
    pub entry_count: u64,
    pub flags: u32,
}

impl IndexHeader {
    pub fn new(kind: IndexKind, entry_count: u64, fingerprint: u32) -> Self {
        IndexHeader {
            magic: kind.magic(),
            version: INDEX_VERSION,
            entry_count,
            flags: fingerprint,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.magic)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u64::<LittleEndian>(self.entry_count)?;
        w.write_u32::<LittleEndian>(self.flags)
    }

    pub fn read_from(buf: &[u8]) -> Option<IndexHeader> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        Some(IndexHeader {
            magic: LittleEndian::read_u32(&buf[0..4]),
            version: LittleEndian::read_u32(&buf[4..8]),
            entry_count: LittleEndian::read_u64(&buf[8..16]),
            flags: LittleEndian::read_u32(&buf[16..20]),
        })
    }
}

/// Per-object metadata entry of `objects.idx`, sorted by `object_id32` so
/// entry `i` sits at `HEADER_LEN + i * SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectEntry {
    pub object_id32: u32,
    pub file_offset: u64,
    pub data_size: u32,
    pub class_id32: i32,
    pub array_length: i32,
    pub flags: u8,
    pub element_type: u8,
}

impl ObjectEntry {
    pub const SIZE: usize = 26;

    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.object_id32)?;
        w.write_u64::<LittleEndian>(self.file_offset)?;
        w.write_u32::<LittleEndian>(self.data_size)?;
        w.write_i32::<LittleEndian>(self.class_id32)?;
        w.write_i32::<LittleEndian>(self.array_length)?;
        w.write_u8(self.flags)?;
        w.write_u8(self.element_type)
    }

    pub fn read_from(buf: &[u8]) -> ObjectEntry {
        ObjectEntry {
            object_id32: LittleEndian::read_u32(&buf[0..4]),
            file_offset: LittleEndian::read_u64(&buf[4..12]),
            data_size: LittleEndian::read_u32(&buf[12..16]),
            class_id32: LittleEndian::read_i32(&buf[16..20]),
            array_length: LittleEndian::read_i32(&buf[20..24]),
            flags: buf[24],
            element_type: buf[25],
        }
    }
}
