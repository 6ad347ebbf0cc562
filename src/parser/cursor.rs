use std::sync::Arc;

use memmap2::Mmap;
use nom::number::streaming as number;

use crate::errors::HprofDelveError;
use crate::parser::values::{FieldType, Value};

/// Top-level record header: tag, body length and the position of the first
/// body byte. The record timestamp is read and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub tag: u8,
    pub length: u32,
    pub body_position: u64,
}

/// Positioned random-access reader over the memory-mapped dump file.
///
/// Cloning is cheap (the mapping is shared), so independent walkers can each
/// hold their own position into the same dump.
#[derive(Clone)]
pub struct BinaryCursor {
    data: Arc<Mmap>,
    pos: usize,
    id_size: u32,
}

impl BinaryCursor {
    pub fn new(data: Arc<Mmap>, id_size: u32) -> Self {
        BinaryCursor {
            data,
            pos: 0,
            id_size,
        }
    }

    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    pub fn seek(&mut self, pos: u64) {
        self.pos = pos as usize;
    }

    pub fn skip(&mut self, delta: i64) -> Result<(), HprofDelveError> {
        let next = self.pos as i64 + delta;
        if next < 0 {
            return Err(self.corrupt("seek before start of file"));
        }
        self.pos = next as usize;
        Ok(())
    }

    pub fn length(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn more(&self) -> bool {
        self.pos < self.data.len()
    }

    pub fn id_size(&self) -> u32 {
        self.id_size
    }

    fn corrupt(&self, message: &str) -> HprofDelveError {
        HprofDelveError::Corruption {
            offset: self.pos as u64,
            message: message.to_string(),
        }
    }

    /// The dump format is big-endian; decode through nom's streaming number
    /// parsers, turning `Incomplete` into a corruption error at the current
    /// offset.
    fn read_with<T>(
        &mut self,
        parser: fn(&[u8]) -> nom::IResult<&[u8], T, nom::error::Error<&[u8]>>,
    ) -> Result<T, HprofDelveError> {
        let start = self.pos.min(self.data.len());
        let remaining = &self.data[start..];
        match parser(remaining) {
            Ok((rest, value)) => {
                self.pos = start + (remaining.len() - rest.len());
                Ok(value)
            }
            Err(_) => Err(self.corrupt("unexpected end of data")),
        }
    }

    pub fn read_u1(&mut self) -> Result<u8, HprofDelveError> {
        self.read_with(|i| number::be_u8(i))
    }

    pub fn read_u2(&mut self) -> Result<u16, HprofDelveError> {
        self.read_with(|i| number::be_u16(i))
    }

    pub fn read_u4(&mut self) -> Result<u32, HprofDelveError> {
        self.read_with(|i| number::be_u32(i))
    }

    pub fn read_i4(&mut self) -> Result<i32, HprofDelveError> {
        self.read_with(|i| number::be_i32(i))
    }

    /// Identifier-sized word, 4 or 8 bytes as fixed by the dump header.
    /// 4-byte identifiers are widened to u64.
    pub fn read_id(&mut self) -> Result<u64, HprofDelveError> {
        if self.id_size == 4 {
            self.read_with(|i| number::be_u32(i)).map(u64::from)
        } else {
            self.read_with(|i| number::be_u64(i))
        }
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&[u8], HprofDelveError> {
        let start = self.pos;
        let end = match start.checked_add(n) {
            Some(end) if end <= self.data.len() => end,
            _ => return Err(self.corrupt("unexpected end of data")),
        };
        self.pos = end;
        Ok(&self.data[start..end])
    }

    /// Typed scalar decode by primitive tag.
    pub fn read_value(&mut self, field_type: FieldType) -> Result<Value, HprofDelveError> {
        match field_type {
            FieldType::Object => self.read_id().map(Value::Reference),
            FieldType::Bool => self.read_with(|i| number::be_u8(i)).map(|b| Value::Bool(b != 0)),
            FieldType::Char => self.read_with(|i| number::be_u16(i)).map(Value::Char),
            FieldType::Float => self.read_with(|i| number::be_f32(i)).map(Value::Float),
            FieldType::Double => self.read_with(|i| number::be_f64(i)).map(Value::Double),
            FieldType::Byte => self.read_with(|i| number::be_i8(i)).map(Value::Byte),
            FieldType::Short => self.read_with(|i| number::be_i16(i)).map(Value::Short),
            FieldType::Int => self.read_with(|i| number::be_i32(i)).map(Value::Int),
            FieldType::Long => self.read_with(|i| number::be_i64(i)).map(Value::Long),
        }
    }

    pub fn read_record_header(&mut self) -> Result<RecordHeader, HprofDelveError> {
        let tag = self.read_u1()?;
        let _micros_since_header = self.read_u4()?;
        let length = self.read_u4()?;
        Ok(RecordHeader {
            tag,
            length,
            body_position: self.position(),
        })
    }

    pub fn skip_record_body(&mut self, header: &RecordHeader) -> Result<(), HprofDelveError> {
        let end = header.body_position + u64::from(header.length);
        if end > self.length() {
            return Err(HprofDelveError::Corruption {
                offset: header.body_position,
                message: format!("record length {} overruns the file", header.length),
            });
        }
        self.seek(end);
        Ok(())
    }
}
