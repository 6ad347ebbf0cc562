#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

pub const TYPE_OBJECT: u8 = 2;
pub const TYPE_BOOL: u8 = 4;
pub const TYPE_CHAR: u8 = 5;
pub const TYPE_FLOAT: u8 = 6;
pub const TYPE_DOUBLE: u8 = 7;
pub const TYPE_BYTE: u8 = 8;
pub const TYPE_SHORT: u8 = 9;
pub const TYPE_INT: u8 = 10;
pub const TYPE_LONG: u8 = 11;

fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn push_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn elem_size(tag: u8) -> usize {
    match tag {
        TYPE_BOOL | TYPE_BYTE => 1,
        TYPE_CHAR | TYPE_SHORT => 2,
        TYPE_FLOAT | TYPE_INT => 4,
        TYPE_DOUBLE | TYPE_LONG => 8,
        other => panic!("not a primitive element tag: {other}"),
    }
}

/// Assembles a well-formed 64-bit hprof dump byte by byte: UTF-8 and
/// class-load records first, then one heap-dump record with all queued
/// sub-records, then the heap-dump-end marker.
pub struct DumpBuilder {
    records: Vec<u8>,
    heap: Vec<u8>,
}

impl DumpBuilder {
    pub fn new() -> Self {
        DumpBuilder {
            records: Vec::new(),
            heap: Vec::new(),
        }
    }

    fn record(&mut self, tag: u8, body: &[u8]) -> &mut Self {
        self.records.push(tag);
        push_u32(&mut self.records, 0);
        push_u32(&mut self.records, body.len() as u32);
        self.records.extend_from_slice(body);
        self
    }

    pub fn utf8(&mut self, id: u64, text: &str) -> &mut Self {
        let mut body = Vec::new();
        push_u64(&mut body, id);
        body.extend_from_slice(text.as_bytes());
        self.record(0x01, &body)
    }

    pub fn load_class(&mut self, class_address: u64, name_id: u64) -> &mut Self {
        let mut body = Vec::new();
        push_u32(&mut body, 1);
        push_u64(&mut body, class_address);
        push_u32(&mut body, 0);
        push_u64(&mut body, name_id);
        self.record(0x02, &body)
    }

    /// `static_refs` are (field name id, target address) pairs of
    /// object-typed static fields; `fields` are (name id, type tag) instance
    /// field declarations.
    pub fn class_dump(
        &mut self,
        address: u64,
        super_address: u64,
        instance_size: u32,
        static_refs: &[(u64, u64)],
        fields: &[(u64, u8)],
    ) -> &mut Self {
        let h = &mut self.heap;
        h.push(0x20);
        push_u64(h, address);
        push_u32(h, 0);
        push_u64(h, super_address);
        push_u64(h, 0); // classloader
        push_u64(h, 0); // signers
        push_u64(h, 0); // protection domain
        push_u64(h, 0); // reserved
        push_u64(h, 0); // reserved
        push_u32(h, instance_size);
        push_u16(h, 0); // constant pool
        push_u16(h, static_refs.len() as u16);
        for &(name_id, target) in static_refs {
            push_u64(h, name_id);
            h.push(TYPE_OBJECT);
            push_u64(h, target);
        }
        push_u16(h, fields.len() as u16);
        for &(name_id, type_tag) in fields {
            push_u64(h, name_id);
            h.push(type_tag);
        }
        self
    }

    pub fn instance(&mut self, address: u64, class_address: u64, payload: &[u8]) -> &mut Self {
        let h = &mut self.heap;
        h.push(0x21);
        push_u64(h, address);
        push_u32(h, 0);
        push_u64(h, class_address);
        push_u32(h, payload.len() as u32);
        h.extend_from_slice(payload);
        self
    }

    /// Instance whose payload is exactly the given reference values.
    pub fn instance_with_refs(
        &mut self,
        address: u64,
        class_address: u64,
        refs: &[u64],
    ) -> &mut Self {
        let mut payload = Vec::new();
        for &target in refs {
            push_u64(&mut payload, target);
        }
        self.instance(address, class_address, &payload)
    }

    pub fn object_array(
        &mut self,
        address: u64,
        class_address: u64,
        elements: &[u64],
    ) -> &mut Self {
        let h = &mut self.heap;
        h.push(0x22);
        push_u64(h, address);
        push_u32(h, 0);
        push_u32(h, elements.len() as u32);
        push_u64(h, class_address);
        for &element in elements {
            push_u64(h, element);
        }
        self
    }

    /// Primitive array with a zero-filled payload.
    pub fn prim_array(&mut self, address: u64, element_tag: u8, count: u32) -> &mut Self {
        let h = &mut self.heap;
        h.push(0x23);
        push_u64(h, address);
        push_u32(h, 0);
        push_u32(h, count);
        h.push(element_tag);
        h.extend(std::iter::repeat(0u8).take(count as usize * elem_size(element_tag)));
        self
    }

    pub fn root_unknown(&mut self, target: u64) -> &mut Self {
        self.heap.push(0xFF);
        push_u64(&mut self.heap, target);
        self
    }

    pub fn root_java_frame(&mut self, target: u64, thread: u32, frame: u32) -> &mut Self {
        self.heap.push(0x03);
        push_u64(&mut self.heap, target);
        push_u32(&mut self.heap, thread);
        push_u32(&mut self.heap, frame);
        self
    }

    pub fn root_thread_obj(&mut self, target: u64, thread: u32, stack_trace: u32) -> &mut Self {
        self.heap.push(0x08);
        push_u64(&mut self.heap, target);
        push_u32(&mut self.heap, thread);
        push_u32(&mut self.heap, stack_trace);
        self
    }

    /// Raw bytes spliced into the heap segment, for corruption tests.
    pub fn raw_heap_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.heap.extend_from_slice(bytes);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"JAVA PROFILE 1.0.2\0");
        push_u32(&mut out, 8);
        push_u64(&mut out, 1_700_000_000_000);
        out.extend_from_slice(&self.records);
        out.push(0x0C); // heap dump
        push_u32(&mut out, 0);
        push_u32(&mut out, self.heap.len() as u32);
        out.extend_from_slice(&self.heap);
        out.push(0x2C); // heap dump end
        push_u32(&mut out, 0);
        push_u32(&mut out, 0);
        out
    }

    /// Write the dump into a fresh temp directory (so index files land
    /// there too) and return the directory guard plus the dump path.
    pub fn write_temp(&self) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heap.hprof");
        fs::write(&path, self.build()).unwrap();
        (dir, path)
    }
}
