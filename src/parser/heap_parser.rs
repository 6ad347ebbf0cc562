use ahash::AHashMap;

use crate::errors::HprofDelveError;
use crate::heap::addresses::AddressMap;
use crate::heap::object::{GcRoot, RootKind};
use crate::index::{
    ObjectEntry, FLAG_CLASS_STUB, FLAG_INSTANCE, FLAG_OBJECT_ARRAY, FLAG_PRIMITIVE_ARRAY,
};
use crate::parser::class_dump::{parse_class_dump, skip_class_dump, RawClassDump};
use crate::parser::cursor::BinaryCursor;
use crate::parser::values::FieldType;
use crate::utils::ProgressSink;

const TAG_UTF8: u8 = 0x01;
const TAG_LOAD_CLASS: u8 = 0x02;
const TAG_HEAP_DUMP: u8 = 0x0C;
const TAG_HEAP_DUMP_SEGMENT: u8 = 0x1C;

const TAG_GC_ROOT_JNI_GLOBAL: u8 = 0x01;
const TAG_GC_ROOT_JNI_LOCAL: u8 = 0x02;
const TAG_GC_ROOT_JAVA_FRAME: u8 = 0x03;
const TAG_GC_ROOT_NATIVE_STACK: u8 = 0x04;
const TAG_GC_ROOT_STICKY_CLASS: u8 = 0x05;
const TAG_GC_ROOT_THREAD_BLOCK: u8 = 0x06;
const TAG_GC_ROOT_MONITOR_USED: u8 = 0x07;
const TAG_GC_ROOT_THREAD_OBJ: u8 = 0x08;
const TAG_GC_CLASS_DUMP: u8 = 0x20;
const TAG_GC_INSTANCE_DUMP: u8 = 0x21;
const TAG_GC_OBJ_ARRAY_DUMP: u8 = 0x22;
const TAG_GC_PRIM_ARRAY_DUMP: u8 = 0x23;
const TAG_GC_ROOT_INTERNED_STRING: u8 = 0x89;
const TAG_GC_ROOT_FINALIZING: u8 = 0x8a;
const TAG_GC_ROOT_DEBUGGER: u8 = 0x8b;
const TAG_GC_ROOT_REFERENCE_CLEANUP: u8 = 0x8c;
const TAG_GC_ROOT_VM_INTERNAL: u8 = 0x8d;
const TAG_GC_ROOT_JNI_MONITOR: u8 = 0x8e;
const TAG_GC_ROOT_UNKNOWN: u8 = 0xFF;
const TAG_GC_UNREACHABLE: u8 = 0x90;
const TAG_GC_HEAP_DUMP_INFO: u8 = 0xfe;

const PROGRESS_RECORD_STRIDE: u64 = 1024;

/// One heap-dump record body inside the dump file.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub body_position: u64,
    pub length: u32,
}

/// Everything the address-collection pass produces. `object_addresses` stays
/// empty when the pass runs in classes-only mode (index fast path).
#[derive(Default)]
pub struct Pass1Data {
    pub strings: AHashMap<u64, Box<str>>,
    /// class address -> name id from class-load records
    pub class_names: AHashMap<u64, u64>,
    pub class_dumps: Vec<RawClassDump>,
    pub object_addresses: Vec<u64>,
    pub class_addresses: Vec<u64>,
    pub segments: Vec<Segment>,
}

/// Index-build pass output: object entries (sorted by id32), the dense class
/// id allocation and the decoded GC roots.
pub struct Pass2Data {
    pub entries: Vec<ObjectEntry>,
    pub class_ids: Vec<u64>,
    pub gc_roots: Vec<GcRoot>,
}

/// Decoded payload of a root sub-record. `HEAP_DUMP_INFO` carries no object
/// target and yields `None`.
struct RawRoot {
    target: u64,
    thread_serial: i32,
    frame_number: i32,
}

/// Two-pass walker over the dump records.
pub struct HprofParser {
    cursor: BinaryCursor,
    records_start: u64,
}

impl HprofParser {
    pub fn new(cursor: BinaryCursor, records_start: u64) -> Self {
        HprofParser {
            cursor,
            records_start,
        }
    }

    /// Pass 1: walk every record, collect the string table, class-load names,
    /// class metadata, and (unless `classes_only`) every object and class
    /// address seen in heap-dump sub-records.
    pub fn pass1(
        &mut self,
        classes_only: bool,
        progress: &mut ProgressSink,
    ) -> Result<Pass1Data, HprofDelveError> {
        let mut data = Pass1Data::default();
        let file_len = self.cursor.length();
        let id_size = self.cursor.id_size();
        let message = if classes_only {
            "Reloading class metadata"
        } else {
            "Scanning heap dump (pass 1)"
        };

        self.cursor.seek(self.records_start);
        let mut records = 0u64;
        while self.cursor.more() {
            let header = self.cursor.read_record_header()?;
            match header.tag {
                TAG_UTF8 => {
                    if header.length < id_size {
                        return Err(HprofDelveError::Corruption {
                            offset: header.body_position,
                            message: format!("UTF-8 record shorter than an id: {}", header.length),
                        });
                    }
                    let name_id = self.cursor.read_id()?;
                    let text = self.cursor.read_bytes((header.length - id_size) as usize)?;
                    let text: Box<str> = String::from_utf8_lossy(text).into();
                    data.strings.insert(name_id, text);
                }
                TAG_LOAD_CLASS => {
                    let _serial = self.cursor.read_u4()?;
                    let class_address = self.cursor.read_id()?;
                    let _stack_trace_serial = self.cursor.read_u4()?;
                    let name_id = self.cursor.read_id()?;
                    data.class_names.insert(class_address, name_id);
                    self.cursor.skip_record_body(&header)?;
                }
                TAG_HEAP_DUMP | TAG_HEAP_DUMP_SEGMENT => {
                    let segment = Segment {
                        body_position: header.body_position,
                        length: header.length,
                    };
                    data.segments.push(segment);
                    self.walk_segment_pass1(segment, classes_only, &mut data)?;
                }
                _ => self.cursor.skip_record_body(&header)?,
            }
            records += 1;
            if records % PROGRESS_RECORD_STRIDE == 0 {
                progress.report(self.cursor.position() as f64 / file_len as f64, message);
            }
        }
        progress.report(1.0, message);
        Ok(data)
    }

    fn walk_segment_pass1(
        &mut self,
        segment: Segment,
        classes_only: bool,
        data: &mut Pass1Data,
    ) -> Result<(), HprofDelveError> {
        let end = segment_end(&self.cursor, segment)?;
        let id_size = u64::from(self.cursor.id_size());
        self.cursor.seek(segment.body_position);
        while self.cursor.position() < end {
            let sub_start = self.cursor.position();
            let tag = self.cursor.read_u1()?;
            match tag {
                TAG_GC_CLASS_DUMP => {
                    let dump = parse_class_dump(&mut self.cursor)?;
                    if !classes_only {
                        data.class_addresses.push(dump.class_address);
                    }
                    data.class_dumps.push(dump);
                }
                TAG_GC_INSTANCE_DUMP => {
                    let address = self.cursor.read_id()?;
                    let _stack_trace_serial = self.cursor.read_u4()?;
                    let _class_address = self.cursor.read_id()?;
                    let data_size = self.cursor.read_u4()?;
                    self.cursor.skip(i64::from(data_size))?;
                    if !classes_only {
                        data.object_addresses.push(address);
                    }
                }
                TAG_GC_OBJ_ARRAY_DUMP => {
                    let address = self.cursor.read_id()?;
                    let _stack_trace_serial = self.cursor.read_u4()?;
                    let length = self.cursor.read_u4()?;
                    let _array_class_address = self.cursor.read_id()?;
                    self.cursor.skip((u64::from(length) * id_size) as i64)?;
                    if !classes_only {
                        data.object_addresses.push(address);
                    }
                }
                TAG_GC_PRIM_ARRAY_DUMP => {
                    let address = self.cursor.read_id()?;
                    let _stack_trace_serial = self.cursor.read_u4()?;
                    let length = self.cursor.read_u4()?;
                    let element = self.read_element_type(sub_start)?;
                    let payload = u64::from(length) * u64::from(element.byte_size(id_size as u32));
                    self.cursor.skip(payload as i64)?;
                    if !classes_only {
                        data.object_addresses.push(address);
                    }
                }
                root_tag => {
                    // root payloads are skipped here, enumeration happens in pass 2
                    self.read_root_body(root_tag, sub_start)?;
                }
            }
            if self.cursor.position() > end {
                return Err(HprofDelveError::Corruption {
                    offset: sub_start,
                    message: "sub-record runs past the heap dump segment boundary".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Pass 2: walk the heap-dump segments again and emit object entries with
    /// exact payload offsets, the lazily allocated dense class ids, and the
    /// decoded GC roots (only those resolving to a known address).
    pub fn pass2(
        &mut self,
        segments: &[Segment],
        addresses: &AddressMap,
        progress: &mut ProgressSink,
    ) -> Result<Pass2Data, HprofDelveError> {
        let id_size = u64::from(self.cursor.id_size());
        let mut entries: Vec<ObjectEntry> = Vec::with_capacity(addresses.len() as usize);
        let mut class_id_by_address: AHashMap<u64, i32> = AHashMap::new();
        let mut class_ids: Vec<u64> = Vec::new();
        let mut gc_roots: Vec<GcRoot> = Vec::new();

        let total_bytes: u64 = segments.iter().map(|s| u64::from(s.length)).sum();
        let mut walked_bytes = 0u64;

        for segment in segments {
            let end = segment_end(&self.cursor, *segment)?;
            self.cursor.seek(segment.body_position);
            while self.cursor.position() < end {
                let sub_start = self.cursor.position();
                let tag = self.cursor.read_u1()?;
                match tag {
                    TAG_GC_CLASS_DUMP => {
                        let class_address = skip_class_dump(&mut self.cursor)?;
                        // sentinel entry so roots pointing at classes resolve
                        let id32 = resolve_id32(addresses, class_address, sub_start)?;
                        entries.push(ObjectEntry {
                            object_id32: id32,
                            file_offset: 0,
                            data_size: 0,
                            class_id32: -1,
                            array_length: -1,
                            flags: FLAG_CLASS_STUB,
                            element_type: 0,
                        });
                    }
                    TAG_GC_INSTANCE_DUMP => {
                        let address = self.cursor.read_id()?;
                        let _stack_trace_serial = self.cursor.read_u4()?;
                        let class_address = self.cursor.read_id()?;
                        let data_size = self.cursor.read_u4()?;
                        let file_offset = self.cursor.position();
                        self.cursor.skip(i64::from(data_size))?;
                        entries.push(ObjectEntry {
                            object_id32: resolve_id32(addresses, address, sub_start)?,
                            file_offset,
                            data_size,
                            class_id32: alloc_class_id(
                                &mut class_id_by_address,
                                &mut class_ids,
                                class_address,
                            ),
                            array_length: -1,
                            flags: FLAG_INSTANCE,
                            element_type: 0,
                        });
                    }
                    TAG_GC_OBJ_ARRAY_DUMP => {
                        let address = self.cursor.read_id()?;
                        let _stack_trace_serial = self.cursor.read_u4()?;
                        let length = self.cursor.read_u4()?;
                        let class_address = self.cursor.read_id()?;
                        let file_offset = self.cursor.position();
                        let payload = u64::from(length) * id_size;
                        self.cursor.skip(payload as i64)?;
                        entries.push(ObjectEntry {
                            object_id32: resolve_id32(addresses, address, sub_start)?,
                            file_offset,
                            data_size: payload_size_u32(payload, sub_start)?,
                            class_id32: alloc_class_id(
                                &mut class_id_by_address,
                                &mut class_ids,
                                class_address,
                            ),
                            array_length: length as i32,
                            flags: FLAG_OBJECT_ARRAY,
                            element_type: 0,
                        });
                    }
                    TAG_GC_PRIM_ARRAY_DUMP => {
                        let address = self.cursor.read_id()?;
                        let _stack_trace_serial = self.cursor.read_u4()?;
                        let length = self.cursor.read_u4()?;
                        let element = self.read_element_type(sub_start)?;
                        let file_offset = self.cursor.position();
                        let payload =
                            u64::from(length) * u64::from(element.byte_size(id_size as u32));
                        self.cursor.skip(payload as i64)?;
                        entries.push(ObjectEntry {
                            object_id32: resolve_id32(addresses, address, sub_start)?,
                            file_offset,
                            data_size: payload_size_u32(payload, sub_start)?,
                            class_id32: -1,
                            array_length: length as i32,
                            flags: FLAG_PRIMITIVE_ARRAY,
                            element_type: element.tag(),
                        });
                    }
                    root_tag => {
                        if let Some(raw) = self.read_root_body(root_tag, sub_start)? {
                            // only roots that resolve to a known address are kept
                            if let Some(id32) = addresses.id32_of(raw.target) {
                                let kind = RootKind::from_tag(root_tag).ok_or(
                                    HprofDelveError::UnknownSubRecordTag {
                                        offset: sub_start,
                                        tag: root_tag,
                                    },
                                )?;
                                gc_roots.push(GcRoot {
                                    kind,
                                    object_id32: id32,
                                    thread_serial: raw.thread_serial,
                                    frame_number: raw.frame_number,
                                });
                            }
                        }
                    }
                }
                if self.cursor.position() > end {
                    return Err(HprofDelveError::Corruption {
                        offset: sub_start,
                        message: "sub-record runs past the heap dump segment boundary".to_string(),
                    });
                }
            }
            walked_bytes += u64::from(segment.length);
            progress.report(
                walked_bytes as f64 / total_bytes.max(1) as f64,
                "Indexing heap objects (pass 2)",
            );
        }

        entries.sort_unstable_by_key(|e| e.object_id32);
        entries.dedup_by_key(|e| e.object_id32);
        if entries.len() != addresses.len() as usize {
            return Err(HprofDelveError::Corruption {
                offset: 0,
                message: format!(
                    "object entry count {} does not match the address map size {}",
                    entries.len(),
                    addresses.len()
                ),
            });
        }

        Ok(Pass2Data {
            entries,
            class_ids,
            gc_roots,
        })
    }

    fn read_element_type(&mut self, sub_start: u64) -> Result<FieldType, HprofDelveError> {
        let tag = self.cursor.read_u1()?;
        match FieldType::from_tag(tag) {
            Some(FieldType::Object) | None => Err(HprofDelveError::Corruption {
                offset: sub_start,
                message: format!("invalid primitive array element type {tag}"),
            }),
            Some(element) => Ok(element),
        }
    }

    /// Decode the body of a root sub-record. An unrecognised tag is fatal:
    /// there is no way to know its length, every byte after it would be
    /// misread.
    fn read_root_body(
        &mut self,
        tag: u8,
        sub_start: u64,
    ) -> Result<Option<RawRoot>, HprofDelveError> {
        match tag {
            TAG_GC_ROOT_UNKNOWN
            | TAG_GC_ROOT_STICKY_CLASS
            | TAG_GC_ROOT_MONITOR_USED
            | TAG_GC_ROOT_INTERNED_STRING
            | TAG_GC_ROOT_FINALIZING
            | TAG_GC_ROOT_DEBUGGER
            | TAG_GC_ROOT_REFERENCE_CLEANUP
            | TAG_GC_ROOT_VM_INTERNAL
            | TAG_GC_UNREACHABLE => {
                let target = self.cursor.read_id()?;
                Ok(Some(RawRoot {
                    target,
                    thread_serial: -1,
                    frame_number: -1,
                }))
            }
            TAG_GC_ROOT_JNI_GLOBAL => {
                let target = self.cursor.read_id()?;
                let _jni_global_ref_id = self.cursor.read_id()?;
                Ok(Some(RawRoot {
                    target,
                    thread_serial: -1,
                    frame_number: -1,
                }))
            }
            TAG_GC_ROOT_NATIVE_STACK | TAG_GC_ROOT_THREAD_BLOCK => {
                let target = self.cursor.read_id()?;
                let thread_serial = self.cursor.read_u4()?;
                Ok(Some(RawRoot {
                    target,
                    thread_serial: thread_serial as i32,
                    frame_number: -1,
                }))
            }
            TAG_GC_ROOT_JNI_LOCAL | TAG_GC_ROOT_JAVA_FRAME | TAG_GC_ROOT_JNI_MONITOR => {
                let target = self.cursor.read_id()?;
                let thread_serial = self.cursor.read_u4()?;
                let frame_number = self.cursor.read_u4()?;
                Ok(Some(RawRoot {
                    target,
                    thread_serial: thread_serial as i32,
                    frame_number: frame_number as i32,
                }))
            }
            TAG_GC_ROOT_THREAD_OBJ => {
                let target = self.cursor.read_id()?;
                let thread_serial = self.cursor.read_u4()?;
                let _stack_trace_serial = self.cursor.read_u4()?;
                Ok(Some(RawRoot {
                    target,
                    thread_serial: thread_serial as i32,
                    frame_number: -1,
                }))
            }
            TAG_GC_HEAP_DUMP_INFO => {
                let _heap_id = self.cursor.read_u4()?;
                let _heap_name_id = self.cursor.read_id()?;
                Ok(None)
            }
            unknown => Err(HprofDelveError::UnknownSubRecordTag {
                offset: sub_start,
                tag: unknown,
            }),
        }
    }
}

fn segment_end(cursor: &BinaryCursor, segment: Segment) -> Result<u64, HprofDelveError> {
    let end = segment.body_position + u64::from(segment.length);
    if end > cursor.length() {
        return Err(HprofDelveError::Corruption {
            offset: segment.body_position,
            message: format!(
                "heap dump segment length {} overruns the file",
                segment.length
            ),
        });
    }
    Ok(end)
}

fn resolve_id32(
    addresses: &AddressMap,
    address: u64,
    offset: u64,
) -> Result<u32, HprofDelveError> {
    addresses
        .id32_of(address)
        .ok_or_else(|| HprofDelveError::Corruption {
            offset,
            message: format!("object address 0x{address:x} was not collected in pass 1"),
        })
}

fn alloc_class_id(
    class_id_by_address: &mut AHashMap<u64, i32>,
    class_ids: &mut Vec<u64>,
    class_address: u64,
) -> i32 {
    *class_id_by_address.entry(class_address).or_insert_with(|| {
        class_ids.push(class_address);
        (class_ids.len() - 1) as i32
    })
}

fn payload_size_u32(payload: u64, offset: u64) -> Result<u32, HprofDelveError> {
    u32::try_from(payload).map_err(|_| HprofDelveError::Corruption {
        offset,
        message: format!("array payload of {payload} bytes exceeds the record size limit"),
    })
}
