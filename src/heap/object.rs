use std::fmt;
use std::sync::Arc;

use crate::heap::class::Class;
use crate::index::{FLAG_CLASS_STUB, FLAG_INSTANCE, FLAG_OBJECT_ARRAY, FLAG_PRIMITIVE_ARRAY};
use crate::parser::values::FieldType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Instance,
    ObjectArray,
    PrimitiveArray,
    Class,
}

impl ObjectKind {
    pub fn from_flag(flag: u8) -> Option<ObjectKind> {
        match flag {
            FLAG_INSTANCE => Some(ObjectKind::Instance),
            FLAG_OBJECT_ARRAY => Some(ObjectKind::ObjectArray),
            FLAG_PRIMITIVE_ARRAY => Some(ObjectKind::PrimitiveArray),
            FLAG_CLASS_STUB => Some(ObjectKind::Class),
            _ => None,
        }
    }

    pub fn flag(self) -> u8 {
        match self {
            ObjectKind::Instance => FLAG_INSTANCE,
            ObjectKind::ObjectArray => FLAG_OBJECT_ARRAY,
            ObjectKind::PrimitiveArray => FLAG_PRIMITIVE_ARRAY,
            ObjectKind::Class => FLAG_CLASS_STUB,
        }
    }
}

/// A heap object materialised from the objects index. Plain data, fully
/// reconstructible from the index, so the LRU can evict freely.
#[derive(Clone)]
pub struct HeapObject {
    pub address: u64,
    pub id32: u32,
    pub kind: ObjectKind,
    /// 0 when the owning class could not be resolved.
    pub class_address: u64,
    pub class: Option<Arc<Class>>,
    /// Dump file offset of the instance payload.
    pub data_position: u64,
    pub data_size: u32,
    pub shallow_size: u64,
    /// -1 when the object is not an array.
    pub array_length: i32,
    /// Element type for primitive arrays.
    pub element_type: Option<FieldType>,
    /// Missing until the retained index has been computed.
    pub retained_size: Option<u64>,
    /// Outbound reference addresses, materialised on first access.
    pub(crate) outbound: Option<Arc<[u64]>>,
}

impl HeapObject {
    pub fn is_array(&self) -> bool {
        matches!(self.kind, ObjectKind::ObjectArray | ObjectKind::PrimitiveArray)
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class.as_deref().map(|c| &*c.name)
    }
}

impl fmt::Debug for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapObject")
            .field("address", &format_args!("0x{:x}", self.address))
            .field("id32", &self.id32)
            .field("kind", &self.kind)
            .field("class", &self.class_name().unwrap_or("?"))
            .field("shallow_size", &self.shallow_size)
            .field("array_length", &self.array_length)
            .finish()
    }
}

/// Label of one reference edge, used when reporting paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeLabel {
    /// Instance or static field name.
    Field(Box<str>),
    /// Array element index.
    Element(u32),
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeLabel::Field(name) => write!(f, "{name}"),
            EdgeLabel::Element(i) => write!(f, "[{i}]"),
        }
    }
}

/// GC root kinds, standard and extended tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootKind {
    Unknown,
    JniGlobal,
    JniLocal,
    JavaFrame,
    NativeStack,
    StickyClass,
    ThreadBlock,
    MonitorUsed,
    ThreadObject,
    InternedString,
    Finalizing,
    Debugger,
    ReferenceCleanup,
    VmInternal,
    JniMonitor,
    Unreachable,
}

impl RootKind {
    pub fn from_tag(tag: u8) -> Option<RootKind> {
        match tag {
            0xFF => Some(RootKind::Unknown),
            0x01 => Some(RootKind::JniGlobal),
            0x02 => Some(RootKind::JniLocal),
            0x03 => Some(RootKind::JavaFrame),
            0x04 => Some(RootKind::NativeStack),
            0x05 => Some(RootKind::StickyClass),
            0x06 => Some(RootKind::ThreadBlock),
            0x07 => Some(RootKind::MonitorUsed),
            0x08 => Some(RootKind::ThreadObject),
            0x89 => Some(RootKind::InternedString),
            0x8a => Some(RootKind::Finalizing),
            0x8b => Some(RootKind::Debugger),
            0x8c => Some(RootKind::ReferenceCleanup),
            0x8d => Some(RootKind::VmInternal),
            0x8e => Some(RootKind::JniMonitor),
            0x90 => Some(RootKind::Unreachable),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            RootKind::Unknown => 0xFF,
            RootKind::JniGlobal => 0x01,
            RootKind::JniLocal => 0x02,
            RootKind::JavaFrame => 0x03,
            RootKind::NativeStack => 0x04,
            RootKind::StickyClass => 0x05,
            RootKind::ThreadBlock => 0x06,
            RootKind::MonitorUsed => 0x07,
            RootKind::ThreadObject => 0x08,
            RootKind::InternedString => 0x89,
            RootKind::Finalizing => 0x8a,
            RootKind::Debugger => 0x8b,
            RootKind::ReferenceCleanup => 0x8c,
            RootKind::VmInternal => 0x8d,
            RootKind::JniMonitor => 0x8e,
            RootKind::Unreachable => 0x90,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RootKind::Unknown => "unknown",
            RootKind::JniGlobal => "JNI global",
            RootKind::JniLocal => "JNI local",
            RootKind::JavaFrame => "Java frame",
            RootKind::NativeStack => "native stack",
            RootKind::StickyClass => "sticky class",
            RootKind::ThreadBlock => "thread block",
            RootKind::MonitorUsed => "monitor used",
            RootKind::ThreadObject => "thread object",
            RootKind::InternedString => "interned string",
            RootKind::Finalizing => "finalizing",
            RootKind::Debugger => "debugger",
            RootKind::ReferenceCleanup => "reference cleanup",
            RootKind::VmInternal => "VM internal",
            RootKind::JniMonitor => "JNI monitor",
            RootKind::Unreachable => "unreachable",
        }
    }
}

/// One persisted GC root. `thread_serial` and `frame_number` are -1 for root
/// kinds that do not carry them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcRoot {
    pub kind: RootKind,
    pub object_id32: u32,
    pub thread_serial: i32,
    pub frame_number: i32,
}
