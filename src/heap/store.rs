use std::sync::Arc;

use crate::errors::HprofDelveError;
use crate::heap::addresses::AddressMap;
use crate::heap::class::ClassTable;
use crate::heap::lru::LruCache;
use crate::heap::object::{EdgeLabel, HeapObject, ObjectKind};
use crate::index::reader::IndexReader;
use crate::index::ObjectEntry;
use crate::parser::cursor::BinaryCursor;
use crate::parser::values::FieldType;

/// Bytes charged for the object header on top of the recorded payload
/// length, for instances and arrays alike. The real VM header layout is a
/// renderer concern; the engine only needs a consistent, documented policy.
pub const OBJECT_HEADER_BYTES: u64 = 8;

/// Lazy object materialisation over the objects index.
///
/// Direct lookups go through a bounded LRU; streaming iteration bypasses it
/// so whole-heap passes keep an O(1) working set.
pub struct ObjectStore {
    cursor: BinaryCursor,
    objects: IndexReader,
    addresses: Arc<AddressMap>,
    classes: Arc<ClassTable>,
    /// Dense classId32 -> class address, mirror of `classmap.idx`.
    class_ids: Arc<Vec<u64>>,
    cache: LruCache<HeapObject>,
    retained: Option<IndexReader>,
}

impl ObjectStore {
    pub fn new(
        cursor: BinaryCursor,
        objects: IndexReader,
        addresses: Arc<AddressMap>,
        classes: Arc<ClassTable>,
        class_ids: Arc<Vec<u64>>,
        cache_capacity: usize,
    ) -> Self {
        ObjectStore {
            cursor,
            objects,
            addresses,
            classes,
            class_ids,
            cache: LruCache::new(cache_capacity),
            retained: None,
        }
    }

    pub fn addresses(&self) -> &AddressMap {
        &self.addresses
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    /// Total id count, class objects included.
    pub fn ids_len(&self) -> u32 {
        self.addresses.len()
    }

    pub fn object_count(&self) -> u64 {
        self.addresses.object_count()
    }

    /// Attach the retained index; cached objects are dropped so they pick up
    /// their retained size on next materialisation.
    pub fn attach_retained(&mut self, reader: IndexReader) {
        self.retained = Some(reader);
        self.cache.clear();
    }

    pub fn has_retained(&self) -> bool {
        self.retained.is_some()
    }

    pub fn retained_of(&self, id32: u32) -> Option<u64> {
        self.retained.as_ref().and_then(|r| r.u64_slot(u64::from(id32)))
    }

    pub fn entry(&self, id32: u32) -> Result<ObjectEntry, HprofDelveError> {
        self.objects
            .object_entry(id32)
            .ok_or_else(|| HprofDelveError::Corruption {
                offset: 0,
                message: format!("missing objects index entry for id {id32}"),
            })
    }

    /// Shallow size without full materialisation, for whole-heap passes.
    pub fn shallow_size_of(&self, id32: u32) -> Result<u64, HprofDelveError> {
        let entry = self.entry(id32)?;
        if entry.flags == ObjectKind::Class.flag() {
            Ok(0)
        } else {
            Ok(OBJECT_HEADER_BYTES + u64::from(entry.data_size))
        }
    }

    pub fn get(&mut self, address: u64) -> Result<Option<HeapObject>, HprofDelveError> {
        match self.addresses.id32_of(address) {
            None => Ok(None),
            Some(id32) => self.get_by_id32(id32),
        }
    }

    pub fn get_by_id32(&mut self, id32: u32) -> Result<Option<HeapObject>, HprofDelveError> {
        if id32 >= self.addresses.len() {
            return Ok(None);
        }
        if let Some(cached) = self.cache.get(id32) {
            return Ok(Some(cached.clone()));
        }
        let object = self.materialise(id32)?;
        self.cache.insert(id32, object.clone());
        Ok(Some(object))
    }

    fn materialise(&self, id32: u32) -> Result<HeapObject, HprofDelveError> {
        let entry = self.entry(id32)?;
        let kind = ObjectKind::from_flag(entry.flags).ok_or(HprofDelveError::Corruption {
            offset: 0,
            message: format!("invalid object flag {} for id {id32}", entry.flags),
        })?;
        let address = self
            .addresses
            .address_of(id32)
            .ok_or_else(|| HprofDelveError::Corruption {
                offset: 0,
                message: format!("id {id32} outside the address map"),
            })?;

        let (class_address, class, element_type) = match kind {
            ObjectKind::PrimitiveArray => {
                let element = FieldType::from_tag(entry.element_type).ok_or(
                    HprofDelveError::Corruption {
                        offset: entry.file_offset,
                        message: format!("invalid element type tag {}", entry.element_type),
                    },
                )?;
                let class = self.classes.primitive_array_class(element).cloned();
                (0, class, Some(element))
            }
            // a class object stands for the class it defines
            ObjectKind::Class => (address, self.classes.get(address).cloned(), None),
            ObjectKind::Instance | ObjectKind::ObjectArray => {
                let class_address = usize::try_from(entry.class_id32)
                    .ok()
                    .and_then(|i| self.class_ids.get(i).copied())
                    .unwrap_or(0);
                (class_address, self.classes.get(class_address).cloned(), None)
            }
        };

        let shallow_size = if kind == ObjectKind::Class {
            0
        } else {
            OBJECT_HEADER_BYTES + u64::from(entry.data_size)
        };

        Ok(HeapObject {
            address,
            id32,
            kind,
            class_address,
            class,
            data_position: entry.file_offset,
            data_size: entry.data_size,
            shallow_size,
            array_length: entry.array_length,
            element_type,
            retained_size: self.retained_of(id32),
            outbound: None,
        })
    }

    /// Outbound reference addresses, cached on the object in the LRU.
    pub fn outbound_ids(&mut self, id32: u32) -> Result<Arc<[u64]>, HprofDelveError> {
        if let Some(cached) = self.cache.get(id32).and_then(|o| o.outbound.clone()) {
            return Ok(cached);
        }
        let mut refs = Vec::new();
        self.read_outbound(id32, &mut refs)?;
        let refs: Arc<[u64]> = refs.into();
        if let Some(object) = self.cache.get_mut(id32) {
            object.outbound = Some(refs.clone());
        } else {
            let mut object = self.materialise(id32)?;
            object.outbound = Some(refs.clone());
            self.cache.insert(id32, object);
        }
        Ok(refs)
    }

    /// Uncached outbound references, appended to `out`. The workhorse of the
    /// whole-heap passes: no allocation beyond the caller's scratch buffer.
    pub fn read_outbound(&self, id32: u32, out: &mut Vec<u64>) -> Result<(), HprofDelveError> {
        let entry = self.entry(id32)?;
        match ObjectKind::from_flag(entry.flags) {
            Some(ObjectKind::ObjectArray) => {
                let mut cursor = self.cursor.clone();
                cursor.seek(entry.file_offset);
                for _ in 0..entry.array_length.max(0) {
                    let target = cursor.read_id()?;
                    if target != 0 {
                        out.push(target);
                    }
                }
                Ok(())
            }
            Some(ObjectKind::PrimitiveArray) => Ok(()),
            Some(ObjectKind::Instance) => self.read_instance_refs(&entry, |_, target| {
                out.push(target);
            }),
            Some(ObjectKind::Class) => {
                let address = self.addresses.address_of(id32).unwrap_or(0);
                if let Some(class) = self.classes.get(address) {
                    for static_field in &class.static_fields {
                        if let Some(target) = static_field.value.as_reference() {
                            if target != 0 {
                                out.push(target);
                            }
                        }
                    }
                }
                Ok(())
            }
            None => Err(HprofDelveError::Corruption {
                offset: 0,
                message: format!("invalid object flag {} for id {id32}", entry.flags),
            }),
        }
    }

    /// Outbound references together with their edge labels, for path
    /// reporting. Same edges as `read_outbound`.
    pub fn read_outbound_labeled(
        &self,
        id32: u32,
    ) -> Result<Vec<(u64, EdgeLabel)>, HprofDelveError> {
        let entry = self.entry(id32)?;
        let mut out = Vec::new();
        match ObjectKind::from_flag(entry.flags) {
            Some(ObjectKind::ObjectArray) => {
                let mut cursor = self.cursor.clone();
                cursor.seek(entry.file_offset);
                for index in 0..entry.array_length.max(0) {
                    let target = cursor.read_id()?;
                    if target != 0 {
                        out.push((target, EdgeLabel::Element(index as u32)));
                    }
                }
            }
            Some(ObjectKind::PrimitiveArray) => {}
            Some(ObjectKind::Instance) => {
                self.read_instance_refs(&entry, |name, target| {
                    out.push((target, EdgeLabel::Field(name.into())));
                })?;
            }
            Some(ObjectKind::Class) => {
                let address = self.addresses.address_of(id32).unwrap_or(0);
                if let Some(class) = self.classes.get(address) {
                    for static_field in &class.static_fields {
                        if let Some(target) = static_field.value.as_reference() {
                            if target != 0 {
                                out.push((
                                    target,
                                    EdgeLabel::Field(static_field.name.clone()),
                                ));
                            }
                        }
                    }
                }
            }
            None => {
                return Err(HprofDelveError::Corruption {
                    offset: 0,
                    message: format!("invalid object flag {} for id {id32}", entry.flags),
                })
            }
        }
        Ok(out)
    }

    /// Walk the instance payload against the superclass-first field chain,
    /// invoking `on_ref` for every non-null reference field.
    fn read_instance_refs(
        &self,
        entry: &ObjectEntry,
        mut on_ref: impl FnMut(&str, u64),
    ) -> Result<(), HprofDelveError> {
        let class_address = match usize::try_from(entry.class_id32)
            .ok()
            .and_then(|i| self.class_ids.get(i).copied())
        {
            Some(address) if address != 0 => address,
            // unresolved class: no field layout, no references
            _ => return Ok(()),
        };
        let chain = match self.classes.instance_field_chain(class_address) {
            Some(chain) => chain.clone(),
            None => return Ok(()),
        };

        let mut cursor = self.cursor.clone();
        cursor.seek(entry.file_offset);
        let end = entry.file_offset + u64::from(entry.data_size);
        for field in chain.iter() {
            let width = u64::from(field.field_type.byte_size(cursor.id_size()));
            if cursor.position() + width > end {
                return Err(HprofDelveError::Corruption {
                    offset: entry.file_offset,
                    message: format!(
                        "instance payload shorter than the field layout of class 0x{class_address:x}"
                    ),
                });
            }
            if field.field_type == FieldType::Object {
                let target = cursor.read_id()?;
                if target != 0 {
                    on_ref(&field.name, target);
                }
            } else {
                cursor.skip(width as i64)?;
            }
        }
        Ok(())
    }

    /// Iterate every id32 in order, bypassing the LRU. Class objects are
    /// yielded with shallow size zero. The only safe way to visit all
    /// objects of a large dump.
    pub fn stream(&self) -> ObjectStream<'_> {
        ObjectStream {
            store: self,
            next: 0,
        }
    }
}

pub struct ObjectStream<'a> {
    store: &'a ObjectStore,
    next: u32,
}

impl Iterator for ObjectStream<'_> {
    type Item = Result<HeapObject, HprofDelveError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.store.ids_len() {
            return None;
        }
        let id32 = self.next;
        self.next += 1;
        Some(self.store.materialise(id32))
    }
}
