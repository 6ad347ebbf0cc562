use std::sync::Arc;

use ahash::AHashMap;

use crate::parser::class_dump::RawClassDump;
use crate::parser::values::{FieldType, Value};

#[derive(Debug, Clone)]
pub struct Field {
    pub name: Box<str>,
    pub field_type: FieldType,
}

#[derive(Debug, Clone)]
pub struct StaticField {
    pub name: Box<str>,
    pub field_type: FieldType,
    pub value: Value,
}

/// Class metadata assembled during parsing, alive for the dump's lifetime.
/// Names keep the internal slashed form from the dump (`java/lang/String`).
#[derive(Debug)]
pub struct Class {
    pub address: u64,
    pub name: Box<str>,
    /// 0 when the class has no supertype.
    pub super_address: u64,
    pub loader_address: u64,
    pub instance_size: u32,
    pub static_fields: Vec<StaticField>,
    pub instance_fields: Vec<Field>,
}

impl Class {
    pub fn is_array(&self) -> bool {
        self.name.starts_with('[')
    }
}

/// All classes of an open dump, keyed by class address, plus the synthetic
/// primitive-array classes (keyed by element type tag, they have no address
/// and never appear in `classmap.idx`).
pub struct ClassTable {
    by_address: AHashMap<u64, Arc<Class>>,
    primitive_arrays: AHashMap<u8, Arc<Class>>,
    /// Flattened instance-field walk per class, superclass fields first.
    field_chains: AHashMap<u64, Arc<[Field]>>,
}

const PRIMITIVE_ARRAY_ELEMENTS: [FieldType; 8] = [
    FieldType::Bool,
    FieldType::Char,
    FieldType::Float,
    FieldType::Double,
    FieldType::Byte,
    FieldType::Short,
    FieldType::Int,
    FieldType::Long,
];

impl ClassTable {
    /// Resolve raw class dumps against the string table and assemble the
    /// final class table. A class never announced by a class-load record
    /// gets a synthetic name derived from its address.
    pub fn from_dumps(
        class_dumps: Vec<RawClassDump>,
        class_names: &AHashMap<u64, u64>,
        strings: &AHashMap<u64, Box<str>>,
    ) -> ClassTable {
        let mut by_address = AHashMap::with_capacity(class_dumps.len());
        for dump in class_dumps {
            let name = class_names
                .get(&dump.class_address)
                .and_then(|name_id| strings.get(name_id))
                .cloned()
                .unwrap_or_else(|| {
                    format!("unknown-class@0x{:x}", dump.class_address).into_boxed_str()
                });
            let static_fields = dump
                .static_fields
                .iter()
                .map(|raw| StaticField {
                    name: field_name(raw.name_id, strings),
                    field_type: raw.field_type,
                    value: raw.value,
                })
                .collect();
            let instance_fields = dump
                .instance_fields
                .iter()
                .map(|raw| Field {
                    name: field_name(raw.name_id, strings),
                    field_type: raw.field_type,
                })
                .collect();
            by_address.insert(
                dump.class_address,
                Arc::new(Class {
                    address: dump.class_address,
                    name,
                    super_address: dump.super_class_address,
                    loader_address: dump.loader_address,
                    instance_size: dump.instance_size,
                    static_fields,
                    instance_fields,
                }),
            );
        }

        let primitive_arrays = PRIMITIVE_ARRAY_ELEMENTS
            .iter()
            .map(|&element| {
                let name = element
                    .primitive_array_class_name()
                    .expect("primitive element types all have an array class name");
                (
                    element.tag(),
                    Arc::new(Class {
                        address: 0,
                        name: name.into(),
                        super_address: 0,
                        loader_address: 0,
                        instance_size: 0,
                        static_fields: Vec::new(),
                        instance_fields: Vec::new(),
                    }),
                )
            })
            .collect();

        let field_chains = build_field_chains(&by_address);
        ClassTable {
            by_address,
            primitive_arrays,
            field_chains,
        }
    }

    pub fn get(&self, address: u64) -> Option<&Arc<Class>> {
        self.by_address.get(&address)
    }

    pub fn primitive_array_class(&self, element: FieldType) -> Option<&Arc<Class>> {
        self.primitive_arrays.get(&element.tag())
    }

    /// Instance fields to walk when reading an instance payload of this
    /// class: the superclass chain first, then the class itself, preserving
    /// declaration order within each class.
    pub fn instance_field_chain(&self, class_address: u64) -> Option<&Arc<[Field]>> {
        self.field_chains.get(&class_address)
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Class>> {
        self.by_address.values()
    }
}

fn field_name(name_id: u64, strings: &AHashMap<u64, Box<str>>) -> Box<str> {
    strings
        .get(&name_id)
        .cloned()
        .unwrap_or_else(|| format!("field-0x{name_id:x}").into_boxed_str())
}

/// Classes are not laid down supertype-first in the dump, so chains can only
/// be assembled once the whole table is known. A supertype missing from the
/// table truncates the chain at that point.
fn build_field_chains(by_address: &AHashMap<u64, Arc<Class>>) -> AHashMap<u64, Arc<[Field]>> {
    let mut chains = AHashMap::with_capacity(by_address.len());
    for (&address, class) in by_address {
        let mut lineage = vec![class];
        let mut super_address = class.super_address;
        while super_address != 0 {
            match by_address.get(&super_address) {
                Some(super_class) => {
                    lineage.push(super_class);
                    super_address = super_class.super_address;
                }
                None => break,
            }
        }
        let chain: Vec<Field> = lineage
            .iter()
            .rev()
            .flat_map(|c| c.instance_fields.iter().cloned())
            .collect();
        chains.insert(address, chain.into());
    }
    chains
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::class_dump::{RawField, RawStaticField};

    fn raw_dump(address: u64, super_address: u64, fields: &[(u64, FieldType)]) -> RawClassDump {
        RawClassDump {
            class_address: address,
            super_class_address: super_address,
            loader_address: 0,
            instance_size: 16,
            static_fields: Vec::new(),
            instance_fields: fields
                .iter()
                .map(|&(name_id, field_type)| RawField {
                    name_id,
                    field_type,
                })
                .collect(),
        }
    }

    fn strings(pairs: &[(u64, &str)]) -> AHashMap<u64, Box<str>> {
        pairs.iter().map(|&(id, s)| (id, s.into())).collect()
    }

    #[test]
    fn field_chain_is_superclass_first() {
        let strings = strings(&[(1, "child"), (2, "parent"), (10, "a"), (11, "b")]);
        let mut names = AHashMap::new();
        names.insert(0x100, 1);
        names.insert(0x200, 2);
        let table = ClassTable::from_dumps(
            vec![
                raw_dump(0x100, 0x200, &[(10, FieldType::Object)]),
                raw_dump(0x200, 0, &[(11, FieldType::Int)]),
            ],
            &names,
            &strings,
        );
        let chain = table.instance_field_chain(0x100).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(&*chain[0].name, "b");
        assert_eq!(chain[0].field_type, FieldType::Int);
        assert_eq!(&*chain[1].name, "a");
    }

    #[test]
    fn unnamed_class_gets_synthetic_name() {
        let table = ClassTable::from_dumps(
            vec![raw_dump(0xabc, 0, &[])],
            &AHashMap::new(),
            &AHashMap::new(),
        );
        assert_eq!(&*table.get(0xabc).unwrap().name, "unknown-class@0xabc");
    }

    #[test]
    fn primitive_array_classes_are_prebuilt() {
        let table = ClassTable::from_dumps(Vec::new(), &AHashMap::new(), &AHashMap::new());
        let int_array = table.primitive_array_class(FieldType::Int).unwrap();
        assert_eq!(&*int_array.name, "[I");
        assert!(int_array.is_array());
        assert!(table.primitive_array_class(FieldType::Object).is_none());
    }

    #[test]
    fn static_field_values_are_kept() {
        let mut dump = raw_dump(0x100, 0, &[]);
        dump.static_fields.push(RawStaticField {
            name_id: 5,
            field_type: FieldType::Object,
            value: Value::Reference(0x999),
        });
        let table = ClassTable::from_dumps(vec![dump], &AHashMap::new(), &AHashMap::new());
        let class = table.get(0x100).unwrap();
        assert_eq!(class.static_fields.len(), 1);
        assert_eq!(class.static_fields[0].value.as_reference(), Some(0x999));
    }
}
