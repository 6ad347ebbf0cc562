use crate::errors::HprofDelveError;
use crate::parser::cursor::BinaryCursor;
use crate::parser::values::{FieldType, Value};

/// Instance field declaration as found in a class-dump sub-record.
#[derive(Debug, Clone, Copy)]
pub struct RawField {
    pub name_id: u64,
    pub field_type: FieldType,
}

/// Static field declaration, which also carries its literal value.
#[derive(Debug, Clone, Copy)]
pub struct RawStaticField {
    pub name_id: u64,
    pub field_type: FieldType,
    pub value: Value,
}

/// Class metadata decoded from a class-dump sub-record, before names are
/// resolved against the UTF-8 string table.
#[derive(Debug)]
pub struct RawClassDump {
    pub class_address: u64,
    pub super_class_address: u64,
    pub loader_address: u64,
    pub instance_size: u32,
    pub static_fields: Vec<RawStaticField>,
    pub instance_fields: Vec<RawField>,
}

fn read_field_type(cursor: &mut BinaryCursor) -> Result<FieldType, HprofDelveError> {
    let offset = cursor.position();
    let tag = cursor.read_u1()?;
    FieldType::from_tag(tag).ok_or(HprofDelveError::Corruption {
        offset,
        message: format!("invalid field type tag {tag}"),
    })
}

/// Decode one class-dump sub-record. The cursor must be positioned just after
/// the sub-record tag byte.
pub fn parse_class_dump(cursor: &mut BinaryCursor) -> Result<RawClassDump, HprofDelveError> {
    let class_address = cursor.read_id()?;
    let _stack_trace_serial = cursor.read_u4()?;
    let super_class_address = cursor.read_id()?;
    let loader_address = cursor.read_id()?;
    let _signers_address = cursor.read_id()?;
    let _protection_domain_address = cursor.read_id()?;
    let _reserved_1 = cursor.read_id()?;
    let _reserved_2 = cursor.read_id()?;
    let instance_size = cursor.read_u4()?;

    // constant pool entries carry no identity useful to the engine, decode and drop
    let constant_pool_size = cursor.read_u2()?;
    for _ in 0..constant_pool_size {
        let _pool_index = cursor.read_u2()?;
        let const_type = read_field_type(cursor)?;
        let _value = cursor.read_value(const_type)?;
    }

    let static_field_count = cursor.read_u2()?;
    let mut static_fields = Vec::with_capacity(static_field_count as usize);
    for _ in 0..static_field_count {
        let name_id = cursor.read_id()?;
        let field_type = read_field_type(cursor)?;
        let value = cursor.read_value(field_type)?;
        static_fields.push(RawStaticField {
            name_id,
            field_type,
            value,
        });
    }

    let instance_field_count = cursor.read_u2()?;
    let mut instance_fields = Vec::with_capacity(instance_field_count as usize);
    for _ in 0..instance_field_count {
        let name_id = cursor.read_id()?;
        let field_type = read_field_type(cursor)?;
        instance_fields.push(RawField {
            name_id,
            field_type,
        });
    }

    Ok(RawClassDump {
        class_address,
        super_class_address,
        loader_address,
        instance_size,
        static_fields,
        instance_fields,
    })
}

/// Advance over a class-dump sub-record, returning only the class address.
pub fn skip_class_dump(cursor: &mut BinaryCursor) -> Result<u64, HprofDelveError> {
    parse_class_dump(cursor).map(|dump| dump.class_address)
}
