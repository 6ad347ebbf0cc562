pub mod class_dump;
pub mod cursor;
pub mod file_header;
pub mod heap_parser;
pub mod values;

pub use cursor::{BinaryCursor, RecordHeader};
pub use file_header::{read_file_header, FileHeader};
pub use values::{FieldType, Value};
