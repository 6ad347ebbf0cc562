pub mod addresses;
pub mod class;
pub mod lru;
pub mod object;
pub mod store;

pub use addresses::AddressMap;
pub use class::{Class, ClassTable, Field, StaticField};
pub use object::{EdgeLabel, GcRoot, HeapObject, ObjectKind, RootKind};
pub use store::{ObjectStore, OBJECT_HEADER_BYTES};
