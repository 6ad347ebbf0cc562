//! An offline analysis engine for JVM heap dumps in the binary hprof format.
//!
//! The dump is parsed in two passes into a set of memory-mapped on-disk
//! indexes, after which per-object access is O(1) and re-opening the same
//! dump skips parsing entirely. On top of the indexes sit a lazy object
//! store with a bounded LRU, an inbound-reference-count index, an
//! approximate retained-size engine, exact dominators for a selected
//! subgraph, and a shortest-path-to-GC-root finder.
//!
//! ```no_run
//! use hprof_delve::{DumpOptions, HeapDump};
//!
//! fn largest(path: &str) -> Result<(), hprof_delve::HprofDelveError> {
//!     let mut dump = HeapDump::open(path, DumpOptions::default())?;
//!     println!("{} objects", dump.object_count());
//!     for object in dump.top_retained(10)? {
//!         println!(
//!             "0x{:x} {} retains {} bytes",
//!             object.address,
//!             object.class_name().unwrap_or("?"),
//!             object.retained_size.unwrap_or(0)
//!         );
//!     }
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod dump;
pub mod errors;
pub mod heap;
pub mod index;
pub mod parser;
pub mod utils;

pub use analysis::dominator::{DominatorOptions, DominatorTree};
pub use analysis::path::PathNode;
pub use dump::{DumpOptions, HeapDump, ParsingMode};
pub use errors::HprofDelveError;
pub use heap::class::{Class, ClassTable};
pub use heap::object::{EdgeLabel, GcRoot, HeapObject, ObjectKind, RootKind};
pub use parser::file_header::FileHeader;
pub use parser::values::{FieldType, Value};
