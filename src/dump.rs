use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::analysis::dominator::{
    exact_subgraph_dominators, hybrid_dominators, DominatorOptions, DominatorTree,
};
use crate::analysis::inbound::build_inbound_counts;
use crate::analysis::path::{shortest_path_to_root, PathNode};
use crate::analysis::retained::compute_all_retained;
use crate::errors::HprofDelveError;
use crate::heap::addresses::AddressMap;
use crate::heap::class::ClassTable;
use crate::heap::object::{GcRoot, HeapObject};
use crate::heap::store::{ObjectStore, ObjectStream};
use crate::index::reader::IndexReader;
use crate::index::writer::IndexWriter;
use crate::index::{IndexKind, FLAG_CLASS_STUB};
use crate::parser::cursor::BinaryCursor;
use crate::parser::file_header::{read_file_header, FileHeader};
use crate::parser::heap_parser::{HprofParser, Pass1Data};
use crate::utils::ProgressSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsingMode {
    /// Build (or reuse) the on-disk indexes next to the dump.
    Indexed,
    /// Keep every index in memory, touch nothing on disk.
    InMemory,
}

/// Open-time options.
pub struct DumpOptions {
    pub mode: ParsingMode,
    /// LRU capacity of the object store.
    pub cache_capacity: usize,
    /// Compute approximate retained sizes for the whole heap at open time.
    pub eager_retained: bool,
    pub progress: Option<Box<dyn FnMut(f64, &str)>>,
}

impl Default for DumpOptions {
    fn default() -> Self {
        DumpOptions {
            mode: ParsingMode::Indexed,
            cache_capacity: 100_000,
            eager_retained: false,
            progress: None,
        }
    }
}

impl DumpOptions {
    pub fn in_memory(mut self) -> Self {
        self.mode = ParsingMode::InMemory;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn eager_retained(mut self, eager: bool) -> Self {
        self.eager_retained = eager;
        self
    }

    pub fn on_progress(mut self, callback: impl FnMut(f64, &str) + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }
}

struct OpenedParts {
    addresses: Arc<AddressMap>,
    classes: Arc<ClassTable>,
    class_ids: Arc<Vec<u64>>,
    gc_roots: Vec<GcRoot>,
    objects: IndexReader,
    inbound: Option<IndexReader>,
    retained: Option<IndexReader>,
}

/// An open heap dump: owns the dump mapping, the maps built at parse time,
/// the object store and any index readers, and exposes the query surface.
/// Single-threaded by design; one logical reader per open dump.
pub struct HeapDump {
    path: PathBuf,
    idx_dir: PathBuf,
    header: FileHeader,
    mode: ParsingMode,
    fingerprint: u32,
    addresses: Arc<AddressMap>,
    classes: Arc<ClassTable>,
    gc_roots: Vec<GcRoot>,
    store: ObjectStore,
    inbound: Option<IndexReader>,
    dominators: Option<DominatorTree>,
    progress: ProgressSink,
}

impl std::fmt::Debug for HeapDump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapDump")
            .field("path", &self.path)
            .field("idx_dir", &self.idx_dir)
            .field("header", &self.header)
            .field("mode", &self.mode)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl HeapDump {
    pub fn open(path: impl AsRef<Path>, options: DumpOptions) -> Result<Self, HprofDelveError> {
        let DumpOptions {
            mode,
            cache_capacity,
            eager_retained,
            progress,
        } = options;
        let path = path.as_ref().to_path_buf();
        let mut progress = ProgressSink::new(progress);

        let file = File::open(&path).map_err(|_| HprofDelveError::InputFileNotFound {
            name: path.display().to_string(),
        })?;
        let mmap = Arc::new(unsafe { Mmap::map(&file) }?);
        // the identifier size is only known after the header, so the header
        // is read through a throwaway cursor
        let mut header_cursor = BinaryCursor::new(Arc::clone(&mmap), 8);
        let header = read_file_header(&mut header_cursor)?;
        let records_start = header_cursor.position();
        if header.id_size != 4 && header.id_size != 8 {
            return Err(HprofDelveError::UnsupportedIdSize {
                size: header.id_size,
            });
        }
        let cursor = BinaryCursor::new(mmap, header.id_size);
        let idx_dir = index_dir_for(&path);
        let fingerprint = dump_fingerprint(cursor.length(), header.timestamp_millis);

        let parts = match mode {
            ParsingMode::Indexed => {
                match try_fast_path(&cursor, records_start, &idx_dir, fingerprint, &mut progress)? {
                    Some(parts) => parts,
                    None => {
                        full_parse(&cursor, records_start, &idx_dir, mode, fingerprint, &mut progress)?
                    }
                }
            }
            ParsingMode::InMemory => {
                full_parse(&cursor, records_start, &idx_dir, mode, fingerprint, &mut progress)?
            }
        };

        let mut store = ObjectStore::new(
            cursor,
            parts.objects,
            parts.addresses.clone(),
            parts.classes.clone(),
            parts.class_ids,
            cache_capacity,
        );
        if let Some(retained) = parts.retained {
            store.attach_retained(retained);
        }

        let mut dump = HeapDump {
            path,
            idx_dir,
            header,
            mode,
            fingerprint,
            addresses: parts.addresses,
            classes: parts.classes,
            gc_roots: parts.gc_roots,
            store,
            inbound: parts.inbound,
            dominators: None,
            progress,
        };
        if eager_retained {
            dump.ensure_retained_index()?;
        }
        Ok(dump)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn mode(&self) -> ParsingMode {
        self.mode
    }

    /// Number of heap objects, class objects excluded.
    pub fn object_count(&self) -> u64 {
        self.addresses.object_count()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    pub fn gc_roots(&self) -> &[GcRoot] {
        &self.gc_roots
    }

    pub fn get_object(&mut self, address: u64) -> Result<Option<HeapObject>, HprofDelveError> {
        self.store.get(address)
    }

    /// Outbound reference addresses of the object at `address`.
    pub fn outbound_references(
        &mut self,
        address: u64,
    ) -> Result<Vec<u64>, HprofDelveError> {
        match self.addresses.id32_of(address) {
            None => Ok(Vec::new()),
            Some(id32) => Ok(self.store.outbound_ids(id32)?.to_vec()),
        }
    }

    /// Inbound reference count; builds the inbound index on first use.
    pub fn inbound_count(&mut self, address: u64) -> Result<Option<u32>, HprofDelveError> {
        let Some(id32) = self.addresses.id32_of(address) else {
            return Ok(None);
        };
        self.ensure_inbound_index()?;
        let inbound = self.inbound.as_ref().expect("inbound index just ensured");
        Ok(inbound.u32_slot(u64::from(id32)))
    }

    /// Approximate retained size; builds the inbound and retained indexes on
    /// first use.
    pub fn retained_size(&mut self, address: u64) -> Result<Option<u64>, HprofDelveError> {
        let Some(id32) = self.addresses.id32_of(address) else {
            return Ok(None);
        };
        self.ensure_retained_index()?;
        Ok(self.store.retained_of(id32))
    }

    /// Exact retained size from the dominator tree, when one was computed
    /// and covers the object.
    pub fn exact_retained(&self, address: u64) -> Option<u64> {
        let id32 = self.addresses.id32_of(address)?;
        self.dominators.as_ref()?.exact_retained(id32)
    }

    /// Objects immediately dominated by `address`. Empty without a computed
    /// dominator tree.
    pub fn dominated_by(&self, address: u64) -> Vec<u64> {
        let Some(id32) = self.addresses.id32_of(address) else {
            return Vec::new();
        };
        let Some(tree) = self.dominators.as_ref() else {
            return Vec::new();
        };
        tree.dominated_by(id32)
            .iter()
            .filter_map(|&id| self.addresses.address_of(id))
            .collect()
    }

    pub fn immediate_dominator(&self, address: u64) -> Option<u64> {
        let id32 = self.addresses.id32_of(address)?;
        let dominator = self.dominators.as_ref()?.immediate_dominator(id32)?;
        self.addresses.address_of(dominator)
    }

    pub fn dominator_tree(&self) -> Option<&DominatorTree> {
        self.dominators.as_ref()
    }

    /// Hybrid dominators: exact Lengauer–Tarjan over the expanded
    /// interesting set. Returns the number of objects in the tree.
    pub fn compute_dominators(
        &mut self,
        options: &DominatorOptions,
    ) -> Result<usize, HprofDelveError> {
        self.ensure_retained_index()?;
        let tree = hybrid_dominators(&self.store, &self.gc_roots, options, &mut self.progress)?;
        let size = tree.len();
        self.dominators = Some(tree);
        Ok(size)
    }

    /// Exact dominators over a caller-selected set of objects, with the GC
    /// roots landing in the set as entry points.
    pub fn compute_subgraph_dominators(
        &mut self,
        members: &[u64],
    ) -> Result<usize, HprofDelveError> {
        let mut ids: Vec<u32> = members
            .iter()
            .filter_map(|&address| self.addresses.id32_of(address))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        let mut roots: Vec<u32> = self
            .gc_roots
            .iter()
            .map(|r| r.object_id32)
            .filter(|id| ids.binary_search(id).is_ok())
            .collect();
        roots.sort_unstable();
        roots.dedup();
        let tree = exact_subgraph_dominators(&self.store, &ids, &roots)?;
        let size = tree.len();
        self.dominators = Some(tree);
        Ok(size)
    }

    /// Shortest path from a GC root to the object, root first. Empty when the
    /// object is unknown or unreachable from the roots.
    pub fn path_to_gc_root(&mut self, address: u64) -> Result<Vec<PathNode>, HprofDelveError> {
        let Some(id32) = self.addresses.id32_of(address) else {
            return Ok(Vec::new());
        };
        shortest_path_to_root(&self.store, &self.gc_roots, id32)
    }

    /// Stream every object without touching the LRU. Class objects are
    /// yielded with size zero.
    pub fn objects(&self) -> ObjectStream<'_> {
        self.store.stream()
    }

    /// The `n` largest objects by approximate retained size, descending.
    pub fn top_retained(&mut self, n: usize) -> Result<Vec<HeapObject>, HprofDelveError> {
        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        self.ensure_retained_index()?;
        let mut heap: BinaryHeap<Reverse<(u64, u32)>> = BinaryHeap::with_capacity(n + 1);
        for id32 in 0..self.addresses.len() {
            if self.addresses.is_class(id32) {
                continue;
            }
            let retained = self.store.retained_of(id32).unwrap_or(0);
            heap.push(Reverse((retained, id32)));
            if heap.len() > n {
                heap.pop();
            }
        }
        let mut picks: Vec<(u64, u32)> = heap.into_iter().map(|Reverse(pair)| pair).collect();
        picks.sort_unstable_by_key(|&(retained, id32)| (Reverse(retained), id32));
        let mut result = Vec::with_capacity(picks.len());
        for (_, id32) in picks {
            if let Some(object) = self.store.get_by_id32(id32)? {
                result.push(object);
            }
        }
        Ok(result)
    }

    /// The `n` largest members of the computed dominator tree by exact
    /// retained size, descending. Empty without a computed tree.
    pub fn top_exact_retained(
        &mut self,
        n: usize,
    ) -> Result<Vec<(HeapObject, u64)>, HprofDelveError> {
        let mut pairs: Vec<(u32, u64)> = match self.dominators.as_ref() {
            None => return Ok(Vec::new()),
            Some(tree) => tree
                .members()
                .filter_map(|id32| tree.exact_retained(id32).map(|size| (id32, size)))
                .collect(),
        };
        pairs.sort_unstable_by_key(|&(id32, size)| (std::cmp::Reverse(size), id32));
        pairs.truncate(n);
        let mut result = Vec::with_capacity(pairs.len());
        for (id32, size) in pairs {
            if let Some(object) = self.store.get_by_id32(id32)? {
                result.push((object, size));
            }
        }
        Ok(result)
    }

    pub fn ensure_inbound_index(&mut self) -> Result<(), HprofDelveError> {
        if self.inbound.is_some() {
            return Ok(());
        }
        self.progress.report(0.0, "Rebuilding inbound index ...");
        let counts = build_inbound_counts(&self.store, &mut self.progress)?;
        let reader = match self.mode {
            ParsingMode::Indexed => {
                let mut writer =
                    IndexWriter::create(&self.idx_dir, IndexKind::Inbound, self.fingerprint)?;
                for count in counts {
                    writer.append_u32(count)?;
                }
                writer.commit()?;
                IndexReader::open(&self.idx_dir, IndexKind::Inbound, self.fingerprint)?
            }
            ParsingMode::InMemory => {
                let mut writer = IndexWriter::in_memory(IndexKind::Inbound, self.fingerprint)?;
                for count in counts {
                    writer.append_u32(count)?;
                }
                let buffer = writer.commit()?.expect("memory writer returns its buffer");
                IndexReader::from_buffer(IndexKind::Inbound, buffer, self.fingerprint)?
            }
        };
        self.inbound = Some(reader);
        Ok(())
    }

    pub fn ensure_retained_index(&mut self) -> Result<(), HprofDelveError> {
        if self.store.has_retained() {
            return Ok(());
        }
        self.ensure_inbound_index()?;
        self.progress.report(0.0, "Rebuilding retained index ...");
        let inbound = self.inbound.as_ref().expect("inbound index just ensured");
        let retained = compute_all_retained(&self.store, inbound, &mut self.progress)?;
        let reader = match self.mode {
            ParsingMode::Indexed => {
                let mut writer =
                    IndexWriter::create(&self.idx_dir, IndexKind::Retained, self.fingerprint)?;
                for size in retained {
                    writer.append_u64(size)?;
                }
                writer.commit()?;
                IndexReader::open(&self.idx_dir, IndexKind::Retained, self.fingerprint)?
            }
            ParsingMode::InMemory => {
                let mut writer = IndexWriter::in_memory(IndexKind::Retained, self.fingerprint)?;
                for size in retained {
                    writer.append_u64(size)?;
                }
                let buffer = writer.commit()?.expect("memory writer returns its buffer");
                IndexReader::from_buffer(IndexKind::Retained, buffer, self.fingerprint)?
            }
        };
        self.store.attach_retained(reader);
        Ok(())
    }
}

/// Cheap identity of the dump the indexes were built for, stored in every
/// index header: a dump swapped under an existing `.idx/` directory is
/// detected and rebuilt instead of misread.
fn dump_fingerprint(file_len: u64, timestamp_millis: u64) -> u32 {
    (file_len as u32)
        ^ (timestamp_millis as u32)
        ^ ((timestamp_millis >> 32) as u32)
        ^ ((file_len >> 32) as u32)
}

fn index_dir_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".idx");
    PathBuf::from(name)
}

/// Skip both passes when every core index validates: reload the maps and
/// roots from disk and re-parse only the class metadata.
fn try_fast_path(
    cursor: &BinaryCursor,
    records_start: u64,
    idx_dir: &Path,
    fingerprint: u32,
    progress: &mut ProgressSink,
) -> Result<Option<OpenedParts>, HprofDelveError> {
    let mut open = |kind: IndexKind| match IndexReader::open(idx_dir, kind, fingerprint) {
        Ok(reader) => Ok(Some(reader)),
        Err(e) if e.is_stale_index() => Ok(None),
        Err(e) => Err(e),
    };
    let (Some(objects), Some(objectmap), Some(classmap), Some(gcroots)) = (
        open(IndexKind::Objects)?,
        open(IndexKind::ObjectMap)?,
        open(IndexKind::ClassMap)?,
        open(IndexKind::GcRoots)?,
    ) else {
        return Ok(None);
    };

    let count = objects.entry_count();
    if objectmap.entry_count() != count {
        return Ok(None);
    }

    let mut addresses = Vec::with_capacity(count as usize);
    let mut class_addresses = Vec::new();
    for i in 0..count {
        let Some((id32, address)) = objectmap.map_entry(i) else {
            return Ok(None);
        };
        let Some(entry) = objects.object_entry(i as u32) else {
            return Ok(None);
        };
        if u64::from(id32) != i || u64::from(entry.object_id32) != i {
            return Ok(None);
        }
        if entry.flags == FLAG_CLASS_STUB {
            class_addresses.push(address);
        }
        addresses.push(address);
    }
    let address_map = AddressMap::build(addresses, class_addresses);
    if u64::from(address_map.len()) != count {
        return Ok(None);
    }

    let mut class_ids = Vec::with_capacity(classmap.entry_count() as usize);
    for i in 0..classmap.entry_count() {
        let Some((class_id32, address)) = classmap.map_entry(i) else {
            return Ok(None);
        };
        if u64::from(class_id32) != i {
            return Ok(None);
        }
        class_ids.push(address);
    }

    let mut gc_roots = Vec::with_capacity(gcroots.entry_count() as usize);
    for i in 0..gcroots.entry_count() {
        let Some(root) = gcroots.root_entry(i) else {
            return Ok(None);
        };
        gc_roots.push(root);
    }

    // only the class metadata needs the dump itself
    let mut parser = HprofParser::new(cursor.clone(), records_start);
    let Pass1Data {
        strings,
        class_names,
        class_dumps,
        ..
    } = parser.pass1(true, progress)?;
    let classes = ClassTable::from_dumps(class_dumps, &class_names, &strings);

    let inbound = open(IndexKind::Inbound)?;
    let retained = open(IndexKind::Retained)?;

    Ok(Some(OpenedParts {
        addresses: Arc::new(address_map),
        classes: Arc::new(classes),
        class_ids: Arc::new(class_ids),
        gc_roots,
        objects,
        inbound,
        retained,
    }))
}

fn full_parse(
    cursor: &BinaryCursor,
    records_start: u64,
    idx_dir: &Path,
    mode: ParsingMode,
    fingerprint: u32,
    progress: &mut ProgressSink,
) -> Result<OpenedParts, HprofDelveError> {
    let mut parser = HprofParser::new(cursor.clone(), records_start);
    let Pass1Data {
        strings,
        class_names,
        class_dumps,
        object_addresses,
        class_addresses,
        segments,
    } = parser.pass1(false, progress)?;

    let address_map = Arc::new(AddressMap::build(object_addresses, class_addresses));
    let classes = Arc::new(ClassTable::from_dumps(class_dumps, &class_names, &strings));
    drop(strings);
    drop(class_names);

    let pass2 = parser.pass2(&segments, &address_map, progress)?;

    let objects = match mode {
        ParsingMode::Indexed => {
            let mut writer = IndexWriter::create(idx_dir, IndexKind::Objects, fingerprint)?;
            for entry in &pass2.entries {
                writer.append_object(entry)?;
            }
            writer.commit()?;

            let mut writer = IndexWriter::create(idx_dir, IndexKind::ObjectMap, fingerprint)?;
            for (i, &address) in address_map.addresses().iter().enumerate() {
                writer.append_map_entry(i as u32, address)?;
            }
            writer.commit()?;

            let mut writer = IndexWriter::create(idx_dir, IndexKind::ClassMap, fingerprint)?;
            for (i, &address) in pass2.class_ids.iter().enumerate() {
                writer.append_map_entry(i as u32, address)?;
            }
            writer.commit()?;

            let mut writer = IndexWriter::create(idx_dir, IndexKind::GcRoots, fingerprint)?;
            for root in &pass2.gc_roots {
                writer.append_root(root)?;
            }
            writer.commit()?;

            IndexReader::open(idx_dir, IndexKind::Objects, fingerprint)?
        }
        ParsingMode::InMemory => {
            let mut writer = IndexWriter::in_memory(IndexKind::Objects, fingerprint)?;
            for entry in &pass2.entries {
                writer.append_object(entry)?;
            }
            let buffer = writer.commit()?.expect("memory writer returns its buffer");
            IndexReader::from_buffer(IndexKind::Objects, buffer, fingerprint)?
        }
    };

    Ok(OpenedParts {
        addresses: address_map,
        classes,
        class_ids: Arc::new(pass2.class_ids),
        gc_roots: pass2.gc_roots,
        objects,
        inbound: None,
        retained: None,
    })
}
