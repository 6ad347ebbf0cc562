mod common;

use common::{DumpBuilder, TYPE_INT, TYPE_OBJECT};

use ahash::AHashMap;
use hprof_delve::{
    DumpOptions, EdgeLabel, FieldType, HeapDump, HprofDelveError, ObjectKind,
};

const NODE_CLASS: u64 = 0x10;

/// One class `com/example/Node` with a single object field `next`.
fn node_class(builder: &mut DumpBuilder) {
    builder.utf8(1, "com/example/Node");
    builder.utf8(2, "next");
    builder.load_class(NODE_CLASS, 1);
    builder.class_dump(NODE_CLASS, 0, 8, &[], &[(2, TYPE_OBJECT)]);
}

#[test]
fn linear_chain_retention_and_path() {
    let mut builder = DumpBuilder::new();
    node_class(&mut builder);
    // R -> A -> B -> C -> D -> E, one root on R
    builder.instance_with_refs(0x50, NODE_CLASS, &[0x100]);
    builder.instance_with_refs(0x100, NODE_CLASS, &[0x200]);
    builder.instance_with_refs(0x200, NODE_CLASS, &[0x300]);
    builder.instance_with_refs(0x300, NODE_CLASS, &[0x400]);
    builder.instance_with_refs(0x400, NODE_CLASS, &[0x500]);
    builder.instance_with_refs(0x500, NODE_CLASS, &[0]);
    builder.root_unknown(0x50);

    let (_dir, path) = builder.write_temp();
    let mut dump = HeapDump::open(&path, DumpOptions::default()).unwrap();

    assert_eq!(dump.object_count(), 6);
    let a = dump.get_object(0x100).unwrap().unwrap();
    assert_eq!(a.shallow_size, 16);
    assert_eq!(a.kind, ObjectKind::Instance);
    assert_eq!(a.class_name(), Some("com/example/Node"));

    assert_eq!(dump.retained_size(0x100).unwrap(), Some(80));
    assert_eq!(dump.retained_size(0x200).unwrap(), Some(64));
    assert_eq!(dump.retained_size(0x300).unwrap(), Some(48));
    assert_eq!(dump.retained_size(0x400).unwrap(), Some(32));
    assert_eq!(dump.retained_size(0x500).unwrap(), Some(16));

    assert_eq!(dump.inbound_count(0x200).unwrap(), Some(1));

    let root_path = dump.path_to_gc_root(0x500).unwrap();
    let addresses: Vec<u64> = root_path.iter().map(|n| n.address).collect();
    assert_eq!(addresses, vec![0x50, 0x100, 0x200, 0x300, 0x400, 0x500]);
    assert!(root_path[0].edge.is_none());
    for node in &root_path[1..] {
        assert_eq!(node.edge, Some(EdgeLabel::Field("next".into())));
    }
    // path soundness: every consecutive pair is a real outbound edge
    for pair in addresses.windows(2) {
        assert!(dump.outbound_references(pair[0]).unwrap().contains(&pair[1]));
    }
}

#[test]
fn shared_tail_stops_expansion() {
    let mut builder = DumpBuilder::new();
    node_class(&mut builder);
    // A -> C, B -> C; roots on A and B
    builder.instance_with_refs(0x100, NODE_CLASS, &[0x300]);
    builder.instance_with_refs(0x200, NODE_CLASS, &[0x300]);
    builder.instance_with_refs(0x300, NODE_CLASS, &[0]);
    builder.root_unknown(0x100);
    builder.root_unknown(0x200);

    let (_dir, path) = builder.write_temp();
    let mut dump = HeapDump::open(&path, DumpOptions::default()).unwrap();

    assert_eq!(dump.inbound_count(0x300).unwrap(), Some(2));
    // C is shared, so neither A nor B retains it
    assert_eq!(dump.retained_size(0x100).unwrap(), Some(16));
    assert_eq!(dump.retained_size(0x200).unwrap(), Some(16));
    assert_eq!(dump.retained_size(0x300).unwrap(), Some(16));

    let root_path = dump.path_to_gc_root(0x300).unwrap();
    assert_eq!(root_path.len(), 2);
    assert_eq!(root_path[1].address, 0x300);

    // exact dominators over the whole toy graph agree
    let tree_size = dump
        .compute_subgraph_dominators(&[0x100, 0x200, 0x300])
        .unwrap();
    assert_eq!(tree_size, 3);
    // every GC-root path to C goes through the virtual root only
    assert_eq!(dump.immediate_dominator(0x300), None);
    assert_eq!(dump.exact_retained(0x100), Some(16));
    assert_eq!(dump.exact_retained(0x300), Some(16));
    assert!(dump.dominated_by(0x100).is_empty());
}

#[test]
fn object_array_references_skip_nulls() {
    let mut builder = DumpBuilder::new();
    node_class(&mut builder);
    builder.utf8(3, "[Lcom/example/Node;");
    builder.load_class(0x20, 3);
    builder.class_dump(0x20, 0, 0, &[], &[]);
    builder.instance_with_refs(0x100, NODE_CLASS, &[0]); // X
    builder.instance_with_refs(0x200, NODE_CLASS, &[0]); // Y
    builder.object_array(0x300, 0x20, &[0x100, 0, 0x200]);

    let (_dir, path) = builder.write_temp();
    let mut dump = HeapDump::open(&path, DumpOptions::default()).unwrap();

    let array = dump.get_object(0x300).unwrap().unwrap();
    assert_eq!(array.kind, ObjectKind::ObjectArray);
    assert_eq!(array.array_length, 3);
    assert_eq!(array.class_name(), Some("[Lcom/example/Node;"));
    // header + 3 * id size
    assert_eq!(array.shallow_size, 8 + 3 * 8);

    assert_eq!(dump.outbound_references(0x300).unwrap(), vec![0x100, 0x200]);

    assert_eq!(dump.inbound_count(0x100).unwrap(), Some(1));
    assert_eq!(dump.inbound_count(0x200).unwrap(), Some(1));
    let expected = array.shallow_size + 16 + 16;
    assert_eq!(dump.retained_size(0x300).unwrap(), Some(expected));
}

#[test]
fn class_objects_are_excluded_from_iteration() {
    let mut builder = DumpBuilder::new();
    let first_class = 0x1000u64;
    for i in 0..10u64 {
        let address = first_class + i * 0x10;
        builder.utf8(100 + i, &format!("com/example/Type{i}"));
        builder.load_class(address, 100 + i);
        builder.class_dump(address, 0, 0, &[], &[]);
    }
    for i in 0..1000u64 {
        builder.instance(0x10000 + i * 0x10, first_class, &[]);
    }

    let (_dir, path) = builder.write_temp();
    let mut dump = HeapDump::open(&path, DumpOptions::default()).unwrap();

    assert_eq!(dump.object_count(), 1000);
    assert_eq!(dump.class_count(), 10);

    // streaming yields class ids too, with size zero
    let mut class_objects = 0;
    let mut total = 0;
    for object in dump.objects() {
        let object = object.unwrap();
        total += 1;
        if object.kind == ObjectKind::Class {
            class_objects += 1;
            assert_eq!(object.shallow_size, 0);
        }
    }
    assert_eq!(total, 1010);
    assert_eq!(class_objects, 10);

    // whole-heap retained assigns zero to class ids
    assert_eq!(dump.retained_size(first_class).unwrap(), Some(0));
    assert_eq!(dump.retained_size(0x10000).unwrap(), Some(8));
}

#[test]
fn primitive_array_typing() {
    let mut builder = DumpBuilder::new();
    builder.prim_array(0x500, TYPE_INT, 4);

    let (_dir, path) = builder.write_temp();
    let mut dump = HeapDump::open(&path, DumpOptions::default()).unwrap();

    let array = dump.get_object(0x500).unwrap().unwrap();
    assert_eq!(array.kind, ObjectKind::PrimitiveArray);
    assert_eq!(array.array_length, 4);
    assert_eq!(array.element_type, Some(FieldType::Int));
    assert_eq!(array.class_name(), Some("[I"));
    assert_eq!(array.shallow_size, 8 + 4 * 4);
    assert!(dump.outbound_references(0x500).unwrap().is_empty());
}

#[test]
fn unknown_sub_record_tag_is_fatal_and_leaves_no_index() {
    let mut builder = DumpBuilder::new();
    node_class(&mut builder);
    builder.instance_with_refs(0x100, NODE_CLASS, &[0]);
    builder.raw_heap_bytes(&[0x77]);

    let (_dir, path) = builder.write_temp();
    let err = HeapDump::open(&path, DumpOptions::default()).unwrap_err();
    assert!(
        matches!(err, HprofDelveError::UnknownSubRecordTag { tag: 0x77, .. }),
        "unexpected error: {err:?}"
    );

    // no partial index that a re-open would accept
    let mut idx_dir = path.as_os_str().to_os_string();
    idx_dir.push(".idx");
    let idx_dir = std::path::PathBuf::from(idx_dir);
    assert!(!idx_dir.join("objects.idx").exists());

    let err = HeapDump::open(&path, DumpOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        HprofDelveError::UnknownSubRecordTag { tag: 0x77, .. }
    ));
}

#[test]
fn id_space_is_dense_and_round_trips() {
    let mut builder = DumpBuilder::new();
    node_class(&mut builder);
    builder.instance_with_refs(0x900, NODE_CLASS, &[0]);
    builder.instance_with_refs(0x100, NODE_CLASS, &[0x900]);
    builder.prim_array(0x400, TYPE_INT, 1);

    let (_dir, path) = builder.write_temp();
    let mut dump = HeapDump::open(&path, DumpOptions::default()).unwrap();

    let yielded: Vec<(u32, u64)> = dump
        .objects()
        .map(|o| {
            let o = o.unwrap();
            (o.id32, o.address)
        })
        .collect();
    // ids are exactly [0, N) in sorted address order
    let mut sorted = yielded.clone();
    sorted.sort_by_key(|&(_, address)| address);
    assert_eq!(yielded, sorted);
    for (expected, &(id32, address)) in yielded.iter().enumerate() {
        assert_eq!(id32 as usize, expected);
        let reloaded = dump.get_object(address).unwrap().unwrap();
        assert_eq!(reloaded.id32, id32);
        assert_eq!(reloaded.address, address);
    }
}

#[test]
fn inbound_counts_match_brute_force() {
    let mut builder = DumpBuilder::new();
    node_class(&mut builder);
    builder.utf8(3, "[Lcom/example/Node;");
    builder.load_class(0x20, 3);
    builder.class_dump(0x20, 0, 0, &[], &[]);
    builder.instance_with_refs(0x100, NODE_CLASS, &[0x200]);
    builder.instance_with_refs(0x200, NODE_CLASS, &[0x300]);
    builder.instance_with_refs(0x300, NODE_CLASS, &[0x100]); // cycle
    builder.object_array(0x400, 0x20, &[0x100, 0x200, 0x300, 0x200]);
    builder.root_unknown(0x100);

    let (_dir, path) = builder.write_temp();
    let mut dump = HeapDump::open(&path, DumpOptions::default()).unwrap();

    let addresses: Vec<u64> = dump
        .objects()
        .map(|o| o.unwrap().address)
        .collect();
    let mut expected: AHashMap<u64, u32> = AHashMap::new();
    for &address in &addresses {
        for target in dump.outbound_references(address).unwrap() {
            *expected.entry(target).or_insert(0) += 1;
        }
    }
    for &address in &addresses {
        let counted = dump.inbound_count(address).unwrap().unwrap();
        assert_eq!(counted, expected.get(&address).copied().unwrap_or(0));
    }
}

#[test]
fn path_is_shortest_among_alternatives() {
    let mut builder = DumpBuilder::new();
    builder.utf8(1, "com/example/Pair");
    builder.utf8(2, "left");
    builder.utf8(3, "right");
    builder.load_class(0x10, 1);
    builder.class_dump(0x10, 0, 16, &[], &[(2, TYPE_OBJECT), (3, TYPE_OBJECT)]);
    // A.left -> B, A.right -> T, B.left -> T: direct hop wins
    builder.instance_with_refs(0x100, 0x10, &[0x200, 0x900]);
    builder.instance_with_refs(0x200, 0x10, &[0x900, 0]);
    builder.instance_with_refs(0x900, 0x10, &[0, 0]);
    builder.root_unknown(0x100);

    let (_dir, path) = builder.write_temp();
    let mut dump = HeapDump::open(&path, DumpOptions::default()).unwrap();

    let root_path = dump.path_to_gc_root(0x900).unwrap();
    assert_eq!(root_path.len(), 2);
    assert_eq!(root_path[0].address, 0x100);
    assert_eq!(root_path[1].address, 0x900);
    assert_eq!(root_path[1].edge, Some(EdgeLabel::Field("right".into())));

    // a rooted object is its own path
    let self_path = dump.path_to_gc_root(0x100).unwrap();
    assert_eq!(self_path.len(), 1);
    assert_eq!(self_path[0].address, 0x100);

    // unreachable object yields an empty path
    let mut builder = DumpBuilder::new();
    node_class(&mut builder);
    builder.instance_with_refs(0x100, NODE_CLASS, &[0]);
    let (_dir2, path2) = builder.write_temp();
    let mut rootless = HeapDump::open(&path2, DumpOptions::default()).unwrap();
    assert!(rootless.path_to_gc_root(0x100).unwrap().is_empty());
}

#[test]
fn lru_capacity_does_not_change_results() {
    let mut builder = DumpBuilder::new();
    node_class(&mut builder);
    builder.instance_with_refs(0x100, NODE_CLASS, &[0x200]);
    builder.instance_with_refs(0x200, NODE_CLASS, &[0x300]);
    builder.instance_with_refs(0x300, NODE_CLASS, &[0]);
    builder.root_unknown(0x100);

    let (_dir, path) = builder.write_temp();
    let mut tiny = HeapDump::open(&path, DumpOptions::default().in_memory().cache_capacity(1))
        .unwrap();
    let mut large =
        HeapDump::open(&path, DumpOptions::default().in_memory().cache_capacity(10_000)).unwrap();
    for address in [0x100u64, 0x200, 0x300] {
        assert_eq!(
            tiny.retained_size(address).unwrap(),
            large.retained_size(address).unwrap()
        );
        assert_eq!(
            tiny.outbound_references(address).unwrap(),
            large.outbound_references(address).unwrap()
        );
    }
}

#[test]
fn exact_dominators_on_linear_chain_match_approximate() {
    let mut builder = DumpBuilder::new();
    node_class(&mut builder);
    builder.instance_with_refs(0x100, NODE_CLASS, &[0x200]);
    builder.instance_with_refs(0x200, NODE_CLASS, &[0x300]);
    builder.instance_with_refs(0x300, NODE_CLASS, &[0]);
    builder.root_unknown(0x100);

    let (_dir, path) = builder.write_temp();
    let mut dump = HeapDump::open(&path, DumpOptions::default()).unwrap();
    let approx_a = dump.retained_size(0x100).unwrap().unwrap();

    let size = dump
        .compute_subgraph_dominators(&[0x100, 0x200, 0x300])
        .unwrap();
    assert_eq!(size, 3);
    assert_eq!(dump.exact_retained(0x100), Some(48));
    assert_eq!(dump.exact_retained(0x200), Some(32));
    assert_eq!(dump.exact_retained(0x300), Some(16));
    assert!(dump.exact_retained(0x100).unwrap() >= approx_a);
    assert_eq!(dump.immediate_dominator(0x200), Some(0x100));
    assert_eq!(dump.dominated_by(0x100), vec![0x200]);
    assert_eq!(dump.immediate_dominator(0x100), None);
}

#[test]
fn hybrid_dominators_cover_the_largest_objects() {
    let mut builder = DumpBuilder::new();
    node_class(&mut builder);
    builder.instance_with_refs(0x100, NODE_CLASS, &[0x200]);
    builder.instance_with_refs(0x200, NODE_CLASS, &[0x300]);
    builder.instance_with_refs(0x300, NODE_CLASS, &[0]);
    builder.root_unknown(0x100);

    let (_dir, path) = builder.write_temp();
    let mut dump = HeapDump::open(&path, DumpOptions::default()).unwrap();

    let options = hprof_delve::DominatorOptions {
        top: 2,
        retained_threshold: 1,
        patterns: vec!["com/example/*".to_string()],
    };
    let size = dump.compute_dominators(&options).unwrap();
    // the pattern pulls in every node, expansion keeps the root path
    assert_eq!(size, 3);
    assert_eq!(dump.exact_retained(0x100), Some(48));
    assert_eq!(dump.immediate_dominator(0x300), Some(0x200));
}
