use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};

use crate::errors::HprofDelveError;
use crate::heap::object::{EdgeLabel, GcRoot};
use crate::heap::store::ObjectStore;

/// One hop of a root path. `edge` labels the reference that led here from
/// the previous node: a field name, or `[i]` for an array element. The first
/// node of a path has no incoming edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNode {
    pub address: u64,
    pub edge: Option<EdgeLabel>,
}

/// Shortest path from any GC root to `target`: breadth-first search from the
/// root set forward through outbound edges, stopping when the target is
/// dequeued. Returns the path root-first, or an empty vector when the target
/// is unreachable.
pub fn shortest_path_to_root(
    store: &ObjectStore,
    gc_roots: &[GcRoot],
    target: u32,
) -> Result<Vec<PathNode>, HprofDelveError> {
    let address_of = |id32: u32| {
        store
            .addresses()
            .address_of(id32)
            .ok_or_else(|| HprofDelveError::Corruption {
                offset: 0,
                message: format!("id {id32} outside the address map"),
            })
    };

    let mut root_ids: Vec<u32> = gc_roots.iter().map(|r| r.object_id32).collect();
    root_ids.sort_unstable();
    root_ids.dedup();

    if root_ids.binary_search(&target).is_ok() {
        return Ok(vec![PathNode {
            address: address_of(target)?,
            edge: None,
        }]);
    }

    let mut visited: AHashSet<u32> = root_ids.iter().copied().collect();
    let mut parent: AHashMap<u32, (u32, EdgeLabel)> = AHashMap::new();
    let mut queue: VecDeque<u32> = root_ids.into_iter().collect();

    while let Some(current) = queue.pop_front() {
        if current == target {
            // walk the parent edges back to the seeding root, then reverse
            let mut path = Vec::new();
            let mut node = target;
            loop {
                match parent.get(&node) {
                    Some((from, label)) => {
                        path.push(PathNode {
                            address: address_of(node)?,
                            edge: Some(label.clone()),
                        });
                        node = *from;
                    }
                    None => {
                        path.push(PathNode {
                            address: address_of(node)?,
                            edge: None,
                        });
                        break;
                    }
                }
            }
            path.reverse();
            return Ok(path);
        }
        for (address, label) in store.read_outbound_labeled(current)? {
            // referents missing from the address map are dropped
            if let Some(next) = store.addresses().id32_of(address) {
                if visited.insert(next) {
                    parent.insert(next, (current, label));
                    queue.push_back(next);
                }
            }
        }
    }
    Ok(Vec::new())
}
