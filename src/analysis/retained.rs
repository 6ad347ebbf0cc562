use std::collections::VecDeque;

use ahash::AHashSet;

use crate::errors::HprofDelveError;
use crate::heap::store::ObjectStore;
use crate::index::reader::IndexReader;
use crate::utils::ProgressSink;

const PROGRESS_STRIDE: u32 = 50_000;

/// Approximate retained size of one object: the sum of shallow sizes over
/// the subgraph reachable from it, where expansion stops at any object with
/// more than one inbound reference (other than the start itself). A lower
/// bound of the true retained size.
pub fn approximate_retained(
    store: &ObjectStore,
    inbound: &IndexReader,
    target: u32,
) -> Result<u64, HprofDelveError> {
    let mut visited: AHashSet<u32> = AHashSet::new();
    let mut queue: VecDeque<u32> = VecDeque::new();
    let mut scratch: Vec<u64> = Vec::new();
    visited.insert(target);
    queue.push_back(target);

    let mut total = 0u64;
    while let Some(id32) = queue.pop_front() {
        total += store.shallow_size_of(id32)?;
        let shared = inbound.u32_slot(u64::from(id32)).unwrap_or(0) > 1;
        if shared && id32 != target {
            // shared object: counted, never expanded through
            continue;
        }
        scratch.clear();
        store.read_outbound(id32, &mut scratch)?;
        for &address in &scratch {
            if let Some(k) = store.addresses().id32_of(address) {
                if visited.insert(k) {
                    queue.push_back(k);
                }
            }
        }
    }
    Ok(total)
}

/// Whole-heap approximate retained sizes, one slot per id32. Class ids get
/// zero. Memory use is bounded by the largest single BFS frontier, not by
/// the object count.
pub fn compute_all_retained(
    store: &ObjectStore,
    inbound: &IndexReader,
    progress: &mut ProgressSink,
) -> Result<Vec<u64>, HprofDelveError> {
    let total = store.ids_len();
    let mut retained = vec![0u64; total as usize];
    for id32 in 0..total {
        if !store.addresses().is_class(id32) {
            retained[id32 as usize] = approximate_retained(store, inbound, id32)?;
        }
        if id32 % PROGRESS_STRIDE == 0 {
            progress.report(
                f64::from(id32) / f64::from(total.max(1)),
                "Computing approximate retained sizes",
            );
        }
    }
    progress.report(1.0, "Computing approximate retained sizes");
    Ok(retained)
}
