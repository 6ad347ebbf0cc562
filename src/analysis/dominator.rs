use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ahash::{AHashMap, AHashSet};

use crate::analysis::glob::glob_match;
use crate::errors::HprofDelveError;
use crate::heap::object::{GcRoot, ObjectKind};
use crate::heap::store::ObjectStore;
use crate::utils::ProgressSink;

/// Class-name globs that frequently anchor leaks: thread-local containers,
/// classloaders, the common hash/weak maps and reference types. Policy, not
/// contract; instances only qualify above the retained threshold.
pub const LEAK_PRONE_PATTERNS: &[&str] = &[
    "java/lang/ThreadLocal$ThreadLocalMap",
    "java/lang/ThreadLocal$ThreadLocalMap$Entry",
    "java/util/HashMap",
    "java/util/Hashtable",
    "java/util/LinkedHashMap",
    "java/util/WeakHashMap*",
    "java/util/concurrent/ConcurrentHashMap*",
    "java/lang/ref/SoftReference",
    "java/lang/ref/WeakReference",
    "java/lang/ref/Finalizer",
    "*ClassLoader",
];

#[derive(Debug, Clone)]
pub struct DominatorOptions {
    /// How many of the largest objects (by approximate retained size) seed
    /// the interesting set.
    pub top: usize,
    /// Leak-prone instances below this retained size are ignored.
    pub retained_threshold: u64,
    /// Caller-supplied class-name globs, added unconditionally.
    pub patterns: Vec<String>,
}

impl Default for DominatorOptions {
    fn default() -> Self {
        DominatorOptions {
            top: 512,
            retained_threshold: 1024 * 1024,
            patterns: Vec::new(),
        }
    }
}

/// Exact dominator results for a selected subgraph: immediate dominators,
/// the derived child map, and exact retained sizes (dominator subtree sums).
pub struct DominatorTree {
    /// member id32 -> immediate dominator id32; `None` when the virtual root
    /// is the immediate dominator.
    idom: AHashMap<u32, Option<u32>>,
    children: AHashMap<u32, Vec<u32>>,
    /// members dominated directly by the virtual root
    top_level: Vec<u32>,
    exact_retained: AHashMap<u32, u64>,
}

impl DominatorTree {
    pub fn len(&self) -> usize {
        self.idom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idom.is_empty()
    }

    pub fn contains(&self, id32: u32) -> bool {
        self.idom.contains_key(&id32)
    }

    /// `None` when the object is outside the tree or sits directly under the
    /// virtual root.
    pub fn immediate_dominator(&self, id32: u32) -> Option<u32> {
        self.idom.get(&id32).copied().flatten()
    }

    /// Objects whose immediate dominator is `id32`.
    pub fn dominated_by(&self, id32: u32) -> &[u32] {
        self.children.get(&id32).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Exact retained size, present for every member of the computed tree.
    pub fn exact_retained(&self, id32: u32) -> Option<u64> {
        self.exact_retained.get(&id32).copied()
    }

    pub fn top_level(&self) -> &[u32] {
        &self.top_level
    }

    pub fn members(&self) -> impl Iterator<Item = u32> + '_ {
        self.idom.keys().copied()
    }
}

const UNDEF: usize = usize::MAX;

/// Immediate dominators of a rooted graph, classic Lengauer–Tarjan with path
/// compression. `succ[0]` is the virtual root's edge list. Returns per-node
/// immediate dominators (`UNDEF` for the root and for nodes unreachable from
/// it).
fn lengauer_tarjan(succ: &[Vec<usize>]) -> Vec<usize> {
    let n = succ.len();
    let mut pred: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (u, targets) in succ.iter().enumerate() {
        for &v in targets {
            pred[v].push(u);
        }
    }

    // depth-first numbering from the virtual root
    let mut dfnum = vec![UNDEF; n];
    let mut parent = vec![UNDEF; n];
    let mut vertex: Vec<usize> = Vec::with_capacity(n);
    let mut stack = vec![(0usize, UNDEF)];
    while let Some((v, p)) = stack.pop() {
        if dfnum[v] != UNDEF {
            continue;
        }
        dfnum[v] = vertex.len();
        vertex.push(v);
        parent[v] = p;
        for &w in succ[v].iter().rev() {
            if dfnum[w] == UNDEF {
                stack.push((w, v));
            }
        }
    }

    let reachable = vertex.len();
    let mut semi = dfnum.clone();
    let mut idom = vec![UNDEF; n];
    let mut ancestor = vec![UNDEF; n];
    let mut label: Vec<usize> = (0..n).collect();
    let mut bucket: Vec<Vec<usize>> = vec![Vec::new(); n];

    for i in (1..reachable).rev() {
        let w = vertex[i];
        for pi in 0..pred[w].len() {
            let v = pred[w][pi];
            if dfnum[v] == UNDEF {
                continue;
            }
            let u = eval(v, &mut ancestor, &mut label, &semi);
            if semi[u] < semi[w] {
                semi[w] = semi[u];
            }
        }
        bucket[vertex[semi[w]]].push(w);
        ancestor[w] = parent[w];

        let p = parent[w];
        for v in std::mem::take(&mut bucket[p]) {
            let u = eval(v, &mut ancestor, &mut label, &semi);
            idom[v] = if semi[u] < semi[v] { u } else { p };
        }
    }
    for i in 1..reachable {
        let w = vertex[i];
        if idom[w] != vertex[semi[w]] {
            idom[w] = idom[idom[w]];
        }
    }
    if let Some(&root) = vertex.first() {
        idom[root] = UNDEF;
    }
    idom
}

fn eval(v: usize, ancestor: &mut [usize], label: &mut [usize], semi: &[usize]) -> usize {
    if ancestor[v] == UNDEF {
        return v;
    }
    compress(v, ancestor, label, semi);
    label[v]
}

fn compress(v: usize, ancestor: &mut [usize], label: &mut [usize], semi: &[usize]) {
    let mut stack = Vec::new();
    let mut u = v;
    while ancestor[ancestor[u]] != UNDEF {
        stack.push(u);
        u = ancestor[u];
    }
    while let Some(w) = stack.pop() {
        let a = ancestor[w];
        if semi[label[a]] < semi[label[w]] {
            label[w] = label[a];
        }
        ancestor[w] = ancestor[a];
    }
}

/// Exact dominators over the subgraph induced by `members`, with a virtual
/// root wired to every GC root inside the set. Exact retained sizes are the
/// shallow-size sums over dominator subtrees. Members unreachable from the
/// roots are left out of the tree.
pub fn exact_subgraph_dominators(
    store: &ObjectStore,
    members: &[u32],
    roots: &[u32],
) -> Result<DominatorTree, HprofDelveError> {
    let n = members.len() + 1;
    let mut local_of: AHashMap<u32, usize> = AHashMap::with_capacity(members.len());
    for (i, &id32) in members.iter().enumerate() {
        local_of.insert(id32, i + 1);
    }

    let mut succ: Vec<Vec<usize>> = vec![Vec::new(); n];
    succ[0] = roots
        .iter()
        .filter_map(|id32| local_of.get(id32).copied())
        .collect();
    succ[0].sort_unstable();
    succ[0].dedup();

    let mut scratch: Vec<u64> = Vec::new();
    for (i, &id32) in members.iter().enumerate() {
        scratch.clear();
        store.read_outbound(id32, &mut scratch)?;
        let targets = &mut succ[i + 1];
        for &address in &scratch {
            if let Some(local) = store
                .addresses()
                .id32_of(address)
                .and_then(|k| local_of.get(&k).copied())
            {
                targets.push(local);
            }
        }
        targets.sort_unstable();
        targets.dedup();
    }

    let idom_local = lengauer_tarjan(&succ);

    // subtree shallow sums in reverse depth-first order give exact retained
    let mut dfnum = vec![UNDEF; n];
    let mut order: Vec<usize> = Vec::with_capacity(n);
    {
        let mut stack = vec![0usize];
        while let Some(v) = stack.pop() {
            if dfnum[v] != UNDEF {
                continue;
            }
            dfnum[v] = order.len();
            order.push(v);
            for &w in &succ[v] {
                if dfnum[w] == UNDEF && (idom_local[w] != UNDEF || w == 0) {
                    stack.push(w);
                }
            }
        }
    }
    let mut sums = vec![0u64; n];
    for &v in &order {
        if v != 0 {
            sums[v] = store.shallow_size_of(members[v - 1])?;
        }
    }
    for &v in order.iter().rev() {
        if v != 0 && idom_local[v] != UNDEF {
            let subtree = sums[v];
            sums[idom_local[v]] += subtree;
        }
    }

    let mut idom: AHashMap<u32, Option<u32>> = AHashMap::new();
    let mut children: AHashMap<u32, Vec<u32>> = AHashMap::new();
    let mut top_level: Vec<u32> = Vec::new();
    let mut exact_retained: AHashMap<u32, u64> = AHashMap::new();
    for (i, &id32) in members.iter().enumerate() {
        let local = i + 1;
        let dominator = idom_local[local];
        if dominator == UNDEF {
            continue; // unreachable from the roots
        }
        if dominator == 0 {
            idom.insert(id32, None);
            top_level.push(id32);
        } else {
            let dominator_id32 = members[dominator - 1];
            idom.insert(id32, Some(dominator_id32));
            children.entry(dominator_id32).or_default().push(id32);
        }
        exact_retained.insert(id32, sums[local]);
    }
    top_level.sort_unstable();
    for list in children.values_mut() {
        list.sort_unstable();
    }

    Ok(DominatorTree {
        idom,
        children,
        top_level,
        exact_retained,
    })
}

/// The hybrid-mode seed: top-N by approximate retained size, leak-prone
/// instances above the retained threshold, and caller-pattern matches.
/// Requires the retained index to be attached to the store.
fn interesting_set(
    store: &ObjectStore,
    options: &DominatorOptions,
) -> Result<AHashSet<u32>, HprofDelveError> {
    let mut set: AHashSet<u32> = AHashSet::new();

    // (a) top-N by approximate retained size
    let mut heap: BinaryHeap<Reverse<(u64, u32)>> = BinaryHeap::with_capacity(options.top + 1);
    for id32 in 0..store.ids_len() {
        if store.addresses().is_class(id32) {
            continue;
        }
        let retained = store.retained_of(id32).unwrap_or(0);
        heap.push(Reverse((retained, id32)));
        if heap.len() > options.top {
            heap.pop();
        }
    }
    set.extend(heap.into_iter().map(|Reverse((_, id32))| id32));

    // (b) leak-prone classes above the threshold, (c) caller patterns
    for object in store.stream() {
        let object = object?;
        if object.kind == ObjectKind::Class {
            continue;
        }
        let Some(name) = object.class_name() else {
            continue;
        };
        let retained = store.retained_of(object.id32).unwrap_or(0);
        let leak_prone = retained >= options.retained_threshold
            && LEAK_PRONE_PATTERNS.iter().any(|p| glob_match(p, name));
        let caller_match = options.patterns.iter().any(|p| glob_match(p, name));
        if leak_prone || caller_match {
            set.insert(object.id32);
        }
    }
    Ok(set)
}

/// Close the set under predecessors so every root-to-member path survives in
/// the reduced graph. Inbound adjacency is discovered by scanning outbound
/// references of all objects, repeated until a scan adds nothing.
fn expand_to_roots(
    store: &ObjectStore,
    set: &mut AHashSet<u32>,
    progress: &mut ProgressSink,
) -> Result<(), HprofDelveError> {
    let mut scratch: Vec<u64> = Vec::new();
    let mut round = 0u32;
    loop {
        round += 1;
        progress.report(0.0, &format!("Expanding dominator set (round {round})"));
        let mut added: Vec<u32> = Vec::new();
        for id32 in 0..store.ids_len() {
            if set.contains(&id32) {
                continue;
            }
            scratch.clear();
            store.read_outbound(id32, &mut scratch)?;
            let points_into_set = scratch.iter().any(|&address| {
                store
                    .addresses()
                    .id32_of(address)
                    .is_some_and(|k| set.contains(&k))
            });
            if points_into_set {
                added.push(id32);
            }
        }
        if added.is_empty() {
            return Ok(());
        }
        set.extend(added);
    }
}

/// Hybrid mode: exact dominators over the expanded interesting set instead
/// of the full graph.
pub fn hybrid_dominators(
    store: &ObjectStore,
    gc_roots: &[GcRoot],
    options: &DominatorOptions,
    progress: &mut ProgressSink,
) -> Result<DominatorTree, HprofDelveError> {
    let mut set = interesting_set(store, options)?;
    expand_to_roots(store, &mut set, progress)?;

    let mut members: Vec<u32> = set.iter().copied().collect();
    members.sort_unstable();

    let mut roots: Vec<u32> = gc_roots
        .iter()
        .map(|r| r.object_id32)
        .filter(|id32| set.contains(id32))
        .collect();
    roots.sort_unstable();
    roots.dedup();

    progress.report(
        1.0,
        &format!("Running exact dominators over {} objects", members.len()),
    );
    exact_subgraph_dominators(store, &members, &roots)
}

#[cfg(test)]
mod tests {
    use super::{lengauer_tarjan, UNDEF};

    // locals: 0 = root
    fn idoms(edges: &[(usize, usize)], n: usize) -> Vec<usize> {
        let mut succ = vec![Vec::new(); n];
        for &(u, v) in edges {
            succ[u].push(v);
        }
        lengauer_tarjan(&succ)
    }

    #[test]
    fn diamond() {
        // 0 -> 1; 1 -> 2, 3; 2 -> 4; 3 -> 4
        let idom = idoms(&[(0, 1), (1, 2), (1, 3), (2, 4), (3, 4)], 5);
        assert_eq!(idom[1], 0);
        assert_eq!(idom[2], 1);
        assert_eq!(idom[3], 1);
        assert_eq!(idom[4], 1);
    }

    #[test]
    fn diamond_with_back_edge() {
        // cycle 4 -> 2 must not change the dominators
        let idom = idoms(&[(0, 1), (1, 2), (1, 3), (2, 4), (3, 4), (4, 2)], 5);
        assert_eq!(idom[4], 1);
        assert_eq!(idom[2], 1);
    }

    #[test]
    fn linear_chain() {
        let idom = idoms(&[(0, 1), (1, 2), (2, 3)], 4);
        assert_eq!(idom[1], 0);
        assert_eq!(idom[2], 1);
        assert_eq!(idom[3], 2);
    }

    #[test]
    fn unreachable_node_has_no_dominator() {
        let idom = idoms(&[(0, 1), (2, 3)], 4);
        assert_eq!(idom[1], 0);
        assert_eq!(idom[2], UNDEF);
        assert_eq!(idom[3], UNDEF);
    }

    #[test]
    fn two_roots_share_virtual_root() {
        // 0 -> 1, 0 -> 2, both -> 3: nobody but the virtual root dominates 3
        let idom = idoms(&[(0, 1), (0, 2), (1, 3), (2, 3)], 4);
        assert_eq!(idom[3], 0);
    }
}
