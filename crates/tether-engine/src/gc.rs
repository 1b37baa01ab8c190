//! Mark-sweep garbage collection
//!
//! Roots are the open handle scopes, global roots, strong references and
//! pending promises. Collection only runs at safe points (no native call in
//! progress), so values handed to a native callback stay valid for the
//! whole call.
//!
//! Sweeping detaches the finalizers of dead wrapped objects; the runtime
//! runs them after releasing its internal borrows, because finalizers call
//! back into the host.

use std::time::{Duration, Instant};

use tether_sdk::{Finalizer, HeapRef};

use crate::heap::{Heap, HeapData};

/// Garbage collector statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Total objects freed
    pub objects_freed: usize,

    /// Total finalizers run
    pub finalizers_run: usize,

    /// Objects marked in last collection
    pub last_marked_count: usize,

    /// Objects freed in last collection
    pub last_freed_count: usize,

    /// Live objects after last collection
    pub live_objects: usize,

    /// Last collection duration
    pub last_pause_time: Duration,

    /// Total pause time across all collections
    pub total_pause_time: Duration,
}

impl GcStats {
    fn update(&mut self, pause: Duration, marked: usize, freed: usize, finalizers: usize, live: usize) {
        self.collections += 1;
        self.objects_freed += freed;
        self.finalizers_run += finalizers;
        self.last_marked_count = marked;
        self.last_freed_count = freed;
        self.live_objects = live;
        self.last_pause_time = pause;
        self.total_pause_time += pause;
    }
}

// ============================================================================
// Roots
// ============================================================================

/// Handle scopes and global roots
pub(crate) struct RootSet {
    /// One frame per open scope; the bottom frame lives as long as the runtime
    scopes: Vec<Vec<HeapRef>>,

    /// Values rooted until explicitly released
    globals: Vec<HeapRef>,
}

impl RootSet {
    pub fn new() -> Self {
        RootSet {
            scopes: vec![Vec::new()],
            globals: Vec::new(),
        }
    }

    pub fn open_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    pub fn close_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Root a value in the innermost scope
    pub fn add_scoped(&mut self, r: HeapRef) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(r);
        }
    }

    pub fn add_global(&mut self, r: HeapRef) {
        self.globals.push(r);
    }

    /// Drop every root, including the bottom scope
    pub fn clear(&mut self) {
        self.scopes.truncate(1);
        if let Some(bottom) = self.scopes.first_mut() {
            bottom.clear();
        }
        self.globals.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = HeapRef> + '_ {
        self.scopes.iter().flatten().chain(self.globals.iter()).copied()
    }
}

// ============================================================================
// Collection
// ============================================================================

/// Outcome of one collection
pub(crate) struct Sweep {
    pub marked: usize,
    pub freed: usize,
    pub finalizers: Vec<Finalizer>,
}

/// Mark everything reachable from `roots`. Returns the number of marked cells.
fn mark(heap: &mut Heap, roots: impl IntoIterator<Item = HeapRef>) -> usize {
    for (_, cell) in heap.cells_mut() {
        cell.marked = false;
    }

    let mut marked = 0;
    let mut worklist: Vec<HeapRef> = roots.into_iter().collect();
    while let Some(r) = worklist.pop() {
        let cell = match heap.cell_mut(r.as_raw()) {
            Some(cell) if !cell.marked => cell,
            _ => continue,
        };
        cell.marked = true;
        marked += 1;
        if let HeapData::Object(object) = &cell.data {
            object.trace(&mut worklist);
        }
    }
    marked
}

/// Run a full collection over `heap`
pub(crate) fn collect(heap: &mut Heap, roots: impl IntoIterator<Item = HeapRef>, stats: &mut GcStats) -> Sweep {
    let start = Instant::now();
    let marked = mark(heap, roots);
    let dead = heap.remove_unmarked();
    let freed = dead.len();

    let finalizers: Vec<Finalizer> = dead
        .into_iter()
        .filter_map(|cell| match cell.data {
            HeapData::Object(object) => object.wrap.and_then(|wrap| wrap.finalizer),
            _ => None,
        })
        .collect();

    stats.update(start.elapsed(), marked, freed, finalizers.len(), heap.len());
    Sweep {
        marked,
        freed,
        finalizers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{ObjectData, ObjectKind, Property};
    use tether_sdk::HostValue;

    fn object(heap: &mut Heap) -> HeapRef {
        heap.allocate(HeapData::Object(ObjectData::new(ObjectKind::Plain, None)))
    }

    #[test]
    fn test_reachable_cells_survive() {
        let mut heap = Heap::new();
        let root = object(&mut heap);
        let child = heap.allocate(HeapData::String(b"kept".to_vec()));
        let garbage = object(&mut heap);
        if let Ok(o) = heap.object_mut(root) {
            o.define("child", Property::Data(HostValue::Ref(child)));
        }

        let mut stats = GcStats::default();
        let sweep = collect(&mut heap, vec![root], &mut stats);
        assert_eq!(sweep.marked, 2);
        assert_eq!(sweep.freed, 1);
        assert!(heap.contains(child));
        assert!(!heap.contains(garbage));
        assert_eq!(stats.collections, 1);
        assert_eq!(stats.live_objects, 2);
    }

    #[test]
    fn test_cycles_are_collected() {
        let mut heap = Heap::new();
        let a = object(&mut heap);
        let b = object(&mut heap);
        heap.object_mut(a).unwrap().define("b", Property::Data(HostValue::Ref(b)));
        heap.object_mut(b).unwrap().define("a", Property::Data(HostValue::Ref(a)));

        let sweep = collect(&mut heap, Vec::new(), &mut GcStats::default());
        assert_eq!(sweep.freed, 2);
        assert_eq!(heap.len(), 0);
    }

    #[test]
    fn test_finalizers_are_detached() {
        let mut heap = Heap::new();
        let wrapped = object(&mut heap);
        heap.object_mut(wrapped).unwrap().wrap = Some(crate::heap::Wrap {
            tag: 7,
            finalizer: Some(Box::new(|_: &dyn tether_sdk::HostEnv| {})),
        });
        let sweep = collect(&mut heap, Vec::new(), &mut GcStats::default());
        assert_eq!(sweep.finalizers.len(), 1);
    }

    #[test]
    fn test_root_scopes() {
        let mut roots = RootSet::new();
        roots.add_scoped(HeapRef::from_raw(1));
        roots.open_scope();
        roots.add_scoped(HeapRef::from_raw(2));
        assert_eq!(roots.iter().count(), 2);
        roots.close_scope();
        assert_eq!(roots.iter().count(), 1);
        roots.close_scope();
        assert_eq!(roots.iter().count(), 1);
        roots.add_global(HeapRef::from_raw(3));
        roots.clear();
        assert_eq!(roots.iter().count(), 0);
    }
}
