use std::cmp::Reverse;

use ordered_float::OrderedFloat;

/// A candidate move: `vertex` from block `source` to block `destination`.
#[derive(Clone, Debug, PartialEq)]
pub struct GainCell {
    pub vertex: usize,
    pub source: usize,
    pub destination: usize,
    /// Cut-cost decrease plus timing-cost decrease.
    pub gain: f32,
    /// Change of each affected path's cost if the move is taken.
    pub path_delta: Vec<(usize, f32)>,
}

impl GainCell {
    pub fn new(vertex: usize, source: usize, destination: usize, gain: f32) -> Self {
        Self {
            vertex,
            source,
            destination,
            gain,
            path_delta: vec![],
        }
    }
}

// Higher gain first, then the lighter vertex.
type Key = (OrderedFloat<f32>, Reverse<OrderedFloat<f32>>);

#[derive(Clone, Debug)]
struct Slot {
    key: Key,
    weight: f32,
    cell: GainCell,
}

/// Max-heap of gain cells for one destination block. The heap is an arena of
/// cells plus a vertex -> slot map, so lookups, priority changes and removals
/// by vertex id stay logarithmic.
#[derive(Clone, Debug)]
pub struct GainBucket {
    heap: Vec<Slot>,
    vertices_map: Vec<Option<usize>>,
    active: bool,
}

impl GainBucket {
    pub fn new(num_vertices: usize) -> Self {
        Self {
            heap: vec![],
            vertices_map: vec![None; num_vertices],
            active: false,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn clear(&mut self) {
        for slot in self.heap.drain(..) {
            self.vertices_map[slot.cell.vertex] = None;
        }
        self.active = false;
    }

    pub fn contains(&self, v: usize) -> bool {
        self.vertices_map[v].is_some()
    }

    pub fn get(&self, v: usize) -> Option<&GainCell> {
        self.vertices_map[v].map(|i| &self.heap[i].cell)
    }

    /// Cell in heap slot `i`; slot 0 is the maximum.
    pub fn slot(&self, i: usize) -> Option<&GainCell> {
        self.heap.get(i).map(|s| &s.cell)
    }

    pub fn max(&self) -> Option<&GainCell> {
        self.slot(0)
    }

    /// Inserts `cell`, replacing any cell of the same vertex. `weight` is the
    /// vertex weight norm used to break ties.
    pub fn insert(&mut self, cell: GainCell, weight: f32) {
        if self.contains(cell.vertex) {
            self.update(cell);
            return;
        }
        let key = (OrderedFloat(cell.gain), Reverse(OrderedFloat(weight)));
        let i = self.heap.len();
        self.vertices_map[cell.vertex] = Some(i);
        self.heap.push(Slot { key, weight, cell });
        self.sift_up(i);
    }

    /// Replaces the cell of `cell.vertex` and restores heap order.
    pub fn update(&mut self, cell: GainCell) {
        let Some(i) = self.vertices_map[cell.vertex] else {
            return;
        };
        let old = self.heap[i].key;
        let slot = &mut self.heap[i];
        slot.key = (OrderedFloat(cell.gain), Reverse(OrderedFloat(slot.weight)));
        slot.cell = cell;
        if slot.key > old {
            self.sift_up(i);
        } else {
            self.sift_down(i);
        }
    }

    pub fn extract_max(&mut self) -> Option<GainCell> {
        let v = self.max()?.vertex;
        self.remove(v)
    }

    pub fn remove(&mut self, v: usize) -> Option<GainCell> {
        let i = self.vertices_map[v]?;
        let last = self.heap.len() - 1;
        self.swap(i, last);
        let slot = self.heap.pop()?;
        self.vertices_map[v] = None;
        if i < self.heap.len() {
            self.sift_down(i);
            self.sift_up(i);
        }
        Some(slot.cell)
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.vertices_map[self.heap[a].cell.vertex] = Some(a);
        self.vertices_map[self.heap[b].cell.vertex] = Some(b);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[i].key <= self.heap[parent].key {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let left = 2 * i + 1;
            let right = left + 1;
            let mut largest = i;
            if left < self.heap.len() && self.heap[left].key > self.heap[largest].key {
                largest = left;
            }
            if right < self.heap.len() && self.heap[right].key > self.heap[largest].key {
                largest = right;
            }
            if largest == i {
                break;
            }
            self.swap(i, largest);
            i = largest;
        }
    }
}
