//! The stream FIFO: a fixed-capacity element pool plus a free list, shared
//! across every active dynS (spec.md §4.2, §3 invariant 6). Each dynS
//! threads a singly linked chain through the pool: `tail -> stepped ->
//! head`.

use stream_engine_types::{Cycle, DynStreamId, ElementIdx, PAddr, VAddr};

/// A core-side element's lifecycle (spec.md §3): *free -> allocated ->
/// address-ready -> value-ready -> stepped -> released*.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Allocated,
    AddressReady,
    ValueReady,
    Stepped,
}

/// A single iteration of a dynS on the core side (spec.md §3 "Element").
#[derive(Debug, Clone)]
pub struct Element {
    pub dyn_stream_id: DynStreamId,
    pub element_idx: ElementIdx,
    pub state: ElementState,
    pub address: Option<VAddr>,
    pub paddr: Option<PAddr>,
    pub faulted: bool,
    pub stored: bool,
    /// Bases not yet value-ready; the element may only compute its
    /// address once this reaches zero (spec.md §4.2 base-readiness rule).
    pub pending_bases: u32,
    /// In-flight sub-line request count; the element becomes value-ready
    /// on the last response (spec.md §4.3).
    pub pending_accesses: u32,
    pub allocate_cycle: Cycle,
    pub value_ready_cycle: Option<Cycle>,
    pub first_check_cycle: Option<Cycle>,
    /// Next element of the same dynS in pool-slot order, or `None` at head.
    next: Option<usize>,
}

impl Element {
    fn new(dyn_stream_id: DynStreamId, element_idx: ElementIdx, allocate_cycle: Cycle, pending_bases: u32) -> Self {
        Self {
            dyn_stream_id,
            element_idx,
            state: ElementState::Allocated,
            address: None,
            paddr: None,
            faulted: false,
            stored: false,
            pending_bases,
            pending_accesses: 0,
            allocate_cycle,
            value_ready_cycle: None,
            first_check_cycle: None,
            next: None,
        }
    }

    pub fn is_address_ready(&self) -> bool {
        !matches!(self.state, ElementState::Allocated)
    }

    pub fn is_value_ready(&self) -> bool {
        matches!(self.state, ElementState::ValueReady | ElementState::Stepped)
    }
}

/// Fixed-capacity element pool. Slot indices are stable for the lifetime
/// of an allocation; freed slots are recycled via `free_list`.
pub struct ElementPool {
    slots: Vec<Option<Element>>,
    free_list: Vec<usize>,
}

impl ElementPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            free_list: (0..capacity).rev().collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.capacity() - self.free_count()
    }

    /// Invariant 4 (spec.md §8): `|freeList| + Σ alloc == pool capacity`.
    pub fn conserves_capacity(&self) -> bool {
        self.free_count() + self.in_use_count() == self.capacity()
    }

    fn alloc_slot(
        &mut self,
        dyn_stream_id: DynStreamId,
        element_idx: ElementIdx,
        allocate_cycle: Cycle,
        pending_bases: u32,
    ) -> Option<usize> {
        let slot = self.free_list.pop()?;
        self.slots[slot] = Some(Element::new(dyn_stream_id, element_idx, allocate_cycle, pending_bases));
        Some(slot)
    }

    fn release_slot(&mut self, slot: usize) {
        self.slots[slot] = None;
        self.free_list.push(slot);
    }

    pub fn get(&self, slot: usize) -> &Element {
        self.slots[slot].as_ref().expect("slot must be occupied")
    }

    pub fn get_mut(&mut self, slot: usize) -> &mut Element {
        self.slots[slot].as_mut().expect("slot must be occupied")
    }
}

/// Per-dynS view into the shared [`ElementPool`]: the `tail -> stepped ->
/// head` chain from spec.md §4.2.
pub struct FifoChain {
    pub dyn_stream_id: DynStreamId,
    tail: Option<usize>,
    stepped: Option<usize>,
    head: Option<usize>,
    next_alloc_idx: ElementIdx,
    len: usize,
    /// Count of elements from `tail` through `stepped`, inclusive --
    /// i.e. `stepSize`. Tracked directly rather than derived by walking
    /// the chain on every query.
    step_count: usize,
}

impl FifoChain {
    pub fn new(dyn_stream_id: DynStreamId) -> Self {
        Self {
            dyn_stream_id,
            tail: None,
            stepped: None,
            head: None,
            next_alloc_idx: 0,
            len: 0,
            step_count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn next_alloc_idx(&self) -> ElementIdx {
        self.next_alloc_idx
    }

    pub fn head_slot(&self) -> Option<usize> {
        self.head
    }

    pub fn tail_slot(&self) -> Option<usize> {
        self.tail
    }

    pub fn stepped_slot(&self) -> Option<usize> {
        self.stepped
    }

    /// Allocates the next element of this dynS at `head`, threading it
    /// onto the chain. Invariant: `head.next == None`.
    pub fn allocate(&mut self, pool: &mut ElementPool, now: Cycle, pending_bases: u32) -> Option<usize> {
        let idx = self.next_alloc_idx;
        let slot = pool.alloc_slot(self.dyn_stream_id, idx, now, pending_bases)?;
        if let Some(head) = self.head {
            pool.get_mut(head).next = Some(slot);
        } else {
            self.tail = Some(slot);
        }
        self.head = Some(slot);
        self.next_alloc_idx += 1;
        self.len += 1;
        Some(slot)
    }

    /// Advances `stepped` one element forward (spec.md §4.3 `dispatchStep`).
    /// Fails if every live element has already been stepped.
    pub fn step(&mut self, pool: &ElementPool) -> Option<usize> {
        if self.step_count >= self.len {
            return None;
        }
        let next = match self.stepped {
            None => self.tail,
            Some(stepped) => pool.get(stepped).next,
        }?;
        self.stepped = Some(next);
        self.step_count += 1;
        Some(next)
    }

    /// Releases the oldest live element (the current `tail`), advancing
    /// it to the next element in the chain. Returns the released slot.
    pub fn release_tail(&mut self, pool: &mut ElementPool) -> Option<usize> {
        let tail = self.tail?;
        let next = pool.get(tail).next;
        if self.stepped == Some(tail) {
            self.stepped = next;
            self.step_count = self.step_count.saturating_sub(1);
        }
        if self.head == Some(tail) {
            self.head = next;
        }
        self.tail = next;
        self.len -= 1;
        pool.release_slot(tail);
        Some(tail)
    }

    /// `stepSize`: elements from `tail` through `stepped`, inclusive.
    pub fn step_size(&self) -> usize {
        self.step_count
    }

    /// `allocSize`: total live elements, tail..head inclusive.
    pub fn alloc_size(&self) -> usize {
        self.len
    }

    /// Iterates every live slot from `tail` to `head` in order.
    pub fn iter_slots<'a>(&self, pool: &'a ElementPool) -> impl Iterator<Item = usize> + 'a {
        let mut cur = self.tail;
        std::iter::from_fn(move || {
            let slot = cur?;
            cur = pool.get(slot).next;
            Some(slot)
        })
    }
}
