//! `LLCDynamicStream` (spec.md §4.5): per-bank iteration state, indirect-
//! element dispatch bookkeeping, and the migration-eligibility check.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use stream_engine_types::{AddrGen, BankId, DynStreamId, ElementIdx, VAddr};

use crate::element::LLCStreamElement;

/// One indirect stream that depends on this (base) dynS's value for its
/// own address computation (spec.md §4.5 "On receive-element-data").
#[derive(Debug, Clone, Copy)]
pub struct IndirectDependent {
    pub id: DynStreamId,
    /// Promoted indices are shifted by +1 (spec.md §4.6).
    pub one_iteration_behind: bool,
}

pub struct LLCDynamicStream {
    pub dyn_stream_id: DynStreamId,
    pub addr_gen: Arc<dyn AddrGen>,
    pub element_size: u32,
    pub line_size: u64,
    pub is_pointer_chase: bool,
    pub is_pseudo_offload: bool,
    pub trip_count: Option<u64>,
    pub max_infly_requests: usize,

    /// Set when this dynS is itself an indirect stream: the base dynS
    /// (same instance) whose `ready`/`waiting` sets drive its issue order.
    pub indirect_source: Option<DynStreamId>,

    pub indirect_dependents: Vec<IndirectDependent>,

    /// Next element index this bank will issue a base request for. Unused
    /// by indirect streams, which instead pull from their base's ready set.
    allocated_idx: ElementIdx,
    /// Highest element index credit has been granted up to (exclusive).
    credit_end_idx: ElementIdx,
    /// In-flight base requests issued by this bank, awaiting data.
    waiting_data_base_requests: usize,

    /// Per-dependent outstanding/ready indirect element indices (spec.md
    /// §3 invariant 4: migration requires both sets empty for every
    /// dependent).
    dependent_waiting: HashMap<DynStreamId, BTreeSet<ElementIdx>>,
    dependent_ready: HashMap<DynStreamId, BTreeSet<ElementIdx>>,

    pub elements: HashMap<ElementIdx, LLCStreamElement>,
    pub owner_bank: BankId,
    pub ended: bool,
}

impl LLCDynamicStream {
    pub fn new(
        dyn_stream_id: DynStreamId,
        addr_gen: Arc<dyn AddrGen>,
        element_size: u32,
        line_size: u64,
        trip_count: Option<u64>,
        is_pointer_chase: bool,
        is_pseudo_offload: bool,
        max_infly_requests: usize,
        owner_bank: BankId,
    ) -> Self {
        Self {
            dyn_stream_id,
            addr_gen,
            element_size,
            line_size,
            is_pointer_chase,
            is_pseudo_offload,
            trip_count,
            max_infly_requests,
            indirect_source: None,
            indirect_dependents: Vec::new(),
            allocated_idx: 0,
            credit_end_idx: 0,
            waiting_data_base_requests: 0,
            dependent_waiting: HashMap::new(),
            dependent_ready: HashMap::new(),
            elements: HashMap::new(),
            owner_bank,
            ended: false,
        }
    }

    pub fn register_dependent(&mut self, dependent: IndirectDependent) {
        self.dependent_waiting.entry(dependent.id).or_default();
        self.dependent_ready.entry(dependent.id).or_default();
        self.indirect_dependents.push(dependent);
    }

    pub fn allocated_idx(&self) -> ElementIdx {
        self.allocated_idx
    }

    pub fn credit_end_idx(&self) -> ElementIdx {
        self.credit_end_idx
    }

    pub fn waiting_data_base_requests(&self) -> usize {
        self.waiting_data_base_requests
    }

    /// `STREAM_FLOW`: extends the credited range. Credits for a stream
    /// arrive in ascending order (spec.md §5), so this only ever extends
    /// forward.
    pub fn add_credit(&mut self, end_idx: ElementIdx) {
        self.credit_end_idx = self.credit_end_idx.max(end_idx);
    }

    fn at_trip_end(&self, idx: ElementIdx) -> bool {
        matches!(self.trip_count, Some(total) if idx >= total)
    }

    /// Preconditions for issuing the next base element (spec.md §4.5 step
    /// 2): next element allocated, credited, not past the trip count, and
    /// in-flight count below the stream's cap (pointer-chase caps at 1,
    /// serializing requests).
    pub fn can_issue_next_base(&self) -> bool {
        if self.at_trip_end(self.allocated_idx) || self.allocated_idx >= self.credit_end_idx {
            return false;
        }
        let cap = if self.is_pointer_chase { 1 } else { self.max_infly_requests };
        self.waiting_data_base_requests < cap
    }

    pub fn next_base_vaddr(&self) -> VAddr {
        self.addr_gen.addr(self.allocated_idx)
    }

    fn line_of(&self, addr: VAddr) -> VAddr {
        addr - (addr % self.line_size)
    }

    /// Merges consecutive elements sharing a line into one issued request
    /// (non-pointer-chase only, spec.md §4.5 step 2), returning the
    /// `[start, end)` element range covered and advancing `allocated_idx`
    /// past it. Every registered dependent gets the range added to its
    /// waiting set.
    pub fn issue_next_base(&mut self) -> (ElementIdx, ElementIdx) {
        let start = self.allocated_idx;
        let start_line = self.line_of(self.addr_gen.addr(start));
        let mut end = start + 1;
        if !self.is_pointer_chase {
            loop {
                if self.at_trip_end(end) || end >= self.credit_end_idx {
                    break;
                }
                if self.line_of(self.addr_gen.addr(end)) != start_line {
                    break;
                }
                end += 1;
            }
        }
        self.allocated_idx = end;
        self.waiting_data_base_requests += 1;
        for dependent in &self.indirect_dependents {
            let waiting = self.dependent_waiting.entry(dependent.id).or_default();
            for idx in start..end {
                waiting.insert(idx);
            }
        }
        (start, end)
    }

    /// Fills the per-bank shadow [`LLCStreamElement`] (spec.md §3) for
    /// every index in `[start, end)` from one merged base read, so an
    /// indirect dependent's value can be read back via
    /// [`Self::element_value`] instead of re-deriving the byte offset at
    /// the call site.
    pub fn record_base_values(&mut self, start: ElementIdx, end: ElementIdx, element_size: u32, data: &[u8]) {
        for idx in start..end {
            let offset = ((idx - start) * element_size as u64) as usize;
            let mut element = LLCStreamElement::new(self.dyn_stream_id, idx, self.addr_gen.addr(idx), element_size);
            let len = element_size as usize;
            if offset < data.len() {
                let end_off = (offset + len).min(data.len());
                element.fill(0, &data[offset..end_off]);
            }
            self.elements.insert(idx, element);
        }
    }

    /// The value assembled for element `idx` by [`Self::record_base_values`],
    /// or 0 if it was never recorded (e.g. the base request faulted).
    pub fn element_value(&self, idx: ElementIdx) -> u64 {
        self.elements.get(&idx).map(|e| e.value_u64()).unwrap_or(0)
    }

    /// Drops the shadow elements for `[start, end)` once every dependent
    /// has read its value; the LLC keeps no persistent per-element state
    /// beyond what migration/indirect dispatch need.
    pub fn drop_elements(&mut self, start: ElementIdx, end: ElementIdx) {
        for idx in start..end {
            self.elements.remove(&idx);
        }
    }

    /// `On receive-element-data (for base element)`: decrements in-flight
    /// count and promotes every base index in `[start, end)` into each
    /// dependent's ready set, shifted by +1 for one-iteration-behind
    /// dependents.
    pub fn on_base_data_received(&mut self, start: ElementIdx, end: ElementIdx) {
        self.waiting_data_base_requests = self
            .waiting_data_base_requests
            .checked_sub(1)
            .expect("on_base_data_received fired more times than a base request was outstanding (duplicate STREAM_DATA)");
        for dependent in self.indirect_dependents.clone() {
            let waiting = self.dependent_waiting.entry(dependent.id).or_default();
            let ready = self.dependent_ready.entry(dependent.id).or_default();
            for idx in start..end {
                waiting.remove(&idx);
                let promoted = if dependent.one_iteration_behind { idx + 1 } else { idx };
                ready.insert(promoted);
            }
        }
    }

    pub fn next_ready_indirect_for(&self, dependent: DynStreamId) -> Option<ElementIdx> {
        self.dependent_ready.get(&dependent).and_then(|set| set.iter().next().copied())
    }

    pub fn take_ready_indirect_for(&mut self, dependent: DynStreamId, idx: ElementIdx) {
        if let Some(set) = self.dependent_ready.get_mut(&dependent) {
            set.remove(&idx);
        }
    }

    fn all_dependent_sets_empty(&self) -> bool {
        self.dependent_waiting.values().all(|s| s.is_empty()) && self.dependent_ready.values().all(|s| s.is_empty())
    }

    /// Migration eligibility (spec.md §4.5 step 3, §3 invariant 4/5): the
    /// next element's line must belong to another bank, every dependent's
    /// wait sets are empty, and (not pointer-chase, or no outstanding base
    /// request).
    pub fn is_migratable(&self, next_line_bank: BankId) -> bool {
        if self.is_pseudo_offload {
            return false;
        }
        next_line_bank != self.owner_bank
            && self.all_dependent_sets_empty()
            && (!self.is_pointer_chase || self.waiting_data_base_requests == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stream_engine_types::{AffineAddrGen, StaticStreamId};

    fn dyn_id() -> DynStreamId {
        DynStreamId::new(StaticStreamId(0), 0)
    }

    #[test]
    fn merges_base_requests_sharing_a_line() {
        let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x1000, stride: 4 });
        let mut stream = LLCDynamicStream::new(dyn_id(), gen, 4, 64, Some(64), false, false, 16, 0);
        stream.add_credit(64);
        let (start, end) = stream.issue_next_base();
        assert_eq!((start, end), (0, 16));
        assert_eq!(stream.allocated_idx(), 16);
    }

    #[test]
    fn pointer_chase_never_merges_and_caps_at_one_infly() {
        let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x1000, stride: 64 });
        let mut stream = LLCDynamicStream::new(dyn_id(), gen, 8, 64, Some(8), true, false, 16, 0);
        stream.add_credit(8);
        assert!(stream.can_issue_next_base());
        let (start, end) = stream.issue_next_base();
        assert_eq!((start, end), (0, 1));
        assert!(!stream.can_issue_next_base(), "pointer-chase caps in-flight at 1");
        stream.on_base_data_received(start, end);
        assert!(stream.can_issue_next_base());
    }

    #[test]
    fn migratable_only_when_indirect_work_drained() {
        let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x1000, stride: 4 });
        let mut stream = LLCDynamicStream::new(dyn_id(), gen, 4, 64, Some(64), false, false, 16, 0);
        let dep = DynStreamId::new(StaticStreamId(1), 0);
        stream.register_dependent(IndirectDependent { id: dep, one_iteration_behind: false });
        stream.add_credit(64);
        stream.issue_next_base();
        assert!(!stream.is_migratable(1), "dependent still has outstanding work");
        stream.on_base_data_received(0, 16);
        // ready set now populated; still not migratable until consumed.
        assert!(!stream.is_migratable(1));
        stream.take_ready_indirect_for(dep, 0);
        // other indices of the merged range are still ready.
        assert!(!stream.is_migratable(1));
    }

    #[test]
    fn one_iteration_behind_shifts_promoted_index() {
        let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x1000, stride: 64 });
        let mut stream = LLCDynamicStream::new(dyn_id(), gen, 8, 64, Some(8), true, false, 16, 0);
        let dep = DynStreamId::new(StaticStreamId(1), 0);
        stream.register_dependent(IndirectDependent { id: dep, one_iteration_behind: true });
        stream.add_credit(8);
        let (start, end) = stream.issue_next_base();
        stream.on_base_data_received(start, end);
        assert_eq!(stream.next_ready_indirect_for(dep), Some(1));
    }

    proptest! {
        /// spec.md §8 invariant 5: whatever sequence of issues/completions/
        /// takes runs, `is_migratable` never answers true while either
        /// dependent set still holds an index.
        #[test]
        fn migratable_implies_dependent_sets_empty(
            ops in prop::collection::vec(0u8..4, 0..40),
        ) {
            let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x1000, stride: 4 });
            let mut stream = LLCDynamicStream::new(dyn_id(), gen, 4, 64, Some(1_000_000), false, false, 16, 0);
            let dep = DynStreamId::new(StaticStreamId(1), 0);
            stream.register_dependent(IndirectDependent { id: dep, one_iteration_behind: false });
            stream.add_credit(1_000_000);

            let mut issued: Vec<(ElementIdx, ElementIdx)> = Vec::new();
            let mut ready_taken = 0usize;
            for op in ops {
                match op {
                    0 if stream.can_issue_next_base() => {
                        issued.push(stream.issue_next_base());
                    }
                    1 => {
                        if let Some((start, end)) = issued.pop() {
                            stream.on_base_data_received(start, end);
                        }
                    }
                    2 => {
                        if let Some(idx) = stream.next_ready_indirect_for(dep) {
                            stream.take_ready_indirect_for(dep, idx);
                            ready_taken += 1;
                        }
                    }
                    _ => {}
                }
                if stream.is_migratable(1) {
                    prop_assert!(stream.dependent_waiting.values().all(|s| s.is_empty()));
                    prop_assert!(stream.dependent_ready.values().all(|s| s.is_empty()));
                }
            }
            let _ = ready_taken;
        }
    }
}
