//! `LLCSegment` (spec.md §3 "Segment"): a contiguous range of slices whose
//! credit has been, or will be, granted to one LLC bank.

use stream_engine_types::{BankId, ElementIdx, PAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SegmentState {
    Allocated,
    CreditSent,
    Committing,
    Committed,
}

#[derive(Debug, Clone)]
pub struct LLCSegment {
    pub start_slice_idx: usize,
    pub end_slice_idx: usize,
    pub start_paddr: PAddr,
    pub end_paddr: PAddr,
    pub start_element_idx: ElementIdx,
    pub end_element_idx: ElementIdx,
    pub bank: BankId,
    pub state: SegmentState,
}

impl LLCSegment {
    /// Invariant (spec.md §3): a segment's state monotonically advances,
    /// never rolls back.
    pub fn advance(&mut self, next: SegmentState) {
        assert!(next >= self.state, "segment state must not roll back");
        self.state = next;
    }
}
