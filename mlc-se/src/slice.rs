//! `MLCStreamSlice` (spec.md §4.4).

use stream_engine_types::{ElementIdx, VAddr};

/// Core-visible status of one MLC-buffered slice (spec.md §3 "Slice"):
/// *none -> wait-data -> done* for plain loads/stores, or
/// *none -> wait-ack -> ack-ready -> done* for range-synced streams, or
/// *faulted* at any point before data arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceStatus {
    None,
    WaitData,
    WaitAck,
    AckReady,
    Done,
    Faulted,
}

#[derive(Debug, Clone)]
pub struct MLCStreamSlice {
    pub start_idx: ElementIdx,
    pub end_idx: ElementIdx,
    pub line_vaddr: VAddr,
    pub status: SliceStatus,
    pub data: Option<Vec<u8>>,
}

impl MLCStreamSlice {
    pub fn new(start_idx: ElementIdx, end_idx: ElementIdx, line_vaddr: VAddr, range_sync: bool) -> Self {
        assert!(end_idx > start_idx, "slice invariant: endIdx > startIdx");
        Self {
            start_idx,
            end_idx,
            line_vaddr,
            status: if range_sync { SliceStatus::WaitAck } else { SliceStatus::WaitData },
            data: None,
        }
    }

    pub fn len(&self) -> u64 {
        self.end_idx - self.start_idx
    }
}
