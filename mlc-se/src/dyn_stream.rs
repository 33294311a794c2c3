//! `MLCDynamicStream` (spec.md §4.4), the direct-variant shape noted as
//! the "newer, range-sync aware" constructor in §9's open questions.

use std::collections::VecDeque;
use std::sync::Arc;

use stream_engine_core::iterator::SlicedStreamIterator;
use stream_engine_types::{AddrGen, BankId, DynStreamId, ElementIdx, PAddr, VAddr};

use crate::segment::{LLCSegment, SegmentState};
use crate::slice::{MLCStreamSlice, SliceStatus};

pub struct MLCDynamicStream {
    pub dyn_stream_id: DynStreamId,
    pub element_size: u32,
    pub is_pointer_chase: bool,
    pub range_sync: bool,
    pub is_pseudo_offload: bool,
    pub max_num_slices: usize,
    pub max_num_slices_per_segment: usize,
    line_size: u64,
    iterator: SlicedStreamIterator<Arc<dyn AddrGen>>,
    /// All slices ever generated for this dynS, in order. `tail_idx` is
    /// the oldest live one; entries before it have been released.
    pub slices: VecDeque<MLCStreamSlice>,
    tail_offset: usize,
    pub next_deliver_offset: usize,
    pub segments: Vec<LLCSegment>,
    pub owner_bank: BankId,
    /// The core's commit cursor for range-sync streams: the highest
    /// element index the core has committed past.
    pub commit_cursor: ElementIdx,
    /// Indirect streams that depend on this stream's value for address
    /// computation (spec.md §4.4 "Indirect notification").
    pub send_to: Vec<DynStreamId>,
    /// Set once per element even if it spans multiple lines.
    notified_elements: std::collections::HashSet<ElementIdx>,
    /// Highest element index a slice has been generated for, exclusive.
    /// Used by the credit-delivery element-init check (spec.md §4.4): a
    /// `SendTo` receiver has "initialized" element `idx` once its own
    /// `generated_up_to` has passed it.
    generated_up_to: ElementIdx,
}

impl MLCDynamicStream {
    pub fn new(
        dyn_stream_id: DynStreamId,
        addr_gen: Arc<dyn AddrGen>,
        element_size: u32,
        line_size: u64,
        trip_count: Option<u64>,
        is_pointer_chase: bool,
        range_sync: bool,
        is_pseudo_offload: bool,
        owner_bank: BankId,
        max_num_slices: usize,
        max_num_slices_per_segment: usize,
        send_to: Vec<DynStreamId>,
    ) -> Self {
        Self {
            dyn_stream_id,
            element_size,
            is_pointer_chase,
            range_sync,
            is_pseudo_offload,
            max_num_slices,
            max_num_slices_per_segment,
            line_size,
            iterator: SlicedStreamIterator::new(addr_gen, element_size, line_size, trip_count, is_pointer_chase),
            slices: VecDeque::new(),
            tail_offset: 0,
            next_deliver_offset: 0,
            segments: Vec::new(),
            owner_bank,
            commit_cursor: 0,
            send_to,
            notified_elements: std::collections::HashSet::new(),
            generated_up_to: 0,
        }
    }

    pub fn generated_up_to(&self) -> ElementIdx {
        self.generated_up_to
    }

    pub fn has_initialized(&self, element_idx: ElementIdx) -> bool {
        self.generated_up_to > element_idx
    }

    pub fn live_slice_count(&self) -> usize {
        self.slices.len()
    }

    /// Generates and buffers the next slice, grouping it into the
    /// active (last `Allocated`) segment or opening a new one. Returns
    /// `false` once the iterator is exhausted or the live-slice cap
    /// (`maxNumSlices`, shared between issued and in-flight) is reached.
    pub fn generate_next_slice(&mut self, resolve: impl Fn(VAddr) -> (Option<PAddr>, BankId)) -> bool {
        if self.live_slice_count() >= self.max_num_slices {
            return false;
        }
        let iter_slice = match self.iterator.next_slice() {
            Some(s) => s,
            None => return false,
        };
        let slice_vaddr = iter_slice.line_vaddr;
        let (paddr, bank) = resolve(slice_vaddr);
        let faulted = paddr.is_none();

        let needs_new_segment = match self.segments.last() {
            None => true,
            Some(seg) => seg.state != SegmentState::Allocated || (seg.end_slice_idx - seg.start_slice_idx) >= self.max_num_slices_per_segment,
        };
        let slice_offset = self.tail_offset + self.slices.len();
        if needs_new_segment {
            self.segments.push(LLCSegment {
                start_slice_idx: slice_offset,
                end_slice_idx: slice_offset + 1,
                start_paddr: paddr.unwrap_or(0),
                end_paddr: paddr.unwrap_or(0),
                start_element_idx: iter_slice.start_idx,
                end_element_idx: iter_slice.end_idx,
                bank,
                state: SegmentState::Allocated,
            });
        } else if let Some(seg) = self.segments.last_mut() {
            seg.end_slice_idx = slice_offset + 1;
            seg.end_paddr = paddr.unwrap_or(seg.end_paddr);
            seg.end_element_idx = iter_slice.end_idx;
        }

        let mut slice = MLCStreamSlice::new(iter_slice.start_idx, iter_slice.end_idx, slice_vaddr, self.range_sync);
        if faulted {
            slice.status = SliceStatus::Faulted;
        }
        self.slices.push_back(slice);
        self.generated_up_to = self.generated_up_to.max(iter_slice.end_idx);
        true
    }

    /// The first segment still awaiting credit delivery, if any.
    pub fn first_uncredited_segment(&self) -> Option<usize> {
        self.segments.iter().position(|seg| seg.state == SegmentState::Allocated)
    }

    /// Cuts the stream short (external `llcCut`, e.g. a resolved loop
    /// bound): finalizes the active segment so no more slices accrete
    /// onto it.
    pub fn cut(&mut self) {
        if let Some(seg) = self.segments.last_mut() {
            if seg.state == SegmentState::Allocated {
                // Leave state as-is; the cap check in generate_next_slice
                // already treats a "full" segment as closed. Marking the
                // count exhausted here forces the next slice into a new
                // segment by making it look over-cap.
                seg.end_slice_idx = seg.start_slice_idx + self.max_num_slices_per_segment;
            }
        }
    }

    fn slice_at(&self, offset: usize) -> Option<&MLCStreamSlice> {
        offset.checked_sub(self.tail_offset).and_then(|i| self.slices.get(i))
    }

    fn slice_at_mut(&mut self, offset: usize) -> Option<&mut MLCStreamSlice> {
        offset.checked_sub(self.tail_offset).and_then(move |i| self.slices.get_mut(i))
    }

    /// `receiveStreamData`: scans slices in reverse for a match on
    /// `(startIdx, vaddr)` and transitions its core-status.
    pub fn receive_stream_data(&mut self, start_idx: ElementIdx, line_vaddr: VAddr, data: Vec<u8>) -> Option<usize> {
        for i in (0..self.slices.len()).rev() {
            let slice = &self.slices[i];
            if slice.start_idx == start_idx && slice.line_vaddr == line_vaddr {
                let offset = self.tail_offset + i;
                match slice.status {
                    SliceStatus::Done => return None, // late/duplicate: silently dropped
                    SliceStatus::WaitData => {
                        self.slices[i].data = Some(data);
                        self.slices[i].status = SliceStatus::Done;
                    }
                    SliceStatus::WaitAck => {
                        self.slices[i].data = Some(data);
                        self.slices[i].status = SliceStatus::AckReady;
                    }
                    SliceStatus::Faulted => {}
                    SliceStatus::None | SliceStatus::AckReady => {}
                }
                return Some(offset);
            }
        }
        None
    }

    /// Drains every slice from `next_deliver_offset` forward that is
    /// `Done`, in order, so the core never observes completion out of
    /// slice order. Returns `(offset, start_idx, end_idx, line_vaddr,
    /// data, faulted)` tuples.
    pub fn drain_ready_acks(&mut self) -> Vec<(usize, ElementIdx, ElementIdx, VAddr, Vec<u8>, bool)> {
        let mut drained = Vec::new();
        loop {
            let offset = self.next_deliver_offset;
            let slice = match self.slice_at(offset) {
                Some(s) => s,
                None => break,
            };
            match slice.status {
                SliceStatus::Done => {
                    let data = slice.data.clone().unwrap_or_default();
                    drained.push((offset, slice.start_idx, slice.end_idx, slice.line_vaddr, data, false));
                    self.next_deliver_offset += 1;
                }
                SliceStatus::Faulted => {
                    drained.push((offset, slice.start_idx, slice.end_idx, slice.line_vaddr, Vec::new(), true));
                    self.next_deliver_offset += 1;
                }
                _ => break,
            }
        }
        drained
    }

    /// Advances the core's commit cursor; never rolls back.
    pub fn advance_commit_cursor(&mut self, idx: ElementIdx) {
        self.commit_cursor = self.commit_cursor.max(idx);
    }

    /// For range-sync streams: once the commit cursor crosses a
    /// segment's end element, transition it to `Committing`.
    pub fn segments_ready_to_commit(&mut self) -> Vec<usize> {
        let mut ready = Vec::new();
        for (i, seg) in self.segments.iter_mut().enumerate() {
            if seg.state == SegmentState::CreditSent && self.commit_cursor >= seg.end_element_idx {
                seg.advance(SegmentState::Committing);
                ready.push(i);
            }
        }
        ready
    }

    /// Locates the `Committing` segment whose element range matches a
    /// `STREAM_DONE` message. A mismatch (no committing segment with this
    /// exact range) is the protocol-violation case of spec.md §7.
    pub fn find_committing_segment(&self, start_idx: ElementIdx, end_idx: ElementIdx) -> Option<usize> {
        self.segments.iter().position(|seg| {
            seg.state == SegmentState::Committing && seg.start_element_idx == start_idx && seg.end_element_idx == end_idx
        })
    }

    /// On `STREAM_DONE` for a committing segment's range: flips its
    /// buffered `AckReady` slices to `Done` (unblocking the in-order
    /// drain) and marks the segment committed.
    pub fn on_stream_done(&mut self, segment_idx: usize) -> Result<(), stream_engine_error::Error> {
        let seg = match self.segments.get_mut(segment_idx) {
            Some(s) => s,
            None => return Err(stream_engine_error::Error::protocol(stream_engine_error::InternalErrorKind::UnknownStream)),
        };
        if seg.state != SegmentState::Committing {
            return Err(stream_engine_error::Error::protocol(stream_engine_error::InternalErrorKind::Protocol));
        }
        seg.advance(SegmentState::Committed);
        let (start, end) = (seg.start_slice_idx, seg.end_slice_idx);
        for offset in start..end {
            if let Some(slice) = self.slice_at_mut(offset) {
                if slice.status == SliceStatus::AckReady {
                    slice.status = SliceStatus::Done;
                }
            }
        }
        Ok(())
    }

    /// Releases every slice before `next_deliver_offset` that has been
    /// delivered, freeing buffer space for new slices to be generated.
    pub fn release_delivered(&mut self) {
        while self.tail_offset < self.next_deliver_offset {
            self.slices.pop_front();
            self.tail_offset += 1;
        }
    }

    /// Segments with no remaining live slices and `Committed` (or, for
    /// non-range-sync streams, fully delivered) state can be dropped.
    pub fn retire_committed_segments(&mut self) {
        self.segments.retain(|seg| {
            let fully_delivered = self.tail_offset >= seg.end_slice_idx;
            !(seg.state == SegmentState::Committed && fully_delivered)
        });
    }

    /// Marks every element up to (not including) `start_idx` of `slice`
    /// as notified to `send_to` dependents, returning the element
    /// indices to notify exactly once (spec.md §4.4 "exactly once per
    /// element even if it spans multiple lines").
    pub fn elements_to_notify(&mut self, start_idx: ElementIdx, end_idx: ElementIdx) -> Vec<ElementIdx> {
        let mut fresh = Vec::new();
        for idx in start_idx..end_idx {
            if self.notified_elements.insert(idx) {
                fresh.push(idx);
            }
        }
        fresh
    }
}
