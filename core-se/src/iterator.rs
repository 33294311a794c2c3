//! The sliced-stream iterator (spec.md §4.1): given an address generator,
//! element size, and trip count, produces a lazy, finite, restartable
//! sequence of slices. Assigns each element to the cache line containing
//! its start address, and merges consecutive elements into one slice when
//! they share a line (non-pointer-chase streams only). An element is
//! never split across two slices -- every element is fetched as one
//! contiguous unit regardless of whether it straddles a line boundary, so
//! a slice's line is an address-space grouping key, not a claim that the
//! transfer it carries is line-sized. Peeking does not advance.

use stream_engine_types::{AddrGen, ElementIdx, VAddr};

/// One `(elementIdx-range, lineVaddr, sliceVaddr)` slice, as described in
/// spec.md §4.1. Byte length is always `(end_idx - start_idx) *
/// element_size`; callers derive it rather than carry a redundant field,
/// since this iterator keeps every element atomic and never needs to
/// report a truncated sub-element size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterSlice {
    pub start_idx: ElementIdx,
    pub end_idx: ElementIdx,
    pub line_vaddr: VAddr,
    pub slice_vaddr: VAddr,
}

fn line_of(addr: VAddr, line_size: u64) -> VAddr {
    addr - (addr % line_size)
}

pub struct SlicedStreamIterator<G: AddrGen> {
    addr_gen: G,
    element_size: u32,
    line_size: u64,
    trip_count: Option<u64>,
    is_pointer_chase: bool,
    next_idx: ElementIdx,
}

impl<G: AddrGen> SlicedStreamIterator<G> {
    pub fn new(addr_gen: G, element_size: u32, line_size: u64, trip_count: Option<u64>, is_pointer_chase: bool) -> Self {
        Self {
            addr_gen,
            element_size,
            line_size,
            trip_count,
            is_pointer_chase,
            next_idx: 0,
        }
    }

    /// Restarts the iterator at element 0 without losing its configuration.
    pub fn restart(&mut self) {
        self.next_idx = 0;
    }

    fn at_end(&self, idx: ElementIdx) -> bool {
        matches!(self.trip_count, Some(total) if idx >= total)
    }

    /// Returns the next slice without advancing the iterator.
    pub fn peek(&self) -> Option<IterSlice> {
        self.slice_from(self.next_idx)
    }

    /// Returns the next slice and advances past it.
    pub fn next_slice(&mut self) -> Option<IterSlice> {
        let slice = self.slice_from(self.next_idx)?;
        self.next_idx = slice.end_idx;
        Some(slice)
    }

    fn slice_from(&self, start_idx: ElementIdx) -> Option<IterSlice> {
        if self.at_end(start_idx) {
            return None;
        }
        let start_addr = self.addr_gen.addr(start_idx);
        let line_vaddr = line_of(start_addr, self.line_size);

        if self.is_pointer_chase {
            // Pointer-chase streams never merge across elements; each
            // slice is exactly one element wide.
            return Some(IterSlice {
                start_idx,
                end_idx: start_idx + 1,
                line_vaddr,
                slice_vaddr: start_addr,
            });
        }

        // Merge consecutive elements that land on the same line.
        let mut end_idx = start_idx + 1;
        loop {
            if self.at_end(end_idx) {
                break;
            }
            let next_addr = self.addr_gen.addr(end_idx);
            if line_of(next_addr, self.line_size) != line_vaddr {
                break;
            }
            end_idx += 1;
        }
        Some(IterSlice {
            start_idx,
            end_idx,
            line_vaddr,
            slice_vaddr: start_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stream_engine_types::AffineAddrGen;

    #[test]
    fn merges_elements_sharing_a_line() {
        // 4-byte elements, 64B lines -> 16 elements per line.
        let gen = AffineAddrGen { base: 0x10000, stride: 4 };
        let mut it = SlicedStreamIterator::new(gen, 4, 64, Some(64), false);
        let slice = it.next_slice().unwrap();
        assert_eq!(slice.start_idx, 0);
        assert_eq!(slice.end_idx, 16);
        assert_eq!(slice.line_vaddr, 0x10000);

        let mut count = 1;
        while it.next_slice().is_some() {
            count += 1;
        }
        assert_eq!(count, 4); // 64 elements / 16 per line
    }

    #[test]
    fn pointer_chase_never_merges() {
        let gen = AffineAddrGen { base: 0x20000, stride: 8 };
        let mut it = SlicedStreamIterator::new(gen, 8, 64, Some(8), true);
        for i in 0..8 {
            let slice = it.next_slice().unwrap();
            assert_eq!(slice.start_idx, i);
            assert_eq!(slice.end_idx, i + 1);
        }
        assert!(it.next_slice().is_none());
    }

    #[test]
    fn restart_replays_the_same_slices() {
        let gen = AffineAddrGen { base: 0x30000, stride: 4 };
        let mut it = SlicedStreamIterator::new(gen, 4, 64, Some(40), false);
        let first_pass: Vec<IterSlice> = std::iter::from_fn(|| it.next_slice()).collect();
        assert!(it.next_slice().is_none());

        it.restart();
        let second_pass: Vec<IterSlice> = std::iter::from_fn(|| it.next_slice()).collect();
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn peek_does_not_advance() {
        let gen = AffineAddrGen { base: 0x0, stride: 4 };
        let mut it = SlicedStreamIterator::new(gen, 4, 64, Some(16), false);
        let peeked = it.peek().unwrap();
        let next = it.next_slice().unwrap();
        assert_eq!(peeked, next);
    }

    #[test]
    fn unknown_trip_count_keeps_producing() {
        let gen = AffineAddrGen { base: 0x0, stride: 64 };
        let mut it = SlicedStreamIterator::new(gen, 64, 64, None, false);
        for _ in 0..100 {
            assert!(it.next_slice().is_some());
        }
    }

    proptest! {
        /// For any affine stride/size/trip_count, the slices produced cover
        /// `0..trip_count` exactly once, in order, with no gaps (spec.md
        /// §8 invariant 2's element-level analogue).
        #[test]
        fn slices_partition_the_element_range(
            stride in 1i64..65,
            element_size in 1u32..33,
            trip_count in 1u64..200,
            is_pointer_chase: bool,
        ) {
            let gen = AffineAddrGen { base: 0x100000, stride };
            let mut it = SlicedStreamIterator::new(gen, element_size, 64, Some(trip_count), is_pointer_chase);

            let mut expect_start = 0u64;
            let mut slice_count = 0u64;
            while let Some(slice) = it.next_slice() {
                prop_assert_eq!(slice.start_idx, expect_start);
                prop_assert!(slice.end_idx > slice.start_idx);
                expect_start = slice.end_idx;
                slice_count += 1;
                prop_assert!(slice_count <= trip_count, "never more slices than elements");
            }
            prop_assert_eq!(expect_start, trip_count, "every element up to trip_count must be covered");
        }

        /// A pointer-chase stream never merges: exactly one slice per
        /// element, regardless of stride or size (spec.md §4.1).
        #[test]
        fn pointer_chase_always_yields_one_slice_per_element(
            stride in 1i64..65,
            element_size in 1u32..33,
            trip_count in 1u64..50,
        ) {
            let gen = AffineAddrGen { base: 0x200000, stride };
            let mut it = SlicedStreamIterator::new(gen, element_size, 64, Some(trip_count), true);
            let mut count = 0u64;
            while let Some(slice) = it.next_slice() {
                prop_assert_eq!(slice.end_idx - slice.start_idx, 1);
                count += 1;
            }
            prop_assert_eq!(count, trip_count);
        }
    }
}
