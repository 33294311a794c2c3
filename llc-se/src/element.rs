//! `LLCStreamElement` (spec.md §3 "LLC stream element / slice"): a
//! per-bank shadow object holding readiness bytes and received data for
//! one element of a base dynS, read back by an indirect dependent once
//! filled. Grounded on `original_source`'s `LLCStreamElement.hh`.

use stream_engine_types::{DynStreamId, ElementIdx, VAddr};

#[derive(Debug, Clone)]
pub struct LLCStreamElement {
    pub dyn_stream_id: DynStreamId,
    pub element_idx: ElementIdx,
    pub vaddr: VAddr,
    pub size: u32,
    ready_bytes: u32,
    data: Vec<u8>,
}

impl LLCStreamElement {
    pub fn new(dyn_stream_id: DynStreamId, element_idx: ElementIdx, vaddr: VAddr, size: u32) -> Self {
        Self { dyn_stream_id, element_idx, vaddr, size, ready_bytes: 0, data: Vec::new() }
    }

    /// An element is ready only when all `size` bytes are filled (spec.md
    /// §3 invariant).
    pub fn is_ready(&self) -> bool {
        self.ready_bytes >= self.size
    }

    /// Fills in bytes received for this element (possibly from more than
    /// one slice/line), tracking how many distinct bytes have arrived.
    pub fn fill(&mut self, offset: usize, bytes: &[u8]) {
        if self.data.len() < offset + bytes.len() {
            self.data.resize(offset + bytes.len(), 0);
        }
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.ready_bytes = (self.ready_bytes + bytes.len() as u32).min(self.size);
    }

    pub fn value_u64(&self) -> u64 {
        let mut buf = [0u8; 8];
        let n = self.data.len().min(8);
        buf[..n].copy_from_slice(&self.data[..n]);
        u64::from_le_bytes(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_engine_types::StaticStreamId;

    #[test]
    fn becomes_ready_once_all_bytes_filled() {
        let id = DynStreamId::new(StaticStreamId(0), 0);
        let mut element = LLCStreamElement::new(id, 0, 0x1000, 8);
        assert!(!element.is_ready());
        element.fill(0, &[1, 2, 3, 4]);
        assert!(!element.is_ready());
        element.fill(4, &[5, 6, 7, 8]);
        assert!(element.is_ready());
        assert_eq!(element.value_u64(), u64::from_le_bytes([1, 2, 3, 4, 5, 6, 7, 8]));
    }
}
