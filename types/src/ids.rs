use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulated cycle count. Monotonically increasing for the lifetime of a
/// run; never wraps in practice.
pub type Cycle = u64;

/// A delegator-domain tick count, the unit the host CPU pipeline schedules
/// on (`cyclesToTicks`).
pub type Ticks = u64;

/// A virtual address, as produced by a stream's address generator.
pub type VAddr = u64;

/// A physical address, as produced by `translateVAddrOracle`.
pub type PAddr = u64;

/// An element's position within its dynamic stream's iteration space.
pub type ElementIdx = u64;

/// A last-level-cache bank identity, as returned by `mapAddressToLLC`.
pub type BankId = u32;

/// The cache tier `mapAddressToLLC` is asked to resolve a bank for; the
/// MLC and LLC tiers may hash at different granularities (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Mlc,
    Llc,
}

/// Identity of a static stream declaration (spec.md §3 "Static stream").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StaticStreamId(pub u32);

impl fmt::Display for StaticStreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Identity of a dynamic stream instance: `(staticId, instance)` per
/// spec.md §3 "Dynamic stream instance".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DynStreamId {
    pub static_id: StaticStreamId,
    pub instance: u64,
}

impl DynStreamId {
    pub fn new(static_id: StaticStreamId, instance: u64) -> Self {
        Self { static_id, instance }
    }
}

impl fmt::Display for DynStreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.static_id, self.instance)
    }
}

/// Identity of a single cache-line-aligned slice of one dynamic stream:
/// `(dynStreamId, startIdx, endIdx, lineVaddr)` per spec.md §3 "Slice".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SliceId {
    pub dyn_stream_id: DynStreamId,
    pub start_idx: ElementIdx,
    pub end_idx: ElementIdx,
    pub line_vaddr: VAddr,
}

impl SliceId {
    pub fn len(&self) -> u64 {
        self.end_idx - self.start_idx
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
