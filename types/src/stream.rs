use crate::ids::{ElementIdx, StaticStreamId, VAddr};
use std::fmt;

/// The kind of a static stream (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Load,
    Store,
    AtomicCompute,
    LoadCompute,
    /// Induction-variable stream: the step-root that drives dependents.
    Iv,
    PointerChase,
}

impl StreamKind {
    /// IV streams never themselves issue a memory request; they only
    /// produce the value that drives `getStepStreamList` dependents.
    pub fn is_iv(self) -> bool {
        matches!(self, StreamKind::Iv)
    }

    pub fn is_pointer_chase(self) -> bool {
        matches!(self, StreamKind::PointerChase)
    }

    pub fn is_store(self) -> bool {
        matches!(self, StreamKind::Store)
    }
}

/// The opaque `AddrGen(elementIdx) -> vaddr` interface from spec.md §1.
/// Implementations may close over a base value and a per-element value
/// looked up from a base stream (for indirect streams) -- that wiring is
/// the caller's responsibility, this trait only exposes the call itself.
pub trait AddrGen: Send + Sync {
    fn addr(&self, element_idx: ElementIdx) -> VAddr;
}

/// An `AddrGen` for affine streams: `base + idx * stride`.
pub struct AffineAddrGen {
    pub base: VAddr,
    pub stride: i64,
}

impl AddrGen for AffineAddrGen {
    fn addr(&self, element_idx: ElementIdx) -> VAddr {
        (self.base as i64 + self.stride * element_idx as i64) as VAddr
    }
}

impl fmt::Debug for dyn AddrGen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<AddrGen>")
    }
}

impl AddrGen for std::sync::Arc<dyn AddrGen> {
    fn addr(&self, element_idx: ElementIdx) -> VAddr {
        self.as_ref().addr(element_idx)
    }
}

/// The `AddrGen` for an indirect stream: its address is the value a base
/// stream produced for the same element index (spec.md §4.4's
/// `receiveBaseStreamData`). The base value is supplied out-of-band by
/// whichever tier observes the base element complete; reads before the
/// value has arrived return 0, which callers must guard against via the
/// base-readiness rule (spec.md §4.2) rather than relying on this trait.
#[derive(Clone, Default)]
pub struct IndirectAddrGen {
    base_values: std::sync::Arc<std::sync::Mutex<std::collections::HashMap<ElementIdx, VAddr>>>,
}

impl IndirectAddrGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, element_idx: ElementIdx, value: VAddr) {
        self.base_values.lock().expect("base_values poisoned").insert(element_idx, value);
    }

    pub fn get(&self, element_idx: ElementIdx) -> Option<VAddr> {
        self.base_values.lock().expect("base_values poisoned").get(&element_idx).copied()
    }
}

impl AddrGen for IndirectAddrGen {
    fn addr(&self, element_idx: ElementIdx) -> VAddr {
        self.get(element_idx).unwrap_or(0)
    }
}

/// A static stream declaration (spec.md §3 "Static stream (S)").
pub struct StaticStream {
    pub id: StaticStreamId,
    pub kind: StreamKind,
    pub addr_gen: std::sync::Arc<dyn AddrGen>,
    pub element_size: u32,
    /// Other static streams this one reads to compute its address or value.
    pub base_streams: Vec<StaticStreamId>,
    /// The IV stream that advances this one.
    pub step_root: StaticStreamId,
    /// Mutable via throttling (spec.md §4.3); the configured ceiling.
    pub max_size: usize,
}

impl fmt::Debug for StaticStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticStream")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("element_size", &self.element_size)
            .field("base_streams", &self.base_streams)
            .field("step_root", &self.step_root)
            .field("max_size", &self.max_size)
            .finish()
    }
}
