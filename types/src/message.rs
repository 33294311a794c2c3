use crate::ids::{BankId, Cycle, DynStreamId, ElementIdx, PAddr, SliceId, VAddr};
use serde::{Deserialize, Serialize};

/// `STREAM_CONFIGURE` payload: a serialized dynS config. The engine
/// tiers only need the fields relevant to wiring the dynS up at each
/// tier; the full `StreamConfig` lives in `crate::config` and is sent by
/// value since dynS ownership transfers are deep-copies, never aliases
/// (spec.md §5 "Shared mutable state").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfigureMsg {
    pub dyn_stream_id: DynStreamId,
    pub init_vaddr: VAddr,
    pub init_paddr: Option<PAddr>,
    pub element_size: u32,
    pub is_pointer_chase: bool,
    pub is_pseudo_offload: bool,
    pub range_sync: bool,
    pub trip_count: Option<u64>,
    /// Midway-offload starting element (spec.md §6); `0` or `None` means
    /// the stream floats from its first element as usual.
    pub first_float_element_idx: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamEndMsg {
    pub dyn_stream_id: DynStreamId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamFlowMsg {
    pub dyn_stream_id: DynStreamId,
    pub start_idx: ElementIdx,
    pub end_idx: ElementIdx,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamMigrateMsg {
    pub dyn_stream_id: DynStreamId,
    pub next_line_paddr: PAddr,
    pub to_bank: BankId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamRequestMsg {
    pub slice: SliceId,
    pub line_paddr: PAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDataMsg {
    pub slice: SliceId,
    pub line_paddr: PAddr,
    pub data: Vec<u8>,
    /// Set when the slice's translation faulted (spec.md §7): the core
    /// still observes completion in slice order, but must route the
    /// result through the normal memory-fault path rather than treat
    /// `data` as valid.
    pub faulted: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamCommitMsg {
    pub dyn_stream_id: DynStreamId,
    pub start_idx: ElementIdx,
    pub end_idx: ElementIdx,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamDoneMsg {
    pub dyn_stream_id: DynStreamId,
    pub start_idx: ElementIdx,
    pub end_idx: ElementIdx,
}

/// One variant per row of spec.md §6's message table. `STREAM_REQUEST`
/// and `STREAM_INDIRECT_REQUEST` share a payload shape and are
/// distinguished by which bus they travel on (spec.md §4.5), not by tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Configure(StreamConfigureMsg),
    End(StreamEndMsg),
    Flow(StreamFlowMsg),
    Migrate(StreamMigrateMsg),
    Request(StreamRequestMsg),
    IndirectRequest(StreamRequestMsg),
    Data(StreamDataMsg),
    Commit(StreamCommitMsg),
    Done(StreamDoneMsg),
}

/// An envelope carrying a [`Message`] plus the cycle it was enqueued and
/// the cycle it is due for delivery, for FIFO-within-tick ordering on a
/// [`crate::runtime::bus::Bus`].
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message: Message,
    pub enqueued_at: Cycle,
    pub deliver_at: Cycle,
}
