use crate::ids::{PAddr, StaticStreamId, VAddr};

/// Static vs. dynamic throttling (spec.md §4.3, supplemented from
/// `original_source/stream_engine.cc`'s `streamEngineThrottling` option).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThrottlingMode {
    /// Adaptive run-ahead throttling as specified in §4.3.
    #[default]
    Dynamic,
    /// Throttling disabled; `maxSize` never grows past its configured value.
    Static,
}

/// Engine-wide resource caps (spec.md §5 "Resource caps"), constant for
/// the lifetime of one `Engine`.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub issue_width: usize,
    pub migrate_width: usize,
    pub max_infly_requests: usize,
    pub max_inqueue_requests: usize,
    pub max_num_slices: usize,
    pub max_num_slices_per_segment: usize,
    pub cache_line_size: u64,
    /// Max sub-line breakdowns a single element may be split into when
    /// issuing (spec.md §4.3); original default is 2.
    pub max_cache_blocks: usize,
    /// Fixed capacity of the core-side element pool (spec.md §3 invariant 6).
    pub fifo_capacity: usize,
    pub throttling: ThrottlingMode,
    /// Consecutive late fetches before a throttle bump fires (§4.3: 10).
    pub late_fetch_threshold: u32,
    /// `maxSize` increment applied on a throttle bump (§4.3: +2).
    pub throttle_increment: usize,
    /// Run-ahead ceiling, as a fraction of FIFO capacity, below which a
    /// throttle bump is allowed to fire (§4.3: 90%).
    pub throttle_run_ahead_ratio: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            issue_width: 2,
            migrate_width: 1,
            max_infly_requests: 16,
            max_inqueue_requests: 16,
            max_num_slices: 32,
            max_num_slices_per_segment: 4,
            cache_line_size: 64,
            max_cache_blocks: 2,
            fifo_capacity: 256,
            throttling: ThrottlingMode::Dynamic,
            late_fetch_threshold: 10,
            throttle_increment: 2,
            throttle_run_ahead_ratio: 0.9,
        }
    }
}

/// Per-dynamic-stream configuration (spec.md §6 "Configuration (per
/// dynS)").
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub static_id: StaticStreamId,
    pub is_pointer_chase: bool,
    /// Runs entirely at Core/MLC and never migrates execution to the LLC
    /// (supplemental feature from `original_source`, §10 of SPEC_FULL.md).
    pub is_pseudo_offload: bool,
    pub init_vaddr: VAddr,
    pub init_paddr: Option<PAddr>,
    /// Midway-offload starting element, resetting `init_paddr` to that
    /// element's translation (falls back to a local bank on fault).
    pub first_float_element_idx: Option<u64>,
    pub mlc_buffer_num_slices: usize,
    pub element_size: u32,
    pub range_sync: bool,
    pub send_to: Vec<StaticStreamId>,
    pub used_by: Vec<StaticStreamId>,
    /// An indirect stream declared "one iteration behind" its base: its
    /// promoted ready-index is shifted by +1 (spec.md §4.6).
    pub one_iteration_behind: bool,
    pub trip_count: Option<u64>,
}

impl StreamConfig {
    pub fn new(static_id: StaticStreamId, element_size: u32, init_vaddr: VAddr) -> Self {
        Self {
            static_id,
            is_pointer_chase: false,
            is_pseudo_offload: false,
            init_vaddr,
            init_paddr: None,
            first_float_element_idx: None,
            mlc_buffer_num_slices: 8,
            element_size,
            range_sync: false,
            send_to: Vec::new(),
            used_by: Vec::new(),
            one_iteration_behind: false,
            trip_count: None,
        }
    }
}
