//! The Core SE (spec.md §4.3): allocation, stepping, LSQ glue, request
//! issue, and throttling.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use stream_engine_logger::trace;
use stream_engine_metrics::Metrics;
use stream_engine_types::{
    Delegator, DynStreamId, ElementIdx, Message, SliceId, StaticStream, StaticStreamId, StreamConfig, VAddr,
};
use stream_engine_types::message::{StreamConfigureMsg, StreamDataMsg, StreamEndMsg, StreamRequestMsg};
use stream_engine_types::EngineConfig;

use crate::dep_graph::StreamTable;
use crate::fifo::{ElementPool, ElementState, FifoChain};
use crate::throttle::ThrottleGroupState;

/// `dispatchConfig`'s input: a set of static streams configured together
/// as one region, sharing a dynamic instance number (spec.md §6 "Core-SE
/// instruction surface").
pub struct RegionDescriptor {
    pub instance: u64,
    pub configs: Vec<StreamConfig>,
}

/// Opaque instruction classification from spec.md §6.
pub enum InstructionKind {
    Config(RegionDescriptor),
    Step { step_root: StaticStreamId },
    Use { elements: Vec<(DynStreamId, ElementIdx)> },
    Store { elements: Vec<(DynStreamId, ElementIdx)> },
    End { dyn_stream_ids: Vec<DynStreamId> },
}

pub struct Instruction {
    pub seq: u64,
    pub kind: InstructionKind,
}

struct LineFetch {
    fetched: bool,
    waiters: Vec<usize>,
}

struct DynStreamState {
    config: StreamConfig,
    chain: FifoChain,
    max_size: usize,
    /// Pre-resolved base dynS for each static base stream, same instance.
    base_dyn_ids: Vec<DynStreamId>,
    line_fetches: HashMap<VAddr, LineFetch>,
    ended: bool,
}

/// Records which elements an LSQ instruction consumes, for
/// `areUsedReady`/`commitUser`/`commitStore`.
struct PendingUse {
    elements: Vec<(DynStreamId, ElementIdx)>,
    is_store: bool,
}

pub struct CoreSE<D: Delegator> {
    delegator: D,
    config: EngineConfig,
    table: StreamTable,
    pool: ElementPool,
    dyn_streams: HashMap<DynStreamId, DynStreamState>,
    /// `(base dynS, base element idx) -> dependents waiting on that value`.
    waiters: HashMap<(DynStreamId, ElementIdx), Vec<(DynStreamId, ElementIdx)>>,
    throttle_groups: HashMap<StaticStreamId, ThrottleGroupState>,
    pending_uses: HashMap<u64, PendingUse>,
    outbox: Vec<Message>,
    pub metrics: Metrics,
}

impl<D: Delegator> CoreSE<D> {
    pub fn new(delegator: D, config: EngineConfig) -> Self {
        let capacity = config.fifo_capacity;
        Self {
            delegator,
            config,
            table: StreamTable::new(),
            pool: ElementPool::new(capacity),
            dyn_streams: HashMap::new(),
            waiters: HashMap::new(),
            throttle_groups: HashMap::new(),
            pending_uses: HashMap::new(),
            outbox: Vec::new(),
            metrics: Metrics::new(),
        }
    }

    pub fn register_static_stream(&mut self, stream: StaticStream) -> Result<(), stream_engine_error::Error> {
        self.table.register(stream)
    }

    /// Drains messages produced since the last drain, for the harness to
    /// enqueue onto the core->MLC bus.
    pub fn drain_outbound(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbox)
    }

    fn total_run_ahead(&self) -> usize {
        self.dyn_streams.values().map(|s| s.chain.alloc_size()).sum()
    }

    /// `canConfig(region)` (spec.md §4.3).
    pub fn can_config(&self, region: &RegionDescriptor) -> bool {
        if self.pool.free_count() < region.configs.len() {
            return false;
        }
        for cfg in &region.configs {
            let id = DynStreamId::new(cfg.static_id, region.instance.wrapping_sub(1));
            if let Some(existing) = self.dyn_streams.get(&id) {
                if existing.chain.alloc_size() >= existing.max_size {
                    return false;
                }
            }
        }
        true
    }

    /// `dispatchConfig(region)` (spec.md §4.3): initializes new streams,
    /// flushes allocated-but-unstepped elements of any superseded
    /// instance, begins a new dynamic instance, and allocates at least
    /// one element per stream, filling the remainder round-robin.
    pub fn dispatch_config(&mut self, now: u64, region: RegionDescriptor) {
        let mut new_ids = Vec::with_capacity(region.configs.len());
        for cfg in region.configs {
            let id = DynStreamId::new(cfg.static_id, region.instance);
            let base_ids: Vec<DynStreamId> = self
                .table
                .get(cfg.static_id)
                .map(|s| s.base_streams.iter().map(|&b| DynStreamId::new(b, region.instance)).collect())
                .unwrap_or_default();

            let max_size = self
                .table
                .get(cfg.static_id)
                .map(|s| s.max_size)
                .unwrap_or(8);

            let state = DynStreamState {
                config: cfg.clone(),
                chain: FifoChain::new(id),
                max_size,
                base_dyn_ids: base_ids,
                line_fetches: HashMap::new(),
                ended: false,
            };
            self.dyn_streams.insert(id, state);
            self.outbox.push(Message::Configure(StreamConfigureMsg {
                dyn_stream_id: id,
                init_vaddr: cfg.init_vaddr,
                init_paddr: cfg.init_paddr,
                element_size: cfg.element_size,
                is_pointer_chase: cfg.is_pointer_chase,
                is_pseudo_offload: cfg.is_pseudo_offload,
                range_sync: cfg.range_sync,
                trip_count: cfg.trip_count,
                first_float_element_idx: cfg.first_float_element_idx,
            }));
            self.metrics.streams_configured.fetch_add(1, Ordering::Relaxed);
            new_ids.push(id);
        }

        // Allocate at least one element per newly-configured stream, then
        // fill the remainder round-robin until no stream has headroom.
        loop {
            let mut allocated_any = false;
            for &id in &new_ids {
                if self.allocate_one(now, id) {
                    allocated_any = true;
                }
            }
            if !allocated_any {
                break;
            }
        }
    }

    fn allocate_one(&mut self, now: u64, id: DynStreamId) -> bool {
        let pending_bases = self
            .dyn_streams
            .get(&id)
            .map(|s| s.base_dyn_ids.len() as u32)
            .unwrap_or(0);
        let max_size = self.dyn_streams.get(&id).map(|s| s.max_size).unwrap_or(0);
        let alloc_size = self.dyn_streams.get(&id).map(|s| s.chain.alloc_size()).unwrap_or(0);
        if alloc_size >= max_size {
            return false;
        }
        let base_ids = self.dyn_streams.get(&id).map(|s| s.base_dyn_ids.clone()).unwrap_or_default();
        let state = match self.dyn_streams.get_mut(&id) {
            Some(s) => s,
            None => return false,
        };
        let element_idx = state.chain.next_alloc_idx();
        let slot = match state.chain.allocate(&mut self.pool, now, pending_bases) {
            Some(slot) => slot,
            None => return false,
        };
        for base_id in base_ids {
            self.waiters.entry((base_id, element_idx)).or_default().push((id, element_idx));
        }
        self.metrics.elements_allocated.fetch_add(1, Ordering::Relaxed);
        let _ = slot;
        true
    }

    /// `canStep(S)` (spec.md §4.3): true iff every step-dependent has
    /// `allocSize - stepSize >= 2`.
    pub fn can_step(&self, step_root: StaticStreamId, instance: u64) -> bool {
        for dep_static in self.table.step_stream_list(step_root) {
            let id = DynStreamId::new(dep_static, instance);
            if let Some(state) = self.dyn_streams.get(&id) {
                if state.chain.alloc_size().saturating_sub(state.chain.step_size()) < 2 {
                    return false;
                }
            }
        }
        true
    }

    /// `dispatchStep(S)`: advances `stepped` for all step-dependents.
    pub fn dispatch_step(&mut self, step_root: StaticStreamId, instance: u64) {
        for dep_static in self.table.step_stream_list(step_root) {
            let id = DynStreamId::new(dep_static, instance);
            if let Some(state) = self.dyn_streams.get_mut(&id) {
                state.chain.step(&self.pool);
            }
        }
    }

    /// `commitStep(S)`: releases the newly-superseded element, invokes
    /// the throttler, and refills dependents up to `max_size`.
    pub fn commit_step(&mut self, now: u64, step_root: StaticStreamId, instance: u64) {
        let run_ahead = self.total_run_ahead();
        let fifo_capacity = self.pool.capacity();
        for dep_static in self.table.step_stream_list(step_root) {
            let id = DynStreamId::new(dep_static, instance);
            let released_slot = match self.dyn_streams.get_mut(&id) {
                Some(state) => state.chain.release_tail(&mut self.pool),
                None => None,
            };
            if let Some(slot) = released_slot {
                let late = {
                    let element = self.pool.get(slot);
                    match (element.value_ready_cycle, element.first_check_cycle) {
                        (Some(ready), Some(checked)) => ready > checked,
                        _ => false,
                    }
                };
                self.metrics.elements_released.fetch_add(1, Ordering::Relaxed);
                if late {
                    let group = self.throttle_groups.entry(step_root).or_default();
                    if group.record_late_fetch(&self.config, run_ahead, fifo_capacity) {
                        group.reset();
                        self.metrics.throttle_events.fetch_add(1, Ordering::Relaxed);
                        for dep in self.table.step_stream_list(step_root) {
                            let dep_id = DynStreamId::new(dep, instance);
                            if let Some(state) = self.dyn_streams.get_mut(&dep_id) {
                                state.max_size += self.config.throttle_increment;
                            }
                        }
                    }
                }
            }
        }
        for dep_static in self.table.step_stream_list(step_root) {
            let id = DynStreamId::new(dep_static, instance);
            while self.allocate_one(now, id) {}
        }
    }

    /// `dispatchUser(inst)`: records the elements an LSQ instruction
    /// consumes.
    pub fn dispatch_user(&mut self, seq: u64, elements: Vec<(DynStreamId, ElementIdx)>, is_store: bool) {
        self.pending_uses.insert(seq, PendingUse { elements, is_store });
    }

    /// `areUsedReady(inst)`: true iff every recorded element is value-ready.
    pub fn are_used_ready(&self, seq: u64) -> bool {
        let pending = match self.pending_uses.get(&seq) {
            Some(p) => p,
            None => return true,
        };
        pending.elements.iter().all(|(dyn_id, idx)| self.element_value_ready(*dyn_id, *idx))
    }

    fn element_value_ready(&self, dyn_id: DynStreamId, idx: ElementIdx) -> bool {
        let state = match self.dyn_streams.get(&dyn_id) {
            Some(s) => s,
            None => return false,
        };
        for slot in state.chain.iter_slots(&self.pool) {
            let element = self.pool.get(slot);
            if element.element_idx == idx {
                return element.is_value_ready();
            }
        }
        false
    }

    /// `commitUser(inst)` / `commitStore(inst)`: releases the LSQ slot;
    /// marks stored elements for stores.
    pub fn commit_user(&mut self, seq: u64) {
        if let Some(pending) = self.pending_uses.remove(&seq) {
            if pending.is_store {
                for (dyn_id, idx) in pending.elements {
                    if let Some(state) = self.dyn_streams.get(&dyn_id) {
                        for slot in state.chain.iter_slots(&self.pool) {
                            if self.pool.get(slot).element_idx == idx {
                                self.pool.get_mut(slot).stored = true;
                            }
                        }
                    }
                }
            }
        }
    }

    /// `dispatchEnd(regionIds)`: step-once retention, releases unstepped
    /// elements, marks unconfigured.
    pub fn dispatch_end(&mut self, dyn_stream_ids: &[DynStreamId]) {
        for &id in dyn_stream_ids {
            if let Some(state) = self.dyn_streams.get_mut(&id) {
                while state.chain.alloc_size() > 0 {
                    state.chain.release_tail(&mut self.pool);
                }
                state.ended = true;
            }
            self.outbox.push(Message::End(StreamEndMsg { dyn_stream_id: id }));
            self.dyn_streams.remove(&id);
            self.metrics.streams_ended.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// `tick()`: `issueReady()`.
    pub fn tick(&mut self, now: u64) {
        self.issue_ready(now);
    }

    /// Issue algorithm (spec.md §4.3): collect every allocated element
    /// whose address is unresolved but all bases are value-ready, sorted
    /// by `allocateCycle` (tie-break by pool slot), then resolve its
    /// address and split across up to `max_cache_blocks` lines.
    fn issue_ready(&mut self, now: u64) {
        let mut candidates: Vec<(u64, usize, DynStreamId)> = Vec::new();
        for (&id, state) in &self.dyn_streams {
            for slot in state.chain.iter_slots(&self.pool) {
                let element = self.pool.get(slot);
                if matches!(element.state, ElementState::Allocated) && element.pending_bases == 0 {
                    candidates.push((element.allocate_cycle, slot, id));
                }
            }
        }
        candidates.sort_by_key(|&(cycle, slot, _)| (cycle, slot));

        for (_, slot, dyn_id) in candidates {
            self.issue_element(now, dyn_id, slot);
        }
    }

    fn issue_element(&mut self, now: u64, dyn_id: DynStreamId, slot: usize) {
        self.metrics.elements_issued.fetch_add(1, Ordering::Relaxed);
        let element_idx = self.pool.get(slot).element_idx;
        let (is_store, addr_gen_result, element_size, is_pointer_chase) = {
            let static_id = dyn_id.static_id;
            let stream = self.table.get(static_id);
            let is_store = stream.map(|s| s.kind.is_store()).unwrap_or(false);
            let addr = stream.map(|s| s.addr_gen.addr(element_idx));
            let state = self.dyn_streams.get(&dyn_id);
            let element_size = state.map(|s| s.config.element_size).unwrap_or(4);
            let is_pointer_chase = state.map(|s| s.config.is_pointer_chase).unwrap_or(false);
            (is_store, addr, element_size, is_pointer_chase)
        };
        let vaddr = match addr_gen_result {
            Some(v) => v,
            None => return,
        };
        self.pool.get_mut(slot).address = Some(vaddr);
        self.pool.get_mut(slot).state = ElementState::AddressReady;
        self.pool.get_mut(slot).first_check_cycle.get_or_insert(now);

        let paddr = match self.delegator.translate(vaddr) {
            Some(p) => p,
            None => {
                self.pool.get_mut(slot).faulted = true;
                self.pool.get_mut(slot).state = ElementState::ValueReady;
                self.pool.get_mut(slot).value_ready_cycle = Some(now);
                self.metrics.faults.fetch_add(1, Ordering::Relaxed);
                self.notify_value_ready(dyn_id, element_idx);
                return;
            }
        };
        self.pool.get_mut(slot).paddr = Some(paddr);

        if is_store {
            self.pool.get_mut(slot).state = ElementState::ValueReady;
            self.pool.get_mut(slot).value_ready_cycle = Some(now);
            self.notify_value_ready(dyn_id, element_idx);
            return;
        }

        let line_size = self.delegator.cache_line_size();
        let mut lines: Vec<VAddr> = Vec::new();
        let mut cursor = vaddr;
        let end = vaddr + element_size as u64;
        while cursor < end && lines.len() < self.config.max_cache_blocks {
            let line = cursor - (cursor % line_size);
            if !lines.contains(&line) {
                lines.push(line);
            }
            cursor = line + line_size;
        }
        if lines.is_empty() {
            lines.push(vaddr - (vaddr % line_size));
        }

        let mut in_flight = 0u32;
        let state = self.dyn_streams.get_mut(&dyn_id).expect("dyn stream exists");
        for line in lines {
            match state.line_fetches.get_mut(&line) {
                Some(fetch) if fetch.fetched => {
                    // already resident: completes immediately, no new request.
                }
                Some(fetch) => {
                    fetch.waiters.push(slot);
                    in_flight += 1;
                }
                None => {
                    state.line_fetches.insert(line, LineFetch { fetched: false, waiters: vec![slot] });
                    in_flight += 1;
                    let slice = SliceId {
                        dyn_stream_id: dyn_id,
                        start_idx: element_idx,
                        end_idx: element_idx + 1,
                        line_vaddr: line,
                    };
                    self.outbox.push(Message::Request(StreamRequestMsg { slice, line_paddr: paddr }));
                }
            }
        }
        self.pool.get_mut(slot).pending_accesses = in_flight;
        if in_flight == 0 {
            self.pool.get_mut(slot).state = ElementState::ValueReady;
            self.pool.get_mut(slot).value_ready_cycle = Some(now);
            self.notify_value_ready(dyn_id, element_idx);
        }
        let _ = is_pointer_chase;
    }

    /// Processes an inbound message from the MLC (spec.md §6): data
    /// responses complete waiting elements; flow/ack messages are not
    /// consumed by the Core SE directly in this design (MLC drains acks
    /// to the core in slice order by calling [`Self::complete_line`]).
    pub fn receive(&mut self, now: u64, message: Message) {
        if let Message::Data(StreamDataMsg { slice, faulted, .. }) = message {
            self.complete_line(now, slice.dyn_stream_id, slice.line_vaddr, faulted);
        }
    }

    /// Marks a line as fetched and resolves every waiting element whose
    /// last outstanding access was this line.
    fn complete_line(&mut self, now: u64, dyn_id: DynStreamId, line: VAddr, faulted: bool) {
        let waiters = match self.dyn_streams.get_mut(&dyn_id) {
            Some(state) => {
                if let Some(fetch) = state.line_fetches.get_mut(&line) {
                    fetch.fetched = true;
                    std::mem::take(&mut fetch.waiters)
                } else {
                    Vec::new()
                }
            }
            None => Vec::new(),
        };
        for slot in waiters {
            let element_idx = self.pool.get(slot).element_idx;
            let remaining = {
                let element = self.pool.get_mut(slot);
                element.pending_accesses = element.pending_accesses.saturating_sub(1);
                element.pending_accesses
            };
            if remaining == 0 {
                self.pool.get_mut(slot).state = ElementState::ValueReady;
                self.pool.get_mut(slot).value_ready_cycle = Some(now);
                if faulted {
                    self.pool.get_mut(slot).faulted = true;
                    self.metrics.faults.fetch_add(1, Ordering::Relaxed);
                }
                self.notify_value_ready(dyn_id, element_idx);
            }
        }
    }

    fn notify_value_ready(&mut self, dyn_id: DynStreamId, element_idx: ElementIdx) {
        if let Some(dependents) = self.waiters.remove(&(dyn_id, element_idx)) {
            for (dep_id, dep_idx) in dependents {
                if let Some(state) = self.dyn_streams.get(&dep_id) {
                    for slot in state.chain.iter_slots(&self.pool) {
                        if self.pool.get(slot).element_idx == dep_idx {
                            self.pool.get_mut(slot).pending_bases = self.pool.get(slot).pending_bases.saturating_sub(1);
                        }
                    }
                }
            }
        }
        trace!("element {:?}@{} value-ready", dyn_id, element_idx);
    }

    pub fn dyn_stream_alloc_size(&self, id: DynStreamId) -> Option<usize> {
        self.dyn_streams.get(&id).map(|s| s.chain.alloc_size())
    }

    pub fn dyn_stream_step_size(&self, id: DynStreamId) -> Option<usize> {
        self.dyn_streams.get(&id).map(|s| s.chain.step_size())
    }

    pub fn dyn_stream_max_size(&self, id: DynStreamId) -> Option<usize> {
        self.dyn_streams.get(&id).map(|s| s.max_size)
    }

    pub fn pool_conserves_capacity(&self) -> bool {
        self.pool.conserves_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use stream_engine_types::{AffineAddrGen, PAddr, StaticStream, StreamKind, Tier, VAddr};

    struct FakeDelegator {
        faulted: Mutex<std::collections::HashSet<VAddr>>,
    }

    impl FakeDelegator {
        fn new() -> Self {
            Self { faulted: Mutex::new(std::collections::HashSet::new()) }
        }
    }

    impl Delegator for FakeDelegator {
        fn cur_cycle(&self) -> u64 {
            0
        }
        fn cycles_to_ticks(&self, cycles: u64) -> u64 {
            cycles
        }
        fn cache_line_size(&self) -> u64 {
            64
        }
        fn cpu_id(&self) -> u32 {
            0
        }
        fn translate(&self, vaddr: VAddr) -> Option<PAddr> {
            if self.faulted.lock().unwrap().contains(&vaddr) {
                None
            } else {
                Some(vaddr)
            }
        }
        fn read_from_mem(&self, vaddr: VAddr, len: u32, out: &mut [u8]) -> bool {
            for (i, slot) in out.iter_mut().take(len as usize).enumerate() {
                *slot = ((vaddr + i as u64) % 256) as u8;
            }
            true
        }
        fn map_address_to_llc(&self, paddr: PAddr, _tier: Tier) -> u32 {
            (paddr / 4096) as u32
        }
    }

    fn load_stream(id: u32, max_size: usize) -> StaticStream {
        StaticStream {
            id: StaticStreamId(id),
            kind: StreamKind::Load,
            addr_gen: std::sync::Arc::new(AffineAddrGen { base: 0x10000, stride: 4 }),
            element_size: 4,
            base_streams: Vec::new(),
            step_root: StaticStreamId(id),
            max_size,
        }
    }

    fn region(static_id: u32, instance: u64) -> RegionDescriptor {
        RegionDescriptor {
            instance,
            configs: vec![StreamConfig::new(StaticStreamId(static_id), 4, 0x10000)],
        }
    }

    /// Drives every outstanding `STREAM_REQUEST` to completion against the
    /// fake backing store, mirroring what the harness's bus does for real.
    fn answer_requests<D: Delegator>(core: &mut CoreSE<D>, now: u64) {
        for msg in core.drain_outbound() {
            if let Message::Request(req) = msg {
                let mut data = vec![0u8; 64];
                core.delegator.read_from_mem(req.slice.line_vaddr, 64, &mut data);
                core.receive(
                    now,
                    Message::Data(StreamDataMsg { slice: req.slice, line_paddr: req.line_paddr, data, faulted: false }),
                );
            }
        }
    }

    #[test]
    fn dispatch_config_allocates_at_least_one_element_per_stream() {
        let mut core = CoreSE::new(FakeDelegator::new(), EngineConfig::default());
        core.register_static_stream(load_stream(0, 4)).unwrap();
        let r = region(0, 0);
        assert!(core.can_config(&r));
        core.dispatch_config(0, r);

        let id = DynStreamId::new(StaticStreamId(0), 0);
        assert_eq!(core.dyn_stream_alloc_size(id), Some(4));
        assert!(core.pool_conserves_capacity());
    }

    #[test]
    fn step_cycle_advances_and_refills_up_to_max_size() {
        let mut core = CoreSE::new(FakeDelegator::new(), EngineConfig::default());
        core.register_static_stream(load_stream(0, 4)).unwrap();
        core.dispatch_config(0, region(0, 0));
        let id = DynStreamId::new(StaticStreamId(0), 0);
        let root = StaticStreamId(0);

        core.tick(0);
        answer_requests(&mut core, 0);

        assert!(core.can_step(root, 0));
        core.dispatch_step(root, 0);
        assert_eq!(core.dyn_stream_step_size(id), Some(1));

        core.commit_step(1, root, 0);
        // One element released, refilled back up to max_size.
        assert_eq!(core.dyn_stream_alloc_size(id), Some(4));
        assert!(core.pool_conserves_capacity());
    }

    #[test]
    fn can_step_is_false_when_headroom_drops_below_two() {
        let mut core = CoreSE::new(FakeDelegator::new(), EngineConfig::default());
        core.register_static_stream(load_stream(0, 2)).unwrap();
        core.dispatch_config(0, region(0, 0));
        let root = StaticStreamId(0);
        // allocSize == maxSize == 2, so allocSize - stepSize == 2 >= 2: one
        // step is allowed...
        assert!(core.can_step(root, 0));
        core.dispatch_step(root, 0);
        // ...but a second step would leave allocSize - stepSize == 0.
        assert!(!core.can_step(root, 0));
    }

    #[test]
    fn dispatch_end_releases_every_live_element() {
        let mut core = CoreSE::new(FakeDelegator::new(), EngineConfig::default());
        core.register_static_stream(load_stream(0, 4)).unwrap();
        core.dispatch_config(0, region(0, 0));
        let id = DynStreamId::new(StaticStreamId(0), 0);

        core.dispatch_end(&[id]);
        assert_eq!(core.dyn_stream_alloc_size(id), None);
        assert!(core.pool_conserves_capacity());
        assert_eq!(core.pool.free_count(), core.pool.capacity());
    }

    /// S6 -- throttling (spec.md §8): ten consecutive late fetches while
    /// run-ahead stays under 90% of FIFO capacity bump every stream in the
    /// step-group's `maxSize` by 2, exactly once, and reset the counter.
    #[test]
    fn ten_consecutive_late_fetches_bump_max_size_once() {
        let mut core = CoreSE::new(FakeDelegator::new(), EngineConfig::default());
        core.register_static_stream(load_stream(0, 20)).unwrap();
        core.dispatch_config(0, region(0, 0));
        let id = DynStreamId::new(StaticStreamId(0), 0);
        let root = StaticStreamId(0);

        // Issue at cycle 0 (sets first_check_cycle = 0 for every element),
        // then answer every outstanding request as if it arrived at cycle
        // 5, so value_ready_cycle (5) > first_check_cycle (0): late.
        core.tick(0);
        answer_requests(&mut core, 5);

        for _ in 0..10 {
            assert!(core.can_step(root, 0));
            core.dispatch_step(root, 0);
            core.commit_step(20, root, 0);
        }

        assert_eq!(core.dyn_stream_max_size(id), Some(22), "max_size bumps by exactly one increment of 2");
    }

    #[test]
    fn translation_fault_makes_the_element_value_ready_without_a_request() {
        let delegator = FakeDelegator::new();
        delegator.faulted.lock().unwrap().insert(0x10000);
        let mut core = CoreSE::new(delegator, EngineConfig::default());
        core.register_static_stream(load_stream(0, 4)).unwrap();
        core.dispatch_config(0, region(0, 0));
        core.tick(0);

        assert!(core.drain_outbound().iter().all(|m| !matches!(m, Message::Request(_))), "a faulted element issues no request");
        assert_eq!(core.metrics.faults.load(Ordering::Relaxed), 1);
    }
}
