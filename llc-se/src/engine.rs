//! The LLC SE proper (spec.md §4.5): per-bank wakeup cycle driving
//! flow-control intake, round-robin base/indirect issue, and migration.
//!
//! There is no modeled memory tier below the LLC (spec.md §1 "out of
//! scope"): a locally-issued request is serviced synchronously against
//! the delegator's `read_from_mem`, exactly as `issueStreamRequestHere`
//! does in `original_source`'s `LLCStreamEngine.cc`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use stream_engine_logger::trace;
use stream_engine_metrics::Metrics;
use stream_engine_types::message::{
    StreamConfigureMsg, StreamDataMsg, StreamDoneMsg, StreamFlowMsg, StreamMigrateMsg, StreamRequestMsg,
};
use stream_engine_types::{AddrGen, BankId, Delegator, DynStreamId, ElementIdx, EngineConfig, IndirectAddrGen, Message, SliceId, Tier};

use crate::dyn_stream::{IndirectDependent, LLCDynamicStream};

pub struct LlcSE<D: Delegator> {
    delegator: D,
    bank_id: BankId,
    config: EngineConfig,
    streams: HashMap<DynStreamId, LLCDynamicStream>,
    pending_flow: Vec<StreamFlowMsg>,
    pending_stream_end: HashSet<DynStreamId>,
    /// Address generators for indirect dynS, shared across whichever
    /// banks might need to resolve or service a promoted value (spec.md
    /// §4.5 step 2's indirect-issue path can run on a different bank
    /// than the one currently holding the base stream's bookkeeping).
    indirect_addr_gens: HashMap<DynStreamId, IndirectAddrGen>,
    issue_cursor: usize,
    to_mlc: Vec<Message>,
    to_peers: Vec<Message>,
    /// Responses to the core's own direct line-fetch requests (spec.md
    /// §4.3's `STREAM_REQUEST`), kept on a separate outbox from `to_mlc`
    /// since these never pass through an MLC dynS/slice.
    to_core: Vec<Message>,
    pub metrics: Metrics,
}

impl<D: Delegator> LlcSE<D> {
    pub fn new(delegator: D, bank_id: BankId, config: EngineConfig) -> Self {
        Self {
            delegator,
            bank_id,
            config,
            streams: HashMap::new(),
            pending_flow: Vec::new(),
            pending_stream_end: HashSet::new(),
            indirect_addr_gens: HashMap::new(),
            issue_cursor: 0,
            to_mlc: Vec::new(),
            to_peers: Vec::new(),
            to_core: Vec::new(),
            metrics: Metrics::new(),
        }
    }

    pub fn bank_id(&self) -> BankId {
        self.bank_id
    }

    pub fn drain_to_mlc(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.to_mlc)
    }

    /// Drains `STREAM_MIGRATE` acks and cross-bank `STREAM_INDIRECT_REQUEST`
    /// forwards. The harness routes each by the address/bank it names;
    /// the actual dynS object for a migration moves via
    /// [`Self::take_migrated`]/[`Self::receive_migrated`], not this bus.
    pub fn drain_to_peers(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.to_peers)
    }

    /// Drains line-fetch responses to the core's own `STREAM_REQUEST`s.
    pub fn drain_to_core(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.to_core)
    }

    pub fn configure(
        &mut self,
        dyn_stream_id: DynStreamId,
        addr_gen: Arc<dyn AddrGen>,
        msg: &StreamConfigureMsg,
        indirect_dependents: Vec<IndirectDependent>,
    ) {
        let mut stream = LLCDynamicStream::new(
            dyn_stream_id,
            addr_gen,
            msg.element_size,
            self.delegator.cache_line_size(),
            msg.trip_count,
            msg.is_pointer_chase,
            msg.is_pseudo_offload,
            self.config.max_infly_requests,
            self.bank_id,
        );
        for dependent in indirect_dependents {
            stream.register_dependent(dependent);
        }
        self.streams.insert(dyn_stream_id, stream);
    }

    pub fn configure_indirect(
        &mut self,
        dyn_stream_id: DynStreamId,
        addr_gen: IndirectAddrGen,
        msg: &StreamConfigureMsg,
    ) {
        self.indirect_addr_gens.insert(dyn_stream_id, addr_gen.clone());
        let mut stream = LLCDynamicStream::new(
            dyn_stream_id,
            Arc::new(addr_gen),
            msg.element_size,
            self.delegator.cache_line_size(),
            msg.trip_count,
            msg.is_pointer_chase,
            msg.is_pseudo_offload,
            self.config.max_infly_requests,
            self.bank_id,
        );
        stream.indirect_source = Some(dyn_stream_id);
        self.streams.insert(dyn_stream_id, stream);
    }

    /// Adds an indirect dependent to an already-configured base stream,
    /// for the case where the dependent is configured after its base
    /// (or only on banks the base has since migrated away from).
    pub fn register_indirect_dependent(&mut self, base_id: DynStreamId, dependent: crate::dyn_stream::IndirectDependent) {
        if let Some(base) = self.streams.get_mut(&base_id) {
            base.register_dependent(dependent);
        }
    }

    pub fn receive(&mut self, message: Message) {
        match message {
            Message::Flow(msg) => self.pending_flow.push(msg),
            Message::Commit(commit) => {
                // By the time range-sync commits, the element range has
                // already been serviced (there is no tier below the LLC
                // to lag behind), so the done ack can be returned at once.
                self.to_mlc.push(Message::Done(StreamDoneMsg {
                    dyn_stream_id: commit.dyn_stream_id,
                    start_idx: commit.start_idx,
                    end_idx: commit.end_idx,
                }));
            }
            Message::End(end) => {
                if self.streams.remove(&end.dyn_stream_id).is_none() {
                    self.pending_stream_end.insert(end.dyn_stream_id);
                }
            }
            Message::IndirectRequest(req) => self.service_indirect_request(req),
            Message::Request(req) => self.service_core_request(req),
            other => {
                trace!("llc[{}]: ignoring inbound message {:?}", self.bank_id, other);
            }
        }
    }

    /// One wakeup cycle (spec.md §4.5): flow-control intake, round-robin
    /// issue, then a migration scan. Returns the migration candidates
    /// removed from `streams` so the harness can hand each to its
    /// destination bank via [`Self::receive_migrated`].
    pub fn tick(&mut self) -> Vec<(BankId, LLCDynamicStream)> {
        self.drain_pending_flow();
        self.issue_round_robin();
        self.migrate_candidates()
    }

    fn drain_pending_flow(&mut self) {
        let pending = std::mem::take(&mut self.pending_flow);
        for msg in pending {
            match self.streams.get_mut(&msg.dyn_stream_id) {
                Some(stream) if stream.allocated_idx() == msg.start_idx => {
                    stream.add_credit(msg.end_idx);
                }
                _ => self.pending_flow.push(msg),
            }
        }
    }

    fn issue_round_robin(&mut self) {
        let ids: Vec<DynStreamId> = {
            let mut v: Vec<DynStreamId> = self.streams.keys().copied().collect();
            v.sort();
            v
        };
        if ids.is_empty() {
            return;
        }
        let mut issued = 0;
        let mut attempts = 0;
        while issued < self.config.issue_width && attempts < ids.len() {
            let id = ids[self.issue_cursor % ids.len()];
            self.issue_cursor = self.issue_cursor.wrapping_add(1);
            attempts += 1;
            if self.try_issue_indirect_for(id) || self.try_issue_base(id) {
                issued += 1;
            }
        }
    }

    fn line_of(&self, addr: u64) -> u64 {
        let line_size = self.delegator.cache_line_size();
        addr - (addr % line_size)
    }

    /// Indirect-first issue (spec.md §4.5 step 2, first bullet): the
    /// lowest ready index across `id`'s dependents, serviced locally or
    /// forwarded to whichever bank the resolved address maps to.
    fn try_issue_indirect_for(&mut self, id: DynStreamId) -> bool {
        let dependents = match self.streams.get(&id) {
            Some(s) if !s.indirect_dependents.is_empty() => s.indirect_dependents.clone(),
            _ => return false,
        };
        let mut pick: Option<(DynStreamId, ElementIdx)> = None;
        for dependent in &dependents {
            if let Some(idx) = self.streams.get(&id).and_then(|s| s.next_ready_indirect_for(dependent.id)) {
                pick = match pick {
                    Some((_, best)) if best <= idx => pick,
                    _ => Some((dependent.id, idx)),
                };
            }
        }
        let (dep_id, idx) = match pick {
            Some(p) => p,
            None => return false,
        };

        let element_size = self.streams.get(&dep_id).map(|s| s.element_size).unwrap_or(4);
        let vaddr = match self.indirect_addr_gens.get(&dep_id) {
            Some(gen) => gen.addr(idx),
            None => return false,
        };
        if let Some(s) = self.streams.get_mut(&id) {
            s.take_ready_indirect_for(dep_id, idx);
        }

        match self.delegator.translate(vaddr) {
            None => {
                self.to_mlc.push(Message::Data(StreamDataMsg {
                    slice: SliceId { dyn_stream_id: dep_id, start_idx: idx, end_idx: idx + 1, line_vaddr: self.line_of(vaddr) },
                    line_paddr: 0,
                    data: Vec::new(),
                    faulted: true,
                }));
                self.metrics.faults.fetch_add(1, Ordering::Relaxed);
            }
            Some(paddr) => {
                let bank = self.delegator.map_address_to_llc(paddr, Tier::Llc);
                if bank == self.bank_id {
                    self.service_local_indirect(dep_id, idx, vaddr, paddr, element_size);
                } else {
                    self.to_peers.push(Message::IndirectRequest(StreamRequestMsg {
                        slice: SliceId { dyn_stream_id: dep_id, start_idx: idx, end_idx: idx + 1, line_vaddr: vaddr },
                        line_paddr: paddr,
                    }));
                }
            }
        }
        true
    }

    fn service_local_indirect(&mut self, dep_id: DynStreamId, idx: ElementIdx, vaddr: u64, paddr: u64, element_size: u32) {
        let mut data = vec![0u8; element_size as usize];
        let ok = self.delegator.read_from_mem(vaddr, element_size, &mut data);
        self.to_mlc.push(Message::Data(StreamDataMsg {
            slice: SliceId { dyn_stream_id: dep_id, start_idx: idx, end_idx: idx + 1, line_vaddr: self.line_of(vaddr) },
            line_paddr: paddr,
            data,
            faulted: !ok,
        }));
    }

    fn service_indirect_request(&mut self, req: StreamRequestMsg) {
        let dep_id = req.slice.dyn_stream_id;
        let idx = req.slice.start_idx;
        let element_size = self.streams.get(&dep_id).map(|s| s.element_size).unwrap_or(4);
        // `line_vaddr` carries the resolved element vaddr for forwarded
        // indirect requests, not a line-aligned address (the remote bank
        // only has `read_from_mem(vaddr, ...)` to work with).
        self.service_local_indirect(dep_id, idx, req.slice.line_vaddr, req.line_paddr, element_size);
    }

    /// Services a core LSQ-level line fetch (spec.md §4.3's `STREAM_REQUEST`):
    /// a synchronous read of one cache line, answered straight back to the
    /// core rather than threaded through any MLC-tracked dynS.
    fn service_core_request(&mut self, req: StreamRequestMsg) {
        let line_size = self.delegator.cache_line_size();
        let mut data = vec![0u8; line_size as usize];
        let ok = self.delegator.read_from_mem(req.slice.line_vaddr, line_size as u32, &mut data);
        self.to_core.push(Message::Data(StreamDataMsg {
            slice: req.slice,
            line_paddr: req.line_paddr,
            data,
            faulted: !ok,
        }));
    }

    /// Base issue (spec.md §4.5 step 2, second bullet): merges consecutive
    /// elements sharing a line, reads them synchronously, forwards the
    /// data up to the MLC, and promotes any dependents' ready sets.
    fn try_issue_base(&mut self, id: DynStreamId) -> bool {
        let can_issue = match self.streams.get(&id) {
            Some(s) if s.indirect_source.is_none() => s.can_issue_next_base(),
            _ => false,
        };
        if !can_issue {
            return false;
        }
        let (start, end) = self.streams.get_mut(&id).expect("checked above").issue_next_base();
        let element_size = self.streams.get(&id).map(|s| s.element_size).unwrap_or(4);
        let vaddr = self.streams.get(&id).expect("exists").addr_gen.addr(start);
        let line_vaddr = self.line_of(vaddr);

        let paddr = match self.delegator.translate(vaddr) {
            Some(p) => p,
            None => {
                self.to_mlc.push(Message::Data(StreamDataMsg {
                    slice: SliceId { dyn_stream_id: id, start_idx: start, end_idx: end, line_vaddr },
                    line_paddr: 0,
                    data: Vec::new(),
                    faulted: true,
                }));
                self.metrics.faults.fetch_add(1, Ordering::Relaxed);
                self.streams.get_mut(&id).expect("exists").on_base_data_received(start, end);
                return true;
            }
        };
        debug_assert_eq!(
            self.delegator.map_address_to_llc(paddr, Tier::Llc),
            self.bank_id,
            "base request issued for a line not owned by this bank; migration should have run first"
        );

        let size = (end - start) as u32 * element_size;
        let mut data = vec![0u8; size as usize];
        let ok = self.delegator.read_from_mem(vaddr, size, &mut data);

        let dependents = self.streams.get(&id).map(|s| s.indirect_dependents.clone()).unwrap_or_default();
        if !dependents.is_empty() {
            let stream = self.streams.get_mut(&id).expect("exists");
            stream.record_base_values(start, end, element_size, &data);
            for dependent in &dependents {
                if let Some(gen) = self.indirect_addr_gens.get(&dependent.id) {
                    for idx in start..end {
                        let value = stream.element_value(idx);
                        let promoted = if dependent.one_iteration_behind { idx + 1 } else { idx };
                        gen.set(promoted, value);
                    }
                }
            }
            stream.drop_elements(start, end);
        }

        self.to_mlc.push(Message::Data(StreamDataMsg {
            slice: SliceId { dyn_stream_id: id, start_idx: start, end_idx: end, line_vaddr },
            line_paddr: paddr,
            data,
            faulted: !ok,
        }));
        self.streams.get_mut(&id).expect("exists").on_base_data_received(start, end);
        self.metrics.slices_emitted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Migration scan (spec.md §4.5 step 3/4): indirect-variant streams
    /// never migrate on their own (their work is dispatched by address,
    /// not by sequential iteration); only base streams are candidates.
    fn migrate_candidates(&mut self) -> Vec<(BankId, LLCDynamicStream)> {
        let mut candidates: Vec<DynStreamId> = Vec::new();
        for (&id, stream) in &self.streams {
            if stream.indirect_source.is_some() {
                continue;
            }
            let vaddr = stream.next_base_vaddr();
            let paddr = match self.delegator.translate(vaddr) {
                Some(p) => p,
                None => continue,
            };
            let next_bank = self.delegator.map_address_to_llc(paddr, Tier::Llc);
            if stream.is_migratable(next_bank) {
                candidates.push(id);
            }
        }
        candidates.sort();
        candidates.truncate(self.config.migrate_width);

        let mut out = Vec::with_capacity(candidates.len());
        for id in candidates {
            if let Some(stream) = self.streams.remove(&id) {
                let vaddr = stream.next_base_vaddr();
                let paddr = self.delegator.translate(vaddr).unwrap_or(vaddr);
                let to_bank = self.delegator.map_address_to_llc(paddr, Tier::Llc);
                self.to_peers.push(Message::Migrate(StreamMigrateMsg { dyn_stream_id: id, next_line_paddr: paddr, to_bank }));
                self.metrics.migrations.fetch_add(1, Ordering::Relaxed);
                out.push((to_bank, stream));
            }
        }
        out
    }

    /// `On receive-migrate` (spec.md §4.5): sanity-checks the incoming
    /// stream's next line belongs here, then either drops it (already
    /// ended while migrating) or adopts it.
    pub fn receive_migrated(&mut self, mut stream: LLCDynamicStream) {
        let vaddr = stream.next_base_vaddr();
        if let Some(paddr) = self.delegator.translate(vaddr) {
            debug_assert_eq!(self.delegator.map_address_to_llc(paddr, Tier::Llc), self.bank_id, "migrated stream's next line is not owned by this bank");
        }
        if self.pending_stream_end.remove(&stream.dyn_stream_id) {
            return;
        }
        stream.owner_bank = self.bank_id;
        self.streams.insert(stream.dyn_stream_id, stream);
    }

    pub fn live_stream_count(&self) -> usize {
        self.streams.len()
    }
}
