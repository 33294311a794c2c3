//! The MLC SE proper (spec.md §4.4): owns every dynS's [`MLCDynamicStream`],
//! generates slices up to the buffer cap each tick, delivers flow-control
//! credit to the owning LLC bank, and routes data/ack/commit traffic
//! between the core and the LLC.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use stream_engine_logger::trace;
use stream_engine_metrics::Metrics;
use stream_engine_types::message::{
    StreamCommitMsg, StreamConfigureMsg, StreamDataMsg, StreamDoneMsg, StreamEndMsg, StreamFlowMsg,
};
use stream_engine_types::{AddrGen, BankId, Delegator, DynStreamId, ElementIdx, EngineConfig, IndirectAddrGen, Message, Tier};

use crate::dyn_stream::MLCDynamicStream;
use crate::segment::SegmentState;

/// Registration for a dynS whose `SendTo` list names an indirect receiver
/// that has not yet been configured (or has not yet generated far enough)
/// -- parks the sender's credit emission until the receiver catches up
/// (spec.md §4.4 "Credit delivery").
type ElementInitWaiters = HashMap<(DynStreamId, ElementIdx), Vec<DynStreamId>>;

pub struct MlcSE<D: Delegator> {
    delegator: D,
    config: EngineConfig,
    dyn_streams: HashMap<DynStreamId, MLCDynamicStream>,
    /// `IndirectAddrGen` handles for every indirect dynS configured at this
    /// tier, so `notify_indirect` can push a resolved base value straight
    /// into the receiver's address generator rather than over a wire
    /// message spec.md's §6 table has no room for (the call is local, per
    /// §4.4).
    indirect_addr_gens: HashMap<DynStreamId, IndirectAddrGen>,
    element_init_waiters: ElementInitWaiters,
    to_core: Vec<Message>,
    to_llc: Vec<Message>,
    pub metrics: Metrics,
}

impl<D: Delegator> MlcSE<D> {
    pub fn new(delegator: D, config: EngineConfig) -> Self {
        Self {
            delegator,
            config,
            dyn_streams: HashMap::new(),
            indirect_addr_gens: HashMap::new(),
            element_init_waiters: HashMap::new(),
            to_core: Vec::new(),
            to_llc: Vec::new(),
            metrics: Metrics::new(),
        }
    }

    pub fn drain_to_core(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.to_core)
    }

    pub fn drain_to_llc(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.to_llc)
    }

    /// Configures a new dynS shadow at the MLC tier. `send_to` is the set
    /// of indirect dynS ids (same instance) that depend on this stream's
    /// value for address computation.
    pub fn configure(&mut self, dyn_stream_id: DynStreamId, addr_gen: Arc<dyn AddrGen>, msg: &StreamConfigureMsg, send_to: Vec<DynStreamId>) {
        let owner_bank = Self::owning_bank(&self.delegator, &*addr_gen, msg);
        let stream = MLCDynamicStream::new(
            dyn_stream_id,
            addr_gen,
            msg.element_size,
            self.delegator.cache_line_size(),
            msg.trip_count,
            msg.is_pointer_chase,
            msg.range_sync,
            msg.is_pseudo_offload,
            owner_bank,
            self.config.max_num_slices,
            self.config.max_num_slices_per_segment,
            send_to,
        );
        self.dyn_streams.insert(dyn_stream_id, stream);
        self.to_llc.push(Message::Configure(msg.clone()));
    }

    /// Resolves which LLC bank a dynS starts owned by. Ordinarily that is
    /// just whichever bank owns `initPAddr`'s line; a `firstFloatElementIdx`
    /// (midway offload, spec.md §6) overrides this to the bank owning that
    /// element's line instead, falling back to bank 0 on a translation
    /// fault (`MLCDynamicDirectStream`'s `[MidwayFloat]` handling in the
    /// original source, which falls back to the controller's own bank).
    pub fn owning_bank(delegator: &D, addr_gen: &dyn AddrGen, msg: &StreamConfigureMsg) -> BankId {
        let effective_paddr = match msg.first_float_element_idx {
            Some(idx) if idx > 0 => delegator.translate(addr_gen.addr(idx)),
            _ => msg.init_paddr,
        };
        effective_paddr.map(|paddr| delegator.map_address_to_llc(paddr, Tier::Mlc)).unwrap_or(0)
    }

    /// Configures an indirect dynS: its address generator is an
    /// [`IndirectAddrGen`] whose values are populated one element at a time
    /// as the base stream's data arrives (spec.md §4.4 "Indirect
    /// notification"). A clone of the generator is kept so `notify_indirect`
    /// can push values into it directly.
    pub fn configure_indirect(&mut self, dyn_stream_id: DynStreamId, addr_gen: IndirectAddrGen, msg: &StreamConfigureMsg, send_to: Vec<DynStreamId>) {
        self.indirect_addr_gens.insert(dyn_stream_id, addr_gen.clone());
        self.configure(dyn_stream_id, Arc::new(addr_gen), msg, send_to);
    }

    fn resolver(delegator: &D) -> impl Fn(u64) -> (Option<u64>, u32) + '_ {
        move |vaddr| {
            let paddr = delegator.translate(vaddr);
            let bank = paddr.map(|p| delegator.map_address_to_llc(p, Tier::Mlc)).unwrap_or(0);
            (paddr, bank)
        }
    }

    /// `tick()`: generates slices up to each dynS's buffer cap, then
    /// attempts to deliver credit for every newly-eligible segment.
    pub fn tick(&mut self) {
        let ids: Vec<DynStreamId> = self.dyn_streams.keys().copied().collect();
        for id in &ids {
            loop {
                let progressed = {
                    let stream = self.dyn_streams.get_mut(id).expect("iterating known id");
                    let resolver = Self::resolver(&self.delegator);
                    stream.generate_next_slice(resolver)
                };
                if !progressed {
                    break;
                }
                self.metrics.slices_emitted.fetch_add(1, Ordering::Relaxed);
            }
            self.wake_element_init_waiters(*id);
        }
        for id in ids {
            self.try_send_credit(id);
        }
    }

    /// Element-init notification fired once a receiver's `generated_up_to`
    /// passes an index other senders are waiting on.
    fn wake_element_init_waiters(&mut self, receiver: DynStreamId) {
        let generated_up_to = match self.dyn_streams.get(&receiver) {
            Some(s) => s.generated_up_to(),
            None => return,
        };
        let ready_keys: Vec<(DynStreamId, ElementIdx)> = self
            .element_init_waiters
            .keys()
            .filter(|(r, idx)| *r == receiver && *idx < generated_up_to)
            .copied()
            .collect();
        let mut to_retry = Vec::new();
        for key in ready_keys {
            if let Some(senders) = self.element_init_waiters.remove(&key) {
                to_retry.extend(senders);
            }
        }
        for sender in to_retry {
            self.try_send_credit(sender);
        }
    }

    /// `Credit delivery` (spec.md §4.4): for the oldest uncredited segment
    /// of `dyn_stream_id`, send `STREAM_FLOW` to its owning bank only if
    /// every `SendTo` receiver has initialized the element at the
    /// segment's tail index; otherwise register an element-init waiter
    /// and suspend.
    fn try_send_credit(&mut self, dyn_stream_id: DynStreamId) {
        loop {
            let (segment_idx, tail_idx, start_idx, end_idx, bank, send_to) = {
                let stream = match self.dyn_streams.get(&dyn_stream_id) {
                    Some(s) => s,
                    None => return,
                };
                let segment_idx = match stream.first_uncredited_segment() {
                    Some(i) => i,
                    None => return,
                };
                let seg = &stream.segments[segment_idx];
                (segment_idx, seg.end_element_idx.saturating_sub(1), seg.start_element_idx, seg.end_element_idx, seg.bank, stream.send_to.clone())
            };

            let mut blocked_on = None;
            for &receiver in &send_to {
                let initialized = self.dyn_streams.get(&receiver).map(|s| s.has_initialized(tail_idx)).unwrap_or(false);
                if !initialized {
                    blocked_on = Some(receiver);
                    break;
                }
            }
            if let Some(receiver) = blocked_on {
                self.element_init_waiters.entry((receiver, tail_idx)).or_default().push(dyn_stream_id);
                return;
            }

            if let Some(stream) = self.dyn_streams.get_mut(&dyn_stream_id) {
                stream.segments[segment_idx].advance(SegmentState::CreditSent);
            }
            self.to_llc.push(Message::Flow(StreamFlowMsg {
                dyn_stream_id,
                start_idx,
                end_idx,
            }));
            trace!("mlc: credit sent for {:?} [{},{}) -> bank {}", dyn_stream_id, start_idx, end_idx, bank);
        }
    }

    /// Advances a range-sync dynS's commit cursor (the core reports this
    /// out-of-band as it retires instructions referencing the stream) and
    /// emits `STREAM_COMMIT` for every segment that becomes eligible.
    pub fn advance_commit_cursor(&mut self, dyn_stream_id: DynStreamId, idx: ElementIdx) {
        let ready = match self.dyn_streams.get_mut(&dyn_stream_id) {
            Some(stream) => {
                stream.advance_commit_cursor(idx);
                stream.segments_ready_to_commit()
            }
            None => return,
        };
        for segment_idx in ready {
            let stream = self.dyn_streams.get(&dyn_stream_id).expect("just touched");
            let seg = &stream.segments[segment_idx];
            self.to_llc.push(Message::Commit(StreamCommitMsg {
                dyn_stream_id,
                start_idx: seg.start_element_idx,
                end_idx: seg.end_element_idx,
            }));
        }
    }

    /// Processes one inbound message from the LLC. Returns the `Err` from
    /// a `STREAM_DONE` protocol violation (spec.md §7) instead of
    /// swallowing it; the harness propagates this out of its own `tick`
    /// and aborts the run.
    pub fn receive(&mut self, message: Message) -> stream_engine_error::Result<()> {
        match message {
            Message::Data(StreamDataMsg { slice, data, faulted, .. }) => {
                self.receive_stream_data(slice.dyn_stream_id, slice.start_idx, slice.line_vaddr, data, faulted);
            }
            Message::Done(StreamDoneMsg { dyn_stream_id, start_idx, end_idx }) => {
                self.receive_stream_done(dyn_stream_id, start_idx, end_idx)?;
            }
            Message::End(StreamEndMsg { dyn_stream_id }) => {
                self.dyn_streams.remove(&dyn_stream_id);
                self.to_llc.push(Message::End(StreamEndMsg { dyn_stream_id }));
            }
            other => {
                trace!("mlc: ignoring unexpected inbound message {:?}", other);
            }
        }
        Ok(())
    }

    fn receive_stream_data(&mut self, dyn_stream_id: DynStreamId, start_idx: ElementIdx, line_vaddr: u64, data: Vec<u8>, faulted: bool) {
        let (matched_offset, end_idx, element_size, send_to) = {
            let stream = match self.dyn_streams.get_mut(&dyn_stream_id) {
                Some(s) => s,
                None => return,
            };
            // A slice already marked `Faulted` locally (translation failed
            // at allocation) ignores the data payload but still drains in
            // order; `receive_stream_data` handles that case as a no-op.
            let offset = stream.receive_stream_data(start_idx, line_vaddr, data.clone());
            let element_size = stream.element_size;
            let send_to = stream.send_to.clone();
            let end_idx = offset.and_then(|_| stream.slices.iter().find(|s| s.start_idx == start_idx).map(|s| s.end_idx));
            (offset, end_idx, element_size, send_to)
        };

        if let (Some(_), Some(end_idx)) = (matched_offset, end_idx) {
            if !send_to.is_empty() && !faulted {
                self.notify_indirect(dyn_stream_id, start_idx, end_idx, element_size, &data);
            }
        }

        self.drain_and_forward(dyn_stream_id);
    }

    /// `Indirect notification` (spec.md §4.4): extracts per-element base
    /// bytes and pushes them into each `SendTo` receiver's
    /// `receiveBaseStreamData`, exactly once per element even if the slice
    /// spans multiple lines.
    fn notify_indirect(&mut self, dyn_stream_id: DynStreamId, start_idx: ElementIdx, end_idx: ElementIdx, element_size: u32, data: &[u8]) {
        let fresh = match self.dyn_streams.get_mut(&dyn_stream_id) {
            Some(stream) => stream.elements_to_notify(start_idx, end_idx),
            None => return,
        };
        let send_to = self.dyn_streams.get(&dyn_stream_id).map(|s| s.send_to.clone()).unwrap_or_default();
        for idx in fresh {
            let offset = ((idx - start_idx) * element_size as u64) as usize;
            let value = read_value(data, offset, element_size as usize);
            for &receiver in &send_to {
                if let Some(gen) = self.indirect_addr_gens.get(&receiver) {
                    gen.set(idx, value);
                    trace!("mlc: notified {:?} of base element {} = {:#x}", receiver, idx, value);
                }
            }
        }
    }

    fn receive_stream_done(&mut self, dyn_stream_id: DynStreamId, start_idx: ElementIdx, end_idx: ElementIdx) -> stream_engine_error::Result<()> {
        let segment_idx = match self.dyn_streams.get(&dyn_stream_id).and_then(|s| s.find_committing_segment(start_idx, end_idx)) {
            Some(i) => i,
            None => {
                // Protocol violation (spec.md §7): STREAM_DONE on a segment
                // that was never committing.
                self.metrics.protocol_violations.fetch_add(1, Ordering::Relaxed);
                return Err(stream_engine_error::Error::protocol(stream_engine_error::InternalErrorKind::UnknownStream));
            }
        };
        if let Some(stream) = self.dyn_streams.get_mut(&dyn_stream_id) {
            if let Err(err) = stream.on_stream_done(segment_idx) {
                self.metrics.protocol_violations.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
        }
        self.drain_and_forward(dyn_stream_id);
        Ok(())
    }

    fn drain_and_forward(&mut self, dyn_stream_id: DynStreamId) {
        if let Some(stream) = self.dyn_streams.get_mut(&dyn_stream_id) {
            let drained = stream.drain_ready_acks();
            for (_, start_idx, end_idx, line_vaddr, data, faulted) in drained {
                self.to_core.push(Message::Data(StreamDataMsg {
                    slice: stream_engine_types::SliceId { dyn_stream_id, start_idx, end_idx, line_vaddr },
                    line_paddr: 0,
                    data,
                    faulted,
                }));
            }
            stream.release_delivered();
            stream.retire_committed_segments();
        }
    }

    pub fn live_slice_count(&self, dyn_stream_id: DynStreamId) -> Option<usize> {
        self.dyn_streams.get(&dyn_stream_id).map(|s| s.live_slice_count())
    }
}

fn read_value(data: &[u8], offset: usize, len: usize) -> u64 {
    let mut buf = [0u8; 8];
    let end = (offset + len).min(data.len());
    if offset < end {
        let n = (end - offset).min(8);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
    }
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use stream_engine_types::{AffineAddrGen, PAddr, VAddr};

    struct FakeDelegator {
        translations: Mutex<HashMap<VAddr, PAddr>>,
    }

    impl FakeDelegator {
        fn identity() -> Self {
            Self { translations: Mutex::new(HashMap::new()) }
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
            Some(self.translations.lock().unwrap().get(&vaddr).copied().unwrap_or(vaddr))
        }
        fn read_from_mem(&self, _vaddr: VAddr, _len: u32, _out: &mut [u8]) -> bool {
            true
        }
        fn map_address_to_llc(&self, paddr: PAddr, _tier: Tier) -> u32 {
            (paddr / 256) as u32
        }
    }

    fn msg(element_size: u32, trip_count: Option<u64>) -> StreamConfigureMsg {
        StreamConfigureMsg {
            dyn_stream_id: DynStreamId::new(stream_engine_types::StaticStreamId(0), 0),
            init_vaddr: 0x10000,
            init_paddr: Some(0x10000),
            element_size,
            is_pointer_chase: false,
            is_pseudo_offload: false,
            range_sync: false,
            trip_count,
            first_float_element_idx: None,
        }
    }

    #[test]
    fn generates_slices_and_sends_credit() {
        let delegator = FakeDelegator::identity();
        let mut mlc = MlcSE::new(delegator, EngineConfig::default());
        let id = DynStreamId::new(stream_engine_types::StaticStreamId(0), 0);
        let cfg = msg(4, Some(64));
        let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x10000, stride: 4 });
        mlc.configure(id, gen, &cfg, Vec::new());
        mlc.tick();
        let to_llc = mlc.drain_to_llc();
        assert!(to_llc.iter().any(|m| matches!(m, Message::Configure(_))));
        assert!(to_llc.iter().any(|m| matches!(m, Message::Flow(_))));
    }

    /// A midway-offload stream's owning bank is resolved from
    /// `firstFloatElementIdx`'s element, not `initPAddr` (spec.md §6,
    /// grounded on `MLCDynamicDirectStream`'s `[MidwayFloat]` handling).
    #[test]
    fn midway_offload_resolves_owner_from_the_float_element_not_init_paddr() {
        let delegator = FakeDelegator::identity();
        let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x10000, stride: 256 });
        let mut cfg = msg(4, Some(64));
        cfg.first_float_element_idx = Some(3);

        let plain_owner = MlcSE::<FakeDelegator>::owning_bank(&delegator, &*gen, &msg(4, Some(64)));
        let float_owner = MlcSE::<FakeDelegator>::owning_bank(&delegator, &*gen, &cfg);

        assert_eq!(plain_owner, 0x10000 / 256, "without the override, owner comes from init_paddr");
        assert_eq!(float_owner, (0x10000 + 3 * 256) / 256, "with it, owner comes from the float element's own address");
        assert_ne!(plain_owner, float_owner);
    }

    #[test]
    fn midway_offload_falls_back_to_bank_zero_on_translation_fault() {
        struct FaultingDelegator;
        impl Delegator for FaultingDelegator {
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
            fn translate(&self, _vaddr: VAddr) -> Option<PAddr> {
                None
            }
            fn read_from_mem(&self, _vaddr: VAddr, _len: u32, _out: &mut [u8]) -> bool {
                false
            }
            fn map_address_to_llc(&self, paddr: PAddr, _tier: Tier) -> u32 {
                (paddr / 256) as u32
            }
        }

        let delegator = FaultingDelegator;
        let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x10000, stride: 256 });
        let mut cfg = msg(4, Some(64));
        cfg.first_float_element_idx = Some(3);

        assert_eq!(MlcSE::<FaultingDelegator>::owning_bank(&delegator, &*gen, &cfg), 0);
    }
}
