//! Wires one Core SE, one MLC SE, and a bank of LLC SEs together over
//! [`Bus`]-backed links (spec.md §5's "messages enqueued with latency k
//! are delivered at now + k"), driving them one simulated cycle at a
//! time.
//!
//! `AddrGen` closures are never serialized onto a [`Message`] (spec.md
//! §6's table carries only plain data); propagating the right
//! `Arc<dyn AddrGen>` (or `IndirectAddrGen`) to every tier that needs it
//! is this harness's job, done directly at [`Harness::configure_stream`]
//! time rather than discovered off the wire.
//!
//! The core is a real participant here, not a bypass: `configure_stream`
//! drives it through `register_static_stream`/`can_config`/`dispatch_config`
//! exactly as spec.md §4.3 describes, and `step` auto-drives
//! `can_step`/`dispatch_step`/`commit_step` once per cycle per registered
//! stream (bounded by the stream's own `trip_count`, since the core's FIFO
//! has no trip-count awareness of its own). The core's own `STREAM_REQUEST`
//! line fetches travel over a dedicated `core_to_llc`/`llc_to_core` bus
//! pair, serviced by the LLC bank owning the line, rather than answered
//! in-line against the backing store.

use std::collections::HashMap;
use std::sync::Arc;

use stream_engine_core::{CoreSE, RegionDescriptor};
use stream_engine_llc::LlcSE;
use stream_engine_mlc::MlcSE;
use stream_engine_types::message::{StreamConfigureMsg, StreamEndMsg};
use stream_engine_types::runtime::Bus;
use stream_engine_types::{
    AddrGen, BankId, DynStreamId, ElementIdx, EngineConfig, IndirectAddrGen, Message, StaticStream, StaticStreamId,
    StreamConfig, StreamKind, Tier,
};

use crate::delegator::TestDelegator;

/// Per-dynS bookkeeping the harness needs to auto-drive `dispatchStep`
/// (spec.md §4.3), since `CoreSE`'s own FIFO has no notion of `tripCount`.
struct StepState {
    static_id: StaticStreamId,
    instance: u64,
    trip_count: Option<u64>,
    stepped: u64,
    ended: bool,
}

pub struct Harness {
    pub core: CoreSE<TestDelegator>,
    pub mlc: MlcSE<TestDelegator>,
    pub llc_banks: Vec<LlcSE<TestDelegator>>,
    pub delegator: TestDelegator,
    /// Every `STREAM_DATA` response handed to the core this run, in the
    /// order the core observed it -- scenario tests read this instead of
    /// poking at tier-internal state (spec.md §8 invariant 8). Carries
    /// only the MLC/LLC-offload delivery path's responses, not the
    /// core's own direct line fetches (see `core_fetches`).
    pub delivered: Vec<(DynStreamId, ElementIdx, ElementIdx, Vec<u8>, bool)>,
    /// Responses to the core's own `STREAM_REQUEST` line fetches (spec.md
    /// §4.3's issue path), kept separate from `delivered` since they never
    /// pass through an MLC-tracked slice.
    pub core_fetches: Vec<(DynStreamId, ElementIdx, ElementIdx, Vec<u8>, bool)>,
    cycle: u64,
    config: EngineConfig,
    owner_of: HashMap<DynStreamId, BankId>,
    step_states: HashMap<DynStreamId, StepState>,
    core_to_mlc: Bus,
    mlc_to_core: Bus,
    mlc_to_llc: Vec<Bus>,
    llc_to_mlc: Bus,
    core_to_llc: Vec<Bus>,
    llc_to_core: Bus,
    latency: u64,
}

impl Harness {
    pub fn new(delegator: TestDelegator, config: EngineConfig, num_banks: u32) -> Self {
        let llc_banks = (0..num_banks).map(|bank| LlcSE::new(delegator.clone(), bank, config)).collect();
        Self {
            core: CoreSE::new(delegator.clone(), config),
            mlc: MlcSE::new(delegator.clone(), config),
            llc_banks,
            delegator,
            delivered: Vec::new(),
            core_fetches: Vec::new(),
            cycle: 0,
            config,
            owner_of: HashMap::new(),
            step_states: HashMap::new(),
            core_to_mlc: Bus::new(),
            mlc_to_core: Bus::new(),
            mlc_to_llc: (0..num_banks).map(|_| Bus::new()).collect(),
            llc_to_mlc: Bus::new(),
            core_to_llc: (0..num_banks).map(|_| Bus::new()).collect(),
            llc_to_core: Bus::new(),
            latency: 1,
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Registers a dynS at every tier that needs it: the core via
    /// `registerStaticStream`/`canConfig`/`dispatchConfig` (spec.md §4.3),
    /// then the MLC/LLC shadow copies via the `STREAM_CONFIGURE` the core
    /// itself emits, directly propagating the shared `addr_gen` rather
    /// than inventing one from the wire payload.
    pub fn configure_stream(&mut self, dyn_stream_id: DynStreamId, addr_gen: Arc<dyn AddrGen>, msg: StreamConfigureMsg, send_to: Vec<DynStreamId>) {
        // Same resolution MlcSE::configure applies, so the harness never
        // hands the real STREAM_CONFIGURE to a different bank than the one
        // MLC's own shadow copy believes it owns (a `firstFloatElementIdx`
        // override must move both together).
        let owner = MlcSE::<TestDelegator>::owning_bank(&self.delegator, &*addr_gen, &msg);
        self.owner_of.insert(dyn_stream_id, owner);

        // The wire `STREAM_CONFIGURE` carries no per-stream FIFO budget, so
        // the harness hands out the same run-ahead window the MLC tier
        // generates one segment-worth of slices at a time with (spec.md
        // §4.2's "allocate at least one element, fill the rest round-robin").
        let max_size = self.config.max_num_slices_per_segment * 2;
        let static_stream = StaticStream {
            id: dyn_stream_id.static_id,
            kind: StreamKind::Load,
            addr_gen: addr_gen.clone(),
            element_size: msg.element_size,
            base_streams: Vec::new(),
            step_root: dyn_stream_id.static_id,
            max_size,
        };
        self.core
            .register_static_stream(static_stream)
            .expect("harness never registers the same static stream id with a conflicting base graph");

        let mut stream_config = StreamConfig::new(dyn_stream_id.static_id, msg.element_size, msg.init_vaddr);
        stream_config.is_pointer_chase = msg.is_pointer_chase;
        stream_config.is_pseudo_offload = msg.is_pseudo_offload;
        stream_config.init_paddr = msg.init_paddr;
        stream_config.range_sync = msg.range_sync;
        stream_config.trip_count = msg.trip_count;
        stream_config.first_float_element_idx = msg.first_float_element_idx;

        let region = RegionDescriptor { instance: dyn_stream_id.instance, configs: vec![stream_config] };
        assert!(self.core.can_config(&region), "harness configured more live streams than the core's element pool can admit");
        self.core.dispatch_config(self.cycle, region);

        let core_msg = self
            .core
            .drain_outbound()
            .into_iter()
            .find_map(|m| match m {
                Message::Configure(c) if c.dyn_stream_id == dyn_stream_id => Some(c),
                _ => None,
            })
            .expect("dispatchConfig always emits STREAM_CONFIGURE for a newly-registered stream");

        self.step_states.insert(
            dyn_stream_id,
            StepState { static_id: dyn_stream_id.static_id, instance: dyn_stream_id.instance, trip_count: msg.trip_count, stepped: 0, ended: false },
        );

        self.mlc.configure(dyn_stream_id, addr_gen.clone(), &core_msg, send_to.clone());
        let dependents: Vec<stream_engine_llc::IndirectDependent> = Vec::new();
        self.llc_banks[owner as usize].configure(dyn_stream_id, addr_gen, &core_msg, dependents);
    }

    /// Registers an indirect dynS: the base's `SendTo` list names it, and
    /// this call wires its `IndirectAddrGen` into the MLC and every LLC
    /// bank that might need to resolve or service a promoted value.
    ///
    /// Not routed through the core (spec.md §9 open question): the core's
    /// own `pendingBases` tracking resolves a base element's readiness
    /// from its *own* allocated elements, while an indirect dynS's
    /// readiness here is driven by the MLC's `notifyIndirect`/the LLC's
    /// dependent-ready sets -- a second, core-side resolution of the same
    /// value would race the MLC/LLC one with no way to reconcile which
    /// fires first.
    pub fn configure_indirect_stream(
        &mut self,
        dyn_stream_id: DynStreamId,
        base_id: DynStreamId,
        gen: IndirectAddrGen,
        msg: StreamConfigureMsg,
        one_iteration_behind: bool,
    ) {
        self.mlc.configure_indirect(dyn_stream_id, gen.clone(), &msg, Vec::new());
        for bank in &mut self.llc_banks {
            bank.configure_indirect(dyn_stream_id, gen.clone(), &msg);
        }
        if let Some(owner) = self.owner_of.get(&base_id).copied() {
            self.llc_banks[owner as usize].register_indirect_dependent(
                base_id,
                stream_engine_llc::IndirectDependent { id: dyn_stream_id, one_iteration_behind },
            );
        }
    }

    pub fn end_stream(&mut self, dyn_stream_id: DynStreamId) {
        self.core.dispatch_end(&[dyn_stream_id]);
        self.step_states.remove(&dyn_stream_id);
    }

    fn route_bank(&self, msg: &Message) -> Option<BankId> {
        let id = match msg {
            Message::Flow(m) => m.dyn_stream_id,
            Message::Commit(m) => m.dyn_stream_id,
            Message::End(StreamEndMsg { dyn_stream_id }) => *dyn_stream_id,
            _ => return None,
        };
        self.owner_of.get(&id).copied()
    }

    /// Drives `canStep`/`dispatchStep`/`commitStep` once per cycle for
    /// every still-live registered stream, stopping (and ending the
    /// stream at the core) once it has stepped exactly `tripCount` times.
    fn drive_step_roots(&mut self) {
        let ids: Vec<DynStreamId> = self.step_states.keys().copied().collect();
        for id in ids {
            let (static_id, instance, trip_count, stepped, ended) = {
                let s = self.step_states.get(&id).expect("just collected");
                (s.static_id, s.instance, s.trip_count, s.stepped, s.ended)
            };
            if ended {
                continue;
            }
            if let Some(total) = trip_count {
                if stepped >= total {
                    self.core.dispatch_end(&[id]);
                    self.step_states.get_mut(&id).expect("just checked").ended = true;
                    continue;
                }
            }
            if self.core.can_step(static_id, instance) {
                self.core.dispatch_step(static_id, instance);
                self.core.commit_step(self.cycle, static_id, instance);
                self.step_states.get_mut(&id).expect("just checked").stepped += 1;
            }
        }
    }

    /// Runs one simulated cycle across all three tiers.
    pub fn step(&mut self) -> stream_engine_error::Result<()> {
        self.cycle += 1;
        self.delegator.advance_cycle(self.cycle);

        self.drive_step_roots();

        self.core.tick(self.cycle);
        for msg in self.core.drain_outbound() {
            match msg {
                Message::Configure(_) => {}
                Message::Request(req) => {
                    let bank = self.delegator.map_address_to_llc(req.line_paddr, Tier::Llc);
                    self.core_to_llc[bank as usize].enqueue(Message::Request(req), self.cycle, self.latency);
                }
                other => self.core_to_mlc_enqueue(other),
            }
        }

        for env in self.core_to_mlc.drain_ready(self.cycle) {
            self.mlc.receive(env.message)?;
        }
        self.mlc.tick();

        for msg in self.mlc.drain_to_core() {
            self.mlc_to_core.enqueue(msg, self.cycle, self.latency);
        }
        for env in self.mlc_to_core.drain_ready(self.cycle) {
            if let Message::Data(ref d) = env.message {
                self.delivered.push((d.slice.dyn_stream_id, d.slice.start_idx, d.slice.end_idx, d.data.clone(), d.faulted));
            }
            self.core.receive(self.cycle, env.message);
        }

        for msg in self.mlc.drain_to_llc() {
            if let Some(bank) = self.route_bank(&msg) {
                self.mlc_to_llc[bank as usize].enqueue(msg, self.cycle, self.latency);
            }
        }
        for bank_idx in 0..self.llc_banks.len() {
            let ready: Vec<_> = self.mlc_to_llc[bank_idx].drain_ready(self.cycle).into_iter().collect();
            for env in ready {
                self.llc_banks[bank_idx].receive(env.message);
            }
        }

        for bank_idx in 0..self.core_to_llc.len() {
            let ready: Vec<_> = self.core_to_llc[bank_idx].drain_ready(self.cycle).into_iter().collect();
            for env in ready {
                self.llc_banks[bank_idx].receive(env.message);
            }
            for msg in self.llc_banks[bank_idx].drain_to_core() {
                self.llc_to_core.enqueue(msg, self.cycle, self.latency);
            }
        }
        for env in self.llc_to_core.drain_ready(self.cycle) {
            if let Message::Data(ref d) = env.message {
                self.core_fetches.push((d.slice.dyn_stream_id, d.slice.start_idx, d.slice.end_idx, d.data.clone(), d.faulted));
            }
            self.core.receive(self.cycle, env.message);
        }

        let mut migrations = Vec::new();
        let mut peer_forwards = Vec::new();
        for bank in &mut self.llc_banks {
            for msg in bank.drain_to_mlc() {
                self.llc_to_mlc.enqueue(msg, self.cycle, self.latency);
            }
            for msg in bank.drain_to_peers() {
                peer_forwards.push(msg);
            }
            migrations.extend(bank.tick());
        }
        for env in self.llc_to_mlc.drain_ready(self.cycle) {
            self.mlc.receive(env.message)?;
        }
        for msg in peer_forwards {
            if let Message::IndirectRequest(req) = &msg {
                let bank = self.delegator.map_address_to_llc(req.line_paddr, Tier::Llc);
                self.mlc_to_llc[bank as usize].enqueue(msg, self.cycle, self.latency);
            }
        }
        for (to_bank, stream) in migrations {
            self.owner_of.insert(stream.dyn_stream_id, to_bank);
            self.llc_banks[to_bank as usize].receive_migrated(stream);
        }

        Ok(())
    }

    fn core_to_mlc_enqueue(&mut self, msg: Message) {
        self.core_to_mlc.enqueue(msg, self.cycle, self.latency);
    }

    /// Runs cycles until `done` returns true or `max_cycles` elapses.
    /// Aborts the run (spec.md §7) if a tier reports a protocol violation.
    pub fn run_until(&mut self, max_cycles: u64, mut done: impl FnMut(&Harness) -> bool) {
        for _ in 0..max_cycles {
            if done(self) {
                return;
            }
            if let Err(err) = self.step() {
                panic!("protocol violation aborted the run: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_engine_types::AffineAddrGen;

    fn msg(id: DynStreamId, init_vaddr: u64, element_size: u32, trip_count: u64) -> StreamConfigureMsg {
        StreamConfigureMsg {
            dyn_stream_id: id,
            init_vaddr,
            init_paddr: Some(init_vaddr),
            element_size,
            is_pointer_chase: false,
            is_pseudo_offload: false,
            range_sync: false,
            trip_count: Some(trip_count),
            first_float_element_idx: None,
        }
    }

    /// The core's own direct-fetch path (spec.md §4.3): `STREAM_REQUEST`s
    /// travel over `core_to_llc`/`llc_to_core`, serviced by the LLC bank
    /// owning the line, and land in `core_fetches` rather than `delivered`.
    #[test]
    fn core_direct_fetches_round_trip_through_the_owning_llc_bank() {
        let delegator = TestDelegator::new(64, |_| 0);
        for i in 0..8u64 {
            delegator.write_u32(0x10000 + i * 4, 100 + i as u32);
        }
        let mut harness = Harness::new(delegator, EngineConfig::default(), 1);
        let id = DynStreamId::new(StaticStreamId(0), 0);
        let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x10000, stride: 4 });
        harness.configure_stream(id, gen, msg(id, 0x10000, 4, 8), Vec::new());

        for _ in 0..10 {
            harness.step().unwrap();
        }

        assert!(!harness.core_fetches.is_empty(), "the core must have issued and completed at least one direct line fetch");
        assert!(harness.core_fetches.iter().all(|(d, ..)| *d == id));
    }

    /// Drives `dispatchUser`/`areUsedReady`/`commitUser` directly against
    /// the harness's own core, including the store path (spec.md §4.3;
    /// there is no separate `commitStore`, `commitUser` handles both).
    #[test]
    fn dispatch_user_tracks_readiness_and_commit_user_releases_the_lsq_slot() {
        let delegator = TestDelegator::new(64, |_| 0);
        for i in 0..8u64 {
            delegator.write_u32(0x10000 + i * 4, 200 + i as u32);
        }
        let mut harness = Harness::new(delegator, EngineConfig::default(), 1);
        let id = DynStreamId::new(StaticStreamId(0), 0);
        let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x10000, stride: 4 });
        harness.configure_stream(id, gen, msg(id, 0x10000, 4, 8), Vec::new());

        harness.core.dispatch_user(1, vec![(id, 0)], false);
        assert!(!harness.core.are_used_ready(1), "element 0 cannot be ready before any cycle has run");

        for _ in 0..10 {
            if harness.core.are_used_ready(1) {
                break;
            }
            harness.step().unwrap();
        }
        assert!(harness.core.are_used_ready(1), "element 0 must become ready once its line fetch completes");
        harness.core.commit_user(1);

        harness.core.dispatch_user(2, vec![(id, 1)], true);
        for _ in 0..10 {
            if harness.core.are_used_ready(2) {
                break;
            }
            harness.step().unwrap();
        }
        harness.core.commit_user(2);
    }
}
