//! Integration scenarios (spec.md §8) driving the full Core/MLC/LLC
//! harness over the wire, rather than poking at one tier's internals.

use std::sync::Arc;

use stream_engine_sim::{Harness, TestDelegator};
use stream_engine_types::message::StreamConfigureMsg;
use stream_engine_types::{AddrGen, AffineAddrGen, DynStreamId, EngineConfig, IndirectAddrGen, StaticStreamId};

fn configure_msg(dyn_stream_id: DynStreamId, init_vaddr: u64, element_size: u32, trip_count: u64, range_sync: bool) -> StreamConfigureMsg {
    StreamConfigureMsg {
        dyn_stream_id,
        init_vaddr,
        init_paddr: Some(init_vaddr),
        element_size,
        is_pointer_chase: false,
        is_pseudo_offload: false,
        range_sync,
        trip_count: Some(trip_count),
        first_float_element_idx: None,
    }
}

fn read_u32(data: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[..4]);
    u32::from_le_bytes(bytes)
}

/// S1 -- linear load: 64 `u32` elements at `0x10000`, every line on bank 0.
#[test]
fn s1_linear_load_delivers_every_element_once_in_order() {
    let delegator = TestDelegator::new(64, |_| 0);
    for i in 0..64u64 {
        delegator.write_u32(0x10000 + i * 4, i as u32);
    }
    let mut harness = Harness::new(delegator, EngineConfig::default(), 1);

    let id = DynStreamId::new(StaticStreamId(0), 0);
    let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x10000, stride: 4 });
    harness.configure_stream(id, gen, configure_msg(id, 0x10000, 4, 64, false), Vec::new());

    let delivered_count = |h: &Harness| h.delivered.iter().filter(|(d, ..)| *d == id).map(|(_, s, e, ..)| e - s).sum::<u64>();
    harness.run_until(200, |h| delivered_count(h) >= 64);
    assert_eq!(delivered_count(&harness), 64, "every element must be delivered exactly once");

    let mut last_start = 0u64;
    let mut seen = 0u64;
    for (dyn_id, start, end, data, faulted) in &harness.delivered {
        if *dyn_id != id {
            continue;
        }
        assert!(!*faulted);
        assert!(*start >= last_start, "slices must be observed in non-decreasing order");
        assert_eq!(*start, seen, "no gap and no overlap between consecutive slices");
        for (i, idx) in (*start..*end).enumerate() {
            let offset = i * 4;
            assert_eq!(read_u32(&data[offset..offset + 4]), idx as u32, "round-trip: delivered value must equal the source memory value");
        }
        last_start = *start;
        seen = *end;
    }
    assert_eq!(seen, 64);
    assert_eq!(harness.llc_banks[0].metrics.migrations.load(std::sync::atomic::Ordering::Relaxed), 0, "single-bank stream never migrates");
}

/// S2 -- cross-bank migration: same stream, but lines past `0x10100` map
/// to bank 1.
#[test]
fn s2_cross_bank_migration_delivers_every_element_exactly_once() {
    let delegator = TestDelegator::new(64, |p| if p < 0x10100 { 0 } else { 1 });
    for i in 0..64u64 {
        delegator.write_u32(0x10000 + i * 4, i as u32);
    }
    let mut harness = Harness::new(delegator, EngineConfig::default(), 2);

    let id = DynStreamId::new(StaticStreamId(0), 0);
    let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x10000, stride: 4 });
    harness.configure_stream(id, gen, configure_msg(id, 0x10000, 4, 64, false), Vec::new());

    let delivered_count = |h: &Harness| h.delivered.iter().filter(|(d, ..)| *d == id).map(|(_, s, e, ..)| e - s).sum::<u64>();
    harness.run_until(300, |h| delivered_count(h) >= 64);
    assert_eq!(delivered_count(&harness), 64);

    let total_migrations: u64 = harness
        .llc_banks
        .iter()
        .map(|b| b.metrics.migrations.load(std::sync::atomic::Ordering::Relaxed))
        .sum();
    assert_eq!(total_migrations, 1, "the stream crosses banks exactly once");
}

/// S3 -- pointer chase: an 8-element traversal where every address
/// depends on reading the previous element (modeled here as the
/// `isPointerChase` flag, which the teacher's `original_source` documents
/// as "never merge, never run more than one request ahead").
#[test]
fn s3_pointer_chase_delivers_each_element_as_its_own_slice() {
    let delegator = TestDelegator::new(64, |_| 0);
    for i in 0..8u64 {
        delegator.write_u32(0x20000 + i * 64, i as u32);
    }
    let mut harness = Harness::new(delegator, EngineConfig::default(), 1);

    let id = DynStreamId::new(StaticStreamId(0), 0);
    // Stride 64 puts every element on its own line, so merging would be
    // observable as a collapsed slice count if the pointer-chase flag were
    // ignored.
    let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x20000, stride: 64 });
    let mut msg = configure_msg(id, 0x20000, 4, 8, false);
    msg.is_pointer_chase = true;
    harness.configure_stream(id, gen, msg, Vec::new());

    let delivered_count = |h: &Harness| h.delivered.iter().filter(|(d, ..)| *d == id).map(|(_, s, e, ..)| e - s).sum::<u64>();
    harness.run_until(200, |h| delivered_count(h) >= 8);
    assert_eq!(delivered_count(&harness), 8);

    let slices: Vec<_> = harness.delivered.iter().filter(|(d, ..)| *d == id).collect();
    assert_eq!(slices.len(), 8, "a pointer-chase stream never merges elements into one slice");
    for (_, start, end, ..) in &slices {
        assert_eq!(end - start, 1);
    }
}

/// S4 -- indirect stream: a base IV over `i in [0,16)` whose value is the
/// address of `A[i]`, with `A` split across two banks.
#[test]
fn s4_indirect_stream_resolves_from_the_bank_owning_each_target() {
    let delegator = TestDelegator::new(64, |p| if p < 0x40000 { 0 } else { 1 });
    let mut targets = Vec::new();
    for i in 0..16u64 {
        let target = if i % 2 == 0 { 0x30000 + i * 4 } else { 0x40000 + i * 4 };
        targets.push(target);
        delegator.write_u32(0x20000 + i * 8, target as u32);
        delegator.write_u32(target, 1000 + i as u32);
    }
    let mut harness = Harness::new(delegator, EngineConfig::default(), 2);

    let base_id = DynStreamId::new(StaticStreamId(0), 0);
    let indirect_id = DynStreamId::new(StaticStreamId(1), 0);

    let base_gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x20000, stride: 8 });
    harness.configure_stream(base_id, base_gen, configure_msg(base_id, 0x20000, 8, 16, false), vec![indirect_id]);

    let indirect_gen = IndirectAddrGen::new();
    harness.configure_indirect_stream(indirect_id, base_id, indirect_gen, configure_msg(indirect_id, 0, 4, 16, false), false);

    let delivered_count = |h: &Harness| h.delivered.iter().filter(|(d, ..)| *d == indirect_id).map(|(_, s, e, ..)| e - s).sum::<u64>();
    harness.run_until(300, |h| delivered_count(h) >= 16);
    assert_eq!(delivered_count(&harness), 16);

    let mut seen = vec![false; 16];
    for (dyn_id, start, _end, data, faulted) in &harness.delivered {
        if *dyn_id != indirect_id {
            continue;
        }
        assert!(!*faulted);
        let idx = *start as usize;
        assert!(!seen[idx], "element {idx} delivered twice");
        seen[idx] = true;
        assert_eq!(read_u32(data), 1000 + idx as u32, "delivered value must equal read(A[i])");
    }
    assert!(seen.iter().all(|&s| s), "every indirect element must be delivered");
}

/// S5 -- range-sync commit: an 8-element atomic-compute stream whose
/// slices only drain to the core after the owning instruction commits.
#[test]
fn s5_range_sync_commit_gates_delivery_on_stream_commit() {
    let delegator = TestDelegator::new(64, |_| 0);
    for i in 0..8u64 {
        delegator.write_u32(0x10000 + i * 4, 500 + i as u32);
    }
    let mut harness = Harness::new(delegator, EngineConfig::default(), 1);

    let id = DynStreamId::new(StaticStreamId(0), 0);
    let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x10000, stride: 4 });
    harness.configure_stream(id, gen, configure_msg(id, 0x10000, 4, 8, true), Vec::new());

    // Let data arrive and sit in ack-ready; nothing should reach the core
    // before the commit cursor advances.
    for _ in 0..20 {
        harness.step().unwrap();
    }
    assert!(harness.delivered.iter().all(|(d, ..)| *d != id), "range-synced data must not drain before commit");

    harness.mlc.advance_commit_cursor(id, 8);

    let delivered_count = |h: &Harness| h.delivered.iter().filter(|(d, ..)| *d == id).map(|(_, s, e, ..)| e - s).sum::<u64>();
    harness.run_until(100, |h| delivered_count(h) >= 8);
    assert_eq!(delivered_count(&harness), 8);

    for (dyn_id, start, _end, data, _faulted) in &harness.delivered {
        if *dyn_id != id {
            continue;
        }
        assert_eq!(read_u32(data), 500 + *start as u32);
    }
}

/// S6 -- throttling: a long-running load whose every fetch takes the full
/// core/MLC/LLC round trip, so `valueReadyCycle` lands after
/// `firstCheckCycle` on every element. Ten such late fetches while
/// run-ahead stays under 90% of FIFO capacity must bump the stream's
/// `maxSize` by `throttle_increment`, exactly as the core-local unit test
/// in `core-se::engine` exercises in isolation -- this is the same
/// invariant driven end-to-end over the wire.
#[test]
fn s6_throttling_bumps_max_size_after_ten_late_fetches() {
    let delegator = TestDelegator::new(64, |_| 0);
    for i in 0..128u64 {
        delegator.write_u32(0x10000 + i * 4, i as u32);
    }
    let mut harness = Harness::new(delegator, EngineConfig::default(), 1);

    let id = DynStreamId::new(StaticStreamId(0), 0);
    let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x10000, stride: 4 });
    harness.configure_stream(id, gen, configure_msg(id, 0x10000, 4, 128, false), Vec::new());
    let initial_max_size = harness.core.dyn_stream_max_size(id).unwrap();

    let delivered_count = |h: &Harness| h.delivered.iter().filter(|(d, ..)| *d == id).map(|(_, s, e, ..)| e - s).sum::<u64>();
    harness.run_until(400, |h| delivered_count(h) >= 128);
    assert_eq!(delivered_count(&harness), 128);

    assert!(
        harness.core.metrics.snapshot().throttle_events > 0,
        "a 128-element single-bank load, never draining faster than the round-trip latency, must rack up enough late fetches to throttle at least once"
    );
    assert!(
        harness.core.dyn_stream_max_size(id).unwrap() > initial_max_size,
        "max_size must have grown past its configured starting point"
    );
}

/// Idempotence (spec.md §8 invariant 7): replaying the same configuration
/// against a fresh harness produces the same externally observed sequence.
#[test]
fn replaying_the_same_trace_yields_the_same_delivery_sequence() {
    fn run() -> Vec<(DynStreamId, u64, u64)> {
        let delegator = TestDelegator::new(64, |_| 0);
        for i in 0..32u64 {
            delegator.write_u32(0x10000 + i * 4, i as u32);
        }
        let mut harness = Harness::new(delegator, EngineConfig::default(), 1);
        let id = DynStreamId::new(StaticStreamId(0), 0);
        let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x10000, stride: 4 });
        harness.configure_stream(id, gen, configure_msg(id, 0x10000, 4, 32, false), Vec::new());
        let delivered_count = |h: &Harness| h.delivered.iter().filter(|(d, ..)| *d == id).map(|(_, s, e, ..)| e - s).sum::<u64>();
        harness.run_until(200, |h| delivered_count(h) >= 32);
        harness.delivered.iter().map(|(d, s, e, ..)| (*d, *s, *e)).collect()
    }

    assert_eq!(run(), run());
}
