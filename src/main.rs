//! Demo runner for the stream engine simulator (analogous to the
//! teacher's `ckb-bin`): configures a stream under the chosen scenario,
//! drives the harness to completion, and prints the resulting metrics.

use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use stream_engine_sim::{Harness, TestDelegator};
use stream_engine_types::message::StreamConfigureMsg;
use stream_engine_types::{AddrGen, AffineAddrGen, DynStreamId, EngineConfig, StaticStreamId};

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum Scenario {
    /// A single stream entirely owned by one bank.
    LinearLoad,
    /// A stream whose address range spans two banks, forcing a migration.
    CrossBankMigration,
}

#[derive(Parser, Debug)]
#[command(name = "stream-engine", about = "Runs a stream-engine scenario and reports delivery metrics")]
struct Args {
    #[arg(value_enum, default_value_t = Scenario::LinearLoad)]
    scenario: Scenario,

    /// Number of elements in the stream.
    #[arg(long, default_value_t = 64)]
    elements: u64,

    /// Upper bound on simulated cycles before giving up.
    #[arg(long, default_value_t = 500)]
    max_cycles: u64,
}

fn main() -> ExitCode {
    stream_engine_logger::init();
    let args = Args::parse();

    let (num_banks, bank_of): (u32, fn(u64) -> u32) = match args.scenario {
        Scenario::LinearLoad => (1, |_| 0),
        Scenario::CrossBankMigration => (2, |p| if p < 0x10100 { 0 } else { 1 }),
    };

    let delegator = TestDelegator::new(64, bank_of);
    for i in 0..args.elements {
        delegator.write_u32(0x10000 + i * 4, i as u32);
    }

    let mut harness = Harness::new(delegator, EngineConfig::default(), num_banks);
    let id = DynStreamId::new(StaticStreamId(0), 0);
    let gen: Arc<dyn AddrGen> = Arc::new(AffineAddrGen { base: 0x10000, stride: 4 });
    let msg = StreamConfigureMsg {
        dyn_stream_id: id,
        init_vaddr: 0x10000,
        init_paddr: Some(0x10000),
        element_size: 4,
        is_pointer_chase: false,
        is_pseudo_offload: false,
        range_sync: false,
        trip_count: Some(args.elements),
        first_float_element_idx: None,
    };
    harness.configure_stream(id, gen, msg, Vec::new());

    let delivered = |h: &Harness| h.delivered.iter().filter(|(d, ..)| *d == id).map(|(_, s, e, ..)| e - s).sum::<u64>();
    harness.run_until(args.max_cycles, |h| delivered(h) >= args.elements);

    let total_delivered = delivered(&harness);
    let migrations: u64 = harness.llc_banks.iter().map(|b| b.metrics.migrations.load(Ordering::Relaxed)).sum();

    println!("scenario: {:?}", args.scenario);
    println!("cycles: {}", harness.cycle());
    println!("elements delivered: {total_delivered}/{}", args.elements);
    println!("migrations: {migrations}");

    if total_delivered == args.elements {
        ExitCode::SUCCESS
    } else {
        eprintln!("scenario did not complete within {} cycles", args.max_cycles);
        ExitCode::FAILURE
    }
}
