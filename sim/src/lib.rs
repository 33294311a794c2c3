//! Multi-bank simulation harness (spec.md §0 "new"): wires a Core SE, an
//! MLC SE, and a configurable number of LLC SE banks together over the
//! cycle-driven [`stream_engine_types::runtime::Bus`] primitive, for
//! scenario and property testing.

pub mod delegator;
pub mod harness;

pub use delegator::TestDelegator;
pub use harness::Harness;
