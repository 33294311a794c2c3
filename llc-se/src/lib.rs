//! LLC SE (spec.md §4.5): per-bank dynamic stream iteration, indirect
//! element dispatch, and migration between banks.

pub mod dyn_stream;
pub mod element;
pub mod engine;

pub use dyn_stream::{IndirectDependent, LLCDynamicStream};
pub use element::LLCStreamElement;
pub use engine::LlcSE;
