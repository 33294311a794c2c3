//! MLC SE: the per-mid-level-cache tier of the stream engine (spec.md
//! §4.4). Mediates between the Core SE and the LLC SE: slices streams into
//! cache-line-sized units, buffers them, issues flow-control credits,
//! synchronizes range-based commits, and delivers data/acks back to the
//! core.

pub mod dyn_stream;
pub mod engine;
pub mod segment;
pub mod slice;

pub use dyn_stream::MLCDynamicStream;
pub use engine::MlcSE;
pub use segment::{LLCSegment, SegmentState};
pub use slice::{MLCStreamSlice, SliceStatus};
