//! Core SE: the per-CPU tier of the stream engine (spec.md §4.2-§4.3).
//! Owns the bounded element FIFO, the static-stream dependency graph, the
//! sliced-stream iterator, and the adaptive run-ahead throttler.

pub mod dep_graph;
pub mod engine;
pub mod fifo;
pub mod iterator;
pub mod throttle;

pub use dep_graph::StreamTable;
pub use engine::{CoreSE, Instruction, InstructionKind, RegionDescriptor};
pub use fifo::{Element, ElementPool, ElementState, FifoChain};
pub use iterator::{IterSlice, SlicedStreamIterator};
