//! Shared data model for the stream engine: ids, the delegator
//! capability trait, per-dynS/engine configuration, wire messages, and
//! the cooperative-scheduling runtime primitives (§5, §9 of the design).

pub mod config;
pub mod delegator;
pub mod ids;
pub mod message;
pub mod runtime;
pub mod stream;

pub use config::{EngineConfig, StreamConfig, ThrottlingMode};
pub use delegator::Delegator;
pub use ids::{BankId, Cycle, DynStreamId, ElementIdx, PAddr, SliceId, StaticStreamId, Tier, Ticks, VAddr};
pub use message::Message;
pub use stream::{AddrGen, AffineAddrGen, IndirectAddrGen, StaticStream, StreamKind};
