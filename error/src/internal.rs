use thiserror::Error;

/// Internal invariant breaches: cycle in a dependency graph, negative
/// in-flight count, duplicate ack, or any other condition §7 of the design
/// classifies as a protocol violation rather than a runtime condition.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalErrorKind {
    /// A stream dependency graph contains a cycle through `baseStreams`.
    #[error("cyclic stream dependency graph")]
    CyclicDependency,

    /// A message referenced a dynamic stream id that does not exist, or
    /// referenced one that has already ended.
    #[error("unknown or stale dynamic stream")]
    UnknownStream,

    /// A protocol invariant was violated (duplicate ack, `STREAM_DONE` on a
    /// non-committing segment, negative in-flight count, ...).
    #[error("protocol invariant violated")]
    Protocol,
}
