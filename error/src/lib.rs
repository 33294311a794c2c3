//! Error types shared by every stream-engine tier.
//!
//! Mirrors the teacher's `ckb-error` split of a small top-level `ErrorKind`
//! plus a wrapped cause, but is expressed purely with `thiserror` rather
//! than `failure`, matching the newer idiom the teacher itself was mid-
//! migration to (see its `InternalError`/`InternalErrorKind` pair).

mod internal;

pub use internal::InternalErrorKind;

use thiserror::Error;

/// A list specifying categories of stream-engine error.
///
/// Per §7 of the design, only [`ErrorKind::Protocol`] represents a true
/// `Result::Err` path out of `tick()`. Resource exhaustion and translation
/// faults are modeled as plain `bool`/status-field returns and never
/// constructed as an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// Protocol violation: cyclic dependency graph, duplicate ack, or a
    /// `STREAM_DONE` on a segment that was never `committing`.
    #[error("protocol")]
    Protocol,
    /// Engine misconfiguration discovered at `dispatchConfig`/init time.
    #[error("config")]
    Config,
}

/// The top-level error type returned from engine operations that can fail.
#[derive(Debug, Error)]
#[error("{kind}: {source}")]
pub struct Error {
    kind: ErrorKind,
    #[source]
    source: InternalErrorKind,
}

impl Error {
    /// Builds a protocol-violation error (§7: panics are reserved for the
    /// harness boundary; library code returns this instead).
    pub fn protocol(source: InternalErrorKind) -> Self {
        Self { kind: ErrorKind::Protocol, source }
    }

    /// Builds a configuration error.
    pub fn config(source: InternalErrorKind) -> Self {
        Self { kind: ErrorKind::Config, source }
    }

    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub type Result<T> = std::result::Result<T, Error>;
