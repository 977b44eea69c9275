//! Error in granary
//!
//! Each module defines its own error with [`snafu`]. All of them can be classified
//! with [`Classify`], the operator uses the [`ErrorClass`] to decide whether it should
//! retry, restore the spilled partition or abort the query.

use std::fmt::Display;

/// Sendable error
pub type SendableError = Box<dyn std::error::Error + Send + Sync>;

/// How the owner of the accumulator set should react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Transient failure: allocation failure or store I/O failure. The state is
    /// unchanged, the operation can be retried after memory is released or after a
    /// backoff
    Retryable,
    /// Accumulate targeted a spilled batch. Restore the partition, then retry
    Stale,
    /// Invariants of the accumulator set are broken. The operator must abort, it is
    /// never retried
    Fatal,
    /// Caller passed invalid arguments or configuration. Nothing is changed
    Invalid,
}

impl Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Retryable => "retryable",
            Self::Stale => "stale",
            Self::Fatal => "fatal",
            Self::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Trait for errors that can be classified
pub trait Classify {
    /// Classify the error
    fn class(&self) -> ErrorClass;

    /// Returns true if the error must abort the operator
    #[inline]
    fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Returns true if the operation can be retried
    #[inline]
    fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}
