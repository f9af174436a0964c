//! Error kinds surfaced by the codec, the combinadic tables, and the builder.
//!
//! Every failure carries a descriptive kind, and decode failures never leak
//! a partially built `AbV`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AbvError>;

/// A structural location inside a canonical byte stream, used by
/// [`AbvError::NonCanonical`] and [`AbvError::InvalidEncoding`] to point at
/// the offending component instead of only reporting "bad bytes".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub bit_offset: u64,
    pub component: &'static str,
}

impl Location {
    pub fn new(bit_offset: u64, component: &'static str) -> Self {
        Self {
            bit_offset,
            component,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at bit {}", self.component, self.bit_offset)
    }
}

#[derive(Debug, Error)]
pub enum AbvError {
    #[error("refusing to allocate for a claimed count of {requested} at {at}: exceeds what the remaining stream could possibly back")]
    OutOfMemory { requested: u64, at: Location },

    #[error("truncated stream: expected {field} at {at}")]
    Truncated { field: &'static str, at: Location },

    #[error("invalid encoding for {field}: {reason} at {at}")]
    InvalidEncoding {
        field: &'static str,
        reason: &'static str,
        at: Location,
    },

    #[error("non-canonical encoding: {reason} ({at})")]
    NonCanonical {
        reason: &'static str,
        at: Location,
    },

    #[error("arithmetic would overflow u32 offset capacity: {detail}")]
    Overflow { detail: &'static str },

    #[error("builder invariant violated: {detail}")]
    InvariantViolated { detail: &'static str },

    #[error("unsupported format version: {version}")]
    UnsupportedVersion { version: u64 },
}
