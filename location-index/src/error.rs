use crate::graph::{EdgeId, NodeId};
use thiserror::Error;

/// Errors surfaced by every public operation on [`crate::LocationIndex`].
///
/// All variants are fatal to the index instance; nothing here is retried
/// internally. See the module docs on [`crate::LocationIndex`] for the
/// lifecycle these map onto.
#[derive(Debug, Error)]
pub enum LocationIndexError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid graph bounds: {0}")]
    InvalidGraphBounds(String),

    #[error(
        "key space overflow: depth schedule requires {total_bits} bits, but a spatial key must fit in 64"
    )]
    KeySpaceOverflow { total_bits: u32 },

    #[error("version mismatch: expected magic {expected:#x}, found {found:#x}")]
    VersionMismatch { expected: i32, found: i32 },

    #[error("checksum mismatch: graph checksum {expected:#x} does not match stored {found:#x}")]
    ChecksumMismatch { expected: i32, found: i32 },

    #[error("lifecycle violation: {0}")]
    LifecycleViolation(String),

    #[error("operation attempted on a closed index")]
    IndexClosed,

    #[error("construction failed while processing edge {last_edge:?} ({last_base:?} -> {last_adj:?}): {message}")]
    ConstructionFailure {
        message: String,
        last_edge: Option<EdgeId>,
        last_base: Option<NodeId>,
        last_adj: Option<NodeId>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LocationIndexError>;
