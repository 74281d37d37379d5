//! Hash table errors

use thiserror::Error;

/// Errors surfaced to the embedder when table storage cannot be provided.
///
/// A failed operation leaves the table exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// The allocator could not provide the requested slots
    #[error("failed to allocate {requested} table slots")]
    OutOfMemory {
        /// Number of slots requested
        requested: usize,
    },

    /// The requested size does not fit a table capacity
    #[error("hash table cannot be sized for {0} entries")]
    CapacityOverflow(usize),
}
