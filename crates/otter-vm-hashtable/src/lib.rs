//! # Otter VM Hash Tables
//!
//! Open-addressing hash tables stored in a flat tagged array, as used for
//! dictionary-mode objects.
//!
//! ## Design
//!
//! - **Flat storage**: slots are `Empty`, `Hole` (deleted) or `Occupied`,
//!   capacity is always a power of two
//! - **Triangular probing**: lookups skip holes and stop at the first empty
//!   slot, inserts reuse the first slot that is not occupied
//! - **Grow, shrink, rehash**: storage is replaced wholesale, and new storage
//!   is allocated before the old one is touched
//! - **Shapes**: hashing and key equality come from a [`TableShape`], the
//!   ordered variant adds per-entry enumeration indices on top

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod allocator;
pub mod error;
pub mod ordered;
pub mod shape;
pub mod table;
pub mod tagged_array;

pub use allocator::{HeapAllocator, HeapKind, TableAllocator};
pub use error::TableError;
pub use ordered::{INITIAL_ENUMERATION_INDEX, OrderedHashTable};
pub use shape::{FxShape, TableShape};
pub use table::{
    Entry, MIN_SHRINK_SIZE, MIN_SIZE, TableConfig, TaggedHashTable, compute_hash_table_size,
    recalculate_table_size,
};
pub use tagged_array::{Slot, TaggedArray};
