//! Storage allocation for tables

use crate::error::TableError;
use crate::tagged_array::{Slot, TaggedArray};

/// Heap a table's storage lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HeapKind {
    /// Owned by a single isolate
    #[default]
    Local,
    /// Visible to every thread of the VM
    Shared,
}

/// Provides slot storage for tables.
///
/// Tables always allocate replacement storage before releasing the old one,
/// so a failing allocator leaves the table unchanged.
pub trait TableAllocator {
    /// Allocate `len` empty slots in the given heap
    fn allocate<T>(&self, len: usize, kind: HeapKind) -> Result<TaggedArray<T>, TableError>;
}

/// Default allocator backed by the global heap.
///
/// Reservation is fallible: exhaustion is reported as
/// [`TableError::OutOfMemory`] instead of aborting.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapAllocator;

impl TableAllocator for HeapAllocator {
    fn allocate<T>(&self, len: usize, kind: HeapKind) -> Result<TaggedArray<T>, TableError> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(len)
            .map_err(|_| TableError::OutOfMemory { requested: len })?;
        slots.resize_with(len, || Slot::Empty);
        Ok(TaggedArray::from_slots(slots.into_boxed_slice(), kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_allocator() {
        let array: TaggedArray<u64> = HeapAllocator.allocate(16, HeapKind::Shared).unwrap();
        assert_eq!(array.len(), 16);
        assert_eq!(array.kind(), HeapKind::Shared);
        assert!(array.iter().all(Slot::is_empty));
    }

    #[test]
    fn test_heap_allocator_reports_exhaustion() {
        let result = HeapAllocator.allocate::<u64>(usize::MAX, HeapKind::Local);
        assert_eq!(
            result.unwrap_err(),
            TableError::OutOfMemory {
                requested: usize::MAX
            }
        );
    }
}
