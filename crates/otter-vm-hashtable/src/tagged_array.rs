//! Fixed-length slot storage backing a hash table

use crate::allocator::HeapKind;

/// A single table slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot<T> {
    /// Never written since the last rehash; terminates lookups
    Empty,
    /// Deleted entry; lookups continue past it, inserts may reuse it
    Hole,
    /// Live record
    Occupied(T),
}

impl<T> Slot<T> {
    /// Check if the slot was never written
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }

    /// Check if the slot is a deletion marker
    #[inline]
    pub fn is_hole(&self) -> bool {
        matches!(self, Slot::Hole)
    }

    /// Check if the slot holds a record
    #[inline]
    pub fn is_occupied(&self) -> bool {
        matches!(self, Slot::Occupied(_))
    }

    /// Record in this slot, if any
    #[inline]
    pub fn as_occupied(&self) -> Option<&T> {
        match self {
            Slot::Occupied(value) => Some(value),
            _ => None,
        }
    }

    /// Mutable record in this slot, if any
    #[inline]
    pub fn as_occupied_mut(&mut self) -> Option<&mut T> {
        match self {
            Slot::Occupied(value) => Some(value),
            _ => None,
        }
    }
}

/// Flat array of slots. The length is fixed for the lifetime of the array;
/// tables resize by allocating a new one.
pub struct TaggedArray<T> {
    slots: Box<[Slot<T>]>,
    kind: HeapKind,
}

impl<T> TaggedArray<T> {
    /// Create an array of `len` empty slots
    pub fn new(len: usize, kind: HeapKind) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || Slot::Empty);
        Self::from_slots(slots.into_boxed_slice(), kind)
    }

    /// Wrap already-initialized slots
    pub fn from_slots(slots: Box<[Slot<T>]>, kind: HeapKind) -> Self {
        Self { slots, kind }
    }

    /// Number of slots
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the array has no slots at all
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Heap this array was allocated in
    #[inline]
    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    /// Slot at `index`. Panics if out of bounds.
    #[inline]
    pub fn get(&self, index: usize) -> &Slot<T> {
        &self.slots[index]
    }

    /// Mutable slot at `index`. Panics if out of bounds.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> &mut Slot<T> {
        &mut self.slots[index]
    }

    /// Store `slot` at `index`, returning the previous slot
    #[inline]
    pub fn set(&mut self, index: usize, slot: Slot<T>) -> Slot<T> {
        std::mem::replace(&mut self.slots[index], slot)
    }

    /// Iterate slots in physical order
    pub fn iter(&self) -> std::slice::Iter<'_, Slot<T>> {
        self.slots.iter()
    }

    /// Reset every slot to empty
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = Slot::Empty);
    }

    /// Consume the array, yielding occupied records in physical order
    pub fn into_occupied(self) -> impl Iterator<Item = T> {
        self.slots.into_iter().filter_map(|slot| match slot {
            Slot::Occupied(value) => Some(value),
            _ => None,
        })
    }
}

impl<T> std::fmt::Debug for TaggedArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaggedArray")
            .field("len", &self.slots.len())
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_array_is_empty() {
        let array: TaggedArray<u32> = TaggedArray::new(8, HeapKind::Local);
        assert_eq!(array.len(), 8);
        assert!(array.iter().all(Slot::is_empty));
    }

    #[test]
    fn test_set_returns_previous_slot() {
        let mut array = TaggedArray::new(4, HeapKind::Shared);
        assert_eq!(array.set(1, Slot::Occupied(7)), Slot::Empty);
        assert_eq!(array.set(1, Slot::Hole), Slot::Occupied(7));
        assert!(array.get(1).is_hole());
        assert_eq!(array.kind(), HeapKind::Shared);
    }

    #[test]
    fn test_into_occupied_keeps_physical_order() {
        let mut array = TaggedArray::new(6, HeapKind::Local);
        array.set(4, Slot::Occupied('b'));
        array.set(0, Slot::Occupied('a'));
        array.set(2, Slot::Hole);
        array.set(5, Slot::Occupied('c'));

        let values: Vec<char> = array.into_occupied().collect();
        assert_eq!(values, vec!['a', 'b', 'c']);
    }

    #[test]
    fn test_clear() {
        let mut array = TaggedArray::new(4, HeapKind::Local);
        array.set(0, Slot::Occupied(1));
        array.set(3, Slot::Hole);
        array.clear();
        assert!(array.iter().all(Slot::is_empty));
        assert_eq!(array.len(), 4);
    }
}
