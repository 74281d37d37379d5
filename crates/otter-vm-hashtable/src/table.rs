//! Open-addressing hash table
//!
//! Records live directly in a [`TaggedArray`] whose capacity is a power of
//! two. Collisions are resolved by triangular probing: the first position is
//! `hash & (capacity - 1)` and attempt `k` advances the previous position by
//! `k * (k + 1) / 2`, which visits every slot of a power-of-two table.
//!
//! Lookups and inserts walk the slots differently. A lookup continues past
//! holes and stops at the first empty slot; an insert stops at the first slot that is
//! not occupied, so holes left by deletions are reused.

use crate::allocator::{HeapAllocator, HeapKind, TableAllocator};
use crate::error::TableError;
use crate::shape::TableShape;
use crate::tagged_array::{Slot, TaggedArray};
use std::marker::PhantomData;

/// Smallest table capacity
pub const MIN_SIZE: usize = 4;

/// Shrinking never produces a table smaller than this
pub const MIN_SHRINK_SIZE: usize = 16;

/// Capacity for `at_least` entries: 50% headroom rounded up to a power of
/// two, never below [`MIN_SIZE`]
pub fn compute_hash_table_size(at_least: usize) -> Result<usize, TableError> {
    at_least
        .checked_add(at_least / 2)
        .and_then(usize::checked_next_power_of_two)
        .map(|size| size.max(MIN_SIZE))
        .ok_or(TableError::CapacityOverflow(at_least))
}

/// Capacity a table of `current` slots should have after removals, given it
/// must still hold `at_least` entries. Only tables at most a quarter full
/// are resized.
pub fn recalculate_table_size(current: usize, at_least: usize) -> Result<usize, TableError> {
    if at_least > current / 4 {
        return Ok(current);
    }
    Ok(compute_hash_table_size(at_least)?.max(MIN_SHRINK_SIZE))
}

#[inline]
fn first_position(hash: u32, size: usize) -> usize {
    hash as usize & (size - 1)
}

#[inline]
fn next_position(last: usize, count: usize, size: usize) -> usize {
    (last + count * (count + 1) / 2) & (size - 1)
}

/// Table construction settings
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Entries the table is sized for up front
    pub initial_entries: usize,
    /// Heap the storage is allocated in
    pub heap_kind: HeapKind,
    /// Largest enumeration index an ordered table hands out before it
    /// renumbers its entries
    pub max_enumeration_index: u32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            initial_entries: 0,
            heap_kind: HeapKind::Local,
            max_enumeration_index: (1 << 20) - 1,
        }
    }
}

/// A stored record. `meta` is per-entry data owned by the table variant,
/// such as an enumeration index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K, V, M = ()> {
    /// Key
    pub key: K,
    /// Value
    pub value: V,
    /// Variant metadata
    pub meta: M,
}

type ShapeEntry<S, M> = Entry<<S as TableShape>::Key, <S as TableShape>::Value, M>;

/// Open-addressing hash table parameterized by a [`TableShape`].
///
/// Invariants: capacity is a power of two and at least [`MIN_SIZE`], and
/// `len() + hole_count() <= capacity()`.
pub struct TaggedHashTable<S: TableShape, M = (), A: TableAllocator = HeapAllocator> {
    slots: TaggedArray<ShapeEntry<S, M>>,
    entries: usize,
    holes: usize,
    allocator: A,
    _shape: PhantomData<S>,
}

impl<S: TableShape, M> TaggedHashTable<S, M> {
    /// Create an empty table with [`MIN_SIZE`] slots
    pub fn new() -> Self {
        Self::from_storage(TaggedArray::new(MIN_SIZE, HeapKind::Local), HeapAllocator)
    }

    /// Create a table sized for `entries` entries
    pub fn create(entries: usize) -> Result<Self, TableError> {
        Self::with_config(
            TableConfig {
                initial_entries: entries,
                ..TableConfig::default()
            },
            HeapAllocator,
        )
    }
}

impl<S: TableShape, M> Default for TaggedHashTable<S, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: TableShape, M, A: TableAllocator> TaggedHashTable<S, M, A> {
    /// Create a table from `config`, allocating through `allocator`
    pub fn with_config(config: TableConfig, allocator: A) -> Result<Self, TableError> {
        let capacity = compute_hash_table_size(config.initial_entries)?;
        let slots = allocator.allocate(capacity, config.heap_kind)?;
        Ok(Self::from_storage(slots, allocator))
    }

    fn from_storage(slots: TaggedArray<ShapeEntry<S, M>>, allocator: A) -> Self {
        debug_assert!(slots.len().is_power_of_two() && slots.len() >= MIN_SIZE);
        Self {
            slots,
            entries: 0,
            holes: 0,
            allocator,
            _shape: PhantomData,
        }
    }

    /// Number of live entries
    #[inline]
    pub fn len(&self) -> usize {
        self.entries
    }

    /// Check if the table has no live entries
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Number of slots
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of deletion markers
    #[inline]
    pub fn hole_count(&self) -> usize {
        self.holes
    }

    /// Heap the storage lives in
    pub fn heap_kind(&self) -> HeapKind {
        self.slots.kind()
    }

    /// Allocator used for resizing
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Slot index holding `key`
    pub fn find_entry(&self, key: &S::Key) -> Option<usize> {
        let size = self.capacity();
        let mut index = first_position(S::hash(key), size);
        for count in 1..=size * 2 {
            match self.slots.get(index) {
                Slot::Empty => return None,
                Slot::Hole => {}
                Slot::Occupied(entry) => {
                    if S::is_match(key, &entry.key) {
                        return Some(index);
                    }
                }
            }
            index = next_position(index, count, size);
        }
        None
    }

    /// First slot on the search path of `hash` that is not occupied.
    ///
    /// Callers guarantee a free slot exists by growing first.
    fn find_insert_index(&self, hash: u32) -> usize {
        let size = self.capacity();
        let mut index = first_position(hash, size);
        for count in 1..=size * 2 {
            if !self.slots.get(index).is_occupied() {
                return index;
            }
            index = next_position(index, count, size);
        }
        tracing::error!(
            target: "otter::hashtable",
            capacity = size,
            entries = self.entries,
            holes = self.holes,
            "slot sequence found no free slot"
        );
        panic!("hash table with {size} slots has no free slot for insertion");
    }

    /// Check if `key` is present
    pub fn has(&self, key: &S::Key) -> bool {
        self.find_entry(key).is_some()
    }

    /// Value stored for `key`
    pub fn get(&self, key: &S::Key) -> Option<&S::Value> {
        self.find_entry(key)
            .and_then(|index| self.entry_at(index))
            .map(|entry| &entry.value)
    }

    /// Mutable value stored for `key`
    pub fn get_mut(&mut self, key: &S::Key) -> Option<&mut S::Value> {
        let index = self.find_entry(key)?;
        self.slots
            .get_mut(index)
            .as_occupied_mut()
            .map(|entry| &mut entry.value)
    }

    /// Record at slot `index`, if occupied
    pub fn entry_at(&self, index: usize) -> Option<&ShapeEntry<S, M>> {
        if index >= self.capacity() {
            return None;
        }
        self.slots.get(index).as_occupied()
    }

    /// Key at slot `index`, if occupied
    pub fn key_at(&self, index: usize) -> Option<&S::Key> {
        self.entry_at(index).map(|entry| &entry.key)
    }

    /// Value at slot `index`, if occupied
    pub fn value_at(&self, index: usize) -> Option<&S::Value> {
        self.entry_at(index).map(|entry| &entry.value)
    }

    pub(crate) fn set_meta(&mut self, index: usize, meta: M) {
        if let Some(entry) = self.slots.get_mut(index).as_occupied_mut() {
            entry.meta = meta;
        }
    }

    /// Insert or overwrite. Returns the previous value when `key` was present.
    pub fn insert(&mut self, key: S::Key, value: S::Value) -> Result<Option<S::Value>, TableError>
    where
        M: Default,
    {
        if let Some(index) = self.find_entry(&key) {
            return Ok(self
                .slots
                .get_mut(index)
                .as_occupied_mut()
                .map(|entry| std::mem::replace(&mut entry.value, value)));
        }
        self.insert_new(key, value, M::default())?;
        Ok(None)
    }

    /// Insert a key the caller has already looked up and found absent,
    /// returning its slot index.
    ///
    /// Grows or compacts the table first when needed. On error the table is
    /// unchanged.
    pub(crate) fn insert_new(
        &mut self,
        key: S::Key,
        value: S::Value,
        meta: M,
    ) -> Result<usize, TableError> {
        debug_assert!(self.find_entry(&key).is_none(), "key already present");
        self.grow(1)?;

        let index = self.find_insert_index(S::hash(&key));
        let previous = self.slots.set(index, Slot::Occupied(Entry { key, value, meta }));
        if previous.is_hole() {
            self.holes -= 1;
        }
        self.entries += 1;
        Ok(index)
    }

    /// Remove `key`, shrinking the table when it became sparse.
    ///
    /// Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &S::Key) -> Option<S::Value> {
        let index = self.find_entry(key)?;
        let entry = self.remove_at(index)?;
        if let Err(err) = self.shrink(0) {
            // Keeping the larger storage is always correct
            tracing::warn!(target: "otter::hashtable", %err, "skipping table shrink");
        }
        Some(entry.value)
    }

    /// Turn the record at slot `index` into a hole.
    ///
    /// Never resizes, so other slot indices stay valid.
    pub fn remove_at(&mut self, index: usize) -> Option<ShapeEntry<S, M>> {
        if index >= self.capacity() || !self.slots.get(index).is_occupied() {
            return None;
        }
        let Slot::Occupied(entry) = self.slots.set(index, Slot::Hole) else {
            return None;
        };
        self.entries -= 1;
        self.holes += 1;
        Some(entry)
    }

    /// Check if adding `added` entries requires new storage
    pub fn is_need_grow(&self, added: usize) -> bool {
        let needed = self.entries.saturating_add(added);
        let capacity = self.capacity();
        if needed.saturating_add(needed / 2) > capacity {
            return true;
        }
        self.holes > (capacity - needed) / 2
    }

    /// Make room for `added` more entries.
    ///
    /// Grows to `compute_hash_table_size(len + added)` when the table would
    /// be too full, or rehashes at the same capacity when only holes crowd
    /// it. Returns whether storage was replaced.
    pub fn grow(&mut self, added: usize) -> Result<bool, TableError> {
        let needed = self
            .entries
            .checked_add(added)
            .ok_or(TableError::CapacityOverflow(added))?;
        let capacity = self.capacity();

        if needed.saturating_add(needed / 2) <= capacity {
            if self.holes <= (capacity - needed) / 2 {
                return Ok(false);
            }
            self.rehash(capacity)?;
            return Ok(true);
        }

        let new_capacity = compute_hash_table_size(needed)?;
        self.rehash(new_capacity)?;
        Ok(true)
    }

    /// Reserve room for `additional` entries
    pub fn reserve(&mut self, additional: usize) -> Result<(), TableError> {
        self.grow(additional).map(|_| ())
    }

    /// Shrink if at most a quarter of the slots would be used by `len() +
    /// additional` entries. Never goes below [`MIN_SHRINK_SIZE`] and never
    /// enlarges the table. Returns whether storage was replaced.
    pub fn shrink(&mut self, additional: usize) -> Result<bool, TableError> {
        let capacity = self.capacity();
        let at_least = self.entries.saturating_add(additional);
        let new_capacity = recalculate_table_size(capacity, at_least)?;
        if new_capacity >= capacity {
            return Ok(false);
        }
        self.rehash(new_capacity)?;
        Ok(true)
    }

    /// Move every record into fresh storage of `new_capacity` slots.
    ///
    /// Records are visited in physical order; the result has no holes.
    /// Panics if `new_capacity` is not a power of two of at least
    /// [`MIN_SIZE`] with room to spare for the current entries.
    pub fn rehash(&mut self, new_capacity: usize) -> Result<(), TableError> {
        assert!(
            new_capacity.is_power_of_two() && new_capacity >= MIN_SIZE,
            "invalid hash table capacity {new_capacity}"
        );
        assert!(
            new_capacity > self.entries,
            "capacity {new_capacity} cannot hold {} entries",
            self.entries
        );

        let fresh = self.allocator.allocate(new_capacity, self.slots.kind())?;
        let old = std::mem::replace(&mut self.slots, fresh);
        let old_capacity = old.len();
        let dropped_holes = std::mem::take(&mut self.holes);

        for entry in old.into_occupied() {
            let index = self.find_insert_index(S::hash(&entry.key));
            self.slots.set(index, Slot::Occupied(entry));
        }

        tracing::debug!(
            target: "otter::hashtable",
            from = old_capacity,
            to = new_capacity,
            entries = self.entries,
            dropped_holes,
            "rehashed table"
        );
        Ok(())
    }

    /// Remove every entry, keeping the capacity
    pub fn clear(&mut self) {
        self.slots.clear();
        self.entries = 0;
        self.holes = 0;
    }

    /// All keys in physical order
    pub fn all_keys(&self) -> Vec<&S::Key> {
        self.iter().map(|(key, _)| key).collect()
    }

    /// Iterate key/value pairs in physical order
    pub fn iter(&self) -> impl Iterator<Item = (&S::Key, &S::Value)> {
        self.occupied().map(|(_, entry)| (&entry.key, &entry.value))
    }

    /// Iterate occupied slots with their indices in physical order
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &ShapeEntry<S, M>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_occupied().map(|entry| (index, entry)))
    }

    /// Check every structural invariant, panicking on the first violation
    #[track_caller]
    pub fn verify(&self) {
        let capacity = self.capacity();
        assert!(
            capacity.is_power_of_two() && capacity >= MIN_SIZE,
            "capacity {capacity} is not a power of two >= {MIN_SIZE}"
        );

        let occupied = self.slots.iter().filter(|slot| slot.is_occupied()).count();
        let holes = self.slots.iter().filter(|slot| slot.is_hole()).count();
        assert_eq!(occupied, self.entries, "entry count out of sync");
        assert_eq!(holes, self.holes, "hole count out of sync");
        assert!(self.entries + self.holes <= capacity);

        for (index, entry) in self.occupied() {
            assert_eq!(
                self.find_entry(&entry.key),
                Some(index),
                "entry at slot {index} is unreachable or duplicated"
            );
        }
    }
}

impl<S: TableShape, M, A: TableAllocator> std::fmt::Debug for TaggedHashTable<S, M, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaggedHashTable")
            .field("entries", &self.entries)
            .field("holes", &self.holes)
            .field("capacity", &self.capacity())
            .field("heap_kind", &self.heap_kind())
            .finish()
    }
}
