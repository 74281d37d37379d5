//! Insertion-ordered hash table
//!
//! Every entry carries an enumeration index taken from a monotonically
//! increasing counter. Enumerating by index reproduces insertion order among
//! the surviving entries regardless of where records sit physically. When
//! the counter runs past the configured maximum, survivors are renumbered
//! densely from [`INITIAL_ENUMERATION_INDEX`] in their current order.

use crate::allocator::{HeapAllocator, TableAllocator};
use crate::error::TableError;
use crate::shape::TableShape;
use crate::table::{TableConfig, TaggedHashTable};

/// Enumeration index given to the first entry
pub const INITIAL_ENUMERATION_INDEX: u32 = 1;

/// Hash table that enumerates in insertion order
pub struct OrderedHashTable<S: TableShape, A: TableAllocator = HeapAllocator> {
    table: TaggedHashTable<S, u32, A>,
    next_enumeration_index: u32,
    max_enumeration_index: u32,
}

impl<S: TableShape> OrderedHashTable<S> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            table: TaggedHashTable::new(),
            next_enumeration_index: INITIAL_ENUMERATION_INDEX,
            max_enumeration_index: TableConfig::default().max_enumeration_index,
        }
    }
}

impl<S: TableShape> Default for OrderedHashTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: TableShape, A: TableAllocator> OrderedHashTable<S, A> {
    /// Create a table from `config`, allocating through `allocator`
    pub fn with_config(config: TableConfig, allocator: A) -> Result<Self, TableError> {
        assert!(
            config.max_enumeration_index >= INITIAL_ENUMERATION_INDEX,
            "maximum enumeration index {} is below the initial index",
            config.max_enumeration_index
        );
        let max_enumeration_index = config.max_enumeration_index;
        Ok(Self {
            table: TaggedHashTable::with_config(config, allocator)?,
            next_enumeration_index: INITIAL_ENUMERATION_INDEX,
            max_enumeration_index,
        })
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Check if the table has no live entries
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Underlying table
    pub fn table(&self) -> &TaggedHashTable<S, u32, A> {
        &self.table
    }

    /// Check if `index` may still be handed out
    #[inline]
    pub fn is_valid_index(&self, index: u32) -> bool {
        (INITIAL_ENUMERATION_INDEX..=self.max_enumeration_index).contains(&index)
    }

    /// Enumeration index for the next new entry.
    ///
    /// Renumbers the survivors first when the counter has run out. Fails
    /// only if the live entries alone exceed the index range.
    pub fn next_enumeration_index(&mut self) -> Result<u32, TableError> {
        let index = self.next_enumeration_index;
        if self.is_valid_index(index) {
            return Ok(index);
        }

        let order = self.enumeration_order();
        let live = order.len();
        let next = u32::try_from(live)
            .ok()
            .and_then(|live| INITIAL_ENUMERATION_INDEX.checked_add(live))
            .filter(|&next| self.is_valid_index(next))
            .ok_or(TableError::CapacityOverflow(live))?;

        for (position, &slot) in order.iter().enumerate() {
            self.table
                .set_meta(slot, INITIAL_ENUMERATION_INDEX + position as u32);
        }
        self.next_enumeration_index = next;

        tracing::debug!(
            target: "otter::hashtable",
            live,
            next,
            "renumbered enumeration indices"
        );
        Ok(next)
    }

    /// Insert or overwrite. An overwritten entry keeps its position in the
    /// enumeration order.
    pub fn put(&mut self, key: S::Key, value: S::Value) -> Result<Option<S::Value>, TableError> {
        if let Some(slot) = self.table.get_mut(&key) {
            return Ok(Some(std::mem::replace(slot, value)));
        }
        self.insert_absent(key, value)?;
        Ok(None)
    }

    /// Insert only if `key` is absent. Returns whether the entry was added;
    /// an existing value is left untouched.
    pub fn put_if_absent(&mut self, key: S::Key, value: S::Value) -> Result<bool, TableError> {
        if self.table.has(&key) {
            return Ok(false);
        }
        self.insert_absent(key, value)?;
        Ok(true)
    }

    fn insert_absent(&mut self, key: S::Key, value: S::Value) -> Result<(), TableError> {
        let index = self.next_enumeration_index()?;
        self.table.insert_new(key, value, index)?;
        // Wraps to 0 at u32::MAX, which forces a renumbering next time
        self.next_enumeration_index = index.wrapping_add(1);
        Ok(())
    }

    /// Check if `key` is present
    pub fn has(&self, key: &S::Key) -> bool {
        self.table.has(key)
    }

    /// Value stored for `key`
    pub fn get(&self, key: &S::Key) -> Option<&S::Value> {
        self.table.get(key)
    }

    /// Mutable value stored for `key`
    pub fn get_mut(&mut self, key: &S::Key) -> Option<&mut S::Value> {
        self.table.get_mut(key)
    }

    /// Remove `key`, shrinking when the table became sparse
    pub fn remove(&mut self, key: &S::Key) -> Option<S::Value> {
        self.table.remove(key)
    }

    /// Enumeration index of `key`
    pub fn enumeration_index_of(&self, key: &S::Key) -> Option<u32> {
        let slot = self.table.find_entry(key)?;
        self.table.entry_at(slot).map(|entry| entry.meta)
    }

    /// Occupied slot indices sorted by enumeration index
    pub fn enumeration_order(&self) -> Vec<usize> {
        let mut order: Vec<(u32, usize)> = self
            .table
            .occupied()
            .map(|(slot, entry)| (entry.meta, slot))
            .collect();
        order.sort_unstable_by_key(|&(index, _)| index);
        order.into_iter().map(|(_, slot)| slot).collect()
    }

    /// Iterate key/value pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&S::Key, &S::Value)> {
        self.enumeration_order()
            .into_iter()
            .filter_map(|slot| self.table.entry_at(slot))
            .map(|entry| (&entry.key, &entry.value))
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<&S::Key> {
        self.iter().map(|(key, _)| key).collect()
    }

    /// Check table invariants and that enumeration indices are distinct,
    /// valid and below the counter
    #[track_caller]
    pub fn verify(&self) {
        self.table.verify();

        let mut indices: Vec<u32> = self.table.occupied().map(|(_, entry)| entry.meta).collect();
        indices.sort_unstable();
        assert!(
            indices.windows(2).all(|pair| pair[0] < pair[1]),
            "duplicate enumeration index"
        );
        for &index in &indices {
            assert!(self.is_valid_index(index), "invalid enumeration index {index}");
            assert!(
                index < self.next_enumeration_index,
                "enumeration index {index} not below counter {}",
                self.next_enumeration_index
            );
        }
    }
}

impl<S: TableShape, A: TableAllocator> std::fmt::Debug for OrderedHashTable<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedHashTable")
            .field("table", &self.table)
            .field("next_enumeration_index", &self.next_enumeration_index)
            .finish()
    }
}
