//! Hash table behaviour tests

use otter_vm_hashtable::{
    FxShape, HeapKind, MIN_SHRINK_SIZE, MIN_SIZE, OrderedHashTable, Slot, TableAllocator,
    TableConfig, TableError, TaggedArray, TaggedHashTable,
};
use proptest::prelude::*;
use std::cell::Cell;
use std::collections::{HashMap, HashSet};

type Table = TaggedHashTable<FxShape<String, u32>>;

fn key(i: u32) -> String {
    format!("k{i}")
}

/// Allocator that fails once its budget of allocations is spent
struct BudgetAllocator {
    remaining: Cell<usize>,
}

impl BudgetAllocator {
    fn new(allocations: usize) -> Self {
        Self {
            remaining: Cell::new(allocations),
        }
    }
}

impl TableAllocator for BudgetAllocator {
    fn allocate<T>(&self, len: usize, kind: HeapKind) -> Result<TaggedArray<T>, TableError> {
        let remaining = self.remaining.get();
        if remaining == 0 {
            return Err(TableError::OutOfMemory { requested: len });
        }
        self.remaining.set(remaining - 1);
        Ok(TaggedArray::new(len, kind))
    }
}

#[test]
fn test_forty_inserts_grow_to_sixty_four() {
    let mut table = Table::new();
    assert_eq!(table.capacity(), MIN_SIZE);

    for i in 0..40 {
        table.insert(key(i), i).unwrap();
    }

    assert_eq!(table.len(), 40);
    assert_eq!(table.capacity(), 64);
    for i in 0..40 {
        assert_eq!(table.get(&key(i)), Some(&i));
    }
    table.verify();
}

#[test]
fn test_delete_keeps_other_keys_reachable() {
    let mut table = Table::new();
    for i in 0..40 {
        table.insert(key(i), i).unwrap();
    }

    assert_eq!(table.remove(&key(8)), Some(8));
    assert!(!table.has(&key(8)));
    assert_eq!(table.len(), 39);
    for i in (0..40).filter(|&i| i != 8) {
        assert_eq!(table.get(&key(i)), Some(&i), "k{i}");
    }
    table.verify();
}

#[test]
fn test_ordered_enumeration_after_deletes() {
    let mut table: OrderedHashTable<FxShape<String, u32>> = OrderedHashTable::new();
    for i in 0..5 {
        table.put(key(i), i).unwrap();
    }
    for i in 0..3 {
        table.remove(&key(i));
    }
    table.put("new".to_string(), 99).unwrap();

    let keys: Vec<&str> = table.keys().into_iter().map(String::as_str).collect();
    assert_eq!(keys, vec!["k3", "k4", "new"]);
    table.verify();
}

#[test]
fn test_shrinks_but_never_below_minimum() {
    let mut table = Table::new();
    for i in 0..40 {
        table.insert(key(i), i).unwrap();
    }
    assert_eq!(table.capacity(), 64);

    let mut capacities = vec![table.capacity()];
    for i in 0..40 {
        table.remove(&key(i));
        if capacities.last() != Some(&table.capacity()) {
            capacities.push(table.capacity());
        }
        assert!(table.capacity() >= MIN_SHRINK_SIZE);
        table.verify();
    }

    assert_eq!(capacities, vec![64, 32, 16]);
    assert!(table.is_empty());
}

#[test]
fn test_failed_grow_leaves_table_intact() {
    let config = TableConfig::default();
    // One allocation for the initial storage, none for growing
    let mut table: TaggedHashTable<FxShape<String, u32>, (), _> =
        TaggedHashTable::with_config(config, BudgetAllocator::new(1)).unwrap();
    for i in 0..3 {
        table.insert(key(i), i).unwrap();
    }
    assert_eq!(table.capacity(), 4);

    let err = table.insert(key(3), 3).unwrap_err();
    assert_eq!(err, TableError::OutOfMemory { requested: 8 });

    assert_eq!(table.len(), 3);
    assert_eq!(table.capacity(), 4);
    assert!(!table.has(&key(3)));
    for i in 0..3 {
        assert_eq!(table.get(&key(i)), Some(&i));
    }
    table.verify();

    // Overwriting needs no storage
    assert_eq!(table.insert(key(1), 10).unwrap(), Some(1));
}

#[test]
fn test_failed_shrink_keeps_larger_table() {
    let mut table: TaggedHashTable<FxShape<String, u32>, (), _> =
        TaggedHashTable::with_config(TableConfig::default(), BudgetAllocator::new(4)).unwrap();
    // 4 -> 8 -> 16 -> 32 uses the remaining budget
    for i in 0..20 {
        table.insert(key(i), i).unwrap();
    }
    assert_eq!(table.capacity(), 32);

    for i in 0..20 {
        assert_eq!(table.remove(&key(i)), Some(i));
    }
    assert!(table.is_empty());
    assert_eq!(table.capacity(), 32);
    assert_eq!(table.hole_count(), 20);
    table.verify();
}

#[test]
fn test_shared_heap_ordered_table() {
    let config = TableConfig {
        heap_kind: HeapKind::Shared,
        initial_entries: 20,
        ..TableConfig::default()
    };
    let mut table: OrderedHashTable<FxShape<u32, u32>> =
        OrderedHashTable::with_config(config, otter_vm_hashtable::HeapAllocator).unwrap();
    assert_eq!(table.capacity(), 32);
    for i in (0..20).rev() {
        table.put(i, i).unwrap();
    }
    assert_eq!(table.table().heap_kind(), HeapKind::Shared);
    let keys: Vec<u32> = table.keys().into_iter().copied().collect();
    assert_eq!(keys, (0..20).rev().collect::<Vec<_>>());
}

#[test]
fn test_slots_are_tagged() {
    let mut table = Table::create(10).unwrap();
    table.insert(key(1), 1).unwrap();
    table.insert(key(2), 2).unwrap();
    let index = table.find_entry(&key(1)).unwrap();
    table.remove_at(index).unwrap();

    assert!(table.entry_at(index).is_none());
    assert_eq!(table.hole_count(), 1);
    let array: TaggedArray<u8> = TaggedArray::new(4, HeapKind::Local);
    assert_eq!(array.get(0), &Slot::Empty);
}

#[derive(Debug, Clone)]
enum Op {
    Insert(u16, u32),
    Remove(u16),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u16..64, any::<u32>()).prop_map(|(k, v)| Op::Insert(k, v)),
        2 => (0u16..64).prop_map(Op::Remove),
    ]
}

proptest! {
    #[test]
    fn prop_table_matches_model(ops in prop::collection::vec(op(), 0..300)) {
        let mut table: TaggedHashTable<FxShape<u16, u32>> = TaggedHashTable::new();
        let mut model = HashMap::new();

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    prop_assert_eq!(table.insert(k, v).unwrap(), model.insert(k, v));
                }
                Op::Remove(k) => {
                    prop_assert_eq!(table.remove(&k), model.remove(&k));
                }
            }
            prop_assert!(table.capacity().is_power_of_two());
            prop_assert!(table.capacity() >= MIN_SIZE);
            prop_assert!(table.len() + table.hole_count() <= table.capacity());
            prop_assert_eq!(table.len(), model.len());
        }

        table.verify();
        for (k, v) in &model {
            prop_assert_eq!(table.get(k), Some(v));
        }
    }

    #[test]
    fn prop_rehash_preserves_pairs(
        keys in prop::collection::hash_set(any::<u32>(), 0..100),
        removed in prop::collection::vec(any::<prop::sample::Index>(), 0..50),
        grow_by in 0u32..3,
    ) {
        let mut table: TaggedHashTable<FxShape<u32, u32>> = TaggedHashTable::new();
        let keys: Vec<u32> = keys.into_iter().collect();
        for &k in &keys {
            table.insert(k, k.wrapping_mul(3)).unwrap();
        }
        if !keys.is_empty() {
            for index in removed {
                let k = keys[index.index(keys.len())];
                table.remove(&k);
            }
        }

        let before: HashSet<(u32, u32)> = table.iter().map(|(k, v)| (*k, *v)).collect();
        let capacity = table.capacity() << grow_by;
        table.rehash(capacity).unwrap();

        let after: HashSet<(u32, u32)> = table.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(before, after);
        prop_assert_eq!(table.hole_count(), 0);
        prop_assert_eq!(table.capacity(), capacity);
        table.verify();
    }

    #[test]
    fn prop_remove_absent_is_noop(
        keys in prop::collection::hash_set(0u32..1000, 0..60),
        absent in 1000u32..2000,
    ) {
        let mut table: TaggedHashTable<FxShape<u32, u32>> = TaggedHashTable::new();
        for &k in &keys {
            table.insert(k, k).unwrap();
        }
        let len = table.len();
        let capacity = table.capacity();
        let holes = table.hole_count();

        prop_assert_eq!(table.remove(&absent), None);
        prop_assert_eq!(table.len(), len);
        prop_assert_eq!(table.capacity(), capacity);
        prop_assert_eq!(table.hole_count(), holes);
    }

    #[test]
    fn prop_ordered_enumeration_follows_insertion(
        ops in prop::collection::vec(op(), 0..200),
        max_index in 128u32..256,
    ) {
        let config = TableConfig {
            max_enumeration_index: max_index,
            ..TableConfig::default()
        };
        let mut table: OrderedHashTable<FxShape<u16, u32>> =
            OrderedHashTable::with_config(config, otter_vm_hashtable::HeapAllocator).unwrap();
        let mut model: Vec<(u16, u32)> = Vec::new();

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    table.put(k, v).unwrap();
                    match model.iter_mut().find(|(key, _)| *key == k) {
                        Some(entry) => entry.1 = v,
                        None => model.push((k, v)),
                    }
                }
                Op::Remove(k) => {
                    table.remove(&k);
                    model.retain(|(key, _)| *key != k);
                }
            }
        }

        let pairs: Vec<(u16, u32)> = table.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(pairs, model);
        table.verify();
    }
}
