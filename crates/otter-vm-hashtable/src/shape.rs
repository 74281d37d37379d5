//! Hashing and key equality for table variants

use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Describes how a table hashes and compares its keys.
///
/// Shapes are zero-sized and used only at the type level, so every table
/// variant is resolved statically.
pub trait TableShape {
    /// Key type
    type Key;
    /// Value type
    type Value;

    /// Hash of `key`; only the low bits select the first slot tried
    fn hash(key: &Self::Key) -> u32;

    /// Check if `key` matches the stored key `other`
    fn is_match(key: &Self::Key, other: &Self::Key) -> bool;
}

/// Shape for any `K: Hash + Eq`, hashed with `FxHasher`
pub struct FxShape<K, V>(PhantomData<fn() -> (K, V)>);

impl<K: Hash + Eq, V> TableShape for FxShape<K, V> {
    type Key = K;
    type Value = V;

    #[inline]
    fn hash(key: &K) -> u32 {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        let hash = hasher.finish();
        // Fold the high bits in, Fx mixes them best
        (hash ^ (hash >> 32)) as u32
    }

    #[inline]
    fn is_match(key: &K, other: &K) -> bool {
        key == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Shape = FxShape<String, u32>;

    #[test]
    fn test_hash_is_deterministic() {
        let a = Shape::hash(&"length".to_string());
        let b = Shape::hash(&"length".to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn test_is_match() {
        assert!(Shape::is_match(&"x".to_string(), &"x".to_string()));
        assert!(!Shape::is_match(&"x".to_string(), &"y".to_string()));
    }

    #[test]
    fn test_hash_spreads_low_bits() {
        let mut buckets = [0usize; 16];
        for i in 0..1600u32 {
            buckets[FxShape::<u32, ()>::hash(&i) as usize & 15] += 1;
        }
        assert!(buckets.iter().all(|&count| count > 0));
    }
}
