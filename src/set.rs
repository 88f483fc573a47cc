// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Set facades over [`RobinTable`] (`spec.md` §4.8): a set is a map whose
//! value side carries nothing.
//!
//! [`TSet`] stores a fixed key type and `RobinTable<K, (), A>`; [`Set`]
//! stores the same [`ErasedKey`](crate::map::ErasedKey) wrapper the erased
//! map uses, again paired with `()`.

use core::hash::Hash;

use crate::core_compat::alloc::{Allocator, Global};
use crate::error::Result;
use crate::hash::robin::RobinTable;
use crate::map::ErasedKey;
use crate::pair::single_element_block;
use crate::rtti::ElementOps;

/// A set whose key type is fixed at compile time.
pub struct TSet<K, A: Allocator + Clone = Global, const ORDERED: bool = false> {
    table: RobinTable<K, (), A>,
}

impl<K: Hash + Eq, A: Allocator + Clone + Default, const ORDERED: bool> Default
    for TSet<K, A, ORDERED>
{
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

impl<K: Hash + Eq, A: Allocator + Clone, const ORDERED: bool> TSet<K, A, ORDERED> {
    pub fn new_in(alloc: A) -> Self {
        let table = if ORDERED {
            RobinTable::new_ordered_in(alloc)
        } else {
            RobinTable::new_in(alloc)
        };
        Self { table }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.table.contains_key(key)
    }

    /// Inserts `key`, returning `true` if it was newly added (matching
    /// `HashSet::insert`'s boolean-return convention rather than a map's
    /// "previous value" one, since a set has no value to hand back).
    pub fn insert(&mut self, key: K) -> Result<bool> {
        Ok(self.table.insert(key, ())?.is_none())
    }

    /// Removes `key`, returning `true` if it was present.
    pub fn remove(&mut self, key: &K) -> bool {
        self.table.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.table.reserve(additional)
    }

    /// Iterates in insertion order when `ORDERED`, slot order otherwise.
    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.table.iter().map(|(k, ())| k)
    }
}

/// A set whose key type is resolved at insertion time.
pub struct Set<const ORDERED: bool = false> {
    table: RobinTable<ErasedKey, (), Global>,
}

impl<const ORDERED: bool> Default for Set<ORDERED> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const ORDERED: bool> Set<ORDERED> {
    #[must_use]
    pub fn new() -> Self {
        let table = if ORDERED {
            RobinTable::new_ordered_in(Global)
        } else {
            RobinTable::new_in(Global)
        };
        Self { table }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn insert<K: ElementOps>(&mut self, key: K) -> Result<bool> {
        let key = ErasedKey(single_element_block(key)?);
        Ok(self.table.insert(key, ())?.is_none())
    }

    #[must_use]
    pub fn contains<K: ElementOps>(&self, key: K) -> bool {
        match single_element_block(key) {
            Ok(block) => self.table.contains_key(&ErasedKey(block)),
            Err(_) => false,
        }
    }

    pub fn remove<K: ElementOps>(&mut self, key: K) -> Result<bool> {
        let probe = ErasedKey(single_element_block(key)?);
        Ok(self.table.remove(&probe).is_some())
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_set_rejects_duplicate_insertion() {
        let mut s: TSet<i32> = TSet::new_in(Global);
        assert!(s.insert(1).unwrap());
        assert!(!s.insert(1).unwrap());
        assert_eq!(s.len(), 1);
        assert!(s.contains(&1));
        assert!(s.remove(&1));
        assert!(!s.contains(&1));
    }

    #[test]
    fn ordered_typed_set_iterates_in_insertion_order() {
        let mut s: TSet<i32, Global, true> = TSet::new_in(Global);
        for k in [5, 1, 9, 2, 7] {
            s.insert(k).unwrap();
        }
        let collected: crate::core_compat::vec::Vec<i32> =
            s.iter().copied().collect::<crate::core_compat::vec::Vec<_>>();
        assert_eq!(collected, [5, 1, 9, 2, 7]);
    }

    #[test]
    fn erased_set_distinguishes_by_type_and_value() {
        let mut s: Set = Set::new();
        assert!(s.insert(1i32).unwrap());
        assert!(!s.insert(1i32).unwrap());
        assert!(s.insert(1i64).unwrap());
        assert_eq!(s.len(), 2);
        assert!(s.contains(1i32));
        assert!(s.remove(1i32).unwrap());
        assert_eq!(s.len(), 1);
    }
}
