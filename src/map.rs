// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Map facades over [`RobinTable`] (`spec.md` §4.8): [`TMap`] is
//! monomorphized over a known key/value type; [`Map`] defers type checks to
//! insertion time.
//!
//! Both the typed and erased facade carry a `const ORDERED: bool` that
//! switches on [`RobinTable`]'s parallel insertion-order list — "ordered"
//! meaning insertion order, never key order (`spec.md` §4.7's "Ordered
//! variant").

use core::hash::{Hash, Hasher};

use crate::block::Block;
use crate::core_compat::alloc::{Allocator, Global};
use crate::error::Result;
use crate::hash::robin::{Iter, RobinTable};
use crate::pair::single_element_block;
use crate::rtti::ElementOps;

/// A map whose key and value types are fixed at compile time. A thin
/// adapter: every operation delegates straight to [`RobinTable`].
pub struct TMap<K, V, A: Allocator + Clone = Global, const ORDERED: bool = false> {
    table: RobinTable<K, V, A>,
}

impl<K: Hash + Eq, V, A: Allocator + Clone + Default, const ORDERED: bool> Default
    for TMap<K, V, A, ORDERED>
{
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

impl<K: Hash + Eq, V, A: Allocator + Clone, const ORDERED: bool> TMap<K, V, A, ORDERED> {
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
    pub fn contains_key(&self, key: &K) -> bool {
        self.table.contains_key(key)
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.table.get(key)
    }

    #[must_use]
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.table.get_mut(key)
    }

    /// Inserts `key`/`value`, returning the previous value if `key` was
    /// already present.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>> {
        self.table.insert(key, value)
    }

    /// Removes `key`, returning its value if present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.table.remove(key)
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.table.reserve(additional)
    }

    /// Iterates in insertion order when `ORDERED`, slot order otherwise.
    pub fn iter(&self) -> Iter<'_, K, V, A> {
        self.table.iter()
    }
}

/// Wraps a single-element, erased `Block<Global>` so it can serve as the
/// key of an erased [`Map`]/[`Set`]. Hashing and equality are delegated to
/// the element's own [`TypeDescriptor`](crate::rtti::TypeDescriptor) ops
/// (`spec.md` §3: "Hashes a single element" / "Compares two single
/// elements for equality"), *not* to `Block`'s own structural `Hash`/`Eq`
/// (which only distinguishes by element count, see `block::mod`'s note —
/// that coarser relation is for deep-container nesting, not table lookup).
pub struct ErasedKey(pub(crate) Block<Global>);

impl Hash for ErasedKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match (self.0.get_type(), self.0.data_ptr()) {
            (Some(ty), Some(data)) => {
                // SAFETY: a populated, single-element block always holds
                // one live element of `ty` at `data`.
                state.write_u64(unsafe { (ty.ops.hash)(data.as_ptr()) });
            }
            _ => state.write_u8(0),
        }
    }
}

impl PartialEq for ErasedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.compare(&other.0)
    }
}

impl Eq for ErasedKey {}

/// A map whose key and value types are resolved at insertion time.
/// "A set is a table whose value-block has zero stride and no type; a map
/// binds a key type and a value type" (`spec.md` §4.8) — here realized as
/// single-element, erased `Block<Global>`s on both sides.
pub struct Map<const ORDERED: bool = false> {
    table: RobinTable<ErasedKey, Block<Global>, Global>,
}

impl<const ORDERED: bool> Default for Map<ORDERED> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const ORDERED: bool> Map<ORDERED> {
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

    /// Inserts a key/value pair whose types are only known at this call
    /// site (`spec.md` §4.8: "erased facades defer type checks to
    /// insertion time").
    pub fn insert<K: ElementOps, V: ElementOps>(
        &mut self,
        key: K,
        value: V,
    ) -> Result<Option<Block<Global>>> {
        let key = ErasedKey(single_element_block(key)?);
        let value = single_element_block(value)?;
        self.table.insert(key, value)
    }

    #[must_use]
    pub fn get<K: ElementOps>(&self, key: K) -> Option<&Block<Global>> {
        let probe = ErasedKey(single_element_block(key).ok()?);
        self.table.get(&probe)
    }

    pub fn remove<K: ElementOps>(&mut self, key: K) -> Option<Block<Global>> {
        let probe = ErasedKey(single_element_block(key).ok()?);
        self.table.remove(&probe)
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_map_collision_resolution_matches_spec_scenario_4() {
        // spec.md §8 scenario 4.
        let mut m: TMap<i32, i32> = TMap::new_in(Global);
        for k in [0, 8, 16] {
            m.insert(k, k).unwrap();
        }
        for k in [0, 8, 16] {
            assert_eq!(m.get(&k), Some(&k));
        }
        assert_eq!(m.remove(&0), Some(0));
        assert_eq!(m.get(&8), Some(&8));
        assert_eq!(m.get(&16), Some(&16));
    }

    #[test]
    fn ordered_typed_map_iterates_in_insertion_order() {
        let mut m: TMap<i32, i32, Global, true> = TMap::new_in(Global);
        for k in [5, 1, 9, 2, 7] {
            m.insert(k, k * 10).unwrap();
        }
        let collected: crate::core_compat::vec::Vec<i32> =
            m.iter().map(|(k, _)| *k).collect::<crate::core_compat::vec::Vec<_>>();
        assert_eq!(collected, [5, 1, 9, 2, 7]);
    }

    #[test]
    fn erased_map_round_trips_by_value() {
        let mut m: Map = Map::new();
        m.insert(1i32, ::std::string::String::from("one")).unwrap();
        m.insert(2i32, ::std::string::String::from("two")).unwrap();
        assert_eq!(m.len(), 2);
        let got = m.get(1i32).unwrap();
        assert!(got.is(<::std::string::String as ElementOps>::descriptor()));
        assert!(m.remove(1i32).is_some());
        assert_eq!(m.len(), 1);
        assert!(m.get(1i32).is_none());
    }
}
