// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! [`Pair`] and [`TPair`]: the key/value unit underlying every map/set
//! entry (`spec.md` §3/§2).
//!
//! A [`Pair`] is two independent, erased [`Block`]s with no shared
//! allocation: "`key.count == value.count == 1` for a populated pair, or
//! both empty." [`TPair`] is the statically-typed, stack-only counterpart,
//! matching the `TPair<const K&, V&>` borrowing shape seen in
//! `original_source/source/maps/TMap.hpp`.

use crate::block::{Block, Position};
use crate::core_compat::alloc::{Allocator, Global};
use crate::error::Result;
use crate::intent::IntentTag;
use crate::rtti::ElementOps;

/// Two independent erased `Block`s making up one map/set entry.
pub struct Pair<A: Allocator + Clone = Global> {
    key: Block<A>,
    value: Block<A>,
}

impl<A: Allocator + Clone + Default> Default for Pair<A> {
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

impl<A: Allocator + Clone> Pair<A> {
    /// An empty, untyped pair.
    pub fn new_in(alloc: A) -> Self {
        Self {
            key: Block::new_in(alloc.clone()),
            value: Block::new_in(alloc),
        }
    }

    #[must_use]
    pub fn key(&self) -> &Block<A> {
        &self.key
    }

    #[must_use]
    pub fn value(&self) -> &Block<A> {
        &self.value
    }

    #[must_use]
    pub fn value_mut(&mut self) -> &mut Block<A> {
        &mut self.value
    }

    /// True iff neither side has been populated yet (`spec.md` §3's "or
    /// both empty" half of the pair invariant).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.key.is_empty() && self.value.is_empty()
    }

    /// `key.count == value.count == 1`: the "populated" half of the pair
    /// invariant.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.key.count() == 1 && self.value.count() == 1
    }

    /// Resets both sides, then constructs a single key/value by move.
    /// This is the common way a map entry is built: the typed key and
    /// value are known at the call site, but the `Pair` itself stays
    /// erased so the table's storage stays uniform across entries.
    pub fn set<K: ElementOps, V: ElementOps>(&mut self, mut key: K, mut value: V) -> Result<()> {
        self.key.reset();
        self.value.reset();
        let kty = K::descriptor();
        // SAFETY: `&mut key` is valid for exactly one live `K`; `key` is
        // forgotten right after a successful insert since its bytes now
        // live inside `self.key`.
        unsafe {
            self.key
                .insert(Position::Back, IntentTag::Move, kty, (&mut key as *mut K).cast(), 1)?;
        }
        core::mem::forget(key);

        let vty = V::descriptor();
        // SAFETY: see above, for `value`/`self.value`.
        unsafe {
            self.value.insert(
                Position::Back,
                IntentTag::Move,
                vty,
                (&mut value as *mut V).cast(),
                1,
            )?;
        }
        core::mem::forget(value);
        debug_assert!(self.is_populated());
        Ok(())
    }
}

/// Builds a standalone, single-element `Block<Global>` by moving `value`
/// in. Shared by [`Pair::set`] and the erased map/set facades
/// (`crate::map`, `crate::set`), which both need to lift a typed value
/// into an erased, single-element `Block` before it can sit in uniform
/// table storage.
pub(crate) fn single_element_block<T: ElementOps>(mut value: T) -> Result<Block<Global>> {
    let mut block = Block::with_type_in(T::descriptor(), Global);
    let ty = T::descriptor();
    // SAFETY: `&mut value` is valid for exactly one live `T`; `value` is
    // forgotten right after a successful insert.
    unsafe {
        block.insert(Position::Back, IntentTag::Move, ty, (&mut value as *mut T).cast(), 1)?;
    }
    core::mem::forget(value);
    Ok(block)
}

/// A statically typed, stack-only key/value pair, convertible to/from
/// [`Pair<A>`] via the intent protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TPair<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> TPair<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    /// A read-only borrowing view, matching `TPair<const K&, V&>`.
    #[must_use]
    pub fn as_ref(&self) -> (&K, &V) {
        (&self.key, &self.value)
    }

    /// A mutable-value borrowing view: keys are never mutated in place
    /// (a map/set entry's identity is its key), only the value is.
    #[must_use]
    pub fn as_mut(&mut self) -> (&K, &mut V) {
        (&self.key, &mut self.value)
    }

    pub fn into_tuple(self) -> (K, V) {
        (self.key, self.value)
    }
}

impl<K: ElementOps, V: ElementOps> TPair<K, V> {
    /// Moves this typed pair into an erased [`Pair<A>`].
    pub fn into_erased<A: Allocator + Clone>(self, alloc: A) -> Result<Pair<A>> {
        let Self { key, value } = self;
        let mut pair = Pair::new_in(alloc);
        pair.set(key, value)?;
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pair_is_empty_not_populated() {
        let p: Pair = Pair::new_in(Global);
        assert!(p.is_empty());
        assert!(!p.is_populated());
    }

    #[test]
    fn set_populates_both_sides() {
        let mut p: Pair = Pair::new_in(Global);
        p.set(1i32, ::std::string::String::from("one")).unwrap();
        assert!(p.is_populated());
        assert_eq!(p.key().count(), 1);
        assert_eq!(p.value().count(), 1);
    }

    #[test]
    fn tpair_round_trips_through_erased_pair() {
        let t = TPair::new(7i32, ::std::string::String::from("seven"));
        let erased = t.into_erased(Global).unwrap();
        assert!(erased.is_populated());
        assert!(erased.key().is(i32::descriptor()));
    }
}
