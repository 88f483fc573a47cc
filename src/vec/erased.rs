// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! [`Vec`]: a [`Block`] specialization untyped at compile time (`spec.md`
//! §4.6).
//!
//! Named `ErasedVec` in this module (re-exported as `Vec` at
//! [`crate::vec`]) to avoid confusion with [`crate::core_compat::vec::Vec`],
//! the allocator-aware `alloc::Vec` analog used throughout this crate's own
//! implementation.

use crate::block::{Block, Position, SmartPushOptions};
use crate::core_compat::alloc::{Allocator, Global};
use crate::error::Result;
use crate::intent::IntentTag;
use crate::rtti::{ElementOps, TypeDescriptor};

/// A vector whose element type is determined at runtime. `#[repr(transparent)]`
/// over `Block<A>`, so it shares its layout exactly with
/// [`TVec<T, A>`](crate::vec::typed::TVec).
#[repr(transparent)]
pub struct Vec<A: Allocator = Global>(Block<A>);

impl<A: Allocator + Default> Default for Vec<A> {
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

impl<A: Allocator> Vec<A> {
    /// An empty, untyped vector.
    pub fn new_in(alloc: A) -> Self {
        Self(Block::new_in(alloc))
    }

    /// Whole-container refer-construct: the result shares `self`'s
    /// allocation, bumping its refcount (`spec.md` §4.3).
    ///
    /// # Panics
    /// Never: `block_transfer` only returns `Err` for `Copy`/`Clone`.
    #[must_use]
    pub fn refer(&mut self) -> Self
    where
        A: Clone,
    {
        Self(crate::block::block_transfer(&mut self.0, IntentTag::Refer).expect("Refer never fails"))
    }

    /// Whole-container disown-construct: a static view that does not
    /// participate in `self`'s refcount. Must not outlive `self`.
    ///
    /// # Panics
    /// Never: `block_transfer` only returns `Err` for `Copy`/`Clone`.
    #[must_use]
    pub fn disown(&mut self) -> Self
    where
        A: Clone,
    {
        Self(crate::block::block_transfer(&mut self.0, IntentTag::Disown).expect("Disown never fails"))
    }

    /// Whole-container move-construct: transfers ownership, leaving
    /// `self` empty but still pinned to its prior type.
    ///
    /// # Panics
    /// Never: `block_transfer` only returns `Err` for `Copy`/`Clone`.
    #[must_use]
    pub fn take(&mut self) -> Self
    where
        A: Clone,
    {
        Self(crate::block::block_transfer(&mut self.0, IntentTag::Move).expect("Move never fails"))
    }

    /// Whole-container abandon-construct: transfers ownership without
    /// running source cleanup.
    ///
    /// # Panics
    /// Never: `block_transfer` only returns `Err` for `Copy`/`Clone`.
    #[must_use]
    pub fn abandon(&mut self) -> Self
    where
        A: Clone,
    {
        Self(crate::block::block_transfer(&mut self.0, IntentTag::Abandon).expect("Abandon never fails"))
    }

    /// Wraps an already-built `Block`, as used by
    /// [`TVec::into_erased`](crate::vec::typed::TVec::into_erased).
    pub(crate) fn from_block(block: Block<A>) -> Self {
        Self(block)
    }

    #[must_use]
    pub fn get_type(&self) -> Option<&'static TypeDescriptor> {
        self.0.get_type()
    }

    #[must_use]
    pub fn is(&self, ty: &'static TypeDescriptor) -> bool {
        self.0.is(ty)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.0.reserved()
    }

    #[must_use]
    pub fn is_deep(&self) -> bool {
        self.0.is_deep()
    }

    #[must_use]
    pub fn use_count(&self) -> usize {
        self.0.use_count()
    }

    /// Pins the element type, widening or failing per `Block::set_type`.
    pub fn set_type(&mut self, ty: &'static TypeDescriptor) -> Result<()> {
        self.0.set_type(ty)
    }

    #[must_use]
    pub fn is_type_constrained(&self) -> bool {
        self.0.is_type_constrained()
    }

    /// Pins this vector's current element type permanently (`spec.md`
    /// §4.6: "can be type-pinned (constrained) or free-to-mutate"). Fails
    /// if nothing has been typed yet.
    pub fn constrain(&mut self) -> Result<()> {
        self.0.constrain()
    }

    /// Removes `count` elements beginning at `offset`.
    pub fn remove(&mut self, offset: usize, count: usize) -> Result<()> {
        self.0.remove(offset, count)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn reset(&mut self) {
        self.0.reset();
    }

    /// Reinterprets this erased vector as `TVec<T, A>`, after checking
    /// that its runtime type is (`is_exact`) `T`'s. Per `spec.md` §1 this
    /// "reinterpretation after a single runtime type check" is the whole
    /// point of sharing one layout between typed and erased containers.
    pub fn try_into_typed<T: ElementOps>(self) -> core::result::Result<crate::vec::typed::TVec<T, A>, Self> {
        if self.0.is_untyped() || self.0.is_exact(T::descriptor()) {
            let mut this = core::mem::ManuallyDrop::new(self);
            // SAFETY: `this` is never dropped; reading `this.0` out moves
            // the `Block<A>` exactly once. The runtime type check above
            // establishes that reinterpreting it as `TVec<T, A>` is sound.
            let block = unsafe { core::ptr::read(&mut this.0) };
            Ok(crate::vec::typed::TVec::from_block(block))
        } else {
            Err(self)
        }
    }
}

// The smart-push-driven insertion path (`spec.md` §8 scenario 3, "erased
// absorption") is only implemented for the default allocator, matching
// `Block<Global>`'s own deep-element `ElementOps` impl (see
// `block::mod`'s note on why it can't be generalized over `A`).
impl Vec<Global> {
    /// Inserts a single `T`-typed value by move at `pos`, widening
    /// (deepening) the vector when its existing element type differs
    /// (`spec.md` §4.4's smart-push, §8 scenario 3).
    pub fn insert<T: ElementOps>(&mut self, pos: Position, mut value: T) -> Result<()> {
        let ty = T::descriptor();
        // SAFETY: `&mut value` is valid for exactly one live `T`; `value`
        // is forgotten below once `smart_push` has moved its bytes.
        unsafe {
            self.0.smart_push(
                pos,
                IntentTag::Move,
                ty,
                (&mut value as *mut T).cast(),
                1,
                SmartPushOptions::default(),
            )?;
        }
        core::mem::forget(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Position;

    #[test]
    fn refer_shares_refcount_and_take_empties_source() {
        let mut e: Vec<Global> = Vec::new_in(Global);
        e.insert(Position::Back, 7i32).unwrap();
        e.insert(Position::Back, 8i32).unwrap();

        let shared = e.refer();
        assert_eq!(e.use_count(), 2);
        assert_eq!(shared.use_count(), 2);
        assert_eq!(shared.len(), e.len());

        let taken = e.take();
        assert_eq!(taken.len(), 2);
        assert!(e.is_empty());
        assert!(e.is(i32::descriptor()));
    }

    #[test]
    fn absorbs_first_insertion_without_widening() {
        // spec.md §8 scenario 3, first half.
        let mut e: Vec<Global> = Vec::new_in(Global);
        e.insert(Position::Back, 7i32).unwrap();
        assert!(e.is(i32::descriptor()));
        assert_eq!(e.len(), 1);
        assert!(!e.is_deep());
    }

    #[test]
    fn widens_on_mismatched_second_insertion() {
        // spec.md §8 scenario 3, second half: a differently-typed push
        // must deepen, and the final count covers both elements.
        let mut e: Vec<Global> = Vec::new_in(Global);
        e.insert(Position::Back, 7i32).unwrap();
        e.insert(Position::Back, ::std::string::String::from("hello"))
            .unwrap();
        assert_eq!(e.len(), 2);
        assert!(e.is_deep());
    }

    #[test]
    fn constrained_vec_rejects_a_mismatched_insertion() {
        let mut e: Vec<Global> = Vec::new_in(Global);
        e.insert(Position::Back, 7i32).unwrap();
        e.constrain().unwrap();
        assert!(e.is_type_constrained());
        let err = e
            .insert(Position::Back, ::std::string::String::from("hello"))
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::TypeMismatch { .. }));
        assert_eq!(e.len(), 1);
        assert!(!e.is_deep());
    }

    #[test]
    fn try_into_typed_rejects_mismatched_type() {
        let mut e: Vec<Global> = Vec::new_in(Global);
        e.insert(Position::Back, 7i32).unwrap();
        let e = e
            .try_into_typed::<::std::string::String>()
            .unwrap_err();
        let typed = e.try_into_typed::<i32>().unwrap();
        assert_eq!(typed.len(), 1);
    }
}
