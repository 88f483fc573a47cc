// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! [`Block`]: the fixed-layout descriptor that underlies every container
//! in this crate (`spec.md` §4.4).
//!
//! A `Block` is a data pointer, an element count, a reserved capacity, an
//! element-type descriptor, an allocation back-pointer, and state flags.
//! Every typed container ([`TVec`](crate::vec::typed::TVec),
//! [`TMap`](crate::map::TMap), ...) stamps a compile-time
//! [`TypeDescriptor`](crate::rtti::TypeDescriptor) into a `Block` and
//! delegates all mutation to it; every erased container
//! ([`Vec`](crate::vec::erased::Vec), ...) routes straight through.

pub mod state;

use core::ptr::NonNull;

use crate::alloc_ref::{Allocation, BlockAllocator, OwnerTag};
use crate::core_compat::alloc::{Allocator, Global};
use crate::error::{Error, Result};
use crate::intent::IntentTag;
use crate::rtti::{ElementOps, TypeDescriptor, TypeFlags};

pub use state::BlockState;

const MINIMAL_ALLOCATION: usize = 8;

/// Where an insertion or removal targets within a `Block`'s element
/// sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Position {
    Front,
    Back,
    Offset(usize),
}

impl Position {
    fn resolve(self, count: usize) -> usize {
        match self {
            Position::Front => 0,
            Position::Back => count,
            Position::Offset(k) => k,
        }
    }
}

/// The fixed-layout container header. See the module documentation and
/// `spec.md` §3/§4.4.
pub struct Block<A: Allocator = Global> {
    data: Option<NonNull<u8>>,
    count: usize,
    reserved: usize,
    ty: Option<&'static TypeDescriptor>,
    entry: Option<NonNull<Allocation>>,
    state: BlockState,
    alloc: A,
}

impl<A: Allocator + Default> Default for Block<A> {
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

impl<A: Allocator> Block<A> {
    /// An empty, untyped block with no data and no allocation
    /// ("unallocated-untyped", `spec.md` §4.4's state machine).
    pub fn new_in(alloc: A) -> Self {
        Self {
            data: None,
            count: 0,
            reserved: 0,
            ty: None,
            entry: None,
            state: BlockState::empty(),
            alloc,
        }
    }

    /// An empty block pinned to `ty` but still unallocated
    /// ("unallocated-typed").
    pub fn with_type_in(ty: &'static TypeDescriptor, alloc: A) -> Self {
        Self {
            data: None,
            count: 0,
            reserved: 0,
            ty: Some(ty),
            entry: None,
            state: BlockState::TYPED,
            alloc,
        }
    }

    /// An empty block pinned to `ty` by a *typed* constructor (`spec.md`
    /// §3: "`constrained` ... is inherited only from typed constructors").
    /// Unlike [`Block::with_type_in`], the type may never widen away, even
    /// on an otherwise-empty block — used by [`TVec`](crate::vec::typed::TVec),
    /// whose element type is fixed at compile time and must stay pinned
    /// even when viewed through its erased counterpart.
    pub fn with_type_constrained_in(ty: &'static TypeDescriptor, alloc: A) -> Self {
        Self {
            data: None,
            count: 0,
            reserved: 0,
            ty: Some(ty),
            entry: None,
            state: BlockState::TYPED | BlockState::CONSTRAINED,
            alloc,
        }
    }

    /// Pins the block's type permanently, matching `spec.md` §4.6's "can
    /// be type-pinned (constrained) or free-to-mutate" for erased
    /// containers. A no-op if already typed-and-constrained; fails if the
    /// block is untyped (nothing to pin yet).
    pub fn constrain(&mut self) -> Result<()> {
        if self.ty.is_none() {
            return Err(Error::AccessError);
        }
        self.state |= BlockState::CONSTRAINED;
        Ok(())
    }

    /// Wraps a borrowed (non-owned) memory window: a "static" block.
    /// `data` must remain valid for at least `count` elements of `ty`
    /// for the lifetime of this `Block`.
    ///
    /// # Safety
    /// The caller guarantees `data` is valid for `count * ty.stride`
    /// bytes for as long as the returned `Block` (or anything derived
    /// from it without calling [`Block::take_authority`]) is alive.
    pub unsafe fn from_static_in(
        ty: &'static TypeDescriptor,
        data: NonNull<u8>,
        count: usize,
        alloc: A,
    ) -> Self {
        Self {
            data: Some(data),
            count,
            reserved: count,
            ty: Some(ty),
            entry: None,
            state: BlockState::TYPED | BlockState::STATIC,
            alloc,
        }
    }

    #[must_use]
    pub fn get_type(&self) -> Option<&'static TypeDescriptor> {
        self.ty
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    #[must_use]
    pub fn state(&self) -> BlockState {
        self.state
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.entry.is_some()
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.state.contains(BlockState::STATIC)
    }

    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.state.contains(BlockState::CONSTANT)
    }

    #[must_use]
    pub fn is_untyped(&self) -> bool {
        self.ty.is_none()
    }

    #[must_use]
    pub fn is_type_constrained(&self) -> bool {
        self.state.contains(BlockState::CONSTRAINED)
    }

    #[must_use]
    pub fn is_deep(&self) -> bool {
        self.ty.is_some_and(TypeDescriptor::is_deep)
    }

    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.ty.is_some_and(TypeDescriptor::is_sparse)
    }

    #[must_use]
    pub fn use_count(&self) -> usize {
        // SAFETY: `self.entry`, when present, always points at a live
        // `Allocation` for as long as this `Block` exists.
        self.entry.map_or(0, |e| unsafe { e.as_ref().use_count() })
    }

    #[must_use]
    pub fn data_ptr(&self) -> Option<NonNull<u8>> {
        self.data
    }

    fn stride(&self) -> usize {
        self.ty.map_or(0, |t| t.stride)
    }

    /// Byte offset of element `index` within the data region.
    fn offset_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(self.data.is_some());
        // SAFETY: caller ensures `index <= self.reserved`; the resulting
        // pointer is only ever dereferenced after a further bounds check
        // against `self.count`.
        unsafe {
            self.data
                .unwrap_unchecked()
                .as_ptr()
                .add(index * self.stride())
        }
    }

    // ------------------------------------------------------------------
    // Typing
    // ------------------------------------------------------------------

    /// Pins the element type if currently untyped or compatible. On
    /// mismatch, widens to a common base type unless constrained.
    pub fn set_type(&mut self, ty: &'static TypeDescriptor) -> Result<()> {
        match self.ty {
            None => {
                self.ty = Some(ty);
                self.state |= BlockState::TYPED;
                Ok(())
            }
            Some(existing) if existing.is(ty) => Ok(()),
            Some(existing) if self.is_type_constrained() => Err(Error::TypeMismatch {
                expected: existing,
                found: ty,
            }),
            Some(_existing) => {
                // Widening to a common base: this core has no inheritance
                // graph of its own (spec.md §9's "is_exact" resolution),
                // so widening degrades to "no widening possible" unless
                // the block is still empty, in which case we simply
                // re-pin.
                if self.count == 0 {
                    self.ty = Some(ty);
                    Ok(())
                } else {
                    Err(Error::TypeMismatch {
                        expected: self.ty.unwrap(),
                        found: ty,
                    })
                }
            }
        }
    }

    /// Descriptor-identity relation (`spec.md` §9's `is`).
    #[must_use]
    pub fn is(&self, ty: &'static TypeDescriptor) -> bool {
        self.ty.is_some_and(|t| t.is(ty))
    }

    /// Identity-or-aliases relation (`is_similar`).
    #[must_use]
    pub fn is_similar(&self, ty: &'static TypeDescriptor) -> bool {
        self.ty.is_some_and(|t| t.is_similar(ty))
    }

    /// Identity, aliases, or base types (`is_exact`).
    #[must_use]
    pub fn is_exact(&self, ty: &'static TypeDescriptor) -> bool {
        self.ty.is_some_and(|t| t.is_exact(ty))
    }

    #[must_use]
    pub fn casts_to(&self, ty: &'static TypeDescriptor) -> bool {
        self.ty.is_some_and(|t| t.casts_to(ty))
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    fn require_mutable(&self) -> Result<()> {
        if self.is_constant() {
            Err(Error::AccessError)
        } else {
            Ok(())
        }
    }

    /// Acquires a new allocation sized for at least `request` elements.
    pub fn allocate_fresh(&mut self, request: usize) -> Result<()> {
        self.require_mutable()?;
        let ty = self.ty.ok_or(Error::AccessError)?;
        let request = request.max(MINIMAL_ALLOCATION);
        let bytes = request.checked_mul(ty.stride).ok_or(Error::Overflow)?;
        let alloc: Allocation = self
            .alloc
            .new_allocation(bytes, ty.align, OwnerTag::default())?;
        let data = alloc.data();
        let boxed = leak_allocation(alloc);
        self.entry = Some(boxed);
        self.data = Some(data);
        self.reserved = request;
        self.state.remove(BlockState::STATIC);
        Ok(())
    }

    /// Grows to at least `n` elements, moving existing content through
    /// the type's move-constructor.
    pub fn allocate_more(&mut self, n: usize) -> Result<()> {
        self.require_mutable()?;
        if n <= self.reserved {
            return Ok(());
        }
        let ty = self.ty.ok_or(Error::AccessError)?;
        let new_reserved = n.max(self.reserved.saturating_mul(2)).max(MINIMAL_ALLOCATION);
        let new_bytes = new_reserved.checked_mul(ty.stride).ok_or(Error::Overflow)?;

        match self.entry.take() {
            Some(entry) => {
                // SAFETY: `entry` was produced by `self.alloc`.
                let old_alloc = unsafe { reclaim_allocation(entry) };
                if old_alloc.use_count() == 1 {
                    let grown: Allocation = self.alloc.grow_allocation(old_alloc, new_bytes)?;
                    self.data = Some(grown.data());
                    self.entry = Some(leak_allocation(grown));
                } else {
                    // Shared: must not mutate in place. Allocate fresh and
                    // move-construct the live elements across, then drop
                    // our reference to the old allocation.
                    let fresh: Allocation =
                        self.alloc
                            .new_allocation(new_bytes, ty.align, OwnerTag::default())?;
                    let new_data = fresh.data();
                    if self.count > 0 {
                        // SAFETY: both ranges hold `self.count` valid,
                        // non-overlapping `ty`-typed elements.
                        unsafe {
                            (ty.ops.move_ctor)(
                                new_data.as_ptr(),
                                self.data.unwrap().as_ptr(),
                                self.count,
                            );
                        }
                    }
                    if old_alloc.free() {
                        // SAFETY: refcount just reached zero.
                        unsafe { self.alloc.free_allocation(&old_alloc) };
                    }
                    self.data = Some(new_data);
                    self.entry = Some(leak_allocation(fresh));
                }
            }
            None => {
                // Previously static or unallocated: allocate fresh and
                // copy-construct any borrowed content across (we do not
                // own the source, so we must not move out of it).
                let fresh: Allocation =
                    self.alloc
                        .new_allocation(new_bytes, ty.align, OwnerTag::default())?;
                let new_data = fresh.data();
                if self.count > 0 {
                    // SAFETY: both ranges hold `self.count` valid,
                    // non-overlapping `ty`-typed elements; the source is
                    // borrowed so we copy rather than move it.
                    unsafe {
                        (ty.ops.copy_ctor)(
                            new_data.as_ptr(),
                            self.data.unwrap().as_ptr(),
                            self.count,
                        );
                    }
                }
                self.data = Some(new_data);
                self.entry = Some(leak_allocation(fresh));
                self.state.remove(BlockState::STATIC);
            }
        }
        self.reserved = new_reserved;
        Ok(())
    }

    /// Shrinks to `n` elements, destroying any trailing elements beyond
    /// it. The underlying allocation's byte capacity is left as-is: only
    /// element lifetimes are affected (narrowing the allocation itself
    /// would require a move of every surviving element for no semantic
    /// benefit within a single-owner `Block`).
    pub fn allocate_less(&mut self, n: usize) -> Result<()> {
        self.require_mutable()?;
        if n >= self.count {
            return Ok(());
        }
        let ty = self.ty.ok_or(Error::AccessError)?;
        let tail = self.offset_ptr(n);
        // SAFETY: elements `[n, count)` are live and about to be dropped.
        unsafe { (ty.ops.dtor)(tail, self.count - n) };
        self.count = n;
        Ok(())
    }

    /// Converts a static (borrowed) block into an owned one by
    /// allocating and copying.
    pub fn take_authority(&mut self) -> Result<()> {
        if !self.is_static() {
            return Ok(());
        }
        let ty = self.ty.ok_or(Error::AccessError)?;
        let request = self.count.max(MINIMAL_ALLOCATION);
        let bytes = request.checked_mul(ty.stride).ok_or(Error::Overflow)?;
        let fresh: Allocation = self
            .alloc
            .new_allocation(bytes, ty.align, OwnerTag::default())?;
        let new_data = fresh.data();
        if self.count > 0 {
            // SAFETY: source is the borrowed window we were constructed
            // from, valid for `self.count` elements; we copy (not move)
            // since we never owned it.
            unsafe {
                (ty.ops.copy_ctor)(new_data.as_ptr(), self.data.unwrap().as_ptr(), self.count);
            }
        }
        self.data = Some(new_data);
        self.reserved = request;
        self.entry = Some(leak_allocation(fresh));
        self.state.remove(BlockState::STATIC);
        Ok(())
    }

    /// `allocate_more` without constructing anything into the new
    /// slots.
    pub fn reserve(&mut self, n: usize) -> Result<()> {
        self.allocate_more(n)
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Inserts `count` new elements at `pos`, constructed from `src`
    /// under `intent`. `src` must point at `count` valid elements of the
    /// block's type (or, if the block is untyped, `ty` supplies the type
    /// to pin first).
    ///
    /// # Safety
    /// `src` must be valid for `count` elements of `ty` (or the block's
    /// existing type); for `Move`/`Abandon` intents `src` must be
    /// writable (the source is left in a moved-from state as far as this
    /// function's caller is concerned).
    pub unsafe fn insert(
        &mut self,
        pos: Position,
        intent: IntentTag,
        ty: &'static TypeDescriptor,
        src: *mut u8,
        count: usize,
    ) -> Result<()> {
        self.require_mutable()?;
        if self.ty.is_none() {
            self.set_type(ty)?;
        } else if !self.is(ty) {
            if self.is_type_constrained() {
                return Err(Error::TypeMismatch {
                    expected: self.ty.unwrap(),
                    found: ty,
                });
            }
            self.set_type(ty)?;
        }
        let ty = self.ty.unwrap();

        let k = pos.resolve(self.count);
        debug_assert!(k <= self.count);
        let new_count = self.count.checked_add(count).ok_or(Error::Overflow)?;
        if new_count > self.reserved {
            self.allocate_more(new_count)?;
        }

        if k < self.count {
            // Shift the tail right by `count` slots: move-construct into
            // the uninitialized overhang, move-assign over the
            // overlapping region.
            let tail_len = self.count - k;
            let move_into_uninit = count.min(tail_len);
            let move_assign_len = tail_len - move_into_uninit;

            // Work right-to-left so source/destination never overlap
            // destructively for the construct step.
            let uninit_src = self.offset_ptr(k + tail_len - move_into_uninit);
            let uninit_dst = self.offset_ptr(k + tail_len - move_into_uninit + count);
            if move_into_uninit > 0 {
                // SAFETY: `uninit_dst..uninit_dst+move_into_uninit` is
                // reserved-but-uninitialized; source holds live elements
                // about to be logically moved away.
                unsafe { (ty.ops.move_ctor)(uninit_dst, uninit_src, move_into_uninit) };
            }
            if move_assign_len > 0 {
                let asgn_src = self.offset_ptr(k);
                let asgn_dst = self.offset_ptr(k + count);
                // SAFETY: both ranges are live, initialized elements;
                // assignment runs back-to-front implicitly via the
                // underlying per-index loop in `move_asgn`'s
                // implementation contract (elements do not alias across
                // indices since `count > 0`).
                unsafe { (ty.ops.move_asgn)(asgn_dst, asgn_src, move_assign_len) };
            }
        }

        let dst = self.offset_ptr(k);
        // SAFETY: `dst..dst+count` is reserved-but-uninitialized after
        // the shift above (or, if `k == self.count`, was always
        // uninitialized); `src` is valid for `count` elements per this
        // function's own safety contract.
        unsafe {
            match intent {
                IntentTag::Refer => (ty.ops.refer_ctor)(dst, src, count),
                IntentTag::Move => (ty.ops.move_ctor)(dst, src, count),
                IntentTag::Copy => (ty.ops.copy_ctor)(dst, src, count),
                IntentTag::Clone => (ty.ops.clone_ctor)(dst, src, count),
                IntentTag::Disown => (ty.ops.disown_ctor)(dst, src, count),
                IntentTag::Abandon => (ty.ops.abandon_ctor)(dst, src, count),
            }
        }
        self.count = new_count;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    /// Destroys `count` elements beginning at `offset` and shifts the
    /// tail left.
    pub fn remove(&mut self, offset: usize, count: usize) -> Result<()> {
        self.require_mutable()?;
        if self.is_static() {
            return Err(Error::AccessError);
        }
        let ty = self.ty.ok_or(Error::AccessError)?;
        let end = offset.checked_add(count).ok_or(Error::Overflow)?;
        debug_assert!(end <= self.count);

        let tail_len = self.count - end;
        // Only the first `overlap` destination slots of the shift are
        // still holding a not-yet-touched original element from the
        // removed range; every slot beyond that was already read out as
        // a source earlier in this same left-shift, so it holds a stale
        // duplicate rather than a live value by the time we'd reach it.
        // `move_asgn` must therefore run over exactly `overlap` elements
        // (dropping each destination once, correctly), never the whole
        // tail, or it would drop those stale duplicates a second time.
        let overlap = count.min(tail_len);
        if overlap > 0 {
            let src = self.offset_ptr(end);
            let dst = self.offset_ptr(offset);
            // SAFETY: `dst..dst+overlap` holds live, untouched elements
            // from the removed range `[offset, end)`; `move_asgn` drops
            // each before overwriting it with the corresponding live
            // tail element from `src`.
            unsafe { (ty.ops.move_asgn)(dst, src, overlap) };
        }
        for i in overlap..tail_len {
            let src = self.offset_ptr(end + i);
            let dst = self.offset_ptr(offset + i);
            // SAFETY: `dst` was already read as a source earlier in this
            // shift (`i >= overlap >= i - count`), so it holds a stale,
            // already-relocated duplicate rather than a live element;
            // overwriting it with `move_ctor` (construct, no drop) is
            // exactly "forget", not a leak. One element at a time keeps
            // this sound even though the overall tail range overlaps
            // itself under the constant `count` shift distance.
            unsafe { (ty.ops.move_ctor)(dst, src, 1) };
        }
        if count > tail_len {
            // The shift above only ever reaches `tail_len` destination
            // slots; when more elements are removed than remain in the
            // tail, the surplus at the end of the removed range is never
            // touched by it and must be destroyed directly.
            let surplus = self.offset_ptr(offset + tail_len);
            // SAFETY: `[offset+tail_len, end)` are live, untouched
            // elements of the removed range.
            unsafe { (ty.ops.dtor)(surplus, count - tail_len) };
        }
        self.count -= count;
        Ok(())
    }

    /// Destroys all elements but keeps the allocation.
    pub fn clear(&mut self) {
        if self.count == 0 {
            return;
        }
        if let (Some(ty), Some(data)) = (self.ty, self.data) {
            // SAFETY: `[0, count)` are live elements in an owned or
            // static block; a static block's elements are caller-owned,
            // but per spec.md §7 mutating a static block fails at the
            // `require_mutable`/`is_static` boundary for `remove` — here
            // `clear` on a static block only makes sense for owned
            // blocks, so we gate it.
            if !self.is_static() {
                unsafe { (ty.ops.dtor)(data.as_ptr(), self.count) };
            }
        }
        self.count = 0;
    }

    /// Destroys all elements and releases the allocation.
    pub fn reset(&mut self) {
        self.clear();
        if let Some(entry) = self.entry.take() {
            // SAFETY: `entry` was produced by `self.alloc`.
            let alloc = unsafe { reclaim_allocation(entry) };
            if alloc.free() {
                // SAFETY: refcount just reached zero.
                unsafe { self.alloc.free_allocation(&alloc) };
            }
        }
        self.data = None;
        self.reserved = 0;
        self.state.remove(BlockState::STATIC);
    }

    // ------------------------------------------------------------------
    // Comparison
    // ------------------------------------------------------------------

    /// Structural equality: matching type, matching count, and pairwise
    /// element equality (a byte comparison when both sides are POD and
    /// strides match, element-by-element via the type's comparer
    /// otherwise).
    #[must_use]
    pub fn compare(&self, other: &Block<A>) -> bool {
        let (Some(a), Some(b)) = (self.ty, other.ty) else {
            return self.count == 0 && other.count == 0;
        };
        if !a.is_similar(b) || self.count != other.count {
            return false;
        }
        if self.count == 0 {
            return true;
        }
        let (Some(da), Some(db)) = (self.data, other.data) else {
            return false;
        };
        if a.is_pod() && a.stride == b.stride {
            // SAFETY: both ranges hold `count * stride` initialized
            // bytes of POD data.
            let bytes = self.count * a.stride;
            return unsafe {
                core::slice::from_raw_parts(da.as_ptr(), bytes)
                    == core::slice::from_raw_parts(db.as_ptr(), bytes)
            };
        }
        for i in 0..self.count {
            let pa = self.offset_ptr(i);
            let pb = other.offset_ptr(i);
            // SAFETY: `i < count` on both sides.
            if !unsafe { (a.ops.eq)(pa, pb) } {
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------

    /// Visits every element's raw pointer in forward order. Typed
    /// wrappers ([`TVec`](crate::vec::typed::TVec)) build a typed
    /// `Iterator` on top of this.
    pub fn for_each_raw(&self, mut f: impl FnMut(*const u8)) {
        let Some(data) = self.data else { return };
        let stride = self.stride();
        for i in 0..self.count {
            // SAFETY: `i < self.count`, so this offset is within the
            // live element region.
            f(unsafe { data.as_ptr().add(i * stride) });
        }
    }

    /// Visits every element's raw pointer in reverse order.
    pub fn for_each_raw_rev(&self, mut f: impl FnMut(*const u8)) {
        let Some(data) = self.data else { return };
        let stride = self.stride();
        for i in (0..self.count).rev() {
            // SAFETY: see `for_each_raw`.
            f(unsafe { data.as_ptr().add(i * stride) });
        }
    }
}

// ---------------------------------------------------------------------
// Deep nesting: `Block<Global>` registers itself as an ordinary element
// type (flagged `DEEP`) so a block can itself hold blocks as elements.
// Scoped to the default allocator: a generic `impl<A> ElementOps for
// Block<A>` would need a per-`A` static cache, and a `static` declared
// inside a generic function is not monomorphized per instantiation, so
// every `A` would collide on one shared descriptor. See `DESIGN.md`.
// ---------------------------------------------------------------------

impl Clone for Block<Global> {
    fn clone(&self) -> Self {
        let mut out = Block::new_in(Global);
        let Some(ty) = self.ty else { return out };
        out.ty = Some(ty);
        out.state = BlockState::TYPED;
        if self.count > 0 {
            out.allocate_fresh(self.count)
                .expect("cloning an allocated block should not fail to allocate");
            // SAFETY: `self.data` holds `self.count` live elements of
            // `ty`; `out`'s freshly allocated storage is uninitialized.
            unsafe {
                (ty.ops.clone_ctor)(
                    out.data.unwrap().as_ptr(),
                    self.data.unwrap().as_ptr(),
                    self.count,
                );
            }
            out.count = self.count;
        }
        out
    }
}

impl PartialEq for Block<Global> {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other)
    }
}

impl Eq for Block<Global> {}

impl core::hash::Hash for Block<Global> {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        // Only the element count backs the hash (documented in
        // `DESIGN.md`): hashing every element would require recursing
        // through the erased `TypeOps::hash` of each child, which is
        // already exercised per-element by the table itself rather than
        // by a container-level `Hash` impl. `Eq` consistency only
        // requires equal values to hash equal, which this satisfies
        // (equal blocks always have equal counts).
        self.count.hash(state);
    }
}

impl ElementOps for Block<Global> {
    fn descriptor() -> &'static TypeDescriptor {
        static OPS: crate::rtti::__OnceCellOps<Block<Global>> =
            crate::rtti::__OnceCellOps::new();
        static DESC: crate::rtti::__OnceCellDesc<Block<Global>> =
            crate::rtti::__OnceCellDesc::new();
        let ops = OPS.get_or_init(crate::rtti::__build_ops::<Block<Global>>);
        DESC.get_or_init(|| TypeDescriptor {
            stride: core::mem::size_of::<Block<Global>>(),
            align: core::mem::align_of::<Block<Global>>(),
            flags: crate::rtti::__default_flags::<Block<Global>>() | TypeFlags::DEEP,
            token: "Block",
            ops,
        })
    }
}

/// The two policy knobs of smart-push (`spec.md` §4.4): whether a
/// same-typed deep element may be spliced in directly rather than
/// wrapped as a new nested child, and whether deepening (wrapping the
/// current contents alongside the new element in a fresh outer block)
/// is permitted at all.
#[derive(Clone, Copy, Debug)]
pub struct SmartPushOptions {
    pub allow_concat: bool,
    pub allow_deepen: bool,
}

impl Default for SmartPushOptions {
    fn default() -> Self {
        Self {
            allow_concat: true,
            allow_deepen: true,
        }
    }
}

/// Iteration policy for [`Block::for_each`]/[`Block::for_each_deep`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ForEachOptions {
    pub reverse: bool,
    /// When set, a deep element is never itself handed to a callable —
    /// only its (recursively expanded) leaves are.
    pub skip_intermediate: bool,
}

/// Tries a value against a callback, reporting whether it matched
/// (`spec.md` §4.4: "the first matching overload is selected at each
/// call site"). Implemented for tuples of `ForEachCallable`s, tried left
/// to right, mirroring a multi-overload callable set.
pub trait ForEachCallable {
    fn try_call(&mut self, ty: &'static TypeDescriptor, ptr: *const u8) -> bool;
}

/// A single typed callback, matching elements whose descriptor is
/// `is_exact` to `T`'s.
pub struct Typed<T, F>(pub F, core::marker::PhantomData<fn(&T)>);

impl<T, F> Typed<T, F> {
    pub fn new(f: F) -> Self {
        Self(f, core::marker::PhantomData)
    }
}

impl<T: ElementOps, F: FnMut(&T)> ForEachCallable for Typed<T, F> {
    fn try_call(&mut self, ty: &'static TypeDescriptor, ptr: *const u8) -> bool {
        if !ty.is_exact(T::descriptor()) {
            return false;
        }
        // SAFETY: the type check above confirms `ptr` points at a live
        // `T` (descriptors are only `is_exact` when layouts agree).
        (self.0)(unsafe { &*ptr.cast::<T>() });
        true
    }
}

macro_rules! impl_for_each_tuple {
    ($($name:ident),+) => {
        impl<$($name: ForEachCallable),+> ForEachCallable for ($($name,)+) {
            #[allow(non_snake_case)]
            fn try_call(&mut self, ty: &'static TypeDescriptor, ptr: *const u8) -> bool {
                let ($($name,)+) = self;
                $(if $name.try_call(ty, ptr) {
                    return true;
                })+
                false
            }
        }
    };
}
impl_for_each_tuple!(A);
impl_for_each_tuple!(A, B);
impl_for_each_tuple!(A, B, C);
impl_for_each_tuple!(A, B, C, D);

impl<A: Allocator> Block<A> {
    /// Visits every element, trying `callables` in order; when an
    /// element's type doesn't match any callable and the block is deep,
    /// recurses into that element's own children.
    pub fn for_each(&self, callables: &mut impl ForEachCallable, opts: ForEachOptions) {
        self.for_each_impl(callables, opts, false);
    }

    /// Like [`Block::for_each`], but always recurses into deep elements
    /// regardless of whether a callable already handled them.
    pub fn for_each_deep(&self, callables: &mut impl ForEachCallable, opts: ForEachOptions) {
        self.for_each_impl(callables, opts, true);
    }

    fn for_each_impl(
        &self,
        callables: &mut impl ForEachCallable,
        opts: ForEachOptions,
        force_deep: bool,
    ) {
        let (Some(ty), Some(_)) = (self.ty, self.data) else {
            return;
        };
        let stride = self.stride();
        if opts.reverse {
            for i in (0..self.count).rev() {
                self.visit_one(i, stride, ty, callables, opts, force_deep);
            }
        } else {
            for i in 0..self.count {
                self.visit_one(i, stride, ty, callables, opts, force_deep);
            }
        }
    }

    fn visit_one(
        &self,
        index: usize,
        stride: usize,
        ty: &'static TypeDescriptor,
        callables: &mut impl ForEachCallable,
        opts: ForEachOptions,
        force_deep: bool,
    ) {
        // SAFETY: `index < self.count`.
        let ptr = (unsafe { self.data.unwrap_unchecked().as_ptr().add(index * stride) })
            as *const u8;
        let is_deep = ty.is_deep();
        let handled = if is_deep && opts.skip_intermediate {
            false
        } else {
            callables.try_call(ty, ptr)
        };
        if is_deep && (force_deep || !handled) {
            // SAFETY: the only descriptor ever flagged `DEEP` in this
            // crate describes `Block<Global>` (see the note above).
            let child: &Block<Global> = unsafe { &*ptr.cast::<Block<Global>>() };
            child.for_each_impl(callables, opts, force_deep);
        }
    }
}

impl Block<Global> {
    fn element_descriptor() -> &'static TypeDescriptor {
        <Block<Global> as ElementOps>::descriptor()
    }

    /// Wraps the current contents in a fresh outer deep block, so the
    /// old contents become a single child (`spec.md` §4.4's "deepen").
    /// A no-op if already deep.
    fn deepen(&mut self) -> Result<()> {
        if self.is_deep() {
            return Ok(());
        }
        let old = core::mem::replace(self, Block::with_type_in(Self::element_descriptor(), Global));
        if old.get_type().is_some() {
            let mut child = old;
            // SAFETY: `&mut child` is a single, valid, live
            // `Block<Global>` being moved into `self`, which has just
            // been re-typed as deep above.
            unsafe {
                self.insert(
                    Position::Back,
                    IntentTag::Move,
                    Self::element_descriptor(),
                    core::ptr::addr_of_mut!(child).cast(),
                    1,
                )?;
            }
            core::mem::forget(child);
        }
        Ok(())
    }

    /// The policy layer above [`Block::insert`] (`spec.md` §4.4's
    /// "Smart-push"): appends directly when types already match (or the
    /// block is empty and unconstrained); splices a same-deep-typed
    /// source's own children in directly when `opts.allow_concat`;
    /// otherwise deepens and appends the new element as a single nested
    /// child when `opts.allow_deepen`.
    ///
    /// Per the deepening Open Question in `spec.md`, heterogeneous deep
    /// blocks are never merged: deepening always wraps, never splices,
    /// so two different deep-typed sources are kept as distinct nested
    /// children.
    ///
    /// # Safety
    /// Same contract as [`Block::insert`].
    pub unsafe fn smart_push(
        &mut self,
        pos: Position,
        intent: IntentTag,
        ty: &'static TypeDescriptor,
        src: *mut u8,
        count: usize,
        opts: SmartPushOptions,
    ) -> Result<()> {
        let fits = self.ty.is_none()
            || self.is(ty)
            || (self.count == 0 && !self.is_type_constrained());
        if fits {
            // SAFETY: forwarded from this function's own contract.
            return unsafe { self.insert(pos, intent, ty, src, count) };
        }

        if self.is_type_constrained() {
            // A constrained block may never widen, by concatenation,
            // deepening, or otherwise (`spec.md` §4.4's `set_type`: "if
            // constrained, fails").
            return Err(Error::TypeMismatch {
                expected: self.ty.unwrap(),
                found: ty,
            });
        }

        if self.is_deep() && opts.allow_concat && ty.is_deep() {
            // Splice the source's own children in directly rather than
            // nesting one level deeper.
            for i in 0..count {
                // SAFETY: `src` holds `count` live `Block<Global>`
                // values (it is `ty.is_deep()`, and the only deep
                // descriptor in this crate describes `Block<Global>`).
                let child: &Block<Global> = unsafe { &*src.cast::<Block<Global>>().add(i) };
                if let (Some(child_ty), Some(child_data)) = (child.get_type(), child.data_ptr()) {
                    // SAFETY: forwarded from this function's contract;
                    // `child_data` is valid for `child.count()` elements
                    // of `child_ty`.
                    unsafe {
                        self.insert(pos, intent, child_ty, child_data.as_ptr(), child.count())?;
                    }
                }
            }
            return Ok(());
        }

        if !opts.allow_deepen {
            return Err(Error::TypeMismatch {
                expected: self.ty.unwrap(),
                found: ty,
            });
        }

        self.deepen()?;
        let mut wrapped = Block::with_type_in(ty, Global);
        // SAFETY: forwarded from this function's contract: builds a
        // standalone single-element child holding the incoming payload
        // under `intent`.
        unsafe { wrapped.insert(Position::Back, intent, ty, src, count)? };
        // SAFETY: `&mut wrapped` is a single, valid, live `Block<Global>`
        // being moved into `self`, now deep-typed by `deepen` above.
        unsafe {
            self.insert(
                pos,
                IntentTag::Move,
                Self::element_descriptor(),
                core::ptr::addr_of_mut!(wrapped).cast(),
                1,
            )?;
        }
        core::mem::forget(wrapped);
        Ok(())
    }

    /// Counts this block's leaf elements, recursing into deep children
    /// rather than counting nested blocks themselves as one element
    /// each. A non-deep block's leaf count is just its element count.
    fn leaf_count(&self) -> usize {
        if !self.is_deep() {
            return self.count;
        }
        let Some(data) = self.data else { return 0 };
        let stride = self.stride();
        (0..self.count)
            .map(|i| {
                // SAFETY: `i < self.count`; the only descriptor ever
                // flagged `DEEP` in this crate describes `Block<Global>`.
                let child: &Block<Global> =
                    unsafe { &*data.as_ptr().add(i * stride).cast::<Block<Global>>() };
                child.leaf_count()
            })
            .sum()
    }

    /// Navigates into nested deep children to remove the leaf at
    /// `absolute_deep_index` among this block's flattened elements
    /// (`spec.md` §4.4's `remove_index_deep`). A non-deep block simply
    /// forwards to [`Block::remove`].
    pub fn remove_index_deep(&mut self, absolute_deep_index: usize) -> Result<()> {
        if !self.is_deep() {
            return self.remove(absolute_deep_index, 1);
        }
        self.require_mutable()?;
        let stride = self.stride();
        let Some(data) = self.data else {
            return Err(Error::AccessError);
        };
        let mut remaining = absolute_deep_index;
        for i in 0..self.count {
            // SAFETY: `i < self.count`; the only descriptor ever
            // flagged `DEEP` in this crate describes `Block<Global>`.
            let child: &mut Block<Global> =
                unsafe { &mut *data.as_ptr().add(i * stride).cast::<Block<Global>>() };
            let leaves = child.leaf_count();
            if remaining < leaves {
                return child.remove_index_deep(remaining);
            }
            remaining -= leaves;
        }
        Err(Error::AccessError)
    }
}

/// Central ownership-transfer algorithm (`spec.md` §4.4's
/// `block_transfer<TO>`): builds a new `Block` from `source` under
/// `intent`, applying the intent's keep/reset rules to the header and
/// its refcount effect to the allocation, and zeroing `source` where
/// move/abandon semantics dictate.
pub fn block_transfer<A: Allocator + Clone>(
    source: &mut Block<A>,
    intent: IntentTag,
) -> Result<Block<A>> {
    let mut out = Block {
        data: source.data,
        count: source.count,
        reserved: source.reserved,
        ty: source.ty,
        entry: source.entry,
        state: source.state,
        alloc: source.alloc.clone(),
    };

    match intent {
        IntentTag::Refer => {
            if let Some(entry) = out.entry {
                // SAFETY: `entry` is a live `Allocation` of `source`'s.
                unsafe { entry.as_ref().keep() };
            }
        }
        IntentTag::Disown => {
            out.entry = None;
            out.state |= BlockState::STATIC;
        }
        IntentTag::Move | IntentTag::Abandon => {
            source.data = None;
            source.count = 0;
            source.reserved = 0;
            source.entry = None;
            if intent == IntentTag::Move {
                // "source becomes empty-typed" (`spec.md` §4.3's Move
                // row): the type stays pinned, landing `source` in the
                // "unallocated-typed" state from §4.4's state machine,
                // not reverting it to untyped.
                source.state = if source.ty.is_some() {
                    BlockState::TYPED
                } else {
                    BlockState::empty()
                };
            }
            // `Abandon` leaves `source.ty`/state largely in place (it is
            // "trivially destructible but unspecified") but its data
            // pointer is already cleared above so `Drop` is a no-op.
        }
        IntentTag::Copy | IntentTag::Clone => {
            // Handled by the caller via `insert`/typed constructors,
            // since copy/clone genuinely need per-element construction
            // into freshly allocated memory rather than a header-level
            // transfer; `block_transfer` only governs the four intents
            // that move the *whole allocation* rather than its contents.
            return Err(Error::IntentUnsupported);
        }
    }

    out.state = out.state.compose(BlockState::empty());
    Ok(out)
}

impl<A: Allocator> Drop for Block<A> {
    fn drop(&mut self) {
        self.reset();
    }
}

fn leak_allocation(alloc: Allocation) -> NonNull<Allocation> {
    // SAFETY: `Box::leak`-style: we hand out a raw pointer and take over
    // its lifetime management manually via `entry`/`reclaim_allocation`.
    let boxed = alloc_box(alloc);
    NonNull::from(alloc_box_leak(boxed))
}

// A minimal manual "box" for `Allocation` that does not itself pull in
// an allocator dependency cycle (the `Allocation` header must not live
// inside memory it itself accounts for). Backed by `std`/`alloc`'s global
// allocator via `core_compat::boxed::Box` with the crate's default
// `Global` allocator, independent of the `Block`'s own `A`.
fn alloc_box(alloc: Allocation) -> crate::core_compat::boxed::Box<Allocation> {
    crate::core_compat::boxed::Box::new(alloc)
}

fn alloc_box_leak(b: crate::core_compat::boxed::Box<Allocation>) -> &'static mut Allocation {
    crate::core_compat::boxed::Box::leak(b)
}

/// # Safety
/// `entry` must have been produced by [`leak_allocation`] and not yet
/// reclaimed.
unsafe fn reclaim_allocation(entry: NonNull<Allocation>) -> Allocation {
    // SAFETY: forwarded from caller contract; reconstructs the `Box` that
    // `leak_allocation` leaked and immediately unwraps it.
    let boxed = unsafe { crate::core_compat::boxed::Box::from_raw(entry.as_ptr()) };
    *boxed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtti::ElementOps;

    fn i32_ty() -> &'static TypeDescriptor {
        i32::descriptor()
    }

    fn push_i32(block: &mut Block, mut value: i32) {
        // SAFETY: `&mut value` is valid for one `i32`; intent is `Move`,
        // which per our `TypeOps::move_ctor` for `i32` is just a byte
        // copy (no destructor runs on the stack-local `value`, which is
        // fine since `i32` is `Copy`).
        unsafe {
            block
                .insert(
                    Position::Back,
                    IntentTag::Move,
                    i32_ty(),
                    (&mut value as *mut i32).cast(),
                    1,
                )
                .unwrap();
        }
    }

    fn push_string(block: &mut Block, value: &str) {
        let mut s = ::std::string::String::from(value);
        // SAFETY: inserting a single valid `String`; `Move` transfers
        // ownership into `block`, so `s` must not be dropped afterward.
        unsafe {
            block
                .insert(
                    Position::Back,
                    IntentTag::Move,
                    <::std::string::String as ElementOps>::descriptor(),
                    (&mut s as *mut ::std::string::String).cast(),
                    1,
                )
                .unwrap();
        }
        core::mem::forget(s);
    }

    fn collect_strings(block: &Block) -> crate::core_compat::vec::Vec<::std::string::String> {
        let mut collected = crate::core_compat::vec::Vec::new_in(Global);
        block.for_each_raw(|p| {
            // SAFETY: `p` points at a live `String` within `block`.
            collected.push(unsafe { (*p.cast::<::std::string::String>()).clone() });
        });
        collected
    }

    #[test]
    fn remove_overlapping_tail_drops_each_non_pod_element_exactly_once() {
        // Regression test for a double-drop/use-after-free: removing a
        // range shorter than the remaining tail means the left-shift's
        // destination range extends past the removed range and overlaps
        // its own source range (`tail_len > count`). `String`'s
        // destructor frees a heap buffer, so every slot must be dropped
        // exactly once.
        let mut block: Block = Block::new_in(Global);
        for v in ["a", "b", "c", "d", "e"] {
            push_string(&mut block, v);
        }
        block.remove(1, 1).unwrap();
        assert_eq!(collect_strings(&block), ["a", "c", "d", "e"]);
        assert_eq!(block.count(), 4);
        block.reset();
    }

    #[test]
    fn remove_surplus_beyond_tail_drops_every_removed_element() {
        // Regression test: removing more elements than remain in the
        // tail (`count > tail_len`) leaves a surplus of removed elements
        // the left-shift never reaches; they must still be destroyed
        // directly rather than leaked.
        let mut block: Block = Block::new_in(Global);
        for v in ["a", "b", "c", "d", "e"] {
            push_string(&mut block, v);
        }
        block.remove(1, 3).unwrap();
        assert_eq!(collect_strings(&block), ["a", "e"]);
        assert_eq!(block.count(), 2);
        block.reset();
    }

    #[test]
    fn insert_and_remove_preserve_sequence() {
        let mut block: Block = Block::new_in(Global);
        for v in [1, 2, 3, 4, 5] {
            push_i32(&mut block, v);
        }
        assert_eq!(block.count(), 5);

        let mut six = 6i32;
        // SAFETY: inserting a single valid `i32` at offset 3.
        unsafe {
            block
                .insert(
                    Position::Offset(3),
                    IntentTag::Move,
                    i32_ty(),
                    (&mut six as *mut i32).cast(),
                    1,
                )
                .unwrap();
        }
        let mut collected = alloc_vec();
        block.for_each_raw(|p| {
            // SAFETY: `p` points at a live `i32` within `block`.
            collected.push(unsafe { *p.cast::<i32>() });
        });
        assert_eq!(collected, [1, 2, 3, 6, 4, 5]);

        block.remove(1, 2).unwrap();
        let mut collected = alloc_vec();
        block.for_each_raw(|p| {
            // SAFETY: see above.
            collected.push(unsafe { *p.cast::<i32>() });
        });
        assert_eq!(collected, [1, 6, 4, 5]);
        assert_eq!(block.count(), 4);
        assert!(block.reserved() >= 4);
        assert_eq!(block.use_count(), 1);
    }

    #[test]
    fn clear_is_idempotent() {
        let mut block: Block = Block::new_in(Global);
        push_i32(&mut block, 1);
        block.clear();
        block.clear();
        assert_eq!(block.count(), 0);
    }

    #[test]
    fn reset_on_already_reset_block_is_noop() {
        let mut block: Block = Block::new_in(Global);
        block.reset();
        block.reset();
        assert!(!block.is_allocated());
        assert_eq!(block.count(), 0);
    }

    #[test]
    fn refer_transfer_shares_use_count() {
        let mut a: Block = Block::new_in(Global);
        push_i32(&mut a, 10);
        push_i32(&mut a, 20);

        let mut a_for_refer = Block {
            data: a.data,
            count: a.count,
            reserved: a.reserved,
            ty: a.ty,
            entry: a.entry,
            state: a.state,
            alloc: Global,
        };
        let b = block_transfer(&mut a_for_refer, IntentTag::Refer).unwrap();
        // `a_for_refer` is a bit-identical aliasing header to `a`; both
        // "sides" plus `b` observe the same, now-doubled refcount.
        assert_eq!(a.use_count(), 2);
        assert_eq!(b.use_count(), 2);
        core::mem::forget(a_for_refer);
    }

    #[test]
    fn move_transfer_leaves_source_empty_but_typed() {
        // spec.md §4.3: Move's refcount-effect column says "source becomes
        // empty-typed" — the type stays pinned (landing in the
        // "unallocated-typed" state of §4.4), unlike a full reset.
        let mut a: Block = Block::new_in(Global);
        push_i32(&mut a, 10);

        let b = block_transfer(&mut a, IntentTag::Move).unwrap();
        assert_eq!(b.count(), 1);
        assert!(a.is_empty());
        assert!(!a.is_untyped());
        assert!(a.is(i32::descriptor()));
    }

    #[test]
    fn smart_push_appends_when_types_match() {
        let mut block: Block<Global> = Block::new_in(Global);
        push_i32(&mut block, 1);
        let mut two = 2i32;
        // SAFETY: inserting a single valid `i32`.
        unsafe {
            block
                .smart_push(
                    Position::Back,
                    IntentTag::Move,
                    i32_ty(),
                    (&mut two as *mut i32).cast(),
                    1,
                    SmartPushOptions::default(),
                )
                .unwrap();
        }
        assert_eq!(block.count(), 2);
        assert!(!block.is_deep());
    }

    #[test]
    fn smart_push_deepens_on_type_mismatch() {
        // `spec.md`'s erased-absorption scenario: an `i32`-typed block
        // receiving a differently-typed push must widen by wrapping
        // both the old and new contents as children of a fresh deep
        // block.
        let mut block: Block<Global> = Block::new_in(Global);
        push_i32(&mut block, 7);

        let mut text = ::std::string::String::from("hello");
        // SAFETY: inserting a single valid `String`.
        unsafe {
            block
                .smart_push(
                    Position::Back,
                    IntentTag::Move,
                    <::std::string::String as ElementOps>::descriptor(),
                    (&mut text as *mut ::std::string::String).cast(),
                    1,
                    SmartPushOptions::default(),
                )
                .unwrap();
        }
        assert!(block.is_deep());
        assert_eq!(block.count(), 2);
        core::mem::forget(text);
    }

    #[test]
    fn for_each_recurses_into_deep_children() {
        let mut outer: Block<Global> = Block::new_in(Global);
        outer.deepen().unwrap();

        let mut inner: Block<Global> = Block::new_in(Global);
        push_i32(&mut inner, 1);
        push_i32(&mut inner, 2);
        // SAFETY: moving a single valid `Block<Global>` child in.
        unsafe {
            outer
                .insert(
                    Position::Back,
                    IntentTag::Move,
                    Block::<Global>::element_descriptor(),
                    core::ptr::addr_of_mut!(inner).cast(),
                    1,
                )
                .unwrap();
        }
        core::mem::forget(inner);

        let mut seen = alloc_vec();
        let mut callable = Typed::<i32, _>::new(|v: &i32| seen.push(*v));
        outer.for_each(&mut callable, ForEachOptions::default());
        assert_eq!(seen, [1, 2]);
    }

    #[test]
    fn remove_index_deep_navigates_into_children() {
        // Two deep children, each holding two leaves: [ [1, 2], [3, 4] ].
        // Absolute leaf index 2 is the first element of the second child.
        let mut outer: Block<Global> = Block::new_in(Global);
        outer.deepen().unwrap();

        for pair in [[1, 2], [3, 4]] {
            let mut child: Block<Global> = Block::new_in(Global);
            push_i32(&mut child, pair[0]);
            push_i32(&mut child, pair[1]);
            // SAFETY: moving a single valid `Block<Global>` child in.
            unsafe {
                outer
                    .insert(
                        Position::Back,
                        IntentTag::Move,
                        Block::<Global>::element_descriptor(),
                        core::ptr::addr_of_mut!(child).cast(),
                        1,
                    )
                    .unwrap();
            }
            core::mem::forget(child);
        }

        outer.remove_index_deep(2).unwrap();

        let mut seen = alloc_vec();
        let mut callable = Typed::<i32, _>::new(|v: &i32| seen.push(*v));
        outer.for_each(&mut callable, ForEachOptions::default());
        assert_eq!(seen, [1, 2, 4]);
    }

    fn alloc_vec() -> crate::core_compat::vec::Vec<i32> {
        crate::core_compat::vec::Vec::new_in(Global)
    }

    #[test]
    fn constrained_block_rejects_widening_instead_of_deepening() {
        let mut block: Block<Global> = Block::with_type_constrained_in(i32_ty(), Global);
        push_i32(&mut block, 1);

        let mut text = ::std::string::String::from("hello");
        // SAFETY: inserting a single valid `String` into a block whose
        // element type is `i32` and constrained; expected to fail before
        // any mutation occurs.
        let result = unsafe {
            block.smart_push(
                Position::Back,
                IntentTag::Move,
                <::std::string::String as ElementOps>::descriptor(),
                (&mut text as *mut ::std::string::String).cast(),
                1,
                SmartPushOptions::default(),
            )
        };
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
        assert!(!block.is_deep());
        assert_eq!(block.count(), 1);
    }

    #[test]
    fn constrain_pins_an_already_typed_block() {
        let mut block: Block<Global> = Block::new_in(Global);
        assert!(block.constrain().is_err());
        push_i32(&mut block, 1);
        block.constrain().unwrap();
        assert!(block.is_type_constrained());
    }
}
