// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The refcounted heap header that precedes every owned [`Block`](crate::block::Block)'s
//! element region, and the allocator interface the core consumes (`spec.md`
//! §4.2, §6).
//!
//! A `Block` references an [`Allocation`] iff it owns its memory; static
//! (borrowed) blocks hold a null allocation pointer but a non-null data
//! pointer. The core never releases an allocation whose refcount is
//! non-zero.

use core::ptr::NonNull;

use crate::core_compat::alloc::{AllocError, Allocator, Layout};
use crate::error::{Error, Result};

/// A tag identifying which allocator/pool produced an [`Allocation`], used
/// only for diagnostics — the core never dispatches on it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OwnerTag(pub u32);

/// Refcount storage backend.
///
/// Single-threaded-per-container is the default posture of `spec.md` §5:
/// "no thread safety of individual containers beyond the refcount... the
/// refcount must be mutated atomically if and only if the hosting
/// allocator exposes refcounts across threads." [`LocalRefCount`] is the
/// default; enable the `atomic-refcount` feature to switch the crate over
/// to [`SharedRefCount`].
pub trait RefCount {
    fn new(initial: usize) -> Self;
    fn get(&self) -> usize;
    /// Increments the refcount ("keep").
    fn keep(&self);
    /// Decrements the refcount ("free"), returning whether it reached
    /// zero.
    fn free(&self) -> bool;
}

#[cfg(not(feature = "atomic-refcount"))]
pub type DefaultRefCount = LocalRefCount;
#[cfg(feature = "atomic-refcount")]
pub type DefaultRefCount = SharedRefCount;

/// Non-atomic refcount, for containers never shared across threads.
pub struct LocalRefCount(core::cell::Cell<usize>);

impl RefCount for LocalRefCount {
    fn new(initial: usize) -> Self {
        Self(core::cell::Cell::new(initial))
    }
    fn get(&self) -> usize {
        self.0.get()
    }
    fn keep(&self) {
        self.0.set(self.0.get() + 1);
    }
    fn free(&self) -> bool {
        let n = self.0.get() - 1;
        self.0.set(n);
        n == 0
    }
}

/// Atomic refcount, for allocators that expose refcounts across threads.
pub struct SharedRefCount(core::sync::atomic::AtomicUsize);

impl RefCount for SharedRefCount {
    fn new(initial: usize) -> Self {
        Self(core::sync::atomic::AtomicUsize::new(initial))
    }
    fn get(&self) -> usize {
        self.0.load(core::sync::atomic::Ordering::Acquire)
    }
    fn keep(&self) {
        self.0.fetch_add(1, core::sync::atomic::Ordering::AcqRel);
    }
    fn free(&self) -> bool {
        self.0.fetch_sub(1, core::sync::atomic::Ordering::AcqRel) == 1
    }
}

/// A heap header preceding the element region of an owned [`Block`](crate::block::Block).
pub struct Allocation<R: RefCount = DefaultRefCount> {
    data: NonNull<u8>,
    layout: Layout,
    refs: R,
    owner: OwnerTag,
}

impl<R: RefCount> Allocation<R> {
    #[must_use]
    pub fn byte_capacity(&self) -> usize {
        self.layout.size()
    }

    #[must_use]
    pub fn use_count(&self) -> usize {
        self.refs.get()
    }

    #[must_use]
    pub fn owner(&self) -> OwnerTag {
        self.owner
    }

    #[must_use]
    pub fn data(&self) -> NonNull<u8> {
        self.data
    }

    /// Increments the refcount.
    pub fn keep(&self) {
        self.refs.keep();
    }

    /// Decrements the refcount, returning whether it reached zero (the
    /// caller is then responsible for deallocating via the allocator that
    /// produced this allocation).
    #[must_use]
    pub fn free(&self) -> bool {
        self.refs.free()
    }

    /// True iff `ptr` lies within this allocation's byte range.
    #[must_use]
    pub fn owns(&self, ptr: *const u8) -> bool {
        let start = self.data.as_ptr() as usize;
        let end = start + self.layout.size();
        let p = ptr as usize;
        p >= start && p < end
    }
}

/// The allocator interface the core consumes (`spec.md` §6), layered as an
/// extension trait over [`Allocator`] so any `allocator-api2`/`core::alloc`
/// allocator already satisfies it.
pub trait BlockAllocator: Allocator + Sized {
    /// Acquires a fresh [`Allocation`] sized for at least `byte_request`
    /// bytes.
    fn new_allocation<R: RefCount>(
        &self,
        byte_request: usize,
        align: usize,
        owner: OwnerTag,
    ) -> Result<Allocation<R>> {
        let layout =
            Layout::from_size_align(byte_request.max(1), align).map_err(|_| Error::Overflow)?;
        let data = self
            .allocate(layout)
            .map_err(|AllocError| Error::AllocationFailure)?;
        Ok(Allocation {
            data: data.cast(),
            layout,
            refs: R::new(1),
            owner,
        })
    }

    /// Grows an allocation to at least `new_byte_request` bytes, possibly
    /// moving it. The caller is responsible for updating any data pointers
    /// that referenced the old allocation.
    fn grow_allocation<R: RefCount>(
        &self,
        alloc: Allocation<R>,
        new_byte_request: usize,
    ) -> Result<Allocation<R>> {
        let new_layout = Layout::from_size_align(new_byte_request.max(1), alloc.layout.align())
            .map_err(|_| Error::Overflow)?;
        // SAFETY: `alloc.data` was allocated by this allocator with
        // `alloc.layout`, and `new_layout.size() >= alloc.layout.size()`
        // is checked by the caller contract (grow only ever widens).
        let grown = unsafe { self.grow(alloc.data, alloc.layout, new_layout) }
            .map_err(|AllocError| Error::AllocationFailure)?;
        Ok(Allocation {
            data: grown.cast(),
            layout: new_layout,
            refs: alloc.refs,
            owner: alloc.owner,
        })
    }

    /// Deallocates an allocation whose refcount has reached zero.
    ///
    /// # Safety
    /// `alloc` must not be referenced by any live `Block` after this call.
    unsafe fn free_allocation<R: RefCount>(&self, alloc: &Allocation<R>) {
        // SAFETY: forwarded from the caller's contract; `alloc.data` was
        // produced by this same allocator with `alloc.layout`.
        unsafe {
            self.deallocate(alloc.data, alloc.layout);
        }
    }

    /// Ownership query by pointer, for allocators that track a managed
    /// registry of live allocations. Off by default (returns `None`
    /// unconditionally) unless the consumer supplies its own managed
    /// registry — the core never implements one itself (`spec.md` §1).
    fn find_allocation(&self, _ptr: *const u8) -> Option<&Allocation> {
        None
    }

    /// Optional sweep of quiescent pools, for tests. A no-op by default.
    fn collect_garbage(&self) {}
}

impl<A: Allocator> BlockAllocator for A {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_compat::alloc::Global;

    #[test]
    fn keep_and_free_round_trip() {
        let a: Allocation<LocalRefCount> = Global.new_allocation(64, 8, OwnerTag::default()).unwrap();
        assert_eq!(a.use_count(), 1);
        a.keep();
        assert_eq!(a.use_count(), 2);
        assert!(!a.free());
        assert_eq!(a.use_count(), 1);
        assert!(a.free());
        // SAFETY: refcount just reached zero and nothing else references it.
        unsafe { Global.free_allocation(&a) };
    }

    #[test]
    fn owns_respects_byte_range() {
        let a: Allocation<LocalRefCount> = Global.new_allocation(16, 8, OwnerTag::default()).unwrap();
        let b: Allocation<LocalRefCount> = Global.new_allocation(16, 8, OwnerTag::default()).unwrap();
        let start = a.data().as_ptr();
        // SAFETY: pointer arithmetic within `a`'s own 16-byte range.
        let inside = unsafe { start.add(4) };
        assert!(a.owns(inside));
        assert!(!a.owns(b.data().as_ptr()));
        assert!(a.free());
        assert!(b.free());
        // SAFETY: both just reached refcount zero with nothing else
        // referencing them.
        unsafe {
            Global.free_allocation(&a);
            Global.free_allocation(&b);
        }
    }
}
