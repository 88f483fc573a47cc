// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! [`ChunkPool`]: a bulk pool allocator for out-of-line Robin-Hood table
//! storage (`spec.md` §4.7's "out-of-line storage uses a bulk pool
//! allocator that grows its chunk size geometrically (4→8→…→16384),
//! enabling fast swap (swap pointers only) at the cost of a pointer
//! indirection per access").
//!
//! Individually `allocate`/`deallocate`-ing one node per table slot would
//! put every insert/remove on the hot path of the general-purpose
//! allocator. `ChunkPool` instead carves nodes out of geometrically
//! growing chunks and recycles freed nodes through an intrusive free
//! list threaded through the node storage itself.

use core::mem::ManuallyDrop;
use core::ptr::NonNull;

use crate::core_compat::alloc::{Allocator, Global, Layout};
use crate::core_compat::vec::Vec as CoreVec;
use crate::error::{Error, Result};

const INITIAL_CHUNK_CAP: usize = 4;
const MAX_CHUNK_CAP: usize = 16384;

/// A slot big enough to hold either a live `T` or a free-list link,
/// whichever is larger. Freed slots thread the list through
/// `free_next`; live slots hold `value`.
#[repr(C)]
union Cell<T> {
    value: ManuallyDrop<T>,
    free_next: Option<NonNull<Cell<T>>>,
}

/// A bulk pool allocator handing out individually freeable `T` nodes
/// from geometrically growing chunks.
///
/// Dropping the pool without first freeing every outstanding node leaks
/// those nodes' `T::drop` (consistent with the arena-style contract of a
/// bump/pool allocator): callers that hand nodes back via [`ChunkPool::free`]
/// before the pool itself is dropped see ordinary, leak-free behavior.
pub struct ChunkPool<T, A: Allocator = Global> {
    alloc: A,
    chunks: CoreVec<(NonNull<Cell<T>>, usize), A>,
    current: Option<CurrentChunk<T>>,
    next_chunk_cap: usize,
    free: Option<NonNull<Cell<T>>>,
}

struct CurrentChunk<T> {
    ptr: NonNull<Cell<T>>,
    used: usize,
    cap: usize,
}

impl<T, A: Allocator + Clone> ChunkPool<T, A> {
    #[must_use]
    pub fn new_in(alloc: A) -> Self {
        Self {
            chunks: CoreVec::new_in(alloc.clone()),
            alloc,
            current: None,
            next_chunk_cap: INITIAL_CHUNK_CAP,
            free: None,
        }
    }

    /// Hands out a fresh, initialized node holding `value`.
    pub fn alloc(&mut self, value: T) -> Result<NonNull<T>> {
        let cell = if let Some(free) = self.free.take() {
            // SAFETY: `free` was pushed by a prior `free()` call and has
            // not been reused since; its `free_next` field is live.
            self.free = unsafe { (*free.as_ptr()).free_next };
            free
        } else {
            self.bump()?
        };
        // SAFETY: `cell` is a valid, uninitialized (or just-vacated)
        // slot sized for `Cell<T>`; writing `value` through the `value`
        // field is in-bounds for the union.
        unsafe {
            (*cell.as_ptr()).value = ManuallyDrop::new(value);
        }
        Ok(cell.cast())
    }

    /// Reclaims a node previously returned by [`ChunkPool::alloc`],
    /// running `T`'s destructor and threading the slot onto the free
    /// list for reuse.
    ///
    /// # Safety
    /// `ptr` must have been returned by this pool's `alloc` and not
    /// already freed.
    pub unsafe fn free(&mut self, ptr: NonNull<T>) {
        let cell: NonNull<Cell<T>> = ptr.cast();
        // SAFETY: forwarded from caller contract; `cell` holds a live `T`.
        unsafe {
            core::ptr::drop_in_place(core::ptr::addr_of_mut!((*cell.as_ptr()).value).cast::<T>());
        }
        // SAFETY: `cell` is no longer read as a `T`; overwriting the
        // union with the free-list variant is in-bounds.
        unsafe {
            (*cell.as_ptr()).free_next = self.free;
        }
        self.free = Some(cell);
    }

    /// Reclaims a node, handing its `T` back to the caller instead of
    /// dropping it (the table-removal counterpart of [`ChunkPool::free`],
    /// used when a caller needs the evicted value rather than its
    /// destruction — e.g. `RobinTable::remove`/overwrite-on-insert).
    ///
    /// # Safety
    /// `ptr` must have been returned by this pool's `alloc` and not
    /// already freed.
    pub unsafe fn take(&mut self, ptr: NonNull<T>) -> T {
        let cell: NonNull<Cell<T>> = ptr.cast();
        // SAFETY: forwarded from caller contract; `cell` holds a live `T`,
        // read out by value rather than dropped in place.
        let value = unsafe {
            ManuallyDrop::into_inner(core::ptr::read(core::ptr::addr_of!((*cell.as_ptr()).value)))
        };
        // SAFETY: `cell` is no longer read as a `T`; overwriting the
        // union with the free-list variant is in-bounds.
        unsafe {
            (*cell.as_ptr()).free_next = self.free;
        }
        self.free = Some(cell);
        value
    }

    fn bump(&mut self) -> Result<NonNull<Cell<T>>> {
        let needs_new_chunk = match &self.current {
            Some(c) => c.used >= c.cap,
            None => true,
        };
        if needs_new_chunk {
            let cap = self.next_chunk_cap;
            let layout = Layout::array::<Cell<T>>(cap).map_err(|_| Error::Overflow)?;
            let data = self
                .alloc
                .allocate(layout)
                .map_err(|_| Error::AllocationFailure)?;
            let ptr: NonNull<Cell<T>> = data.cast();
            self.chunks.push((ptr, cap));
            self.current = Some(CurrentChunk { ptr, used: 0, cap });
            self.next_chunk_cap = (self.next_chunk_cap * 2).min(MAX_CHUNK_CAP);
        }
        let current = self.current.as_mut().unwrap();
        // SAFETY: `current.used < current.cap` (either just verified or
        // freshly allocated with `used == 0 < cap`), so this offset is
        // within the chunk's allocation.
        let slot = unsafe { current.ptr.as_ptr().add(current.used) };
        current.used += 1;
        Ok(NonNull::new(slot).unwrap())
    }
}

impl<T, A: Allocator> Drop for ChunkPool<T, A> {
    fn drop(&mut self) {
        for (ptr, cap) in self.chunks.drain(..) {
            // SAFETY: `layout` matches the one used to allocate this
            // chunk in `bump`.
            let layout = Layout::array::<Cell<T>>(cap).unwrap();
            unsafe {
                self.alloc.deallocate(ptr.cast(), layout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_recycles_the_slot() {
        let mut pool: ChunkPool<u64> = ChunkPool::new_in(Global);
        let a = pool.alloc(1).unwrap();
        // SAFETY: `a` was just allocated and not yet freed.
        unsafe { pool.free(a) };
        let b = pool.alloc(2).unwrap();
        assert_eq!(a, b, "freed slot should be reused by the next alloc");
        // SAFETY: `b` was just allocated and not yet freed.
        unsafe {
            assert_eq!(*b.as_ref(), 2);
            pool.free(b);
        }
    }

    #[test]
    fn take_returns_value_without_rerunning_its_destructor() {
        let mut pool: ChunkPool<::std::string::String> = ChunkPool::new_in(Global);
        let a = pool.alloc(::std::string::String::from("hi")).unwrap();
        // SAFETY: `a` was just allocated and not yet freed.
        let taken = unsafe { pool.take(a) };
        assert_eq!(taken, "hi");
        let b = pool.alloc(::std::string::String::from("bye")).unwrap();
        assert_eq!(a, b, "taken slot should be reused by the next alloc");
        // SAFETY: `b` was just allocated and not yet freed.
        unsafe { pool.free(b) };
    }

    #[test]
    fn chunk_growth_spans_multiple_chunks() {
        let mut pool: ChunkPool<u32> = ChunkPool::new_in(Global);
        let mut handles = crate::core_compat::vec::Vec::new_in(Global);
        for i in 0..50u32 {
            handles.push(pool.alloc(i).unwrap());
        }
        for (i, h) in handles.iter().enumerate() {
            // SAFETY: each handle is live and holds the value written above.
            assert_eq!(unsafe { *h.as_ref() }, i as u32);
        }
        for h in handles {
            // SAFETY: each handle is live and not yet freed.
            unsafe { pool.free(h) };
        }
    }
}
