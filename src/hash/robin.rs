// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! [`RobinTable`]: the open-addressed Robin-Hood hash table that powers
//! every map/set facade in this crate (`spec.md` §4.7/§3/§8).
//!
//! Two parallel arrays (`keys`, `values`) plus a byte-per-slot "info"
//! region encode probe distance; `info == 0` marks an empty slot,
//! `info == info_inc` marks a home-bucket (distance-0) slot, and each
//! further probe step adds `info_inc`. The table never wraps probe
//! sequences through an over-allocated buffer the way the C++ origin
//! does for speed — indices wrap via an explicit `& mask` at each probe
//! step instead, which is simpler to keep sound in safe-ish Rust and is
//! the one deliberate departure from the origin documented in
//! `DESIGN.md`.

use core::hash::{Hash, Hasher};
use core::ptr::NonNull;

use crate::core_compat::alloc::{Allocator, Global, Layout};
use crate::error::{Error, Result};
use crate::hash::pool::ChunkPool;

const MINIMAL_CAPACITY: usize = 8;
const INITIAL_INFO_NUM_BITS: u32 = 5;
const INITIAL_INFO_INC: u8 = 1 << INITIAL_INFO_NUM_BITS;
const INFO_MASK: u64 = (INITIAL_INFO_INC as u64) - 1;
const INITIAL_HASH_MULTIPLIER: u64 = 0xc4ce_b9fe_1a85_ec53;
const HASH_MULTIPLIER_BUMP: u64 = 0xc4ce_b9fe_1a85_ec54;
/// Percent load factor at which the table grows (`spec.md` §3: "max
/// elements allowed (capacity · max-load / 100)").
const MAX_LOAD_FACTOR_PCT: usize = 80;
const NONE: usize = usize::MAX;

/// The on-slot/out-of-line storage heuristic of `spec.md` §4.7: "on-slot
/// when `sizeof(Pair) <= 6*sizeof(Count)` and the pair is
/// nothrow-move-constructible/assignable". Rust has no `noexcept`
/// predicate to check, so nothrow-move is treated as always true (see
/// `DESIGN.md`'s resolution of this Open Question) and the heuristic
/// degrades to a pure size check.
#[must_use]
pub const fn prefers_on_slot<K, V>() -> bool {
    core::mem::size_of::<K>() + core::mem::size_of::<V>() <= 6 * core::mem::size_of::<u32>()
}

/// A value slot that is either stored directly ("on-slot") or behind a
/// heap pointer ("out-of-line"), per the size heuristic above. Moving an
/// out-of-line cell (as Robin-Hood shifting constantly does) only moves
/// a pointer. Out-of-line nodes are carved from the table's own
/// [`ChunkPool`] (`spec.md` §4.7's bulk pool allocator) rather than
/// allocated individually — a cell therefore carries no allocator of its
/// own; freeing/extracting a node always goes through the owning table's
/// pool (see `RobinTable::make_cell`/`extract_cell`/`destroy_cell`), which
/// is why this type has no `Drop` impl of its own.
enum ValueCell<V> {
    Inline(V),
    OutOfLine(NonNull<V>),
}

impl<V> ValueCell<V> {
    fn get(&self) -> &V {
        match self {
            ValueCell::Inline(v) => v,
            // SAFETY: the pointer is written by `RobinTable::make_cell`
            // and only ever reclaimed by the owning table's pool.
            ValueCell::OutOfLine(p) => unsafe { p.as_ref() },
        }
    }

    fn get_mut(&mut self) -> &mut V {
        match self {
            ValueCell::Inline(v) => v,
            // SAFETY: see `get`.
            ValueCell::OutOfLine(p) => unsafe { p.as_mut() },
        }
    }
}

enum Prepared {
    Found(usize),
    NewSlot(usize),
}

fn hash_key<K: Hash + ?Sized>(key: &K) -> u64 {
    // A FNV-1a hasher: deterministic, dependency-free, and (per
    // `spec.md` §9) explicitly not meant to double as a MAC.
    struct Fnv1a(u64);
    impl Hasher for Fnv1a {
        fn finish(&self) -> u64 {
            self.0
        }
        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 ^= u64::from(b);
                self.0 = self.0.wrapping_mul(0x0000_0100_0000_01B3);
            }
        }
    }
    let mut hasher = Fnv1a(0xCBF2_9CE4_8422_2325);
    key.hash(&mut hasher);
    hasher.finish()
}

/// The open-addressed Robin-Hood table. Generic over key `K`, value `V`,
/// and allocator `A`; the `ordered` flag (set at construction) switches
/// on a parallel doubly linked insertion-order list so iteration follows
/// insertion order rather than physical slot order.
pub struct RobinTable<K, V, A: Allocator + Clone = Global> {
    keys: Option<NonNull<K>>,
    values: Option<NonNull<ValueCell<V>>>,
    info: Option<NonNull<u8>>,
    order_next: Option<NonNull<usize>>,
    order_prev: Option<NonNull<usize>>,
    order_head: usize,
    order_tail: usize,
    count: usize,
    capacity: usize,
    mask: usize,
    max_allowed: usize,
    info_inc: u8,
    info_hash_shift: u8,
    hash_multiplier: u64,
    out_of_line: bool,
    ordered: bool,
    /// Backing storage for out-of-line values, lazily created on first
    /// use. Persists across rehashes (`grow_to` never touches it): the
    /// slot arrays it's indexed from are what gets reallocated, not the
    /// values themselves.
    pool: Option<ChunkPool<V, A>>,
    alloc: A,
}

impl<K, V, A: Allocator + Clone + Default> Default for RobinTable<K, V, A> {
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

// ---------------------------------------------------------------------
// Construction, layout, and raw-slot access: no bound on K/V beyond what
// each method itself needs.
// ---------------------------------------------------------------------
impl<K, V, A: Allocator + Clone> RobinTable<K, V, A> {
    #[must_use]
    pub fn new_in(alloc: A) -> Self {
        Self::empty(alloc, false)
    }

    /// An ordered table: iteration follows insertion order (`spec.md`
    /// §4.7's "Ordered variant"), not key order.
    #[must_use]
    pub fn new_ordered_in(alloc: A) -> Self {
        Self::empty(alloc, true)
    }

    fn empty(alloc: A, ordered: bool) -> Self {
        Self {
            keys: None,
            values: None,
            info: None,
            order_next: None,
            order_prev: None,
            order_head: NONE,
            order_tail: NONE,
            count: 0,
            capacity: 0,
            mask: 0,
            max_allowed: 0,
            info_inc: INITIAL_INFO_INC,
            info_hash_shift: 0,
            hash_multiplier: INITIAL_HASH_MULTIPLIER,
            out_of_line: !prefers_on_slot::<K, V>(),
            ordered,
            pool: None,
            alloc,
        }
    }

    /// The table's out-of-line node pool, created on first use.
    fn pool_mut(&mut self) -> &mut ChunkPool<V, A> {
        if self.pool.is_none() {
            self.pool = Some(ChunkPool::new_in(self.alloc.clone()));
        }
        // SAFETY: just ensured `Some` above.
        self.pool.as_mut().unwrap()
    }

    /// Builds a [`ValueCell`] for `value`, routing through the pool when
    /// this table prefers out-of-line storage.
    fn make_cell(&mut self, value: V) -> Result<ValueCell<V>> {
        if self.out_of_line {
            let ptr = self.pool_mut().alloc(value)?;
            Ok(ValueCell::OutOfLine(ptr))
        } else {
            Ok(ValueCell::Inline(value))
        }
    }

    /// Extracts a cell's value, reclaiming its out-of-line pool node
    /// (if any) without running the value's destructor twice.
    fn extract_cell(&mut self, cell: ValueCell<V>) -> V {
        match cell {
            ValueCell::Inline(v) => v,
            // SAFETY: `p` was produced by this table's own `make_cell`
            // and not yet reclaimed.
            ValueCell::OutOfLine(p) => unsafe { self.pool_mut().take(p) },
        }
    }

    /// Destroys a cell's value in place, reclaiming its out-of-line pool
    /// node (if any).
    fn destroy_cell(&mut self, cell: ValueCell<V>) {
        match cell {
            ValueCell::Inline(v) => drop(v),
            // SAFETY: see `extract_cell`.
            ValueCell::OutOfLine(p) => unsafe { self.pool_mut().free(p) },
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    fn key_ptr(&self, idx: usize) -> *mut K {
        debug_assert!(idx <= self.capacity);
        // SAFETY: `idx <= capacity` and `keys` is sized for `capacity`
        // elements whenever it is `Some`; callers only index occupied or
        // about-to-be-initialized slots.
        unsafe { self.keys.unwrap_unchecked().as_ptr().add(idx) }
    }

    fn value_ptr(&self, idx: usize) -> *mut ValueCell<V> {
        debug_assert!(idx <= self.capacity);
        // SAFETY: see `key_ptr`.
        unsafe { self.values.unwrap_unchecked().as_ptr().add(idx) }
    }

    fn info_at(&self, idx: usize) -> u8 {
        debug_assert!(idx <= self.capacity);
        // SAFETY: `info` is sized for `capacity + 1` elements (the extra
        // slot is the sentinel) whenever it is `Some`.
        unsafe { *self.info.unwrap_unchecked().as_ptr().add(idx) }
    }

    fn set_info(&self, idx: usize, value: u8) {
        debug_assert!(idx <= self.capacity);
        // SAFETY: see `info_at`.
        unsafe { *self.info.unwrap_unchecked().as_ptr().add(idx) = value };
    }

    fn order_next_at(&self, idx: usize) -> usize {
        // SAFETY: only called when `self.ordered`, in which case
        // `order_next` is sized for `capacity` elements.
        unsafe { *self.order_next.unwrap_unchecked().as_ptr().add(idx) }
    }

    fn order_prev_at(&self, idx: usize) -> usize {
        // SAFETY: see `order_next_at`.
        unsafe { *self.order_prev.unwrap_unchecked().as_ptr().add(idx) }
    }

    fn set_order_next(&self, idx: usize, value: usize) {
        // SAFETY: see `order_next_at`.
        unsafe { *self.order_next.unwrap_unchecked().as_ptr().add(idx) = value };
    }

    fn set_order_prev(&self, idx: usize, value: usize) {
        // SAFETY: see `order_next_at`.
        unsafe { *self.order_prev.unwrap_unchecked().as_ptr().add(idx) = value };
    }

    fn append_order(&mut self, idx: usize) {
        self.set_order_next(idx, NONE);
        self.set_order_prev(idx, self.order_tail);
        if self.order_tail == NONE {
            self.order_head = idx;
        } else {
            self.set_order_next(self.order_tail, idx);
        }
        self.order_tail = idx;
    }

    fn unlink_order(&mut self, idx: usize) {
        let p = self.order_prev_at(idx);
        let n = self.order_next_at(idx);
        if p == NONE {
            self.order_head = n;
        } else {
            self.set_order_next(p, n);
        }
        if n == NONE {
            self.order_tail = p;
        } else {
            self.set_order_prev(n, p);
        }
    }

    /// Called after a slot's payload physically relocates (Robin-Hood
    /// shifting) so the order list keeps tracking the same logical
    /// entry at its new index.
    fn relink_order(&mut self, old_idx: usize, new_idx: usize) {
        let p = self.order_prev_at(old_idx);
        let n = self.order_next_at(old_idx);
        self.set_order_prev(new_idx, p);
        self.set_order_next(new_idx, n);
        if p == NONE {
            self.order_head = new_idx;
        } else {
            self.set_order_next(p, new_idx);
        }
        if n == NONE {
            self.order_tail = new_idx;
        } else {
            self.set_order_prev(n, new_idx);
        }
    }

    fn allocate_arrays(&mut self, capacity: usize) -> Result<()> {
        debug_assert!(capacity.is_power_of_two() && capacity >= MINIMAL_CAPACITY);
        let keys_layout = Layout::array::<K>(capacity).map_err(|_| Error::Overflow)?;
        let values_layout =
            Layout::array::<ValueCell<V>>(capacity).map_err(|_| Error::Overflow)?;
        let info_layout = Layout::array::<u8>(capacity + 1).map_err(|_| Error::Overflow)?;

        let keys = self
            .alloc
            .allocate(keys_layout)
            .map_err(|_| Error::AllocationFailure)?
            .cast::<K>();
        let values = self
            .alloc
            .allocate(values_layout)
            .map_err(|_| Error::AllocationFailure)?
            .cast::<ValueCell<V>>();
        let info = self
            .alloc
            .allocate(info_layout)
            .map_err(|_| Error::AllocationFailure)?
            .cast::<u8>();

        // SAFETY: `info` was just allocated for `capacity + 1` bytes.
        unsafe {
            core::ptr::write_bytes(info.as_ptr(), 0, capacity);
            *info.as_ptr().add(capacity) = 1; // sentinel, spec.md §8
        }

        self.keys = Some(keys);
        self.values = Some(values);
        self.info = Some(info);
        self.capacity = capacity;
        self.mask = capacity - 1;
        self.max_allowed = capacity * MAX_LOAD_FACTOR_PCT / 100;
        self.info_inc = INITIAL_INFO_INC;
        self.info_hash_shift = 0;

        if self.ordered {
            let order_layout = Layout::array::<usize>(capacity).map_err(|_| Error::Overflow)?;
            let next = self
                .alloc
                .allocate(order_layout)
                .map_err(|_| Error::AllocationFailure)?
                .cast::<usize>();
            let prev = self
                .alloc
                .allocate(order_layout)
                .map_err(|_| Error::AllocationFailure)?
                .cast::<usize>();
            self.order_next = Some(next);
            self.order_prev = Some(prev);
            self.order_head = NONE;
            self.order_tail = NONE;
        }
        Ok(())
    }

    /// Destroys all entries but keeps the backing arrays.
    pub fn clear(&mut self) {
        let Some(_) = self.keys else { return };
        for idx in 0..self.capacity {
            if self.info_at(idx) != 0 {
                // SAFETY: this slot is occupied; both pointers are
                // valid, initialized values, read out exactly once.
                let cell = unsafe {
                    core::ptr::drop_in_place(self.key_ptr(idx));
                    core::ptr::read(self.value_ptr(idx))
                };
                self.destroy_cell(cell);
                self.set_info(idx, 0);
            }
        }
        self.count = 0;
        self.order_head = NONE;
        self.order_tail = NONE;
    }

    /// Destroys all entries and releases the backing arrays.
    pub fn reset(&mut self) {
        self.clear();
        // SAFETY: `clear` has just destroyed every live element; the
        // arrays themselves hold only uninitialized/empty slots now.
        unsafe { self.free_arrays() };
    }

    unsafe fn free_arrays(&mut self) {
        let capacity = self.capacity;
        if let Some(keys) = self.keys.take() {
            let layout = Layout::array::<K>(capacity).unwrap();
            // SAFETY: allocated with this layout in `allocate_arrays`.
            unsafe { self.alloc.deallocate(keys.cast(), layout) };
        }
        if let Some(values) = self.values.take() {
            let layout = Layout::array::<ValueCell<V>>(capacity).unwrap();
            // SAFETY: see above.
            unsafe { self.alloc.deallocate(values.cast(), layout) };
        }
        if let Some(info) = self.info.take() {
            let layout = Layout::array::<u8>(capacity + 1).unwrap();
            // SAFETY: see above.
            unsafe { self.alloc.deallocate(info.cast(), layout) };
        }
        if let Some(next) = self.order_next.take() {
            let layout = Layout::array::<usize>(capacity).unwrap();
            // SAFETY: see above.
            unsafe { self.alloc.deallocate(next.cast(), layout) };
        }
        if let Some(prev) = self.order_prev.take() {
            let layout = Layout::array::<usize>(capacity).unwrap();
            // SAFETY: see above.
            unsafe { self.alloc.deallocate(prev.cast(), layout) };
        }
        self.capacity = 0;
        self.mask = 0;
        self.max_allowed = 0;
    }

    pub fn iter(&self) -> Iter<'_, K, V, A> {
        Iter {
            table: self,
            next_ordered: self.order_head,
            next_slot: 0,
        }
    }
}

impl<K, V, A: Allocator + Clone> Drop for RobinTable<K, V, A> {
    fn drop(&mut self) {
        self.reset();
    }
}

// ---------------------------------------------------------------------
// Key-dependent operations: lookup, insertion, removal, rehashing.
// ---------------------------------------------------------------------
impl<K: Hash + Eq, V, A: Allocator + Clone> RobinTable<K, V, A> {
    fn key_to_idx(&self, key: &K) -> (usize, u8) {
        let mut h = hash_key(key);
        h = h.wrapping_mul(self.hash_multiplier);
        h ^= h >> 33;
        let info = self
            .info_inc
            .wrapping_add(((h & INFO_MASK) >> self.info_hash_shift) as u8);
        let idx = ((h >> INITIAL_INFO_NUM_BITS) as usize) & self.mask;
        (idx, info)
    }

    fn next(&self, info: &mut u8, idx: &mut usize) {
        *idx = (*idx + 1) & self.mask;
        *info = info.wrapping_add(self.info_inc);
    }

    fn next_while_less(&self, info: &mut u8, idx: &mut usize) {
        while *info < self.info_at(*idx) {
            self.next(info, idx);
        }
    }

    fn key_eq(&self, idx: usize, key: &K) -> bool {
        // SAFETY: `idx` names an occupied slot (checked by the caller
        // via the matching info byte before calling this).
        unsafe { &*self.key_ptr(idx) == key }
    }

    fn find_idx(&self, key: &K) -> Option<usize> {
        if self.capacity == 0 {
            return None;
        }
        let (mut idx, mut info) = self.key_to_idx(key);
        loop {
            let stored = self.info_at(idx);
            if info == stored {
                if self.key_eq(idx, key) {
                    return Some(idx);
                }
            } else if info > stored {
                return None;
            }
            self.next(&mut info, &mut idx);
        }
    }

    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.find_idx(key).is_some()
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        let idx = self.find_idx(key)?;
        // SAFETY: `idx` is occupied.
        Some(unsafe { (*self.value_ptr(idx)).get() })
    }

    #[must_use]
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = self.find_idx(key)?;
        // SAFETY: `idx` is occupied.
        Some(unsafe { (*self.value_ptr(idx)).get_mut() })
    }

    /// Shifts the Robin-Hood chain right from `empty_idx` down to
    /// `insertion_idx`, vacating `insertion_idx` for a new entry.
    fn shift_up(&mut self, empty_idx: usize, insertion_idx: usize) {
        let mut i = empty_idx;
        while i != insertion_idx {
            let prev = if i == 0 { self.capacity - 1 } else { i - 1 };
            // SAFETY: `prev` holds a live element being relocated to
            // `i`, which is either the found empty slot or a slot
            // already vacated by a previous iteration of this loop.
            unsafe {
                core::ptr::copy_nonoverlapping(self.key_ptr(prev), self.key_ptr(i), 1);
                core::ptr::copy_nonoverlapping(self.value_ptr(prev), self.value_ptr(i), 1);
            }
            let prev_info = self.info_at(prev);
            if u16::from(prev_info) + u16::from(self.info_inc) > 0xFF {
                self.max_allowed = 0;
            }
            self.set_info(i, prev_info.wrapping_add(self.info_inc));
            if self.ordered {
                self.relink_order(prev, i);
            }
            i = prev;
        }
    }

    /// Compacts the chain left after the entry at `idx` has already been
    /// destroyed/extracted by the caller.
    fn shift_down(&mut self, mut idx: usize) {
        loop {
            let next_idx = (idx + 1) & self.mask;
            let next_info = self.info_at(next_idx);
            if next_info < 2 * self.info_inc {
                break;
            }
            self.set_info(idx, next_info.wrapping_sub(self.info_inc));
            // SAFETY: `next_idx` holds a live, displaced element being
            // relocated one slot left into `idx` (already vacated).
            unsafe {
                core::ptr::copy_nonoverlapping(self.key_ptr(next_idx), self.key_ptr(idx), 1);
                core::ptr::copy_nonoverlapping(self.value_ptr(next_idx), self.value_ptr(idx), 1);
            }
            if self.ordered {
                self.relink_order(next_idx, idx);
            }
            idx = next_idx;
        }
        self.set_info(idx, 0);
    }

    fn try_increase_info(&mut self) -> bool {
        // "need to be > 2 so that shift works" — ported verbatim from
        // the C++ origin's `try_increase_info`.
        if self.info_inc <= 2 {
            return false;
        }
        self.info_inc >>= 1;
        self.info_hash_shift += 1;
        for idx in 0..self.capacity {
            self.set_info(idx, self.info_at(idx) >> 1);
        }
        self.set_info(self.capacity, 1); // restore the sentinel
        self.max_allowed = self.capacity * MAX_LOAD_FACTOR_PCT / 100;
        true
    }

    fn insert_key_prepare_slot(&mut self, key: &K) -> Result<Prepared> {
        if self.capacity == 0 {
            self.allocate_arrays(MINIMAL_CAPACITY)?;
        }
        loop {
            let (mut idx, mut info) = self.key_to_idx(key);
            self.next_while_less(&mut info, &mut idx);

            while info == self.info_at(idx) {
                if self.key_eq(idx, key) {
                    return Ok(Prepared::Found(idx));
                }
                self.next(&mut info, &mut idx);
            }

            if self.count >= self.max_allowed {
                if !self.try_increase_info() {
                    let new_capacity = self.capacity.max(MINIMAL_CAPACITY) * 2;
                    self.grow_to(new_capacity)?;
                }
                continue;
            }

            let insertion_idx = idx;
            let insertion_info = info;
            if u16::from(insertion_info) + u16::from(self.info_inc) > 0xFF {
                self.max_allowed = 0;
            }

            while self.info_at(idx) != 0 {
                self.next(&mut info, &mut idx);
            }
            if idx != insertion_idx {
                self.shift_up(idx, insertion_idx);
            }
            self.set_info(insertion_idx, insertion_info);
            self.count += 1;
            return Ok(Prepared::NewSlot(insertion_idx));
        }
    }

    /// Inserts `key`/`value`, returning the previous value if `key` was
    /// already present.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>> {
        match self.insert_key_prepare_slot(&key)? {
            Prepared::Found(idx) => {
                let fresh = self.make_cell(value)?;
                // SAFETY: `idx` is occupied.
                let cell = unsafe { &mut *self.value_ptr(idx) };
                let old = core::mem::replace(cell, fresh);
                Ok(Some(self.extract_cell(old)))
            }
            Prepared::NewSlot(idx) => {
                let value = self.make_cell(value)?;
                // SAFETY: `idx` was just prepared as an uninitialized
                // (or freshly vacated) slot by `insert_key_prepare_slot`.
                unsafe {
                    core::ptr::write(self.key_ptr(idx), key);
                    core::ptr::write(self.value_ptr(idx), value);
                }
                if self.ordered {
                    self.append_order(idx);
                }
                Ok(None)
            }
        }
    }

    /// Removes `key`, returning its value if present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.find_idx(key)?;
        if self.ordered {
            self.unlink_order(idx);
        }
        // SAFETY: `idx` is occupied; both reads take ownership of the
        // slot's contents before `shift_down` compacts the chain.
        let cell = unsafe {
            core::ptr::drop_in_place(self.key_ptr(idx));
            core::ptr::read(self.value_ptr(idx))
        };
        let value = self.extract_cell(cell);
        self.shift_down(idx);
        self.count -= 1;
        Some(value)
    }

    fn reinsert(&mut self, key: K, value: ValueCell<V>) {
        match self
            .insert_key_prepare_slot(&key)
            .expect("rehash target is always sized to fit its source elements")
        {
            Prepared::NewSlot(idx) => {
                // SAFETY: `idx` was just prepared as an uninitialized
                // slot.
                unsafe {
                    core::ptr::write(self.key_ptr(idx), key);
                    core::ptr::write(self.value_ptr(idx), value);
                }
                if self.ordered {
                    self.append_order(idx);
                }
            }
            Prepared::Found(_) => unreachable!("rehash source keys are already unique"),
        }
    }

    /// Grows to `new_capacity` (rounded up to a power of two), bumping
    /// the hash multiplier to break adversarial probe-sequence patterns
    /// (`spec.md` §4.7's "Hash adversary defense").
    fn grow_to(&mut self, new_capacity: usize) -> Result<()> {
        let new_capacity = new_capacity.max(MINIMAL_CAPACITY).next_power_of_two();
        let old_capacity = self.capacity;
        let old_keys = self.keys.take();
        let old_values = self.values.take();
        let old_info = self.info.take();
        let old_order_next = self.order_next.take();
        let old_order_prev = self.order_prev.take();
        let old_head = self.order_head;

        self.allocate_arrays(new_capacity)?;
        self.count = 0;
        self.hash_multiplier = self.hash_multiplier.wrapping_add(HASH_MULTIPLIER_BUMP);

        if old_capacity > 0 {
            // SAFETY: non-empty old arrays are `Some` whenever
            // `old_capacity > 0`.
            let old_keys = unsafe { old_keys.unwrap_unchecked() };
            let old_values = unsafe { old_values.unwrap_unchecked() };
            let old_info = unsafe { old_info.unwrap_unchecked() };

            if self.ordered {
                let old_order_next = old_order_next.unwrap();
                let mut idx = old_head;
                while idx != NONE {
                    // SAFETY: `idx` names a live slot in the old arrays,
                    // read out exactly once before continuing to the
                    // next order-list entry.
                    let (k, v) = unsafe {
                        (
                            core::ptr::read(old_keys.as_ptr().add(idx)),
                            core::ptr::read(old_values.as_ptr().add(idx)),
                        )
                    };
                    // SAFETY: `idx` is in range for the old order array.
                    let next = unsafe { *old_order_next.as_ptr().add(idx) };
                    self.reinsert(k, v);
                    idx = next;
                }
            } else {
                for idx in 0..old_capacity {
                    // SAFETY: `idx < old_capacity`.
                    if unsafe { *old_info.as_ptr().add(idx) } != 0 {
                        // SAFETY: occupied slot, read out exactly once.
                        let (k, v) = unsafe {
                            (
                                core::ptr::read(old_keys.as_ptr().add(idx)),
                                core::ptr::read(old_values.as_ptr().add(idx)),
                            )
                        };
                        self.reinsert(k, v);
                    }
                }
            }
        }

        if let Some(p) = old_keys {
            let layout = Layout::array::<K>(old_capacity).unwrap();
            // SAFETY: every element was read out above; this only frees
            // the backing bytes.
            unsafe { self.alloc.deallocate(p.cast(), layout) };
        }
        if let Some(p) = old_values {
            let layout = Layout::array::<ValueCell<V>>(old_capacity).unwrap();
            // SAFETY: see above.
            unsafe { self.alloc.deallocate(p.cast(), layout) };
        }
        if let Some(p) = old_info {
            let layout = Layout::array::<u8>(old_capacity + 1).unwrap();
            // SAFETY: see above.
            unsafe { self.alloc.deallocate(p.cast(), layout) };
        }
        if let Some(p) = old_order_next {
            let layout = Layout::array::<usize>(old_capacity).unwrap();
            // SAFETY: see above.
            unsafe { self.alloc.deallocate(p.cast(), layout) };
        }
        if let Some(p) = old_order_prev {
            let layout = Layout::array::<usize>(old_capacity).unwrap();
            // SAFETY: see above.
            unsafe { self.alloc.deallocate(p.cast(), layout) };
        }
        Ok(())
    }

    /// Ensures the table can hold `additional` more elements without a
    /// further rehash.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let needed = self.count + additional;
        if self.capacity == 0 || needed > self.max_allowed {
            let mut cap = self.capacity.max(MINIMAL_CAPACITY);
            while (cap * MAX_LOAD_FACTOR_PCT) / 100 < needed {
                cap *= 2;
            }
            if cap > self.capacity {
                self.grow_to(cap)?;
            }
        }
        Ok(())
    }
}

/// Forward iterator over `(&K, &V)` pairs: insertion order when the
/// table is [`RobinTable::is_ordered`], slot order otherwise.
pub struct Iter<'a, K, V, A: Allocator + Clone> {
    table: &'a RobinTable<K, V, A>,
    next_ordered: usize,
    next_slot: usize,
}

impl<'a, K, V, A: Allocator + Clone> Iterator for Iter<'a, K, V, A> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.table.ordered {
            if self.next_ordered == NONE {
                return None;
            }
            let idx = self.next_ordered;
            self.next_ordered = self.table.order_next_at(idx);
            // SAFETY: `idx` is a live, occupied slot tracked by the
            // order list.
            Some(unsafe { (&*self.table.key_ptr(idx), (*self.table.value_ptr(idx)).get()) })
        } else {
            while self.next_slot < self.table.capacity {
                let idx = self.next_slot;
                self.next_slot += 1;
                if self.table.info_at(idx) != 0 {
                    // SAFETY: `idx` is occupied.
                    return Some(unsafe {
                        (&*self.table.key_ptr(idx), (*self.table.value_ptr(idx)).get())
                    });
                }
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_find_round_trips() {
        let mut t: RobinTable<i32, i32> = RobinTable::new_in(Global);
        for i in 0..20 {
            assert_eq!(t.insert(i, i * 10).unwrap(), None);
        }
        for i in 0..20 {
            assert_eq!(t.get(&i), Some(&(i * 10)));
        }
        assert_eq!(t.len(), 20);
    }

    #[test]
    fn insert_overwrites_existing_key() {
        let mut t: RobinTable<i32, i32> = RobinTable::new_in(Global);
        assert_eq!(t.insert(1, 100).unwrap(), None);
        assert_eq!(t.insert(1, 200).unwrap(), Some(100));
        assert_eq!(t.get(&1), Some(&200));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn collision_resolution_keeps_keys_findable() {
        // `spec.md` §8 scenario 4: keys that all collide on bucket 0
        // before mixing must still all be independently findable, and
        // removing one must leave the others intact.
        let mut t: RobinTable<i32, i32> = RobinTable::new_in(Global);
        for k in [0, 8, 16] {
            t.insert(k, k).unwrap();
        }
        for k in [0, 8, 16] {
            assert_eq!(t.get(&k), Some(&k));
        }
        assert_eq!(t.remove(&0), Some(0));
        assert_eq!(t.get(&0), None);
        assert_eq!(t.get(&8), Some(&8));
        assert_eq!(t.get(&16), Some(&16));
    }

    #[test]
    fn remove_then_reinsert_round_trips() {
        let mut t: RobinTable<i32, i32> = RobinTable::new_in(Global);
        for i in 0..10 {
            t.insert(i, i).unwrap();
        }
        assert_eq!(t.remove(&5), Some(5));
        assert_eq!(t.get(&5), None);
        assert_eq!(t.len(), 9);
        assert_eq!(t.insert(5, 50).unwrap(), None);
        assert_eq!(t.get(&5), Some(&50));
    }

    #[test]
    fn clear_then_clear_is_idempotent() {
        let mut t: RobinTable<i32, i32> = RobinTable::new_in(Global);
        t.insert(1, 1).unwrap();
        t.clear();
        t.clear();
        assert_eq!(t.len(), 0);
    }

    #[test]
    fn ordered_table_iterates_in_insertion_order() {
        let mut t: RobinTable<i32, i32, Global> = RobinTable::new_ordered_in(Global);
        for k in [5, 1, 9, 2, 7] {
            t.insert(k, k * 100).unwrap();
        }
        let collected: crate::core_compat::vec::Vec<i32> =
            t.iter().map(|(k, _)| *k).collect::<crate::core_compat::vec::Vec<_>>();
        assert_eq!(collected, [5, 1, 9, 2, 7]);
    }

    #[test]
    fn ordered_table_preserves_order_across_rehash() {
        let mut t: RobinTable<i32, i32, Global> = RobinTable::new_ordered_in(Global);
        let sequence: crate::core_compat::vec::Vec<i32> = (0..40).collect();
        for &k in &sequence {
            t.insert(k, k).unwrap();
        }
        let collected: crate::core_compat::vec::Vec<i32> =
            t.iter().map(|(k, _)| *k).collect::<crate::core_compat::vec::Vec<_>>();
        assert_eq!(collected, sequence);
    }

    #[test]
    fn growth_past_load_factor_keeps_every_key_findable() {
        let mut t: RobinTable<i32, i32> = RobinTable::new_in(Global);
        for i in 0..500 {
            t.insert(i, i * 2).unwrap();
        }
        for i in 0..500 {
            assert_eq!(t.get(&i), Some(&(i * 2)));
        }
        assert_eq!(t.len(), 500);
    }

    #[test]
    fn out_of_line_values_work_for_large_value_types() {
        #[derive(Clone, PartialEq, Eq, Debug)]
        struct Big([u64; 16]);

        let mut t: RobinTable<i32, Big> = RobinTable::new_in(Global);
        assert!(t.out_of_line, "values larger than the on-slot heuristic should be boxed");
        t.insert(1, Big([7; 16])).unwrap();
        assert_eq!(t.get(&1), Some(&Big([7; 16])));
        assert_eq!(t.remove(&1), Some(Big([7; 16])));
    }
}
