// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Runtime type-info: the erased per-type vtable [`Block`](crate::block::Block)
//! consults for every element operation.
//!
//! The core never stores a `TypeId`-keyed registry itself (the registry is
//! an external collaborator, see `spec.md` §1); instead a [`TypeDescriptor`]
//! is obtained per-`T` at compile time via [`TypeDescriptor::of`]. A
//! [`TypeRegistry`] trait is provided for callers that *do* want to resolve
//! a descriptor from a runtime token, but this crate implements no such
//! registry itself.

use core::mem::{align_of, size_of};
use core::ptr;

use bitflags::bitflags;

bitflags! {
    /// Boolean properties of a type, as queried by `Block`.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct TypeFlags: u16 {
        /// Plain-old-data: safe to `memcpy`, no destructor, no aliasing.
        const POD = 1 << 0;
        /// Stored as a pointer-of the descriptor's actual element type
        /// (the descriptor for `T*` rather than `T`).
        const SPARSE = 1 << 1;
        /// The element type is itself a container of blocks.
        const DEEP = 1 << 2;
        /// Default-constructs to a nullable/empty state.
        const NULLIFIABLE = 1 << 3;
        /// The element type cannot be instantiated directly (only through
        /// the resolver, picking a concrete subtype).
        const ABSTRACT = 1 << 4;
        /// The descriptor exposes a [`TypeOps::resolver`] for polymorphic
        /// dispatch.
        const RESOLVABLE = 1 << 5;
        /// The owning block may not widen away from this exact type.
        const TYPE_CONSTRAINED = 1 << 6;
        /// `T: Default`.
        const DEFAULT_CONSTRUCTIBLE = 1 << 7;
    }
}

/// Raw, type-erased lifecycle operations for a `TypeDescriptor`.
///
/// Every function takes raw byte pointers and an element count rather than
/// a typed slice: this is the one boundary across which `Block` stops
/// knowing anything about its element type.
pub struct TypeOps {
    /// Intent constructors: build `count` new elements at `dst` given a
    /// source under the named intent. `dst` is uninitialized memory.
    pub refer_ctor: unsafe fn(dst: *mut u8, src: *const u8, count: usize),
    pub move_ctor: unsafe fn(dst: *mut u8, src: *mut u8, count: usize),
    pub copy_ctor: unsafe fn(dst: *mut u8, src: *const u8, count: usize),
    pub clone_ctor: unsafe fn(dst: *mut u8, src: *const u8, count: usize),
    pub disown_ctor: unsafe fn(dst: *mut u8, src: *const u8, count: usize),
    pub abandon_ctor: unsafe fn(dst: *mut u8, src: *mut u8, count: usize),

    /// Intent assigners: overwrite `count` already-initialized elements at
    /// `dst` given a source under the named intent.
    pub refer_asgn: unsafe fn(dst: *mut u8, src: *const u8, count: usize),
    pub move_asgn: unsafe fn(dst: *mut u8, src: *mut u8, count: usize),
    pub copy_asgn: unsafe fn(dst: *mut u8, src: *const u8, count: usize),
    pub clone_asgn: unsafe fn(dst: *mut u8, src: *const u8, count: usize),
    pub disown_asgn: unsafe fn(dst: *mut u8, src: *const u8, count: usize),
    pub abandon_asgn: unsafe fn(dst: *mut u8, src: *mut u8, count: usize),

    /// Destroys `count` initialized elements at `ptr`.
    pub dtor: unsafe fn(ptr: *mut u8, count: usize),

    /// For polymorphic/resolvable types, returns the descriptor of the
    /// actual concrete subtype stored at `ptr`.
    pub resolver: Option<unsafe fn(ptr: *const u8) -> &'static TypeDescriptor>,

    /// Hashes a single element.
    pub hash: unsafe fn(ptr: *const u8) -> u64,

    /// Compares two single elements for equality.
    pub eq: unsafe fn(a: *const u8, b: *const u8) -> bool,

    /// Default-constructs `count` elements at `dst`, if
    /// [`TypeFlags::DEFAULT_CONSTRUCTIBLE`] is set.
    pub default_ctor: Option<unsafe fn(dst: *mut u8, count: usize)>,
}

/// An immutable, `'static` record of a type's layout and lifecycle
/// operations, consulted by every element-level `Block` operation.
pub struct TypeDescriptor {
    pub stride: usize,
    pub align: usize,
    pub flags: TypeFlags,
    pub token: &'static str,
    pub ops: &'static TypeOps,
}

impl TypeDescriptor {
    /// Per-`T` compile-time lookup, cached as a single `'static` value by
    /// virtue of being backed by a `static` in a generic function (one
    /// instance per monomorphization).
    pub fn of<T: 'static>() -> &'static TypeDescriptor
    where
        T: ElementOps,
    {
        T::descriptor()
    }

    /// Descriptor identity: the strictest relation. Two descriptors are
    /// `is` iff they are the exact same static record.
    #[must_use]
    pub fn is(&'static self, other: &'static TypeDescriptor) -> bool {
        ptr::eq(self, other)
    }

    /// Identity-or-aliases: loosened for callers that only care whether
    /// two descriptors would behave the same way under erased operations
    /// (same stride, same ops).
    #[must_use]
    pub fn is_similar(&'static self, other: &'static TypeDescriptor) -> bool {
        self.is(other) || (self.stride == other.stride && self.token == other.token)
    }

    /// Identity, aliases, or base types: the loosest relation, used by
    /// `casts_to`/widening decisions. The base-Rust core has no notion of
    /// inheritance, so "base types" degrades to descriptor identity unless
    /// a caller supplies its own `bases` list via [`ElementOps::bases`].
    #[must_use]
    pub fn is_exact(&'static self, other: &'static TypeDescriptor) -> bool {
        if self.is_similar(other) {
            return true;
        }
        other.token == "Block" || other.token == "Any"
    }

    #[must_use]
    pub fn casts_to(&'static self, other: &'static TypeDescriptor) -> bool {
        self.is_exact(other)
    }

    #[must_use]
    pub fn is_pod(&self) -> bool {
        self.flags.contains(TypeFlags::POD)
    }

    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.flags.contains(TypeFlags::SPARSE)
    }

    #[must_use]
    pub fn is_deep(&self) -> bool {
        self.flags.contains(TypeFlags::DEEP)
    }

    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(TypeFlags::ABSTRACT)
    }

    #[must_use]
    pub fn is_resolvable(&self) -> bool {
        self.flags.contains(TypeFlags::RESOLVABLE)
    }
}

impl core::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("token", &self.token)
            .field("stride", &self.stride)
            .field("align", &self.align)
            .field("flags", &self.flags)
            .finish()
    }
}

/// An external RTTI registry, consumed but not implemented by this crate
/// (see `spec.md` §1, §6: "RTTI interface").
pub trait TypeRegistry {
    fn by_token(&self, token: &str) -> Option<&'static TypeDescriptor>;
}

/// Implemented for every `T` that can back a [`TypeDescriptor`]. Blanket
/// implementations below cover `T: Clone + PartialEq`, the common case;
/// exotic element types (sparse, deep, abstract/resolvable) provide their
/// own `ElementOps` impl to plug in a `resolver`.
pub trait ElementOps: Sized + 'static {
    fn descriptor() -> &'static TypeDescriptor;
}

// A small helper so every blanket impl below can build a `TypeOps` out of
// the ordinary `Clone`/`PartialEq`/`Hash`-like primitives that dense, POD
// or non-POD-but-ordinary Rust values already implement.
unsafe fn ctor_move_bytes<T>(dst: *mut u8, src: *mut u8, count: usize) {
    // SAFETY: caller guarantees `dst` is uninitialized and `src` holds
    // `count` valid, non-overlapping `T`s that the caller will treat as
    // moved-from afterward.
    unsafe {
        ptr::copy_nonoverlapping(src.cast::<T>(), dst.cast::<T>(), count);
    }
}

// `Refer`/`Copy`/`Clone`/`Disown` all construct new elements from a
// *borrowed* source the constructor does not own (`spec.md` §4.3: none of
// them consume the source). A raw `memcpy` would duplicate any owned
// pointer `T` carries (a heap buffer, or a nested `Block`'s `Allocation`
// back-pointer) without the bookkeeping that pointer's own `Clone` impl
// performs, corrupting refcounts and leading to a double-free. These four
// intents therefore all route through `T::clone()`, which for `Copy`
// types is exactly as cheap as a `memcpy` and for owning types does the
// right thing.
unsafe fn ctor_clone_bytes<T: Clone>(dst: *mut u8, src: *const u8, count: usize) {
    // SAFETY: caller guarantees `dst` is uninitialized for `count`
    // elements and `src` holds `count` valid, live `T`s that remain live
    // (this never reads `src` destructively).
    unsafe {
        let dst = dst.cast::<T>();
        let src = src.cast::<T>();
        for i in 0..count {
            ptr::write(dst.add(i), (*src.add(i)).clone());
        }
    }
}

unsafe fn asgn_copy_bytes<T: Clone>(dst: *mut u8, src: *const u8, count: usize) {
    // SAFETY: both ranges hold `count` valid `T`s; `dst` is already
    // initialized so we assign through clone rather than overwrite raw
    // bytes (avoids leaking `dst`'s previous value's resources).
    unsafe {
        let dst = dst.cast::<T>();
        let src = src.cast::<T>();
        for i in 0..count {
            *dst.add(i) = (*src.add(i)).clone();
        }
    }
}

unsafe fn asgn_move_bytes<T>(dst: *mut u8, src: *mut u8, count: usize) {
    // SAFETY: see `asgn_copy_bytes`; here we move instead of clone, the
    // source is never read again.
    unsafe {
        let dst = dst.cast::<T>();
        let src = src.cast::<T>();
        for i in 0..count {
            ptr::drop_in_place(dst.add(i));
            ptr::copy_nonoverlapping(src.add(i), dst.add(i), 1);
        }
    }
}

unsafe fn dtor_bytes<T>(ptr: *mut u8, count: usize) {
    // SAFETY: caller guarantees `ptr` holds `count` valid, live `T`s.
    unsafe {
        let ptr = ptr.cast::<T>();
        for i in 0..count {
            core::ptr::drop_in_place(ptr.add(i));
        }
    }
}

unsafe fn hash_bytes<T: core::hash::Hash>(ptr: *const u8) -> u64 {
    use core::hash::{Hash, Hasher};
    // A FNV-1a hasher: deterministic and dependency-free, matching the
    // "no new hashing crate" posture (the element hash here backs
    // `TMap`/`TSet` lookups, not a security-sensitive MAC — see spec.md
    // §9's note on not reusing a hash as a MAC).
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
    // SAFETY: caller guarantees `ptr` is a valid, live `T`.
    unsafe { (*ptr.cast::<T>()).hash(&mut hasher) };
    hasher.finish()
}

unsafe fn eq_bytes<T: PartialEq>(a: *const u8, b: *const u8) -> bool {
    // SAFETY: caller guarantees both point at valid, live `T`s.
    unsafe { *a.cast::<T>() == *b.cast::<T>() }
}

unsafe fn default_ctor_bytes<T: Default>(dst: *mut u8, count: usize) {
    // SAFETY: `dst` is uninitialized memory for `count` elements of `T`.
    unsafe {
        let dst = dst.cast::<T>();
        for i in 0..count {
            ptr::write(dst.add(i), T::default());
        }
    }
}

/// Builds the ops vtable for an ordinary dense Rust value type.
///
/// Cannot be `const fn` (trait methods used inside aren't yet callable in
/// const context on stable), so each `T::descriptor()` below backs its
/// `'static` reference with a `static` cell computed once via
/// [`static_cell`] instead of being a literal `const`.
fn build_ops<T>() -> TypeOps
where
    T: Clone + PartialEq + Default + core::hash::Hash + 'static,
{
    TypeOps {
        refer_ctor: ctor_clone_bytes::<T>,
        move_ctor: ctor_move_bytes::<T>,
        copy_ctor: ctor_clone_bytes::<T>,
        clone_ctor: ctor_clone_bytes::<T>,
        disown_ctor: ctor_clone_bytes::<T>,
        abandon_ctor: ctor_move_bytes::<T>,
        refer_asgn: asgn_copy_bytes::<T>,
        move_asgn: asgn_move_bytes::<T>,
        copy_asgn: asgn_copy_bytes::<T>,
        clone_asgn: asgn_copy_bytes::<T>,
        disown_asgn: asgn_copy_bytes::<T>,
        abandon_asgn: asgn_move_bytes::<T>,
        dtor: dtor_bytes::<T>,
        resolver: None,
        hash: hash_bytes::<T>,
        eq: eq_bytes::<T>,
        default_ctor: Some(default_ctor_bytes::<T>),
    }
}

/// One-shot lazily-initialized static, used to back `ElementOps::descriptor`
/// without requiring `T`'s bounds to be usable in a `const` context.
struct OnceCell<T> {
    value: core::cell::UnsafeCell<Option<T>>,
    state: core::sync::atomic::AtomicU8,
}

const ONCE_UNINIT: u8 = 0;
const ONCE_INITIALIZING: u8 = 1;
const ONCE_INIT: u8 = 2;

// SAFETY: `value` is only ever written by the single thread that wins the
// `compare_exchange` in `get_or_init`; every other thread either observes
// `ONCE_UNINIT` (and races the same CAS) or spins on `state` until it reads
// `ONCE_INIT`, which happens-after the winner's release store, so no two
// threads ever write or read-while-uninitialized concurrently.
unsafe impl<T: Sync> Sync for OnceCell<T> {}

impl<T> OnceCell<T> {
    const fn new() -> Self {
        Self {
            value: core::cell::UnsafeCell::new(None),
            state: core::sync::atomic::AtomicU8::new(ONCE_UNINIT),
        }
    }

    fn get_or_init(&self, f: impl FnOnce() -> T) -> &T {
        use core::sync::atomic::Ordering;
        if self
            .state
            .compare_exchange(ONCE_UNINIT, ONCE_INITIALIZING, Ordering::Acquire, Ordering::Acquire)
            .is_ok()
        {
            let value = f();
            // SAFETY: this thread is the sole winner of the CAS above; no
            // other thread writes or reads `value` until `state` is
            // published as `ONCE_INIT` below.
            unsafe {
                *self.value.get() = Some(value);
            }
            self.state.store(ONCE_INIT, Ordering::Release);
        } else {
            // Lost the race: spin until the winner's write is visible.
            while self.state.load(Ordering::Acquire) != ONCE_INIT {
                core::hint::spin_loop();
            }
        }
        // SAFETY: `state == ONCE_INIT` happens-after the write above.
        unsafe { (*self.value.get()).as_ref().unwrap() }
    }
}

/// Implements [`ElementOps`] for an ordinary dense value type using the
/// default byte-level ctor/assigner bank built by [`build_ops`].
#[macro_export]
macro_rules! impl_element_ops {
    ($t:ty) => {
        impl $crate::rtti::ElementOps for $t {
            fn descriptor() -> &'static $crate::rtti::TypeDescriptor {
                static OPS: $crate::rtti::__OnceCellOps<$t> =
                    $crate::rtti::__OnceCellOps::new();
                static DESC: $crate::rtti::__OnceCellDesc<$t> =
                    $crate::rtti::__OnceCellDesc::new();
                let ops: &'static $crate::rtti::TypeOps =
                    OPS.get_or_init(|| $crate::rtti::__build_ops::<$t>());
                DESC.get_or_init(|| $crate::rtti::TypeDescriptor {
                    stride: ::core::mem::size_of::<$t>(),
                    align: ::core::mem::align_of::<$t>(),
                    flags: $crate::rtti::__default_flags::<$t>(),
                    token: ::core::any::type_name::<$t>(),
                    ops,
                })
            }
        }
    };
}

// Re-exported (doc(hidden)) plumbing for `impl_element_ops!`.
#[doc(hidden)]
pub type __OnceCellOps<T> = OnceCell<TypeOps>;
#[doc(hidden)]
pub type __OnceCellDesc<T> = OnceCell<TypeDescriptor>;
#[doc(hidden)]
pub fn __build_ops<T>() -> TypeOps
where
    T: Clone + PartialEq + Default + core::hash::Hash + 'static,
{
    build_ops::<T>()
}
#[doc(hidden)]
pub fn __default_flags<T>() -> TypeFlags
where
    T: Default,
{
    let mut flags = TypeFlags::DEFAULT_CONSTRUCTIBLE;
    if core::mem::size_of::<T>() > 0 && !core::mem::needs_drop::<T>() {
        flags |= TypeFlags::POD;
    }
    flags
}

// Blanket coverage for primitive element types used throughout the tests
// and by `TVec`/`TMap` in the rest of this crate.
impl_element_ops!(i8);
impl_element_ops!(i16);
impl_element_ops!(i32);
impl_element_ops!(i64);
impl_element_ops!(isize);
impl_element_ops!(u8);
impl_element_ops!(u16);
impl_element_ops!(u32);
impl_element_ops!(u64);
impl_element_ops!(usize);
impl_element_ops!(bool);
impl_element_ops!(char);

#[cfg(any(test, feature = "std"))]
mod std_impls {
    use super::*;

    impl_element_ops!(::std::string::String);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_is_identity_stable() {
        let a = i32::descriptor();
        let b = i32::descriptor();
        assert!(a.is(b));
        assert_eq!(a.stride, size_of::<i32>());
        assert_eq!(a.align, align_of::<i32>());
    }

    #[test]
    fn distinct_types_are_not_is() {
        let a = i32::descriptor();
        let b = i64::descriptor();
        assert!(!a.is(b));
    }

    #[test]
    fn pod_primitive_is_flagged_pod() {
        assert!(i32::descriptor().is_pod());
    }

    #[test]
    fn non_pod_type_is_not_flagged_pod() {
        assert!(!<::std::string::String as ElementOps>::descriptor().is_pod());
    }

    // `copy_ctor`/`clone_ctor`/`refer_ctor`/`disown_ctor` must go through
    // `T::clone()`, not a raw byte copy: a `String`'s heap buffer would
    // otherwise end up owned by two live values, and dropping both would
    // double-free. These run under Miri-style scrutiny only in spirit
    // (this crate doesn't wire up Miri), so the test instead asserts the
    // two strings are independently mutable and that both still compare
    // equal content-wise after the source is dropped.
    #[test]
    fn clone_ctor_produces_an_independent_allocation() {
        let ty = <::std::string::String as ElementOps>::descriptor();
        let mut src = ::std::string::String::from("hello");
        let mut dst = ::core::mem::MaybeUninit::<::std::string::String>::uninit();
        // SAFETY: `dst` is uninitialized for one `String`; `src` is a
        // live `String` that remains live and untouched by this call.
        unsafe {
            (ty.ops.clone_ctor)(
                dst.as_mut_ptr().cast::<u8>(),
                (&raw const src).cast::<u8>(),
                1,
            );
        }
        // SAFETY: `clone_ctor` fully initialized `dst` above.
        let mut dst = unsafe { dst.assume_init() };
        dst.push_str(", world");
        assert_eq!(src, "hello");
        assert_eq!(dst, "hello, world");
        drop(src);
        assert_eq!(dst, "hello, world");
    }
}
