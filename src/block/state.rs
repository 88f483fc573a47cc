// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! [`Block`](super::Block)'s state flags (`spec.md` §3).
//!
//! State composes additively on transfer, except [`BlockState::CONSTRAINED`]
//! which is inherited only from typed constructors.

use bitflags::bitflags;

bitflags! {
    /// Packed state flags carried inside every `Block`. Default state is
    /// all-zero.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct BlockState: u16 {
        /// The block has a pinned element type.
        const TYPED = 1 << 0;
        /// The element type is pinned and may not widen (constrained).
        const CONSTRAINED = 1 << 1;
        /// Borrowed: the block does not own its memory (no `Allocation`).
        const STATIC = 1 << 2;
        /// Read-only: mutation fails with `AccessError`.
        const CONSTANT = 1 << 3;
        /// Alternative semantics, consumed by higher layers.
        const OR = 1 << 4;
        /// The block refers to a deferred, not-yet-available value.
        const MISSING = 1 << 5;
        /// Describes a value yet to occur (temporal state).
        const FUTURE = 1 << 6;
        /// Describes a value that already occurred (temporal state).
        const PAST = 1 << 7;
        /// The element region is compressed (inert flag; no codec lives
        /// in the core, see `spec.md` §1's compression non-goal).
        const COMPRESSED = 1 << 8;
        /// The element region is encrypted (inert flag; same caveat).
        const ENCRYPTED = 1 << 9;
    }
}

impl BlockState {
    /// Additive composition used by `block_transfer`: all bits carry over
    /// except `CONSTRAINED`, which only a typed constructor may set.
    #[must_use]
    pub fn compose(self, other: BlockState) -> BlockState {
        (self | other) & !BlockState::CONSTRAINED
    }
}
