// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Failure modes for container operations.
//!
//! Recoverable errors ([`Error::TypeMismatch`], [`Error::IntentUnsupported`])
//! are signaled at call boundaries and never corrupt container state: the
//! operation they describe is atomic. Unrecoverable errors
//! ([`Error::AllocationFailure`], [`Error::Overflow`]) terminate the
//! operation, possibly leaving the container modified, but every structural
//! invariant still holds afterward.

use core::fmt;

use crate::rtti::TypeDescriptor;

/// Represents an operation that could not complete.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// Writing to a constant or static block, or removing from a static
    /// block.
    AccessError,
    /// A type-constrained mutation was attempted with an incompatible type,
    /// or a lookup used a key of the wrong type.
    TypeMismatch {
        expected: &'static TypeDescriptor,
        found: &'static TypeDescriptor,
    },
    /// The allocator returned null.
    AllocationFailure,
    /// The hash table could not grow further, or a serialized size
    /// exceeded what is representable.
    Overflow,
    /// The requested intent is not exported by the element type's
    /// descriptor.
    IntentUnsupported,
    /// Dereferencing a missing (deferred) block.
    MissingBound,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AccessError => {
                write!(f, "attempted to mutate a constant or static block")
            }
            Error::TypeMismatch { expected, found } => {
                write!(
                    f,
                    "type mismatch: expected `{}`, found `{}`",
                    expected.token, found.token
                )
            }
            Error::AllocationFailure => write!(f, "allocator returned null"),
            Error::Overflow => write!(f, "capacity overflow"),
            Error::IntentUnsupported => {
                write!(f, "element type does not support the requested intent")
            }
            Error::MissingBound => write!(f, "block is missing (deferred)"),
        }
    }
}

impl core::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
