// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! A container core that unifies statically-typed and type-erased
//! containers under a single binary layout.
//!
//! Every container built on top of [`block::Block`] — typed or erased,
//! vector or map or set — shares an identical header and refcounted
//! heap layout, so a typed container can be reinterpreted as a
//! type-erased one (and back) after a single runtime type check,
//! without copying.
//!
//! The crate is organized around three subsystems:
//!
//! - [`intent`]: the six named ownership-transfer modes (refer, move,
//!   copy, clone, disown, abandon) threaded through every constructor,
//!   assigner, and insertion operation.
//! - [`block`]: the fixed-layout [`block::Block`] descriptor and all
//!   element lifecycle work, dispatched through an [`rtti`] vtable.
//! - [`hash::robin`]: the open-addressed Robin-Hood table that powers
//!   [`map`] and [`set`].

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![cfg_attr(nightly, feature(allocator_api))]

#[cfg(nightly)]
extern crate alloc;

pub mod alloc_ref;
pub mod block;
pub mod core_compat;
pub mod error;
pub mod hash;
pub mod intent;
pub mod map;
pub mod pair;
pub mod rtti;
pub mod set;
pub mod vec;

pub use core_compat::alloc::{Allocator, Global};
pub use error::Error;
pub use map::{Map, TMap};
pub use pair::{Pair, TPair};
pub use set::{Set, TSet};
pub use vec::{TVec, Vec};
