// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Bitmap based allocation of numbered, fixed-size blocks.
//!
//! A [`BlockIndex`] tracks the allocation state of blocks `0..capacity` with
//! one bit each and hands out the lowest numbered free block on request. It
//! neither persists itself nor knows about block sizes, both are up to the
//! user.
//!
//! A [`BlockIndex`] provides no internal synchronization. Users sharing an
//! instance between threads must serialize all accesses, e.g. by wrapping it in
//! a single lock.

#![no_std]

use block_index_utils_common as utils_common;

mod error;
mod index;
mod word;

pub use error::BlockIndexError;
pub use index::{AllocatedBlocksIterator, BlockIndex, BlockState, Deallocation};
pub use word::{BitmapWord, NativeBitmapWord};
