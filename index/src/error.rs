// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Definition of [`BlockIndexError`].

extern crate alloc;

use crate::utils_common;
use core::{convert, fmt};

/// Error type returned by [`BlockIndex`](crate::BlockIndex) primitives.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BlockIndexError {
    /// The block number is not within the tracked range.
    ///
    /// Returned for block numbers at or beyond the
    /// [capacity](crate::BlockIndex::capacity). No state has been changed.
    OutOfRange { block: u64 },

    /// No free block is left to allocate.
    Exhausted,

    /// A memory allocation has failed.
    MemoryAllocationFailure,

    /// The number of bitmap words needed for the requested capacity is not
    /// representable on the target.
    DimensionsNotSupported,

    /// Bitmap words handed in for reloading don't match the capacity.
    BitmapLengthMismatch { expected: usize, actual: usize },

    /// Reconciling to a smaller capacity would discard an allocated block.
    ///
    /// `block` is the lowest allocated block at or beyond the requested
    /// capacity. No state has been changed.
    ShrinkDiscardsAllocated { block: u64 },
}

impl convert::From<convert::Infallible> for BlockIndexError {
    fn from(value: convert::Infallible) -> Self {
        match value {}
    }
}

impl convert::From<utils_common::alloc::TryNewError> for BlockIndexError {
    fn from(value: utils_common::alloc::TryNewError) -> Self {
        match value {
            utils_common::alloc::TryNewError::MemoryAllocationFailure => Self::MemoryAllocationFailure,
        }
    }
}

impl convert::From<alloc::collections::TryReserveError> for BlockIndexError {
    fn from(_value: alloc::collections::TryReserveError) -> Self {
        Self::MemoryAllocationFailure
    }
}

impl fmt::Display for BlockIndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { block } => write!(f, "block {block} out of range"),
            Self::Exhausted => write!(f, "no free block left"),
            Self::MemoryAllocationFailure => write!(f, "memory allocation failure"),
            Self::DimensionsNotSupported => write!(f, "capacity not supported"),
            Self::BitmapLengthMismatch { expected, actual } => {
                write!(f, "bitmap has {actual} words, expected {expected}")
            }
            Self::ShrinkDiscardsAllocated { block } => {
                write!(f, "shrinking would discard allocated block {block}")
            }
        }
    }
}

impl core::error::Error for BlockIndexError {}
