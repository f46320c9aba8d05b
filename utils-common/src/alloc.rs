// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Fallible memory allocation helpers.
//!
//! The global allocator's infallible entry points abort on memory exhaustion.
//! The helpers here report a [`TryNewError`] instead, so that callers can
//! propagate the failure.

extern crate alloc;
use alloc::{collections, vec::Vec};

use core::convert;

/// Error type returned by the fallible allocation helpers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TryNewError {
    /// A memory allocation has failed.
    MemoryAllocationFailure,
}

impl convert::From<collections::TryReserveError> for TryNewError {
    fn from(_value: collections::TryReserveError) -> Self {
        Self::MemoryAllocationFailure
    }
}

/// Allocate a [`Vec`] of exactly `len` elements, all initialized to
/// `T::default()`.
///
/// # Arguments:
///
/// * `len` - Number of elements to allocate.
pub fn try_alloc_vec<T: Default>(len: usize) -> Result<Vec<T>, TryNewError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)?;
    v.resize_with(len, T::default);
    Ok(v)
}

/// Grow or shrink `v` to exactly `len` elements.
///
/// Any new elements get initialized with `T::default()`. Shrinking never
/// fails.
///
/// # Arguments:
///
/// * `v` - The [`Vec`] to resize.
/// * `len` - The new length.
pub fn try_resize_vec<T: Default>(v: &mut Vec<T>, len: usize) -> Result<(), TryNewError> {
    if len <= v.len() {
        v.truncate(len);
    } else {
        v.try_reserve_exact(len - v.len())?;
        v.resize_with(len, T::default);
    }
    Ok(())
}

#[test]
fn test_try_alloc_vec() {
    let v = try_alloc_vec::<u64>(0).unwrap();
    assert!(v.is_empty());

    let v = try_alloc_vec::<u32>(5).unwrap();
    assert_eq!(v.len(), 5);
    assert!(v.iter().all(|w| *w == 0));
}

#[test]
fn test_try_alloc_vec_too_large() {
    assert_eq!(
        try_alloc_vec::<u64>(usize::MAX).unwrap_err(),
        TryNewError::MemoryAllocationFailure
    );
}

#[test]
fn test_try_resize_vec() {
    let mut v = Vec::from([1u64, 2, 3]);
    try_resize_vec(&mut v, 5).unwrap();
    assert_eq!(v.as_slice(), &[1, 2, 3, 0, 0]);
    try_resize_vec(&mut v, 2).unwrap();
    assert_eq!(v.as_slice(), &[1, 2]);
}
