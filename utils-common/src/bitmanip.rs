// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Bit manipulation primitives on unsigned integers.

/// Bit manipulation primitives implemented for all unsigned integer types.
pub trait UBitManip: Sized + Copy {
    /// Number of bits in `Self`.
    const BITS: u32;

    /// Obtain a value with the `n` least significant bits set.
    ///
    /// `n` may be anything from zero up to and including [`Self::BITS`].
    fn trailing_bits_mask(n: u32) -> Self;

    /// Locate the least significant clear bit.
    ///
    /// Returns `None` if all bits are set.
    fn lowest_clear_bit(self) -> Option<u32>;

    /// Locate the least significant set bit.
    ///
    /// Returns `None` if the value is zero.
    fn lowest_set_bit(self) -> Option<u32>;

    /// Clear the least significant set bit, if any.
    fn clear_lowest_set_bit(self) -> Self;

    /// Population count.
    fn hamming_weight(self) -> u32;
}

macro_rules! impl_ubitmanip {
    ($t:ty) => {
        impl UBitManip for $t {
            const BITS: u32 = <$t>::BITS;

            #[inline]
            fn trailing_bits_mask(n: u32) -> Self {
                debug_assert!(n <= Self::BITS);
                if n == Self::BITS { !0 } else { ((1 as $t) << n) - 1 }
            }

            #[inline]
            fn lowest_clear_bit(self) -> Option<u32> {
                (!self).lowest_set_bit()
            }

            #[inline]
            fn lowest_set_bit(self) -> Option<u32> {
                if self == 0 { None } else { Some(self.trailing_zeros()) }
            }

            #[inline]
            fn clear_lowest_set_bit(self) -> Self {
                self & self.wrapping_sub(1)
            }

            #[inline]
            fn hamming_weight(self) -> u32 {
                self.count_ones()
            }
        }
    };
}

impl_ubitmanip!(u8);
impl_ubitmanip!(u16);
impl_ubitmanip!(u32);
impl_ubitmanip!(u64);
impl_ubitmanip!(u128);
impl_ubitmanip!(usize);

#[test]
fn test_trailing_bits_mask() {
    assert_eq!(u32::trailing_bits_mask(0), 0);
    assert_eq!(u32::trailing_bits_mask(1), 0b1);
    assert_eq!(u32::trailing_bits_mask(14), 0x3fff);
    assert_eq!(u32::trailing_bits_mask(32), u32::MAX);
    assert_eq!(u64::trailing_bits_mask(63), u64::MAX >> 1);
    assert_eq!(u64::trailing_bits_mask(64), u64::MAX);
}

#[test]
fn test_lowest_clear_bit() {
    assert_eq!(0u32.lowest_clear_bit(), Some(0));
    assert_eq!(0b1u32.lowest_clear_bit(), Some(1));
    assert_eq!(0b1111u32.lowest_clear_bit(), Some(4));
    assert_eq!(0b1011u32.lowest_clear_bit(), Some(2));
    assert_eq!(u32::MAX.lowest_clear_bit(), None);
    assert_eq!((u32::MAX >> 1).lowest_clear_bit(), Some(31));

    assert_eq!(0u64.lowest_clear_bit(), Some(0));
    assert_eq!(0b1011u64.lowest_clear_bit(), Some(2));
    assert_eq!((u64::MAX >> 1).lowest_clear_bit(), Some(63));
    assert_eq!(u64::MAX.lowest_clear_bit(), None);
}

#[test]
fn test_lowest_set_bit() {
    assert_eq!(0u64.lowest_set_bit(), None);
    assert_eq!(0b1000u64.lowest_set_bit(), Some(3));
    assert_eq!((1u64 << 63).lowest_set_bit(), Some(63));
    assert_eq!(0b1010u8.clear_lowest_set_bit(), 0b1000);
    assert_eq!(0u8.clear_lowest_set_bit(), 0);
}

#[test]
fn test_hamming_weight() {
    assert_eq!(0u32.hamming_weight(), 0);
    assert_eq!(0xffu32.hamming_weight(), 8);
    assert_eq!(0xaaaa_aaaau32.hamming_weight(), 16);
    assert_eq!(u32::MAX.hamming_weight(), 32);
    assert_eq!(u64::MAX.hamming_weight(), 64);
}
