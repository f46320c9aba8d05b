// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Defininitions and functionality related to a
//! [`BlockIndex`](crate::BlockIndex)'s [`BitmapWord`].

use crate::error::BlockIndexError;
use crate::utils_common::bitmanip::UBitManip;
use core::{fmt, ops};

/// [`BlockIndex`](crate::BlockIndex) storage word.
///
/// Each bit tracks the allocation state of one block, bit `i` of word `j`
/// corresponding to block `j * BITS + i`. A set bit means allocated.
pub trait BitmapWord:
    UBitManip
    + Copy
    + Default
    + Eq
    + fmt::Debug
    + ops::Not<Output = Self>
    + ops::BitAnd<Output = Self>
    + ops::BitAndAssign
    + ops::BitOr<Output = Self>
    + ops::BitOrAssign
    + 'static
{
    /// Base-2 logarithm of [`UBitManip::BITS`].
    const BITS_LOG2: u32;

    /// Word with all blocks allocated.
    const FULL: Self;

    /// Word with all blocks free.
    const EMPTY: Self;

    /// Word with only the bit at `offset` set.
    fn bit(offset: u32) -> Self;
}

macro_rules! impl_bitmap_word {
    ($t:ty) => {
        impl BitmapWord for $t {
            const BITS_LOG2: u32 = <$t>::BITS.ilog2();
            const FULL: Self = !0;
            const EMPTY: Self = 0;

            #[inline]
            fn bit(offset: u32) -> Self {
                debug_assert!(offset < <$t>::BITS);
                (1 as $t) << offset
            }
        }
    };
}

impl_bitmap_word!(u32);
impl_bitmap_word!(u64);
impl_bitmap_word!(usize);

/// The target's native [`BitmapWord`], 32 or 64 bits wide.
pub type NativeBitmapWord = usize;

/// Number of [`BitmapWord`]s needed to track `capacity` blocks.
pub(crate) fn bitmap_words<W: BitmapWord>(capacity: u64) -> Result<usize, BlockIndexError> {
    let words = (capacity >> W::BITS_LOG2) + u64::from(capacity & u64::trailing_bits_mask(W::BITS_LOG2) != 0);
    usize::try_from(words).map_err(|_| BlockIndexError::DimensionsNotSupported)
}

/// Split a block number into its bitmap word index and the bit offset within.
///
/// The block must be within the range tracked by an existing bitmap, so the
/// word index is representable as an `usize`.
#[inline]
pub(crate) fn block_position<W: BitmapWord>(block: u64) -> (usize, u32) {
    (
        (block >> W::BITS_LOG2) as usize,
        (block & u64::trailing_bits_mask(W::BITS_LOG2)) as u32,
    )
}

/// Mask of the bits in the last bitmap word which correspond to actual
/// blocks.
///
/// The remaining high bits are padding. `capacity` must not be zero.
#[inline]
pub(crate) fn last_word_valid_mask<W: BitmapWord>(capacity: u64) -> W {
    debug_assert!(capacity != 0);
    let valid_bits = ((capacity - 1) & u64::trailing_bits_mask(W::BITS_LOG2)) as u32 + 1;
    W::trailing_bits_mask(valid_bits)
}

#[test]
fn test_bitmap_words() {
    assert_eq!(bitmap_words::<u32>(0).unwrap(), 0);
    assert_eq!(bitmap_words::<u32>(1).unwrap(), 1);
    assert_eq!(bitmap_words::<u32>(32).unwrap(), 1);
    assert_eq!(bitmap_words::<u32>(33).unwrap(), 2);
    assert_eq!(bitmap_words::<u32>(110).unwrap(), 4);
    assert_eq!(bitmap_words::<u64>(113).unwrap(), 2);
    assert_eq!(bitmap_words::<u64>(128).unwrap(), 2);
    if usize::BITS < 64 {
        assert_eq!(
            bitmap_words::<u32>(u64::MAX),
            Err(BlockIndexError::DimensionsNotSupported)
        );
    }
}

#[test]
fn test_block_position() {
    assert_eq!(block_position::<u32>(0), (0, 0));
    assert_eq!(block_position::<u32>(31), (0, 31));
    assert_eq!(block_position::<u32>(32), (1, 0));
    assert_eq!(block_position::<u64>(111), (1, 47));
}

#[test]
fn test_last_word_valid_mask() {
    assert_eq!(last_word_valid_mask::<u32>(16), 0xffff);
    assert_eq!(last_word_valid_mask::<u32>(32), u32::MAX);
    assert_eq!(last_word_valid_mask::<u32>(33), 0b1);
    assert_eq!(last_word_valid_mask::<u64>(48), 0xffff_ffff_ffff);
    assert_eq!(last_word_valid_mask::<u64>(113), 0x1_ffff_ffff_ffff);
}
