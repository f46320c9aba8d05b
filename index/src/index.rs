// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Implementation of [`BlockIndex`].

extern crate alloc;
use alloc::vec::Vec;

use crate::{
    error::BlockIndexError,
    utils_common::alloc::{try_alloc_vec, try_resize_vec},
    word::{BitmapWord, bitmap_words, block_position, last_word_valid_mask},
};
use core::{iter, mem};

/// Allocation state of a single block, as reported by
/// [`BlockIndex::check()`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BlockState {
    Allocated,
    Free,
}

/// Outcome of a successful [`BlockIndex::deallocate()`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Deallocation {
    /// The block had been allocated and is free now.
    Released { block: u64 },
    /// The block had been free already, nothing changed.
    AlreadyFree { block: u64 },
}

impl Deallocation {
    /// The block number the deallocation request had been made for.
    pub fn block(&self) -> u64 {
        match self {
            Self::Released { block } | Self::AlreadyFree { block } => *block,
        }
    }
}

/// Bitmap tracking the allocation state of a fixed range of blocks.
///
/// Blocks are numbered `0..capacity`, each is represented by one bit in a
/// sequence of [`BitmapWord`]s. Padding bits in the last word beyond the
/// capacity are kept clear and never handed out.
///
/// The bitmap word width is selected through `W`, e.g. `u32`, `u64` or the
/// target's [`NativeBitmapWord`](crate::NativeBitmapWord).
pub struct BlockIndex<W: BitmapWord = u64> {
    bitmap: Vec<W>,
    capacity: u64,
    free_count: u64,
}

impl<W: BitmapWord> BlockIndex<W> {
    /// Instantiate a [`BlockIndex`] with all blocks free.
    ///
    /// # Arguments:
    ///
    /// * `capacity` - Total number of blocks to track.
    pub fn new(capacity: u64) -> Result<Self, BlockIndexError> {
        let bitmap = try_alloc_vec(bitmap_words::<W>(capacity)?)?;
        log::debug!(
            "block index: new, capacity={}, {} words of {} bits",
            capacity,
            bitmap.len(),
            W::BITS
        );
        Ok(Self {
            bitmap,
            capacity,
            free_count: capacity,
        })
    }

    /// Instantiate a [`BlockIndex`] from previously saved bitmap words.
    ///
    /// The words are typically obtained from [`as_words()`](Self::as_words)
    /// or [`into_words()`](Self::into_words) and restored from some
    /// persistent storage by the user. The free block count gets recomputed
    /// from the bitmap contents, any padding bits beyond `capacity` are
    /// cleared.
    ///
    /// # Arguments:
    ///
    /// * `bitmap` - The bitmap words. Their count must match exactly what's
    ///   needed for tracking `capacity` blocks.
    /// * `capacity` - Total number of blocks tracked by `bitmap`.
    pub fn from_words(bitmap: Vec<W>, capacity: u64) -> Result<Self, BlockIndexError> {
        let expected = bitmap_words::<W>(capacity)?;
        if bitmap.len() != expected {
            return Err(BlockIndexError::BitmapLengthMismatch {
                expected,
                actual: bitmap.len(),
            });
        }

        let mut index = Self {
            bitmap,
            capacity,
            free_count: 0,
        };
        index.clear_padding();
        index.free_count = index.count_free();
        log::debug!(
            "block index: reloaded, capacity={}, free={}",
            index.capacity,
            index.free_count
        );
        Ok(index)
    }

    /// Total number of blocks tracked.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of currently free blocks.
    pub fn free_count(&self) -> u64 {
        self.free_count
    }

    /// Number of currently allocated blocks.
    pub fn allocated_count(&self) -> u64 {
        self.capacity - self.free_count
    }

    /// Size of the backing bitmap storage in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.bitmap.len() * mem::size_of::<W>()
    }

    /// Read-only view on the raw bitmap words, e.g. for saving them.
    pub fn as_words(&self) -> &[W] {
        &self.bitmap
    }

    /// Mutable access to the raw bitmap words.
    ///
    /// Any modification made through the returned slice must be followed by a
    /// [`sync()`](Self::sync) before the [`BlockIndex`] is used again.
    pub fn words_mut(&mut self) -> &mut [W] {
        &mut self.bitmap
    }

    /// Consume the [`BlockIndex`] and return its bitmap words.
    pub fn into_words(self) -> Vec<W> {
        self.bitmap
    }

    /// Query a block's allocation state.
    ///
    /// # Arguments:
    ///
    /// * `block` - The block number, must be less than the
    ///   [capacity](Self::capacity).
    pub fn check(&self, block: u64) -> Result<BlockState, BlockIndexError> {
        if block >= self.capacity {
            return Err(BlockIndexError::OutOfRange { block });
        }

        let (word_index, bit) = block_position::<W>(block);
        if self.bitmap[word_index] & W::bit(bit) != W::EMPTY {
            Ok(BlockState::Allocated)
        } else {
            Ok(BlockState::Free)
        }
    }

    /// Allocate the lowest numbered free block.
    ///
    /// On success, the allocated block's number is returned. If all blocks
    /// are in use already, [`BlockIndexError::Exhausted`] is returned and no
    /// state is changed.
    pub fn allocate(&mut self) -> Result<u64, BlockIndexError> {
        let bitmap_words = self.bitmap.len();
        for word_index in 0..bitmap_words {
            let mut word = self.bitmap[word_index];
            if word_index + 1 == bitmap_words {
                // Treat the excess high bits not backed by any block as allocated.
                word |= !last_word_valid_mask::<W>(self.capacity);
            }

            if let Some(bit) = word.lowest_clear_bit() {
                self.bitmap[word_index] |= W::bit(bit);
                debug_assert!(self.free_count != 0);
                self.free_count -= 1;

                let block = ((word_index as u64) << W::BITS_LOG2) | u64::from(bit);
                log::trace!("block index: allocated block {}, free={}", block, self.free_count);
                return Ok(block);
            }
        }

        log::trace!("block index: exhausted, capacity={}", self.capacity);
        Err(BlockIndexError::Exhausted)
    }

    /// Free a block.
    ///
    /// Freeing an already free block is not an error, but reported as
    /// [`Deallocation::AlreadyFree`]. The free block count is only updated
    /// for blocks actually transitioning from allocated to free.
    ///
    /// # Arguments:
    ///
    /// * `block` - The block number, must be less than the
    ///   [capacity](Self::capacity).
    pub fn deallocate(&mut self, block: u64) -> Result<Deallocation, BlockIndexError> {
        if block >= self.capacity {
            return Err(BlockIndexError::OutOfRange { block });
        }

        let (word_index, bit) = block_position::<W>(block);
        let mask = W::bit(bit);
        let word = &mut self.bitmap[word_index];
        if *word & mask == W::EMPTY {
            log::warn!("block index: block {} freed while not allocated", block);
            return Ok(Deallocation::AlreadyFree { block });
        }

        *word &= !mask;
        self.free_count += 1;
        debug_assert!(self.free_count <= self.capacity);
        log::trace!("block index: deallocated block {}, free={}", block, self.free_count);
        Ok(Deallocation::Released { block })
    }

    /// Reconcile the free block count with the bitmap contents.
    ///
    /// To be invoked after the bitmap words have been modified externally,
    /// c.f. [`words_mut()`](Self::words_mut). The capacity gets rebound to
    /// `capacity`, with the bitmap storage extended by free blocks or
    /// truncated as needed. Padding bits beyond the new capacity are cleared.
    ///
    /// Shrinking is rejected with [`BlockIndexError::ShrinkDiscardsAllocated`]
    /// if any block at or beyond the new capacity is allocated. In case of an
    /// error, no state is changed.
    ///
    /// On success, the recomputed free block count is returned.
    ///
    /// # Arguments:
    ///
    /// * `capacity` - The new total number of blocks to track.
    pub fn sync(&mut self, capacity: u64) -> Result<u64, BlockIndexError> {
        let new_bitmap_words = bitmap_words::<W>(capacity)?;
        if capacity < self.capacity {
            if let Some(block) = self.first_allocated_in_range(capacity, self.capacity) {
                log::warn!(
                    "block index: sync to capacity {} rejected, block {} is allocated",
                    capacity,
                    block
                );
                return Err(BlockIndexError::ShrinkDiscardsAllocated { block });
            }
        }

        try_resize_vec(&mut self.bitmap, new_bitmap_words)?;
        self.capacity = capacity;
        self.clear_padding();
        self.free_count = self.count_free();
        log::debug!(
            "block index: synced, capacity={}, free={}",
            self.capacity,
            self.free_count
        );
        Ok(self.free_count)
    }

    /// Iterate over the numbers of all allocated blocks in ascending order.
    pub fn iter_allocated(&self) -> AllocatedBlocksIterator<'_, W> {
        AllocatedBlocksIterator::new(self)
    }

    /// Clear any bits in the last word beyond the capacity.
    fn clear_padding(&mut self) {
        if let Some(last) = self.bitmap.last_mut() {
            *last &= last_word_valid_mask::<W>(self.capacity);
        }
    }

    /// Count the free blocks by examining the bitmap.
    ///
    /// Padding bits must be clear.
    fn count_free(&self) -> u64 {
        let allocated = self
            .bitmap
            .iter()
            .map(|word| u64::from(word.hamming_weight()))
            .sum::<u64>();
        debug_assert!(allocated <= self.capacity);
        self.capacity - allocated
    }

    /// Find the lowest numbered allocated block in the range `begin..end`.
    ///
    /// `end` must not exceed the capacity.
    fn first_allocated_in_range(&self, begin: u64, end: u64) -> Option<u64> {
        debug_assert!(end <= self.capacity);
        self.iter_allocated().skip_to(begin).next().filter(|block| *block < end)
    }
}

#[cfg(feature = "zeroize")]
impl<W: BitmapWord + zeroize::Zeroize> zeroize::Zeroize for BlockIndex<W> {
    /// Wipe the bitmap, rendering all blocks free.
    fn zeroize(&mut self) {
        for word in self.bitmap.iter_mut() {
            word.zeroize();
        }
        self.free_count = self.capacity;
    }
}

/// Iterator over the numbers of a [`BlockIndex`]' allocated blocks.
///
/// Created through [`BlockIndex::iter_allocated()`].
pub struct AllocatedBlocksIterator<'a, W: BitmapWord> {
    bitmap: &'a [W],
    word_index: usize,
    /// Remaining not yet reported allocated blocks in the current word.
    word: W,
}

impl<'a, W: BitmapWord> AllocatedBlocksIterator<'a, W> {
    fn new(index: &'a BlockIndex<W>) -> Self {
        Self {
            bitmap: &index.bitmap,
            word_index: 0,
            word: index.bitmap.first().copied().unwrap_or(W::EMPTY),
        }
    }

    /// Skip forward to `block`, only allocated blocks at or after it will be
    /// reported.
    fn skip_to(mut self, block: u64) -> Self {
        let (word_index, bit) = block_position::<W>(block);
        if word_index >= self.bitmap.len() {
            self.word_index = self.bitmap.len();
            self.word = W::EMPTY;
        } else if word_index >= self.word_index {
            self.word_index = word_index;
            self.word = self.bitmap[word_index] & !W::trailing_bits_mask(bit);
        }
        self
    }
}

impl<'a, W: BitmapWord> Iterator for AllocatedBlocksIterator<'a, W> {
    type Item = u64;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(bit) = self.word.lowest_set_bit() {
                self.word = self.word.clear_lowest_set_bit();
                return Some(((self.word_index as u64) << W::BITS_LOG2) | u64::from(bit));
            }

            if self.word_index + 1 >= self.bitmap.len() {
                self.word_index = self.bitmap.len();
                return None;
            }
            self.word_index += 1;
            self.word = self.bitmap[self.word_index];
        }
    }
}

impl<'a, W: BitmapWord> iter::FusedIterator for AllocatedBlocksIterator<'a, W> {}

#[cfg(test)]
fn test_check_all<W: BitmapWord>(index: &BlockIndex<W>, expected: impl Fn(u64) -> BlockState) {
    for block in 0..index.capacity() {
        assert_eq!(index.check(block).unwrap(), expected(block), "block {}", block);
    }
}

#[cfg(test)]
fn test_allocate_deallocate_realloc<W: BitmapWord>(capacity: u64, freed: &[u64]) {
    let mut index = BlockIndex::<W>::new(capacity).unwrap();
    assert_eq!(index.capacity(), capacity);
    assert_eq!(index.free_count(), capacity);

    for i in 0..capacity {
        assert_eq!(index.allocate().unwrap(), i);
        assert_eq!(index.free_count(), capacity - 1 - i);
    }
    assert_eq!(index.free_count(), 0);
    assert_eq!(index.allocate(), Err(BlockIndexError::Exhausted));
    assert_eq!(index.free_count(), 0);

    for (i, block) in freed.iter().enumerate() {
        assert_eq!(
            index.deallocate(*block).unwrap(),
            Deallocation::Released { block: *block }
        );
        assert_eq!(index.free_count(), i as u64 + 1);
    }
    test_check_all(&index, |block| {
        if freed.contains(&block) {
            BlockState::Free
        } else {
            BlockState::Allocated
        }
    });

    for (i, block) in freed.iter().enumerate() {
        assert_eq!(index.allocate().unwrap(), *block);
        assert_eq!(index.free_count(), (freed.len() - 1 - i) as u64);
    }
    assert_eq!(index.allocate(), Err(BlockIndexError::Exhausted));
}

#[test]
fn test_new() {
    let index = BlockIndex::<u32>::new(127).unwrap();
    assert_eq!(index.capacity(), 127);
    assert_eq!(index.free_count(), 127);
    assert_eq!(index.allocated_count(), 0);
    assert_eq!(index.as_words().len(), 4);
    assert_eq!(index.size_in_bytes(), 16);
    test_check_all(&index, |_| BlockState::Free);

    let index = BlockIndex::<u64>::new(127).unwrap();
    assert_eq!(index.as_words().len(), 2);
    assert_eq!(index.size_in_bytes(), 16);

    let mut index = BlockIndex::<u64>::new(0).unwrap();
    assert_eq!(index.size_in_bytes(), 0);
    assert_eq!(index.check(0), Err(BlockIndexError::OutOfRange { block: 0 }));
    assert_eq!(index.allocate(), Err(BlockIndexError::Exhausted));
}

#[test]
fn test_allocate_deallocate_16() {
    let mut index = BlockIndex::<u32>::new(16).unwrap();
    for i in 0..16 {
        assert_eq!(index.allocate().unwrap(), i);
        assert_eq!(index.free_count(), 15 - i);
    }
    assert_eq!(index.allocate(), Err(BlockIndexError::Exhausted));

    assert_eq!(index.deallocate(5).unwrap(), Deallocation::Released { block: 5 });
    assert_eq!(index.free_count(), 1);
    assert_eq!(index.as_words()[0], 0b1111_1111_1101_1111);

    assert_eq!(index.allocate().unwrap(), 5);
    assert_eq!(index.free_count(), 0);
    assert_eq!(index.as_words()[0], 0xffff);
}

#[test]
fn test_check_deallocate_out_of_range() {
    let mut index = BlockIndex::<u32>::new(16).unwrap();
    for i in 0..8 {
        assert_eq!(index.allocate().unwrap(), i);
    }
    assert_eq!(index.check(7).unwrap(), BlockState::Allocated);
    assert_eq!(index.check(8).unwrap(), BlockState::Free);
    assert_eq!(index.free_count(), 8);

    assert_eq!(index.allocate().unwrap(), 8);
    assert_eq!(index.free_count(), 7);

    assert_eq!(index.deallocate(16), Err(BlockIndexError::OutOfRange { block: 16 }));
    assert_eq!(index.free_count(), 7);
    assert_eq!(index.check(16), Err(BlockIndexError::OutOfRange { block: 16 }));
    // Still within the first bitmap word, but beyond the capacity.
    assert_eq!(index.check(31), Err(BlockIndexError::OutOfRange { block: 31 }));
    assert_eq!(
        index.deallocate(u64::MAX),
        Err(BlockIndexError::OutOfRange { block: u64::MAX })
    );
    assert_eq!(index.free_count(), 7);
}

#[test]
fn test_allocate_deallocate_48() {
    test_allocate_deallocate_realloc::<u32>(48, &[21, 30, 47]);
    test_allocate_deallocate_realloc::<u64>(48, &[21, 30, 47]);
}

#[test]
fn test_allocate_deallocate_113() {
    test_allocate_deallocate_realloc::<u32>(113, &[37, 51, 111]);
    test_allocate_deallocate_realloc::<u64>(113, &[37, 51, 111]);
    test_allocate_deallocate_realloc::<crate::NativeBitmapWord>(113, &[37, 51, 111]);
}

#[test]
fn test_allocate_word_aligned_capacity() {
    test_allocate_deallocate_realloc::<u32>(64, &[0, 31, 32, 63]);
    test_allocate_deallocate_realloc::<u64>(64, &[0, 63]);
}

#[test]
fn test_allocate_lowest_free() {
    let mut index = BlockIndex::<u32>::new(100).unwrap();
    for _ in 0..100 {
        index.allocate().unwrap();
    }
    // Free in descending order, allocation must still pick the lowest.
    for block in [90, 64, 33, 2] {
        index.deallocate(block).unwrap();
    }
    assert_eq!(index.allocate().unwrap(), 2);
    assert_eq!(index.allocate().unwrap(), 33);
    assert_eq!(index.allocate().unwrap(), 64);
    assert_eq!(index.allocate().unwrap(), 90);
}

#[test]
fn test_round_trip() {
    let mut index = BlockIndex::<u64>::new(70).unwrap();
    for _ in 0..10 {
        index.allocate().unwrap();
    }
    let free_count = index.free_count();
    let block = index.allocate().unwrap();
    assert_eq!(block, 10);
    assert_eq!(index.check(block).unwrap(), BlockState::Allocated);
    assert_eq!(index.deallocate(block).unwrap().block(), block);
    assert_eq!(index.free_count(), free_count);
    assert_eq!(index.check(block).unwrap(), BlockState::Free);
}

#[test]
fn test_double_free() {
    let mut index = BlockIndex::<u32>::new(16).unwrap();
    assert_eq!(index.allocate().unwrap(), 0);
    assert_eq!(index.allocate().unwrap(), 1);

    assert_eq!(index.deallocate(1).unwrap(), Deallocation::Released { block: 1 });
    assert_eq!(index.free_count(), 15);
    assert_eq!(index.deallocate(1).unwrap(), Deallocation::AlreadyFree { block: 1 });
    assert_eq!(index.free_count(), 15);
    assert_eq!(index.deallocate(9).unwrap(), Deallocation::AlreadyFree { block: 9 });
    assert_eq!(index.free_count(), 15);
    assert_eq!(index.check(0).unwrap(), BlockState::Allocated);
}

#[test]
fn test_sync() {
    let mut index = BlockIndex::<u32>::new(110).unwrap();
    assert_eq!(index.as_words().len(), 4);
    index.words_mut()[0] = u32::MAX;
    assert_eq!(index.free_count(), 110);
    assert_eq!(index.sync(110).unwrap(), 110 - 32);
    assert_eq!(index.free_count(), 110 - 32);
    assert_eq!(index.capacity(), 110);
    assert_eq!(index.allocate().unwrap(), 32);
}

#[test]
fn test_sync_clears_padding() {
    let mut index = BlockIndex::<u32>::new(40).unwrap();
    index.words_mut()[1] = u32::MAX;
    assert_eq!(index.sync(40).unwrap(), 32);
    assert_eq!(index.as_words()[1], 0xff);
    assert_eq!(index.allocate().unwrap(), 0);
}

#[test]
fn test_sync_resize() {
    let mut index = BlockIndex::<u64>::new(70).unwrap();
    for _ in 0..10 {
        index.allocate().unwrap();
    }

    assert_eq!(index.sync(200).unwrap(), 190);
    assert_eq!(index.capacity(), 200);
    assert_eq!(index.as_words().len(), 4);
    assert_eq!(index.check(199).unwrap(), BlockState::Free);

    assert_eq!(index.sync(10).unwrap(), 0);
    assert_eq!(index.as_words().len(), 1);
    assert_eq!(index.allocate(), Err(BlockIndexError::Exhausted));

    assert_eq!(
        index.sync(0),
        Err(BlockIndexError::ShrinkDiscardsAllocated { block: 0 })
    );
    for block in 0..10 {
        index.deallocate(block).unwrap();
    }
    assert_eq!(index.sync(0).unwrap(), 0);
    assert!(index.as_words().is_empty());
}

#[test]
fn test_sync_shrink_discards_allocated() {
    let mut index = BlockIndex::<u32>::new(100).unwrap();
    for _ in 0..40 {
        index.allocate().unwrap();
    }
    index.deallocate(35).unwrap();

    assert_eq!(
        index.sync(30),
        Err(BlockIndexError::ShrinkDiscardsAllocated { block: 30 })
    );
    assert_eq!(
        index.sync(35),
        Err(BlockIndexError::ShrinkDiscardsAllocated { block: 36 })
    );
    assert_eq!(index.capacity(), 100);
    assert_eq!(index.free_count(), 61);

    assert_eq!(index.sync(40).unwrap(), 1);
    assert_eq!(index.allocate().unwrap(), 35);
}

#[test]
fn test_from_words() {
    let mut index = BlockIndex::<u32>::new(48).unwrap();
    for _ in 0..48 {
        index.allocate().unwrap();
    }
    index.deallocate(21).unwrap();
    index.deallocate(47).unwrap();

    let words = Vec::from(index.as_words());
    let mut reloaded = BlockIndex::<u32>::from_words(words, 48).unwrap();
    assert_eq!(reloaded.free_count(), 2);
    assert_eq!(reloaded.allocate().unwrap(), 21);
    assert_eq!(reloaded.allocate().unwrap(), 47);
    assert_eq!(reloaded.allocate(), Err(BlockIndexError::Exhausted));

    assert_eq!(
        BlockIndex::<u32>::from_words(reloaded.into_words(), 100).err(),
        Some(BlockIndexError::BitmapLengthMismatch { expected: 4, actual: 2 })
    );

    let reloaded = BlockIndex::<u64>::from_words(Vec::from([u64::MAX]), 8).unwrap();
    assert_eq!(reloaded.free_count(), 0);
    assert_eq!(reloaded.as_words()[0], 0xff);
}

#[test]
fn test_iter_allocated() {
    let mut index = BlockIndex::<u32>::new(113).unwrap();
    assert_eq!(index.iter_allocated().next(), None);

    for _ in 0..113 {
        index.allocate().unwrap();
    }
    assert!(index.iter_allocated().eq(0..113));

    for block in 1..112 {
        index.deallocate(block).unwrap();
    }
    for block in 1..5 {
        assert_eq!(index.allocate().unwrap(), block);
    }
    assert!(index.iter_allocated().eq([0, 1, 2, 3, 4, 112]));

    index.deallocate(0).unwrap();
    index.deallocate(112).unwrap();
    assert!(index.iter_allocated().eq(1..5));
}

#[test]
fn test_iter_allocated_skip_to() {
    let mut index = BlockIndex::<u32>::new(100).unwrap();
    for _ in 0..100 {
        index.allocate().unwrap();
    }
    for block in 0..100 {
        if block % 10 != 0 {
            index.deallocate(block).unwrap();
        }
    }
    assert!(index.iter_allocated().skip_to(0).eq([0, 10, 20, 30, 40, 50, 60, 70, 80, 90]));
    assert!(index.iter_allocated().skip_to(31).eq([40, 50, 60, 70, 80, 90]));
    assert!(index.iter_allocated().skip_to(90).eq([90]));
    assert_eq!(index.iter_allocated().skip_to(91).next(), None);
    assert_eq!(index.iter_allocated().skip_to(1000).next(), None);
}

#[cfg(feature = "zeroize")]
#[test]
fn test_zeroize() {
    use zeroize::Zeroize as _;

    let mut index = BlockIndex::<u64>::new(100).unwrap();
    for _ in 0..70 {
        index.allocate().unwrap();
    }
    index.zeroize();
    assert_eq!(index.free_count(), 100);
    assert!(index.as_words().iter().all(|w| *w == 0));
    assert_eq!(index.allocate().unwrap(), 0);
}
