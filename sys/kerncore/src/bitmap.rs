// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use sched_abi::Priority;

const WORD_BITS: usize = usize::BITS as usize;

/// Two-level bitmap with constant-time "highest set bit".
///
/// Each of the `LEAVES` leaf words holds one flag per index. The root word
/// holds one flag per leaf word, set iff that leaf is non-zero. Finding the
/// highest set index is then two leading-zero counts, no matter how many
/// indices are tracked.
///
/// This covers `LEAVES * usize::BITS` indices, and `LEAVES` must not exceed
/// `usize::BITS`.
#[derive(Clone, Debug)]
pub struct HierarchicalBitmap<const LEAVES: usize> {
    root: usize,
    leaves: [usize; LEAVES],
}

/// Bitmap with one bit per priority level.
pub type PrioBitmap =
    HierarchicalBitmap<{ Priority::LEVELS / usize::BITS as usize }>;

impl<const LEAVES: usize> HierarchicalBitmap<LEAVES> {
    const FITS_IN_ROOT: () =
        assert!(LEAVES > 0 && LEAVES <= WORD_BITS, "too many leaf words");

    /// Number of indices this bitmap tracks.
    pub const CAPACITY: usize = LEAVES * WORD_BITS;

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::FITS_IN_ROOT;
        Self {
            root: 0,
            leaves: [0; LEAVES],
        }
    }

    #[inline(always)]
    fn split(bit: usize) -> (usize, usize) {
        (bit / WORD_BITS, bit % WORD_BITS)
    }

    /// Sets `bit`, which must be below `CAPACITY`.
    #[inline]
    pub fn set(&mut self, bit: usize) {
        let (w, b) = Self::split(bit);
        self.leaves[w] |= 1 << b;
        self.root |= 1 << w;
    }

    /// Clears `bit`, which must be below `CAPACITY`.
    #[inline]
    pub fn clear(&mut self, bit: usize) {
        let (w, b) = Self::split(bit);
        self.leaves[w] &= !(1 << b);
        if self.leaves[w] == 0 {
            self.root &= !(1 << w);
        }
    }

    pub fn is_set(&self, bit: usize) -> bool {
        let (w, b) = Self::split(bit);
        self.leaves[w] & (1 << b) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.root == 0
    }

    /// Returns the highest set index, or `None` if nothing is set.
    #[inline]
    pub fn find_highest_bit(&self) -> Option<u32> {
        if self.root == 0 {
            return None;
        }
        let top = usize::BITS - 1;
        let w = top - self.root.leading_zeros();
        let b = top - self.leaves[w as usize].leading_zeros();
        Some(w * usize::BITS + b)
    }
}

impl<const LEAVES: usize> Default for HierarchicalBitmap<LEAVES> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_no_highest_bit() {
        let bm = PrioBitmap::new();
        assert!(bm.is_empty());
        assert_eq!(bm.find_highest_bit(), None);
    }

    #[test]
    fn bit_zero_is_distinct_from_empty() {
        let mut bm = PrioBitmap::new();
        bm.set(0);
        assert_eq!(bm.find_highest_bit(), Some(0));
        bm.clear(0);
        assert_eq!(bm.find_highest_bit(), None);
    }

    #[test]
    fn highest_across_leaves() {
        let mut bm = PrioBitmap::new();
        bm.set(3);
        bm.set(70);
        bm.set(200);
        assert_eq!(bm.find_highest_bit(), Some(200));
        bm.clear(200);
        assert_eq!(bm.find_highest_bit(), Some(70));
        bm.clear(70);
        assert_eq!(bm.find_highest_bit(), Some(3));
        bm.set(255);
        assert_eq!(bm.find_highest_bit(), Some(255));
    }

    #[test]
    fn root_tracks_leaf_emptiness() {
        let mut bm = PrioBitmap::new();
        // Two bits in the same leaf word: clearing one must keep the root
        // bit for that word.
        bm.set(130);
        bm.set(131);
        bm.clear(131);
        assert!(!bm.is_empty());
        assert_eq!(bm.find_highest_bit(), Some(130));
        bm.clear(130);
        assert!(bm.is_empty());
    }

    #[test]
    fn clear_of_unset_bit_is_harmless() {
        let mut bm = PrioBitmap::new();
        bm.set(9);
        bm.clear(10);
        assert!(bm.is_set(9));
        assert!(!bm.is_set(10));
        assert_eq!(bm.find_highest_bit(), Some(9));
    }

    #[test]
    fn small_bitmap() {
        let mut bm = HierarchicalBitmap::<1>::new();
        assert_eq!(HierarchicalBitmap::<1>::CAPACITY, WORD_BITS);
        bm.set(WORD_BITS - 1);
        assert_eq!(bm.find_highest_bit(), Some(usize::BITS - 1));
    }
}
