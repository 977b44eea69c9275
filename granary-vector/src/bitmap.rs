//! Bitmap

use std::fmt::Debug;

use crate::aligned_vec::{AlignedVec, AllocError};
use crate::utils::roundup_loops;

/// Underling type that stores the bitmap
pub type BitStore = u64;
/// Number of bits the bit store contains
pub const BIT_STORE_BITS: usize = std::mem::size_of::<BitStore>() * 8;

/// Bitmap, each boolean is stored as a single bit
///
/// Note that if all of the elements in a vector are not null, the vector's [`Bitmap`]
/// could be empty. Workspace batches always keep a bitmap with one bit per slot
pub struct Bitmap {
    /// Internal buffer stores the bits
    buffer: AlignedVec<BitStore>,
    /// Number of live bits in the allocation
    num_bits: usize,
}

impl Bitmap {
    /// Create a new empty [`Bitmap`]
    #[inline]
    pub fn new() -> Self {
        Self {
            buffer: AlignedVec::new(),
            num_bits: 0,
        }
    }

    /// Create a [`Bitmap`] that has `num_bits` bits, all of them are unset
    #[inline]
    pub fn zeroed(num_bits: usize) -> Self {
        Self {
            buffer: AlignedVec::zeroed(elts(num_bits)),
            num_bits,
        }
    }

    /// Fallible version of [`Self::zeroed`]
    #[inline]
    pub fn try_zeroed(num_bits: usize) -> Result<Self, AllocError> {
        Ok(Self {
            buffer: AlignedVec::try_zeroed(elts(num_bits))?,
            num_bits,
        })
    }

    /// Create a [`Bitmap`] from the raw bit stores
    ///
    /// # Panics
    ///
    /// Panics if `buffer` can not hold `num_bits` bits
    #[inline]
    pub fn from_raw(buffer: AlignedVec<BitStore>, num_bits: usize) -> Self {
        assert!(
            buffer.len() >= elts(num_bits),
            "Bitmap with `{num_bits}` bits needs `{}` bit stores, found `{}`",
            elts(num_bits),
            buffer.len()
        );
        Self { buffer, num_bits }
    }

    /// Get the underling raw_slice for the bitmap
    #[inline]
    pub fn as_raw_slice(&self) -> &[BitStore] {
        self.buffer.as_slice()
    }

    /// Get the mutable underling raw_slice for the bitmap. Bits beyond the length are
    /// ignored by the readers
    #[inline]
    pub fn as_raw_mut_slice(&mut self) -> &mut [BitStore] {
        self.buffer.as_mut_slice()
    }

    /// Returns true if the bitmap is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_bits == 0
    }

    /// Get number of bits in the bitmap
    #[inline]
    pub fn len(&self) -> usize {
        self.num_bits
    }

    /// Number of bytes allocated by the bitmap
    #[inline]
    pub fn capacity_in_bytes(&self) -> usize {
        self.buffer.capacity_in_bytes()
    }

    /// Get the bit with given index
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`
    #[inline]
    pub fn get(&self, index: usize) -> bool {
        assert!(
            index < self.num_bits,
            "Bit index `{index}` is out of range `{}`",
            self.num_bits
        );
        self.buffer.as_slice()[index / BIT_STORE_BITS] & (1 << (index % BIT_STORE_BITS)) != 0
    }

    /// Set the bit with given index
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`
    #[inline]
    pub fn set(&mut self, index: usize, val: bool) {
        assert!(
            index < self.num_bits,
            "Bit index `{index}` is out of range `{}`",
            self.num_bits
        );
        let bit_store = &mut self.buffer.as_mut_slice()[index / BIT_STORE_BITS];
        let mask = 1 << (index % BIT_STORE_BITS);
        if val {
            *bit_store |= mask;
        } else {
            *bit_store &= !mask;
        }
    }

    /// Unset all of the bits, the length is not changed
    #[inline]
    pub fn clear_all(&mut self) {
        self.buffer.fill_default();
    }

    /// Count the number of ones in the bitmap
    pub fn count_ones(&self) -> usize {
        let full = self.num_bits / BIT_STORE_BITS;
        let stores = self.buffer.as_slice();
        let mut count = stores[..full]
            .iter()
            .map(|store| store.count_ones() as usize)
            .sum::<usize>();
        let remainder = self.num_bits % BIT_STORE_BITS;
        if remainder != 0 {
            count += (stores[full] & ((1 << remainder) - 1)).count_ones() as usize;
        }
        count
    }

    /// Get the iterator that produce bool
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.num_bits).map(|index| self.get(index))
    }
}

impl Default for Bitmap {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Bitmap {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
            num_bits: self.num_bits,
        }
    }
}

impl Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bitmap {{ len: {}, data: ", self.num_bits)?;
        f.debug_list().entries(self.iter()).finish()?;
        write!(f, "}}")
    }
}

impl PartialEq for Bitmap {
    fn eq(&self, other: &Self) -> bool {
        self.num_bits == other.num_bits && self.iter().eq(other.iter())
    }
}

impl Eq for Bitmap {}

impl FromIterator<bool> for Bitmap {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut buffer = AlignedVec::new();
        let mut num_bits = 0;
        let mut current: BitStore = 0;
        for val in iter {
            if val {
                current |= 1 << (num_bits % BIT_STORE_BITS);
            }
            num_bits += 1;
            if num_bits % BIT_STORE_BITS == 0 {
                buffer.push(current);
                current = 0;
            }
        }
        if num_bits % BIT_STORE_BITS != 0 {
            buffer.push(current);
        }
        Self { buffer, num_bits }
    }
}

/// Compute the number of [`BitStore`] to store the required number of bits
#[inline]
pub fn elts(num_bits: usize) -> usize {
    roundup_loops(num_bits, BIT_STORE_BITS)
}
