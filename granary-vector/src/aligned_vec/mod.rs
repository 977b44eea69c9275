//! Implementation of the Cache line aligned [`Vec`]
//!
//! Heavily adapted from [Arrow](https://github.com/apache/arrow-rs)

use std::alloc::{Layout, alloc, alloc_zeroed, dealloc, handle_alloc_error, realloc};
use std::fmt::Debug;
use std::mem::size_of;
use std::ptr::{NonNull, copy_nonoverlapping};

use snafu::Snafu;

use crate::private::Sealed;
use crate::utils::roundup_to_multiple_of_pow_of_two_base;

/// Size of the cache line in bytes
pub const CACHE_LINE_SIZE: usize = 64;

/// Alignment of the memory region allocated by the [`AlignedVec`]. Any primitive type
/// is aligned with it, therefore the bytes can be viewed as any [`AllocType`]
pub const ALIGNMENT: usize = CACHE_LINE_SIZE;

/// Error returned by the fallible allocation of the [`AlignedVec`]
#[derive(Debug, Snafu)]
#[snafu(display("System allocator failed to allocate `{size}` bytes aligned to `{align}`"))]
pub struct AllocError {
    size: usize,
    align: usize,
}

impl AllocError {
    /// Number of bytes requested
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Trait for types that can be allocated on the [`AlignedVec`]. This trait is
/// sealed to avoid other types implement it.
///
/// All of the implementors are plain old data: every bit pattern is a valid value,
/// which is why a byte [`AlignedVec`] can be viewed as a slice of them.
pub trait AllocType: Sealed + Copy + Sized + Debug + Default + 'static + Send + Sync {}

macro_rules! impl_alloc_types {
    ($($ty:ty),*) => {
        $(
            impl Sealed for $ty {}

            impl AllocType for $ty {}
        )*
    };
}

impl_alloc_types!(u8, i32, i64, u64, f64);

/// [`AlignedVec`] is a continuous memory region that allocated from memory
/// allocator. The memory is **cache line aligned** and its **capacity in bytes**
/// is multiple of **cache line size**
///
/// Workspace batches of the accumulators are built on top of it: the capacity in
/// bytes is the number the memory accounting reports for the buffer.
#[repr(C)]
pub struct AlignedVec<T: AllocType> {
    /// Pointer to the start of the memory region
    ptr: NonNull<T>,
    /// Number of elements in the AlignedVec
    len: usize,
    /// Memory layout of the region
    capacity_in_bytes: usize,
}

impl<T: AllocType> AlignedVec<T> {
    /// Create a new [`AlignedVec`]
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
            capacity_in_bytes: 0,
        }
    }

    /// Create a new [`AlignedVec`] with given capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity_in_bytes = Self::capacity_in_bytes_for(capacity);
        if capacity_in_bytes == 0 {
            return Self::new();
        }
        // SAFETY: [`ALIGNMENT`] is guaranteed to be power of two and size is not zero
        unsafe {
            let layout = Layout::from_size_align_unchecked(capacity_in_bytes, ALIGNMENT);
            let ptr = alloc(layout);
            Self {
                ptr: NonNull::new(ptr as _).unwrap_or_else(|| handle_alloc_error(layout)),
                len: 0,
                capacity_in_bytes,
            }
        }
    }

    /// Try to create a [`AlignedVec`] that contains `len` zeroed elements. Unlike the
    /// other constructors, it reports the allocation failure to the caller instead of
    /// aborting the process
    pub fn try_zeroed(len: usize) -> Result<Self, AllocError> {
        let capacity_in_bytes = Self::capacity_in_bytes_for(len);
        if capacity_in_bytes == 0 {
            return Ok(Self::new());
        }
        // SAFETY: [`ALIGNMENT`] is guaranteed to be power of two and size is not zero
        unsafe {
            let layout = Layout::from_size_align_unchecked(capacity_in_bytes, ALIGNMENT);
            let ptr = NonNull::new(alloc_zeroed(layout) as *mut T).ok_or(AllocError {
                size: capacity_in_bytes,
                align: ALIGNMENT,
            })?;
            Ok(Self {
                ptr,
                len,
                capacity_in_bytes,
            })
        }
    }

    /// Create a [`AlignedVec`] that contains `len` zeroed elements
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        let mut vec = Self::with_capacity(len);
        if len != 0 {
            // SAFETY: with_capacity allocates enough space, all zeros is valid for AllocType
            unsafe { std::ptr::write_bytes(vec.ptr.as_ptr(), 0, len) };
            vec.len = len;
        }
        vec
    }

    /// Number of bytes the allocator will reserve for `capacity` elements
    #[inline]
    pub fn capacity_in_bytes_for(capacity: usize) -> usize {
        roundup_to_multiple_of_pow_of_two_base(capacity * size_of::<T>(), CACHE_LINE_SIZE)
    }

    #[inline]
    fn layout(&self) -> Layout {
        unsafe { Layout::from_size_align_unchecked(self.capacity_in_bytes, ALIGNMENT) }
    }

    /// Returns the raw pointer to the aligned memory region
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr() as _
    }

    /// Get the number of elements in the [`AlignedVec`], also referred to its 'length'
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the [`AlignedVec`] contains no elements
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of bytes allocated by the [`AlignedVec`]
    #[inline]
    pub fn capacity_in_bytes(&self) -> usize {
        self.capacity_in_bytes
    }

    /// View the entire vector as a slice
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: Self guarantees memory region from self.ptr to self.ptr+self.len is always valid
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// View the entire vector as a mutable slice
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: Self guarantees memory region from self.ptr to self.ptr+self.len is always valid
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// View the visible elements as bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: AllocType is plain old data, the region is valid for len * size_of::<T>()
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len * size_of::<T>()) }
    }

    /// Overwrite all of the visible elements with the default value
    #[inline]
    pub fn fill_default(&mut self) {
        self.as_mut_slice().fill(T::default());
    }

    /// Clear the [`AlignedVec`], removing all elements.
    ///
    /// Note that this method has no effect on the allocated capacity
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0
    }

    /// Appends an element to the back of the vector
    #[inline]
    pub fn push(&mut self, val: T) {
        self.reserve(1);
        // SAFETY: reserve guarantees the space
        unsafe { self.ptr.as_ptr().add(self.len).write(val) };
        self.len += 1;
    }

    /// Reserves capacity for at least additional more elements to be inserted
    #[inline]
    fn reserve(&mut self, additional: usize) {
        let new_len_in_bytes = (self.len + additional) * size_of::<T>();

        if new_len_in_bytes > self.capacity_in_bytes {
            self.realloc(new_len_in_bytes);
        }
    }

    #[cold]
    fn realloc(&mut self, new_cap_in_bytes: usize) {
        // SAFETY:
        // 1. self.ptr and self.layout is pre-allocated by the allocator
        // 2. [`ALIGNMENT`] is guaranteed to be power of two
        unsafe {
            let new_cap_in_bytes =
                roundup_to_multiple_of_pow_of_two_base(new_cap_in_bytes, CACHE_LINE_SIZE);
            // The new memory region is at least two times larger than the old region
            let new_cap_in_bytes = std::cmp::max(new_cap_in_bytes, self.capacity_in_bytes * 2);
            let new_layout = Layout::from_size_align_unchecked(new_cap_in_bytes, ALIGNMENT);
            let ptr = if self.capacity_in_bytes == 0 {
                // ptr is not allocated, according to [`Safety`](https://doc.rust-lang.org/std/alloc/trait.GlobalAlloc.html#safety-4)
                // section, we should use alloc instead of realloc
                alloc(new_layout)
            } else {
                realloc(self.ptr.as_ptr() as _, self.layout(), new_cap_in_bytes)
            };

            self.ptr = NonNull::new(ptr as _).unwrap_or_else(|| handle_alloc_error(new_layout));
            self.capacity_in_bytes = new_cap_in_bytes;
        }
    }
}

impl AlignedVec<u8> {
    /// View the bytes as a slice of `T`. Trailing bytes that can not form a whole `T`
    /// are not visible
    #[inline]
    pub fn view<T: AllocType>(&self) -> &[T] {
        let len = self.len / size_of::<T>();
        if len == 0 {
            return &[];
        }
        // SAFETY: the region is allocated with [`ALIGNMENT`], which is larger than the
        // alignment of any AllocType, and AllocType is plain old data
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const T, len) }
    }

    /// View the bytes as a mutable slice of `T`. See [`Self::view`]
    #[inline]
    pub fn view_mut<T: AllocType>(&mut self) -> &mut [T] {
        let len = self.len / size_of::<T>();
        if len == 0 {
            return &mut [];
        }
        // SAFETY: see view
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr() as *mut T, len) }
    }
}

unsafe impl<T: AllocType> Send for AlignedVec<T> {}
unsafe impl<T: AllocType> Sync for AlignedVec<T> {}

impl<T: AllocType> Drop for AlignedVec<T> {
    #[inline]
    fn drop(&mut self) {
        if self.capacity_in_bytes != 0 {
            // Not dangling pointer
            unsafe { dealloc(self.ptr.as_ptr() as _, self.layout()) };
        }
    }
}

impl<T: AllocType> Default for AlignedVec<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T: AllocType> Clone for AlignedVec<T> {
    fn clone(&self) -> Self {
        Self::from_slice(self.as_slice())
    }
}

impl<T: AllocType> Debug for AlignedVec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AlignedVec {{ ptr: {:?}, len: {}, data: ",
            self.ptr, self.len
        )?;

        f.debug_list().entries(self.as_slice().iter()).finish()?;

        write!(f, " }}")
    }
}

impl<T: AllocType> PartialEq for AlignedVec<T>
where
    T: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

/// Ergonomic helper functions
impl<T: AllocType> AlignedVec<T> {
    /// Construct Self from slice
    pub fn from_slice(slice: &[T]) -> Self {
        let mut new = Self::with_capacity(slice.len());
        // SAFETY: with_capacity will allocate enough space
        unsafe { copy_nonoverlapping(slice.as_ptr(), new.ptr.as_ptr(), slice.len()) };
        new.len = slice.len();
        new
    }
}

impl<T: AllocType> FromIterator<T> for AlignedVec<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let (low, _) = iter.size_hint();
        let mut vec = Self::with_capacity(low);
        iter.for_each(|val| vec.push(val));
        vec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_vec() {
        let mut aligned_vec = AlignedVec::from_slice(&[0_i32, 1, 2, 3]);

        assert_eq!(aligned_vec.capacity_in_bytes(), CACHE_LINE_SIZE);
        assert_eq!(aligned_vec.as_slice(), [0, 1, 2, 3]);

        // Need resize
        let new_len = CACHE_LINE_SIZE / size_of::<i32>() + 1;
        (4..new_len as i32).for_each(|v| aligned_vec.push(v));

        assert_eq!(aligned_vec.capacity_in_bytes(), CACHE_LINE_SIZE * 2);
        assert_eq!(
            aligned_vec.as_slice(),
            (0..new_len as i32).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_try_zeroed() {
        let zeroed = AlignedVec::<u64>::try_zeroed(9).unwrap();
        assert_eq!(zeroed.len(), 9);
        assert_eq!(zeroed.capacity_in_bytes(), 2 * CACHE_LINE_SIZE);
        assert!(zeroed.as_slice().iter().all(|&v| v == 0));

        let empty = AlignedVec::<u64>::try_zeroed(0).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.capacity_in_bytes(), 0);
    }

    #[test]
    fn test_view_bytes() {
        let mut bytes = AlignedVec::<u8>::zeroed(4 * size_of::<i64>());
        bytes.view_mut::<i64>()[2] = -7;
        assert_eq!(bytes.view::<i64>(), [0, 0, -7, 0]);
        assert_eq!(bytes.view::<i32>().len(), 8);

        let empty = AlignedVec::<u8>::new();
        assert!(empty.view::<f64>().is_empty());
    }

    #[test]
    fn test_clone_aligned_vec() {
        let empty_vec = AlignedVec::<i32>::new();
        assert!(empty_vec.clone().is_empty());

        let vec = (0..10).collect::<AlignedVec<i64>>();
        let cloned_vec = vec.clone();
        assert_eq!(cloned_vec.as_slice(), (0..10).collect::<Vec<_>>());
        assert_eq!(cloned_vec.as_bytes().len(), 10 * size_of::<i64>());
    }
}
