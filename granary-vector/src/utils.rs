//! Utils

/// Computing the smallest value that is multiple of `base` and greater than
/// or equal to size.
///
/// Note that `base` must be power of two. Otherwise, the returned value is incorrect!
#[inline]
pub fn roundup_to_multiple_of_pow_of_two_base(size: usize, base: usize) -> usize {
    let mask = base - 1;
    (size + mask) & !mask
}

/// Number of `chunk` sized pieces needed to hold `len` elements
#[inline]
pub fn roundup_loops(len: usize, chunk: usize) -> usize {
    len / chunk + (len % chunk != 0) as usize
}
