//! The measured payload: three ways of copying one buffer into another of the same length.

use std::hint::black_box;
use std::ptr;
use std::time::{Duration, Instant};

use crate::{CopyPattern, Word};

/// Copies the whole buffer in one bulk operation.
pub fn plain_copy(src: &[Word], dst: &mut [Word]) {
    dst.copy_from_slice(src);
}

/// Copies one word at a time through volatile accesses, so the compiler can neither vectorize
/// the loop into a bulk copy nor prove that repeating it is redundant.
///
/// # Panics
///
/// Panics if the buffers differ in length.
pub fn element_wise_copy(src: &[Word], dst: &mut [Word]) {
    assert_eq!(src.len(), dst.len(), "buffers must have the same length");

    for (from, to) in src.iter().zip(dst.iter_mut()) {
        // SAFETY: Both references are valid and aligned for the duration of the call.
        unsafe {
            ptr::write_volatile(to, ptr::read_volatile(from));
        }
    }
}

/// Copies the buffer in chunks of `block_size` bytes, then copies whatever is left.
///
/// # Panics
///
/// Panics if the buffers differ in length or `block_size` is zero.
pub fn block_copy(src: &[Word], dst: &mut [Word], block_size: usize) {
    assert_eq!(src.len(), dst.len(), "buffers must have the same length");

    let src = as_bytes(src);
    let dst = as_bytes_mut(dst);

    // chunks() ends with the shorter remainder chunk when the sizes do not divide evenly.
    for (to, from) in dst.chunks_mut(block_size).zip(src.chunks(block_size)) {
        to.copy_from_slice(from);
    }
}

fn as_bytes(words: &[Word]) -> &[u8] {
    // SAFETY: Every initialized word is valid as bytes, u8 has no alignment requirement and the
    // length covers exactly the same memory.
    unsafe { std::slice::from_raw_parts(words.as_ptr().cast::<u8>(), size_of_val(words)) }
}

fn as_bytes_mut(words: &mut [Word]) -> &mut [u8] {
    // SAFETY: As in as_bytes(), and every byte pattern is a valid word, so writes through the
    // byte view cannot create invalid words.
    unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), size_of_val(words)) }
}

/// Runs `repeats` back-to-back copies of one pattern and returns how long they took together.
pub fn timed_trial(
    pattern: CopyPattern,
    src: &[Word],
    dst: &mut [Word],
    block_size: usize,
    repeats: u32,
) -> Duration {
    let start = Instant::now();

    for _ in 0..repeats {
        match pattern {
            CopyPattern::Plain => plain_copy(black_box(src), black_box(&mut *dst)),
            CopyPattern::ElementWise => element_wise_copy(src, dst),
            CopyPattern::Block => block_copy(black_box(src), black_box(&mut *dst), block_size),
        }
    }

    black_box(&*dst);

    start.elapsed()
}
