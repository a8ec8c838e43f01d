use std::fmt::{self, Debug};
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicI32, AtomicU64};
use std::{io, slice};

/// Marker for element types that can live in a [`SharedRegion`].
///
/// # Safety
///
/// The all-zero bit pattern must be a valid value of the type, and all mutation must go through
/// shared references (interior mutability that is sound across address spaces, i.e. lock-free
/// atomics).
pub(crate) unsafe trait SharedCell: Sync + Send + 'static {}

// SAFETY: Zero is a valid integer and lock-free atomics need no process-local state.
unsafe impl SharedCell for AtomicI32 {}

// SAFETY: Zero is a valid integer and lock-free atomics need no process-local state.
unsafe impl SharedCell for AtomicU64 {}

/// A zero-initialized array mapped with `MAP_SHARED`, so that it stays shared with every process
/// forked after it was created.
///
/// Each process that holds the mapping unmaps its own view when the region is dropped.
pub(crate) struct SharedRegion<T: SharedCell> {
    ptr: NonNull<T>,
    len: usize,
    map_len: usize,
}

impl<T: SharedCell> SharedRegion<T> {
    /// Maps a new region of `len` elements, all zero.
    pub(crate) fn new(len: usize) -> io::Result<Self> {
        // mmap() rejects empty mappings, so an empty region still owns one page.
        let map_len = len
            .checked_mul(size_of::<T>())
            .ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))?
            .max(1);

        // SAFETY: Anonymous mapping at an address of the kernel's choosing, no file involved.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if raw == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // Page alignment satisfies the alignment of any atomic integer.
        let ptr = NonNull::new(raw.cast::<T>())
            .ok_or_else(|| io::Error::other("mmap() returned a null mapping"))?;

        Ok(Self { ptr, len, map_len })
    }
}

impl<T: SharedCell> Deref for SharedRegion<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        // SAFETY: The mapping is live for as long as `self`, holds `len` elements, is suitably
        // aligned and the kernel zero-filled it, which is a valid value of `T` per `SharedCell`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: SharedCell> Drop for SharedRegion<T> {
    fn drop(&mut self) {
        // SAFETY: We created this exact mapping and no reference into it outlives `self`.
        let result = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.map_len) };

        if result != 0 {
            tracing::warn!(
                error = %io::Error::last_os_error(),
                "failed to unmap shared region"
            );
        }
    }
}

// SAFETY: The region is plain memory and `T` only allows mutation via atomics.
unsafe impl<T: SharedCell> Send for SharedRegion<T> {}

// SAFETY: The region is plain memory and `T` only allows mutation via atomics.
unsafe impl<T: SharedCell> Sync for SharedRegion<T> {}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl<T: SharedCell> Debug for SharedRegion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRegion")
            .field("len", &self.len)
            .field("map_len", &self.map_len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::Ordering;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(SharedRegion<AtomicI32>: Send, Sync);

    #[test]
    fn starts_zeroed() {
        let region = SharedRegion::<AtomicU64>::new(1000).unwrap();

        assert_eq!(region.len(), 1000);
        assert!(region.iter().all(|cell| cell.load(Ordering::Relaxed) == 0));
    }

    #[test]
    fn empty_region_is_valid() {
        let region = SharedRegion::<AtomicI32>::new(0).unwrap();

        assert!(region.is_empty());
    }

    #[test]
    fn oversized_region_is_error() {
        SharedRegion::<AtomicU64>::new(usize::MAX).unwrap_err();
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot fork")]
    fn writes_are_visible_across_fork() {
        let region = SharedRegion::<AtomicI32>::new(4).unwrap();

        // SAFETY: The child only performs an atomic store and _exit(), both async-signal-safe.
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed: {}", io::Error::last_os_error());

        if pid == 0 {
            region[2].store(42, Ordering::Release);

            // SAFETY: Terminates the child without unwinding into the test harness.
            unsafe { libc::_exit(0) };
        }

        let mut status = 0;
        // SAFETY: Waiting on our own child with a valid status pointer.
        let waited = unsafe { libc::waitpid(pid, &raw mut status, 0) };
        assert_eq!(waited, pid);

        assert_eq!(region[2].load(Ordering::Acquire), 42);
        assert_eq!(region[0].load(Ordering::Acquire), 0);
    }
}
