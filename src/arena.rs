//! Executable code cache arena.
//!
//! One large anonymous private mapping, created read-write, from which
//! host code is bump-allocated. Sub-ranges are flipped to read-execute
//! after emission (W^X: a page is never left writable and executable at
//! the same time by this module's callers).
//!
//! Allocation is monotonic: ranges handed out never overlap and are never
//! individually freed. When the arena runs out, the caller decides between
//! `reset()` (discard everything, reuse the mapping) and mapping a fresh
//! arena.

use crate::error::JitError;
use std::ptr;

fn round_up(value: usize, to: usize) -> usize {
    (value + to - 1) & !(to - 1)
}

/// Page-aligned executable-capable memory region with bump allocation.
pub struct CodeCacheArena {
    base: *mut u8,
    capacity: usize,
    offset: usize,
    page_size: usize,
}

impl CodeCacheArena {
    /// Map a new arena of at least `size` bytes (rounded up to whole
    /// pages), read-write.
    pub fn new(size: usize) -> Result<Self, JitError> {
        if size == 0 {
            return Err(JitError::InvalidArgument("arena size must be non-zero"));
        }
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let capacity = round_up(size, page_size);

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(JitError::AllocationFailure(capacity));
        }

        log::debug!("[ARENA] mapped {} bytes at {:p}", capacity, base);
        Ok(Self {
            base: base as *mut u8,
            capacity,
            offset: 0,
            page_size,
        })
    }

    /// Bump-allocate `size` bytes. Returns the offset of the range, or
    /// `None` if the remaining space is insufficient. Never blocks or
    /// retries.
    pub fn alloc(&mut self, size: usize) -> Option<usize> {
        self.alloc_aligned(size, 1)
    }

    /// Bump-allocate `size` bytes at an `align`-aligned offset. `align`
    /// must be a power of two.
    pub fn alloc_aligned(&mut self, size: usize, align: usize) -> Option<usize> {
        debug_assert!(align.is_power_of_two());
        let start = round_up(self.offset, align);
        let end = start.checked_add(size)?;
        if end > self.capacity {
            return None;
        }
        self.offset = end;
        Some(start)
    }

    /// Flip `[offset, offset + len)` to read-execute, rounding the range
    /// outward to whole pages first. A zero-length range is a no-op.
    pub fn mark_executable(&mut self, offset: usize, len: usize) -> Result<(), JitError> {
        self.protect(offset, len, libc::PROT_READ | libc::PROT_EXEC)
    }

    /// Flip `[offset, offset + len)` back to read-write so already
    /// executable code can be patched. The caller guarantees nothing in
    /// the affected pages is concurrently executing; the range must be
    /// re-protected with [`mark_executable`](Self::mark_executable) before
    /// the next execution.
    pub fn mark_writable(&mut self, offset: usize, len: usize) -> Result<(), JitError> {
        self.protect(offset, len, libc::PROT_READ | libc::PROT_WRITE)
    }

    fn protect(&mut self, offset: usize, len: usize, prot: libc::c_int) -> Result<(), JitError> {
        if len == 0 {
            return Ok(());
        }
        let end = offset
            .checked_add(len)
            .filter(|&e| e <= self.capacity)
            .ok_or(JitError::InvalidArgument("protection range out of arena"))?;

        let page_start = offset & !(self.page_size - 1);
        let page_end = round_up(end, self.page_size);
        let ret = unsafe {
            libc::mprotect(
                self.base.add(page_start) as *mut libc::c_void,
                page_end - page_start,
                prot,
            )
        };
        if ret != 0 {
            log::warn!(
                "[ARENA] mprotect({:#x}+{:#x}, prot={:#x}) failed",
                page_start,
                page_end - page_start,
                prot
            );
            return Err(JitError::ProtectionFailure { offset, len });
        }
        Ok(())
    }

    /// Bytes still available for allocation.
    pub fn free_space(&self) -> usize {
        self.capacity - self.offset
    }

    /// Current bump offset.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total mapped capacity (whole pages).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// OS page size the arena was mapped with.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Pointer to the byte at `offset`. The pointer stays valid for the
    /// arena's whole lifetime; `offset` must be within capacity.
    pub fn ptr_at(&self, offset: usize) -> *const u8 {
        debug_assert!(offset <= self.capacity);
        unsafe { self.base.add(offset) }
    }

    /// Mutable view of `[offset, offset + len)`, used as the emission
    /// window for an in-progress translation. The range must be within
    /// capacity and currently writable.
    pub fn slice_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.capacity);
        unsafe { std::slice::from_raw_parts_mut(self.base.add(offset), len) }
    }

    /// Rewind the bump offset to zero and make the whole region writable
    /// again. The mapping is retained; every previously handed-out range
    /// becomes dead.
    pub fn reset(&mut self) -> Result<(), JitError> {
        let capacity = self.capacity;
        self.protect(0, capacity, libc::PROT_READ | libc::PROT_WRITE)?;
        self.offset = 0;
        log::debug!("[ARENA] reset, {} bytes reclaimed", capacity);
        Ok(())
    }
}

impl Drop for CodeCacheArena {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.capacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rounds_to_page_size() {
        let arena = CodeCacheArena::new(1).unwrap();
        assert_eq!(arena.capacity() % arena.page_size, 0);
        assert!(arena.capacity() >= arena.page_size);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert_eq!(
            CodeCacheArena::new(0).err(),
            Some(JitError::InvalidArgument("arena size must be non-zero"))
        );
    }

    #[test]
    fn test_allocations_never_overlap() {
        let mut arena = CodeCacheArena::new(4096).unwrap();
        let a = arena.alloc(100).unwrap();
        let b = arena.alloc(100).unwrap();
        let c = arena.alloc(1).unwrap();
        assert!(a + 100 <= b);
        assert!(b + 100 <= c);
    }

    #[test]
    fn test_alloc_aligned() {
        let mut arena = CodeCacheArena::new(4096).unwrap();
        arena.alloc(3).unwrap();
        let off = arena.alloc_aligned(32, 16).unwrap();
        assert_eq!(off % 16, 0);
        let off2 = arena.alloc_aligned(8, 64).unwrap();
        assert_eq!(off2 % 64, 0);
        assert!(off2 >= off + 32);
    }

    #[test]
    fn test_exhaustion_then_reset() {
        let mut arena = CodeCacheArena::new(4096).unwrap();
        let cap = arena.capacity();
        assert!(arena.alloc(cap).is_some());
        assert_eq!(arena.free_space(), 0);
        assert!(arena.alloc(1).is_none());

        arena.reset().unwrap();
        assert_eq!(arena.offset(), 0);
        assert_eq!(arena.alloc(1), Some(0));
    }

    #[test]
    fn test_mark_executable_page_rounding() {
        let mut arena = CodeCacheArena::new(2 * 4096).unwrap();
        let off = arena.alloc(64).unwrap();
        // An unaligned sub-range must succeed: the range is rounded
        // outward to whole pages internally.
        arena.mark_executable(off + 3, 17).unwrap();
        arena.mark_writable(off, 64).unwrap();
    }

    #[test]
    fn test_protect_out_of_range_rejected() {
        let mut arena = CodeCacheArena::new(4096).unwrap();
        let cap = arena.capacity();
        assert!(arena.mark_executable(cap, 1).is_err());
        assert!(arena.mark_executable(0, cap + 1).is_err());
    }

    #[test]
    fn test_emission_window_is_visible_through_ptr_at() {
        let mut arena = CodeCacheArena::new(4096).unwrap();
        let off = arena.alloc(4).unwrap();
        arena.slice_mut(off, 4).copy_from_slice(&[1, 2, 3, 4]);
        let bytes = unsafe { std::slice::from_raw_parts(arena.ptr_at(off), 4) };
        assert_eq!(bytes, &[1, 2, 3, 4]);
    }
}
