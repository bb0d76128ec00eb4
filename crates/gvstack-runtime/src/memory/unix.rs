//! Unix stack regions using mmap

use gvstack_core::constants::WORD_BYTES;
use gvstack_core::error::MemoryError;
use gvstack_core::frame::Word;

use super::region_bytes;

/// mmap-backed stack memory
///
/// Layout, low to high: `[guard page (PROT_NONE)][usable words]`.
pub struct StackRegion {
    /// Start of the whole mapping (guard page first)
    base: *mut u8,
    /// Length of the whole mapping in bytes
    map_len: usize,
    /// First usable word
    words: *mut Word,
    /// Usable words
    len: usize,
    guard: bool,
}

// The region is uniquely owned; the raw pointers are never shared.
unsafe impl Send for StackRegion {}

fn page_size() -> usize {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page <= 0 {
        super::fallback_page_size()
    } else {
        page as usize
    }
}

impl StackRegion {
    /// Map a zeroed region of at least `words` words
    pub fn reserve(words: usize, guard: bool) -> Result<Self, MemoryError> {
        let page = page_size();
        let data_bytes = region_bytes(words, page)?;
        let guard_bytes = if guard { page } else { 0 };
        let map_len = data_bytes
            .checked_add(guard_bytes)
            .ok_or(MemoryError::SizeOverflow)?;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed);
        }

        if guard {
            let ret = unsafe { libc::mprotect(base, guard_bytes, libc::PROT_NONE) };
            if ret != 0 {
                unsafe {
                    libc::munmap(base, map_len);
                }
                return Err(MemoryError::ProtectionFailed);
            }
        }

        let base = base as *mut u8;
        Ok(Self {
            base,
            map_len,
            words: unsafe { base.add(guard_bytes) } as *mut Word,
            len: data_bytes / WORD_BYTES,
            guard,
        })
    }

    /// Usable words (at least what was requested)
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn has_guard(&self) -> bool {
        self.guard
    }

    #[inline]
    pub fn as_slice(&self) -> &[Word] {
        unsafe { std::slice::from_raw_parts(self.words, self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [Word] {
        unsafe { std::slice::from_raw_parts_mut(self.words, self.len) }
    }
}

impl Drop for StackRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.map_len);
        }
    }
}
