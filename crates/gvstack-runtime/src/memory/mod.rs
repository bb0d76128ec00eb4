//! Stack memory regions
//!
//! Each thread stack owns one `StackRegion`: a zeroed, word-addressable
//! block with an optional inaccessible guard page at its low end (the end
//! a downward-growing stack runs into). Platform code does the mapping.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::StackRegion;
    } else {
        mod fallback;
        pub use fallback::StackRegion;
    }
}

use gvstack_core::constants::{GUARD_SIZE, WORD_BYTES};
use gvstack_core::error::MemoryError;

/// Bytes needed for `words` stack words, rounded up to whole pages
pub(crate) fn region_bytes(words: usize, page: usize) -> Result<usize, MemoryError> {
    let bytes = words.checked_mul(WORD_BYTES).ok_or(MemoryError::SizeOverflow)?;
    let rounded = bytes
        .checked_add(page - 1)
        .ok_or(MemoryError::SizeOverflow)?
        / page
        * page;
    Ok(rounded.max(page))
}

/// Page size when the platform cannot report one
pub(crate) fn fallback_page_size() -> usize {
    GUARD_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_bytes_rounds_to_pages() {
        assert_eq!(region_bytes(1, 4096).unwrap(), 4096);
        assert_eq!(region_bytes(4096 / WORD_BYTES, 4096).unwrap(), 4096);
        assert_eq!(region_bytes(4096 / WORD_BYTES + 1, 4096).unwrap(), 8192);
        assert_eq!(region_bytes(usize::MAX, 4096), Err(MemoryError::SizeOverflow));
    }

    #[test]
    fn test_region_is_zeroed_and_writable() {
        let mut region = StackRegion::reserve(300, true).unwrap();
        assert!(region.len() >= 300);
        assert!(region.as_slice().iter().all(|&w| w == 0));

        let len = region.len();
        let words = region.as_mut_slice();
        words[0] = 7;
        words[len - 1] = 9;
        assert_eq!(region.as_slice()[0], 7);
        assert_eq!(region.as_slice()[len - 1], 9);
    }

    #[test]
    fn test_region_without_guard() {
        let region = StackRegion::reserve(64, false).unwrap();
        assert!(region.len() >= 64);
        assert!(!region.has_guard());
    }
}
