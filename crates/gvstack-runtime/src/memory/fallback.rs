//! Heap-backed stack regions for targets without mmap
//!
//! No guard page: overflow is caught by the explicit capacity checks on
//! every push.

use gvstack_core::constants::WORD_BYTES;
use gvstack_core::error::MemoryError;
use gvstack_core::frame::Word;

use super::{fallback_page_size, region_bytes};

pub struct StackRegion {
    words: Vec<Word>,
}

impl StackRegion {
    pub fn reserve(words: usize, _guard: bool) -> Result<Self, MemoryError> {
        let len = region_bytes(words, fallback_page_size())? / WORD_BYTES;
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| MemoryError::AllocationFailed)?;
        buf.resize(len, 0);
        Ok(Self { words: buf })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[inline]
    pub fn has_guard(&self) -> bool {
        false
    }

    #[inline]
    pub fn as_slice(&self) -> &[Word] {
        &self.words
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [Word] {
        &mut self.words
    }
}
