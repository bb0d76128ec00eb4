//! Thread stacks
//!
//! A `Stack` is a word array growing toward index 0. `sp` is the index of
//! the top frame's header; an empty stack has `sp == capacity`. Every push
//! checks the remaining room first and reports a [`Shortfall`] instead of
//! writing past the low end.

use gvstack_core::error::StackResult;
use gvstack_core::frame::{DescriptorId, FrameInfo, Word, FRAME_HEADER_WORDS};

use crate::descriptor::{DescriptorTable, FrameDescriptor};
use crate::memory::StackRegion;

/// Words a push needed beyond the free space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub words: usize,
}

pub struct Stack {
    region: StackRegion,
    capacity: usize,
    sp: usize,
}

impl Stack {
    /// Empty stack of `capacity` words
    pub fn new(capacity: usize, guard: bool) -> StackResult<Self> {
        let region = StackRegion::reserve(capacity, guard)?;
        debug_assert!(region.len() >= capacity);
        Ok(Self { region, capacity, sp: capacity })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index of the top frame header
    #[inline]
    pub fn sp(&self) -> usize {
        self.sp
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.capacity - self.sp
    }

    #[inline]
    pub fn free(&self) -> usize {
        self.sp
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sp == self.capacity
    }

    #[inline]
    fn words(&self) -> &[Word] {
        &self.region.as_slice()[..self.capacity]
    }

    #[inline]
    fn words_mut(&mut self) -> &mut [Word] {
        let capacity = self.capacity;
        &mut self.region.as_mut_slice()[..capacity]
    }

    /// Header word of the top frame
    #[inline]
    pub fn top(&self) -> Option<Word> {
        self.words().get(self.sp).copied()
    }

    #[inline]
    pub fn word(&self, at: usize) -> Option<Word> {
        if at < self.sp {
            return None;
        }
        self.words().get(at).copied()
    }

    #[inline]
    pub(crate) fn word_mut(&mut self, at: usize) -> Option<&mut Word> {
        if at < self.sp {
            return None;
        }
        self.words_mut().get_mut(at)
    }

    /// Push a frame; nothing is written on shortfall
    pub fn push(&mut self, descriptor: DescriptorId, payload: &[Word]) -> Result<(), Shortfall> {
        let need = FRAME_HEADER_WORDS + payload.len();
        if need > self.sp {
            return Err(Shortfall { words: need - self.sp });
        }
        let at = self.sp - need;
        let words = self.words_mut();
        words[at] = descriptor.to_word();
        words[at + FRAME_HEADER_WORDS..at + need].copy_from_slice(payload);
        self.sp = at;
        Ok(())
    }

    /// Payload of the frame whose header sits at `at`
    #[inline]
    pub fn payload(&self, at: usize, len: usize) -> Option<&[Word]> {
        if at < self.sp {
            return None;
        }
        self.words().get(at + FRAME_HEADER_WORDS..at + FRAME_HEADER_WORDS + len)
    }

    #[inline]
    pub(crate) fn payload_mut(&mut self, at: usize, len: usize) -> Option<&mut [Word]> {
        if at < self.sp {
            return None;
        }
        self.words_mut()
            .get_mut(at + FRAME_HEADER_WORDS..at + FRAME_HEADER_WORDS + len)
    }

    /// Drop the top `words` words
    #[inline]
    pub(crate) fn release(&mut self, words: usize) {
        debug_assert!(self.sp + words <= self.capacity);
        self.sp = (self.sp + words).min(self.capacity);
    }

    /// Copy every live word into `dst`, keeping offsets from the base
    ///
    /// Frames hold no stack addresses, so the copy is a valid stack.
    pub fn copy_into(&self, dst: &mut Stack) -> Result<(), Shortfall> {
        let used = self.used();
        if used > dst.capacity {
            return Err(Shortfall { words: used - dst.capacity });
        }
        let dst_sp = dst.capacity - used;
        dst.words_mut()[dst_sp..].copy_from_slice(&self.words()[self.sp..]);
        dst.sp = dst_sp;
        Ok(())
    }

    /// Iterate frames top to bottom
    pub fn frames<'a>(&'a self, table: &'a DescriptorTable) -> Frames<'a> {
        Frames { stack: self, table, at: self.sp, depth: 0, failed: false }
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("capacity", &self.capacity)
            .field("sp", &self.sp)
            .finish()
    }
}

/// One frame found by [`Stack::frames`]
#[derive(Debug, Clone, Copy)]
pub struct FrameRef<'a> {
    /// Header index
    pub at: usize,
    /// 0 = top
    pub depth: usize,
    pub id: DescriptorId,
    pub descriptor: &'a FrameDescriptor,
}

impl<'a> FrameRef<'a> {
    pub fn info(&self) -> FrameInfo<'a> {
        self.descriptor.info(self.id, self.depth)
    }
}

/// Frame iterator
///
/// Yields `Err(at)` once, and then stops, if the word at `at` is not a
/// registered descriptor or the frame runs off the base.
pub struct Frames<'a> {
    stack: &'a Stack,
    table: &'a DescriptorTable,
    at: usize,
    depth: usize,
    failed: bool,
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<FrameRef<'a>, usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.at >= self.stack.capacity {
            return None;
        }
        let at = self.at;
        let found = self
            .stack
            .word(at)
            .and_then(DescriptorId::from_word)
            .and_then(|id| self.table.get(id).map(|d| (id, d)))
            .filter(|(_, d)| at + d.layout().frame_words() <= self.stack.capacity);

        match found {
            Some((id, descriptor)) => {
                let frame = FrameRef { at, depth: self.depth, id, descriptor };
                self.at += descriptor.layout().frame_words();
                self.depth += 1;
                Some(Ok(frame))
            }
            None => {
                self.failed = true;
                Some(Err(at))
            }
        }
    }
}
