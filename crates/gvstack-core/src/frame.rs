//! Stack frame convention
//!
//! A thread's stack is an array of machine words growing toward lower
//! indices. Every frame has the same shape:
//!
//! ```text
//! sp + 0          : descriptor id  (Word)
//! sp + 1 ..= n    : payload slots  (n = descriptor's payload length)
//! ```
//!
//! The payload length is fixed per descriptor, so the walker can step from
//! one frame header to the next without any link words. Frames hold no
//! pointers into their own stack, which is what lets growth copy them
//! verbatim into a new region.
//!
//! The oldest frame of every stack is the stop frame (payload 0), pushed
//! once at creation and never popped.

use core::fmt;

/// One stack word
pub type Word = usize;

/// Words taken by a frame header (the descriptor id)
pub const FRAME_HEADER_WORDS: usize = 1;

/// Maximum payload slots per frame (bounded by the reference bitmap)
pub const MAX_FRAME_SLOTS: usize = 64;

/// Index of a descriptor in the engine's descriptor table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DescriptorId(u32);

impl DescriptorId {
    /// Built-in stop frame, always registered first
    pub const STOP: DescriptorId = DescriptorId(0);

    /// Built-in stack-top return frame
    pub const STACK_TOP_RETURN: DescriptorId = DescriptorId(1);

    /// First id handed out to registered descriptors
    pub const FIRST_USER: u32 = 2;

    #[inline]
    pub const fn new(raw: u32) -> Self {
        DescriptorId(raw)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Encode as the frame's header word
    #[inline]
    pub const fn to_word(self) -> Word {
        self.0 as Word
    }

    /// Decode a header word; `None` if it cannot be a descriptor id
    #[inline]
    pub fn from_word(w: Word) -> Option<Self> {
        u32::try_from(w).ok().map(DescriptorId)
    }
}

impl fmt::Debug for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DescriptorId({})", self.0)
    }
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Closed set of frame kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Bottom-most "this thread is done" marker
    Stop,
    /// Returning into it hands control back to the scheduler boundary
    StackTopReturn,
    /// Language-level continuation
    Application,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Stop => write!(f, "stop"),
            FrameKind::StackTopReturn => write!(f, "stack-top-return"),
            FrameKind::Application => write!(f, "application"),
        }
    }
}

/// Payload shape of a frame: slot count plus live-reference bitmap
///
/// Bit `i` of `refs` set means payload slot `i` holds a heap reference
/// the collector must trace (and may rewrite).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotLayout {
    slots: u8,
    refs: u64,
}

impl SlotLayout {
    /// No payload
    pub const EMPTY: SlotLayout = SlotLayout { slots: 0, refs: 0 };

    /// `slots` payload words, reference bits from `refs`
    ///
    /// Returns `None` if `slots` exceeds [`MAX_FRAME_SLOTS`] or `refs`
    /// marks a slot beyond the payload.
    pub const fn new(slots: usize, refs: u64) -> Option<Self> {
        if slots > MAX_FRAME_SLOTS {
            return None;
        }
        let mask = if slots == MAX_FRAME_SLOTS { u64::MAX } else { (1u64 << slots) - 1 };
        if refs & !mask != 0 {
            return None;
        }
        Some(SlotLayout { slots: slots as u8, refs })
    }

    /// Payload of plain (non-reference) words
    pub const fn words(slots: usize) -> Option<Self> {
        Self::new(slots, 0)
    }

    #[inline]
    pub const fn slots(&self) -> usize {
        self.slots as usize
    }

    /// Total frame size including the header
    #[inline]
    pub const fn frame_words(&self) -> usize {
        FRAME_HEADER_WORDS + self.slots as usize
    }

    #[inline]
    pub const fn is_ref(&self, slot: usize) -> bool {
        slot < self.slots as usize && (self.refs >> slot) & 1 == 1
    }

    #[inline]
    pub const fn ref_count(&self) -> usize {
        self.refs.count_ones() as usize
    }

    /// Iterate indices of reference slots, lowest first
    pub fn ref_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.slots()).filter(move |&i| self.is_ref(i))
    }
}

/// Read-only view of one frame handed to stack walkers
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo<'a> {
    /// 0 for the top frame, increasing toward the stop frame
    pub depth: usize,
    pub descriptor: DescriptorId,
    pub kind: FrameKind,
    /// Diagnostic tag
    pub name: &'a str,
    pub layout: SlotLayout,
}
