//! Word-addressed transfer windows and the ping-pong split
//!
//! The MM2S source and S2MM destination regions are each viewed as a flat
//! array of 64-bit words. [`PingPong`] carves one window into two equal
//! halves so one half can be refilled while the other is in flight.

use crate::error::{DmaError, Result};
use std::fmt::Debug;
use zs_chip::wire::WORD_BYTES;

/// Bounds-checked array of 64-bit words backing one DMA direction
pub trait WordWindow: Send + Debug {
    /// Capacity in words
    fn len_words(&self) -> usize;

    /// Copy `words` into the window starting at word `at`
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` if the copy would run past the window.
    fn write_words(&mut self, at: usize, words: &[u64]) -> Result<()>;

    /// Copy words starting at `at` into `out`
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` if the copy would run past the window.
    fn read_words(&self, at: usize, out: &mut [u64]) -> Result<()>;

    /// Read the single word at `at`
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` if `at` is past the window.
    fn word(&self, at: usize) -> Result<u64> {
        let mut word = [0_u64];
        self.read_words(at, &mut word)?;
        Ok(word[0])
    }
}

impl<W: WordWindow + ?Sized> WordWindow for Box<W> {
    fn len_words(&self) -> usize {
        (**self).len_words()
    }

    fn write_words(&mut self, at: usize, words: &[u64]) -> Result<()> {
        (**self).write_words(at, words)
    }

    fn read_words(&self, at: usize, out: &mut [u64]) -> Result<()> {
        (**self).read_words(at, out)
    }

    fn word(&self, at: usize) -> Result<u64> {
        (**self).word(at)
    }
}

/// Reject an access of `len` units at `offset` in a window of `limit` units
///
/// # Errors
///
/// Returns `OutOfBounds` when `offset + len > limit` (or overflows).
pub fn check_bounds(offset: usize, len: usize, limit: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= limit => Ok(()),
        _ => Err(DmaError::OutOfBounds { offset, len, limit }),
    }
}

/// One of the two halves of a [`PingPong`] window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    /// Lower half, starting at the window base
    A,
    /// Upper half, directly after half A
    B,
}

impl Half {
    /// The opposite half
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// A word window split into two equal halves with known physical addresses
#[derive(Debug)]
pub struct PingPong<W = Box<dyn WordWindow>> {
    window: W,
    phys_base: u32,
    half_words: usize,
}

impl<W: WordWindow> PingPong<W> {
    /// Split `window` (mapped at physical address `phys_base`) into halves
    /// of `half_words` words each
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if both halves do not fit the window or the
    /// upper half ends beyond the 32-bit physical address space.
    pub fn new(window: W, phys_base: u32, half_words: usize) -> Result<Self> {
        let mut split = Self {
            window,
            phys_base,
            half_words: 0,
        };
        split.set_half_words(half_words)?;
        Ok(split)
    }

    /// Resize the halves
    ///
    /// # Errors
    ///
    /// Same conditions as [`PingPong::new`]. The split is unchanged on error.
    pub fn set_half_words(&mut self, half_words: usize) -> Result<()> {
        if half_words == 0 {
            return Err(DmaError::configuration("ping-pong half must hold at least one word"));
        }
        let total = half_words.saturating_mul(2);
        if total > self.window.len_words() {
            return Err(DmaError::configuration(format!(
                "two halves of {half_words} words exceed a window of {} words",
                self.window.len_words()
            )));
        }
        let end = u64::from(self.phys_base) + (total * WORD_BYTES) as u64;
        if end > 1 << 32 {
            return Err(DmaError::configuration(format!(
                "window at {:#x} ends beyond 32-bit physical addressing",
                self.phys_base
            )));
        }
        self.half_words = half_words;
        Ok(())
    }

    /// Words per half
    pub const fn half_words(&self) -> usize {
        self.half_words
    }

    /// Physical address of the window start
    pub const fn phys_base(&self) -> u32 {
        self.phys_base
    }

    /// Physical address and word offset of `half`
    #[allow(clippy::cast_possible_truncation)]
    pub const fn half(&self, half: Half) -> (u32, usize) {
        let offset = match half {
            Half::A => 0,
            Half::B => self.half_words,
        };
        // Fits: set_half_words checked the upper half against 2^32.
        let phys = self.phys_base + (offset * WORD_BYTES) as u32;
        (phys, offset)
    }

    /// Copy `words` to the start of `half`, followed by `tag` if given
    ///
    /// Returns the number of words staged.
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds`, with nothing written, if the words and the tag
    /// do not fit in a half.
    pub fn stage(&mut self, half: Half, words: &[u64], tag: Option<u64>) -> Result<usize> {
        let len = words.len() + usize::from(tag.is_some());
        check_bounds(0, len, self.half_words)?;
        let (_, offset) = self.half(half);
        self.window.write_words(offset, words)?;
        if let Some(tag) = tag {
            self.window.write_words(offset + words.len(), &[tag])?;
        }
        Ok(len)
    }

    /// Append the full contents of `half` to `out`
    ///
    /// # Errors
    ///
    /// Propagates window read errors; `out` keeps its previous length then.
    pub fn drain_into(&self, half: Half, out: &mut Vec<u64>) -> Result<()> {
        let (_, offset) = self.half(half);
        let start = out.len();
        out.resize(start + self.half_words, 0);
        if let Err(e) = self.window.read_words(offset, &mut out[start..]) {
            out.truncate(start);
            return Err(e);
        }
        Ok(())
    }

    /// Last word of `half`
    ///
    /// # Errors
    ///
    /// Propagates window read errors.
    pub fn last_word(&self, half: Half) -> Result<u64> {
        let (_, offset) = self.half(half);
        self.window.word(offset + self.half_words - 1)
    }

    /// The whole underlying window, mutably
    pub fn window_mut(&mut self) -> &mut W {
        &mut self.window
    }
}
