//! Physical memory layout and transfer bounds.
//!
//! The DMA register block and two scratch regions are reserved in DDR and
//! mapped through `/dev/mem`:
//!
//! ```text
//! DEFAULT_REGISTER_BASE     0x4040_0000   64 KiB   AXI-Lite register block
//! DEFAULT_SOURCE_BASE       0x0E00_0000    8 MiB   MM2S source (two halves)
//! DEFAULT_DESTINATION_BASE  0x0F00_0000    8 MiB   S2MM destination (two halves)
//! ```
//!
//! The scratch addresses come from the reserved-memory node of the board
//! device tree and are overridable at runtime.

use crate::wire::WORD_BYTES;

/// Bytes mapped for the register block.
pub const REGISTER_BLOCK_BYTES: usize = 65_535;

/// Bytes mapped for the MM2S source region.
pub const WRITE_WINDOW_BYTES: usize = 0x80_0000;

/// Bytes mapped for the S2MM destination region.
pub const READ_WINDOW_BYTES: usize = 0x80_0000;

/// Smallest accepted S2MM chunk length.
pub const MIN_READ_TRANSFER_BYTES: usize = 1 << 10;

/// Largest accepted S2MM chunk length.
pub const MAX_READ_TRANSFER_BYTES: usize = 1 << 23;

/// Largest single MM2S burst.
pub const MAX_WRITE_TRANSFER_BYTES: usize = 1 << 23;

/// S2MM chunk length before `init` is called.
pub const DEFAULT_READ_TRANSFER_BYTES: usize = 0x100;

/// Data words per MM2S burst when a payload is split (tag word excluded).
pub const DEFAULT_BURST_WORDS: usize = 128 * 256;

/// Physical base of the AXI DMA register block.
pub const DEFAULT_REGISTER_BASE: u32 = 0x4040_0000;

/// Physical base of the MM2S source region.
pub const DEFAULT_SOURCE_BASE: u32 = 0x0E00_0000;

/// Physical base of the S2MM destination region.
pub const DEFAULT_DESTINATION_BASE: u32 = 0x0F00_0000;

/// Words in the MM2S source region.
pub const WRITE_WINDOW_WORDS: usize = WRITE_WINDOW_BYTES / WORD_BYTES;

/// Words in the S2MM destination region.
pub const READ_WINDOW_WORDS: usize = READ_WINDOW_BYTES / WORD_BYTES;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bursts_fit_both_source_halves() {
        // Each half carries one burst plus its tag word.
        assert!(2 * (DEFAULT_BURST_WORDS + 1) <= WRITE_WINDOW_WORDS);
        assert!((DEFAULT_BURST_WORDS + 1) * WORD_BYTES <= MAX_WRITE_TRANSFER_BYTES);
    }

    #[test]
    fn read_bounds_are_word_aligned() {
        assert_eq!(MIN_READ_TRANSFER_BYTES % WORD_BYTES, 0);
        assert_eq!(MAX_READ_TRANSFER_BYTES % WORD_BYTES, 0);
        assert!(MIN_READ_TRANSFER_BYTES < MAX_READ_TRANSFER_BYTES);
    }

    #[test]
    fn physical_bases_are_page_aligned() {
        for base in [DEFAULT_REGISTER_BASE, DEFAULT_SOURCE_BASE, DEFAULT_DESTINATION_BASE] {
            assert_eq!(base % 4096, 0);
        }
    }
}
