//! Word protocol between the host and the ZS controller.
//!
//! Both directions carry 64-bit words.
//!
//! **Outbound (MM2S).** Every physical burst ends with exactly one
//! operating-mode tag word. The tag carries a fixed marker in bits
//! [50..57] and the mode in bit 51:
//!
//! ```text
//!  63        58 57      50 49                                   0
//! ┌───────────┬──────────┬──────────────────────────────────────┐
//! │     0     │ 0000_00M1│                   0                  │   M = 1 partial
//! └───────────┴──────────┴──────────────────────────────────────┘   M = 0 complete
//! ```
//!
//! **Inbound (S2MM).** The accelerator fills fixed-size chunks. A chunk whose
//! final word has bit 63 set is the last chunk of the layer.

/// Bytes per stream word.
pub const WORD_BYTES: usize = 8;

/// Bit set in the last word of the final inbound chunk of a layer.
pub const END_OF_LAYER_BIT: u64 = 1 << 63;

/// Word the ZS controller emits when it runs idle (carries the end bit).
pub const ZS_IDLE_WORD: u64 = 0x8000_00E7_0000_0001;

const TAG_MARKER: u64 = 1 << 50;
const TAG_MODE_BIT: u64 = 1 << 51;

/// Trailing control word of an outbound burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingMode {
    /// More bursts of the same payload follow.
    Partial,
    /// Last burst of the payload.
    Complete,
}

impl OperatingMode {
    /// Encoded tag word.
    #[must_use]
    pub const fn tag_word(self) -> u64 {
        match self {
            Self::Partial => TAG_MARKER | TAG_MODE_BIT,
            Self::Complete => TAG_MARKER,
        }
    }

    /// Decode a tag word. Returns `None` for anything that is not exactly a tag.
    #[must_use]
    pub const fn from_word(word: u64) -> Option<Self> {
        if word == Self::Partial.tag_word() {
            Some(Self::Partial)
        } else if word == Self::Complete.tag_word() {
            Some(Self::Complete)
        } else {
            None
        }
    }

    /// Mode for chunk `index` of a payload split into `count` chunks.
    #[must_use]
    pub const fn for_chunk(index: usize, count: usize) -> Self {
        if index + 1 >= count {
            Self::Complete
        } else {
            Self::Partial
        }
    }
}

/// Whether `word` marks the final chunk of a layer.
#[must_use]
pub const fn is_end_of_layer(word: u64) -> bool {
    word & END_OF_LAYER_BIT != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_words_follow_bit_layout() {
        assert_eq!(OperatingMode::Complete.tag_word(), 0x0004_0000_0000_0000);
        assert_eq!(OperatingMode::Partial.tag_word(), 0x000C_0000_0000_0000);
    }

    #[test]
    fn tags_decode_only_exact_words() {
        assert_eq!(
            OperatingMode::from_word(0x000C_0000_0000_0000),
            Some(OperatingMode::Partial)
        );
        assert_eq!(OperatingMode::from_word(0x0004_0000_0000_0001), None);
        assert_eq!(OperatingMode::from_word(0), None);
    }

    #[test]
    fn only_last_chunk_is_complete() {
        let modes: Vec<_> = (0..3).map(|i| OperatingMode::for_chunk(i, 3)).collect();
        assert_eq!(
            modes,
            vec![
                OperatingMode::Partial,
                OperatingMode::Partial,
                OperatingMode::Complete
            ]
        );
        assert_eq!(OperatingMode::for_chunk(0, 1), OperatingMode::Complete);
    }

    #[test]
    fn end_of_layer_sentinel() {
        assert!(is_end_of_layer(ZS_IDLE_WORD));
        assert!(is_end_of_layer(END_OF_LAYER_BIT));
        assert!(!is_end_of_layer(0x7FFF_FFFF_FFFF_FFFF));
    }
}
