//! AXI DMA register map (direct register mode, no scatter-gather).
//!
//! ```text
//! 0x00  MM2S_DMACR   control          0x30  S2MM_DMACR   control
//! 0x04  MM2S_DMASR   status           0x34  S2MM_DMASR   status
//! 0x18  MM2S_SA      source address   0x48  S2MM_DA      destination address
//! 0x28  MM2S_LENGTH  bytes, triggers  0x58  S2MM_LENGTH  bytes, arms
//! ```
//!
//! Writing the LENGTH register starts the transfer on that channel, so the
//! address register must always be programmed first.

// ── MM2S (host → stream) ─────────────────────────────────────────────────────

/// MM2S control register.
pub const MM2S_CONTROL: usize = 0x00;
/// MM2S status register.
pub const MM2S_STATUS: usize = 0x04;
/// MM2S source address (physical, 32-bit).
pub const MM2S_START_ADDRESS: usize = 0x18;
/// MM2S transfer length in bytes. Writing it launches the transfer.
pub const MM2S_LENGTH: usize = 0x28;

// ── S2MM (stream → host) ─────────────────────────────────────────────────────

/// S2MM control register.
pub const S2MM_CONTROL: usize = 0x30;
/// S2MM status register.
pub const S2MM_STATUS: usize = 0x34;
/// S2MM destination address (physical, 32-bit).
pub const S2MM_DESTINATION_ADDRESS: usize = 0x48;
/// S2MM transfer length in bytes. Writing it arms the channel.
pub const S2MM_LENGTH: usize = 0x58;

/// One past the highest register offset used by the driver.
pub const REGISTER_SPAN: usize = 0x5C;

// ── Status register bit definitions ──────────────────────────────────────────

pub mod status {
    //! DMASR bits. IDLE and the three IRQ bits are write-1-to-clear.

    /// Pseudo-flag: "channel not halted". Never tested with bitwise AND.
    pub const RUNNING: u32 = 0x0000_0000;
    /// Channel halted (reset or stopped).
    pub const HALTED: u32 = 0x0000_0001;
    /// Transfer completed, channel paused.
    pub const IDLE: u32 = 0x0000_0002;
    /// Scatter-gather engine included in the IP.
    pub const SG_INCLD: u32 = 0x0000_0008;
    /// DMA internal error (length mismatch).
    pub const DMA_INT_ERR: u32 = 0x0000_0010;
    /// DMA slave error on the memory-mapped side.
    pub const DMA_SLV_ERR: u32 = 0x0000_0020;
    /// DMA decode error (invalid address).
    pub const DMA_DEC_ERR: u32 = 0x0000_0040;
    /// Scatter-gather internal error.
    pub const SG_INT_ERR: u32 = 0x0000_0100;
    /// Scatter-gather slave error.
    pub const SG_SLV_ERR: u32 = 0x0000_0200;
    /// Scatter-gather decode error.
    pub const SG_DEC_ERR: u32 = 0x0000_0400;
    /// Interrupt on complete.
    pub const IOC_IRQ: u32 = 0x0000_1000;
    /// Interrupt on delay timer.
    pub const DLY_IRQ: u32 = 0x0000_2000;
    /// Interrupt on error.
    pub const ERR_IRQ: u32 = 0x0000_4000;

    /// Bits that must both be set before a burst counts as finished.
    pub const TRANSFER_DONE: u32 = IDLE | IOC_IRQ;

    const NAMED: [(u32, &str); 11] = [
        (IDLE, "idle"),
        (SG_INCLD, "SGIncld"),
        (DMA_INT_ERR, "DMAIntErr"),
        (DMA_SLV_ERR, "DMASlvErr"),
        (DMA_DEC_ERR, "DMADecErr"),
        (SG_INT_ERR, "SGIntErr"),
        (SG_SLV_ERR, "SGSlvErr"),
        (SG_DEC_ERR, "SGDecErr"),
        (IOC_IRQ, "IOC_Irq"),
        (DLY_IRQ, "Dly_Irq"),
        (ERR_IRQ, "Err_Irq"),
    ];

    /// Test a status word against one flag.
    ///
    /// [`RUNNING`] is special-cased as "HALTED is clear"; every other flag is
    /// a plain bitwise test.
    #[must_use]
    pub const fn matches(status: u32, flag: u32) -> bool {
        if flag == RUNNING {
            status & HALTED == 0
        } else {
            status & flag != 0
        }
    }

    /// Name every flag set in `status`, starting with `halted` or `running`.
    #[must_use]
    pub fn describe(status: u32) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(NAMED.len() + 1);
        names.push(if status & HALTED != 0 { "halted" } else { "running" });
        names.extend(
            NAMED
                .iter()
                .filter(|(bit, _)| status & bit != 0)
                .map(|(_, name)| *name),
        );
        names
    }
}

// ── Control register values ──────────────────────────────────────────────────

pub mod control {
    //! DMACR values written by the driver.

    /// Halt the channel.
    pub const HALT: u32 = 0x0000;
    /// Run, all interrupts disabled.
    pub const RUN_NO_IRQ: u32 = 0x0001;
    /// Soft reset.
    pub const RESET: u32 = 0x0004;
    /// Run with IOC, delay and error interrupts enabled.
    pub const RUN_IRQ: u32 = 0xF001;
}

/// DMA channel direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Memory-mapped to stream (host writes).
    Mm2s,
    /// Stream to memory-mapped (host reads).
    S2mm,
}

impl Channel {
    /// Control register of this channel.
    #[must_use]
    pub const fn control(self) -> usize {
        match self {
            Self::Mm2s => MM2S_CONTROL,
            Self::S2mm => S2MM_CONTROL,
        }
    }

    /// Status register of this channel.
    #[must_use]
    pub const fn status(self) -> usize {
        match self {
            Self::Mm2s => MM2S_STATUS,
            Self::S2mm => S2MM_STATUS,
        }
    }

    /// Address register (source for MM2S, destination for S2MM).
    #[must_use]
    pub const fn address(self) -> usize {
        match self {
            Self::Mm2s => MM2S_START_ADDRESS,
            Self::S2mm => S2MM_DESTINATION_ADDRESS,
        }
    }

    /// Length register of this channel.
    #[must_use]
    pub const fn length(self) -> usize {
        match self {
            Self::Mm2s => MM2S_LENGTH,
            Self::S2mm => S2MM_LENGTH,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mm2s => write!(f, "MM2S"),
            Self::S2mm => write!(f, "S2MM"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_offsets_match_axi_dma_map() {
        assert_eq!(MM2S_CONTROL, 0x00);
        assert_eq!(MM2S_STATUS, 0x04);
        assert_eq!(MM2S_START_ADDRESS, 0x18);
        assert_eq!(MM2S_LENGTH, 0x28);
        assert_eq!(S2MM_CONTROL, 0x30);
        assert_eq!(S2MM_STATUS, 0x34);
        assert_eq!(S2MM_DESTINATION_ADDRESS, 0x48);
        assert_eq!(S2MM_LENGTH, 0x58);
        assert!(S2MM_LENGTH < REGISTER_SPAN);
    }

    #[test]
    fn running_means_not_halted() {
        assert!(status::matches(status::IDLE, status::RUNNING));
        assert!(!status::matches(status::HALTED | status::IDLE, status::RUNNING));
        assert!(status::matches(status::IDLE | status::IOC_IRQ, status::IOC_IRQ));
        assert!(!status::matches(status::IDLE, status::IOC_IRQ));
    }

    #[test]
    fn describe_lists_set_bits_in_register_order() {
        let names = status::describe(status::HALTED | status::IDLE | status::ERR_IRQ);
        assert_eq!(names, vec!["halted", "idle", "Err_Irq"]);
        assert_eq!(status::describe(0), vec!["running"]);
    }

    #[test]
    fn channel_registers() {
        assert_eq!(Channel::Mm2s.length(), MM2S_LENGTH);
        assert_eq!(Channel::S2mm.address(), S2MM_DESTINATION_ADDRESS);
        assert_eq!(Channel::S2mm.to_string(), "S2MM");
    }
}
