//! 32-bit register access for the AXI DMA block
//!
//! The engine talks to its registers only through [`RegisterWindow`], so the
//! same transfer code drives the `/dev/mem` mapping, the simulated loopback
//! device, and test recorders.

use std::fmt::Debug;
use zs_chip::regs::{status, Channel};

/// Volatile 32-bit register file
///
/// Both accessors take `&self`: registers are shared between the MM2S and
/// S2MM sides of one engine, and the hardware serializes individual accesses.
pub trait RegisterWindow: Send + Sync + Debug {
    /// Read a 32-bit register
    fn read32(&self, offset: usize) -> u32;

    /// Write a 32-bit register
    fn write32(&self, offset: usize, value: u32);
}

/// Acknowledge a finished burst on `channel`
///
/// Writes IDLE and then IOC_IRQ to the status register. Both bits are
/// write-1-to-clear; the separate writes match the order the IP expects.
pub fn clear_transfer_flags(regs: &dyn RegisterWindow, channel: Channel) {
    let offset = channel.status();
    regs.write32(offset, status::IDLE);
    regs.write32(offset, status::IOC_IRQ);
}

/// Whether `channel` reports a finished burst (IDLE and IOC_IRQ both set)
pub fn transfer_done(regs: &dyn RegisterWindow, channel: Channel) -> bool {
    regs.read32(channel.status()) & status::TRANSFER_DONE == status::TRANSFER_DONE
}
