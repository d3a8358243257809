// SPDX-License-Identifier: AGPL-3.0-only

//! Simulated AXI DMA block with a loopback accelerator
//!
//! Behaves like the DMA IP wired to a ZS controller that echoes every data
//! word it receives:
//!
//! ```text
//! MM2S burst ─▶ strip trailing tag ─▶ echo stream ─▶ S2MM chunks
//!                      │
//!                      └─ Complete tag closes the layer: the next chunk
//!                         that drains the stream is zero-padded and ends
//!                         with ZS_IDLE_WORD (end bit set)
//! ```
//!
//! Register semantics follow direct register mode: both channels start
//! halted, `RUN` clears HALTED, `HALT` sets it, `RESET` returns the channel
//! to its power-on state, and IDLE / IOC_IRQ / DLY_IRQ / ERR_IRQ are
//! write-1-to-clear. LENGTH writes to a halted channel are ignored, so
//! transfers on a stopped engine time out exactly as on hardware.
//!
//! Every register write is logged, which is what the engine and queue tests
//! assert against. Data words must keep bit 63 clear: the simulator, like
//! the engine, treats it as the end-of-layer marker of a chunk.

use crate::engine::{DmaEngine, EngineParts};
use crate::error::Result;
use crate::io::InterruptHandle;
use crate::mmio::RegisterWindow;
use crate::sync::SyncStrategy;
use crate::windows::{check_bounds, WordWindow};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use zs_chip::layout::{READ_WINDOW_WORDS, WRITE_WINDOW_WORDS};
use zs_chip::regs::{self, control, status, Channel, REGISTER_SPAN};
use zs_chip::wire::{OperatingMode, WORD_BYTES, ZS_IDLE_WORD};

const W1C_BITS: u32 = status::IDLE | status::IOC_IRQ | status::DLY_IRQ | status::ERR_IRQ;
const IOC_IRQ_ENABLE: u32 = 0x1000;

#[derive(Debug)]
struct SimState {
    regs: [u32; REGISTER_SPAN / 4],
    source: Vec<u64>,
    destination: Vec<u64>,
    stream: VecDeque<u64>,
    layer_complete: bool,
    pending_s2mm: Option<(u32, usize)>,
    stalled: bool,
    register_writes: Vec<(usize, u32)>,
    tags: Vec<OperatingMode>,
    received: Vec<u64>,
    irq_mm2s: Option<UnixStream>,
    irq_s2mm: Option<UnixStream>,
}

impl SimState {
    fn new(source_words: usize, destination_words: usize) -> Self {
        let mut state = Self {
            regs: [0; REGISTER_SPAN / 4],
            source: vec![0; source_words],
            destination: vec![0; destination_words],
            stream: VecDeque::new(),
            layer_complete: false,
            pending_s2mm: None,
            stalled: false,
            register_writes: Vec::new(),
            tags: Vec::new(),
            received: Vec::new(),
            irq_mm2s: None,
            irq_s2mm: None,
        };
        state.power_on(Channel::Mm2s);
        state.power_on(Channel::S2mm);
        state
    }

    fn reg(&self, offset: usize) -> u32 {
        self.regs.get(offset / 4).copied().unwrap_or(0)
    }

    fn set_reg(&mut self, offset: usize, value: u32) {
        if let Some(slot) = self.regs.get_mut(offset / 4) {
            *slot = value;
        }
    }

    fn power_on(&mut self, channel: Channel) {
        self.set_reg(channel.control(), control::HALT);
        self.set_reg(channel.status(), status::HALTED);
        if channel == Channel::S2mm {
            self.pending_s2mm = None;
        }
    }

    fn running(&self, channel: Channel) -> bool {
        self.reg(channel.status()) & status::HALTED == 0
    }

    fn write(&mut self, offset: usize, value: u32) {
        self.register_writes.push((offset, value));
        match offset {
            regs::MM2S_CONTROL => self.write_control(Channel::Mm2s, value),
            regs::S2MM_CONTROL => self.write_control(Channel::S2mm, value),
            regs::MM2S_STATUS | regs::S2MM_STATUS => {
                let current = self.reg(offset);
                self.set_reg(offset, current & !(value & W1C_BITS));
            }
            regs::MM2S_LENGTH => {
                self.set_reg(offset, value);
                self.mm2s_burst(value as usize);
            }
            regs::S2MM_LENGTH => {
                self.set_reg(offset, value);
                if self.running(Channel::S2mm) {
                    let addr = self.reg(regs::S2MM_DESTINATION_ADDRESS);
                    self.pending_s2mm = Some((addr, value as usize / WORD_BYTES));
                    self.try_complete_s2mm();
                }
            }
            _ => self.set_reg(offset, value),
        }
    }

    fn write_control(&mut self, channel: Channel, value: u32) {
        if value & control::RESET != 0 {
            self.power_on(channel);
            return;
        }
        self.set_reg(channel.control(), value);
        let status_offset = channel.status();
        let current = self.reg(status_offset);
        if value & control::RUN_NO_IRQ != 0 {
            self.set_reg(status_offset, current & !status::HALTED);
            if channel == Channel::S2mm {
                self.try_complete_s2mm();
            }
        } else {
            self.set_reg(status_offset, current | status::HALTED);
        }
    }

    fn mm2s_burst(&mut self, bytes: usize) {
        if !self.running(Channel::Mm2s) || self.stalled {
            return;
        }
        let Some(start) = window_index(self.reg(regs::MM2S_START_ADDRESS), LoopbackDevice::SOURCE_PHYS)
        else {
            self.fail(Channel::Mm2s);
            return;
        };
        let words = bytes / WORD_BYTES;
        let Some(burst) = self.source.get(start..start + words) else {
            self.fail(Channel::Mm2s);
            return;
        };
        let burst = burst.to_vec();

        let data = match burst.last().copied().and_then(OperatingMode::from_word) {
            Some(mode) => {
                self.tags.push(mode);
                if mode == OperatingMode::Complete {
                    self.layer_complete = true;
                }
                &burst[..burst.len() - 1]
            }
            None => &burst[..],
        };
        self.received.extend_from_slice(data);
        self.stream.extend(data.iter().copied());

        self.finish(Channel::Mm2s);
        self.try_complete_s2mm();
    }

    fn try_complete_s2mm(&mut self) {
        if self.stalled || !self.running(Channel::S2mm) {
            return;
        }
        let Some((addr, words)) = self.pending_s2mm else {
            return;
        };
        let fills_chunk = self.stream.len() >= words;
        if !(fills_chunk || self.layer_complete) {
            return;
        }
        let Some(start) = window_index(addr, LoopbackDevice::DESTINATION_PHYS) else {
            self.pending_s2mm = None;
            self.fail(Channel::S2mm);
            return;
        };
        let Some(chunk) = self.destination.get_mut(start..start + words) else {
            self.pending_s2mm = None;
            self.fail(Channel::S2mm);
            return;
        };

        if fills_chunk {
            for slot in chunk.iter_mut() {
                *slot = self.stream.pop_front().unwrap_or(0);
            }
        } else {
            // Layer closed and the stream fits: pad and mark the end.
            chunk.fill(0);
            for slot in chunk.iter_mut() {
                match self.stream.pop_front() {
                    Some(word) => *slot = word,
                    None => break,
                }
            }
            if let Some(last) = chunk.last_mut() {
                *last = ZS_IDLE_WORD;
            }
            self.layer_complete = false;
        }

        self.pending_s2mm = None;
        self.finish(Channel::S2mm);
    }

    fn finish(&mut self, channel: Channel) {
        let offset = channel.status();
        let current = self.reg(offset);
        self.set_reg(offset, current | status::IDLE | status::IOC_IRQ);
        if self.reg(channel.control()) & IOC_IRQ_ENABLE != 0 {
            let line = match channel {
                Channel::Mm2s => self.irq_mm2s.as_mut(),
                Channel::S2mm => self.irq_s2mm.as_mut(),
            };
            if let Some(line) = line {
                raise(line);
            }
        }
    }

    fn fail(&mut self, channel: Channel) {
        let offset = channel.status();
        let current = self.reg(offset);
        self.set_reg(offset, current | status::DMA_DEC_ERR | status::ERR_IRQ | status::HALTED);
        tracing::warn!("simulated {channel} decode error");
    }
}

fn window_index(addr: u32, base: u32) -> Option<usize> {
    let offset = addr.checked_sub(base)? as usize;
    (offset % WORD_BYTES == 0).then_some(offset / WORD_BYTES)
}

fn raise(line: &mut UnixStream) {
    // Drop the re-arm words written back since the last interrupt.
    let mut sink = [0_u8; 64];
    if line.set_nonblocking(true).is_ok() {
        while matches!(line.read(&mut sink), Ok(n) if n > 0) {}
        let _ = line.set_nonblocking(false);
    }
    if let Err(e) = line.write_all(&1_u32.to_ne_bytes()) {
        tracing::warn!("simulated interrupt not delivered: {e}");
    }
}

/// Handle to one simulated device
///
/// Clones share the same device.
#[derive(Debug, Clone)]
pub struct LoopbackDevice {
    state: Arc<Mutex<SimState>>,
}

impl Default for LoopbackDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackDevice {
    /// Physical address the simulator assigns to the source window
    pub const SOURCE_PHYS: u32 = 0x1000_0000;
    /// Physical address the simulator assigns to the destination window
    pub const DESTINATION_PHYS: u32 = 0x1800_0000;

    /// Device with full-size (8 MiB) windows
    #[must_use]
    pub fn new() -> Self {
        Self::with_windows(WRITE_WINDOW_WORDS, READ_WINDOW_WORDS)
    }

    /// Device whose source and destination windows both hold `words` words
    #[must_use]
    pub fn with_window_words(words: usize) -> Self {
        Self::with_windows(words, words)
    }

    fn with_windows(source_words: usize, destination_words: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(source_words, destination_words))),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register block view
    #[must_use]
    pub fn registers(&self) -> Arc<dyn RegisterWindow> {
        Arc::new(SimRegisters(self.clone()))
    }

    /// Source (MM2S) memory view
    #[must_use]
    pub fn source_window(&self) -> Box<dyn WordWindow> {
        Box::new(SimWindow {
            device: self.clone(),
            side: Side::Source,
        })
    }

    /// Destination (S2MM) memory view
    #[must_use]
    pub fn destination_window(&self) -> Box<dyn WordWindow> {
        Box::new(SimWindow {
            device: self.clone(),
            side: Side::Destination,
        })
    }

    /// Interrupt handles wired to this device (MM2S, S2MM)
    ///
    /// Once called, each completed burst on a channel running with
    /// interrupts enabled makes the matching handle readable.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a socket pair cannot be created.
    pub fn interrupt_handles(&self) -> Result<(InterruptHandle, InterruptHandle)> {
        let (mm2s, mm2s_line) = UnixStream::pair()?;
        let (s2mm, s2mm_line) = UnixStream::pair()?;
        let mut state = self.state();
        state.irq_mm2s = Some(mm2s_line);
        state.irq_s2mm = Some(s2mm_line);
        Ok((mm2s.into(), s2mm.into()))
    }

    /// Build an engine on this device
    ///
    /// # Errors
    ///
    /// Propagates [`DmaEngine::new`] geometry errors.
    pub fn engine(&self, sync: Box<dyn SyncStrategy>, burst_words: usize) -> Result<DmaEngine> {
        DmaEngine::new(EngineParts {
            registers: self.registers(),
            source: self.source_window(),
            source_phys: Self::SOURCE_PHYS,
            destination: self.destination_window(),
            destination_phys: Self::DESTINATION_PHYS,
            sync,
            burst_words,
        })
    }

    /// Every register write so far, in order
    #[must_use]
    pub fn register_writes(&self) -> Vec<(usize, u32)> {
        self.state().register_writes.clone()
    }

    /// Forget the register write log
    pub fn clear_register_writes(&self) {
        self.state().register_writes.clear();
    }

    /// Operating-mode tags received, one per tagged burst
    #[must_use]
    pub fn tags(&self) -> Vec<OperatingMode> {
        self.state().tags.clone()
    }

    /// Data words received on MM2S (tags stripped)
    #[must_use]
    pub fn received_words(&self) -> Vec<u64> {
        self.state().received.clone()
    }

    /// Stop completing transfers (both channels) until cleared
    pub fn set_stalled(&self, stalled: bool) {
        let mut state = self.state();
        state.stalled = stalled;
        if !stalled {
            state.try_complete_s2mm();
        }
    }

    /// Current status register of `channel`
    #[must_use]
    pub fn status(&self, channel: Channel) -> u32 {
        self.state().reg(channel.status())
    }
}

#[derive(Debug)]
struct SimRegisters(LoopbackDevice);

impl RegisterWindow for SimRegisters {
    fn read32(&self, offset: usize) -> u32 {
        self.0.state().reg(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        self.0.state().write(offset, value);
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Source,
    Destination,
}

#[derive(Debug)]
struct SimWindow {
    device: LoopbackDevice,
    side: Side,
}

impl SimWindow {
    fn with<T>(&self, f: impl FnOnce(&mut Vec<u64>) -> T) -> T {
        let mut state = self.device.state();
        match self.side {
            Side::Source => f(&mut state.source),
            Side::Destination => f(&mut state.destination),
        }
    }
}

impl WordWindow for SimWindow {
    fn len_words(&self) -> usize {
        self.with(|words| words.len())
    }

    fn write_words(&mut self, at: usize, words: &[u64]) -> Result<()> {
        self.with(|mem| {
            check_bounds(at, words.len(), mem.len())?;
            mem[at..at + words.len()].copy_from_slice(words);
            Ok(())
        })
    }

    fn read_words(&self, at: usize, out: &mut [u64]) -> Result<()> {
        self.with(|mem| {
            check_bounds(at, out.len(), mem.len())?;
            out.copy_from_slice(&mem[at..at + out.len()]);
            Ok(())
        })
    }
}
