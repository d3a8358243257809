//! AXI DMA engine in direct register mode
//!
//! # Transfer protocol
//!
//! ```text
//! write           stage buffer ─▶ MM2S_SA ─▶ MM2S_LENGTH ─▶ wait
//! write_splitted  for each chunk (+ tag word), alternating source halves:
//!                 stage ─▶ MM2S_SA ─▶ MM2S_LENGTH ─▶ wait
//! read            S2MM_DA(A) ─▶ S2MM_LENGTH ─▶ wait ─▶ drain A ─▶ end bit?
//!                   no  ─▶ S2MM_DA(B) ─▶ S2MM_LENGTH ─▶ wait ─▶ drain B ─▶ ...
//! ```
//!
//! The MM2S and S2MM sides are locked independently: one writer and one
//! reader may run concurrently, two writers (or two readers) serialize.
//! `reset` and `stop` take neither lock so they can interrupt a blocked
//! transfer from another thread.

use crate::backends::mmap::PhysRegion;
use crate::config::DeviceConfig;
use crate::error::{DmaError, Result};
use crate::mmio::{clear_transfer_flags, RegisterWindow};
use crate::sync::{select_sync, SyncStrategy};
use crate::windows::{Half, PingPong, WordWindow};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use zs_chip::layout::{
    DEFAULT_READ_TRANSFER_BYTES, MAX_READ_TRANSFER_BYTES, MAX_WRITE_TRANSFER_BYTES,
    MIN_READ_TRANSFER_BYTES,
};
use zs_chip::regs::{control, status, Channel};
use zs_chip::wire::{is_end_of_layer, OperatingMode, WORD_BYTES};

/// Default per-call wait limit
pub const DEFAULT_CHANNEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything an engine is assembled from
#[derive(Debug)]
pub struct EngineParts {
    /// AXI DMA register block
    pub registers: Arc<dyn RegisterWindow>,
    /// MM2S source memory
    pub source: Box<dyn WordWindow>,
    /// Physical address of `source`
    pub source_phys: u32,
    /// S2MM destination memory
    pub destination: Box<dyn WordWindow>,
    /// Physical address of `destination`
    pub destination_phys: u32,
    /// Completion strategy
    pub sync: Box<dyn SyncStrategy>,
    /// Data words per split burst (tag word excluded)
    pub burst_words: usize,
}

#[derive(Debug)]
struct WriteSide {
    source: PingPong,
}

#[derive(Debug)]
struct ReadSide {
    destination: PingPong,
}

/// Host side of the AXI DMA link to the ZS controller
#[derive(Debug)]
pub struct DmaEngine {
    registers: Arc<dyn RegisterWindow>,
    sync: Box<dyn SyncStrategy>,
    mm2s: Mutex<WriteSide>,
    s2mm: Mutex<ReadSide>,
    timeout_us: AtomicU64,
    read_len_bytes: AtomicUsize,
    burst_words: usize,
}

impl DmaEngine {
    /// Assemble an engine from its parts
    ///
    /// No register is touched until [`DmaEngine::init`].
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if two bursts (each with its tag word) do not
    /// fit the source window, a burst exceeds the MM2S length limit, or the
    /// destination window cannot hold two default-sized read chunks.
    pub fn new(parts: EngineParts) -> Result<Self> {
        let EngineParts {
            registers,
            source,
            source_phys,
            destination,
            destination_phys,
            sync,
            burst_words,
        } = parts;

        if burst_words == 0 {
            return Err(DmaError::configuration("burst must carry at least one data word"));
        }
        let half_words = burst_words + 1;
        if half_words * WORD_BYTES > MAX_WRITE_TRANSFER_BYTES {
            return Err(DmaError::configuration(format!(
                "burst of {burst_words} words exceeds the {MAX_WRITE_TRANSFER_BYTES}-byte MM2S limit"
            )));
        }
        let source = PingPong::new(source, source_phys, half_words)?;
        let destination = PingPong::new(
            destination,
            destination_phys,
            DEFAULT_READ_TRANSFER_BYTES / WORD_BYTES,
        )?;

        tracing::debug!(
            "DMA engine: {} sync, {burst_words} words/burst, source {source_phys:#x}, destination {destination_phys:#x}",
            sync.name()
        );

        Ok(Self {
            registers,
            sync,
            mm2s: Mutex::new(WriteSide { source }),
            s2mm: Mutex::new(ReadSide { destination }),
            timeout_us: AtomicU64::new(duration_to_us(DEFAULT_CHANNEL_TIMEOUT)),
            read_len_bytes: AtomicUsize::new(DEFAULT_READ_TRANSFER_BYTES),
            burst_words,
        })
    }

    /// Map the device described by `config` and build an engine on it
    ///
    /// # Errors
    ///
    /// Returns an error if a region cannot be mapped, an interrupt device
    /// cannot be opened, or the geometry is rejected by [`DmaEngine::new`].
    pub fn open(config: &DeviceConfig) -> Result<Self> {
        let registers = PhysRegion::map(
            &config.mem_path,
            u64::from(config.register_addr),
            config.register_bytes,
        )?;
        let source = PhysRegion::map(
            &config.mem_path,
            u64::from(config.source_addr),
            config.source_bytes,
        )?;
        let destination = PhysRegion::map(
            &config.mem_path,
            u64::from(config.destination_addr),
            config.destination_bytes,
        )?;
        let sync = select_sync(config.sync, &config.mm2s_uio, &config.s2mm_uio)?;

        let engine = Self::new(EngineParts {
            registers: Arc::new(registers),
            source: Box::new(source),
            source_phys: config.source_addr,
            destination: Box::new(destination),
            destination_phys: config.destination_addr,
            sync,
            burst_words: config.burst_words,
        })?;
        engine.set_channel_timeout(config.timeout);
        Ok(engine)
    }

    /// Start both channels with a read chunk of `read_len_bytes`
    ///
    /// Sends one `Partial` tag word so the controller starts expecting data.
    /// Calling it again re-applies the same sequence.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` without touching any register if
    /// `read_len_bytes` is outside `[1024, 2^23]`, not a multiple of the
    /// word size, or two chunks do not fit the destination window.
    /// Propagates the wait error of the initial tag write.
    pub fn init(&self, read_len_bytes: usize) -> Result<()> {
        if !(MIN_READ_TRANSFER_BYTES..=MAX_READ_TRANSFER_BYTES).contains(&read_len_bytes) {
            return Err(DmaError::configuration(format!(
                "read length {read_len_bytes} bytes outside [{MIN_READ_TRANSFER_BYTES}, {MAX_READ_TRANSFER_BYTES}]"
            )));
        }
        if read_len_bytes % WORD_BYTES != 0 {
            return Err(DmaError::configuration(format!(
                "read length {read_len_bytes} bytes is not a whole number of {WORD_BYTES}-byte words"
            )));
        }

        let mut write_side = lock(&self.mm2s);
        let mut read_side = lock(&self.s2mm);
        read_side
            .destination
            .set_half_words(read_len_bytes / WORD_BYTES)?;
        self.read_len_bytes.store(read_len_bytes, Ordering::Relaxed);

        let run = self.sync.run_control_word();
        self.registers
            .write32(Channel::Mm2s.address(), write_side.source.phys_base());
        self.registers.write32(Channel::Mm2s.control(), run);
        self.write_locked(&mut write_side, &[OperatingMode::Partial.tag_word()])?;
        self.registers.write32(Channel::S2mm.control(), run);

        tracing::info!(
            "DMA engine initialised: {read_len_bytes} bytes/read chunk, {} sync",
            self.sync.name()
        );
        Ok(())
    }

    /// Send `buffer` as a single burst from the start of the source window
    ///
    /// The buffer goes out verbatim; callers append the tag word themselves.
    /// Returns the number of bytes sent.
    ///
    /// # Errors
    ///
    /// Returns `TransferSize` (before any register write) for an empty
    /// buffer or one larger than 2^23 bytes, or the wait error.
    pub fn write(&self, buffer: &[u64]) -> Result<usize> {
        check_write_size(buffer.len())?;
        let mut side = lock(&self.mm2s);
        self.write_locked(&mut side, buffer)
    }

    fn write_locked(&self, side: &mut WriteSide, buffer: &[u64]) -> Result<usize> {
        let bytes = buffer.len() * WORD_BYTES;
        let started = Instant::now();
        side.source.window_mut().write_words(0, buffer)?;
        let copied = started.elapsed();

        self.start_burst(Channel::Mm2s, side.source.phys_base(), bytes);
        self.sync
            .wait(Channel::Mm2s, self.registers.as_ref(), self.channel_timeout())?;

        tracing::trace!(
            "MM2S {bytes} bytes: copy {copied:?}, transfer {:?}",
            started.elapsed() - copied
        );
        Ok(bytes)
    }

    /// Send `buffer` as a series of bursts, each closed by a tag word
    ///
    /// Every burst except the last ends with a `Partial` tag, the last with
    /// `Complete`. Bursts alternate between the two source halves; the next
    /// one is staged only after the previous transfer completed.
    ///
    /// # Errors
    ///
    /// Returns `TransferSize` for an empty buffer, or the first wait error
    /// (remaining bursts are not sent).
    pub fn write_splitted(&self, buffer: &[u64]) -> Result<()> {
        if buffer.is_empty() {
            return Err(DmaError::TransferSize {
                bytes: 0,
                max: MAX_WRITE_TRANSFER_BYTES,
            });
        }

        let mut side = lock(&self.mm2s);
        let count = buffer.len().div_ceil(self.burst_words);
        let mut half = Half::A;

        for (index, chunk) in buffer.chunks(self.burst_words).enumerate() {
            let mode = OperatingMode::for_chunk(index, count);
            let (phys, _) = side.source.half(half);

            let started = Instant::now();
            let staged = side.source.stage(half, chunk, Some(mode.tag_word()))?;
            let copied = started.elapsed();

            let bytes = staged * WORD_BYTES;
            self.start_burst(Channel::Mm2s, phys, bytes);
            self.sync
                .wait(Channel::Mm2s, self.registers.as_ref(), self.channel_timeout())?;

            tracing::debug!(
                "MM2S burst {}/{count} ({mode:?}, {bytes} bytes, half {half:?}): copy {copied:?}, transfer {:?}",
                index + 1,
                started.elapsed() - copied
            );
            half = half.other();
        }
        Ok(())
    }

    /// Receive one layer, appending its words to `out`
    ///
    /// Chunks of [`DmaEngine::read_transfer_len_bytes`] land in alternating
    /// destination halves. Each half is drained before the other half is
    /// armed. Reading stops after the chunk whose last word has the end bit
    /// set. Returns the number of bytes appended.
    ///
    /// # Errors
    ///
    /// Returns the wait error (`ChannelTimeout` or I/O). Words of chunks
    /// completed before the failure stay in `out`.
    pub fn read(&self, out: &mut Vec<u64>) -> Result<usize> {
        let side = lock(&self.s2mm);
        let chunk_bytes = side.destination.half_words() * WORD_BYTES;
        let start_len = out.len();
        let mut half = Half::A;
        let mut chunks = 0_usize;

        let (phys, _) = side.destination.half(half);
        self.start_burst(Channel::S2mm, phys, chunk_bytes);

        loop {
            let started = Instant::now();
            self.sync
                .wait(Channel::S2mm, self.registers.as_ref(), self.channel_timeout())?;
            let waited = started.elapsed();

            let last = side.destination.last_word(half)?;
            side.destination.drain_into(half, out)?;
            chunks += 1;
            tracing::trace!(
                "S2MM chunk {chunks} (half {half:?}): transfer {waited:?}, copy {:?}",
                started.elapsed() - waited
            );

            if is_end_of_layer(last) {
                break;
            }
            half = half.other();
            let (phys, _) = side.destination.half(half);
            self.start_burst(Channel::S2mm, phys, chunk_bytes);
        }

        let bytes = (out.len() - start_len) * WORD_BYTES;
        tracing::debug!("S2MM layer complete: {chunks} chunks, {bytes} bytes");
        Ok(bytes)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn start_burst(&self, channel: Channel, phys: u32, bytes: usize) {
        // Length is bounded by MAX_*_TRANSFER_BYTES (2^23).
        self.registers.write32(channel.address(), phys);
        self.registers.write32(channel.length(), bytes as u32);
    }

    /// Test the MM2S status register against one flag
    pub fn check_mm2s_status(&self, flag: u32) -> bool {
        status::matches(self.mm2s_status(), flag)
    }

    /// Test the S2MM status register against one flag
    pub fn check_s2mm_status(&self, flag: u32) -> bool {
        status::matches(self.s2mm_status(), flag)
    }

    /// Acknowledge a finished MM2S burst
    pub fn clear_mm2s_flags(&self) {
        clear_transfer_flags(self.registers.as_ref(), Channel::Mm2s);
    }

    /// Acknowledge a finished S2MM burst
    pub fn clear_s2mm_flags(&self) {
        clear_transfer_flags(self.registers.as_ref(), Channel::S2mm);
    }

    /// Soft-reset both channels (S2MM first)
    pub fn reset(&self) {
        tracing::debug!("DMA reset");
        self.registers.write32(Channel::S2mm.control(), control::RESET);
        self.registers.write32(Channel::Mm2s.control(), control::RESET);
    }

    /// Halt both channels (S2MM first)
    pub fn stop(&self) {
        tracing::debug!("DMA halt");
        self.registers.write32(Channel::S2mm.control(), control::HALT);
        self.registers.write32(Channel::Mm2s.control(), control::HALT);
    }

    /// Raw MM2S status register
    pub fn mm2s_status(&self) -> u32 {
        self.registers.read32(Channel::Mm2s.status())
    }

    /// Raw S2MM status register
    pub fn s2mm_status(&self) -> u32 {
        self.registers.read32(Channel::S2mm.status())
    }

    /// One-line decoded status of `channel`, e.g. `MM2S status (0x00001002): running idle IOC_Irq`
    pub fn status_report(&self, channel: Channel) -> String {
        let value = self.registers.read32(channel.status());
        format!(
            "{channel} status ({value:#010x}): {}",
            status::describe(value).join(" ")
        )
    }

    /// Current per-call wait limit
    pub fn channel_timeout(&self) -> Duration {
        Duration::from_micros(self.timeout_us.load(Ordering::Relaxed))
    }

    /// Change the per-call wait limit for both channels
    pub fn set_channel_timeout(&self, timeout: Duration) {
        self.timeout_us
            .store(duration_to_us(timeout), Ordering::Relaxed);
    }

    /// Bytes per S2MM chunk
    pub fn read_transfer_len_bytes(&self) -> usize {
        self.read_len_bytes.load(Ordering::Relaxed)
    }

    /// Data words per split MM2S burst
    pub const fn burst_words(&self) -> usize {
        self.burst_words
    }

    /// Name of the completion strategy in use
    pub fn sync_name(&self) -> &'static str {
        self.sync.name()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn duration_to_us(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_micros()).unwrap_or(u64::MAX)
}

fn check_write_size(words: usize) -> Result<()> {
    let bytes = words.saturating_mul(WORD_BYTES);
    if bytes == 0 || bytes > MAX_WRITE_TRANSFER_BYTES {
        return Err(DmaError::TransferSize {
            bytes,
            max: MAX_WRITE_TRANSFER_BYTES,
        });
    }
    Ok(())
}
