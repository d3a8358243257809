//! Queued streaming on top of [`DmaEngine`]
//!
//! Producers hand buffers to [`StreamingQueue::write`] and return at once.
//! One background worker (`zs-dma-writer`) drains the queue into
//! [`DmaEngine::write_splitted`], so every buffer reaches the controller as
//! tagged bursts. Layer results are read synchronously with
//! [`StreamingQueue::read_layer`].
//!
//! # Failure policy
//!
//! - A buffer whose write fails is dropped, never retried. The drop is
//!   logged, counted in [`StreamingQueue::dropped_buffers`], and the error
//!   text is kept in [`StreamingQueue::last_write_error`].
//! - A write timeout additionally halts the queue; the owner re-runs
//!   [`StreamingQueue::init`] to resume.
//! - A read timeout halts and re-initialises the queue with the same read
//!   length, then reports the timeout to the caller.
//!
//! The queue itself is unbounded: a producer that outpaces the link grows
//! memory instead of blocking.

use crate::engine::DmaEngine;
use crate::error::{DmaError, Result};
use crate::gpio::{Direction, GpioLine};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use zs_chip::layout::MAX_WRITE_TRANSFER_BYTES;
use zs_chip::wire::{is_end_of_layer, ZS_IDLE_WORD};

/// How long the idle worker waits for a buffer before re-checking `running`
pub const IDLE_INTERVAL: Duration = Duration::from_micros(70);

/// Grace period between clearing `running` and halting the engine
pub const STOP_GRACE: Duration = Duration::from_micros(100);

/// Width of the reset pulse on the GPIO line
pub const RESET_PULSE: Duration = Duration::from_micros(100);

const WORKER_NAME: &str = "zs-dma-writer";

#[derive(Debug)]
struct Shared {
    engine: DmaEngine,
    gpio: Mutex<Box<dyn GpioLine>>,
    receiver: Mutex<Receiver<Vec<u64>>>,
    running: AtomicBool,
    pending: AtomicUsize,
    dropped: AtomicUsize,
    /// Bumped by every explicit [`StreamingQueue::stop`]
    stops: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    /// Stop accepting work and halt both channels. Safe on the worker thread.
    fn halt(&self) {
        self.running.store(false, Ordering::Release);
        thread::sleep(STOP_GRACE);
        self.engine.stop();
    }

    fn transmit(&self, buffer: &[u64]) {
        match self.engine.write_splitted(buffer) {
            Ok(()) => debug!("Sent buffer of {} words", buffer.len()),
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                error!("Dropping buffer of {} words: {e}", buffer.len());
                *lock(&self.last_error) = Some(e.to_string());
                if e.is_timeout() {
                    error!("Write timeout, halting the queue");
                    self.halt();
                }
            }
        }
    }

    fn run_worker(&self) {
        info!("Write worker started");
        let receiver = lock(&self.receiver);
        while self.running.load(Ordering::Acquire) {
            match receiver.recv_timeout(IDLE_INTERVAL) {
                Ok(buffer) => {
                    self.pending.fetch_sub(1, Ordering::Relaxed);
                    if self.running.load(Ordering::Acquire) {
                        self.transmit(&buffer);
                    } else {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!("Dropping buffer of {} words taken during stop", buffer.len());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("Write worker stopped");
    }

    fn discard_queued(&self) -> usize {
        let receiver = lock(&self.receiver);
        let mut discarded = 0;
        while receiver.try_recv().is_ok() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
            discarded += 1;
        }
        discarded
    }
}

/// DMA engine with a queued, asynchronous write path
#[derive(Debug)]
pub struct StreamingQueue {
    shared: Arc<Shared>,
    sender: Sender<Vec<u64>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Serializes init, stop and read-timeout recovery
    lifecycle: Mutex<()>,
}

impl StreamingQueue {
    /// Wrap `engine` and the controller reset line
    ///
    /// Nothing runs until [`StreamingQueue::init`].
    #[must_use]
    pub fn new(engine: DmaEngine, gpio: Box<dyn GpioLine>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            shared: Arc::new(Shared {
                engine,
                gpio: Mutex::new(gpio),
                receiver: Mutex::new(receiver),
                running: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                dropped: AtomicUsize::new(0),
                stops: AtomicU64::new(0),
                last_error: Mutex::new(None),
            }),
            sender,
            worker: Mutex::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    /// Queue a copy of `buffer` for transmission
    ///
    /// Returns immediately. Buffers from one producer go out in call order.
    /// When the queue is stopped the buffer still waits in the queue, and is
    /// discarded by the next [`StreamingQueue::init`].
    ///
    /// # Errors
    ///
    /// Returns `TransferSize` for an empty buffer and `Allocation` if the
    /// copy cannot be allocated.
    pub fn write(&self, buffer: &[u64]) -> Result<()> {
        let mut owned = Vec::new();
        owned
            .try_reserve_exact(buffer.len())
            .map_err(|_| DmaError::Allocation {
                words: buffer.len(),
            })?;
        owned.extend_from_slice(buffer);
        self.enqueue(owned)
    }

    /// Queue `buffer` without copying
    ///
    /// # Errors
    ///
    /// Returns `TransferSize` for an empty buffer.
    pub fn enqueue(&self, buffer: Vec<u64>) -> Result<()> {
        if buffer.is_empty() {
            return Err(DmaError::TransferSize {
                bytes: 0,
                max: MAX_WRITE_TRANSFER_BYTES,
            });
        }
        self.shared.pending.fetch_add(1, Ordering::Relaxed);
        self.sender.send(buffer).map_err(|_| {
            self.shared.pending.fetch_sub(1, Ordering::Relaxed);
            DmaError::NotRunning
        })
    }

    /// Reset the hardware, discard queued buffers, start the engine and the worker
    ///
    /// # Errors
    ///
    /// Returns the engine or GPIO error; the queue stays stopped then. A
    /// failure here means the device cannot be used.
    pub fn init(&self, read_len_bytes: usize) -> Result<()> {
        let _lifecycle = lock(&self.lifecycle);
        self.start(read_len_bytes)
    }

    fn start(&self, read_len_bytes: usize) -> Result<()> {
        self.join_worker();
        self.reset()?;

        let discarded = self.shared.discard_queued();
        if discarded > 0 {
            warn!("Discarded {discarded} queued buffers on init");
        }

        info!("Initialising streaming queue with {read_len_bytes} bytes per read chunk");
        self.shared.engine.init(read_len_bytes)?;

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || shared.run_worker())
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                DmaError::from(e)
            })?;
        *lock(&self.worker) = Some(handle);
        Ok(())
    }

    /// Reset the engine, then pulse the controller reset line
    ///
    /// # Errors
    ///
    /// Returns `Gpio` if the line cannot be driven.
    pub fn reset(&self) -> Result<()> {
        self.shared.engine.reset();
        let mut gpio = lock(&self.shared.gpio);
        gpio.set_gpio_direction(Direction::Out)?;
        gpio.set_gpio_value(1)?;
        thread::sleep(RESET_PULSE);
        gpio.set_gpio_value(0)?;
        debug!("Controller reset pulse sent");
        Ok(())
    }

    /// Stop the worker and halt the engine
    ///
    /// Returns after the worker has exited, so no register is written by
    /// this queue afterwards. A [`StreamingQueue::read_layer`] blocked on
    /// another thread times out without re-initialising the queue.
    pub fn stop(&self) {
        let _lifecycle = lock(&self.lifecycle);
        self.shared.stops.fetch_add(1, Ordering::AcqRel);
        self.halt_and_join();
    }

    fn halt_and_join(&self) {
        self.shared.halt();
        self.join_worker();
    }

    fn join_worker(&self) {
        self.shared.running.store(false, Ordering::Release);
        let Some(handle) = lock(&self.worker).take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("Write worker panicked");
        }
    }

    /// Read one layer into `out` (cleared first)
    ///
    /// Returns the number of bytes read.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` before [`StreamingQueue::init`]. On a channel
    /// timeout the queue is stopped and re-initialised with the same read
    /// length before the timeout is returned, unless it was stopped while
    /// the read was in progress.
    pub fn read_layer(&self, out: &mut Vec<u64>) -> Result<usize> {
        if !self.is_running() {
            return Err(DmaError::NotRunning);
        }
        let stops = self.shared.stops.load(Ordering::Acquire);
        out.clear();
        match self.shared.engine.read(out) {
            Ok(bytes) => {
                let stats = LayerStats::from_words(out);
                debug!(
                    "Layer read: {bytes} bytes, {} zero words, {} idle words, {} end-bit words",
                    stats.zero_words, stats.idle_words, stats.end_bit_words
                );
                Ok(bytes)
            }
            Err(e) if e.is_timeout() => {
                error!("Read timeout after {} words: {e}", out.len());
                self.recover_from_read_timeout(stops);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn recover_from_read_timeout(&self, stops_before_read: u64) {
        let _lifecycle = lock(&self.lifecycle);
        if self.shared.stops.load(Ordering::Acquire) != stops_before_read || !self.is_running() {
            warn!("Queue stopped during the read, leaving it stopped");
            return;
        }
        let read_len = self.shared.engine.read_transfer_len_bytes();
        self.halt_and_join();
        if let Err(init_err) = self.start(read_len) {
            error!("Re-initialisation after read timeout failed: {init_err}");
        }
    }

    /// Whether the worker is accepting work
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Buffers queued but not yet taken by the worker
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Relaxed)
    }

    /// Buffers the worker gave up on
    pub fn dropped_buffers(&self) -> usize {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Text of the most recent write failure
    pub fn last_write_error(&self) -> Option<String> {
        lock(&self.shared.last_error).clone()
    }

    /// The wrapped engine
    pub fn engine(&self) -> &DmaEngine {
        &self.shared.engine
    }
}

impl Drop for StreamingQueue {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        } else {
            self.join_worker();
        }
    }
}

/// Word census of one received layer
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LayerStats {
    /// Words equal to zero
    pub zero_words: usize,
    /// Words equal to the controller idle word
    pub idle_words: usize,
    /// Words with the end-of-layer bit set
    pub end_bit_words: usize,
}

impl LayerStats {
    /// Count the control words in `words`
    pub fn from_words(words: &[u64]) -> Self {
        words.iter().fold(Self::default(), |mut stats, &word| {
            stats.zero_words += usize::from(word == 0);
            stats.idle_words += usize::from(word == ZS_IDLE_WORD);
            stats.end_bit_words += usize::from(is_end_of_layer(word));
            stats
        })
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
