//! Host-side driver for the AXI DMA link to the ZS controller.
//!
//! Weights, activations and results travel between host memory and the
//! FPGA accelerator through a Xilinx AXI DMA block in direct register mode.
//!
//! # Layers
//!
//! ```text
//! StreamingQueue   queued writes on a worker thread, layer reads, self-healing
//!     │
//! DmaEngine        burst chunking, tag words, ping-pong halves, per-direction locks
//!     │
//! SyncStrategy     PollSync (status spin) | InterruptSync (UIO poll)
//!     │
//! RegisterWindow   PhysRegion (/dev/mem) | LoopbackDevice (simulated)
//! WordWindow
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use zs_driver::{open_reset_line, DeviceConfig, DmaEngine, StreamingQueue};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeviceConfig::from_env()?;
//! let engine = DmaEngine::open(&config)?;
//! let queue = StreamingQueue::new(engine, open_reset_line(config.gpio)?);
//! queue.init(4096)?;
//!
//! queue.write(&[0x1, 0x2, 0x3])?;
//! let mut layer = Vec::new();
//! let bytes = queue.read_layer(&mut layer)?;
//! println!("{bytes} bytes back");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod backends;
mod config;
mod engine;
mod error;
pub mod gpio;
pub mod io;
pub mod mmio;
mod queue;
pub mod sync;
pub mod windows;

/// Silicon model (re-exported from zs-chip).
pub mod chip {
    pub use zs_chip::layout;
    pub use zs_chip::regs;
    pub use zs_chip::wire;
}

pub use backends::{LoopbackDevice, PhysRegion};
pub use config::{DeviceConfig, DEFAULT_RESET_GPIO};
pub use engine::{DmaEngine, EngineParts, DEFAULT_CHANNEL_TIMEOUT};
pub use error::{DmaError, Result};
pub use gpio::{open_reset_line, Direction, GpioLine, NullGpio, SysfsGpio};
pub use io::InterruptHandle;
pub use mmio::RegisterWindow;
pub use queue::{LayerStats, StreamingQueue, IDLE_INTERVAL};
pub use sync::{select_sync, InterruptSync, PollSync, SyncMode, SyncStrategy};
pub use windows::{Half, PingPong, WordWindow};
pub use zs_chip::regs::Channel;
pub use zs_chip::wire::OperatingMode;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Channel, DeviceConfig, DmaEngine, DmaError, LoopbackDevice, OperatingMode, PollSync,
        Result, StreamingQueue, SyncMode, SyncStrategy,
    };
}
