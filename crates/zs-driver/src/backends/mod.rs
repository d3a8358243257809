//! Device backends
//!
//! - **mmap**: `/dev/mem` mappings of the register block and both transfer
//!   regions (the real board)
//! - **loopback**: simulated DMA block echoing every data word back
//!   (CI, CLI `--sim`)

pub mod loopback;
pub mod mmap;

pub use loopback::LoopbackDevice;
pub use mmap::PhysRegion;
