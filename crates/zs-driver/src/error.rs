//! Error types for ZS DMA driver operations

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use zs_chip::regs::Channel;

/// Result type alias for DMA operations
pub type Result<T> = std::result::Result<T, DmaError>;

/// Errors that can occur while driving the AXI DMA engine
#[derive(Debug, Error)]
pub enum DmaError {
    /// Engine parameters out of the accepted range
    #[error("Configuration error: {reason}")]
    Configuration {
        /// Reason for rejection
        reason: String,
    },

    /// Hardware did not complete a burst within the channel timeout
    #[error("{channel} channel timeout after {}us", timeout.as_micros())]
    ChannelTimeout {
        /// Channel that was waited on
        channel: Channel,
        /// Configured timeout
        timeout: Duration,
    },

    /// Write payload does not fit one burst
    #[error("Transfer of {bytes} bytes rejected (must be 1..={max} bytes)")]
    TransferSize {
        /// Requested transfer size
        bytes: usize,
        /// Largest accepted size
        max: usize,
    },

    /// Access outside a mapped window
    #[error("Out of bounds access: offset={offset:#x}, len={len}, limit={limit:#x}")]
    OutOfBounds {
        /// Offset of the access (words or bytes, per window)
        offset: usize,
        /// Length of the access
        len: usize,
        /// Size of the window
        limit: usize,
    },

    /// Mapping a physical region failed
    #[error("Cannot map {path}: {reason}")]
    DeviceMap {
        /// Device file that was mapped
        path: PathBuf,
        /// Reason for failure
        reason: String,
    },

    /// Buffer could not be allocated for the queue
    #[error("Cannot allocate {words} words for the transfer queue")]
    Allocation {
        /// Requested size in words
        words: usize,
    },

    /// GPIO reset line could not be driven
    #[error("GPIO error: {reason}")]
    Gpio {
        /// Reason for failure
        reason: String,
    },

    /// Queue operation that needs a running worker
    #[error("Streaming queue is not running")]
    NotRunning,

    /// I/O error on a device file
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl DmaError {
    /// Create a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a channel timeout error
    pub const fn channel_timeout(channel: Channel, timeout: Duration) -> Self {
        Self::ChannelTimeout { channel, timeout }
    }

    /// Create a device mapping error
    pub fn device_map(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DeviceMap {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a GPIO error
    pub fn gpio(reason: impl Into<String>) -> Self {
        Self::Gpio {
            reason: reason.into(),
        }
    }

    /// Whether this is a channel timeout (on any channel)
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::ChannelTimeout { .. })
    }
}

impl From<rustix::io::Errno> for DmaError {
    fn from(errno: rustix::io::Errno) -> Self {
        Self::Io {
            source: errno.into(),
        }
    }
}
