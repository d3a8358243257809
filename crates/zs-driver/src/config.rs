//! Device location and engine tuning
//!
//! Defaults describe the reference board. Every field has a `with_*`
//! builder, and [`DeviceConfig::from_env`] applies the `ZS_*` overrides:
//!
//! | Variable | Field | Format |
//! |---|---|---|
//! | `ZS_DMA_REGS_ADDR` | `register_addr` | hex (`0x…`) or decimal |
//! | `ZS_DMA_SRC_ADDR` | `source_addr` | hex or decimal |
//! | `ZS_DMA_DST_ADDR` | `destination_addr` | hex or decimal |
//! | `ZS_DMA_TIMEOUT_US` | `timeout` | decimal microseconds |
//! | `ZS_DMA_SYNC` | `sync` | `poll` or `interrupt` |
//! | `ZS_GPIO` | `gpio` | sysfs line number or `none` |

use crate::engine::DEFAULT_CHANNEL_TIMEOUT;
use crate::error::{DmaError, Result};
use crate::sync::SyncMode;
use std::path::PathBuf;
use std::time::Duration;
use zs_chip::layout::{
    DEFAULT_BURST_WORDS, DEFAULT_DESTINATION_BASE, DEFAULT_REGISTER_BASE, DEFAULT_SOURCE_BASE,
    READ_WINDOW_BYTES, REGISTER_BLOCK_BYTES, WRITE_WINDOW_BYTES,
};

/// Sysfs GPIO line wired to the controller reset
pub const DEFAULT_RESET_GPIO: u32 = 960;

/// Where the DMA block lives and how to drive it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Physical memory device
    pub mem_path: PathBuf,
    /// Physical address of the register block
    pub register_addr: u32,
    /// Bytes mapped for the register block
    pub register_bytes: usize,
    /// Physical address of the MM2S source region
    pub source_addr: u32,
    /// Bytes mapped for the source region
    pub source_bytes: usize,
    /// Physical address of the S2MM destination region
    pub destination_addr: u32,
    /// Bytes mapped for the destination region
    pub destination_bytes: usize,
    /// UIO device of the MM2S interrupt
    pub mm2s_uio: PathBuf,
    /// UIO device of the S2MM interrupt
    pub s2mm_uio: PathBuf,
    /// Completion strategy
    pub sync: SyncMode,
    /// Per-call wait limit
    pub timeout: Duration,
    /// Data words per split burst
    pub burst_words: usize,
    /// Reset GPIO line, `None` when the reset is not wired
    pub gpio: Option<u32>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mem_path: PathBuf::from("/dev/mem"),
            register_addr: DEFAULT_REGISTER_BASE,
            register_bytes: REGISTER_BLOCK_BYTES,
            source_addr: DEFAULT_SOURCE_BASE,
            source_bytes: WRITE_WINDOW_BYTES,
            destination_addr: DEFAULT_DESTINATION_BASE,
            destination_bytes: READ_WINDOW_BYTES,
            mm2s_uio: PathBuf::from("/dev/uio0"),
            s2mm_uio: PathBuf::from("/dev/uio1"),
            sync: SyncMode::Poll,
            timeout: DEFAULT_CHANNEL_TIMEOUT,
            burst_words: DEFAULT_BURST_WORDS,
            gpio: Some(DEFAULT_RESET_GPIO),
        }
    }
}

impl DeviceConfig {
    /// Defaults with the `ZS_*` environment overrides applied
    ///
    /// # Errors
    ///
    /// Returns `Configuration` naming the variable that failed to parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with overrides taken from `lookup`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` naming the variable that failed to parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = lookup("ZS_DMA_REGS_ADDR") {
            config.register_addr = parse_addr("ZS_DMA_REGS_ADDR", &value)?;
        }
        if let Some(value) = lookup("ZS_DMA_SRC_ADDR") {
            config.source_addr = parse_addr("ZS_DMA_SRC_ADDR", &value)?;
        }
        if let Some(value) = lookup("ZS_DMA_DST_ADDR") {
            config.destination_addr = parse_addr("ZS_DMA_DST_ADDR", &value)?;
        }
        if let Some(value) = lookup("ZS_DMA_TIMEOUT_US") {
            let micros = value.trim().parse::<u64>().map_err(|e| {
                DmaError::configuration(format!("ZS_DMA_TIMEOUT_US={value}: {e}"))
            })?;
            config.timeout = Duration::from_micros(micros);
        }
        if let Some(value) = lookup("ZS_DMA_SYNC") {
            config.sync = value.parse()?;
        }
        if let Some(value) = lookup("ZS_GPIO") {
            config.gpio = parse_gpio(&value)?;
        }
        tracing::debug!(?config, "device configuration");
        Ok(config)
    }

    /// Use another physical memory device
    #[must_use]
    pub fn with_mem_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mem_path = path.into();
        self
    }

    /// Relocate the register block
    #[must_use]
    pub const fn with_register_addr(mut self, addr: u32) -> Self {
        self.register_addr = addr;
        self
    }

    /// Relocate the MM2S source region
    #[must_use]
    pub const fn with_source_addr(mut self, addr: u32) -> Self {
        self.source_addr = addr;
        self
    }

    /// Relocate the S2MM destination region
    #[must_use]
    pub const fn with_destination_addr(mut self, addr: u32) -> Self {
        self.destination_addr = addr;
        self
    }

    /// Override all three mapping sizes
    #[must_use]
    pub const fn with_window_sizes(
        mut self,
        register_bytes: usize,
        source_bytes: usize,
        destination_bytes: usize,
    ) -> Self {
        self.register_bytes = register_bytes;
        self.source_bytes = source_bytes;
        self.destination_bytes = destination_bytes;
        self
    }

    /// Use other UIO devices for the channel interrupts
    #[must_use]
    pub fn with_uio(mut self, mm2s: impl Into<PathBuf>, s2mm: impl Into<PathBuf>) -> Self {
        self.mm2s_uio = mm2s.into();
        self.s2mm_uio = s2mm.into();
        self
    }

    /// Select the completion strategy
    #[must_use]
    pub const fn with_sync(mut self, sync: SyncMode) -> Self {
        self.sync = sync;
        self
    }

    /// Set the per-call wait limit
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the data words per split burst
    #[must_use]
    pub const fn with_burst_words(mut self, burst_words: usize) -> Self {
        self.burst_words = burst_words;
        self
    }

    /// Set (or clear) the reset GPIO line
    #[must_use]
    pub const fn with_gpio(mut self, gpio: Option<u32>) -> Self {
        self.gpio = gpio;
        self
    }
}

fn parse_addr(key: &str, value: &str) -> Result<u32> {
    let value = value.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => value.parse::<u32>(),
    };
    parsed.map_err(|e| DmaError::configuration(format!("{key}={value}: {e}")))
}

fn parse_gpio(value: &str) -> Result<Option<u32>> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    value
        .parse::<u32>()
        .map(Some)
        .map_err(|e| DmaError::configuration(format!("ZS_GPIO={value}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_board_layout() {
        let config = DeviceConfig::default();
        assert_eq!(config.register_addr, 0x4040_0000);
        assert_eq!(config.source_addr, 0x0E00_0000);
        assert_eq!(config.destination_addr, 0x0F00_0000);
        assert_eq!(config.register_bytes, 65_535);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.sync, SyncMode::Poll);
        assert_eq!(config.gpio, Some(960));
    }

    #[test]
    fn environment_overrides_apply() {
        let config = DeviceConfig::from_lookup(lookup(&[
            ("ZS_DMA_REGS_ADDR", "0x4100_0000"),
            ("ZS_DMA_SRC_ADDR", "268435456"),
            ("ZS_DMA_TIMEOUT_US", "250"),
            ("ZS_DMA_SYNC", "interrupt"),
            ("ZS_GPIO", "none"),
        ]))
        .unwrap();
        assert_eq!(config.register_addr, 0x4100_0000);
        assert_eq!(config.source_addr, 0x1000_0000);
        assert_eq!(config.destination_addr, DEFAULT_DESTINATION_BASE);
        assert_eq!(config.timeout, Duration::from_micros(250));
        assert_eq!(config.sync, SyncMode::Interrupt);
        assert_eq!(config.gpio, None);
    }

    #[test]
    fn bad_override_names_the_variable() {
        let err = DeviceConfig::from_lookup(lookup(&[("ZS_DMA_DST_ADDR", "0xZZ")])).unwrap_err();
        assert!(err.to_string().contains("ZS_DMA_DST_ADDR"));
    }

    #[test]
    fn builders_chain() {
        let config = DeviceConfig::default()
            .with_mem_path("/tmp/mem")
            .with_burst_words(16)
            .with_gpio(Some(12))
            .with_timeout(Duration::from_millis(1));
        assert_eq!(config.mem_path, PathBuf::from("/tmp/mem"));
        assert_eq!(config.burst_words, 16);
        assert_eq!(config.gpio, Some(12));
        assert_eq!(config.timeout, Duration::from_millis(1));
    }
}
