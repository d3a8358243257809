//! Reset line of the ZS controller
//!
//! Only the direction/value boundary is modelled. [`SysfsGpio`] drives a
//! line through the legacy `/sys/class/gpio` interface; [`NullGpio`] stands
//! in when the reset is not wired (simulator, bench setups).

use crate::error::{DmaError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Default sysfs GPIO root
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Line direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Input
    In,
    /// Output
    Out,
}

impl Direction {
    /// Sysfs spelling
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

/// A single GPIO output line
pub trait GpioLine: Send + std::fmt::Debug {
    /// Set the line direction
    ///
    /// # Errors
    ///
    /// Returns `Gpio` if the line cannot be configured.
    fn set_gpio_direction(&mut self, direction: Direction) -> Result<()>;

    /// Drive the line (non-zero is high)
    ///
    /// # Errors
    ///
    /// Returns `Gpio` if the value cannot be written.
    fn set_gpio_value(&mut self, value: u32) -> Result<()>;
}

/// GPIO line exported through sysfs
#[derive(Debug)]
pub struct SysfsGpio {
    line: u32,
    dir: PathBuf,
}

impl SysfsGpio {
    /// Open line `line` under [`SYSFS_GPIO_ROOT`], exporting it if needed
    ///
    /// # Errors
    ///
    /// Returns `Gpio` if the line is not exported and export fails.
    pub fn open(line: u32) -> Result<Self> {
        Self::open_at(SYSFS_GPIO_ROOT, line)
    }

    /// Open line `line` under an explicit sysfs root
    ///
    /// # Errors
    ///
    /// Returns `Gpio` if the line is not exported and export fails.
    pub fn open_at(root: impl AsRef<Path>, line: u32) -> Result<Self> {
        let root = root.as_ref();
        let dir = root.join(format!("gpio{line}"));
        if !dir.exists() {
            let export = root.join("export");
            fs::write(&export, line.to_string()).map_err(|e| {
                DmaError::gpio(format!("cannot export line {line} via {}: {e}", export.display()))
            })?;
            tracing::debug!("Exported GPIO {line}");
        }
        Ok(Self { line, dir })
    }

    /// Line number
    pub const fn line(&self) -> u32 {
        self.line
    }

    fn write_attr(&self, attr: &str, value: &str) -> Result<()> {
        let path = self.dir.join(attr);
        tracing::trace!("GPIO {}: {attr} = {value}", self.line);
        fs::write(&path, value)
            .map_err(|e| DmaError::gpio(format!("cannot write {}: {e}", path.display())))
    }
}

impl GpioLine for SysfsGpio {
    fn set_gpio_direction(&mut self, direction: Direction) -> Result<()> {
        self.write_attr("direction", direction.as_str())
    }

    fn set_gpio_value(&mut self, value: u32) -> Result<()> {
        self.write_attr("value", if value == 0 { "0" } else { "1" })
    }
}

/// Line that accepts every request and does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullGpio;

impl GpioLine for NullGpio {
    fn set_gpio_direction(&mut self, _direction: Direction) -> Result<()> {
        Ok(())
    }

    fn set_gpio_value(&mut self, _value: u32) -> Result<()> {
        Ok(())
    }
}

/// Open the configured reset line, or [`NullGpio`] when none is configured
///
/// # Errors
///
/// Returns `Gpio` if the sysfs line cannot be opened.
pub fn open_reset_line(line: Option<u32>) -> Result<Box<dyn GpioLine>> {
    match line {
        Some(line) => Ok(Box::new(SysfsGpio::open(line)?)),
        None => Ok(Box::new(NullGpio)),
    }
}
