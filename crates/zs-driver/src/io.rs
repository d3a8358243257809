//! UIO interrupt handles
//!
//! The kernel exposes each DMA channel interrupt as a UIO device
//! (`/dev/uio0` for MM2S, `/dev/uio1` for S2MM). The file becomes readable
//! when the interrupt fires; reading returns a 4-byte event count and
//! writing the 4-byte word `1` re-enables the interrupt.

use crate::error::{DmaError, Result};
use rustix::event::{poll, PollFd, PollFlags};
use rustix::io::Errno;
use std::fs::OpenOptions;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

/// Word written back to the UIO device to re-enable the interrupt
const REARM_WORD: u32 = 1;

/// Owned interrupt file descriptor
#[derive(Debug)]
pub struct InterruptHandle {
    fd: OwnedFd,
}

impl InterruptHandle {
    /// Open a UIO device read/write
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the device cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DmaError::device_map(path, format!("cannot open interrupt device: {e}")))?;
        tracing::debug!("Opened interrupt device {}", path.display());
        Ok(Self { fd: file.into() })
    }

    /// Wrap an already-open descriptor
    #[must_use]
    pub const fn from_fd(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Block until the handle is readable or `timeout` elapses
    ///
    /// The timeout is rounded up to whole milliseconds so the call never
    /// returns early. Returns `Ok(false)` on timeout or when the wait was
    /// interrupted by a signal; callers recompute their deadline and retry.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if poll fails or the descriptor reports an error.
    pub fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        let millis = i32::try_from(timeout.as_micros().div_ceil(1000)).unwrap_or(i32::MAX);
        let mut fds = [PollFd::new(&self.fd, PollFlags::IN)];
        match poll(&mut fds, millis) {
            Ok(0) | Err(Errno::INTR) => Ok(false),
            Ok(_) => {
                let revents = fds[0].revents();
                if revents.intersects(PollFlags::ERR | PollFlags::NVAL) {
                    return Err(DmaError::Io {
                        source: std::io::Error::other(format!(
                            "interrupt descriptor reported {revents:?}"
                        )),
                    });
                }
                Ok(revents.intersects(PollFlags::IN | PollFlags::HUP))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Consume one acknowledgement (the 4-byte interrupt count)
    ///
    /// # Errors
    ///
    /// Returns an I/O error on a failed or short read.
    pub fn read_ack(&self) -> Result<u32> {
        let mut buf = [0_u8; 4];
        let n = retry_on_intr(|| rustix::io::read(&self.fd, &mut buf))?;
        if n != buf.len() {
            return Err(short_transfer("read", n));
        }
        Ok(u32::from_ne_bytes(buf))
    }

    /// Re-enable the interrupt
    ///
    /// # Errors
    ///
    /// Returns an I/O error on a failed or short write.
    pub fn rearm(&self) -> Result<()> {
        let word = REARM_WORD.to_ne_bytes();
        let n = retry_on_intr(|| rustix::io::write(&self.fd, &word))?;
        if n != word.len() {
            return Err(short_transfer("write", n));
        }
        Ok(())
    }
}

impl From<OwnedFd> for InterruptHandle {
    fn from(fd: OwnedFd) -> Self {
        Self::from_fd(fd)
    }
}

impl From<UnixStream> for InterruptHandle {
    fn from(stream: UnixStream) -> Self {
        Self::from_fd(stream.into())
    }
}

fn retry_on_intr(mut op: impl FnMut() -> rustix::io::Result<usize>) -> Result<usize> {
    loop {
        match op() {
            Err(Errno::INTR) => continue,
            other => return other.map_err(DmaError::from),
        }
    }
}

fn short_transfer(what: &str, n: usize) -> DmaError {
    DmaError::Io {
        source: std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("short interrupt {what}: {n} of 4 bytes"),
        ),
    }
}
