//! Transfer completion strategies
//!
//! ```text
//! PollSync       spin on DMASR until IDLE and IOC_IRQ are both set
//! InterruptSync  block in poll(2) on the channel's UIO device
//! ```
//!
//! Either way the caller sees `Ok(())` after the burst has been acknowledged
//! (status flags cleared), or `ChannelTimeout` once the timeout has passed.

use crate::error::{DmaError, Result};
use crate::io::InterruptHandle;
use crate::mmio::{clear_transfer_flags, transfer_done, RegisterWindow};
use std::fmt::Debug;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};
use zs_chip::regs::{control, Channel};

/// How the engine learns that a burst finished
pub trait SyncStrategy: Send + Sync + Debug {
    /// Block until `channel` completes its current burst
    ///
    /// # Errors
    ///
    /// Returns `ChannelTimeout` if the burst does not finish within
    /// `timeout`, or an I/O error from the interrupt device.
    fn wait(&self, channel: Channel, regs: &dyn RegisterWindow, timeout: Duration) -> Result<()>;

    /// Control word that starts a channel in the matching run mode
    fn run_control_word(&self) -> u32;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Busy-poll the status register
#[derive(Debug, Default, Clone, Copy)]
pub struct PollSync;

impl SyncStrategy for PollSync {
    fn wait(&self, channel: Channel, regs: &dyn RegisterWindow, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            if transfer_done(regs, channel) {
                clear_transfer_flags(regs, channel);
                tracing::trace!("{channel} done after {:?}", start.elapsed());
                return Ok(());
            }
            if start.elapsed() >= timeout {
                tracing::warn!("{channel} poll timed out after {timeout:?}");
                return Err(DmaError::channel_timeout(channel, timeout));
            }
            std::hint::spin_loop();
        }
    }

    fn run_control_word(&self) -> u32 {
        control::RUN_NO_IRQ
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}

/// Wait on per-channel UIO interrupt devices
#[derive(Debug)]
pub struct InterruptSync {
    mm2s: InterruptHandle,
    s2mm: InterruptHandle,
}

impl InterruptSync {
    /// Build from already-open handles
    #[must_use]
    pub const fn new(mm2s: InterruptHandle, s2mm: InterruptHandle) -> Self {
        Self { mm2s, s2mm }
    }

    /// Open the MM2S and S2MM UIO devices
    ///
    /// # Errors
    ///
    /// Returns an error if either device cannot be opened.
    pub fn open(mm2s: impl AsRef<Path>, s2mm: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(InterruptHandle::open(mm2s)?, InterruptHandle::open(s2mm)?))
    }

    const fn handle(&self, channel: Channel) -> &InterruptHandle {
        match channel {
            Channel::Mm2s => &self.mm2s,
            Channel::S2mm => &self.s2mm,
        }
    }
}

impl SyncStrategy for InterruptSync {
    fn wait(&self, channel: Channel, regs: &dyn RegisterWindow, timeout: Duration) -> Result<()> {
        let handle = self.handle(channel);
        let deadline = Instant::now() + timeout;
        // The handle is polled at least once, so a pending interrupt wins
        // over an already expired deadline.
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if handle.wait_readable(remaining)? {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!("{channel} interrupt timed out after {timeout:?}");
                return Err(DmaError::channel_timeout(channel, timeout));
            }
        }
        let count = handle.read_ack()?;
        clear_transfer_flags(regs, channel);
        handle.rearm()?;
        tracing::trace!("{channel} interrupt #{count}");
        Ok(())
    }

    fn run_control_word(&self) -> u32 {
        control::RUN_IRQ
    }

    fn name(&self) -> &'static str {
        "interrupt"
    }
}

/// Strategy selector used by configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// [`PollSync`]
    #[default]
    Poll,
    /// [`InterruptSync`]
    Interrupt,
}

impl FromStr for SyncMode {
    type Err = DmaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" | "polling" => Ok(Self::Poll),
            "interrupt" | "irq" => Ok(Self::Interrupt),
            other => Err(DmaError::configuration(format!(
                "unknown sync mode '{other}' (expected poll or interrupt)"
            ))),
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poll => write!(f, "poll"),
            Self::Interrupt => write!(f, "interrupt"),
        }
    }
}

/// Build the strategy for `mode`
///
/// The UIO paths are only opened for [`SyncMode::Interrupt`].
///
/// # Errors
///
/// Returns an error if an interrupt device cannot be opened.
pub fn select_sync(
    mode: SyncMode,
    mm2s_uio: &Path,
    s2mm_uio: &Path,
) -> Result<Box<dyn SyncStrategy>> {
    match mode {
        SyncMode::Poll => Ok(Box::new(PollSync)),
        SyncMode::Interrupt => Ok(Box::new(InterruptSync::open(mm2s_uio, s2mm_uio)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::sync::Mutex;
    use zs_chip::regs::{status, MM2S_STATUS, S2MM_STATUS};

    #[derive(Debug, Default)]
    struct StatusRegs {
        status: Mutex<u32>,
        writes: Mutex<Vec<(usize, u32)>>,
    }

    impl RegisterWindow for StatusRegs {
        fn read32(&self, _offset: usize) -> u32 {
            *self.status.lock().unwrap()
        }

        fn write32(&self, offset: usize, value: u32) {
            self.writes.lock().unwrap().push((offset, value));
        }
    }

    #[test]
    fn poll_returns_once_done_and_clears() {
        let regs = StatusRegs::default();
        *regs.status.lock().unwrap() = status::IDLE | status::IOC_IRQ;
        PollSync
            .wait(Channel::Mm2s, &regs, Duration::from_millis(10))
            .unwrap();
        assert_eq!(
            *regs.writes.lock().unwrap(),
            vec![(MM2S_STATUS, status::IDLE), (MM2S_STATUS, status::IOC_IRQ)]
        );
    }

    #[test]
    fn poll_times_out_without_clearing() {
        let regs = StatusRegs::default();
        *regs.status.lock().unwrap() = status::IDLE;
        let timeout = Duration::from_millis(5);
        let start = Instant::now();
        let err = PollSync.wait(Channel::S2mm, &regs, timeout).unwrap_err();
        assert!(start.elapsed() >= timeout);
        assert!(matches!(
            err,
            DmaError::ChannelTimeout { channel: Channel::S2mm, .. }
        ));
        assert!(regs.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn interrupt_acks_clears_and_rearms() {
        let (mm2s, _mm2s_peer) = UnixStream::pair().unwrap();
        let (s2mm, mut s2mm_peer) = UnixStream::pair().unwrap();
        let sync = InterruptSync::new(mm2s.into(), s2mm.into());
        let regs = StatusRegs::default();

        s2mm_peer.write_all(&1_u32.to_ne_bytes()).unwrap();
        sync.wait(Channel::S2mm, &regs, Duration::from_millis(100))
            .unwrap();

        assert_eq!(
            *regs.writes.lock().unwrap(),
            vec![(S2MM_STATUS, status::IDLE), (S2MM_STATUS, status::IOC_IRQ)]
        );
        let mut rearm = [0_u8; 4];
        s2mm_peer.read_exact(&mut rearm).unwrap();
        assert_eq!(u32::from_ne_bytes(rearm), 1);
    }

    #[test]
    fn interrupt_timeout_names_channel() {
        let (mm2s, _mm2s_peer) = UnixStream::pair().unwrap();
        let (s2mm, _s2mm_peer) = UnixStream::pair().unwrap();
        let sync = InterruptSync::new(mm2s.into(), s2mm.into());
        let regs = StatusRegs::default();

        let err = sync
            .wait(Channel::Mm2s, &regs, Duration::from_millis(3))
            .unwrap_err();
        assert!(matches!(
            err,
            DmaError::ChannelTimeout { channel: Channel::Mm2s, .. }
        ));
        assert!(regs.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_timeout_accepts_finished_burst_in_both_modes() {
        let regs = StatusRegs::default();
        *regs.status.lock().unwrap() = status::IDLE | status::IOC_IRQ;
        PollSync
            .wait(Channel::Mm2s, &regs, Duration::ZERO)
            .unwrap();

        let (mm2s, mut mm2s_peer) = UnixStream::pair().unwrap();
        let (s2mm, _s2mm_peer) = UnixStream::pair().unwrap();
        let sync = InterruptSync::new(mm2s.into(), s2mm.into());
        mm2s_peer.write_all(&1_u32.to_ne_bytes()).unwrap();
        sync.wait(Channel::Mm2s, &regs, Duration::ZERO).unwrap();

        let err = sync
            .wait(Channel::Mm2s, &regs, Duration::ZERO)
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn run_words_match_irq_mode() {
        assert_eq!(PollSync.run_control_word(), control::RUN_NO_IRQ);
        let (a, _) = UnixStream::pair().unwrap();
        let (b, _) = UnixStream::pair().unwrap();
        assert_eq!(
            InterruptSync::new(a.into(), b.into()).run_control_word(),
            control::RUN_IRQ
        );
    }

    #[test]
    fn sync_mode_parses() {
        assert_eq!("poll".parse::<SyncMode>().unwrap(), SyncMode::Poll);
        assert_eq!("Interrupt".parse::<SyncMode>().unwrap(), SyncMode::Interrupt);
        assert!("spin".parse::<SyncMode>().is_err());
    }
}
