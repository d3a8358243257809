//! Physical memory windows mapped through `/dev/mem`
//!
//! One [`PhysRegion`] covers one contiguous physical range: the AXI DMA
//! register block, the MM2S source region, or the S2MM destination region.
//! The device file is opened `O_RDWR | O_SYNC` so the mapping is uncached.
//!
//! Unsafe code is confined to this module: the mmap itself, volatile
//! register access, and word copies in and out of the mapping.

use crate::error::{DmaError, Result};
use crate::mmio::RegisterWindow;
use crate::windows::{check_bounds, WordWindow};
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use zs_chip::wire::WORD_BYTES;

/// Memory-mapped physical range
pub struct PhysRegion {
    ptr: NonNull<u8>,
    size: usize,
    phys_addr: u64,
    path: PathBuf,
    _file: File,
}

impl std::fmt::Debug for PhysRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysRegion")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("size", &self.size)
            .field("phys_addr", &format_args!("{:#x}", self.phys_addr))
            .field("path", &self.path)
            .finish()
    }
}

impl PhysRegion {
    /// Map `size` bytes at physical address `phys_addr` of `path`
    ///
    /// `path` is normally `/dev/mem`; any file large enough to cover the
    /// range works, which is how the mapping is exercised off-target.
    ///
    /// # Errors
    ///
    /// Returns `DeviceMap` if:
    /// - `size` is zero or `phys_addr` is not page aligned
    /// - The device file cannot be opened read/write
    /// - mmap fails
    pub fn map(path: impl AsRef<Path>, phys_addr: u64, size: usize) -> Result<Self> {
        let path = path.as_ref();
        if size == 0 {
            return Err(DmaError::device_map(path, "mapping size is 0"));
        }
        let page = rustix::param::page_size() as u64;
        if phys_addr % page != 0 {
            return Err(DmaError::device_map(
                path,
                format!("physical address {phys_addr:#x} is not aligned to the {page}-byte page"),
            ));
        }

        tracing::debug!("Mapping {size:#x} bytes at {phys_addr:#x} from {}", path.display());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlags::SYNC.bits() as i32)
            .open(path)
            .map_err(|e| DmaError::device_map(path, format!("cannot open: {e}")))?;

        // SAFETY: mmap is unsafe but every precondition is checked:
        // - file was just opened read/write and is kept alive in the struct
        // - size is non-zero and the offset is page aligned (checked above)
        // - READ|WRITE with SHARED is what device memory requires
        // - the mapping is only released in Drop
        let ptr = unsafe {
            let addr = mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                phys_addr,
            )
            .map_err(|e| DmaError::device_map(path, format!("mmap failed: {e}")))?;

            NonNull::new(addr.cast::<u8>())
                .ok_or_else(|| DmaError::device_map(path, "mmap returned a null pointer"))?
        };

        tracing::info!("Mapped {phys_addr:#x} ({size:#x} bytes) at {ptr:p}");

        Ok(Self {
            ptr,
            size,
            phys_addr,
            path: path.to_path_buf(),
            _file: file,
        })
    }
}

impl RegisterWindow for PhysRegion {
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the mapped size.
    fn read32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.size, "Register offset out of bounds");
        // SAFETY: read_volatile is required for MMIO, the hardware changes
        // the value. ptr comes from mmap and is valid for self.size bytes,
        // offset + 4 <= size was asserted and register offsets are 4-byte aligned.
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };
        tracing::trace!("Read u32 @ {offset:#x} = {value:#x}");
        value
    }

    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the mapped size.
    fn write32(&self, offset: usize, value: u32) {
        assert!(offset + 4 <= self.size, "Register offset out of bounds");
        tracing::trace!("Write u32 @ {offset:#x} = {value:#x}");
        // SAFETY: write_volatile is required for MMIO, writes trigger the
        // transfer. Same bounds and alignment argument as read32.
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value);
        }
    }
}

impl WordWindow for PhysRegion {
    fn len_words(&self) -> usize {
        self.size / WORD_BYTES
    }

    fn write_words(&mut self, at: usize, words: &[u64]) -> Result<()> {
        check_bounds(at, words.len(), self.len_words())?;
        let bytes: &[u8] = bytemuck::cast_slice(words);

        // SAFETY: the destination range [at*8, at*8 + bytes.len()) lies inside
        // the mapping (bounds checked above). Source is a live slice in
        // process memory and cannot overlap the device mapping. Byte copies
        // have no alignment requirement.
        unsafe {
            let dst = self.ptr.as_ptr().add(at * WORD_BYTES);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        }
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    fn read_words(&self, at: usize, out: &mut [u64]) -> Result<()> {
        check_bounds(at, out.len(), self.len_words())?;
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(out);

        // SAFETY: the source range lies inside the mapping (bounds checked
        // above); the destination is a live mutable slice that cannot alias
        // the mapping.
        unsafe {
            let src = self.ptr.as_ptr().add(at * WORD_BYTES);
            std::ptr::copy_nonoverlapping(src, bytes.as_mut_ptr(), bytes.len());
        }
        Ok(())
    }
}

impl Drop for PhysRegion {
    fn drop(&mut self) {
        tracing::debug!("Unmapping {:#x} ({:#x} bytes)", self.phys_addr, self.size);

        // SAFETY: ptr and size are exactly what mmap returned and was given
        // in map(); Drop runs once so there is no use after unmap.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: Send - PhysRegion owns its mapping exclusively; moving it to
// another thread does not invalidate process-wide mapped memory.
unsafe impl Send for PhysRegion {}

// SAFETY: Sync - shared access is limited to volatile 32-bit register
// reads/writes (serialized by the hardware) and bounds-checked word reads.
// Word writes require &mut self.
unsafe impl Sync for PhysRegion {}
