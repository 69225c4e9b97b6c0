//! Physical memory reads through a `/dev/mem` page mapping

use std::fs::OpenOptions;
use std::num::NonZeroUsize;
use std::os::unix::fs::OpenOptionsExt;

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

use crate::error::{HwtelemError, Result};

const DEV_MEM: &str = "/dev/mem";

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

/// Page-aligned base, offset within the page and mapping length covering
/// `len` bytes at `address`
pub fn page_span(address: u64, len: usize, page: usize) -> (u64, usize, usize) {
    let base = address & !(page as u64 - 1);
    let offset = (address - base) as usize;
    let length = (offset + len).div_ceil(page) * page;
    (base, offset, length)
}

/// Copy `buf.len()` bytes from physical `address`
pub fn read(address: u64, buf: &mut [u8]) -> Result<()> {
    let (base, offset, length) = page_span(address, buf.len(), page_size());
    let length = NonZeroUsize::new(length)
        .ok_or_else(|| HwtelemError::PhysicalMemoryError("Empty read".to_string()))?;
    let file_offset = libc::off_t::try_from(base).map_err(|_| {
        HwtelemError::PhysicalMemoryError(format!("{address:#x} is out of range"))
    })?;

    let file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_SYNC)
        .open(DEV_MEM)
        .map_err(|e| HwtelemError::PhysicalMemoryError(format!("Failed to open {DEV_MEM}: {e}")))?;

    // SAFETY: a fresh shared read-only mapping of /dev/mem, unmapped below
    // before anything else can observe it
    let mapping = unsafe {
        mmap(
            None,
            length,
            ProtFlags::PROT_READ,
            MapFlags::MAP_SHARED,
            Some(&file),
            file_offset,
        )
    }
    .map_err(|e| HwtelemError::PhysicalMemoryError(format!("Failed to map {base:#x}: {e}")))?;

    // SAFETY: offset + buf.len() <= length; volatile reads because the
    // region is device memory
    unsafe {
        let src = (mapping as *const u8).add(offset);
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = std::ptr::read_volatile(src.add(i));
        }
        munmap(mapping, length.get())?;
    }

    tracing::trace!("Physical read of {} bytes at {address:#x}", buf.len());
    Ok(())
}
