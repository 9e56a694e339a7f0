//! Page-granular virtual memory: reserve a range once, then back it piecemeal.
//!
//! ```text
//!   base                                                         base + len
//!   ┌──────────────┬──────────────┬──────────────┬───────────────────────┐
//!   │  committed   │  committed   │   reserved   │       reserved        │
//!   │  (RW pages)  │  (RW pages)  │ (PROT_NONE)  │      (PROT_NONE)      │
//!   └──────────────┴──────────────┴──────────────┴───────────────────────┘
//!                                 ▲
//!                                 └── next commit extends from here
//! ```
//!
//! All ranges are expressed as byte offsets from the reservation base and are
//! widened to whole pages by the provider.

use std::{
  io,
  ptr::{self, NonNull},
};

use libc::c_void;
use log::{debug, warn};
use thiserror::Error;

use crate::{align::align_down, align_to};

#[derive(Debug, Error)]
pub enum VmemError {
  #[error("failed to reserve {bytes} bytes of address space")]
  Reserve {
    bytes: usize,
    #[source]
    source: io::Error,
  },

  #[error("range {offset:#x}+{bytes} lies outside the {reserved}-byte reservation")]
  Exhausted {
    offset: usize,
    bytes: usize,
    reserved: usize,
  },

  #[error("failed to commit {bytes} bytes at offset {offset:#x}")]
  Commit {
    offset: usize,
    bytes: usize,
    #[source]
    source: io::Error,
  },

  #[error("failed to decommit {bytes} bytes at offset {offset:#x}")]
  Decommit {
    offset: usize,
    bytes: usize,
    #[source]
    source: io::Error,
  },
}

/// The contract the heap needs from the operating system.
pub trait VirtualMemory: Sized {
  /// Reserves at least `bytes` of address space without backing it.
  fn reserve(bytes: usize) -> Result<Self, VmemError>;

  fn base(&self) -> NonNull<u8>;

  /// Reserved bytes, a multiple of [`page_size`](VirtualMemory::page_size).
  fn len(&self) -> usize;

  fn page_size(&self) -> usize;

  /// Backs every page touched by `offset..offset + bytes`. Fresh pages read as zero.
  fn commit(
    &mut self,
    offset: usize,
    bytes: usize,
  ) -> Result<(), VmemError>;

  /// Unbacks every page touched by `offset..offset + bytes`.
  fn decommit(
    &mut self,
    offset: usize,
    bytes: usize,
  ) -> Result<(), VmemError>;

  /// Gives the whole reservation back.
  fn release(self) {
    drop(self)
  }
}

/// Widens `offset..offset + bytes` to page boundaries, rejecting ranges past `reserved`.
pub(crate) fn page_span(
  offset: usize,
  bytes: usize,
  page_size: usize,
  reserved: usize,
) -> Result<(usize, usize), VmemError> {
  let end = offset
    .checked_add(bytes)
    .filter(|&end| end <= reserved)
    .ok_or(VmemError::Exhausted {
      offset,
      bytes,
      reserved,
    })?;

  Ok((align_down(offset, page_size), align_to!(end, page_size)))
}

/// Native page size, falling back to 4 KiB if `sysconf` cannot tell.
pub fn native_page_size() -> usize {
  let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

  if size <= 0 { 4096 } else { size as usize }
}

/// Anonymous `mmap` reservation, committed with `mprotect`.
pub struct MmapRegion {
  base: NonNull<u8>,
  len: usize,
  page_size: usize,
}

impl MmapRegion {
  unsafe fn protect(
    &self,
    start: usize,
    end: usize,
    prot: libc::c_int,
  ) -> io::Result<()> {
    let addr = unsafe { self.base.as_ptr().add(start) } as *mut c_void;

    if unsafe { libc::mprotect(addr, end - start, prot) } != 0 {
      return Err(io::Error::last_os_error());
    }

    Ok(())
  }
}

impl VirtualMemory for MmapRegion {
  fn reserve(bytes: usize) -> Result<Self, VmemError> {
    let page_size = native_page_size();

    let len = bytes
      .checked_add(page_size - 1)
      .map(|v| v & !(page_size - 1))
      .filter(|&len| len > 0)
      .ok_or_else(|| VmemError::Reserve {
        bytes,
        source: io::Error::from(io::ErrorKind::InvalidInput),
      })?;

    let address = unsafe {
      libc::mmap(
        ptr::null_mut(),
        len,
        libc::PROT_NONE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
        -1,
        0,
      )
    };

    if address == libc::MAP_FAILED {
      return Err(VmemError::Reserve {
        bytes,
        source: io::Error::last_os_error(),
      });
    }

    let base = NonNull::new(address as *mut u8).ok_or_else(|| VmemError::Reserve {
      bytes,
      source: io::Error::from(io::ErrorKind::AddrNotAvailable),
    })?;

    debug!("reserved {} bytes at {:p} (page size {})", len, base, page_size);

    Ok(Self {
      base,
      len,
      page_size,
    })
  }

  fn base(&self) -> NonNull<u8> {
    self.base
  }

  fn len(&self) -> usize {
    self.len
  }

  fn page_size(&self) -> usize {
    self.page_size
  }

  fn commit(
    &mut self,
    offset: usize,
    bytes: usize,
  ) -> Result<(), VmemError> {
    let (start, end) = page_span(offset, bytes, self.page_size, self.len)?;

    if start == end {
      return Ok(());
    }

    unsafe { self.protect(start, end, libc::PROT_READ | libc::PROT_WRITE) }.map_err(|source| {
      VmemError::Commit {
        offset,
        bytes,
        source,
      }
    })
  }

  fn decommit(
    &mut self,
    offset: usize,
    bytes: usize,
  ) -> Result<(), VmemError> {
    let (start, end) = page_span(offset, bytes, self.page_size, self.len)?;

    if start == end {
      return Ok(());
    }

    let error = |source| VmemError::Decommit {
      offset,
      bytes,
      source,
    };

    let addr = unsafe { self.base.as_ptr().add(start) } as *mut c_void;

    if unsafe { libc::madvise(addr, end - start, libc::MADV_DONTNEED) } != 0 {
      return Err(error(io::Error::last_os_error()));
    }

    unsafe { self.protect(start, end, libc::PROT_NONE) }.map_err(error)
  }
}

impl Drop for MmapRegion {
  fn drop(&mut self) {
    if unsafe { libc::munmap(self.base.as_ptr() as *mut c_void, self.len) } != 0 {
      warn!(
        "munmap of {} bytes at {:p} failed: {}",
        self.len,
        self.base,
        io::Error::last_os_error()
      );
    } else {
      debug!("released {} bytes at {:p}", self.len, self.base);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_reserve_rounds_to_pages() {
    let region = MmapRegion::reserve(1).unwrap();

    assert!(region.page_size().is_power_of_two());
    assert_eq!(region.len(), region.page_size());
    assert_eq!(region.base().as_ptr() as usize % region.page_size(), 0);
  }

  #[test]
  fn test_commit_backs_whole_page() {
    let mut region = MmapRegion::reserve(4 * native_page_size()).unwrap();
    let page_size = region.page_size();

    region.commit(0, 32).unwrap();

    unsafe {
      let bytes = region.base().as_ptr();
      assert_eq!(*bytes, 0);

      *bytes = 1;
      // The rest of the page is backed even though only 32 bytes were asked for.
      *bytes.add(page_size - 1) = 1;

      assert_eq!(*bytes, 1);
    }
  }

  #[test]
  fn test_decommit_then_commit_reads_zero() {
    let mut region = MmapRegion::reserve(2 * native_page_size()).unwrap();
    let page_size = region.page_size();

    region.commit(0, page_size).unwrap();
    unsafe { region.base().as_ptr().write(0xAB) };

    region.decommit(0, page_size).unwrap();
    region.commit(0, page_size).unwrap();

    assert_eq!(unsafe { region.base().as_ptr().read() }, 0);
  }

  #[test]
  fn test_commit_past_reservation_is_exhausted() {
    let mut region = MmapRegion::reserve(native_page_size()).unwrap();
    let len = region.len();

    let error = region.commit(len - 8, 16).unwrap_err();
    assert!(matches!(error, VmemError::Exhausted { .. }));

    let error = region.commit(usize::MAX, 16).unwrap_err();
    assert!(matches!(error, VmemError::Exhausted { .. }));
  }

  #[test]
  fn test_page_span_widens_range() {
    assert_eq!(page_span(10, 20, 4096, 8192).unwrap(), (0, 4096));
    assert_eq!(page_span(4090, 20, 4096, 8192).unwrap(), (0, 8192));
    assert_eq!(page_span(4096, 0, 4096, 8192).unwrap(), (4096, 4096));
    assert!(page_span(8000, 200, 4096, 8192).is_err());
  }

  #[test]
  fn test_release_consumes_region() {
    let region = MmapRegion::reserve(native_page_size()).unwrap();
    region.release();
  }
}
