use std::{
  mem,
  ptr::{self, NonNull},
};

use log::{debug, trace, warn};

use crate::{
  align,
  align::checked_align,
  align_to,
  block::{Block, HEADER_SIZE, storage_offset},
  config::HeapConfig,
  error::{HeapError, HeapResult},
  vmem::{MmapRegion, VirtualMemory},
};

/// Bookkeeping stored at offset 0 of the arena. Block offsets of 0 mean "no block".
#[repr(C)]
struct HeapHeader {
  page_size: usize,
  first_block: usize,
  last_block: usize,
  committed: usize,
}

pub(crate) const HEAP_HEADER_SIZE: usize = align!(mem::size_of::<HeapHeader>());

const NO_BLOCK: usize = 0;

/// A growable arena of variable-size blocks.
///
/// Blocks are laid out back to back after the heap header, each one a
/// [`Block`] header followed by its storage. The heap is not thread-safe;
/// callers needing shared access wrap it in their own lock.
pub struct Heap<V: VirtualMemory = MmapRegion> {
  region: V,
}

impl Heap<MmapRegion> {
  /// Creates a heap over the default `mmap` reservation.
  pub fn create() -> HeapResult<Self> {
    Self::with_config(HeapConfig::default())
  }

  pub fn with_config(config: HeapConfig) -> HeapResult<Self> {
    Self::create_with(config)
  }
}

impl<V: VirtualMemory> Heap<V> {
  /// Reserves the arena through `V` and commits the page holding the heap header.
  pub fn create_with(config: HeapConfig) -> HeapResult<Self> {
    let mut region = V::reserve(config.reserve.max(HEAP_HEADER_SIZE))?;

    region.commit(0, HEAP_HEADER_SIZE)?;

    let page_size = region.page_size();
    let header = HeapHeader {
      page_size,
      first_block: NO_BLOCK,
      last_block: NO_BLOCK,
      committed: align_to!(HEAP_HEADER_SIZE, page_size),
    };

    unsafe { ptr::write(region.base().as_ptr() as *mut HeapHeader, header) };

    debug!(
      "created heap at {:p} (reserved {} bytes, page size {})",
      region.base(),
      region.len(),
      page_size
    );

    Ok(Self { region })
  }

  /// Releases the whole arena. Every pointer handed out becomes dangling.
  pub fn destroy(self) {
    let Heap { region } = self;
    region.release();
  }

  pub fn page_size(&self) -> usize {
    self.header().page_size
  }

  /// Bytes of the arena currently backed by committed pages.
  pub fn committed(&self) -> usize {
    self.header().committed
  }

  /// Bytes of address space reserved for the arena.
  pub fn reserved(&self) -> usize {
    self.region.len()
  }

  /// Allocates at least `bytes` bytes, rounded up to 8.
  pub fn alloc(
    &mut self,
    bytes: usize,
  ) -> HeapResult<NonNull<u8>> {
    let size = checked_align(bytes).ok_or(HeapError::SizeOverflow(bytes))?;

    let offset = match self.find_free_block(size)? {
      Some(offset) => offset,
      None => self.alloc_last_block(size)?,
    };

    self.block_mut(offset).freed = false;

    trace!("alloc {} bytes -> block at {:#x}", size, offset);

    Ok(self.storage(offset))
  }

  /// Like [`alloc`](Heap::alloc), with the whole block storage zeroed.
  pub fn calloc(
    &mut self,
    bytes: usize,
  ) -> HeapResult<NonNull<u8>> {
    let ptr = self.alloc(bytes)?;
    let size = self.block(self.offset_of(ptr) - HEADER_SIZE).size;

    unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };

    Ok(ptr)
  }

  /// Resizes the allocation at `ptr`, moving it if it cannot grow in place.
  ///
  /// A null `ptr` allocates; a zero `bytes` frees and returns `None`. On
  /// error the original allocation is left untouched.
  pub fn realloc(
    &mut self,
    ptr: *mut u8,
    bytes: usize,
  ) -> HeapResult<Option<NonNull<u8>>> {
    let Some(ptr) = NonNull::new(ptr) else {
      return self.alloc(bytes).map(Some);
    };

    let offset = self.live_block(ptr)?;

    if bytes == 0 {
      self.release_block(offset);
      return Ok(None);
    }

    let size = checked_align(bytes).ok_or(HeapError::SizeOverflow(bytes))?;
    let original = self.block(offset).size;

    if size == original {
      return Ok(Some(ptr));
    }

    if size < original {
      self.shrink_block(offset, size);
      return Ok(Some(ptr));
    }

    if self.grow_in_place(offset, size)? {
      trace!("realloc grew block at {:#x} in place to {} bytes", offset, size);
      return Ok(Some(ptr));
    }

    // The old block stays live until its bytes are copied so the new one cannot overlap it.
    let moved = self.alloc(size)?;
    unsafe { ptr::copy_nonoverlapping(ptr.as_ptr(), moved.as_ptr(), original) };
    self.release_block(offset);

    trace!("realloc moved block at {:#x} to {:p}", offset, moved);

    Ok(Some(moved))
  }

  /// Returns the block at `ptr` to the heap. Null is ignored.
  pub fn free(
    &mut self,
    ptr: *mut u8,
  ) -> HeapResult<()> {
    let Some(ptr) = NonNull::new(ptr) else {
      return Ok(());
    };

    let offset = self.live_block(ptr)?;
    self.release_block(offset);

    Ok(())
  }

  /// First block able to hold `size` bytes, already split down to size when worthwhile.
  fn find_free_block(
    &mut self,
    size: usize,
  ) -> HeapResult<Option<usize>> {
    let mut current = self.first();

    while let Some(offset) = current {
      let block = self.block(offset);
      let (block_size, freed) = (block.size, block.freed);

      if freed {
        if block_size == size {
          return Ok(Some(offset));
        }

        if block_size
          .checked_sub(HEADER_SIZE)
          .is_some_and(|room| room > size)
        {
          self.split_block(offset, size);
          self.merge_blocks();
          return Ok(Some(offset));
        }

        // Too little slack to carve out a header: hand over the whole block.
        if block_size > size {
          return Ok(Some(offset));
        }

        if self.last() == Some(offset) {
          self.extend_tail(offset, size)?;
          return Ok(Some(offset));
        }
      }

      current = self.next_block(offset);
    }

    Ok(None)
  }

  /// Turns the block at `offset` into a live block of `size` bytes followed by a free remainder.
  fn split_block(
    &mut self,
    offset: usize,
    size: usize,
  ) {
    let original = self.block(offset).size;
    let remainder = storage_offset(offset) + size;

    self.write_block(remainder, Block::new(original - size - HEADER_SIZE, true));

    let block = self.block_mut(offset);
    block.size = size;
    block.freed = false;

    if self.last() == Some(offset) {
      self.header_mut().last_block = remainder;
    }

    trace!(
      "split block at {:#x}: {} + {} bytes free at {:#x}",
      offset,
      size,
      original - size - HEADER_SIZE,
      remainder
    );
  }

  /// Folds every run of adjacent free blocks into its first block.
  fn merge_blocks(&mut self) {
    let mut current = self.first();

    while let Some(offset) = current {
      let Some(next) = self.next_block(offset) else {
        break;
      };

      if self.block(offset).freed && self.block(next).freed {
        let absorbed = HEADER_SIZE + self.block(next).size;
        self.block_mut(offset).size += absorbed;

        if self.last() == Some(next) {
          self.header_mut().last_block = offset;
        }

        trace!("merged block at {:#x} into {:#x}", next, offset);

        // Stay on this block: its new neighbour may be free as well.
        continue;
      }

      current = Some(next);
    }
  }

  /// Appends a live block of `size` bytes after the last one, committing pages as needed.
  fn alloc_last_block(
    &mut self,
    size: usize,
  ) -> HeapResult<usize> {
    let offset = match self.last() {
      Some(last) => self.block(last).next_offset(last),
      None => HEAP_HEADER_SIZE,
    };

    let bytes = HEADER_SIZE
      .checked_add(size)
      .ok_or(HeapError::SizeOverflow(size))?;

    self.grow_commit(offset, bytes)?;
    self.write_block(offset, Block::new(size, false));

    let header = self.header_mut();
    if header.first_block == NO_BLOCK {
      header.first_block = offset;
    }
    header.last_block = offset;

    debug!("extended arena with a {}-byte block at {:#x}", size, offset);

    Ok(offset)
  }

  /// Grows the last block to `size` bytes, committing whatever it now covers.
  fn extend_tail(
    &mut self,
    offset: usize,
    size: usize,
  ) -> HeapResult<()> {
    self.grow_commit(storage_offset(offset), size)?;
    self.block_mut(offset).size = size;

    debug!("extended tail block at {:#x} to {} bytes", offset, size);

    Ok(())
  }

  /// Makes sure `offset..offset + bytes` is committed, calling the provider only for new pages.
  fn grow_commit(
    &mut self,
    offset: usize,
    bytes: usize,
  ) -> HeapResult<()> {
    let end = offset.saturating_add(bytes);

    if end <= self.header().committed {
      return Ok(());
    }

    if let Err(source) = self.region.commit(offset, bytes) {
      warn!("out of memory: cannot commit {} bytes at {:#x}: {}", bytes, offset, source);
      return Err(HeapError::OutOfMemory {
        requested: bytes,
        source,
      });
    }

    let page_size = self.header().page_size;
    let committed = align_to!(end, page_size);
    self.header_mut().committed = committed;

    debug!("committed arena up to {:#x}", committed);

    Ok(())
  }

  /// Cuts a live block down to `size`, returning the tail to the heap when it can hold a header.
  fn shrink_block(
    &mut self,
    offset: usize,
    size: usize,
  ) {
    let original = self.block(offset).size;

    if original - size > HEADER_SIZE {
      self.split_block(offset, size);
      self.merge_blocks();
    }
  }

  /// Grows a live block without moving it, either into uncommitted space or a free neighbour.
  fn grow_in_place(
    &mut self,
    offset: usize,
    size: usize,
  ) -> HeapResult<bool> {
    if self.last() == Some(offset) {
      return match self.extend_tail(offset, size) {
        Ok(()) => Ok(true),
        Err(error) if error.is_out_of_memory() => Ok(false),
        Err(error) => Err(error),
      };
    }

    let Some(next) = self.next_block(offset) else {
      return Ok(false);
    };

    let neighbour = self.block(next);
    if !neighbour.freed {
      return Ok(false);
    }

    let combined = self.block(offset).size + HEADER_SIZE + neighbour.size;
    if combined < size {
      return Ok(false);
    }

    self.block_mut(offset).size = combined;
    if self.last() == Some(next) {
      self.header_mut().last_block = offset;
    }

    self.shrink_block(offset, size);

    Ok(true)
  }

  fn release_block(
    &mut self,
    offset: usize,
  ) {
    self.block_mut(offset).freed = true;
    self.merge_blocks();

    trace!("freed block at {:#x}", offset);
  }

  /// Offset of the block whose storage starts at `ptr`, freed or not.
  pub(crate) fn find_block(
    &self,
    ptr: NonNull<u8>,
  ) -> HeapResult<usize> {
    let address = ptr.as_ptr() as usize;

    let target = address
      .checked_sub(self.region.base().as_ptr() as usize)
      .and_then(|offset| offset.checked_sub(HEADER_SIZE));

    if let Some(target) = target {
      let mut current = self.first();

      while let Some(offset) = current {
        if offset == target {
          return Ok(offset);
        }
        if offset > target {
          break;
        }
        current = self.next_block(offset);
      }
    }

    warn!("rejected pointer {:#x}: not a block of this heap", address);

    Err(HeapError::InvalidPointer(address))
  }

  fn live_block(
    &self,
    ptr: NonNull<u8>,
  ) -> HeapResult<usize> {
    let offset = self.find_block(ptr)?;

    if self.block(offset).freed {
      warn!("rejected double free of {:p}", ptr);
      return Err(HeapError::DoubleFree(ptr.as_ptr() as usize));
    }

    Ok(offset)
  }

  pub(crate) fn first(&self) -> Option<usize> {
    Some(self.header().first_block).filter(|&offset| offset != NO_BLOCK)
  }

  pub(crate) fn last(&self) -> Option<usize> {
    Some(self.header().last_block).filter(|&offset| offset != NO_BLOCK)
  }

  pub(crate) fn next_block(
    &self,
    offset: usize,
  ) -> Option<usize> {
    if self.last().is_none_or(|last| offset >= last) {
      return None;
    }

    Some(self.block(offset).next_offset(offset))
  }

  pub(crate) fn address(
    &self,
    offset: usize,
  ) -> *mut u8 {
    unsafe { self.region.base().as_ptr().add(offset) }
  }

  pub(crate) fn storage(
    &self,
    offset: usize,
  ) -> NonNull<u8> {
    unsafe { NonNull::new_unchecked(self.address(storage_offset(offset))) }
  }

  fn offset_of(
    &self,
    ptr: NonNull<u8>,
  ) -> usize {
    ptr.as_ptr() as usize - self.region.base().as_ptr() as usize
  }

  fn header(&self) -> &HeapHeader {
    unsafe { &*(self.region.base().as_ptr() as *const HeapHeader) }
  }

  fn header_mut(&mut self) -> &mut HeapHeader {
    unsafe { &mut *(self.region.base().as_ptr() as *mut HeapHeader) }
  }

  pub(crate) fn block(
    &self,
    offset: usize,
  ) -> &Block {
    unsafe { &*(self.address(offset) as *const Block) }
  }

  fn block_mut(
    &mut self,
    offset: usize,
  ) -> &mut Block {
    unsafe { &mut *(self.address(offset) as *mut Block) }
  }

  fn write_block(
    &mut self,
    offset: usize,
    block: Block,
  ) {
    unsafe { ptr::write(self.address(offset) as *mut Block, block) };
  }

  #[cfg(test)]
  fn region(&self) -> &V {
    &self.region
  }
}
