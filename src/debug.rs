//! Read-only inspection of a heap's block chain.

use std::{
  fmt::{self, Write},
  ptr::NonNull,
  slice,
};

use crate::{error::HeapResult, heap::Heap, vmem::VirtualMemory};

/// Snapshot of one block in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Offset of the block header from the start of the arena.
  pub offset: usize,
  /// Address of the block header.
  pub address: usize,
  /// Address of the block storage, as returned to callers.
  pub data: usize,
  pub size: usize,
  pub freed: bool,
}

/// Iterator over the blocks of a heap, lowest address first.
pub struct Blocks<'a, V: VirtualMemory> {
  heap: &'a Heap<V>,
  current: Option<usize>,
}

impl<V: VirtualMemory> Iterator for Blocks<'_, V> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    let offset = self.current?;
    let block = self.heap.block(offset);

    self.current = self.heap.next_block(offset);

    Some(BlockInfo {
      offset,
      address: self.heap.address(offset) as usize,
      data: self.heap.storage(offset).as_ptr() as usize,
      size: block.size,
      freed: block.freed,
    })
  }
}

impl<V: VirtualMemory> Heap<V> {
  pub fn blocks(&self) -> Blocks<'_, V> {
    Blocks {
      heap: self,
      current: self.first(),
    }
  }

  /// Multi-line report of the heap and every block with its raw bytes.
  pub fn dump(&self) -> String {
    self.to_string()
  }

  /// Hex dump of the storage of the block at `ptr`, live or freed.
  pub fn dump_block(
    &self,
    ptr: NonNull<u8>,
  ) -> HeapResult<String> {
    let offset = self.find_block(ptr)?;

    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_bytes(&mut out, self.contents(offset));

    Ok(out)
  }

  fn contents(
    &self,
    offset: usize,
  ) -> &[u8] {
    let size = self.block(offset).size;
    unsafe { slice::from_raw_parts(self.storage(offset).as_ptr(), size) }
  }
}

fn write_bytes(
  out: &mut impl Write,
  bytes: &[u8],
) -> fmt::Result {
  for (i, byte) in bytes.iter().enumerate() {
    if i > 0 && i % 32 == 0 {
      out.write_str("\n   ")?;
    }
    write!(out, "{:02x}", byte)?;
  }

  Ok(())
}

impl<V: VirtualMemory> fmt::Display for Heap<V> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let address = |offset: Option<usize>| offset.map_or(0, |offset| self.address(offset) as usize);

    writeln!(
      f,
      "Heap: (page_size={}, first_block={:#x}, last_block={:#x}, committed={})",
      self.page_size(),
      address(self.first()),
      address(self.last()),
      self.committed()
    )?;

    for block in self.blocks() {
      writeln!(
        f,
        " - Block: {:#x} : data({:#x}, size={}, freed={})",
        block.address, block.data, block.size, block.freed
      )?;

      f.write_str("   ")?;
      write_bytes(&mut *f, self.contents(block.offset))?;
      f.write_str("\n")?;
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use crate::{HEADER_SIZE, Heap};

  #[test]
  fn test_blocks_walk_in_address_order() {
    let mut heap = Heap::create().unwrap();

    let a = heap.alloc(8).unwrap();
    let b = heap.alloc(24).unwrap();

    let blocks: Vec<_> = heap.blocks().collect();

    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].data, a.as_ptr() as usize);
    assert_eq!(blocks[1].data, b.as_ptr() as usize);
    assert_eq!(blocks[1].address, blocks[0].data + 8);
    assert_eq!(blocks[1].data - blocks[1].address, HEADER_SIZE);
  }

  #[test]
  fn test_dump_lists_blocks_and_bytes() {
    let mut heap = Heap::create().unwrap();

    let a = heap.alloc(8).unwrap();
    unsafe { a.as_ptr().write_bytes(0xAB, 8) };
    let b = heap.alloc(16).unwrap();
    heap.free(b.as_ptr()).unwrap();

    let dump = heap.dump();

    assert!(dump.starts_with("Heap: (page_size="));
    assert!(dump.contains(&format!("data({:#x}, size=8, freed=false)", a.as_ptr() as usize)));
    assert!(dump.contains(&format!("data({:#x}, size=16, freed=true)", b.as_ptr() as usize)));
    assert!(dump.contains("abababababababab"));
    assert_eq!(dump, heap.to_string());
  }

  #[test]
  fn test_dump_block_reports_contents() {
    let mut heap = Heap::create().unwrap();

    let a = heap.calloc(8).unwrap();
    unsafe { a.as_ptr().write(0x7f) };

    assert_eq!(heap.dump_block(a).unwrap(), "7f00000000000000");
  }
}
