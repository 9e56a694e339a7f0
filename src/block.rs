use std::mem;

/// Header stored in the arena right before every block's storage.
///
/// There is no `next` field: the following block always starts at
/// `offset + HEADER_SIZE + size`.
#[repr(C, align(8))]
pub struct Block {
  pub size: usize,
  pub freed: bool,
}

pub const HEADER_SIZE: usize = mem::size_of::<Block>();

const _: () = assert!(HEADER_SIZE % crate::align::ALIGNMENT == 0);

impl Block {
  pub fn new(
    size: usize,
    freed: bool,
  ) -> Self {
    Self { size, freed }
  }

  /// Offset of the block that follows the one stored at `offset`.
  pub fn next_offset(
    &self,
    offset: usize,
  ) -> usize {
    offset + HEADER_SIZE + self.size
  }
}

/// Offset of a block's storage, given the offset of its header.
pub fn storage_offset(offset: usize) -> usize {
  offset + HEADER_SIZE
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_keeps_storage_aligned() {
    assert_eq!(HEADER_SIZE % 8, 0);
    assert_eq!(mem::align_of::<Block>(), 8);
  }

  #[test]
  fn test_next_offset_skips_header_and_storage() {
    let block = Block::new(64, true);
    assert_eq!(block.next_offset(32), 32 + HEADER_SIZE + 64);
    assert_eq!(storage_offset(32), 32 + HEADER_SIZE);
  }
}
