/// Address space reserved for one heap unless configured otherwise (256 MiB).
pub const DEFAULT_RESERVE: usize = 256 * 1024 * 1024;

/// Creation-time settings of a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Bytes of address space reserved up front. The arena never grows past it.
  pub reserve: usize,
}

impl HeapConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn reserve(
    mut self,
    bytes: usize,
  ) -> Self {
    self.reserve = bytes;
    self
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      reserve: DEFAULT_RESERVE,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_and_override() {
    assert_eq!(HeapConfig::new().reserve, DEFAULT_RESERVE);
    assert_eq!(HeapConfig::new().reserve(4096).reserve, 4096);
  }
}
