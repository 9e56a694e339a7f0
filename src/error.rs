use thiserror::Error;

use crate::vmem::VmemError;

pub type HeapResult<T> = Result<T, HeapError>;

#[derive(Debug, Error)]
pub enum HeapError {
  /// The provider could not back more of the arena.
  #[error("out of memory: could not commit {requested} bytes")]
  OutOfMemory {
    requested: usize,
    #[source]
    source: VmemError,
  },

  #[error("allocation of {0} bytes overflows the address space")]
  SizeOverflow(usize),

  #[error("pointer {0:#x} was not returned by this heap")]
  InvalidPointer(usize),

  #[error("double free of {0:#x}")]
  DoubleFree(usize),

  #[error(transparent)]
  Vmem(#[from] VmemError),
}

impl HeapError {
  pub fn is_out_of_memory(&self) -> bool {
    matches!(self, HeapError::OutOfMemory { .. })
  }
}
