//! # vheap - A Heap Allocator over Reserved Virtual Memory
//!
//! This crate provides a single-arena **heap allocator** that carves variable-size
//! blocks out of an address range reserved up front and committed page by page.
//!
//! ## Overview
//!
//! A heap owns one contiguous reservation. Its first bytes hold the heap header,
//! and blocks follow back to back, each a small header plus the caller's storage:
//!
//! ```text
//!   Arena Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                        RESERVED ADDRESS RANGE                        │
//!   │                                                                      │
//!   │ ┌────────┬─────┬──────┬─────┬──────┬─────┬──────┬──────────────────┐ │
//!   │ │ Heap   │ Hdr │  A   │ Hdr │  B   │ Hdr │  C   │   uncommitted    │ │
//!   │ │ header │     │ live │     │ free │     │ live │                  │ │
//!   │ └────────┴─────┴──────┴─────┴──────┴─────┴──────┴──────────────────┘ │
//!   │            ▲                              ▲     ▲                    │
//!   │            │                              │     │                    │
//!   │       first block                    last block  end of committed    │
//!   │                                                  pages (grows up)    │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   next block = block + header + size, so the chain needs no pointers.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   vheap
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Block header (internal)
//!   ├── config     - HeapConfig
//!   ├── debug      - Block iteration and heap dumps
//!   ├── error      - HeapError
//!   ├── heap       - Heap implementation
//!   └── vmem       - VirtualMemory trait and the mmap-backed MmapRegion
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vheap::Heap;
//!
//! fn main() -> Result<(), vheap::HeapError> {
//!     let mut heap = Heap::create()?;
//!
//!     let ptr = heap.calloc(64)?;
//!     unsafe { ptr.as_ptr().write(42) };
//!
//!     let ptr = heap.realloc(ptr.as_ptr(), 256)?.expect("non-zero size");
//!     assert_eq!(unsafe { ptr.as_ptr().read() }, 42);
//!
//!     heap.free(ptr.as_ptr())?;
//!     println!("{}", heap.dump());
//!
//!     heap.destroy();
//!     Ok(())
//! }
//! ```
//!
//! ## How It Works
//!
//! Allocation walks the chain looking for a free block:
//!
//! ```text
//!   free block, exact size        -> reused as is
//!   free block, room for a header -> split; the tail becomes a new free block
//!   free block, a little larger   -> reused whole
//!   free last block, too small    -> grown in place by committing more pages
//!   nothing suitable              -> new block appended after the last one
//! ```
//!
//! Freeing marks the block and folds every run of adjacent free blocks into one.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **No page reclamation**: Committed pages stay committed until the heap is destroyed
//! - **Unix-only**: Requires `libc` and `mmap` (POSIX systems)
//!
//! ## Safety
//!
//! Pointers handed back to `free` and `realloc` are validated against the block
//! chain, so foreign pointers and double frees are rejected with an error. Reading
//! or writing through returned pointers is still the caller's `unsafe` business.

pub mod align;
mod block;
mod config;
mod debug;
mod error;
mod heap;
pub mod vmem;

pub use block::HEADER_SIZE;
pub use config::{DEFAULT_RESERVE, HeapConfig};
pub use debug::{BlockInfo, Blocks};
pub use error::{HeapError, HeapResult};
pub use heap::Heap;
pub use vmem::{MmapRegion, VirtualMemory, VmemError};
