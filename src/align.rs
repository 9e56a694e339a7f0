/// Granularity of every block size and storage address handed out by the heap.
pub const ALIGNMENT: usize = 8;

/// Rounds the given size up to the heap's block alignment.
///
/// # Examples
///
/// ```rust
/// use vheap::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(0), 0);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::align::ALIGNMENT)
  };
}

/// Rounds the given value up to a multiple of `$align`, which must be a power of two.
///
/// ```rust
/// use vheap::align_to;
///
/// assert_eq!(align_to!(1, 4096), 4096);
/// assert_eq!(align_to!(8192, 4096), 8192);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

/// Overflow-checked version of [`align!`] for sizes coming from callers.
pub fn checked_align(size: usize) -> Option<usize> {
  size
    .checked_add(ALIGNMENT - 1)
    .map(|v| v & !(ALIGNMENT - 1))
}

/// Rounds `value` down to a multiple of `align`, which must be a power of two.
pub(crate) fn align_down(
  value: usize,
  align: usize,
) -> usize {
  value & !(align - 1)
}
