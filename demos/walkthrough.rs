use std::io::Read;

use vheap::{Heap, HeapError};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect the process with tools like `pmap` or `gdb`
/// and watch committed pages appear as the heap grows.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints how much of the reservation is backed by committed pages.
fn print_committed(
  heap: &Heap,
  label: &str,
) {
  println!(
    "[{}] PID = {}, committed = {} of {} reserved bytes",
    label,
    std::process::id(),
    heap.committed(),
    heap.reserved(),
  );
}

fn main() -> Result<(), HeapError> {
  // RUST_LOG=vheap=trace shows every split, merge and commit.
  env_logger::init();

  let mut heap = Heap::create()?;

  print_committed(&heap, "start");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate three arrays of 32 i32 and fill the first one.
  // --------------------------------------------------------------------
  let len = 32;
  let bytes = len * size_of::<i32>();

  let first = heap.calloc(bytes)?.as_ptr() as *mut i32;
  let second = heap.calloc(bytes)?.as_ptr() as *mut i32;
  let third = heap.calloc(bytes)?.as_ptr() as *mut i32;
  println!("\n[1] first = {:?}, second = {:?}, third = {:?}", first, second, third);

  for i in 0..len {
    unsafe { first.add(i).write(i as i32) };
  }

  print!("{}", heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Free the last array. It becomes the free tail of the chain.
  // --------------------------------------------------------------------
  heap.free(third as *mut u8)?;
  println!("\n[2] Freed third");

  print!("{}", heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Ask for twice as much. The free tail is grown in place instead of
  //    leaving a hole behind it.
  // --------------------------------------------------------------------
  let fourth = heap.calloc(2 * bytes)?.as_ptr();
  println!(
    "\n[3] fourth = {:?} ({})",
    fourth,
    if fourth == third as *mut u8 {
      "reused the free tail"
    } else {
      "appended a new block"
    }
  );

  print!("{}", heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Shrink the first array to a quarter. The rest is split off as a
  //    free block while the first eight values stay put.
  // --------------------------------------------------------------------
  let first = heap
    .realloc(first as *mut u8, bytes / 4)?
    .map(|ptr| ptr.as_ptr() as *mut i32);
  if let Some(first) = first {
    let values: Vec<i32> = (0..len / 4).map(|i| unsafe { first.add(i).read() }).collect();
    println!("\n[4] first after shrinking = {:?}", values);
  }

  print!("{}", heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) A large request commits more pages.
  // --------------------------------------------------------------------
  print_committed(&heap, "before large alloc");
  let big = heap.alloc(64 * 1024)?;
  println!("\n[5] Allocated 64 KiB at {:?}", big);
  print_committed(&heap, "after large alloc");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 6) Double frees are caught instead of corrupting the chain.
  // --------------------------------------------------------------------
  heap.free(big.as_ptr())?;
  match heap.free(big.as_ptr()) {
    Err(error) => println!("\n[6] Second free rejected: {}", error),
    Ok(()) => println!("\n[6] Second free accepted?!"),
  }

  println!("\n[7] End of example. Destroying the heap releases the whole reservation.");
  heap.destroy();

  Ok(())
}
