use std::io::Read;

use libc::sbrk;

use allocator_core::{allocate, free, reallocate, zero_allocate};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  unsafe {
    print_program_break("start");
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 1) Small allocate(): first call ever primes the heap arena.
    // ------------------------------------------------------------------
    let first_block = allocate(4);
    println!("\n[1] allocate(4) = {:?}", first_block);
    (first_block as *mut u32).write(0xDEADBEEF);
    println!("[1] Value written = 0x{:X}", (first_block as *mut u32).read());
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 2) Another small allocate(): served from the same arena, no sbrk.
    // ------------------------------------------------------------------
    let second_block = allocate(12);
    println!("\n[2] allocate(12) = {:?}", second_block);
    std::ptr::write_bytes(second_block, 0xAB, 12);
    println!("[2] Initialized second block with 0xAB");
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 3) zero_allocate(): contents are guaranteed zero.
    // ------------------------------------------------------------------
    let third_block = zero_allocate(16, 2);
    println!("\n[3] zero_allocate(16, 2) = {:?}", third_block);
    let slice = std::slice::from_raw_parts(third_block, 32);
    println!("[3] all zero? {}", slice.iter().all(|&b| b == 0));
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 4) free() the first block, then allocate a smaller size: best-fit
    //    should reuse the freed slot.
    // ------------------------------------------------------------------
    free(first_block);
    println!("\n[4] Freed first_block at {:?}", first_block);
    block_until_enter_pressed();

    let fourth_block = allocate(2);
    println!("\n[5] allocate(2) = {:?}", fourth_block);
    println!(
      "[5] fourth_block == first_block? {}",
      if fourth_block == first_block { "yes, reused the freed slot" } else { "no, allocated elsewhere" }
    );
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 5) A large allocate() crosses THRESHOLD and is served by mmap
    //    instead of growing the break.
    // ------------------------------------------------------------------
    print_program_break("before large alloc");
    let big_block = allocate(256 * 1024);
    println!("\n[6] allocate(256 KiB) = {:?} (served via mmap)", big_block);
    print_program_break("after large alloc");
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 6) reallocate() the mapped block back down to a small heap size.
    // ------------------------------------------------------------------
    let shrunk = reallocate(big_block, 16);
    println!("\n[7] reallocate(big_block, 16) = {:?} (moved back to the heap arena)", shrunk);
    free(shrunk);

    println!("\n[8] End of demo. Process will exit and the OS will reclaim all memory.");
  }
}
