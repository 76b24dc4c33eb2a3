use std::io::Read;

use libc::sbrk;
use rmalloc::{HeapAllocator, SbrkSource};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `htop`, `gdb`, or just visually track how allocations change the heap.
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
  // Touch stdout before the allocator claims the break: the first println
  // makes the C library set up its own buffers, so later prints no longer
  // move the break behind our back.
  println!("rmalloc walkthrough: explicit free list over sbrk");

  unsafe {
    print_program_break("start");

    // --------------------------------------------------------------------
    // 1) Build the heap: padding word, prologue/epilogue sentinels, one
    //    free block of the default chunk size, and the small-object region.
    // --------------------------------------------------------------------
    let mut heap = HeapAllocator::new(SbrkSource::new()).expect("sbrk heap");
    println!("\n[1] Heap initialized, consistency = {}", heap.check());
    heap.dump();
    print_program_break("after init");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Small allocations cluster inside the reserved region instead of
    //    splintering the main free block. Watch the addresses: they are
    //    packed back to back.
    // --------------------------------------------------------------------
    println!("\n[2] Four small allocations (32 bytes each)");
    let mut smalls = Vec::new();
    for i in 0..4 {
      let p = heap.allocate(32);
      println!("[2] small #{i} at {p:?}");
      smalls.push(p);
    }
    heap.dump();
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) A large allocation comes from the main free block and is usable
    //    like any other memory.
    // --------------------------------------------------------------------
    println!("\n[3] Allocate 1 KiB and fill it");
    let big = heap.allocate(1024);
    println!("[3] big at {big:?}");
    for i in 0..1024 {
      big.add(i).write((i % 256) as u8);
    }
    println!("[3] payload intact = {}", (0..1024).all(|i| big.add(i).read() == (i % 256) as u8));
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Growing past every free block forces a heap extension; the chunk
    //    size adapts toward the request. The program break moves here.
    // --------------------------------------------------------------------
    println!("\n[4] Allocate 8 KiB (forces an extension)");
    print_program_break("before extension");
    let huge = heap.allocate(8 * 1024);
    println!("[4] huge at {huge:?}");
    print_program_break("after extension");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Realloc grows in place when a free neighbour is available,
    //    otherwise it moves the payload to a fresh block.
    // --------------------------------------------------------------------
    println!("\n[5] Reallocate the 1 KiB block to 2 KiB");
    let bigger = heap.reallocate(big, 2048);
    println!(
      "[5] moved from {big:?} to {bigger:?} ({})",
      if bigger == big { "grew in place" } else { "copied to a new block" },
    );
    println!("[5] payload intact = {}", (0..1024).all(|i| bigger.add(i).read() == (i % 256) as u8));
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Freeing coalesces immediately: no two free blocks are ever left
    //    adjacent. Free everything and look at the final block map.
    // --------------------------------------------------------------------
    println!("\n[6] Free everything");
    for p in smalls {
      heap.free(p);
    }
    heap.free(bigger);
    heap.free(huge);
    heap.dump();
    println!("[6] consistency = {}", heap.check());

    // --------------------------------------------------------------------
    // 7) End of demo. The heap region stays with the process; the OS
    //    reclaims all memory on exit.
    // --------------------------------------------------------------------
    println!("\n[7] End of walkthrough.");
    print_program_break("end");
  }
}
