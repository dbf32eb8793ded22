#![no_std]
#![no_main]

#[macro_use]
extern crate alloc;

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

#[macro_use]
mod console;

#[path = "boards/qemu.rs"]
mod board;

mod arch;
mod boot;
mod cell;
mod consts;
mod fs;
mod logging;
mod mm;
mod preempt;
#[cfg(feature = "selftest")]
mod selftest;
mod sync;
mod task;
mod timer;
mod trap;

use core::arch::global_asm;

global_asm!(include_str!("entry.S"));

#[no_mangle]
pub extern "C" fn kmain(mb_magic: u32, mb_info: u32) -> ! {
    lang_items::setup();
    logging::init();
    println!("opal kernel booting");

    trap::init();
    timer::init();
    fs::init(boot::ramdisk(mb_magic, mb_info));

    #[cfg(feature = "selftest")]
    task::spawn_kernel(selftest::run);
    task::spawn_kernel(init_task);

    task::run_tasks();
}

fn init_task() {
    info!("init task up, {} ticks", timer::ticks());
}

pub use lang_items::*;

pub mod lang_items {
    use buddy_system_allocator::LockedHeap;

    use crate::arch;
    use crate::consts::KERNEL_HEAP_SIZE;
    use core::panic::PanicInfo;

    pub fn setup() {
        init_heap();
    }

    #[panic_handler]
    fn _panic(info: &PanicInfo) -> ! {
        unsafe { arch::disable_interrupts() };
        if let Some(location) = info.location() {
            error!(
                "[kernel] Panicked at {}:{} {}",
                location.file(),
                location.line(),
                info.message()
            );
        } else {
            error!("[kernel] Panicked: {}", info.message());
        }
        arch::halt_forever()
    }

    #[global_allocator]
    static HEAP_ALLOCATOR: LockedHeap<32> = LockedHeap::empty();

    // The arena the global allocator carves up; lives in .bss.
    static mut KERNEL_HEAP: [u8; KERNEL_HEAP_SIZE] = [0; KERNEL_HEAP_SIZE];

    fn init_heap() {
        unsafe {
            HEAP_ALLOCATOR
                .lock()
                .init(KERNEL_HEAP.as_ptr() as usize, KERNEL_HEAP_SIZE);
        }
    }
}
