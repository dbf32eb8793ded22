//! System timer: PIT channel 0 driving the scheduler tick.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::arch::outb;
use crate::board::{PIT_CHANNEL0, PIT_FREQ, PIT_MODE, TICKS_PER_SEC};
use crate::trap::{self, TrapFrame};

pub const MSEC_PER_SEC: usize = 1000;

static TICKS: AtomicUsize = AtomicUsize::new(0);

/// Ticks since boot.
pub fn ticks() -> usize {
    TICKS.load(Ordering::Relaxed)
}

pub fn get_time_ms() -> usize {
    ticks() * (MSEC_PER_SEC / TICKS_PER_SEC)
}

pub fn get_time_s() -> usize {
    ticks() / TICKS_PER_SEC
}

/// Counts the tick and asks the dispatcher for a reschedule. The timer
/// line is the one IRQ allowed to nest (it stays unmasked during
/// dispatch), so this body must stay reentrant: one atomic bump,
/// nothing else.
fn timer_irq_handler(_frame: &mut TrapFrame) -> i32 {
    TICKS.fetch_add(1, Ordering::Relaxed);
    1
}

/// Program the PIT for a periodic tick and hook IRQ 0 (which also
/// unmasks it).
pub fn init() {
    let divisor = PIT_FREQ / TICKS_PER_SEC;
    assert!(divisor <= u16::MAX as usize);
    outb(PIT_MODE, 0x36); // channel 0, lo/hi access, square wave
    outb(PIT_CHANNEL0, divisor as u8);
    outb(PIT_CHANNEL0, (divisor >> 8) as u8);

    trap::install_handler(0, timer_irq_handler);
}
