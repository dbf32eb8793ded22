//! Platform constants for the QEMU `pc` machine.

/// First serial port; the kernel console.
pub const COM1: u16 = 0x3F8;

/// Programmable interval timer input clock, Hz.
pub const PIT_FREQ: usize = 1_193_182;
/// PIT channel 0 data / mode-command ports.
pub const PIT_CHANNEL0: u16 = 0x40;
pub const PIT_MODE: u16 = 0x43;

pub const TICKS_PER_SEC: usize = 100;
