//! Interrupt gates for the 16 remapped IRQ vectors.
//!
//! CPU-exception entries (vectors 0..31) are owned by the exception
//! layer, not by this module; only 32..47 are populated here.

use core::arch::asm;

use crate::cell::SyncRefCell;
use crate::consts::{IRQ_COUNT, IRQ_VECTOR_BASE};

const KERNEL_CS: u16 = 0x08;
// present | ring 0 | 32-bit interrupt gate
const GATE_FLAGS: u8 = 0x8E;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_lo: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_hi: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_lo: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_hi: 0,
        }
    }

    fn new(handler: usize, selector: u16, type_attr: u8) -> Self {
        Self {
            offset_lo: handler as u16,
            selector,
            zero: 0,
            type_attr,
            offset_hi: (handler >> 16) as u16,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

static IDT: SyncRefCell<[IdtEntry; 256]> = SyncRefCell::new([IdtEntry::missing(); 256]);

extern "C" {
    fn irq0();
    fn irq1();
    fn irq2();
    fn irq3();
    fn irq4();
    fn irq5();
    fn irq6();
    fn irq7();
    fn irq8();
    fn irq9();
    fn irq10();
    fn irq11();
    fn irq12();
    fn irq13();
    fn irq14();
    fn irq15();
}

pub fn init() {
    let entry_points: [unsafe extern "C" fn(); IRQ_COUNT] = [
        irq0, irq1, irq2, irq3, irq4, irq5, irq6, irq7, irq8, irq9, irq10, irq11, irq12, irq13,
        irq14, irq15,
    ];

    let mut idt = IDT.borrow_mut();
    for (i, entry) in entry_points.iter().enumerate() {
        idt[IRQ_VECTOR_BASE as usize + i] = IdtEntry::new(*entry as usize, KERNEL_CS, GATE_FLAGS);
    }

    let ptr = IdtPointer {
        limit: (core::mem::size_of::<[IdtEntry; 256]>() - 1) as u16,
        base: idt.as_ptr() as u32,
    };
    unsafe {
        asm!("lidt [{}]", in(reg) &ptr, options(nostack));
    }
}
