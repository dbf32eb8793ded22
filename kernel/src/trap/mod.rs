//! Hardware-interrupt entry: vector stubs, the IRQ gates and the
//! dispatcher.

pub mod context;
mod idt;
pub mod irq;

pub use context::TrapFrame;
pub use irq::{
    handle_irq, in_irq_handler, install_handler, nested_interrupts_depth, pop_nested_interrupt,
    push_nested_interrupt, spurious_irq_count, uninstall_handler, unhandled_irq_count,
};

use core::arch::global_asm;

use crate::consts::{IRQ_COUNT, IRQ_VECTOR_BASE};

global_asm!(include_str!("trap.S"));

/// Remap the PICs, point vectors 32..47 at the IRQ stubs and leave every
/// line masked until a handler installs.
pub fn init() {
    irq::pics(|p| p.remap(IRQ_VECTOR_BASE, IRQ_VECTOR_BASE + 8));
    for i in 0..IRQ_COUNT as u8 {
        irq::pics(|p| p.set_mask(i));
    }
    idt::init();
}
