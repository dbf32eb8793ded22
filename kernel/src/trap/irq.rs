//! The IRQ dispatcher: routes remapped vectors 32..47 to registered
//! handlers, tracks interrupt nesting and hands bottom-half work to the
//! scheduler.

use core::sync::atomic::{AtomicU32, Ordering};

use pic::CascadedPics;

use crate::arch::{self, PortIoBus};
use crate::cell::SyncRefCell;
use crate::consts::{IRQ_COUNT, IRQ_VECTOR_BASE};
use crate::preempt::{disable_preemption, enable_preemption, preempt_count};
use crate::task;
use crate::trap::TrapFrame;

/// A handler returns non-zero when the dispatcher should run the
/// scheduler once the interrupt unwinds (the "bottom half").
pub type IrqHandler = fn(&mut TrapFrame) -> i32;

static PICS: SyncRefCell<CascadedPics<PortIoBus>> =
    SyncRefCell::new(CascadedPics::new(PortIoBus));

/// Run a PIC operation with interrupts off, so port traffic never
/// interleaves with a nested interrupt's.
pub fn pics<T>(f: impl FnOnce(&mut CascadedPics<PortIoBus>) -> T) -> T {
    arch::with_interrupts_disabled(|| f(&mut PICS.borrow_mut()))
}

static IRQ_HANDLERS: SyncRefCell<[Option<IrqHandler>; IRQ_COUNT]> =
    SyncRefCell::new([None; IRQ_COUNT]);

const ZERO: AtomicU32 = AtomicU32::new(0);
static UNHANDLED_IRQ_COUNT: [AtomicU32; IRQ_COUNT] = [ZERO; IRQ_COUNT];
static SPUR_IRQ_COUNT: AtomicU32 = AtomicU32::new(0);

/// Small stack of in-flight interrupt vectors; its depth is the nesting
/// level. Only the timer line may nest on top of another IRQ, so the
/// capacity stays tiny.
struct NestedIrqs {
    vectors: [u32; 4],
    depth: usize,
}

static NESTED_IRQS: SyncRefCell<NestedIrqs> = SyncRefCell::new(NestedIrqs {
    vectors: [0; 4],
    depth: 0,
});

pub fn push_nested_interrupt(vector: u32) {
    arch::with_interrupts_disabled(|| {
        let mut n = NESTED_IRQS.borrow_mut();
        assert!(n.depth < n.vectors.len(), "interrupt nesting too deep");
        let depth = n.depth;
        n.vectors[depth] = vector;
        n.depth += 1;
    });
}

pub fn pop_nested_interrupt() {
    arch::with_interrupts_disabled(|| {
        let mut n = NESTED_IRQS.borrow_mut();
        assert!(n.depth > 0, "pop without matching push");
        n.depth -= 1;
    });
}

pub fn nested_interrupts_depth() -> usize {
    arch::with_interrupts_disabled(|| NESTED_IRQS.borrow().depth)
}

/// Are we running inside a hardware-interrupt handler?
pub fn in_irq_handler() -> bool {
    nested_interrupts_depth() > 0
}

pub fn spurious_irq_count() -> u32 {
    SPUR_IRQ_COUNT.load(Ordering::Relaxed)
}

pub fn unhandled_irq_count(irq: u8) -> u32 {
    UNHANDLED_IRQ_COUNT[irq as usize].load(Ordering::Relaxed)
}

/// Register `handler` and unmask the line. Called from task context
/// only.
pub fn install_handler(irq: u8, handler: IrqHandler) {
    assert!((irq as usize) < IRQ_COUNT);
    arch::with_interrupts_disabled(|| {
        IRQ_HANDLERS.borrow_mut()[irq as usize] = Some(handler);
    });
    pics(|p| p.clear_mask(irq));
}

/// Drop the handler and mask the line until a new one installs.
pub fn uninstall_handler(irq: u8) {
    assert!((irq as usize) < IRQ_COUNT);
    pics(|p| p.set_mask(irq));
    arch::with_interrupts_disabled(|| {
        IRQ_HANDLERS.borrow_mut()[irq as usize] = None;
    });
}

/// While interrupt nesting is tracked, the timer line is left unmasked
/// so it can nest; its handler knows how to cope. Every other line is
/// masked for the duration of its own handler.
fn mask_for_dispatch(irq: u8) {
    if irq != 0 {
        pics(|p| p.set_mask(irq));
    }
}

fn unmask_after_dispatch(irq: u8) {
    if irq != 0 {
        pics(|p| p.clear_mask(irq));
    }
}

#[no_mangle]
extern "C" fn handle_irq_entry(frame: &mut TrapFrame) {
    handle_irq(frame);
}

/// The dispatch sequence. Entered from the vector stubs with interrupts
/// disabled by the interrupt gate.
pub fn handle_irq(frame: &mut TrapFrame) {
    let irq = (frame.int_num - IRQ_VECTOR_BASE as u32) as u8;

    // A line that dropped before the vector fetch shows up as IRQ 7 or
    // 15 with a clear ISR bit; count it and bail without touching the
    // handler (the PIC driver already sent the master-only EOI that a
    // spurious IRQ 15 requires).
    if pics(|p| p.check_spurious(irq)) {
        SPUR_IRQ_COUNT.fetch_add(1, Ordering::Relaxed);
        return;
    }

    mask_for_dispatch(irq);
    disable_preemption();
    push_nested_interrupt(frame.int_num);
    assert!(!arch::are_interrupts_enabled());

    // EOI must go out before interrupts come back on; the other order
    // floods real hardware with spurious interrupts.
    pics(|p| p.send_eoi(irq));
    unsafe { arch::enable_interrupts() };

    // Snapshot the slot with interrupts off: a nested timer tick must
    // never observe the table cell mid-borrow.
    let handler = arch::with_interrupts_disabled(|| IRQ_HANDLERS.borrow()[irq as usize]);
    let handler_ret = match handler {
        Some(h) => h(frame),
        None => {
            UNHANDLED_IRQ_COUNT[irq as usize].fetch_add(1, Ordering::Relaxed);
            0
        }
    };

    pop_nested_interrupt();
    enable_preemption();
    unmask_after_dispatch(irq);

    if handler_ret == 0 {
        return;
    }

    // Bottom half: run the scheduler, but only if nothing else holds
    // preemption off; otherwise the next natural reschedule picks the
    // work up.
    disable_preemption();
    if preempt_count() > 1 {
        enable_preemption();
        return;
    }

    task::save_current_state(frame);

    // We are outside interrupt context here (the nesting was popped
    // above); only the timer handler may call schedule() while still
    // inside one.
    task::schedule_outside_interrupt_context();

    enable_preemption();
}
