//! The preemption-disable counter.
//!
//! While the counter is above zero the scheduler must not move the CPU
//! off the current task; hardware interrupts still fire if the EFLAGS
//! interrupt flag allows them. Single-CPU state, touched with
//! interrupts disabled or from interrupt context.

use core::sync::atomic::{AtomicI32, Ordering};

static PREEMPT_DISABLE_COUNT: AtomicI32 = AtomicI32::new(0);

pub fn disable_preemption() {
    PREEMPT_DISABLE_COUNT.fetch_add(1, Ordering::Relaxed);
}

pub fn enable_preemption() {
    let prev = PREEMPT_DISABLE_COUNT.fetch_sub(1, Ordering::Relaxed);
    assert!(prev > 0, "enable_preemption() without matching disable");
}

/// Install a task's saved disable depth at switch-in. Scheduler only:
/// the counter tracks the depth of the stack about to run, and that
/// stack unwinds through exactly this many matched enables.
pub(crate) fn set_preempt_count(count: i32) {
    assert!(count >= 0);
    PREEMPT_DISABLE_COUNT.store(count, Ordering::Relaxed);
}

pub fn preempt_count() -> i32 {
    PREEMPT_DISABLE_COUNT.load(Ordering::Relaxed)
}

pub fn is_preemption_enabled() -> bool {
    preempt_count() == 0
}
