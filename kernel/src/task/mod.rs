//! Kernel tasks: control blocks, the FIFO scheduler, the sleeping list
//! and wait objects.
//!
//! Single logical CPU. A task leaves the CPU only at [`kernel_yield`],
//! when a contended kernel mutex puts it to sleep, or when the IRQ
//! bottom half preempts it. Code holding the preemption counter above
//! zero never suspends.

pub mod context;
mod kernel_stack;
pub mod manager;
mod pid;
pub mod processor;
mod switch;
pub mod task;
mod wait;

use alloc::sync::Arc;

pub use context::TaskContext;
pub use manager::{add_task, fetch_task, pid2task, wake_one_sleeping_where};
pub use processor::{acquire_processor, current_task, schedule, take_current_task};
pub use task::{TaskControlBlock, TaskStatus};
pub use wait::WaitObject;

use crate::arch;
use crate::preempt::{disable_preemption, enable_preemption, preempt_count, set_preempt_count};
use crate::trap::TrapFrame;
use manager::remove_from_pid2task;
use switch::__switch;

/// Create a kernel task around `entry` and queue it.
pub fn spawn_kernel(entry: fn()) -> Arc<TaskControlBlock> {
    let task = Arc::new(TaskControlBlock::new_kernel(entry));
    add_task(Arc::clone(&task));
    task
}

/// Give up the CPU. A `Ready` caller goes back on the run queue; a
/// caller that already parked itself on the sleeping list (kernel
/// mutex contention) stays off the queue until it is woken. Returns
/// when the scheduler picks the task again.
pub fn kernel_yield() {
    disable_preemption();
    // The scheduler hand-off runs with interrupts off; the flag state
    // is per task and comes back when this stack resumes.
    let intr_enabled = arch::are_interrupts_enabled();
    unsafe { arch::disable_interrupts() };

    let task = take_current_task().expect("yield without a current task");
    let mut inner = task.inner_mut();

    if inner.task_status != TaskStatus::Sleeping {
        inner.task_status = TaskStatus::Ready;
    }
    let back_to_ready = inner.task_status == TaskStatus::Ready;

    // The depth this stack unwinds through matched enables; restored
    // when the task is switched back in.
    inner.saved_preempt_count = preempt_count();
    let task_cx_ptr = &mut inner.task_cx as *mut TaskContext;
    drop(inner);

    if back_to_ready {
        add_task(task);
    } else {
        // Already threaded on the sleeping list; dropping our ref is
        // fine, the list keeps it alive.
        drop(task);
    }

    schedule(task_cx_ptr);

    // Back on the CPU.
    if intr_enabled {
        unsafe { arch::enable_interrupts() };
    }
    enable_preemption();
}

/// Park the current task on the sleeping list, tagged with the object
/// it waits on. Preemption must be disabled by the caller; the actual
/// switch happens at the following [`kernel_yield`].
pub fn set_current_sleeping(wobj: WaitObject) {
    assert!(preempt_count() > 0);
    let task = current_task().expect("no current task to put to sleep");
    let mut inner = task.inner_mut();
    assert!(
        inner.wait_obj.is_none(),
        "sleeping task already has a wait object"
    );
    inner.wait_obj = Some(wobj);
    inner.task_status = TaskStatus::Sleeping;
    drop(inner);
    manager::push_sleeping(task);
}

pub fn exit_current_and_run_next(exit_code: i32) -> ! {
    disable_preemption();
    unsafe { arch::disable_interrupts() };
    let task = take_current_task().expect("exit without a current task");
    remove_from_pid2task(task.pid());
    let mut inner = task.inner_mut();
    inner.task_status = TaskStatus::Zombie;
    inner.exit_code = exit_code;
    drop(inner);

    // The zombie list keeps the control block alive: this stack IS the
    // task's kernel stack, and it must survive until the final switch.
    manager::add_zombie(task);

    let mut unused = TaskContext::empty();
    schedule(&mut unused as *mut _);
    unreachable!("zombie task was scheduled again");
}

/// Stash the interrupted register frame in the current task; the IRQ
/// bottom half calls this just before preempting it.
pub fn save_current_state(frame: &TrapFrame) {
    if let Some(task) = current_task() {
        task.inner_mut().saved_frame = Some(*frame);
    }
}

/// The bottom-half reschedule. Named after the fact that the caller
/// already popped its interrupt-nesting level: only the timer handler
/// may schedule from a live interrupt context.
pub fn schedule_outside_interrupt_context() {
    if current_task().is_none() {
        // Interrupt hit the idle loop; nothing to preempt.
        return;
    }
    kernel_yield();
}

/// The idle control flow: pull tasks off the run queue forever. Enters
/// with preemption disabled (the scheduler's own token).
pub fn run_tasks() -> ! {
    disable_preemption();
    loop {
        let mut processor = acquire_processor();

        if let Some(task) = fetch_task() {
            let idle_task_cx_ptr = processor.idle_task_cx_ptr();
            let mut inner = task.inner_mut();
            let next_task_cx_ptr = &inner.task_cx as *const TaskContext;
            inner.task_status = TaskStatus::Running;
            let resumed_count = inner.saved_preempt_count;
            drop(inner);
            *processor.current_mut() = Some(task);
            drop(processor);

            // The incoming stack releases exactly the depth it saved.
            set_preempt_count(resumed_count);
            unsafe { __switch(idle_task_cx_ptr, next_task_cx_ptr) }
            set_preempt_count(1);
        } else {
            drop(processor);
            arch::wait_for_interrupt();
        }
    }
}

/// First frame of every kernel task; reached through `__switch`'s `ret`.
extern "C" fn task_bootstrap(entry_addr: usize) -> ! {
    // Release the scheduler's token, then open the interrupt gate.
    enable_preemption();
    unsafe { arch::enable_interrupts() };

    let entry: fn() = unsafe { core::mem::transmute(entry_addr) };
    entry();
    exit_current_and_run_next(0)
}

pub(crate) use task_bootstrap as bootstrap_entry;
