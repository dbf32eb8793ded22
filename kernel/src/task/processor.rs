use alloc::sync::Arc;

use spin::{Mutex, MutexGuard};

use super::switch::__switch;
use super::task::TaskControlBlock;
use super::TaskContext;
use crate::arch;

/// The single CPU's execution state: the task it runs and the idle
/// control flow's context.
pub struct Processor {
    current: Option<Arc<TaskControlBlock>>,
    idle_task_cx: TaskContext,
}

impl Processor {
    pub const fn new() -> Self {
        Self {
            current: None,
            idle_task_cx: TaskContext::empty(),
        }
    }

    pub fn idle_task_cx_ptr(&mut self) -> *mut TaskContext {
        &mut self.idle_task_cx as *mut _
    }

    pub fn take_current(&mut self) -> Option<Arc<TaskControlBlock>> {
        self.current.take()
    }

    pub fn current(&self) -> &Option<Arc<TaskControlBlock>> {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut Option<Arc<TaskControlBlock>> {
        &mut self.current
    }
}

static PROCESSOR: Mutex<Processor> = Mutex::new(Processor::new());

pub fn acquire_processor() -> MutexGuard<'static, Processor> {
    PROCESSOR.lock()
}

pub fn take_current_task() -> Option<Arc<TaskControlBlock>> {
    arch::with_interrupts_disabled(|| acquire_processor().take_current())
}

pub fn current_task() -> Option<Arc<TaskControlBlock>> {
    arch::with_interrupts_disabled(|| acquire_processor().current().clone())
}

/// Hop to the idle control flow, which picks the next task.
pub fn schedule(switched_task_cx_ptr: *mut TaskContext) {
    let mut processor = acquire_processor();
    let idle_task_cx_ptr = processor.idle_task_cx_ptr();
    drop(processor);

    unsafe { __switch(switched_task_cx_ptr, idle_task_cx_ptr) }
}
