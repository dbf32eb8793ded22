use core::fmt::Debug;

use spin::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::kernel_stack::KernelStack;
use super::pid::{pid_alloc, PidHandle};
use super::wait::WaitObject;
use super::TaskContext;
use crate::trap::TrapFrame;

pub struct TaskControlBlock {
    pub pid: PidHandle,
    pub kernel_stack: KernelStack,
    inner: RwLock<TaskControlBlockInner>,
}

pub struct TaskControlBlockInner {
    pub task_cx: TaskContext,
    pub task_status: TaskStatus,
    /// What this task sleeps on; `Some` exactly while `Sleeping`.
    pub wait_obj: Option<WaitObject>,
    /// Register frame stashed by the IRQ bottom half before preemption.
    pub saved_frame: Option<TrapFrame>,
    /// Preemption-disable depth this task's stack unwinds through;
    /// restored by the scheduler on switch-in.
    pub saved_preempt_count: i32,
    pub exit_code: i32,
}

impl TaskControlBlock {
    /// A kernel task that starts at `entry` and exits when it returns.
    pub fn new_kernel(entry: fn()) -> Self {
        let kernel_stack = KernelStack::new();
        let esp = kernel_stack.prepare(entry);
        Self {
            pid: pid_alloc(),
            kernel_stack,
            inner: RwLock::new(TaskControlBlockInner {
                task_cx: TaskContext::with_esp(esp),
                task_status: TaskStatus::Ready,
                wait_obj: None,
                saved_frame: None,
                // Released by task_bootstrap on first switch-in.
                saved_preempt_count: 1,
                exit_code: 0,
            }),
        }
    }

    pub fn pid(&self) -> usize {
        self.pid.0
    }

    pub fn inner_mut(&self) -> RwLockWriteGuard<'_, TaskControlBlockInner> {
        self.inner.write()
    }

    pub fn inner_ref(&self) -> RwLockReadGuard<'_, TaskControlBlockInner> {
        self.inner.read()
    }

    pub fn status(&self) -> TaskStatus {
        self.inner_ref().task_status
    }
}

impl Debug for TaskControlBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskControlBlock")
            .field("pid", &self.pid.0)
            .finish()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Ready,
    Running,
    Sleeping,
    Zombie,
}
