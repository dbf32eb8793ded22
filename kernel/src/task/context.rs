use core::fmt::Debug;

/// Saved scheduling context. On i386 the callee-saved registers and the
/// return address live on the task's kernel stack; only the stack
/// pointer itself needs a home.
#[repr(C)]
pub struct TaskContext {
    pub esp: usize,
}

impl TaskContext {
    pub const fn empty() -> Self {
        Self { esp: 0 }
    }

    pub fn with_esp(esp: usize) -> Self {
        Self { esp }
    }
}

impl Debug for TaskContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "TaskContext {{ esp: {:#x} }}", self.esp)
    }
}
