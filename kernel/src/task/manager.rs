use alloc::collections::VecDeque;
use alloc::sync::Arc;

use hashbrown::HashMap;
use spin::Mutex;

use super::task::{TaskControlBlock, TaskControlBlockInner, TaskStatus};
use crate::preempt::{disable_preemption, enable_preemption};

/// FIFO scheduler queues. `sleeping` keeps tasks in the order they went
/// to sleep; that insertion order is the kernel's documented, stable
/// wake-up scan order (the mutex hand-off depends on it).
pub struct TaskManager {
    ready_queue: VecDeque<Arc<TaskControlBlock>>,
    sleeping: VecDeque<Arc<TaskControlBlock>>,
    /// Exited tasks. The entry keeps the control block (and with it the
    /// kernel stack the task died on) alive until a reaper collects it.
    zombies: VecDeque<Arc<TaskControlBlock>>,
}

impl TaskManager {
    pub const fn new() -> Self {
        Self {
            ready_queue: VecDeque::new(),
            sleeping: VecDeque::new(),
            zombies: VecDeque::new(),
        }
    }

    pub fn add(&mut self, task: Arc<TaskControlBlock>) {
        self.ready_queue.push_back(task);
    }

    pub fn fetch(&mut self) -> Option<Arc<TaskControlBlock>> {
        self.ready_queue.pop_front()
    }

    pub fn push_sleeping(&mut self, task: Arc<TaskControlBlock>) {
        self.sleeping.push_back(task);
    }

    /// Scan the sleeping list in order and take out the first task the
    /// predicate accepts. The caller transitions it to `Ready` and
    /// requeues it.
    pub fn wake_one_sleeping_where(
        &mut self,
        pred: impl Fn(&TaskControlBlockInner) -> bool,
    ) -> Option<Arc<TaskControlBlock>> {
        let idx = self.sleeping.iter().position(|task| {
            let inner = task.inner_ref();
            assert!(inner.task_status == TaskStatus::Sleeping);
            pred(&inner)
        })?;
        self.sleeping.remove(idx)
    }

    pub fn add_zombie(&mut self, task: Arc<TaskControlBlock>) {
        self.zombies.push_back(task);
    }

    pub fn sleeping_len(&self) -> usize {
        self.sleeping.len()
    }
}

lazy_static! {
    pub static ref TASK_MANAGER: Mutex<TaskManager> = Mutex::new(TaskManager::new());
    pub static ref PID2TCB: Mutex<HashMap<usize, Arc<TaskControlBlock>>> =
        Mutex::new(HashMap::new());
}

/// The queue locks are only taken with preemption disabled, so the IRQ
/// bottom half can never spin on a lock its own interrupted task holds.
fn locked<T>(f: impl FnOnce() -> T) -> T {
    disable_preemption();
    let ret = f();
    enable_preemption();
    ret
}

pub fn add_task(task: Arc<TaskControlBlock>) {
    locked(|| {
        PID2TCB.lock().insert(task.pid(), Arc::clone(&task));
        TASK_MANAGER.lock().add(task);
    })
}

pub fn fetch_task() -> Option<Arc<TaskControlBlock>> {
    locked(|| TASK_MANAGER.lock().fetch())
}

pub fn push_sleeping(task: Arc<TaskControlBlock>) {
    locked(|| TASK_MANAGER.lock().push_sleeping(task))
}

pub fn wake_one_sleeping_where(
    pred: impl Fn(&TaskControlBlockInner) -> bool,
) -> Option<Arc<TaskControlBlock>> {
    locked(|| TASK_MANAGER.lock().wake_one_sleeping_where(pred))
}

pub fn add_zombie(task: Arc<TaskControlBlock>) {
    locked(|| TASK_MANAGER.lock().add_zombie(task))
}

pub fn pid2task(pid: usize) -> Option<Arc<TaskControlBlock>> {
    locked(|| PID2TCB.lock().get(&pid).map(Arc::clone))
}

pub fn remove_from_pid2task(pid: usize) {
    locked(|| {
        if PID2TCB.lock().remove(&pid).is_none() {
            panic!("cannot find pid {} in pid2task", pid);
        }
    })
}
