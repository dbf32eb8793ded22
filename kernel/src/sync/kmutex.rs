//! The blocking kernel mutex, layered on task sleep/wake.
//!
//! Contended lockers park themselves on the global sleeping list tagged
//! with the mutex id; `unlock` scans that list in its insertion order
//! (FIFO by time of blocking — the kernel's documented, stable wake-up
//! order) and hands ownership to the first matching sleeper directly.
//! None of these operations may be called from an IRQ handler.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::cell::SyncRefCell;
use crate::preempt::{disable_preemption, enable_preemption};
use crate::task::{
    self, current_task, wake_one_sleeping_where, TaskControlBlock, TaskStatus, WaitObject,
};
use crate::trap::in_irq_handler;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KMutexFlags: u32 {
        const RECURSIVE = 1 << 0;
    }
}

static NEXT_MUTEX_ID: AtomicU64 = AtomicU64::new(1);

struct KMutexInner {
    owner: Option<Arc<TaskControlBlock>>,
    /// Meaningful only with `RECURSIVE`; with a live owner it is >= 1.
    lock_count: u32,
}

pub struct KMutex {
    /// Non-zero and monotonic; 0 marks a destroyed mutex.
    id: AtomicU64,
    flags: KMutexFlags,
    inner: SyncRefCell<KMutexInner>,
}

impl KMutex {
    pub fn new(flags: KMutexFlags) -> Self {
        Self {
            id: AtomicU64::new(NEXT_MUTEX_ID.fetch_add(1, Ordering::Relaxed)),
            flags,
            inner: SyncRefCell::new(KMutexInner {
                owner: None,
                lock_count: 0,
            }),
        }
    }

    /// Invalidate the mutex. Any later operation on it is a bug; the
    /// zeroed id makes use-after-destroy detectable.
    pub fn destroy(&self) {
        disable_preemption();
        {
            let mut inner = self.inner.borrow_mut();
            assert!(inner.owner.is_none(), "destroying a held kmutex");
            inner.lock_count = 0;
        }
        self.id.store(0, Ordering::Relaxed);
        enable_preemption();
    }

    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Relaxed)
    }

    fn recursive(&self) -> bool {
        self.flags.contains(KMutexFlags::RECURSIVE)
    }

    fn is_owner(&self, inner: &KMutexInner, task: &Arc<TaskControlBlock>) -> bool {
        inner
            .owner
            .as_ref()
            .is_some_and(|owner| Arc::ptr_eq(owner, task))
    }

    pub fn is_held_by_current(&self) -> bool {
        let curr = current_task().expect("kmutex used without a current task");
        disable_preemption();
        let held = self.is_owner(&self.inner.borrow(), &curr);
        enable_preemption();
        held
    }

    pub fn lock(&self) {
        assert!(!in_irq_handler(), "kmutex_lock from IRQ context");
        assert!(self.id() != 0, "operation on a destroyed kmutex");
        disable_preemption();

        let curr = current_task().expect("kmutex used without a current task");
        {
            let mut inner = self.inner.borrow_mut();

            if inner.owner.is_none() {
                // Nobody owns this mutex, just take it.
                inner.owner = Some(curr);
                if self.recursive() {
                    inner.lock_count += 1;
                }
                drop(inner);
                enable_preemption();
                return;
            }

            if self.recursive() {
                assert!(inner.lock_count > 0);
                if self.is_owner(&inner, &curr) {
                    inner.lock_count += 1;
                    drop(inner);
                    enable_preemption();
                    return;
                }
            } else {
                assert!(
                    !self.is_owner(&inner, &curr),
                    "relock of a non-recursive kmutex by its owner"
                );
            }
        }

        // Contended: park on the sleeping list and give up the CPU
        // until the unlocking owner hands the mutex over.
        task::set_current_sleeping(WaitObject::KMutex { id: self.id() });
        enable_preemption();
        task::kernel_yield();

        // Woken only as the new owner.
        assert!(self.is_held_by_current());
        if self.recursive() {
            disable_preemption();
            assert!(self.inner.borrow().lock_count == 1);
            enable_preemption();
        }
    }

    /// Like `lock` but never sleeps. True iff the mutex was taken (or
    /// its count bumped, for a recursive mutex already held by the
    /// caller).
    pub fn try_lock(&self) -> bool {
        assert!(!in_irq_handler(), "kmutex_trylock from IRQ context");
        assert!(self.id() != 0, "operation on a destroyed kmutex");
        disable_preemption();

        let curr = current_task().expect("kmutex used without a current task");
        let mut inner = self.inner.borrow_mut();
        let mut success = false;

        if inner.owner.is_none() {
            inner.owner = Some(curr);
            success = true;
            if self.recursive() {
                inner.lock_count += 1;
            }
        } else if self.recursive() && self.is_owner(&inner, &curr) {
            inner.lock_count += 1;
            success = true;
        }

        drop(inner);
        enable_preemption();
        success
    }

    pub fn unlock(&self) {
        assert!(!in_irq_handler(), "kmutex_unlock from IRQ context");
        disable_preemption();

        let curr = current_task().expect("kmutex used without a current task");
        let mut inner = self.inner.borrow_mut();
        assert!(
            self.is_owner(&inner, &curr),
            "kmutex_unlock by a non-owner"
        );

        if self.recursive() {
            assert!(inner.lock_count > 0);
            inner.lock_count -= 1;
            if inner.lock_count > 0 {
                drop(inner);
                enable_preemption();
                return;
            }
            // lock_count reached 0: really release the mutex.
        }

        inner.owner = None;

        // Hand over to the first task sleeping on this mutex, if any.
        // State change, wait-object reset and ownership transfer happen
        // in one preemption-disabled section, so no third task can
        // observe a half-done hand-off.
        let id = self.id();
        if let Some(next) = wake_one_sleeping_where(|t| {
            t.wait_obj.map(|w| w.is_kmutex(id)).unwrap_or(false)
        }) {
            let mut next_inner = next.inner_mut();
            next_inner.wait_obj = None;
            next_inner.task_status = TaskStatus::Ready;
            drop(next_inner);

            inner.owner = Some(Arc::clone(&next));
            if self.recursive() {
                inner.lock_count = 1;
            }
            task::add_task(next);
        }

        drop(inner);
        enable_preemption();
    }
}

#[cfg(feature = "selftest")]
impl KMutex {
    /// Test-only peeks, raced only by design of the self-test.
    pub fn owner_pid(&self) -> Option<usize> {
        disable_preemption();
        let pid = self.inner.borrow().owner.as_ref().map(|t| t.pid());
        enable_preemption();
        pid
    }

    pub fn lock_count(&self) -> u32 {
        disable_preemption();
        let n = self.inner.borrow().lock_count;
        enable_preemption();
        n
    }
}
