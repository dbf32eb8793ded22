//! Boot-time self tests for the pieces that need a live scheduler:
//! kernel-mutex recursion, contended hand-off and the IRQ bookkeeping.
//! Runs as the first kernel task when built with `--features selftest`.

use core::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use crate::preempt::{disable_preemption, enable_preemption};
use crate::sync::{KMutex, KMutexFlags};
use crate::task::{self, kernel_yield, TaskStatus, WaitObject};
use crate::timer;
use crate::trap::{self, TrapFrame};

lazy_static! {
    static ref M_REC: KMutex = KMutex::new(KMutexFlags::RECURSIVE);
    static ref M_PLAIN: KMutex = KMutex::new(KMutexFlags::empty());
}

static TRYLOCK_RESULT: AtomicI32 = AtomicI32::new(-1);
static ORDER: AtomicUsize = AtomicUsize::new(0);
static B_ORDER: AtomicUsize = AtomicUsize::new(usize::MAX);
static C_ORDER: AtomicUsize = AtomicUsize::new(usize::MAX);

pub fn run() {
    info!("selftest: start");
    recursive_counting();
    contended_handoff();
    irq_bookkeeping();
    info!("selftest: all checks passed");
}

fn trylock_task() {
    TRYLOCK_RESULT.store(M_REC.try_lock() as i32, Ordering::SeqCst);
}

/// Three nested locks leave the owner with a count of three; the mutex
/// only frees once the count unwinds to zero, and a second task's
/// try_lock fails throughout.
fn recursive_counting() {
    M_REC.lock();
    M_REC.lock();
    M_REC.lock();
    assert!(M_REC.is_held_by_current());
    assert_eq!(M_REC.lock_count(), 3);

    M_REC.unlock();
    M_REC.unlock();
    assert_eq!(M_REC.lock_count(), 1);
    assert!(M_REC.is_held_by_current());

    task::spawn_kernel(trylock_task);
    while TRYLOCK_RESULT.load(Ordering::SeqCst) == -1 {
        kernel_yield();
    }
    assert_eq!(TRYLOCK_RESULT.load(Ordering::SeqCst), 0);
    assert!(M_REC.is_held_by_current());

    M_REC.unlock();
    assert_eq!(M_REC.owner_pid(), None);
    assert_eq!(M_REC.lock_count(), 0);

    assert!(M_REC.try_lock());
    M_REC.unlock();
    info!("selftest: recursive counting ok");
}

fn waiter_b() {
    M_PLAIN.lock();
    B_ORDER.store(ORDER.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
    M_PLAIN.unlock();
}

fn waiter_c() {
    M_PLAIN.lock();
    C_ORDER.store(ORDER.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
    M_PLAIN.unlock();
}

/// Two tasks block on a held mutex; unlock hands ownership to the one
/// that blocked first, atomically, while the other keeps sleeping with
/// its wait object intact.
fn contended_handoff() {
    M_PLAIN.lock();

    let b = task::spawn_kernel(waiter_b);
    let c = task::spawn_kernel(waiter_c);

    while b.status() != TaskStatus::Sleeping || c.status() != TaskStatus::Sleeping {
        kernel_yield();
    }
    let expected = Some(WaitObject::KMutex { id: M_PLAIN.id() });
    assert_eq!(b.inner_ref().wait_obj, expected);
    assert_eq!(c.inner_ref().wait_obj, expected);

    // Keep the hand-off and the observation in one non-preemptible
    // window, so a tick cannot let B run before we look.
    disable_preemption();
    M_PLAIN.unlock();
    assert_eq!(M_PLAIN.owner_pid(), Some(b.pid()));
    assert_eq!(b.status(), TaskStatus::Ready);
    assert!(b.inner_ref().wait_obj.is_none());
    assert_eq!(c.status(), TaskStatus::Sleeping);
    assert_eq!(c.inner_ref().wait_obj, expected);
    enable_preemption();

    while C_ORDER.load(Ordering::SeqCst) == usize::MAX {
        kernel_yield();
    }
    assert!(B_ORDER.load(Ordering::SeqCst) < C_ORDER.load(Ordering::SeqCst));
    assert_eq!(M_PLAIN.owner_pid(), None);
    info!("selftest: contended hand-off ok");
}

fn dummy_handler(_frame: &mut TrapFrame) -> i32 {
    0
}

/// The timer ticks, nothing spurious fired, and install/uninstall steer
/// the mask bit of a line.
fn irq_bookkeeping() {
    let t0 = timer::ticks();
    while timer::ticks() < t0 + 5 {
        kernel_yield();
    }

    let spurious = trap::spurious_irq_count();
    if spurious != 0 {
        warn!("selftest: {} spurious IRQs since boot", spurious);
    }
    assert_eq!(trap::unhandled_irq_count(0), 0);

    trap::install_handler(5, dummy_handler);
    assert_eq!(trap::irq::pics(|p| p.read_imr()) & 1 << 5, 0);
    trap::uninstall_handler(5);
    assert_ne!(trap::irq::pics(|p| p.read_imr()) & 1 << 5, 0);

    info!("selftest: irq bookkeeping ok, {} ticks", timer::ticks());
}
