//! Interior mutability for single-CPU kernel state.
//!
//! Safe only under this kernel's execution model: one logical CPU, and
//! every mutable borrow taken with interrupts disabled (or from a
//! context that cannot be re-entered).

use core::cell::{Ref, RefCell, RefMut};

pub struct SyncRefCell<T> {
    inner: RefCell<T>,
}

unsafe impl<T> Sync for SyncRefCell<T> {}

impl<T> SyncRefCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: RefCell::new(value),
        }
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.inner.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.inner.borrow_mut()
    }
}
