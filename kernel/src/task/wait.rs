//! Wait objects: the tag a sleeping task carries naming the resource
//! it waits for, so wake-up can target exactly the right sleepers.

/// A sleeping task has exactly one wait object; a runnable or running
/// task has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitObject {
    /// Blocked on the kernel mutex with this id.
    KMutex { id: u64 },
}

impl WaitObject {
    pub fn is_kmutex(&self, mutex_id: u64) -> bool {
        matches!(self, WaitObject::KMutex { id } if *id == mutex_id)
    }
}
