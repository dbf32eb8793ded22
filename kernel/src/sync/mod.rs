mod kmutex;

pub use kmutex::{KMutex, KMutexFlags};
