pub const KERNEL_HEAP_SIZE: usize = 0x40_0000;
pub const KERNEL_STACK_SIZE: usize = 0x4000;
pub const PAGE_SIZE: usize = 0x1000;

/// Kernel image and heap live above this boundary; user mappings stay
/// below it. The fallible user-copy primitives enforce it.
pub const USER_SPACE_END: usize = 0xC000_0000;

/// Legacy IRQ lines behind the two cascaded PICs.
pub const IRQ_COUNT: usize = 16;
/// Vector base after remapping the PICs.
pub const IRQ_VECTOR_BASE: u8 = 32;
