use core::fmt::Debug;

/// Register frame pushed by the interrupt stubs: segment registers,
/// the `pusha` block, the stub-pushed vector/error pair and the CPU's
/// own iret frame. `useresp`/`ss` are pushed by the CPU only on a
/// privilege-level change.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TrapFrame {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_num: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

impl Debug for TrapFrame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TrapFrame")
            .field("int_num", &self.int_num)
            .field("eip", &format_args!("{:#x}", self.eip))
            .field("cs", &format_args!("{:#x}", self.cs))
            .field("eflags", &format_args!("{:#x}", self.eflags))
            .field("eax", &format_args!("{:#x}", self.eax))
            .field("esp_dummy", &format_args!("{:#x}", self.esp_dummy))
            .finish()
    }
}
