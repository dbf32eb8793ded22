//! `ioctl(2)` request numbers understood at the TTY boundary.

pub const TCGETS: usize = 0x5401;
pub const TCSETS: usize = 0x5402;
pub const TCSETSW: usize = 0x5403;
pub const TCSETSF: usize = 0x5404;
pub const TIOCGPGRP: usize = 0x540f;
pub const TIOCSPGRP: usize = 0x5410;
pub const TIOCGWINSZ: usize = 0x5413;

// linux/kd.h
pub const KDSETMODE: usize = 0x4b3a;
pub const KD_TEXT: usize = 0x00;
pub const KD_GRAPHICS: usize = 0x01;
pub const KDGKBMODE: usize = 0x4b44;
pub const KDSKBMODE: usize = 0x4b45;
pub const K_RAW: usize = 0x00;
pub const K_XLATE: usize = 0x01;
