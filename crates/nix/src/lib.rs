//! Linux-compatible ABI data structures shared by the kernel and its
//! filesystem drivers: errno values, `stat64`, `linux_dirent64` records,
//! open/seek flags, ioctl requests and the termios boundary types.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
extern crate bitflags;

pub mod dirent;
pub mod errno;
pub mod fs;
pub mod ioctl;
pub mod termios;

pub use dirent::*;
pub use errno::*;
pub use fs::*;
pub use ioctl::*;
pub use termios::*;
