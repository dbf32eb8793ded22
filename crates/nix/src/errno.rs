//! Linux error numbers used by the kernel, see
//! <https://man7.org/linux/man-pages/man3/errno.3.html>
//!
//! Syscall-style entry points return `isize` with `-errno` on failure;
//! internal fallible paths use [`Result`] and convert at the edge.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Errno>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[repr(isize)]
pub enum Errno {
    /// No such file or directory
    #[error("No such file or directory")]
    ENOENT = 2,
    /// Bad file descriptor (closed handle, wrong handle type, write on a
    /// read-only filesystem)
    #[error("Bad file descriptor")]
    EBADF = 9,
    /// Out of memory
    #[error("Out of memory")]
    ENOMEM = 12,
    /// Bad address (user-memory copy failure)
    #[error("Bad address")]
    EFAULT = 14,
    /// File exists
    #[error("File exists")]
    EEXIST = 17,
    /// Not a directory
    #[error("Not a directory")]
    ENOTDIR = 20,
    /// Invalid argument
    #[error("Invalid argument")]
    EINVAL = 22,
    /// Too many open files
    #[error("Too many open files")]
    EMFILE = 24,
    /// Read-only file system
    #[error("Read-only file system")]
    EROFS = 30,
    /// Too many levels of symbolic links
    #[error("Too many levels of symbolic links")]
    ELOOP = 40,
}

impl Errno {
    /// The `-errno` value placed in the return register at the ABI edge.
    pub fn as_ret(self) -> isize {
        -(self as isize)
    }
}

/// Collapse a `Result` into the syscall return convention: a non-negative
/// payload on success, `-errno` on failure.
pub fn as_syscall_ret(res: Result<isize>) -> isize {
    match res {
        Ok(v) => v,
        Err(e) => e.as_ret(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_integers() {
        assert_eq!(Errno::ENOENT as isize, 2);
        assert_eq!(Errno::EBADF as isize, 9);
        assert_eq!(Errno::ENOMEM as isize, 12);
        assert_eq!(Errno::EFAULT as isize, 14);
        assert_eq!(Errno::EEXIST as isize, 17);
        assert_eq!(Errno::ENOTDIR as isize, 20);
        assert_eq!(Errno::EINVAL as isize, 22);
        assert_eq!(Errno::EROFS as isize, 30);
    }

    #[test]
    fn ret_convention() {
        assert_eq!(Errno::EINVAL.as_ret(), -22);
        assert_eq!(as_syscall_ret(Ok(6000)), 6000);
        assert_eq!(as_syscall_ret(Err(Errno::EFAULT)), -14);
    }
}
