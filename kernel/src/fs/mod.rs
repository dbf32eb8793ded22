//! Kernel filesystems: the VFS core, the mount table, a writable ramfs
//! root and the read-only FAT driver for the boot ramdisk.

pub mod fat;
pub mod mount;
pub mod ramfs;
pub mod vfs;

use nix::CreateMode;
use path::AbsolutePath;

pub use vfs::{
    vfs_fstat64, vfs_getdents64, vfs_mkdir, vfs_open, vfs_read, vfs_seek, vfs_stat64, vfs_unlink,
    vfs_write, Fs, FsFlags, FsOps, VfsFile,
};

/// Mount the ramfs root; when the bootloader handed over a ramdisk
/// module, mount the FAT image it carries under /disk.
pub fn init(ramdisk: Option<usize>) {
    mount::mount_root(ramfs::RamFs::new_fs());
    info!("vfs: ramfs root mounted");

    let Some(vaddr) = ramdisk else {
        info!("vfs: no boot ramdisk");
        return;
    };

    match fat::mount_ramdisk(vaddr, FsFlags::empty()) {
        Ok(fs) => {
            vfs_mkdir("/disk", CreateMode::from_bits_truncate(0o755))
                .expect("creating /disk on a fresh root cannot fail");
            mount::mount(AbsolutePath::new("/disk"), fs).expect("mounting /disk");
            info!("vfs: fat ramdisk at {:#x} mounted on /disk", vaddr);
        }
        Err(e) => warn!("vfs: ramdisk at {:#x} not mountable: {:?}", vaddr, e),
    }
}
