//! VFS glue for the read-only FAT driver over a boot-provided RAM
//! image.

use alloc::boxed::Box;
use alloc::sync::Arc;

use fat::{FatEntry, FileCursor, PathKind, Volume, DIRENT_SIZE};
use nix::{CreateMode, Errno, Kstat, OpenFlags, Result, SeekWhence};
use spin::Mutex;

use super::vfs::{
    vfs_get_new_device_id, Fs, FsFlags, FsOps, ResolvedEntry, VfsDirEntry, VfsEntryType, VfsFile,
    VfsInode,
};

pub struct FatFs {
    vol: Arc<Volume>,
    device_id: u64,
}

impl FatFs {
    /// Entry behind an inode token (its byte offset; 0 is the synthetic
    /// root).
    fn entry_at(&self, inode: VfsInode) -> FatEntry {
        if inode == 0 {
            self.vol.root()
        } else {
            let off = inode as usize;
            FatEntry::decode(off, self.vol.image().bytes(off, DIRENT_SIZE))
        }
    }
}

fn kind_of(kind: PathKind) -> VfsEntryType {
    match kind {
        PathKind::None => VfsEntryType::None,
        PathKind::File => VfsEntryType::File,
        PathKind::Dir => VfsEntryType::Dir,
    }
}

impl FsOps for FatFs {
    fn get_entry(&self, dir: Option<VfsInode>, name: Option<&str>) -> Result<ResolvedEntry> {
        let dir_entry = dir.map(|i| self.entry_at(i));
        let resolved = self.vol.lookup(dir_entry.as_ref(), name);
        Ok(ResolvedEntry {
            inode: resolved.entry.map(|e| e.offset as VfsInode),
            parent: resolved.parent.offset as VfsInode,
            kind: kind_of(resolved.kind),
        })
    }

    fn open(
        &self,
        fs: &Arc<Fs>,
        entry: &ResolvedEntry,
        _name: &str,
        flags: OpenFlags,
        _mode: CreateMode,
    ) -> Result<Box<dyn VfsFile>> {
        let inode = match entry.inode {
            Some(inode) => inode,
            None => {
                if !fs.is_rw() && flags.contains(OpenFlags::O_CREAT) {
                    return Err(Errno::EROFS);
                }
                return Err(Errno::ENOENT);
            }
        };

        if flags.contains(OpenFlags::O_CREAT) && flags.contains(OpenFlags::O_EXCL) {
            return Err(Errno::EEXIST);
        }
        if !fs.is_rw() && flags.wants_write() {
            return Err(Errno::EROFS);
        }

        let e = self.entry_at(inode);
        Ok(Box::new(FatFile {
            fs: Arc::clone(fs),
            vol: Arc::clone(&self.vol),
            device_id: self.device_id,
            cursor: Mutex::new(FileCursor::new(&self.vol, e)),
            flags: Mutex::new(flags),
        }))
    }

    fn stat(&self, inode: VfsInode) -> Result<Kstat> {
        Ok(self.vol.stat(&self.entry_at(inode), self.device_id))
    }

    // retain/release: nothing to count on a read-only image; entries
    // live as long as the mount.
}

pub struct FatFile {
    fs: Arc<Fs>,
    vol: Arc<Volume>,
    device_id: u64,
    cursor: Mutex<FileCursor>,
    flags: Mutex<OpenFlags>,
}

impl VfsFile for FatFile {
    fn fs(&self) -> &Arc<Fs> {
        &self.fs
    }

    fn inode(&self) -> VfsInode {
        self.cursor.lock().entry().offset as VfsInode
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        // Read-only filesystem: the per-file shared lock is a no-op.
        let mut cursor = self.cursor.lock();
        Ok(cursor.read(&self.vol, buf))
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        // Writes can't reach a read-only filesystem through a valid
        // writable handle; the handle itself is the wrong kind.
        Err(Errno::EBADF)
    }

    fn seek(&self, off: i64, whence: SeekWhence) -> Result<i64> {
        self.cursor.lock().seek(&self.vol, off, whence)
    }

    fn fstat(&self) -> Result<Kstat> {
        Ok(self.vol.stat(self.cursor.lock().entry(), self.device_id))
    }

    fn dup(&self) -> Result<Box<dyn VfsFile>> {
        Ok(Box::new(FatFile {
            fs: Arc::clone(&self.fs),
            vol: Arc::clone(&self.vol),
            device_id: self.device_id,
            cursor: Mutex::new(self.cursor.lock().clone()),
            flags: Mutex::new(*self.flags.lock()),
        }))
    }

    fn pos(&self) -> i64 {
        self.cursor.lock().pos()
    }

    fn set_pos(&self, pos: i64) -> Result<()> {
        self.cursor.lock().seek(&self.vol, pos, SeekWhence::Set)?;
        Ok(())
    }

    fn getdents(&self, cb: &mut dyn FnMut(&VfsDirEntry<'_>) -> bool) -> Result<()> {
        let entry = *self.cursor.lock().entry();
        if !entry.is_dir() && !entry.is_volume_id() {
            return Err(Errno::ENOTDIR);
        }
        for item in self.vol.entries(&entry) {
            let de = VfsDirEntry {
                ino: item.entry.offset as u64,
                kind: if item.entry.is_dir() || item.entry.is_volume_id() {
                    VfsEntryType::Dir
                } else {
                    VfsEntryType::File
                },
                name: &item.name,
            };
            if !cb(&de) {
                break;
            }
        }
        Ok(())
    }
}

/// Mount a FAT image sitting in RAM. Only read-only mounts are
/// supported; the driver always re-walks directories, hence
/// `RQ_DE_SKIP`.
pub fn mount_ramdisk(vaddr: usize, flags: FsFlags) -> Result<Arc<Fs>> {
    if flags.contains(FsFlags::RW) {
        panic!("fat: r/w mode is not supported");
    }

    let vol = unsafe { Volume::mount_raw(vaddr as *const u8) }.map_err(|_| Errno::EINVAL)?;
    let device_id = vfs_get_new_device_id();
    let fatfs = Arc::new(FatFs {
        vol: Arc::new(vol),
        device_id,
    });
    Ok(Fs::new(
        "fat",
        flags | FsFlags::RQ_DE_SKIP,
        device_id,
        fatfs,
    ))
}

/// Unmounting just drops the records; the image itself belongs to the
/// bootloader.
pub fn umount_ramdisk(fs: Arc<Fs>) {
    drop(fs);
}
