//! VFS core: the filesystem record, the two operation tables and the
//! path-resolution façade.
//!
//! Locking policy: `read` takes the per-file shared lock and `write`
//! the exclusive one (inside the handle implementations); metadata
//! lookups take the per-filesystem shared lock; mount/unmount and
//! namespace mutation take the per-filesystem exclusive lock. Every
//! lock is a no-op on a read-only filesystem.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use core::sync::atomic::{AtomicU64, Ordering};

use nix::{CreateMode, DirEntryType, Dirent64Writer, Errno, Kstat, OpenFlags, Result, SeekWhence};
use path::AbsolutePath;
use spin::RwLock;

use crate::mm::copy_to_user;
use crate::preempt::is_preemption_enabled;

use super::mount;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FsFlags: u32 {
        /// Mounted writable.
        const RW = 1 << 0;
        /// The driver's `getdents` always re-walks the directory from
        /// the start, so the VFS must skip past the handle's position.
        const RQ_DE_SKIP = 1 << 1;
    }
}

/// Driver-opaque inode token: an entry offset for FAT, an inode number
/// for ramfs.
pub type VfsInode = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsEntryType {
    None,
    File,
    Dir,
    Symlink,
    CharDev,
    BlockDev,
    Pipe,
}

impl VfsEntryType {
    pub fn to_dirent_type(self) -> DirEntryType {
        match self {
            VfsEntryType::None => DirEntryType::Unknown,
            VfsEntryType::File => DirEntryType::Regular,
            VfsEntryType::Dir => DirEntryType::Dir,
            VfsEntryType::Symlink => DirEntryType::Symlink,
            VfsEntryType::CharDev => DirEntryType::CharDev,
            VfsEntryType::BlockDev => DirEntryType::BlockDev,
            VfsEntryType::Pipe => DirEntryType::Fifo,
        }
    }
}

/// One resolved path component.
pub struct ResolvedEntry {
    pub inode: Option<VfsInode>,
    pub parent: VfsInode,
    pub kind: VfsEntryType,
}

/// What a driver reports for each directory entry during `getdents`.
pub struct VfsDirEntry<'a> {
    pub ino: u64,
    pub kind: VfsEntryType,
    pub name: &'a str,
}

/// Per-filesystem operations.
pub trait FsOps: Send + Sync {
    /// Resolve one component of `dir`. Both arguments `None` resolves
    /// the filesystem root.
    fn get_entry(&self, dir: Option<VfsInode>, name: Option<&str>) -> Result<ResolvedEntry>;

    /// Open `entry` (the final resolved component; `name` is that
    /// component's name, used by `O_CREAT`). The returned handle owns
    /// one inode reference.
    fn open(
        &self,
        fs: &Arc<Fs>,
        entry: &ResolvedEntry,
        name: &str,
        flags: OpenFlags,
        mode: CreateMode,
    ) -> Result<Box<dyn VfsFile>>;

    fn stat(&self, inode: VfsInode) -> Result<Kstat>;

    fn retain_inode(&self, _inode: VfsInode) {}
    fn release_inode(&self, _inode: VfsInode) {}

    // Nullable mutators; read-only drivers keep the defaults.
    fn mkdir(&self, _dir: VfsInode, _name: &str, _mode: CreateMode) -> Result<()> {
        Err(Errno::EROFS)
    }
    fn unlink(&self, _dir: VfsInode, _name: &str) -> Result<()> {
        Err(Errno::EROFS)
    }
    fn symlink(&self, _dir: VfsInode, _name: &str, _target: &str) -> Result<()> {
        Err(Errno::EROFS)
    }
    fn truncate(&self, _inode: VfsInode, _size: usize) -> Result<()> {
        Err(Errno::EROFS)
    }
}

/// Per-handle operations. A handle is exclusively owned by the process
/// that opened it; `dup` yields an independent handle over the same
/// inode (whose reference count grows by one).
pub trait VfsFile: Send + Sync {
    fn fs(&self) -> &Arc<Fs>;
    fn inode(&self) -> VfsInode;

    /// Must hold the per-file shared lock for the duration.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;
    /// Must hold the per-file exclusive lock for the duration.
    fn write(&self, buf: &[u8]) -> Result<usize>;
    fn seek(&self, off: i64, whence: SeekWhence) -> Result<i64>;

    fn ioctl(&self, _request: usize, _arg: usize) -> Result<isize> {
        Err(Errno::EINVAL)
    }
    fn fcntl(&self, _cmd: usize, _arg: usize) -> Result<isize> {
        Err(Errno::EINVAL)
    }

    fn fstat(&self) -> Result<Kstat>;
    fn dup(&self) -> Result<Box<dyn VfsFile>>;

    /// Directory cursor (an entry index) backing `getdents64`
    /// resumption.
    fn pos(&self) -> i64;
    fn set_pos(&self, pos: i64) -> Result<()>;

    /// Report directory entries to `cb` until it returns `false`.
    /// Drivers on an `RQ_DE_SKIP` filesystem report from the first
    /// entry every time; the others start at the handle position.
    fn getdents(&self, cb: &mut dyn FnMut(&VfsDirEntry<'_>) -> bool) -> Result<()>;
}

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

pub fn vfs_get_new_device_id() -> u64 {
    NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A mounted filesystem.
pub struct Fs {
    pub fs_type_name: &'static str,
    pub flags: FsFlags,
    pub device_id: u64,
    lock: RwLock<()>,
    pub ops: Arc<dyn FsOps>,
}

impl Fs {
    pub fn new(
        fs_type_name: &'static str,
        flags: FsFlags,
        device_id: u64,
        ops: Arc<dyn FsOps>,
    ) -> Arc<Fs> {
        Arc::new(Fs {
            fs_type_name,
            flags,
            device_id,
            lock: RwLock::new(()),
            ops,
        })
    }

    pub fn is_rw(&self) -> bool {
        self.flags.contains(FsFlags::RW)
    }

    /// Run `f` under the filesystem shared lock (no-op when read-only).
    pub fn with_shlock<T>(&self, f: impl FnOnce() -> T) -> T {
        if !self.is_rw() {
            return f();
        }
        let _guard = self.lock.read();
        f()
    }

    /// Run `f` under the filesystem exclusive lock (no-op when
    /// read-only).
    pub fn with_exlock<T>(&self, f: impl FnOnce() -> T) -> T {
        if !self.is_rw() {
            return f();
        }
        let _guard = self.lock.write();
        f()
    }
}

/// Walk `path` on `fs` component by component through the driver's
/// `get_entry`.
fn resolve_on(fs: &Arc<Fs>, path: &AbsolutePath) -> Result<(ResolvedEntry, alloc::string::String)> {
    let mut current = fs.ops.get_entry(None, None)?;
    let mut last_name = alloc::string::String::new();

    let total = path.depth();
    for (i, comp) in path.components().enumerate() {
        if current.kind != VfsEntryType::Dir {
            return Err(Errno::ENOTDIR);
        }
        let dir = current.inode.ok_or(Errno::ENOENT)?;
        current = fs.ops.get_entry(Some(dir), Some(comp))?;
        if current.inode.is_none() && i + 1 != total {
            // A missing middle component is fatal; a missing final one
            // is the driver's O_CREAT decision.
            return Err(Errno::ENOENT);
        }
        last_name = comp.into();
    }
    Ok((current, last_name))
}

pub fn vfs_open(
    pathname: &str,
    flags: OpenFlags,
    mode: CreateMode,
) -> Result<Box<dyn VfsFile>> {
    let (fs, rel) = mount::resolve(&AbsolutePath::new(pathname))?;
    fs.with_shlock(|| {
        let (entry, name) = resolve_on(&fs, &rel)?;
        if flags.contains(OpenFlags::O_DIRECTORY)
            && entry.inode.is_some()
            && entry.kind != VfsEntryType::Dir
        {
            return Err(Errno::ENOTDIR);
        }
        fs.ops.open(&fs, &entry, &name, flags, mode)
    })
}

pub fn vfs_read(h: &dyn VfsFile, buf: &mut [u8]) -> Result<usize> {
    h.read(buf)
}

pub fn vfs_write(h: &dyn VfsFile, buf: &[u8]) -> Result<usize> {
    h.write(buf)
}

pub fn vfs_seek(h: &dyn VfsFile, off: i64, whence: SeekWhence) -> Result<i64> {
    h.seek(off, whence)
}

pub fn vfs_fstat64(h: &dyn VfsFile) -> Result<Kstat> {
    assert!(is_preemption_enabled());
    let fs = Arc::clone(h.fs());
    fs.with_shlock(|| h.fstat())
}

/// `stat(2)`: open read-only, fstat, close. Deliberately POSIX-like,
/// the result is 0 even when the implicit close fails — the answer is
/// already in hand.
pub fn vfs_stat64(pathname: &str) -> Result<Kstat> {
    let h = vfs_open(pathname, OpenFlags::O_RDONLY, CreateMode::empty())?;
    let st = vfs_fstat64(&*h)?;
    drop(h); // close
    Ok(st)
}

pub fn vfs_mkdir(pathname: &str, mode: CreateMode) -> Result<()> {
    let (fs, rel) = mount::resolve(&AbsolutePath::new(pathname))?;
    if rel.is_root() {
        return Err(Errno::EEXIST);
    }
    fs.with_exlock(|| {
        let (entry, name) = resolve_on(&fs, &rel)?;
        if entry.inode.is_some() {
            return Err(Errno::EEXIST);
        }
        fs.ops.mkdir(entry.parent, &name, mode)
    })
}

pub fn vfs_unlink(pathname: &str) -> Result<()> {
    let (fs, rel) = mount::resolve(&AbsolutePath::new(pathname))?;
    if rel.is_root() {
        return Err(Errno::EINVAL);
    }
    fs.with_exlock(|| {
        let (entry, name) = resolve_on(&fs, &rel)?;
        if entry.inode.is_none() {
            return Err(Errno::ENOENT);
        }
        fs.ops.unlink(entry.parent, &name)
    })
}

/// Upper bound for the kernel bounce buffer backing `getdents64`.
const GETDENTS_BUF_CAP: usize = 64 * 1024;

/// Format directory entries into `user_dirp` as `linux_dirent64`
/// records, resuming after the entries already returned through this
/// handle. Returns the bytes written; 0 means end of directory.
///
/// The resumption cursor is a plain entry index. If the directory is
/// modified between two calls, an entry created ahead of the cursor can
/// be returned twice and a removal before the cursor can make the
/// listing skip one; callers get the same guarantees Linux gives for a
/// concurrently modified directory.
pub fn vfs_getdents64(h: &dyn VfsFile, user_dirp: *mut u8, buf_size: usize) -> Result<usize> {
    assert!(is_preemption_enabled());
    let fs = Arc::clone(h.fs());

    let mut kbuf = vec![0u8; buf_size.min(GETDENTS_BUF_CAP)];
    let skip = fs.flags.contains(FsFlags::RQ_DE_SKIP);
    let start_pos = h.pos();

    let mut writer = Dirent64Writer::new(&mut kbuf);
    let mut index: i64 = 0;
    let mut emitted: i64 = 0;
    let mut push_err: Option<Errno> = None;

    fs.with_shlock(|| {
        h.getdents(&mut |de| {
            if skip && index < start_pos {
                // The driver restarted from the first entry; fast-forward
                // to where the previous call stopped.
                index += 1;
                return true;
            }
            match writer.push(de.ino, de.kind.to_dirent_type(), de.name) {
                Ok(true) => {
                    index += 1;
                    emitted += 1;
                    true
                }
                Ok(false) => false,
                Err(e) => {
                    push_err = Some(e);
                    false
                }
            }
        })
    })?;

    if let Some(e) = push_err {
        return Err(e);
    }

    let written = writer.written();
    copy_to_user(user_dirp, &kbuf[..written])?;
    h.set_pos(start_pos + emitted)?;
    Ok(written)
}
