//! Ramfs: a writable filesystem living entirely in kernel memory.
//!
//! Directories keep their entries in a `BTreeMap` keyed by name, which
//! gives O(log n) lookup, duplicate-free inserts and the lexicographic
//! iteration order `getdents` relies on. File data lives in page-sized
//! blocks indexed by their (page-aligned) byte offset in a second
//! `BTreeMap`; unpopulated ranges are holes and read back as zeros.
//! Symlink inodes store only their target path and own no blocks.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use hashbrown::HashMap;
use nix::{
    CreateMode, Errno, Kstat, OpenFlags, Result, SeekWhence, S_IFDIR, S_IFLNK, S_IFREG,
};
use spin::{Mutex, RwLock};

use super::vfs::{
    vfs_get_new_device_id, Fs, FsFlags, FsOps, ResolvedEntry, VfsDirEntry, VfsEntryType, VfsFile,
    VfsInode,
};
use crate::consts::PAGE_SIZE;
use crate::timer;

/// Longest entry name; longer ones are rejected outright.
pub const RAMFS_ENTRY_MAX_LEN: usize = 230;

const ROOT_INODE: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamfsInodeKind {
    File,
    Dir,
    Symlink,
}

/// One page of file data. The offset keying it into the block tree is
/// always a multiple of `PAGE_SIZE`, so blocks never overlap.
struct RamfsBlock {
    data: Box<[u8]>,
}

impl RamfsBlock {
    fn zeroed() -> Self {
        Self {
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
        }
    }
}

enum RamfsPayload {
    File { blocks: BTreeMap<usize, RamfsBlock> },
    Dir { entries: BTreeMap<String, Arc<RamfsInode>> },
    Symlink { target: String },
}

struct RamfsInodeInner {
    nlink: u32,
    mode: u32,
    size: usize,
    parent: u64,
    ctime: i64,
    mtime: i64,
    payload: RamfsPayload,
}

impl RamfsInodeInner {
    fn entries(&self) -> &BTreeMap<String, Arc<RamfsInode>> {
        match &self.payload {
            RamfsPayload::Dir { entries } => entries,
            _ => panic!("directory payload expected"),
        }
    }

    fn entries_mut(&mut self) -> &mut BTreeMap<String, Arc<RamfsInode>> {
        match &mut self.payload {
            RamfsPayload::Dir { entries } => entries,
            _ => panic!("directory payload expected"),
        }
    }

    fn blocks(&self) -> &BTreeMap<usize, RamfsBlock> {
        match &self.payload {
            RamfsPayload::File { blocks } => blocks,
            _ => panic!("file payload expected"),
        }
    }

    fn blocks_mut(&mut self) -> &mut BTreeMap<usize, RamfsBlock> {
        match &mut self.payload {
            RamfsPayload::File { blocks } => blocks,
            _ => panic!("file payload expected"),
        }
    }
}

pub struct RamfsInode {
    num: u64,
    kind: RamfsInodeKind,
    /// Live-handle count; the inode is freed once this and `nlink` are
    /// both zero.
    refcount: AtomicUsize,
    inner: RwLock<RamfsInodeInner>,
}

impl RamfsInode {
    fn vfs_kind(&self) -> VfsEntryType {
        match self.kind {
            RamfsInodeKind::File => VfsEntryType::File,
            RamfsInodeKind::Dir => VfsEntryType::Dir,
            RamfsInodeKind::Symlink => VfsEntryType::Symlink,
        }
    }
}

struct RamfsState {
    device_id: u64,
    next_inode: AtomicU64,
    /// All live inodes by number, the token handed to the VFS.
    inodes: Mutex<HashMap<u64, Arc<RamfsInode>>>,
}

impl RamfsState {
    fn now() -> i64 {
        timer::get_time_s() as i64
    }

    fn alloc_inode(&self, kind: RamfsInodeKind, mode: u32, parent: u64) -> Arc<RamfsInode> {
        let num = self.next_inode.fetch_add(1, Ordering::Relaxed);
        let now = Self::now();
        let payload = match kind {
            RamfsInodeKind::File => RamfsPayload::File {
                blocks: BTreeMap::new(),
            },
            RamfsInodeKind::Dir => RamfsPayload::Dir {
                entries: BTreeMap::new(),
            },
            RamfsInodeKind::Symlink => RamfsPayload::Symlink {
                target: String::new(),
            },
        };
        let inode = Arc::new(RamfsInode {
            num,
            kind,
            refcount: AtomicUsize::new(0),
            inner: RwLock::new(RamfsInodeInner {
                nlink: 0,
                mode,
                size: 0,
                parent,
                ctime: now,
                mtime: now,
                payload,
            }),
        });
        self.inodes.lock().insert(num, Arc::clone(&inode));
        inode
    }

    fn inode(&self, token: VfsInode) -> Result<Arc<RamfsInode>> {
        self.inodes.lock().get(&token).cloned().ok_or(Errno::ENOENT)
    }

    fn retain(&self, inode: &RamfsInode) {
        inode.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop one handle reference; the last reference of an unlinked
    /// inode releases the inode (and with it every block).
    fn release(&self, inode: &RamfsInode) {
        let prev = inode.refcount.fetch_sub(1, Ordering::Relaxed);
        assert!(prev > 0, "ramfs inode refcount underflow");
        if prev == 1 && inode.inner.read().nlink == 0 {
            self.inodes.lock().remove(&inode.num);
        }
    }

    /// Link `child` into `dir` under `name`. The directory's exclusive
    /// lock is held; duplicates are refused.
    fn insert_entry(
        &self,
        dir: &Arc<RamfsInode>,
        name: &str,
        child: Arc<RamfsInode>,
    ) -> Result<()> {
        if name.is_empty() || name.len() > RAMFS_ENTRY_MAX_LEN {
            return Err(Errno::EINVAL);
        }
        let mut inner = dir.inner.write();
        let entries = inner.entries_mut();
        if entries.contains_key(name) {
            return Err(Errno::EEXIST);
        }
        child.inner.write().nlink += 1;
        entries.insert(String::from(name), child);
        inner.mtime = Self::now();
        Ok(())
    }

    /// Wire a fresh directory's `.` and `..` entries. `.` is a self
    /// link, `..` links the parent.
    fn wire_dir(&self, dir: &Arc<RamfsInode>, parent: &Arc<RamfsInode>) {
        {
            let mut inner = dir.inner.write();
            let entries = inner.entries_mut();
            entries.insert(String::from("."), Arc::clone(dir));
            entries.insert(String::from(".."), Arc::clone(parent));
        }
        dir.inner.write().nlink += 1;
        parent.inner.write().nlink += 1;
    }

    /// Undo a failed allocation so nothing half-created lingers.
    fn discard_inode(&self, inode: &RamfsInode) {
        self.inodes.lock().remove(&inode.num);
    }
}

pub struct RamFs {
    state: Arc<RamfsState>,
}

impl RamFs {
    /// Build an empty ramfs and wrap it in a mountable [`Fs`].
    pub fn new_fs() -> Arc<Fs> {
        let device_id = vfs_get_new_device_id();
        let state = Arc::new(RamfsState {
            device_id,
            next_inode: AtomicU64::new(ROOT_INODE),
            inodes: Mutex::new(HashMap::new()),
        });

        let root = state.alloc_inode(RamfsInodeKind::Dir, 0o755, ROOT_INODE);
        assert!(root.num == ROOT_INODE);
        // The root is its own parent; `.` and `..` both resolve to it.
        state.wire_dir(&root, &root);

        Fs::new(
            "ramfs",
            FsFlags::RW,
            device_id,
            Arc::new(RamFs { state }),
        )
    }

    fn dir_inode(&self, token: VfsInode) -> Result<Arc<RamfsInode>> {
        let inode = self.state.inode(token)?;
        if inode.kind != RamfsInodeKind::Dir {
            return Err(Errno::ENOTDIR);
        }
        Ok(inode)
    }
}

impl FsOps for RamFs {
    fn get_entry(&self, dir: Option<VfsInode>, name: Option<&str>) -> Result<ResolvedEntry> {
        let dir_token = dir.unwrap_or(ROOT_INODE);
        let name = match name {
            None => {
                return Ok(ResolvedEntry {
                    inode: Some(ROOT_INODE),
                    parent: ROOT_INODE,
                    kind: VfsEntryType::Dir,
                })
            }
            Some(n) => n,
        };

        let dir = self.dir_inode(dir_token)?;
        let inner = dir.inner.read();
        let found = inner.entries().get(name);
        Ok(ResolvedEntry {
            inode: found.map(|i| i.num),
            kind: found.map(|i| i.vfs_kind()).unwrap_or(VfsEntryType::None),
            parent: dir_token,
        })
    }

    fn open(
        &self,
        fs: &Arc<Fs>,
        entry: &ResolvedEntry,
        name: &str,
        flags: OpenFlags,
        mode: CreateMode,
    ) -> Result<Box<dyn VfsFile>> {
        let inode = match entry.inode {
            Some(token) => {
                if flags.contains(OpenFlags::O_CREAT) && flags.contains(OpenFlags::O_EXCL) {
                    return Err(Errno::EEXIST);
                }
                self.state.inode(token)?
            }
            None => {
                if !flags.contains(OpenFlags::O_CREAT) {
                    return Err(Errno::ENOENT);
                }
                let parent = self.dir_inode(entry.parent)?;
                let child =
                    self.state
                        .alloc_inode(RamfsInodeKind::File, mode.bits() & 0o777, parent.num);
                if let Err(e) = self.state.insert_entry(&parent, name, Arc::clone(&child)) {
                    self.state.discard_inode(&child);
                    return Err(e);
                }
                child
            }
        };

        if flags.contains(OpenFlags::O_TRUNC)
            && flags.wants_write()
            && inode.kind == RamfsInodeKind::File
        {
            self.truncate(inode.num, 0)?;
        }

        self.state.retain(&inode);
        Ok(Box::new(RamfsFile {
            fs: Arc::clone(fs),
            state: Arc::clone(&self.state),
            inode,
            pos: Mutex::new(0),
            flags: Mutex::new(flags),
        }))
    }

    fn stat(&self, token: VfsInode) -> Result<Kstat> {
        let inode = self.state.inode(token)?;
        let inner = inode.inner.read();
        let mut st = Kstat::new();
        st.st_dev = self.state.device_id;
        st.st_ino = inode.num;
        st.st_mode = inner.mode
            | match inode.kind {
                RamfsInodeKind::File => S_IFREG,
                RamfsInodeKind::Dir => S_IFDIR,
                RamfsInodeKind::Symlink => S_IFLNK,
            };
        st.st_nlink = inner.nlink;
        st.st_size = inner.size as i64;
        st.st_blksize = PAGE_SIZE as i32;
        let blocks_count = match &inner.payload {
            RamfsPayload::File { blocks } => blocks.len(),
            _ => 0,
        };
        st.st_blocks = (blocks_count * PAGE_SIZE / 512) as u64;
        st.st_ctime_sec = inner.ctime;
        st.st_mtime_sec = inner.mtime;
        st.st_atime_sec = inner.mtime;
        Ok(st)
    }

    fn retain_inode(&self, token: VfsInode) {
        if let Ok(inode) = self.state.inode(token) {
            self.state.retain(&inode);
        }
    }

    fn release_inode(&self, token: VfsInode) {
        if let Ok(inode) = self.state.inode(token) {
            self.state.release(&inode);
        }
    }

    fn mkdir(&self, dir: VfsInode, name: &str, mode: CreateMode) -> Result<()> {
        let parent = self.dir_inode(dir)?;
        {
            let inner = parent.inner.read();
            if inner.entries().contains_key(name) {
                return Err(Errno::EEXIST);
            }
        }
        let child = self
            .state
            .alloc_inode(RamfsInodeKind::Dir, mode.bits() & 0o777, parent.num);
        self.state.wire_dir(&child, &parent);
        if let Err(e) = self.state.insert_entry(&parent, name, Arc::clone(&child)) {
            self.state.discard_inode(&child);
            return Err(e);
        }
        Ok(())
    }

    fn unlink(&self, dir: VfsInode, name: &str) -> Result<()> {
        if name == "." || name == ".." {
            return Err(Errno::EINVAL);
        }
        let parent = self.dir_inode(dir)?;
        let mut inner = parent.inner.write();
        let entries = inner.entries_mut();

        let child = entries.get(name).ok_or(Errno::ENOENT)?.clone();
        if child.kind == RamfsInodeKind::Dir {
            return Err(Errno::EINVAL);
        }
        entries.remove(name);
        inner.mtime = RamfsState::now();
        drop(inner);

        let nlink = {
            let mut child_inner = child.inner.write();
            child_inner.nlink -= 1;
            child_inner.nlink
        };
        if nlink == 0 && child.refcount.load(Ordering::Relaxed) == 0 {
            // No name and no handle left: free the inode and its blocks.
            self.state.inodes.lock().remove(&child.num);
        }
        Ok(())
    }

    fn symlink(&self, dir: VfsInode, name: &str, target: &str) -> Result<()> {
        let parent = self.dir_inode(dir)?;
        let child = self
            .state
            .alloc_inode(RamfsInodeKind::Symlink, 0o777, parent.num);
        {
            let mut inner = child.inner.write();
            inner.size = target.len();
            inner.payload = RamfsPayload::Symlink {
                target: String::from(target),
            };
        }
        if let Err(e) = self.state.insert_entry(&parent, name, Arc::clone(&child)) {
            self.state.discard_inode(&child);
            return Err(e);
        }
        Ok(())
    }

    fn truncate(&self, token: VfsInode, new_size: usize) -> Result<()> {
        let inode = self.state.inode(token)?;
        if inode.kind != RamfsInodeKind::File {
            return Err(Errno::EINVAL);
        }
        let mut inner = inode.inner.write();
        if new_size < inner.size {
            let blocks = inner.blocks_mut();
            // Whole blocks past the new end go away...
            let doomed: alloc::vec::Vec<usize> = blocks
                .range(round_up_page(new_size)..)
                .map(|(off, _)| *off)
                .collect();
            for off in doomed {
                blocks.remove(&off);
            }
            // ...and the final partial block is wiped beyond the size.
            let last_page = round_down_page(new_size);
            if let Some(block) = blocks.get_mut(&last_page) {
                block.data[new_size - last_page..].fill(0);
            }
        }
        inner.size = new_size;
        inner.mtime = RamfsState::now();
        Ok(())
    }
}

fn round_down_page(v: usize) -> usize {
    v & !(PAGE_SIZE - 1)
}

fn round_up_page(v: usize) -> usize {
    (v + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

pub struct RamfsFile {
    fs: Arc<Fs>,
    state: Arc<RamfsState>,
    inode: Arc<RamfsInode>,
    pos: Mutex<i64>,
    flags: Mutex<OpenFlags>,
}

impl Drop for RamfsFile {
    fn drop(&mut self) {
        self.state.release(&self.inode);
    }
}

impl VfsFile for RamfsFile {
    fn fs(&self) -> &Arc<Fs> {
        &self.fs
    }

    fn inode(&self) -> VfsInode {
        self.inode.num
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        // Per-file shared lock.
        let inner = self.inode.inner.read();

        if let RamfsPayload::Symlink { target } = &inner.payload {
            let mut pos = self.pos.lock();
            let bytes = target.as_bytes();
            if *pos as usize >= bytes.len() {
                return Ok(0);
            }
            let n = buf.len().min(bytes.len() - *pos as usize);
            buf[..n].copy_from_slice(&bytes[*pos as usize..*pos as usize + n]);
            *pos += n as i64;
            return Ok(n);
        }
        if self.inode.kind != RamfsInodeKind::File {
            return Err(Errno::EBADF);
        }

        let mut pos_guard = self.pos.lock();
        let pos = *pos_guard as usize;
        if pos >= inner.size {
            return Ok(0);
        }

        let n = buf.len().min(inner.size - pos);
        let blocks = inner.blocks();
        let mut done = 0;
        while done < n {
            let off = pos + done;
            let page = round_down_page(off);
            let in_page = off - page;
            let chunk = (PAGE_SIZE - in_page).min(n - done);
            match blocks.get(&page) {
                Some(block) => {
                    buf[done..done + chunk].copy_from_slice(&block.data[in_page..in_page + chunk])
                }
                // A hole: never written, reads as zeros.
                None => buf[done..done + chunk].fill(0),
            }
            done += chunk;
        }

        *pos_guard += n as i64;
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.inode.kind != RamfsInodeKind::File {
            return Err(Errno::EBADF);
        }
        // Per-file exclusive lock.
        let mut inner = self.inode.inner.write();
        let mut pos_guard = self.pos.lock();

        if self.flags.lock().contains(OpenFlags::O_APPEND) {
            *pos_guard = inner.size as i64;
        }
        let pos = *pos_guard as usize;

        let mut done = 0;
        while done < buf.len() {
            let off = pos + done;
            let page = round_down_page(off);
            let in_page = off - page;
            let chunk = (PAGE_SIZE - in_page).min(buf.len() - done);
            let block = inner
                .blocks_mut()
                .entry(page)
                .or_insert_with(RamfsBlock::zeroed);
            block.data[in_page..in_page + chunk].copy_from_slice(&buf[done..done + chunk]);
            done += chunk;
        }

        inner.size = inner.size.max(pos + buf.len());
        inner.mtime = RamfsState::now();
        *pos_guard += buf.len() as i64;
        Ok(buf.len())
    }

    fn seek(&self, off: i64, whence: SeekWhence) -> Result<i64> {
        let size = self.inode.inner.read().size as i64;
        let mut pos = self.pos.lock();
        let target = match whence {
            SeekWhence::Set => off,
            SeekWhence::Cur => *pos + off,
            SeekWhence::End => size + off,
        };
        if target < 0 {
            return Err(Errno::EINVAL);
        }
        // Seeking past the end is allowed; a later write fills the gap
        // and reads see a hole.
        *pos = target;
        Ok(target)
    }

    fn fstat(&self) -> Result<Kstat> {
        let ramfs = RamFs {
            state: Arc::clone(&self.state),
        };
        ramfs.stat(self.inode.num)
    }

    fn dup(&self) -> Result<Box<dyn VfsFile>> {
        self.state.retain(&self.inode);
        Ok(Box::new(RamfsFile {
            fs: Arc::clone(&self.fs),
            state: Arc::clone(&self.state),
            inode: Arc::clone(&self.inode),
            pos: Mutex::new(*self.pos.lock()),
            flags: Mutex::new(*self.flags.lock()),
        }))
    }

    fn pos(&self) -> i64 {
        *self.pos.lock()
    }

    fn set_pos(&self, pos: i64) -> Result<()> {
        if pos < 0 {
            return Err(Errno::EINVAL);
        }
        *self.pos.lock() = pos;
        Ok(())
    }

    fn getdents(&self, cb: &mut dyn FnMut(&VfsDirEntry<'_>) -> bool) -> Result<()> {
        if self.inode.kind != RamfsInodeKind::Dir {
            return Err(Errno::ENOTDIR);
        }
        let start = *self.pos.lock() as usize;
        let inner = self.inode.inner.read();
        for (name, child) in inner.entries().iter().skip(start) {
            let de = VfsDirEntry {
                ino: child.num,
                kind: child.vfs_kind(),
                name,
            };
            if !cb(&de) {
                break;
            }
        }
        Ok(())
    }
}
