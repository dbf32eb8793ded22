//! The mount table: which filesystem serves which part of the
//! namespace.

use alloc::sync::Arc;
use alloc::vec::Vec;

use nix::{Errno, Result};
use path::AbsolutePath;
use spin::Mutex;

use super::vfs::Fs;

const MOUNT_LIMIT: usize = 16;

pub struct MountTable {
    root: Option<Arc<Fs>>,
    mounts: Vec<(AbsolutePath, Arc<Fs>)>,
}

impl MountTable {
    const fn new() -> Self {
        Self {
            root: None,
            mounts: Vec::new(),
        }
    }
}

lazy_static! {
    static ref MNT_TABLE: Mutex<MountTable> = Mutex::new(MountTable::new());
}

pub fn mount_root(fs: Arc<Fs>) {
    let mut table = MNT_TABLE.lock();
    assert!(table.root.is_none(), "root filesystem mounted twice");
    table.root = Some(fs);
}

/// Attach `fs` at `at`. Namespace mutation, so the incoming filesystem
/// is held exclusively while the table changes.
pub fn mount(at: AbsolutePath, fs: Arc<Fs>) -> Result<()> {
    fs.clone().with_exlock(|| {
        let mut table = MNT_TABLE.lock();
        if table.mounts.len() >= MOUNT_LIMIT {
            return Err(Errno::EMFILE);
        }
        if table.mounts.iter().any(|(p, _)| *p == at) {
            return Err(Errno::EEXIST);
        }
        table.mounts.push((at, fs));
        Ok(())
    })
}

pub fn umount(at: &AbsolutePath) -> Result<()> {
    let mut table = MNT_TABLE.lock();
    let idx = table
        .mounts
        .iter()
        .position(|(p, _)| p == at)
        .ok_or(Errno::ENOENT)?;
    let (_, fs) = table.mounts.remove(idx);
    fs.with_exlock(|| ());
    Ok(())
}

pub fn root_fs() -> Arc<Fs> {
    Arc::clone(MNT_TABLE.lock().root.as_ref().expect("no root filesystem"))
}

/// Longest-prefix match of `path` against the mount points; the
/// remainder is the path within the chosen filesystem.
pub fn resolve(path: &AbsolutePath) -> Result<(Arc<Fs>, AbsolutePath)> {
    let table = MNT_TABLE.lock();
    let mut best: Option<(&AbsolutePath, &Arc<Fs>)> = None;
    for (at, fs) in table.mounts.iter() {
        if path.starts_with(at) && best.map(|(b, _)| at.depth() > b.depth()).unwrap_or(true) {
            best = Some((at, fs));
        }
    }
    if let Some((at, fs)) = best {
        let rel = path.strip_prefix(at).unwrap();
        return Ok((Arc::clone(fs), rel));
    }
    let root = table.root.as_ref().ok_or(Errno::ENOENT)?;
    Ok((Arc::clone(root), path.clone()))
}
