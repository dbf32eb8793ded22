//! The mounted volume: geometry, path-component resolution and per-file
//! cursors.

use nix::{Errno, Kstat, SeekWhence, S_IFDIR, S_IFREG};

use crate::bpb::{Bpb, FatType};
use crate::chain::{fat_entry, is_bad_cluster, is_end_of_chain};
use crate::dir::{DirItem, DirIter};
use crate::entry::FatEntry;
use crate::image::RamImage;
use crate::{datetime::DateTime, FatError, INVALID_CLUSTER};

/// Outcome of resolving one path component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    None,
    File,
    Dir,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedPath {
    pub entry: Option<FatEntry>,
    pub parent: FatEntry,
    pub kind: PathKind,
}

pub struct Volume {
    image: RamImage,
    bpb: Bpb,
    fat_type: FatType,
    cluster_size: usize,
    root_cluster: u32,
    root_entry: FatEntry,
}

impl Volume {
    pub fn mount(image: RamImage) -> Result<Self, FatError> {
        let bpb = Bpb::parse(&image)?;
        let fat_type = bpb.fat_type();
        // FAT12/16 root is a flat region, not a chain; cluster stays 0.
        let root_cluster = match fat_type {
            FatType::Fat32 => bpb.root_clus,
            _ => 0,
        };
        Ok(Self {
            image,
            cluster_size: bpb.cluster_size(),
            root_cluster,
            root_entry: FatEntry::synthetic_root(root_cluster),
            fat_type,
            bpb,
        })
    }

    /// Mount a bootloader-provided image, sizing it from its own boot
    /// sector.
    ///
    /// # Safety
    /// See [`RamImage::from_raw_header`].
    pub unsafe fn mount_raw(vaddr: *const u8) -> Result<Self, FatError> {
        Self::mount(RamImage::from_raw_header(vaddr)?)
    }

    pub fn bpb(&self) -> &Bpb {
        &self.bpb
    }

    pub fn image(&self) -> &RamImage {
        &self.image
    }

    pub fn fat_type(&self) -> FatType {
        self.fat_type
    }

    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    pub fn root(&self) -> FatEntry {
        self.root_entry
    }

    /// First cluster, with the root special case folded in. Stays 0 for
    /// the FAT12/16 root, whose slots are not a cluster chain.
    pub fn first_cluster_of(&self, e: &FatEntry) -> u32 {
        if e.is_root() {
            self.root_cluster
        } else {
            e.first_cluster
        }
    }

    pub fn cluster_data(&self, cluster: u32) -> &[u8] {
        self.image
            .bytes(self.bpb.cluster_offset(cluster), self.cluster_size)
    }

    /// Iterate the entries of `dir` (volume-id entries are listed as
    /// directories).
    pub fn entries<'v>(&'v self, dir: &FatEntry) -> DirIter<'v> {
        debug_assert!(dir.is_dir() || dir.is_volume_id());
        DirIter::new(self, dir)
    }

    pub fn count_dirents(&self, dir: &FatEntry) -> usize {
        self.entries(dir).count()
    }

    /// Case-sensitive search for one component of `dir`.
    pub fn find(&self, dir: &FatEntry, name: &str) -> Option<DirItem> {
        self.entries(dir).find(|item| item.name == name)
    }

    /// Resolve one path component.
    ///
    /// With neither a base directory nor a name this yields the root.
    /// `.`/`..` at the root stay at the root, and any match that turns
    /// out to be the root chain itself (cluster 0, or the stored root
    /// cluster on FAT32 — e.g. `..` entries of first-level directories)
    /// is substituted with the synthetic root entry.
    pub fn lookup(&self, dir: Option<&FatEntry>, name: Option<&str>) -> ResolvedPath {
        let root_path = ResolvedPath {
            entry: Some(self.root_entry),
            parent: self.root_entry,
            kind: PathKind::Dir,
        };

        let name = match name {
            None => return root_path,
            Some(n) => n,
        };
        let base = dir.copied().unwrap_or(self.root_entry);

        if base.is_root() && (name == "." || name == "..") {
            return root_path;
        }

        let mut kind = PathKind::None;
        let entry = self.find(&base, name).map(|item| {
            let mut e = item.entry;
            if e.is_dir() {
                kind = PathKind::Dir;
                let clu = e.first_cluster;
                if clu == 0 || clu == self.root_cluster {
                    e = self.root_entry;
                }
            } else {
                kind = PathKind::File;
            }
            e
        });

        ResolvedPath {
            entry,
            parent: base,
            kind,
        }
    }

    /// Fill a `stat64` for `entry`. The inode number is the entry's byte
    /// offset from the header, which is unique and stable on a read-only
    /// image.
    pub fn stat(&self, entry: &FatEntry, device_id: u64) -> Kstat {
        let mut st = Kstat::new();
        st.st_dev = device_id;
        st.st_ino = entry.offset as u64;
        st.st_mode = 0o555
            | if entry.is_dir() || entry.is_volume_id() {
                S_IFDIR
            } else {
                S_IFREG
            };
        st.st_nlink = 1;
        st.st_size = entry.size as i64;
        st.st_blksize = 4096;
        st.st_blocks = entry.size as u64 / 512;
        st.st_ctime_sec =
            DateTime::from_fat(entry.crt_date, entry.crt_time, entry.crt_time_tenth).to_unix();
        st.st_mtime_sec = DateTime::from_fat(entry.wrt_date, entry.wrt_time, 0).to_unix();
        st.st_atime_sec = st.st_mtime_sec;
        st
    }
}

/// A file (or directory) position: byte offset plus the cluster holding
/// it. `curr_cluster` turns [`INVALID_CLUSTER`] once the position moves
/// past the end of the chain.
#[derive(Clone)]
pub struct FileCursor {
    entry: FatEntry,
    pos: i64,
    curr_cluster: u32,
}

impl FileCursor {
    pub fn new(vol: &Volume, entry: FatEntry) -> Self {
        Self {
            pos: 0,
            curr_cluster: vol.first_cluster_of(&entry),
            entry,
        }
    }

    pub fn entry(&self) -> &FatEntry {
        &self.entry
    }

    pub fn pos(&self) -> i64 {
        self.pos
    }

    pub fn rewind(&mut self, vol: &Volume) {
        self.pos = 0;
        self.curr_cluster = vol.first_cluster_of(&self.entry);
    }

    /// Sequential read at the cursor. Returns the number of bytes
    /// copied; 0 at (or past) end-of-file.
    pub fn read(&mut self, vol: &Volume, buf: &mut [u8]) -> usize {
        let fsize = self.entry.size as i64;
        if self.pos >= fsize {
            // The cursor is at the end or past the end: nothing to read.
            return 0;
        }

        let cs = vol.cluster_size() as i64;
        let mut written = 0usize;

        loop {
            let data = vol.cluster_data(self.curr_cluster);

            let file_rem = fsize - self.pos;
            let buf_rem = (buf.len() - written) as i64;
            let cluster_off = (self.pos % cs) as usize;
            let cluster_rem = cs - cluster_off as i64;
            let to_read = cluster_rem.min(buf_rem).min(file_rem);
            debug_assert!(to_read >= 0);

            buf[written..written + to_read as usize]
                .copy_from_slice(&data[cluster_off..cluster_off + to_read as usize]);
            written += to_read as usize;
            self.pos += to_read;

            if to_read < cluster_rem {
                // Buffer or file exhausted inside this cluster.
                break;
            }

            let fatval = fat_entry(vol, self.curr_cluster);
            if is_end_of_chain(vol.fat_type(), fatval) {
                assert!(self.pos == fsize);
                break;
            }
            assert!(!is_bad_cluster(vol.fat_type(), fatval));
            self.curr_cluster = fatval;
        }

        written
    }

    /// `lseek` semantics. Directories accept only `SEEK_SET` within
    /// `[0, entry_count]` (the position is an entry index there); files
    /// translate the whence, reject negative absolute positions, and may
    /// seek past the end.
    pub fn seek(&mut self, vol: &Volume, off: i64, whence: SeekWhence) -> nix::Result<i64> {
        if self.entry.is_dir() || self.entry.is_volume_id() {
            if whence != SeekWhence::Set {
                return Err(Errno::EINVAL);
            }
            if off < 0 || off > vol.count_dirents(&self.entry) as i64 {
                return Err(Errno::EINVAL);
            }
            self.pos = off;
            return Ok(self.pos);
        }

        let target = match whence {
            SeekWhence::Set => off,
            SeekWhence::Cur => self.pos + off,
            SeekWhence::End => self.entry.size as i64 + off,
        };
        if target < 0 {
            return Err(Errno::EINVAL);
        }

        if target < self.pos {
            // The chain only links forward; restart from cluster 0.
            self.rewind(vol);
        }
        self.seek_forward(vol, target - self.pos);
        Ok(self.pos)
    }

    fn seek_forward(&mut self, vol: &Volume, dist: i64) {
        debug_assert!(dist >= 0);
        let fsize = self.entry.size as i64;

        if dist == 0 {
            return;
        }
        if self.pos + dist > fsize {
            // Allow, like Linux does, to seek past the end of a file.
            self.pos += dist;
            self.curr_cluster = INVALID_CLUSTER;
            return;
        }

        let cs = vol.cluster_size() as i64;
        let mut moved = 0i64;

        loop {
            let file_rem = fsize - self.pos;
            let dist_rem = dist - moved;
            let cluster_rem = cs - self.pos % cs;
            let to_move = cluster_rem.min(dist_rem).min(file_rem);
            debug_assert!(to_move >= 0);

            moved += to_move;
            self.pos += to_move;

            if to_move < cluster_rem {
                break;
            }

            let fatval = fat_entry(vol, self.curr_cluster);
            if is_end_of_chain(vol.fat_type(), fatval) {
                assert!(self.pos == fsize);
                break;
            }
            assert!(!is_bad_cluster(vol.fat_type(), fatval));
            self.curr_cluster = fatval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testimg::{crt_stamp, wrt_stamp, ImageBuilder};

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn read_all(vol: &Volume, cursor: &mut FileCursor, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let n = cursor.read(vol, &mut buf);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    fn volume_with_big_file() -> (Volume, Vec<u8>) {
        // 6000-byte file on 4096-byte clusters: two clusters, the second
        // partially used.
        let content = pattern(6000);
        let mut b = ImageBuilder::fat16(8);
        b.add_root_file("BIG.TXT", &content);
        (b.build_volume(), content)
    }

    #[test]
    fn read_roundtrip_for_every_chunk_size() {
        let (vol, content) = volume_with_big_file();
        let entry = vol.lookup(None, Some("BIG.TXT")).entry.unwrap();
        let cluster_size = vol.cluster_size();
        assert_eq!(cluster_size, 4096);

        for chunk in [1, 512, cluster_size, cluster_size + 1, content.len()] {
            let mut cursor = FileCursor::new(&vol, entry);
            assert_eq!(read_all(&vol, &mut cursor, chunk), content, "chunk={}", chunk);
            assert_eq!(cursor.pos(), content.len() as i64);
            let mut buf = [0u8; 8];
            assert_eq!(cursor.read(&vol, &mut buf), 0);
        }
    }

    #[test]
    fn oversized_buffer_drains_the_file_in_one_call() {
        let (vol, content) = volume_with_big_file();
        let entry = vol.lookup(None, Some("BIG.TXT")).entry.unwrap();
        let mut cursor = FileCursor::new(&vol, entry);

        let mut buf = vec![0u8; 10000];
        assert_eq!(cursor.read(&vol, &mut buf), 6000);
        assert_eq!(&buf[..6000], &content[..]);
        assert_eq!(cursor.read(&vol, &mut buf), 0);
    }

    #[test]
    fn seek_past_end_then_read_returns_zero() {
        let (vol, _) = volume_with_big_file();
        let entry = vol.lookup(None, Some("BIG.TXT")).entry.unwrap();
        let mut cursor = FileCursor::new(&vol, entry);

        assert_eq!(cursor.seek(&vol, 6000 + 123, SeekWhence::Set), Ok(6123));
        let mut buf = [0u8; 16];
        assert_eq!(cursor.read(&vol, &mut buf), 0);
    }

    #[test]
    fn seek_to_negative_position_is_einval() {
        let (vol, _) = volume_with_big_file();
        let entry = vol.lookup(None, Some("BIG.TXT")).entry.unwrap();
        let mut cursor = FileCursor::new(&vol, entry);

        assert_eq!(cursor.seek(&vol, 0, SeekWhence::Set), Ok(0));
        assert_eq!(cursor.seek(&vol, -1, SeekWhence::Cur), Err(Errno::EINVAL));
        assert_eq!(cursor.seek(&vol, -1, SeekWhence::Set), Err(Errno::EINVAL));
        assert_eq!(cursor.seek(&vol, -6001, SeekWhence::End), Err(Errno::EINVAL));
    }

    #[test]
    fn backward_seek_rewinds_and_walks_forward_again() {
        let (vol, content) = volume_with_big_file();
        let entry = vol.lookup(None, Some("BIG.TXT")).entry.unwrap();
        let mut cursor = FileCursor::new(&vol, entry);

        assert_eq!(cursor.seek(&vol, 5000, SeekWhence::Set), Ok(5000));
        assert_eq!(cursor.seek(&vol, 100, SeekWhence::Set), Ok(100));
        let mut buf = [0u8; 32];
        assert_eq!(cursor.read(&vol, &mut buf), 32);
        assert_eq!(&buf[..], &content[100..132]);

        assert_eq!(cursor.seek(&vol, -1, SeekWhence::End), Ok(5999));
        let mut one = [0u8; 4];
        assert_eq!(cursor.read(&vol, &mut one), 1);
        assert_eq!(one[0], content[5999]);
    }

    #[test]
    fn directory_seek_is_set_only_and_bounded() {
        let mut b = ImageBuilder::fat16(1);
        b.add_root_file("A", b"1");
        b.add_root_file("B", b"2");
        let vol = b.build_volume();
        let mut cursor = FileCursor::new(&vol, vol.root());

        assert_eq!(cursor.seek(&vol, 2, SeekWhence::Set), Ok(2));
        assert_eq!(cursor.seek(&vol, 0, SeekWhence::Set), Ok(0));
        assert_eq!(cursor.seek(&vol, 3, SeekWhence::Set), Err(Errno::EINVAL));
        assert_eq!(cursor.seek(&vol, -1, SeekWhence::Set), Err(Errno::EINVAL));
        assert_eq!(cursor.seek(&vol, 0, SeekWhence::Cur), Err(Errno::EINVAL));
        assert_eq!(cursor.seek(&vol, 0, SeekWhence::End), Err(Errno::EINVAL));
    }

    #[test]
    fn lookup_of_the_root_and_dot_entries() {
        let vol = ImageBuilder::fat16(1).build_volume();

        let p = vol.lookup(None, None);
        assert_eq!(p.kind, PathKind::Dir);
        assert!(p.entry.unwrap().is_root());

        for name in [".", ".."] {
            let p = vol.lookup(None, Some(name));
            assert!(p.entry.unwrap().is_root());
            assert_eq!(p.kind, PathKind::Dir);
        }
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let mut b = ImageBuilder::fat16(1);
        b.add_root_file("KEEP", b"k");
        let vol = b.build_volume();

        assert_eq!(vol.lookup(None, Some("KEEP")).kind, PathKind::File);
        let miss = vol.lookup(None, Some("keep"));
        assert_eq!(miss.kind, PathKind::None);
        assert!(miss.entry.is_none());
        assert!(miss.parent.is_root());
    }

    #[test]
    fn dotdot_of_a_first_level_dir_resolves_to_the_root() {
        let mut b = ImageBuilder::fat32(1);
        b.add_root_dir("SUB");
        let vol = b.build_volume();

        let sub = vol.lookup(None, Some("SUB")).entry.unwrap();
        assert!(!sub.is_root());

        // ".." carries cluster 0; the resolved entry must be the
        // synthetic root, not a dangling chain.
        let up = vol.lookup(Some(&sub), Some(".."));
        assert_eq!(up.kind, PathKind::Dir);
        assert!(up.entry.unwrap().is_root());
    }

    #[test]
    fn stat_reports_offset_inode_mode_and_times() {
        let mut b = ImageBuilder::fat16(1);
        b.add_root_file("DATA.BIN", &pattern(1536));
        b.add_root_dir("ETC");
        b.add_root_volume_id("OPALDISK");
        let ino_file = b.entry_offset("DATA.BIN") as u64;
        let ino_dir = b.entry_offset("ETC") as u64;
        let vol = b.build_volume();

        let file = vol.lookup(None, Some("DATA.BIN")).entry.unwrap();
        let st = vol.stat(&file, 7);
        assert_eq!(st.st_dev, 7);
        assert_eq!(st.st_ino, ino_file);
        assert_eq!(st.st_mode, 0o555 | S_IFREG);
        assert_eq!(st.st_size, 1536);
        assert_eq!(st.st_blksize, 4096);
        assert_eq!(st.st_blocks, 3);
        let (wd, wt) = wrt_stamp();
        let (cd, ct) = crt_stamp();
        assert_eq!(st.st_mtime_sec, DateTime::from_fat(wd, wt, 0).to_unix());
        assert_eq!(st.st_ctime_sec, DateTime::from_fat(cd, ct, 0).to_unix());
        assert_eq!(st.st_atime_sec, st.st_mtime_sec);

        let dir = vol.lookup(None, Some("ETC")).entry.unwrap();
        let st = vol.stat(&dir, 7);
        assert_eq!(st.st_ino, ino_dir);
        assert_eq!(st.st_mode, 0o555 | S_IFDIR);

        // Volume-id entries count as directories for listing purposes.
        let vid = vol.entries(&vol.root()).find(|i| i.name == "OPALDISK").unwrap();
        assert_eq!(vol.stat(&vid.entry, 7).st_mode, 0o555 | S_IFDIR);
    }

    #[test]
    fn fat12_file_spanning_three_clusters() {
        let content = pattern(512 * 2 + 100);
        let mut b = ImageBuilder::fat12(1);
        b.add_root_file("SPAN.DAT", &content);
        let vol = b.build_volume();
        assert_eq!(vol.fat_type(), FatType::Fat12);

        let entry = vol.lookup(None, Some("SPAN.DAT")).entry.unwrap();
        let mut cursor = FileCursor::new(&vol, entry);
        assert_eq!(read_all(&vol, &mut cursor, 700), content);
    }

    #[test]
    fn empty_file_reads_nothing() {
        let mut b = ImageBuilder::fat16(1);
        b.add_root_file("EMPTY", b"");
        let vol = b.build_volume();

        let entry = vol.lookup(None, Some("EMPTY")).entry.unwrap();
        assert_eq!(entry.first_cluster, 0);
        let mut cursor = FileCursor::new(&vol, entry);
        let mut buf = [0u8; 4];
        assert_eq!(cursor.read(&vol, &mut buf), 0);
        assert_eq!(cursor.seek(&vol, 0, SeekWhence::Set), Ok(0));
    }

    #[test]
    fn count_dirents_sees_every_live_entry() {
        let mut b = ImageBuilder::fat16(1);
        b.add_root_file("A", b"1");
        b.add_root_file("BB", b"22");
        b.add_root_file("CCC", b"333");
        b.delete_root_entry("BB");
        let vol = b.build_volume();
        assert_eq!(vol.count_dirents(&vol.root()), 2);
    }
}
