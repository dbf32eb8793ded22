//! Directory iteration with long-file-name assembly.
//!
//! On disk a long-named file is stored as its LFN slots in reverse
//! order (highest chunk first, flagged with `LAST_LONG_ENTRY`) followed
//! by the owning short entry whose checksum ties the chain together:
//!
//! fileA_lfn_n .. fileA_lfn_1, fileA_short, fileB_lfn_n .. and so on.

use alloc::string::String;
use alloc::vec::Vec;

use crate::chain::ClusterWalker;
use crate::entry::{slot_is_long_name, FatEntry, LongEntry};
use crate::volume::Volume;
use crate::{DIRENT_SIZE, DIR_ENTRY_LAST_AND_UNUSED, DIR_ENTRY_UNUSED, LAST_LONG_ENTRY};

/// One listed entry: the short entry plus its display name (assembled
/// long name when present, rendered 8.3 name otherwise).
#[derive(Debug, Clone)]
pub struct DirItem {
    pub entry: FatEntry,
    pub name: String,
}

/// Where a directory's 32-byte slots live: the FAT12/16 root is a flat
/// region in front of the data area, everything else is a cluster chain.
enum Slots<'v> {
    Flat {
        vol: &'v Volume,
        offset: usize,
        remaining: usize,
    },
    Chain {
        vol: &'v Volume,
        walker: ClusterWalker<'v>,
        cluster_base: usize,
        cluster_data: &'v [u8],
        pos: usize,
    },
}

impl<'v> Slots<'v> {
    fn next_slot(&mut self) -> Option<(usize, &'v [u8])> {
        match self {
            Slots::Flat {
                vol,
                offset,
                remaining,
            } => {
                if *remaining == 0 {
                    return None;
                }
                let v: &'v Volume = *vol;
                let off = *offset;
                *offset += DIRENT_SIZE;
                *remaining -= 1;
                Some((off, v.image().bytes(off, DIRENT_SIZE)))
            }
            Slots::Chain {
                vol,
                walker,
                cluster_base,
                cluster_data,
                pos,
            } => {
                if *pos >= cluster_data.len() {
                    let (cluster, data) = walker.next()?;
                    *cluster_base = vol.bpb().cluster_offset(cluster);
                    *cluster_data = data;
                    *pos = 0;
                }
                let data: &'v [u8] = *cluster_data;
                let off = *cluster_base + *pos;
                let raw = &data[*pos..*pos + DIRENT_SIZE];
                *pos += DIRENT_SIZE;
                Some((off, raw))
            }
        }
    }
}

pub struct DirIter<'v> {
    slots: Slots<'v>,
    done: bool,
    lfn_units: Vec<u16>,
    lfn_checksum: Option<u8>,
}

impl<'v> DirIter<'v> {
    pub fn new(vol: &'v Volume, dir: &FatEntry) -> Self {
        let cluster = vol.first_cluster_of(dir);
        let slots = if cluster == 0 {
            // FAT12/16 root region.
            Slots::Flat {
                vol,
                offset: vol.bpb().root_dir_offset(),
                remaining: vol.bpb().root_ent_cnt,
            }
        } else {
            Slots::Chain {
                vol,
                walker: ClusterWalker::new(vol, cluster),
                cluster_base: 0,
                cluster_data: &[],
                pos: 0,
            }
        };
        Self {
            slots,
            done: false,
            lfn_units: Vec::new(),
            lfn_checksum: None,
        }
    }

    fn reset_lfn(&mut self) {
        self.lfn_units.clear();
        self.lfn_checksum = None;
    }

    fn take_long_name(&mut self, entry: &FatEntry) -> Option<String> {
        let checksum = self.lfn_checksum.take()?;
        let units = core::mem::take(&mut self.lfn_units);
        (checksum == entry.checksum() && !units.is_empty())
            .then(|| String::from_utf16_lossy(&units))
    }
}

impl<'v> Iterator for DirIter<'v> {
    type Item = DirItem;

    fn next(&mut self) -> Option<DirItem> {
        if self.done {
            return None;
        }
        while let Some((offset, raw)) = self.slots.next_slot() {
            match raw[0] {
                DIR_ENTRY_LAST_AND_UNUSED => {
                    self.done = true;
                    return None;
                }
                DIR_ENTRY_UNUSED => {
                    self.reset_lfn();
                    continue;
                }
                _ => {}
            }

            if slot_is_long_name(raw) {
                let le = LongEntry::decode(raw);
                if le.ord & LAST_LONG_ENTRY != 0 {
                    // Highest chunk opens a fresh name.
                    self.reset_lfn();
                    self.lfn_checksum = Some(le.checksum);
                }
                // Slots arrive highest-chunk first; prepend.
                let mut units = Vec::with_capacity(le.units().len() + self.lfn_units.len());
                units.extend_from_slice(le.units());
                units.extend_from_slice(&self.lfn_units);
                self.lfn_units = units;
                continue;
            }

            let entry = FatEntry::decode(offset, raw);
            let name = self
                .take_long_name(&entry)
                .unwrap_or_else(|| entry.short_name());
            self.reset_lfn();
            return Some(DirItem { entry, name });
        }
        self.done = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use crate::testimg::ImageBuilder;

    #[test]
    fn lists_flat_root_in_slot_order() {
        let mut b = ImageBuilder::fat16(1);
        b.add_root_file("A", b"x");
        b.add_root_file("BB", b"yy");
        b.add_root_file("CCC", b"zzz");
        let vol = b.build_volume();

        let names: Vec<String> = vol.entries(&vol.root()).map(|i| i.name).collect();
        assert_eq!(names, ["A", "BB", "CCC"]);
    }

    #[test]
    fn assembles_long_names() {
        let mut b = ImageBuilder::fat16(1);
        b.add_root_file("a-rather-long-file-name.txt", b"payload");
        let vol = b.build_volume();

        let items: Vec<_> = vol.entries(&vol.root()).collect();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "a-rather-long-file-name.txt");
        assert_eq!(items[0].entry.size, 7);
    }

    #[test]
    fn corrupt_lfn_checksum_falls_back_to_short_name() {
        let mut b = ImageBuilder::fat16(1);
        b.add_root_file("longish-name.bin", b"d");
        b.corrupt_last_lfn_checksum();
        let vol = b.build_volume();

        let items: Vec<_> = vol.entries(&vol.root()).collect();
        assert_eq!(items.len(), 1);
        // Generated 8.3 alias of the long name.
        assert_eq!(items[0].name, "LONGIS~1.BIN");
    }

    #[test]
    fn deleted_entries_are_skipped() {
        let mut b = ImageBuilder::fat16(1);
        b.add_root_file("KEEP", b"k");
        b.add_root_file("DEAD", b"d");
        b.delete_root_entry("DEAD");
        let vol = b.build_volume();

        let names: Vec<String> = vol.entries(&vol.root()).map(|i| i.name).collect();
        assert_eq!(names, ["KEEP"]);
    }

    #[test]
    fn walks_subdirectory_chains() {
        let mut b = ImageBuilder::fat32(1);
        let d = b.add_root_dir("SUB");
        b.add_file_in(d, "INNER", b"inner");
        let vol = b.build_volume();

        let sub = vol.lookup(None, Some("SUB")).entry.unwrap();
        let names: Vec<String> = vol.entries(&sub).map(|i| i.name).collect();
        // "." and ".." head every subdirectory.
        assert_eq!(names, [".", "..", "INNER"]);
    }
}
