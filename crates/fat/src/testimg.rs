//! Synthetic in-memory FAT images for the test suite.
//!
//! The builder lays out boot sector, one FAT, the FAT12/16 flat root
//! region and a data area, then plants files/directories the same way
//! a formatter would (LFN chains in reverse order followed by the 8.3
//! alias entry).

use std::collections::HashMap;

use crate::bpb::FatType;
use crate::image::RamImage;
use crate::lfn_checksum;
use crate::volume::Volume;
use crate::{ATTR_DIRECTORY, ATTR_LONG_NAME, ATTR_VOLUME_ID, DIRENT_SIZE, LONG_NAME_LEN_CAP};

pub(crate) fn fat_date(year: u32, month: u32, day: u32) -> u16 {
    ((year - 1980) << 9 | month << 5 | day) as u16
}

pub(crate) fn fat_time(hour: u32, min: u32, sec: u32) -> u16 {
    (hour << 11 | min << 5 | sec / 2) as u16
}

// Timestamps stamped on every created entry.
pub(crate) fn wrt_stamp() -> (u16, u16) {
    (fat_date(2023, 6, 15), fat_time(12, 34, 56))
}

pub(crate) fn crt_stamp() -> (u16, u16) {
    (fat_date(2022, 1, 2), fat_time(8, 30, 0))
}

pub(crate) struct ImageBuilder {
    bytes: Vec<u8>,
    fat_type: FatType,
    bps: usize,
    spc: usize,
    rsvd: usize,
    nfats: usize,
    fat_sz: usize,
    root_ent_cnt: usize,
    next_free: u32,
    // next slot index per directory (key 0 = the flat root)
    slot_cursor: HashMap<u32, usize>,
    // slot offsets per created name, LFN slots included
    name_slots: HashMap<String, Vec<usize>>,
    last_lfn_slots: Vec<usize>,
}

impl ImageBuilder {
    pub fn fat12(spc: usize) -> Self {
        Self::new(FatType::Fat12, spc, 1000)
    }

    pub fn fat16(spc: usize) -> Self {
        Self::new(FatType::Fat16, spc, 8000)
    }

    pub fn fat32(spc: usize) -> Self {
        Self::new(FatType::Fat32, spc, 68000)
    }

    fn new(fat_type: FatType, spc: usize, clusters: usize) -> Self {
        let bps = 512usize;
        let (rsvd, root_ent_cnt) = match fat_type {
            FatType::Fat32 => (32, 0),
            _ => (1, 512),
        };
        let nfats = 1;
        let fat_entries = clusters + 2;
        let fat_bytes = match fat_type {
            FatType::Fat12 => (fat_entries * 3 + 1) / 2,
            FatType::Fat16 => fat_entries * 2,
            FatType::Fat32 => fat_entries * 4,
        };
        let fat_sz = (fat_bytes + bps - 1) / bps;
        let root_sectors = root_ent_cnt * DIRENT_SIZE / bps;
        let tot_sec = rsvd + nfats * fat_sz + root_sectors + clusters * spc;

        let mut b = Self {
            bytes: vec![0u8; tot_sec * bps],
            fat_type,
            bps,
            spc,
            rsvd,
            nfats,
            fat_sz,
            root_ent_cnt,
            next_free: 2,
            slot_cursor: HashMap::new(),
            name_slots: HashMap::new(),
            last_lfn_slots: Vec::new(),
        };

        // Boot sector.
        b.bytes[0] = 0xEB;
        b.bytes[2] = 0x90;
        b.put_u16(11, bps as u16);
        b.bytes[13] = spc as u8;
        b.put_u16(14, rsvd as u16);
        b.bytes[16] = nfats as u8;
        b.put_u16(17, root_ent_cnt as u16);
        b.bytes[21] = 0xF8; // media
        match fat_type {
            FatType::Fat32 => {
                b.put_u32(32, tot_sec as u32);
                b.put_u32(36, fat_sz as u32);
                b.put_u32(44, 2); // root cluster
            }
            _ => {
                b.put_u16(19, tot_sec as u16);
                b.put_u16(22, fat_sz as u16);
            }
        }

        // Reserved FAT entries, plus the FAT32 root chain.
        let eoc = b.eoc();
        b.set_fat(0, 0xF8 | eoc); // media byte in the low bits by convention
        b.set_fat(1, eoc);
        if fat_type == FatType::Fat32 {
            b.set_fat(2, eoc);
            b.next_free = 3;
        }

        b
    }

    fn put_u16(&mut self, off: usize, v: u16) {
        self.bytes[off..off + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, off: usize, v: u32) {
        self.bytes[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn eoc(&self) -> u32 {
        match self.fat_type {
            FatType::Fat12 => 0xFF8,
            FatType::Fat16 => 0xFFF8,
            FatType::Fat32 => 0x0FFF_FFF8,
        }
    }

    pub fn set_fat(&mut self, cluster: u32, value: u32) {
        let fat = self.rsvd * self.bps;
        let c = cluster as usize;
        match self.fat_type {
            FatType::Fat12 => {
                let off = fat + c + c / 2;
                let mut pair = u16::from_le_bytes([self.bytes[off], self.bytes[off + 1]]);
                if cluster & 1 != 0 {
                    pair = pair & 0x000F | (value as u16 & 0x0FFF) << 4;
                } else {
                    pair = pair & 0xF000 | value as u16 & 0x0FFF;
                }
                self.bytes[off..off + 2].copy_from_slice(&pair.to_le_bytes());
            }
            FatType::Fat16 => self.put_u16(fat + c * 2, value as u16),
            FatType::Fat32 => self.put_u32(fat + c * 4, value & 0x0FFF_FFFF),
        }
    }

    fn root_dir_offset(&self) -> usize {
        (self.rsvd + self.nfats * self.fat_sz) * self.bps
    }

    fn cluster_offset(&self, cluster: u32) -> usize {
        let root_sectors = self.root_ent_cnt * DIRENT_SIZE / self.bps;
        let first_data = self.rsvd + self.nfats * self.fat_sz + root_sectors;
        (first_data + (cluster as usize - 2) * self.spc) * self.bps
    }

    fn cluster_size(&self) -> usize {
        self.spc * self.bps
    }

    fn root_key(&self) -> u32 {
        match self.fat_type {
            FatType::Fat32 => 2,
            _ => 0,
        }
    }

    fn take_slot(&mut self, dir: u32) -> usize {
        let idx = self.slot_cursor.entry(dir).or_insert(0);
        let slot = *idx;
        *idx += 1;
        if dir == 0 {
            assert!(slot < self.root_ent_cnt, "flat root full");
            self.root_dir_offset() + slot * DIRENT_SIZE
        } else {
            assert!(slot < self.cluster_size() / DIRENT_SIZE, "dir cluster full");
            self.cluster_offset(dir) + slot * DIRENT_SIZE
        }
    }

    /// Allocate `n` consecutive clusters linked into one chain.
    fn alloc_chain(&mut self, n: usize) -> u32 {
        if n == 0 {
            return 0;
        }
        let first = self.next_free;
        for i in 0..n as u32 {
            let c = first + i;
            let next = if i == n as u32 - 1 { self.eoc() } else { c + 1 };
            self.set_fat(c, next);
        }
        self.next_free += n as u32;
        first
    }

    fn write_content(&mut self, first_cluster: u32, content: &[u8]) {
        // Chains from alloc_chain are consecutive, so content is linear.
        let off = self.cluster_offset(first_cluster);
        self.bytes[off..off + content.len()].copy_from_slice(content);
    }

    fn split_83(name: &str) -> (String, String) {
        match name.rsplit_once('.') {
            Some((n, e)) => (n.to_string(), e.to_string()),
            None => (name.to_string(), String::new()),
        }
    }

    fn fits_83(name: &str) -> bool {
        let (n, e) = Self::split_83(name);
        n.len() <= 8
            && e.len() <= 3
            && name
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || "._-~".contains(c))
    }

    /// 8.3 alias for a long name: first six characters + "~1".
    fn short_alias(name: &str) -> String {
        let (n, e) = Self::split_83(name);
        let mut alias: String = n
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .take(6)
            .collect::<String>()
            .to_ascii_uppercase();
        alias.push_str("~1");
        if !e.is_empty() {
            alias.push('.');
            alias.push_str(&e.to_ascii_uppercase()[..e.len().min(3)]);
        }
        alias
    }

    fn format_11(name: &str) -> [u8; 11] {
        let mut out = [b' '; 11];
        if name == "." || name == ".." {
            out[..name.len()].copy_from_slice(name.as_bytes());
            return out;
        }
        let (n, e) = Self::split_83(name);
        for (i, c) in n.bytes().take(8).enumerate() {
            out[i] = c.to_ascii_uppercase();
        }
        for (i, c) in e.bytes().take(3).enumerate() {
            out[8 + i] = c.to_ascii_uppercase();
        }
        out
    }

    fn write_sde(&mut self, off: usize, name11: [u8; 11], attr: u8, cluster: u32, size: u32) {
        let (wd, wt) = wrt_stamp();
        let (cd, ct) = crt_stamp();
        self.bytes[off..off + 11].copy_from_slice(&name11);
        self.bytes[off + 11] = attr;
        self.bytes[off + 14..off + 16].copy_from_slice(&ct.to_le_bytes());
        self.bytes[off + 16..off + 18].copy_from_slice(&cd.to_le_bytes());
        self.put_u16(off + 20, (cluster >> 16) as u16);
        self.bytes[off + 22..off + 24].copy_from_slice(&wt.to_le_bytes());
        self.bytes[off + 24..off + 26].copy_from_slice(&wd.to_le_bytes());
        self.put_u16(off + 26, cluster as u16);
        self.put_u32(off + 28, size);
    }

    fn write_lfn_slot(&mut self, off: usize, ord: u8, units: &[u16], checksum: u8) {
        assert_eq!(units.len(), LONG_NAME_LEN_CAP);
        self.bytes[off] = ord;
        self.bytes[off + 11] = ATTR_LONG_NAME;
        self.bytes[off + 13] = checksum;
        let runs: [(usize, usize); 3] = [(1, 5), (14, 6), (28, 2)];
        let mut n = 0;
        for (start, count) in runs {
            for i in 0..count {
                let b = units[n].to_le_bytes();
                self.bytes[off + start + 2 * i] = b[0];
                self.bytes[off + start + 2 * i + 1] = b[1];
                n += 1;
            }
        }
    }

    fn add_entry(&mut self, dir: u32, name: &str, attr: u8, cluster: u32, size: u32) {
        let mut slots = Vec::new();
        let mut lfn_slots = Vec::new();
        let stored_name;

        if Self::fits_83(name) || name == "." || name == ".." {
            stored_name = name.to_string();
        } else {
            stored_name = Self::short_alias(name);
            let alias11 = Self::format_11(&stored_name);
            let checksum = lfn_checksum(&alias11);

            let mut units: Vec<u16> = name.encode_utf16().collect();
            let chunks = (units.len() + LONG_NAME_LEN_CAP - 1) / LONG_NAME_LEN_CAP;
            if units.len() < chunks * LONG_NAME_LEN_CAP {
                units.push(0x0000);
                units.resize(chunks * LONG_NAME_LEN_CAP, 0xFFFF);
            }

            // Highest chunk (flagged 0x40) comes first on disk.
            for idx in (0..chunks).rev() {
                let mut ord = idx as u8 + 1;
                if idx == chunks - 1 {
                    ord |= crate::LAST_LONG_ENTRY;
                }
                let off = self.take_slot(dir);
                let chunk = &units[idx * LONG_NAME_LEN_CAP..(idx + 1) * LONG_NAME_LEN_CAP];
                self.write_lfn_slot(off, ord, chunk, checksum);
                slots.push(off);
                lfn_slots.push(off);
            }
        }

        let off = self.take_slot(dir);
        let name11 = Self::format_11(&stored_name);
        self.write_sde(off, name11, attr, cluster, size);
        slots.push(off);

        self.name_slots.insert(name.to_string(), slots);
        if !lfn_slots.is_empty() {
            self.last_lfn_slots = lfn_slots;
        }
    }

    pub fn add_root_file(&mut self, name: &str, content: &[u8]) {
        let key = self.root_key();
        self.add_file_in(key, name, content);
    }

    pub fn add_file_in(&mut self, dir: u32, name: &str, content: &[u8]) {
        let cs = self.cluster_size();
        let nclusters = (content.len() + cs - 1) / cs;
        let first = self.alloc_chain(nclusters);
        if first != 0 {
            self.write_content(first, content);
        }
        self.add_entry(dir, name, 0x20, first, content.len() as u32);
    }

    pub fn add_root_dir(&mut self, name: &str) -> u32 {
        let c = self.alloc_chain(1);
        // "." and ".." open every directory; a root parent is cluster 0.
        let dot = self.take_slot(c);
        self.write_sde(dot, Self::format_11("."), ATTR_DIRECTORY, c, 0);
        let dotdot = self.take_slot(c);
        self.write_sde(dotdot, Self::format_11(".."), ATTR_DIRECTORY, 0, 0);

        let key = self.root_key();
        self.add_entry(key, name, ATTR_DIRECTORY, c, 0);
        c
    }

    pub fn add_root_volume_id(&mut self, name: &str) {
        let key = self.root_key();
        self.add_entry(key, name, ATTR_VOLUME_ID, 0, 0);
    }

    pub fn delete_root_entry(&mut self, name: &str) {
        for off in self.name_slots.remove(name).expect("unknown entry") {
            self.bytes[off] = crate::DIR_ENTRY_UNUSED;
        }
    }

    pub fn corrupt_last_lfn_checksum(&mut self) {
        for off in self.last_lfn_slots.clone() {
            self.bytes[off + 13] ^= 0xFF;
        }
    }

    pub fn entry_offset(&self, name: &str) -> usize {
        *self.name_slots[name].last().unwrap()
    }

    pub fn build_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn build_volume(self) -> Volume {
        let leaked: &'static [u8] = Box::leak(self.bytes.into_boxed_slice());
        Volume::mount(RamImage::from_static(leaked)).expect("synthetic image must mount")
    }
}
