//! BIOS Parameter Block (boot sector) parsing and volume geometry.
//!
//! Layout: boot sector — reserved sectors — FATs — (FAT12/16 flat root
//! region) — data region. The FAT type is NOT taken from the type
//! string; per the specification it is determined solely by the count
//! of data clusters.

use crate::image::RamImage;
use crate::{read_le_u16, read_le_u32, FatError, MAX_CLUSTER_FAT12, MAX_CLUSTER_FAT16};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

/// Decoded boot-sector fields plus derived geometry, all in bytes or
/// sectors as named.
#[derive(Debug, Clone, Copy)]
pub struct Bpb {
    pub byts_per_sec: usize,
    pub sec_per_clus: usize,
    pub rsvd_sec_cnt: usize,
    pub num_fats: usize,
    /// Root-entry capacity; 0 on FAT32.
    pub root_ent_cnt: usize,
    pub tot_sec: usize,
    /// Sectors per FAT (16-bit field if set, else the FAT32 field).
    pub fat_sz: usize,
    /// First cluster of the FAT32 root directory; 0 on FAT12/16.
    pub root_clus: u32,
}

impl Bpb {
    pub fn parse(image: &RamImage) -> Result<Self, FatError> {
        if image.len() < 512 {
            return Err(FatError::TruncatedImage);
        }
        let b = image.bytes(0, 512);

        let byts_per_sec = read_le_u16(&b[11..]) as usize;
        let sec_per_clus = b[13] as usize;
        let rsvd_sec_cnt = read_le_u16(&b[14..]) as usize;
        let num_fats = b[16] as usize;
        let root_ent_cnt = read_le_u16(&b[17..]) as usize;
        let tot_sec16 = read_le_u16(&b[19..]) as usize;
        let fat_sz16 = read_le_u16(&b[22..]) as usize;
        let tot_sec32 = read_le_u32(&b[32..]) as usize;
        let fat_sz32 = read_le_u32(&b[36..]) as usize;
        let root_clus = read_le_u32(&b[44..]);

        if !matches!(byts_per_sec, 512 | 1024 | 2048 | 4096)
            || !sec_per_clus.is_power_of_two()
            || sec_per_clus > 128
            || rsvd_sec_cnt == 0
            || num_fats == 0
        {
            return Err(FatError::BadBootSector);
        }

        let tot_sec = if tot_sec16 != 0 { tot_sec16 } else { tot_sec32 };
        let fat_sz = if fat_sz16 != 0 { fat_sz16 } else { fat_sz32 };
        if tot_sec == 0 || fat_sz == 0 {
            return Err(FatError::BadBootSector);
        }
        if tot_sec * byts_per_sec > image.len() {
            return Err(FatError::TruncatedImage);
        }

        Ok(Self {
            byts_per_sec,
            sec_per_clus,
            rsvd_sec_cnt,
            num_fats,
            root_ent_cnt,
            tot_sec,
            fat_sz,
            root_clus,
        })
    }

    pub fn cluster_size(&self) -> usize {
        self.sec_per_clus * self.byts_per_sec
    }

    /// Sectors occupied by the FAT12/16 flat root region (0 on FAT32,
    /// where `root_ent_cnt` is always 0).
    pub fn root_dir_sector_cnt(&self) -> usize {
        (self.root_ent_cnt * 32 + self.byts_per_sec - 1) / self.byts_per_sec
    }

    /// First sector of the data region, i.e. of cluster 2.
    pub fn first_data_sector(&self) -> usize {
        self.rsvd_sec_cnt + self.num_fats * self.fat_sz + self.root_dir_sector_cnt()
    }

    pub fn data_cluster_cnt(&self) -> usize {
        (self.tot_sec - self.first_data_sector()) / self.sec_per_clus
    }

    /// Per the specification, the type follows from the cluster count
    /// alone.
    pub fn fat_type(&self) -> FatType {
        let clusters = self.data_cluster_cnt();
        if clusters < MAX_CLUSTER_FAT12 {
            FatType::Fat12
        } else if clusters < MAX_CLUSTER_FAT16 {
            FatType::Fat16
        } else {
            FatType::Fat32
        }
    }

    /// Byte offset of the first FAT.
    pub fn fat_offset(&self) -> usize {
        self.rsvd_sec_cnt * self.byts_per_sec
    }

    /// Byte offset of the FAT12/16 flat root region.
    pub fn root_dir_offset(&self) -> usize {
        (self.rsvd_sec_cnt + self.num_fats * self.fat_sz) * self.byts_per_sec
    }

    /// Byte offset of a data cluster. The first two FAT indices are
    /// reserved, so cluster 2 opens the data region.
    pub fn cluster_offset(&self, cluster: u32) -> usize {
        assert!(cluster >= 2, "cluster {} is reserved", cluster);
        (self.first_data_sector() + (cluster as usize - 2) * self.sec_per_clus) * self.byts_per_sec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testimg::ImageBuilder;

    #[test]
    fn detects_type_by_cluster_count() {
        let fat12 = ImageBuilder::fat12(1).build_volume();
        assert_eq!(fat12.fat_type(), FatType::Fat12);

        let fat16 = ImageBuilder::fat16(1).build_volume();
        assert_eq!(fat16.fat_type(), FatType::Fat16);

        let fat32 = ImageBuilder::fat32(1).build_volume();
        assert_eq!(fat32.fat_type(), FatType::Fat32);
    }

    #[test]
    fn geometry_for_fat16() {
        let vol = ImageBuilder::fat16(8).build_volume();
        let bpb = vol.bpb();
        assert_eq!(bpb.cluster_size(), 4096);
        // One sector of boot + FATs + root region precede cluster 2.
        assert_eq!(
            bpb.first_data_sector(),
            bpb.rsvd_sec_cnt + bpb.num_fats * bpb.fat_sz + bpb.root_dir_sector_cnt()
        );
        assert!(bpb.data_cluster_cnt() >= MAX_CLUSTER_FAT12);
        assert!(bpb.data_cluster_cnt() < MAX_CLUSTER_FAT16);
        // FAT12/16 root region is non-empty and precedes the data area.
        assert!(bpb.root_ent_cnt > 0);
        assert!(bpb.root_dir_offset() < bpb.cluster_offset(2));
    }

    #[test]
    fn fat32_has_no_flat_root() {
        let vol = ImageBuilder::fat32(1).build_volume();
        let bpb = vol.bpb();
        assert_eq!(bpb.root_ent_cnt, 0);
        assert_eq!(bpb.root_dir_sector_cnt(), 0);
        assert_eq!(bpb.root_clus, 2);
    }

    #[test]
    fn rejects_truncated_image() {
        let mut img = ImageBuilder::fat16(1).build_bytes();
        img.truncate(img.len() / 2);
        let leaked: &'static [u8] = Box::leak(img.into_boxed_slice());
        let image = RamImage::from_static(leaked);
        assert_eq!(Bpb::parse(&image).err(), Some(FatError::TruncatedImage));
    }
}
