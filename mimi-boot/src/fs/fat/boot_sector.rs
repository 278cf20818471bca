use super::{Cluster, Error, SliceExt};

/// Deserialized BIOS parameter block of a FAT32 volume.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct BootSector {
    /// Sector size in bytes. Always 512 here; other sizes are rejected.
    bpb_byts_per_sec: u16,
    /// Cluster size in sectors. Power of two.
    bpb_sec_per_clus: u8,
    /// Sectors reserved in front of the first FAT, including this one.
    bpb_rsvd_sec_cnt: u16,
    /// Number of FAT copies. Usually 2.
    bpb_num_fats: u8,
    /// Total sectors, from the 16-bit field when nonzero, else the 32-bit one.
    bpb_tot_sec: u32,
    /// FAT size in sectors.
    bpb_fat_sz_32: u32,
    /// Cluster number of the root directory.
    bpb_root_clus: u32,
    vol_id: u32,
    vol_lab: [u8; 11],
}

impl BootSector {
    pub fn volume_id(&self) -> u32 {
        self.vol_id
    }

    pub fn volume_label(&self) -> [u8; 11] {
        self.vol_lab
    }

    pub fn sector_size(&self) -> u32 {
        self.bpb_byts_per_sec as u32
    }

    /// Cluster size in sectors.
    pub fn cluster_size(&self) -> u32 {
        self.bpb_sec_per_clus as u32
    }

    pub fn reserved_sector_count(&self) -> u32 {
        self.bpb_rsvd_sec_cnt as u32
    }

    pub fn fat_count(&self) -> u32 {
        self.bpb_num_fats as u32
    }

    /// FAT size in sectors.
    pub fn fat_size(&self) -> u32 {
        self.bpb_fat_sz_32
    }

    pub fn total_sector_count(&self) -> u32 {
        self.bpb_tot_sec
    }

    pub(super) fn root_dir_cluster(&self) -> Cluster {
        Cluster::from_index(self.bpb_root_clus)
    }
}

impl TryFrom<&'_ [u8]> for BootSector {
    type Error = Error;

    fn try_from(buf: &'_ [u8]) -> Result<Self, Error> {
        if buf.len() < 512 || !matches!(buf[510..512], [0x55, 0xaa]) {
            Err(Error::NotFat32("boot signature"))?;
        }

        let bpb_byts_per_sec = u16::from_le_bytes(buf.array::<2>(11));
        let bpb_sec_per_clus = buf[13];
        let bpb_rsvd_sec_cnt = u16::from_le_bytes(buf.array::<2>(14));
        let bpb_num_fats = buf[16];
        let bpb_root_ent_cnt = u16::from_le_bytes(buf.array::<2>(17));
        let bpb_tot_sec_16 = u16::from_le_bytes(buf.array::<2>(19));
        let bpb_fat_sz_16 = u16::from_le_bytes(buf.array::<2>(22));
        let bpb_tot_sec_32 = u32::from_le_bytes(buf.array::<4>(32));
        let bpb_fat_sz_32 = u32::from_le_bytes(buf.array::<4>(36));
        let bpb_root_clus = u32::from_le_bytes(buf.array::<4>(44));
        let vol_id = u32::from_le_bytes(buf.array::<4>(67));
        let vol_lab = buf.array::<11>(71);

        if bpb_byts_per_sec != 512 {
            Err(Error::NotFat32("BytsPerSec"))?;
        }
        if bpb_root_ent_cnt != 0 || bpb_fat_sz_16 != 0 {
            // FAT12/16 layout
            Err(Error::NotFat32("FAT12/16"))?;
        }
        if bpb_fat_sz_32 == 0 {
            Err(Error::NotFat32("FATSz32"))?;
        }
        if !bpb_sec_per_clus.is_power_of_two() {
            Err(Error::Invalid("SecPerClus"))?;
        }
        if bpb_rsvd_sec_cnt == 0 {
            Err(Error::Invalid("RsvdSecCnt"))?;
        }
        if bpb_num_fats == 0 {
            Err(Error::Invalid("NumFATs"))?;
        }
        if bpb_root_clus < 2 {
            Err(Error::Invalid("RootClus"))?;
        }

        let bpb_tot_sec = if bpb_tot_sec_16 != 0 {
            bpb_tot_sec_16 as u32
        } else {
            bpb_tot_sec_32
        };

        Ok(Self {
            bpb_byts_per_sec,
            bpb_sec_per_clus,
            bpb_rsvd_sec_cnt,
            bpb_num_fats,
            bpb_tot_sec,
            bpb_fat_sz_32,
            bpb_root_clus,
            vol_id,
            vol_lab,
        })
    }
}
