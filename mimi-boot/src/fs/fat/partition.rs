//! Master-boot-record partition scan.

use super::{Error, SliceExt};
use crate::fs::SECTOR_SIZE;

const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xaa];
const TABLE_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;

/// Partition type bytes under which FAT32 volumes are published.
const FAT32_CHS: u8 = 0x0b;
const FAT32_LBA: u8 = 0x0c;

/// Returns the starting LBA of the FAT32 volume on this medium.
///
/// A partitioned medium names the volume in its MBR; a super-floppy
/// medium has no partition table and its BIOS parameter block sits in
/// sector 0, recognizable by the jump instruction it opens with.
pub(super) fn locate_fat32(sector0: &[u8; SECTOR_SIZE]) -> Result<u32, Error> {
    if sector0[510..512] == BOOT_SIGNATURE {
        for i in 0..4 {
            let entry = &sector0[TABLE_OFFSET + i * ENTRY_SIZE..TABLE_OFFSET + (i + 1) * ENTRY_SIZE];
            if matches!(entry[4], FAT32_CHS | FAT32_LBA) {
                return Ok(u32::from_le_bytes(entry.array::<4>(8)));
            }
        }
    }
    if matches!(sector0[0], 0xeb | 0xe9) {
        return Ok(0);
    }
    Err(Error::NotFat32("no partition or boot sector"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mbr_partition() {
        let mut sector = [0u8; SECTOR_SIZE];
        sector[510] = 0x55;
        sector[511] = 0xaa;
        // second slot carries the FAT32 entry
        sector[TABLE_OFFSET + ENTRY_SIZE + 4] = 0x0c;
        sector[TABLE_OFFSET + ENTRY_SIZE + 8..TABLE_OFFSET + ENTRY_SIZE + 12]
            .copy_from_slice(&2048u32.to_le_bytes());
        assert_eq!(locate_fat32(&sector), Ok(2048));
    }

    #[test]
    fn test_super_floppy() {
        let mut sector = [0u8; SECTOR_SIZE];
        sector[0] = 0xeb;
        sector[510] = 0x55;
        sector[511] = 0xaa;
        // signature present but no FAT32 partition entry: fall through
        assert_eq!(locate_fat32(&sector), Ok(0));
    }

    #[test]
    fn test_unrecognized_medium() {
        let sector = [0u8; SECTOR_SIZE];
        assert!(matches!(locate_fat32(&sector), Err(Error::NotFat32(_))));
    }
}
