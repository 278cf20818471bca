//! The descriptor handed to the loaded image.
//!
//! The bootloader builds this structure in RAM, outside the loaded range,
//! and passes its address in `r0` at control transfer. From that moment
//! the image owns the memory; the bootloader never touches it again.
//! The layout is fixed at exactly 256 little-endian bytes.

use crate::memory_map::RegionFlags;
use bitflags::bitflags;
use static_assertions::const_assert_eq;

/// `"MIMI"` read as a little-endian word.
pub const HANDOFF_MAGIC: u32 = 0x494d_494d;
pub const HANDOFF_VERSION: u32 = 1;
pub const HANDOFF_SIZE: u32 = 256;

/// Capacity of the image-name field, including the nul terminator.
pub const IMAGE_NAME_LEN: usize = 32;
pub const REGION_TABLE_LEN: usize = 8;

bitflags! {
    /// Why this boot happened, as reported by the platform reset logic.
    #[derive(PartialEq, Eq, Debug, Clone, Copy)]
    pub struct BootReason: u32 {
        const COLD = 1 << 0;
        const WARM = 1 << 1;
        const WATCHDOG = 1 << 2;
        const BROWNOUT = 1 << 3;
        const EXTERNAL = 1 << 4;
        const DEBUG = 1 << 5;
        const UNKNOWN = 0x8000_0000;
    }
}

bitflags! {
    /// Where the image was read from.
    #[derive(PartialEq, Eq, Debug, Clone, Copy)]
    pub struct BootSource: u32 {
        const SD = 1 << 0;
        const SDIO = 1 << 1;
        const SPI_FLASH = 1 << 2;
        const QSPI = 1 << 3;
        const UART = 1 << 4;
        const USB = 1 << 5;
        const INTERNAL = 1 << 6;
    }
}

/// One record of the region table.
#[repr(C)]
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct HandoffRegion {
    pub base: u32,
    pub size: u32,
    /// [`RegionFlags`] bits.
    pub flags: u32,
    pub reserved: u32,
}

impl HandoffRegion {
    pub const fn zeroed() -> Self {
        Self { base: 0, size: 0, flags: 0, reserved: 0 }
    }

    pub const fn new(base: u32, size: u32, flags: RegionFlags) -> Self {
        Self { base, size, flags: flags.bits(), reserved: 0 }
    }
}

/// Summary of the loaded image.
#[repr(C)]
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct HandoffImage {
    pub entry: u32,
    pub load_base: u32,
    pub load_size: u32,
    pub crc32: u32,
    /// Nul-terminated basename of the image path.
    pub name: [u8; IMAGE_NAME_LEN],
}

/// The 256-byte handoff descriptor.
///
/// Field order is the wire layout; the alignment requirement doubles as
/// the placement rule (any 256-byte-aligned RAM address works).
#[repr(C, align(256))]
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct Handoff {
    pub magic: u32,
    pub version: u32,
    pub struct_size: u32,
    /// CRC32 of bytes `0..16` with this field read as zero.
    pub header_crc: u32,
    /// [`BootReason`] bits.
    pub boot_reason: u32,
    /// [`BootSource`] bits.
    pub boot_source: u32,
    pub boot_count: u32,
    pub boot_flags: u32,
    pub sys_clock_hz: u32,
    pub boot_time_us: u32,
    pub loader_time_us: u32,
    pub reserved0: u32,
    pub ram_base: u32,
    pub ram_size: u32,
    pub loader_base: u32,
    pub loader_size: u32,
    pub image: HandoffImage,
    pub region_count: u32,
    pub reserved1: u32,
    pub regions: [HandoffRegion; REGION_TABLE_LEN],
    // the region table ends at 0xf8; the tail reserve fills the struct
    // out to exactly 256 bytes
    pub reserved2: [u32; 2],
}

const_assert_eq!(core::mem::size_of::<Handoff>(), 256);
const_assert_eq!(core::mem::align_of::<Handoff>(), 256);
const_assert_eq!(core::mem::size_of::<HandoffRegion>(), 16);
const_assert_eq!(core::mem::size_of::<HandoffImage>(), 48);

impl Handoff {
    pub const fn zeroed() -> Self {
        Self {
            magic: 0,
            version: 0,
            struct_size: 0,
            header_crc: 0,
            boot_reason: 0,
            boot_source: 0,
            boot_count: 0,
            boot_flags: 0,
            sys_clock_hz: 0,
            boot_time_us: 0,
            loader_time_us: 0,
            reserved0: 0,
            ram_base: 0,
            ram_size: 0,
            loader_base: 0,
            loader_size: 0,
            image: HandoffImage {
                entry: 0,
                load_base: 0,
                load_size: 0,
                crc32: 0,
                name: [0; IMAGE_NAME_LEN],
            },
            region_count: 0,
            reserved1: 0,
            regions: [HandoffRegion::zeroed(); REGION_TABLE_LEN],
            reserved2: [0; 2],
        }
    }

    /// The raw bytes as the loaded image observes them.
    pub fn as_bytes(&self) -> &[u8; HANDOFF_SIZE as usize] {
        // repr(C), u32/u8 fields only: no padding anywhere in the 256 bytes
        unsafe { &*(self as *const Handoff as *const [u8; HANDOFF_SIZE as usize]) }
    }

    /// Bytes `0..16` with the CRC field read as zero, the checksummed view.
    pub fn header_bytes(&self) -> [u8; 16] {
        let mut buf = [0; 16];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.struct_size.to_le_bytes());
        // bytes 12..16 stay zero: header_crc is excluded from its own sum
        buf
    }
}
