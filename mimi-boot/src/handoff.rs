//! Handoff descriptor construction.

use crate::boot::PlatformInfo;
use crate::loader::LoadResult;
use mimi_common::handoff::{Handoff, HandoffRegion, HANDOFF_MAGIC, HANDOFF_SIZE, HANDOFF_VERSION};
use mimi_common::memory_map::RegionFlags;

/// Populates the descriptor the loaded image receives in `r0`.
///
/// The caller supplies the 256-byte-aligned destination; every field is
/// rewritten from scratch and the header checksum is sealed last.
pub fn build(
    handoff: &mut Handoff,
    platform: &PlatformInfo,
    result: &LoadResult,
    image_path: &str,
    boot_time_us: u32,
) {
    *handoff = Handoff::zeroed();

    handoff.magic = HANDOFF_MAGIC;
    handoff.version = HANDOFF_VERSION;
    handoff.struct_size = HANDOFF_SIZE;

    handoff.boot_reason = platform.boot_reason.bits();
    handoff.boot_source = platform.boot_source.bits();
    // boot_count and boot_flags stay 0: retry state does not persist
    // across resets

    handoff.sys_clock_hz = platform.sys_clock_hz;
    handoff.boot_time_us = boot_time_us;
    handoff.loader_time_us = result.load_time_us;

    handoff.ram_base = platform.ram.base;
    handoff.ram_size = platform.ram.size;
    handoff.loader_base = platform.loader_flash.base;
    handoff.loader_size = platform.loader_flash.size;

    handoff.image.entry = result.entry;
    handoff.image.load_base = result.load_base;
    handoff.image.load_size = result.total_mem_bytes;
    // image.crc32 stays 0: content checksumming is not performed
    set_image_name(&mut handoff.image.name, image_path);

    handoff.regions[0] = HandoffRegion::new(
        platform.ram.base,
        platform.ram.size,
        RegionFlags::RAM.union(RegionFlags::PAYLOAD),
    );
    handoff.regions[1] = HandoffRegion::new(
        platform.loader_flash.base,
        platform.loader_flash.size,
        RegionFlags::FLASH.union(RegionFlags::LOADER),
    );
    handoff.region_count = 2;

    // sealed last, over bytes 0..16 with the CRC field read as zero
    handoff.header_crc = crc::crc32::checksum_ieee(&handoff.header_bytes());
}

/// Nul-terminated basename of the path, truncated to 31 characters.
fn set_image_name(dest: &mut [u8; 32], path: &str) {
    let basename = path.rsplit('/').next().unwrap_or(path);
    let n = basename.len().min(dest.len() - 1);
    dest[..n].copy_from_slice(&basename.as_bytes()[..n]);
}
