use mimi_boot::boot::PlatformInfo;
use mimi_boot::handoff::build;
use mimi_boot::loader::{LoadResult, SegmentInfo};
use mimi_common::handoff::{BootReason, BootSource, Handoff, HANDOFF_MAGIC};
use mimi_common::memory_map::{MemoryRegion, RegionFlags};

fn platform() -> PlatformInfo {
    PlatformInfo {
        sys_clock_hz: 125_000_000,
        ram: MemoryRegion::new(
            0x2000_0000,
            0x4_0000,
            RegionFlags::READ | RegionFlags::WRITE | RegionFlags::RAM,
        ),
        loader_flash: MemoryRegion::new(
            0x1000_0100,
            0x4000,
            RegionFlags::READ | RegionFlags::EXECUTE | RegionFlags::FLASH,
        ),
        boot_reason: BootReason::COLD,
        boot_source: BootSource::SD,
    }
}

fn load_result() -> LoadResult {
    let segments = heapless::Vec::from_slice(&[SegmentInfo {
        vaddr: 0x2000_0000,
        file_size: 0x100,
        mem_size: 0x200,
        flags: 0x7,
    }])
    .unwrap();
    LoadResult {
        entry: 0x2000_0101,
        load_base: 0x2000_0000,
        load_end: 0x2000_0200,
        total_mem_bytes: 0x200,
        bytes_copied: 0x100,
        bytes_zeroed: 0x100,
        segments,
        load_time_us: 1234,
    }
}

fn word_at(bytes: &[u8; 256], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

#[test]
fn test_layout_words() {
    let mut handoff = Handoff::zeroed();
    build(&mut handoff, &platform(), &load_result(), "/boot/kernel.elf", 56_000);
    let bytes = handoff.as_bytes();

    assert_eq!(word_at(bytes, 0x00), HANDOFF_MAGIC);
    assert_eq!(word_at(bytes, 0x04), 1);
    assert_eq!(word_at(bytes, 0x08), 256);
    assert_eq!(word_at(bytes, 0x10), BootReason::COLD.bits());
    assert_eq!(word_at(bytes, 0x14), BootSource::SD.bits());
    assert_eq!(word_at(bytes, 0x18), 0); // boot_count
    assert_eq!(word_at(bytes, 0x20), 125_000_000);
    assert_eq!(word_at(bytes, 0x24), 56_000);
    assert_eq!(word_at(bytes, 0x28), 1234);
    assert_eq!(word_at(bytes, 0x30), 0x2000_0000);
    assert_eq!(word_at(bytes, 0x34), 0x4_0000);
    assert_eq!(word_at(bytes, 0x38), 0x1000_0100);
    assert_eq!(word_at(bytes, 0x3c), 0x4000);
    assert_eq!(word_at(bytes, 0x40), 0x2000_0101);
    assert_eq!(word_at(bytes, 0x44), 0x2000_0000);
    assert_eq!(word_at(bytes, 0x48), 0x200);
    assert_eq!(word_at(bytes, 0x4c), 0); // image crc not computed
    assert_eq!(word_at(bytes, 0x70), 2); // region_count
}

#[test]
fn test_header_crc_seals_first_16_bytes() {
    let mut handoff = Handoff::zeroed();
    build(&mut handoff, &platform(), &load_result(), "/boot/kernel.elf", 1);
    let bytes = handoff.as_bytes();

    let mut head = [0u8; 16];
    head.copy_from_slice(&bytes[..16]);
    head[12..16].fill(0);
    assert_eq!(word_at(bytes, 0x0c), crc::crc32::checksum_ieee(&head));
    assert_ne!(handoff.header_crc, 0);
}

#[test]
fn test_image_name_is_basename() {
    let mut handoff = Handoff::zeroed();
    build(&mut handoff, &platform(), &load_result(), "/boot/kernel.elf", 1);
    let bytes = handoff.as_bytes();
    assert_eq!(&bytes[0x50..0x50 + 11], b"kernel.elf\0");
    // the rest of the field stays nul
    assert!(bytes[0x50 + 11..0x70].iter().all(|&b| b == 0));
}

#[test]
fn test_region_table() {
    let mut handoff = Handoff::zeroed();
    build(&mut handoff, &platform(), &load_result(), "/x.elf", 1);
    let bytes = handoff.as_bytes();

    // regions[0]: payload RAM
    assert_eq!(word_at(bytes, 0x78), 0x2000_0000);
    assert_eq!(word_at(bytes, 0x7c), 0x4_0000);
    assert_eq!(
        word_at(bytes, 0x80),
        (RegionFlags::RAM | RegionFlags::PAYLOAD).bits()
    );
    // regions[1]: loader flash
    assert_eq!(word_at(bytes, 0x88), 0x1000_0100);
    assert_eq!(word_at(bytes, 0x8c), 0x4000);
    assert_eq!(
        word_at(bytes, 0x90),
        (RegionFlags::FLASH | RegionFlags::LOADER).bits()
    );
    // unused entries and the trailing reserve stay zero
    assert!(bytes[0x98..0xf8].iter().all(|&b| b == 0));
    assert!(bytes[0xf8..].iter().all(|&b| b == 0));
}

#[test]
fn test_build_overwrites_previous_contents() {
    let mut handoff = Handoff::zeroed();
    handoff.boot_count = 7;
    handoff.reserved2 = [0xffff_ffff; 2];
    build(&mut handoff, &platform(), &load_result(), "/x.elf", 1);
    assert_eq!(handoff.boot_count, 0);
    assert_eq!(handoff.reserved2, [0; 2]);
}
