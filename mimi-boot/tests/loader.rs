mod common;

use common::{pattern, BufMemory, BufSource, ElfBuilder, FakeClock, Segment};
use mimi_boot::error::BootError;
use mimi_boot::image;
use mimi_boot::loader::{self, Error, LoaderConfig, Memory};
use mimi_common::memory_map::{MemoryRegion, RegionFlags};

const RAM_BASE: u32 = 0x2000_0000;
const RAM_SIZE: u32 = 0x4_0000;

fn ram_region() -> MemoryRegion {
    MemoryRegion::new(
        RAM_BASE,
        RAM_SIZE,
        RegionFlags::READ | RegionFlags::WRITE | RegionFlags::RAM,
    )
}

fn load(
    config: &LoaderConfig,
    file: Vec<u8>,
    memory: &mut BufMemory,
) -> Result<loader::LoadResult, BootError> {
    let mut source = BufSource::new(file);
    loader::load(config, &mut source, memory, &FakeClock::new())
}

#[test]
fn test_minimal_valid_image() {
    let payload = pattern(0x100, 11);
    let file = ElfBuilder::new(0x2000_0101)
        .segment(Segment::load(0x2000_0000, 0x1000, payload.clone(), 0x200))
        .build();
    let regions = [ram_region()];
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);

    let result = load(&LoaderConfig::new(&regions), file, &mut memory).unwrap();
    assert_eq!(result.entry, 0x2000_0101);
    assert_eq!(result.load_base, 0x2000_0000);
    assert_eq!(result.load_end, 0x2000_0200);
    assert_eq!(result.bytes_copied, 0x100);
    assert_eq!(result.bytes_zeroed, 0x100);
    assert_eq!(result.total_mem_bytes, 0x200);
    assert_eq!(result.segment_count(), 1);

    // copied bytes match the file, the BSS tail is zero
    assert_eq!(memory.slice(0x2000_0000, 0x100), &payload[..]);
    assert_eq!(memory.slice(0x2000_0100, 0x100), &[0u8; 0x100][..]);
    // and the fill pattern survives beyond the segment
    assert_eq!(memory.slice(0x2000_0200, 4), &[0xaa; 4][..]);
}

#[test]
fn test_overlapping_segments_rejected_before_any_write() {
    let file = ElfBuilder::new(0x2000_0000)
        .segment(Segment::load(0x2000_0000, 0x1000, pattern(0x200, 1), 0x200))
        .segment(Segment::load(0x2000_01ff, 0x2000, pattern(0x10, 2), 0x10))
        .build();
    let regions = [ram_region()];
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);

    let err = load(&LoaderConfig::new(&regions), file, &mut memory).unwrap_err();
    assert_eq!(err, BootError::Load(Error::SegmentsOverlap));
    assert_eq!(memory.writes, 0);
}

#[test]
fn test_segment_outside_region() {
    let small = [MemoryRegion::new(
        RAM_BASE,
        0x1000,
        RegionFlags::WRITE | RegionFlags::RAM,
    )];
    let file = ElfBuilder::new(0x2000_0f00)
        .segment(Segment::load(0x2000_0f00, 0x1000, pattern(0x100, 1), 0x200))
        .build();
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);

    let err = load(&LoaderConfig::new(&small), file, &mut memory).unwrap_err();
    assert_eq!(err, BootError::Load(Error::SegmentOutsideRam));
    assert_eq!(memory.writes, 0);
}

#[test]
fn test_segment_abutting_region_end() {
    let small = [MemoryRegion::new(
        RAM_BASE,
        0x1000,
        RegionFlags::WRITE | RegionFlags::RAM,
    )];
    let mut memory = BufMemory::new(RAM_BASE, 0x1000);

    // exactly abutting the end is accepted
    let file = ElfBuilder::new(0x2000_0e00)
        .segment(Segment::load(0x2000_0e00, 0x1000, pattern(0x100, 1), 0x200))
        .build();
    assert!(load(&LoaderConfig::new(&small), file, &mut memory).is_ok());

    // one byte past is not
    let file = ElfBuilder::new(0x2000_0e00)
        .segment(Segment::load(0x2000_0e00, 0x1000, pattern(0x100, 1), 0x201))
        .build();
    let err = load(&LoaderConfig::new(&small), file, &mut memory).unwrap_err();
    assert_eq!(err, BootError::Load(Error::SegmentOutsideRam));
}

#[test]
fn test_wrong_machine_rejected_before_program_headers() {
    let file = ElfBuilder::new(0x2000_0101)
        .machine(62) // x86-64
        .segment(Segment::load(0x2000_0000, 0x1000, pattern(0x100, 1), 0x100))
        .build();
    let regions = [ram_region()];
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);

    let mut source = BufSource::new(file);
    let err = loader::load(&LoaderConfig::new(&regions), &mut source, &mut memory, &FakeClock::new())
        .unwrap_err();
    assert_eq!(err, BootError::Image(image::Error::NotArm));
    // only the file header was consulted
    assert!(source.reads.iter().all(|&offset| offset < 52));
    assert_eq!(memory.writes, 0);
}

#[test]
fn test_program_header_count_limits() {
    let regions = [ram_region()];

    // 64 headers (one LOAD, the rest null) are fine
    let mut builder = ElfBuilder::new(0x2000_0000)
        .segment(Segment::load(0x2000_0000, 0x2000, pattern(0x80, 1), 0x80));
    for _ in 0..63 {
        builder = builder.segment(Segment::null());
    }
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);
    assert!(load(&LoaderConfig::new(&regions), builder.build(), &mut memory).is_ok());

    // 65 are rejected up front
    let file = ElfBuilder::new(0x2000_0000)
        .segment(Segment::load(0x2000_0000, 0x2000, pattern(0x80, 1), 0x80))
        .phnum(65)
        .build();
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);
    let err = load(&LoaderConfig::new(&regions), file, &mut memory).unwrap_err();
    assert_eq!(err, BootError::Image(image::Error::TooManyProgramHeaders));
}

#[test]
fn test_loadable_segment_count_limits() {
    let regions = [ram_region()];

    let segment_at = |i: u32| {
        Segment::load(
            RAM_BASE + i * 0x1000,
            0x8000 + i * 0x100,
            pattern(0x40, i),
            0x40,
        )
    };

    let mut builder = ElfBuilder::new(RAM_BASE);
    for i in 0..16 {
        builder = builder.segment(segment_at(i));
    }
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);
    let result = load(&LoaderConfig::new(&regions), builder.build(), &mut memory).unwrap();
    assert_eq!(result.segment_count(), 16);

    let mut builder = ElfBuilder::new(RAM_BASE);
    for i in 0..17 {
        builder = builder.segment(segment_at(i));
    }
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);
    let err = load(&LoaderConfig::new(&regions), builder.build(), &mut memory).unwrap_err();
    assert_eq!(err, BootError::Load(Error::ImageTooLarge));
    assert_eq!(memory.writes, 0);
}

#[test]
fn test_no_loadable_segments() {
    let file = ElfBuilder::new(0x2000_0000)
        .segment(Segment::null())
        .build();
    let regions = [ram_region()];
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);

    let err = load(&LoaderConfig::new(&regions), file, &mut memory).unwrap_err();
    assert_eq!(err, BootError::Load(Error::NoLoadableSegments));
}

#[test]
fn test_fully_initialized_segment_zeroes_nothing() {
    let payload = pattern(0x180, 3);
    let file = ElfBuilder::new(0x2000_0000)
        .segment(Segment::load(0x2000_0000, 0x1000, payload.clone(), 0x180))
        .build();
    let regions = [ram_region()];
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);

    let result = load(&LoaderConfig::new(&regions), file, &mut memory).unwrap();
    assert_eq!(result.bytes_copied, 0x180);
    assert_eq!(result.bytes_zeroed, 0);
    assert_eq!(memory.slice(0x2000_0000, 0x180), &payload[..]);
}

#[test]
fn test_bss_only_segment_reads_nothing() {
    let file = ElfBuilder::new(0x2000_0000)
        .segment(Segment::load(0x2000_0000, 0x1000, Vec::new(), 0x300))
        .build();
    let regions = [ram_region()];
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);

    let result = load(&LoaderConfig::new(&regions), file, &mut memory).unwrap();
    assert_eq!(result.bytes_copied, 0);
    assert_eq!(result.bytes_zeroed, 0x300);
    assert_eq!(memory.slice(0x2000_0000, 0x300), &vec![0u8; 0x300][..]);
}

#[test]
fn test_entry_outside_image() {
    let file = ElfBuilder::new(0x2000_4000)
        .segment(Segment::load(0x2000_0000, 0x1000, pattern(0x100, 1), 0x100))
        .build();
    let regions = [ram_region()];
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);

    let err = load(&LoaderConfig::new(&regions), file, &mut memory).unwrap_err();
    assert_eq!(err, BootError::Load(Error::EntryOutsideImage));
}

#[test]
fn test_file_larger_than_memory_image() {
    let mut segment = Segment::load(0x2000_0000, 0x1000, pattern(0x100, 1), 0x100);
    segment.memsz = 0x80;
    let file = ElfBuilder::new(0x2000_0000).segment(segment).build();
    let regions = [ram_region()];
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);

    let err = load(&LoaderConfig::new(&regions), file, &mut memory).unwrap_err();
    assert_eq!(err, BootError::Load(Error::InvalidSegment));
}

#[test]
fn test_misaligned_segment() {
    let mut segment = Segment::load(0x2000_0002, 0x1001, pattern(0x40, 1), 0x40);
    segment.align = 4;
    let file = ElfBuilder::new(0x2000_0002).segment(segment).build();
    let regions = [ram_region()];
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);

    let err = load(&LoaderConfig::new(&regions), file, &mut memory).unwrap_err();
    assert_eq!(err, BootError::Load(Error::BadAlignment));
}

#[test]
fn test_truncated_file() {
    let mut file = ElfBuilder::new(0x2000_0000)
        .segment(Segment::load(0x2000_0000, 0x1000, pattern(0x200, 1), 0x200))
        .build();
    file.truncate(0x1100); // half the segment is missing
    let regions = [ram_region()];
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);

    let err = load(&LoaderConfig::new(&regions), file, &mut memory).unwrap_err();
    assert_eq!(err, BootError::Load(Error::ShortRead));
}

#[test]
fn test_multi_segment_statistics() {
    // two segments with a gap between them
    let a = pattern(0x100, 1);
    let b = pattern(0x80, 2);
    let file = ElfBuilder::new(0x2000_0000)
        .segment(Segment::load(0x2000_0000, 0x1000, a.clone(), 0x180))
        .segment(Segment::load(0x2000_1000, 0x2000, b.clone(), 0x80))
        .build();
    let regions = [ram_region()];
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);

    let result = load(&LoaderConfig::new(&regions), file, &mut memory).unwrap();
    assert_eq!(result.load_base, 0x2000_0000);
    assert_eq!(result.load_end, 0x2000_1080);
    assert_eq!(result.total_mem_bytes, 0x200);
    assert_eq!(result.bytes_copied, 0x180);
    assert_eq!(result.bytes_zeroed, 0x80);
    assert_eq!(result.segment_count(), 2);
    assert_eq!(memory.slice(0x2000_0000, 0x100), &a[..]);
    assert_eq!(memory.slice(0x2000_1000, 0x80), &b[..]);
    // the gap keeps its fill pattern
    assert_eq!(memory.slice(0x2000_0200, 4), &[0xaa; 4][..]);
}

#[test]
fn test_loading_twice_is_idempotent() {
    let file = ElfBuilder::new(0x2000_0000)
        .segment(Segment::load(0x2000_0000, 0x1000, pattern(0x234, 8), 0x400))
        .build();
    let regions = [ram_region()];

    let mut first = BufMemory::zeroed(RAM_BASE, RAM_SIZE as usize);
    load(&LoaderConfig::new(&regions), file.clone(), &mut first).unwrap();
    let mut second = BufMemory::zeroed(RAM_BASE, RAM_SIZE as usize);
    load(&LoaderConfig::new(&regions), file, &mut second).unwrap();
    assert_eq!(first.data, second.data);
}

#[test]
fn test_verify_after_load() {
    let regions = [ram_region()];
    let file = ElfBuilder::new(0x2000_0000)
        .segment(Segment::load(0x2000_0000, 0x1000, pattern(0x300, 4), 0x300))
        .build();
    let config = LoaderConfig {
        verify_after_load: true,
        ..LoaderConfig::new(&regions)
    };

    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);
    assert!(load(&config, file.clone(), &mut memory).is_ok());

    // a memory that reads back corrupted bytes fails verification
    struct CorruptingMemory(BufMemory);
    impl Memory for CorruptingMemory {
        fn write(&mut self, addr: u32, bytes: &[u8]) {
            self.0.write(addr, bytes);
        }
        fn zero(&mut self, addr: u32, len: u32) {
            self.0.zero(addr, len);
        }
        fn read(&self, addr: u32, buf: &mut [u8]) {
            self.0.read(addr, buf);
            if addr == 0x2000_0000 {
                buf[7] ^= 0x01;
            }
        }
    }
    let mut memory = CorruptingMemory(BufMemory::new(RAM_BASE, RAM_SIZE as usize));
    let mut source = BufSource::new(file);
    let err = loader::load(&config, &mut source, &mut memory, &FakeClock::new()).unwrap_err();
    assert_eq!(err, BootError::Load(Error::VerifyMismatch));
}

#[test]
fn test_validation_can_be_disabled() {
    // without address validation a segment outside the region table loads
    let regions = [ram_region()];
    let file = ElfBuilder::new(0x3000_0000)
        .segment(Segment::load(0x3000_0000, 0x1000, pattern(0x40, 1), 0x40))
        .build();
    let config = LoaderConfig {
        validate_addresses: false,
        ..LoaderConfig::new(&regions)
    };
    let mut memory = BufMemory::new(0x3000_0000, 0x1000);
    assert!(load(&config, file, &mut memory).is_ok());
}

#[test]
fn test_rejects_empty_region_descriptor() {
    let bad = [MemoryRegion::new(RAM_BASE, 0, RegionFlags::WRITE | RegionFlags::RAM)];
    let file = ElfBuilder::new(0x2000_0000)
        .segment(Segment::load(0x2000_0000, 0x1000, pattern(0x40, 1), 0x40))
        .build();
    let mut memory = BufMemory::new(RAM_BASE, RAM_SIZE as usize);

    let err = load(&LoaderConfig::new(&bad), file, &mut memory).unwrap_err();
    assert_eq!(err, BootError::Load(Error::InvalidRegion));
}
