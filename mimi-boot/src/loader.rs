//! Two-pass segment loader.
//!
//! Pass 1 streams the program-header table and proves it consistent
//! before pass 2 writes a single byte, so a malformed image can never
//! leave memory partially clobbered. Pass 2 then copies, zeroes the BSS
//! tails and optionally verifies, with no further validation branches.

use crate::clock::Clock;
use crate::error::BootError;
use crate::fs::SECTOR_SIZE;
use crate::image::{self, ImageInfo};
use core::fmt;
use goblin::elf::program_header::{PF_X, PT_LOAD};
use goblin::elf32::program_header::{ProgramHeader, SIZEOF_PHDR};
use heapless::Vec;
use log::{info, warn};
use mimi_common::memory_map::{MemoryRegion, RegionFlags};

/// Most LOAD segments a single image may carry.
pub const MAX_SEGMENTS: usize = 16;

/// Error while placing an image into memory.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Error {
    /// The file delivered fewer bytes than a header or segment required.
    ShortRead,
    NoLoadableSegments,
    /// A segment does not fit any writable RAM region.
    SegmentOutsideRam,
    SegmentsOverlap,
    /// More than [`MAX_SEGMENTS`] loadable segments.
    ImageTooLarge,
    VerifyMismatch,
    /// A segment's virtual address disagrees with its file offset modulo
    /// its stated alignment.
    BadAlignment,
    /// A segment's file image exceeds its memory image, or its extent
    /// overflows the address space.
    InvalidSegment,
    EntryOutsideImage,
    OutOfMemory,
    /// A caller-described region is empty or overflows the address space.
    InvalidRegion,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Error::ShortRead => "short read from image",
            Error::NoLoadableSegments => "no loadable segments",
            Error::SegmentOutsideRam => "segment outside writable RAM",
            Error::SegmentsOverlap => "segments overlap",
            Error::ImageTooLarge => "image too large",
            Error::VerifyMismatch => "load verification mismatch",
            Error::BadAlignment => "bad segment alignment",
            Error::InvalidSegment => "invalid segment descriptor",
            Error::EntryOutsideImage => "entry point outside image",
            Error::OutOfMemory => "out of memory",
            Error::InvalidRegion => "invalid region descriptor",
        };
        write!(f, "{}", label)
    }
}

/// Byte source for the image being loaded.
pub trait ImageSource {
    fn size(&self) -> u32;
    /// Reads at an absolute file offset; a short count signals end of file.
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, BootError>;
}

/// Write access to the destination address space.
///
/// Pass 1 guarantees every address handed here lies inside an accepted
/// region, so implementations do not re-validate.
pub trait Memory {
    fn write(&mut self, addr: u32, bytes: &[u8]);
    fn zero(&mut self, addr: u32, len: u32);
    fn read(&self, addr: u32, buf: &mut [u8]);
}

/// Raw physical memory on the running target.
#[cfg(target_arch = "arm")]
pub struct DirectMemory;

#[cfg(target_arch = "arm")]
impl Memory for DirectMemory {
    fn write(&mut self, addr: u32, bytes: &[u8]) {
        let dest = unsafe { core::slice::from_raw_parts_mut(addr as *mut u8, bytes.len()) };
        dest.copy_from_slice(bytes);
    }

    fn zero(&mut self, addr: u32, len: u32) {
        let dest = unsafe { core::slice::from_raw_parts_mut(addr as *mut u8, len as usize) };
        dest.fill(0);
    }

    fn read(&self, addr: u32, buf: &mut [u8]) {
        let src = unsafe { core::slice::from_raw_parts(addr as *const u8, buf.len()) };
        buf.copy_from_slice(src);
    }
}

/// Loader policy and the regions writes may land in.
#[derive(Debug, Clone, Copy)]
pub struct LoaderConfig<'a> {
    pub regions: &'a [MemoryRegion],
    pub validate_addresses: bool,
    pub zero_bss: bool,
    pub verify_after_load: bool,
}

impl<'a> LoaderConfig<'a> {
    pub fn new(regions: &'a [MemoryRegion]) -> Self {
        Self {
            regions,
            validate_addresses: true,
            zero_bss: true,
            verify_after_load: false,
        }
    }
}

/// One accepted segment.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct SegmentInfo {
    pub vaddr: u32,
    pub file_size: u32,
    pub mem_size: u32,
    pub flags: u32,
}

/// Outcome of a successful load.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct LoadResult {
    pub entry: u32,
    /// Lowest accepted virtual address.
    pub load_base: u32,
    /// One past the highest accepted virtual address.
    pub load_end: u32,
    pub total_mem_bytes: u32,
    pub bytes_copied: u32,
    pub bytes_zeroed: u32,
    pub segments: Vec<SegmentInfo, MAX_SEGMENTS>,
    /// Time spent materializing (copy, zero and verify), in µs.
    pub load_time_us: u32,
}

impl LoadResult {
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

/// Validates the image against `config` and materializes it.
pub fn load<S, M, C>(
    config: &LoaderConfig,
    source: &mut S,
    memory: &mut M,
    clock: &C,
) -> Result<LoadResult, BootError>
where
    S: ImageSource,
    M: Memory,
    C: Clock,
{
    for region in config.regions {
        if region.size == 0 || region.end().is_none() {
            Err(Error::InvalidRegion)?;
        }
    }

    let mut ehdr = [0u8; image::SIZEOF_EHDR];
    read_exact(source, 0, &mut ehdr)?;
    let info = image::validate(&ehdr)?;

    // pass 1: prove the whole table consistent before touching memory
    info!("validating {} program headers", info.phnum);
    let mut segments: Vec<SegmentInfo, MAX_SEGMENTS> = Vec::new();
    let mut load_base = u32::MAX;
    let mut load_end = 0u32;
    let mut total_mem_bytes = 0u32;

    for index in 0..info.phnum {
        let ph = read_phdr(source, &info, index)?;
        if ph.p_type != PT_LOAD || ph.p_memsz == 0 {
            continue;
        }

        if ph.p_filesz > ph.p_memsz {
            Err(Error::InvalidSegment)?;
        }
        let seg_end = ph.p_vaddr.checked_add(ph.p_memsz).ok_or(Error::InvalidSegment)?;
        if ph.p_offset.checked_add(ph.p_filesz).is_none() {
            Err(Error::InvalidSegment)?;
        }
        if ph.p_align > 1 && ph.p_vaddr % ph.p_align != ph.p_offset % ph.p_align {
            Err(Error::BadAlignment)?;
        }
        if config.validate_addresses
            && !config.regions.iter().any(|r| {
                r.flags.contains(RegionFlags::WRITE | RegionFlags::RAM)
                    && r.contains_range(ph.p_vaddr, ph.p_memsz)
            })
        {
            Err(Error::SegmentOutsideRam)?;
        }
        if segments
            .iter()
            .any(|s| ph.p_vaddr < s.vaddr + s.mem_size && s.vaddr < seg_end)
        {
            Err(Error::SegmentsOverlap)?;
        }

        let segment = SegmentInfo {
            vaddr: ph.p_vaddr,
            file_size: ph.p_filesz,
            mem_size: ph.p_memsz,
            flags: ph.p_flags,
        };
        if segments.push(segment).is_err() {
            Err(Error::ImageTooLarge)?;
        }
        load_base = load_base.min(ph.p_vaddr);
        load_end = load_end.max(seg_end);
        total_mem_bytes = total_mem_bytes
            .checked_add(ph.p_memsz)
            .ok_or(Error::ImageTooLarge)?;
    }

    if segments.is_empty() {
        Err(Error::NoLoadableSegments)?;
    }
    if !segments.iter().any(|s| s.flags & PF_X != 0) {
        // some toolchains omit permission bits; not fatal
        warn!("image has no executable segment");
    }

    // pass 2: materialize
    let started = clock.micros();
    let mut bytes_copied = 0u32;
    let mut bytes_zeroed = 0u32;
    let mut chunk = [0u8; SECTOR_SIZE];

    for index in 0..info.phnum {
        let ph = read_phdr(source, &info, index)?;
        if ph.p_type != PT_LOAD || ph.p_memsz == 0 {
            continue;
        }

        copy_segment(source, memory, &ph, &mut chunk)?;
        bytes_copied += ph.p_filesz;
        if config.zero_bss {
            memory.zero(ph.p_vaddr + ph.p_filesz, ph.p_memsz - ph.p_filesz);
            bytes_zeroed += ph.p_memsz - ph.p_filesz;
        }
        if config.verify_after_load {
            verify_segment(source, memory, &ph, &mut chunk)?;
        }
    }
    let load_time_us = clock.micros().wrapping_sub(started);

    if !(load_base <= info.entry && info.entry < load_end) {
        Err(Error::EntryOutsideImage)?;
    }

    info!(
        "loaded {} segments, {} bytes copied, {} zeroed",
        segments.len(),
        bytes_copied,
        bytes_zeroed
    );
    Ok(LoadResult {
        entry: info.entry,
        load_base,
        load_end,
        total_mem_bytes,
        bytes_copied,
        bytes_zeroed,
        segments,
        load_time_us,
    })
}

fn copy_segment<S: ImageSource, M: Memory>(
    source: &mut S,
    memory: &mut M,
    ph: &ProgramHeader,
    chunk: &mut [u8; SECTOR_SIZE],
) -> Result<(), BootError> {
    let mut done = 0;
    while done < ph.p_filesz {
        let n = SECTOR_SIZE.min((ph.p_filesz - done) as usize);
        let got = source.read_at(ph.p_offset + done, &mut chunk[..n])?;
        if got != n {
            Err(Error::ShortRead)?;
        }
        memory.write(ph.p_vaddr + done, &chunk[..n]);
        done += n as u32;
    }
    Ok(())
}

fn verify_segment<S: ImageSource, M: Memory>(
    source: &mut S,
    memory: &M,
    ph: &ProgramHeader,
    chunk: &mut [u8; SECTOR_SIZE],
) -> Result<(), BootError> {
    let mut resident = [0u8; SECTOR_SIZE];
    let mut done = 0;
    while done < ph.p_filesz {
        let n = SECTOR_SIZE.min((ph.p_filesz - done) as usize);
        let got = source.read_at(ph.p_offset + done, &mut chunk[..n])?;
        if got != n {
            Err(Error::ShortRead)?;
        }
        memory.read(ph.p_vaddr + done, &mut resident[..n]);
        if chunk[..n] != resident[..n] {
            Err(Error::VerifyMismatch)?;
        }
        done += n as u32;
    }
    Ok(())
}

fn read_phdr<S: ImageSource>(
    source: &mut S,
    info: &ImageInfo,
    index: u16,
) -> Result<ProgramHeader, BootError> {
    let mut raw = [0u8; SIZEOF_PHDR];
    let offset = info
        .phoff
        .checked_add(index as u32 * info.phentsize as u32)
        .ok_or(Error::InvalidSegment)?;
    read_exact(source, offset, &mut raw)?;
    Ok(decode_phdr(&raw))
}

fn decode_phdr(raw: &[u8; SIZEOF_PHDR]) -> ProgramHeader {
    let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
    ProgramHeader {
        p_type: word(0),
        p_offset: word(4),
        p_vaddr: word(8),
        p_paddr: word(12),
        p_filesz: word(16),
        p_memsz: word(20),
        p_flags: word(24),
        p_align: word(28),
    }
}

fn read_exact<S: ImageSource>(source: &mut S, offset: u32, buf: &mut [u8]) -> Result<(), BootError> {
    let mut done = 0;
    while done < buf.len() {
        let got = source.read_at(offset + done as u32, &mut buf[done..])?;
        if got == 0 {
            Err(Error::ShortRead)?;
        }
        done += got;
    }
    Ok(())
}
