//! FAT32 file system reader.
//!
//! Read-only and allocation-free: one 512-byte scratch sector plus a
//! one-sector FAT cache back every operation, so there is exactly one
//! in-flight reader per mounted volume. Long file names are decoded with
//! the low byte of each UCS-2 unit only; paths in scope are ASCII.

use super::{Volume, VolumeError, SECTOR_SIZE};
use crate::error::BootError;
use crate::loader::ImageSource;
use core::fmt;
use dir_entry::{DirEntry as RawDirEntry, LfnBuffer, SfnEntry};
use fat_entry::FatEntry;
use heapless::String;
use log::trace;

mod boot_sector;
mod dir_entry;
mod fat_entry;
mod partition;

pub use boot_sector::BootSector;

/// Errors that occur during FAT file system operations.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Error {
    Volume(VolumeError),
    /// The medium does not carry a FAT32 volume this reader accepts.
    NotFat32(&'static str),
    NotFound,
    NotDirectory,
    /// A cluster chain ended before `file_size` bytes were reachable.
    EndOfFile,
    /// On-disk structure broken.
    Invalid(&'static str),
}

impl From<VolumeError> for Error {
    fn from(e: VolumeError) -> Self {
        Self::Volume(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Volume(e) => write!(f, "{}", e),
            Error::NotFat32(s) => write!(f, "not FAT32: {}", s),
            Error::NotFound => write!(f, "not found"),
            Error::NotDirectory => write!(f, "not a directory"),
            Error::EndOfFile => write!(f, "unexpected end of file"),
            Error::Invalid(s) => write!(f, "broken file system: {}", s),
        }
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash)]
pub(crate) struct Cluster(u32);

impl Cluster {
    pub(crate) fn from_index(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Entry point of the FAT file system. Immutable after [`mount`] apart
/// from its internal sector buffers.
///
/// [`mount`]: FileSystem::mount
pub struct FileSystem<V> {
    volume: V,
    bs: BootSector,
    /// LBA of the partition's first sector; 0 on super-floppy media.
    partition_start: u32,
    first_fat_sector: u32,
    first_data_sector: u32,
    bytes_per_cluster: u32,
    scratch: [u8; SECTOR_SIZE],
    fat_cache: SectorCache,
}

impl<V: Volume> FileSystem<V> {
    /// Mounts the volume: locates the FAT32 partition (or treats the
    /// medium as super-floppy), decodes the BIOS parameter block and
    /// derives the FAT and data area layout.
    pub fn mount(mut volume: V) -> Result<Self, Error> {
        let mut buf = [0u8; SECTOR_SIZE];
        volume.read(0, &mut buf)?;
        let partition_start = partition::locate_fat32(&buf)?;

        if partition_start != 0 {
            volume.read(partition_start, &mut buf)?;
        }
        let bs = BootSector::try_from(&buf[..])?;

        // the BPB fields are untrusted; a corrupt header must not wrap
        // the area arithmetic
        let fat_area = bs
            .fat_count()
            .checked_mul(bs.fat_size())
            .ok_or(Error::Invalid("layout overflow"))?;
        let first_fat_sector = partition_start
            .checked_add(bs.reserved_sector_count())
            .ok_or(Error::Invalid("layout overflow"))?;
        let first_data_sector = first_fat_sector
            .checked_add(fat_area)
            .ok_or(Error::Invalid("layout overflow"))?;
        let bytes_per_cluster = bs.cluster_size() * SECTOR_SIZE as u32;
        trace!(
            "fat32: partition at {}, root cluster {}",
            partition_start,
            bs.root_dir_cluster()
        );

        Ok(Self {
            volume,
            bs,
            partition_start,
            first_fat_sector,
            first_data_sector,
            bytes_per_cluster,
            scratch: [0; SECTOR_SIZE],
            fat_cache: SectorCache::new(),
        })
    }

    pub fn boot_sector(&self) -> &BootSector {
        &self.bs
    }

    pub fn partition_start(&self) -> u32 {
        self.partition_start
    }

    pub fn first_fat_sector(&self) -> u32 {
        self.first_fat_sector
    }

    pub fn first_data_sector(&self) -> u32 {
        self.first_data_sector
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_cluster
    }

    /// First sector of the given cluster's data.
    fn cluster_location(&self, n: Cluster) -> u32 {
        self.first_data_sector + (n.index() - 2) * self.bs.cluster_size()
    }

    fn fat_entry(&mut self, n: Cluster) -> Result<FatEntry, Error> {
        let byte_offset = n.index() * 4;
        let sector = self.first_fat_sector + byte_offset / SECTOR_SIZE as u32;
        let offset = (byte_offset % SECTOR_SIZE as u32) as usize;
        let buf = self.fat_cache.load(&mut self.volume, sector)?;
        Ok(FatEntry::from(u32::from_le_bytes(buf.array::<4>(offset))))
    }

    /// The cluster following `n` in its chain, if any.
    fn next_cluster(&mut self, n: Cluster) -> Result<Option<Cluster>, Error> {
        Ok(match self.fat_entry(n)? {
            FatEntry::Chained(next) => Some(next),
            _ => None,
        })
    }

    /// Resolves an absolute `/`-separated path. `/` and the empty path
    /// denote the root directory itself.
    pub fn open(&mut self, path: &str) -> Result<File, Error> {
        let mut cluster = self.bs.root_dir_cluster();
        let mut found: Option<DirEntry> = None;

        for component in path.split('/').filter(|c| !c.is_empty()) {
            if let Some(prev) = found.take() {
                if !prev.is_dir {
                    Err(Error::NotDirectory)?;
                }
                cluster = Cluster::from_index(prev.first_cluster);
            }
            found = Some(self.find_in_dir(cluster, component)?);
        }

        Ok(match found {
            Some(e) => {
                trace!("fat32: open {} ({} bytes)", path, e.size);
                File::new(Cluster::from_index(e.first_cluster), e.size, e.attr)
            }
            None => File::new(self.bs.root_dir_cluster(), 0, RawDirEntry::DIRECTORY),
        })
    }

    /// Walks one directory's cluster chain looking for `name`
    /// (case-insensitively), accumulating long-name fragments on the way.
    fn find_in_dir(&mut self, dir: Cluster, name: &str) -> Result<DirEntry, Error> {
        if dir.index() < 2 {
            Err(Error::Invalid("directory cluster"))?;
        }
        let mut lfn = LfnBuffer::new();
        let mut cluster = dir;

        loop {
            for s in 0..self.bs.cluster_size() {
                let sector = self.cluster_location(cluster) + s;
                self.volume.read(sector, &mut self.scratch)?;

                for i in 0..SECTOR_SIZE / RawDirEntry::SIZE {
                    let raw =
                        RawDirEntry::from(self.scratch.array::<{ RawDirEntry::SIZE }>(i * RawDirEntry::SIZE));
                    match raw {
                        RawDirEntry::UnusedTerminal => return Err(Error::NotFound),
                        RawDirEntry::Unused => lfn.reset(),
                        RawDirEntry::Lfn(e) => lfn.push(&e),
                        RawDirEntry::Sfn(e) if e.is_volume_id() => lfn.reset(),
                        RawDirEntry::Sfn(e) => {
                            let entry = DirEntry::decode(&e, &mut lfn);
                            if entry.name.eq_ignore_ascii_case(name) {
                                return Ok(entry);
                            }
                        }
                    }
                }
            }
            cluster = match self.next_cluster(cluster)? {
                Some(next) => next,
                None => return Err(Error::NotFound),
            };
        }
    }

    /// Reads up to `buf.len()` bytes at the file's position, a sector at a
    /// time through the scratch buffer. The request is truncated to the
    /// bytes remaining in the file; the count delivered is returned.
    pub fn read(&mut self, file: &mut File, buf: &mut [u8]) -> Result<usize, Error> {
        let remaining_in_file = (file.file_size - file.position) as usize;
        let want = buf.len().min(remaining_in_file);
        let mut delivered = 0;

        while delivered < want {
            let cluster = match file.current_cluster {
                Some(c) => c,
                None => Err(Error::EndOfFile)?,
            };
            let cluster_offset = file.position % self.bytes_per_cluster;
            let sector = self.cluster_location(cluster) + cluster_offset / SECTOR_SIZE as u32;
            let in_sector = (cluster_offset % SECTOR_SIZE as u32) as usize;
            let n = (SECTOR_SIZE - in_sector).min(want - delivered);

            self.volume.read(sector, &mut self.scratch)?;
            buf[delivered..delivered + n].copy_from_slice(&self.scratch[in_sector..in_sector + n]);
            delivered += n;
            file.position += n as u32;

            if file.position % self.bytes_per_cluster == 0 {
                file.current_cluster = self.next_cluster(cluster)?;
            }
        }

        if file.position == file.file_size {
            file.current_cluster = None;
        }
        Ok(delivered)
    }

    /// Absolute seek, clamped to the file size. Rewalks the cluster chain
    /// from the start, one FAT lookup per whole cluster skipped.
    pub fn seek(&mut self, file: &mut File, offset: u32) -> Result<u32, Error> {
        let position = offset.min(file.file_size);
        let mut cluster = file.chain_start();
        for _ in 0..position / self.bytes_per_cluster {
            cluster = match cluster {
                Some(c) => self.next_cluster(c)?,
                None => None,
            };
        }

        file.position = position;
        file.current_cluster = if position == file.file_size { None } else { cluster };
        Ok(position)
    }
}

struct SectorCache {
    sector: Option<u32>,
    buf: [u8; SECTOR_SIZE],
}

impl SectorCache {
    fn new() -> Self {
        Self { sector: None, buf: [0; SECTOR_SIZE] }
    }

    fn load<'a, V: Volume>(
        &'a mut self,
        volume: &mut V,
        sector: u32,
    ) -> Result<&'a [u8; SECTOR_SIZE], Error> {
        if self.sector != Some(sector) {
            // invalidate first: a failed read must not leave stale bytes marked valid
            self.sector = None;
            volume.read(sector, &mut self.buf)?;
            self.sector = Some(sector);
        }
        Ok(&self.buf)
    }
}

/// An open file or directory on the mounted volume.
///
/// `position <= file_size` always holds; `current_cluster` is the cluster
/// containing byte `position`, or `None` once the position sits at the
/// end of the file.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct File {
    start_cluster: Cluster,
    current_cluster: Option<Cluster>,
    file_size: u32,
    position: u32,
    attr: u8,
}

impl File {
    fn new(start_cluster: Cluster, file_size: u32, attr: u8) -> Self {
        let current = if file_size > 0 && start_cluster.index() >= 2 {
            Some(start_cluster)
        } else {
            None
        };
        Self {
            start_cluster,
            current_cluster: current,
            file_size,
            position: 0,
            attr,
        }
    }

    fn chain_start(&self) -> Option<Cluster> {
        if self.start_cluster.index() >= 2 {
            Some(self.start_cluster)
        } else {
            None
        }
    }

    pub fn size(&self) -> u32 {
        self.file_size
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn is_dir(&self) -> bool {
        (self.attr & RawDirEntry::DIRECTORY) != 0
    }
}

/// A decoded directory entry.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct DirEntry {
    pub name: String<255>,
    pub size: u32,
    pub first_cluster: u32,
    pub attr: u8,
    pub is_dir: bool,
}

impl DirEntry {
    fn decode(sfn: &SfnEntry, lfn: &mut LfnBuffer) -> Self {
        let mut name = String::new();
        if !lfn.take_into(&mut name) {
            name.clear();
            sfn.put_name_into(&mut name);
        }
        DirEntry {
            name,
            size: sfn.file_size(),
            first_cluster: sfn.cluster_index(),
            attr: sfn.attr(),
            is_dir: sfn.is_directory(),
        }
    }
}

/// Byte-granular image source over an open file, for the segment loader.
pub struct FatFile<'a, V> {
    fs: &'a mut FileSystem<V>,
    file: File,
}

impl<'a, V: Volume> FatFile<'a, V> {
    pub fn new(fs: &'a mut FileSystem<V>, file: File) -> Self {
        Self { fs, file }
    }
}

impl<'a, V: Volume> ImageSource for FatFile<'a, V> {
    fn size(&self) -> u32 {
        self.file.size()
    }

    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, BootError> {
        if self.file.position() != offset {
            self.fs.seek(&mut self.file, offset)?;
            if self.file.position() != offset {
                // seek clamps: offsets past the end deliver nothing
                return Ok(0);
            }
        }
        Ok(self.fs.read(&mut self.file, buf)?)
    }
}

pub(crate) trait SliceExt {
    fn array<const N: usize>(&self, offset: usize) -> [u8; N];
}

impl SliceExt for [u8] {
    fn array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut ret = [0; N];
        ret.copy_from_slice(&self[offset..offset + N]);
        ret
    }
}
