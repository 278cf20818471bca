//! Boot orchestration: mount, select, load, hand off.
//!
//! [`prepare`] runs the whole sequence short of the jump and returns a
//! [`Prepared`] value, so the jump itself is the only step that needs a
//! live target. Errors surface unchanged from the layer that produced
//! them; the only retry anywhere is the single fallback-path reopen.

use crate::clock::Clock;
use crate::config::{BootOptions, MAX_CONFIG_LEN};
use crate::error::BootError;
use crate::fs::fat::{self, FatFile, FileSystem};
use crate::fs::Volume;
use crate::handoff;
use crate::loader::{self, LoadResult, LoaderConfig, Memory};
use core::mem;
use log::info;
use mimi_common::handoff::{BootReason, BootSource, Handoff};
use mimi_common::memory_map::MemoryRegion;

/// Where the boot configuration lives on the medium.
pub const CONFIG_PATH: &str = "/boot/boot.cfg";

/// Fixed facts about the platform, supplied by the HAL.
#[derive(Debug, Clone, Copy)]
pub struct PlatformInfo {
    pub sys_clock_hz: u32,
    /// The RAM the image may be loaded into.
    pub ram: MemoryRegion,
    /// The flash the bootloader itself occupies.
    pub loader_flash: MemoryRegion,
    pub boot_reason: BootReason,
    pub boot_source: BootSource,
}

/// A fully staged image, ready for the jump.
pub struct Prepared<'h> {
    pub entry: u32,
    pub handoff: &'h mut Handoff,
}

#[cfg(target_arch = "arm")]
impl Prepared<'_> {
    /// Transfers control to the image. Does not return.
    pub fn launch(self) -> ! {
        crate::arch::transfer(self.handoff, self.entry)
    }

    /// As [`launch`], additionally installing `sp` as the main stack
    /// pointer first.
    ///
    /// [`launch`]: Prepared::launch
    pub fn launch_with_sp(self, sp: u32) -> ! {
        crate::arch::transfer_with_sp(self.handoff, self.entry, sp)
    }
}

/// Runs the boot sequence up to (not including) the control transfer.
pub fn prepare<'h, V, M, C>(
    volume: V,
    memory: &mut M,
    clock: &C,
    platform: &PlatformInfo,
    handoff: &'h mut Handoff,
) -> Result<Prepared<'h>, BootError>
where
    V: Volume,
    M: Memory,
    C: Clock,
{
    let started = clock.micros();

    info!("mount");
    let mut fs = FileSystem::mount(volume)?;

    let options = read_options(&mut fs);
    let (file, path) = open_image(&mut fs, &options)?;
    info!("image {} ({} bytes)", path, file.size());

    let regions = [platform.ram];
    let config = LoaderConfig {
        regions: &regions,
        validate_addresses: true,
        zero_bss: true,
        verify_after_load: options.verify,
    };
    let mut source = FatFile::new(&mut fs, file);
    let result = loader::load(&config, &mut source, memory, clock)?;

    check_handoff_placement(handoff, &result)?;
    // total elapsed, captured immediately before the descriptor is sealed
    let boot_time_us = clock.micros().wrapping_sub(started);
    handoff::build(handoff, platform, &result, path, boot_time_us);

    info!("entry 0x{:08x}", result.entry);
    Ok(Prepared { entry: result.entry, handoff })
}

fn read_options<V: Volume>(fs: &mut FileSystem<V>) -> BootOptions {
    let mut text = [0u8; MAX_CONFIG_LEN];
    match fs.open(CONFIG_PATH) {
        Ok(mut file) if !file.is_dir() => match fs.read(&mut file, &mut text) {
            Ok(n) => BootOptions::parse_bytes(&text[..n]),
            Err(_) => BootOptions::default(),
        },
        _ => BootOptions::default(),
    }
}

fn open_image<'a, V: Volume>(
    fs: &mut FileSystem<V>,
    options: &'a BootOptions,
) -> Result<(fat::File, &'a str), BootError> {
    let file = match fs.open(options.image()) {
        Ok(file) => return checked(file, options.image()),
        // the fallback is consulted once, and only when the primary is absent
        Err(fat::Error::NotFound) => match options.fallback() {
            Some(fallback) => {
                info!("{} not found, trying {}", options.image(), fallback);
                fs.open(fallback)?
            }
            None => Err(fat::Error::NotFound)?,
        },
        Err(e) => Err(e)?,
    };
    checked(file, options.fallback().unwrap_or(options.image()))
}

fn checked<'a>(file: fat::File, path: &'a str) -> Result<(fat::File, &'a str), BootError> {
    if file.is_dir() {
        Err(fat::Error::Invalid("image is a directory"))?;
    }
    Ok((file, path))
}

/// The descriptor must survive until the image reads it, so it cannot
/// lie inside the loaded range.
fn check_handoff_placement(handoff: &Handoff, result: &LoadResult) -> Result<(), BootError> {
    let addr = handoff as *const Handoff as usize as u64;
    let end = addr + mem::size_of::<Handoff>() as u64;
    if addr < u64::from(result.load_end) && u64::from(result.load_base) < end {
        Err(loader::Error::InvalidRegion)?;
    }
    Ok(())
}
