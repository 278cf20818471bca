//! MimiBoot: a second-stage bootloader core for Cortex-M class parts.
//!
//! The crate mounts a FAT32 volume over a 512-byte block source, resolves
//! the configured image path, validates and loads an ELF executable into
//! RAM with a two-pass discipline, builds the 256-byte handoff descriptor
//! and transfers control with interrupts masked. Chip startup, the SD
//! driver and the rest of the HAL stay outside; they enter through the
//! [`fs::Volume`], [`clock::Clock`] and [`loader::Memory`] traits.

#![cfg_attr(not(test), no_std)]

#[cfg(target_arch = "arm")]
pub mod arch;
pub mod boot;
pub mod clock;
pub mod config;
pub mod error;
pub mod fs;
pub mod handoff;
pub mod image;
pub mod loader;

pub use boot::{prepare, PlatformInfo, Prepared};
pub use clock::Clock;
pub use error::BootError;
pub use fs::Volume;
pub use loader::Memory;
