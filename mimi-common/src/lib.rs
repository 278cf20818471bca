//! Types crossing the bootloader → image boundary.

#![cfg_attr(not(test), no_std)]

#[cfg(not(target_endian = "little"))]
compile_error!("the handoff descriptor layout is little-endian only");

pub mod handoff;
pub mod memory_map;
