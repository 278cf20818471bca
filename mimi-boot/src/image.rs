//! Executable image identification.
//!
//! Checks run in a fixed order and the first failure wins, so a given
//! malformed header always reports the same code.

use core::fmt;
use goblin::elf::header::{
    ELFCLASS32, ELFDATA2LSB, ELFMAG, EI_CLASS, EI_DATA, EI_VERSION, EM_ARM, ET_EXEC, EV_CURRENT,
    SELFMAG,
};
use goblin::elf32::header::Header;
use goblin::elf32::program_header::SIZEOF_PHDR;

pub use goblin::elf32::header::SIZEOF_EHDR;

/// Upper bound on program headers a sane image presents.
pub const MAX_PROGRAM_HEADERS: u16 = 64;

/// Error while identifying the executable image.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Error {
    NotElf,
    WrongClass,
    WrongEncoding,
    WrongVersion,
    NotExecutable,
    NotArm,
    NoEntryPoint,
    NoProgramHeaders,
    BadProgramHeaderSize,
    TooManyProgramHeaders,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Error::NotElf => "not an executable (bad magic)",
            Error::WrongClass => "not a 32-bit image",
            Error::WrongEncoding => "not little-endian",
            Error::WrongVersion => "unsupported image version",
            Error::NotExecutable => "not an executable image",
            Error::NotArm => "not an ARM image",
            Error::NoEntryPoint => "entry point is null",
            Error::NoProgramHeaders => "no program headers",
            Error::BadProgramHeaderSize => "unexpected program header size",
            Error::TooManyProgramHeaders => "too many program headers",
        };
        write!(f, "{}", label)
    }
}

/// Validated summary of an executable header.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct ImageInfo {
    pub entry: u32,
    pub phoff: u32,
    pub phentsize: u16,
    pub phnum: u16,
}

// `Header::from_bytes` is a plain cast and needs word alignment.
#[repr(C, align(4))]
struct RawHeader([u8; SIZEOF_EHDR]);

/// Validates the first `SIZEOF_EHDR` bytes of the image.
pub fn validate(bytes: &[u8]) -> Result<ImageInfo, Error> {
    if bytes.len() < SIZEOF_EHDR {
        Err(Error::NotElf)?;
    }
    let mut raw = RawHeader([0; SIZEOF_EHDR]);
    raw.0.copy_from_slice(&bytes[..SIZEOF_EHDR]);
    let header = Header::from_bytes(&raw.0);

    if header.e_ident[..SELFMAG] != ELFMAG[..] {
        Err(Error::NotElf)?;
    }
    if header.e_ident[EI_CLASS] != ELFCLASS32 {
        Err(Error::WrongClass)?;
    }
    if header.e_ident[EI_DATA] != ELFDATA2LSB {
        Err(Error::WrongEncoding)?;
    }
    if header.e_ident[EI_VERSION] != EV_CURRENT || header.e_version != EV_CURRENT as u32 {
        Err(Error::WrongVersion)?;
    }
    if header.e_type != ET_EXEC {
        Err(Error::NotExecutable)?;
    }
    if header.e_machine != EM_ARM {
        Err(Error::NotArm)?;
    }
    if header.e_entry == 0 {
        Err(Error::NoEntryPoint)?;
    }
    if header.e_phoff == 0 || header.e_phnum == 0 {
        Err(Error::NoProgramHeaders)?;
    }
    if header.e_phentsize as usize != SIZEOF_PHDR {
        Err(Error::BadProgramHeaderSize)?;
    }
    if header.e_phnum > MAX_PROGRAM_HEADERS {
        Err(Error::TooManyProgramHeaders)?;
    }

    Ok(ImageInfo {
        entry: header.e_entry,
        phoff: header.e_phoff,
        phentsize: header.e_phentsize,
        phnum: header.e_phnum,
    })
}
