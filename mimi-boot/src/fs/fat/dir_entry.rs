use super::SliceExt;
use heapless::String;

/// Deserialized directory record.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub(super) enum DirEntry {
    UnusedTerminal,
    Unused,
    Lfn(LfnEntry),
    Sfn(SfnEntry),
}

impl DirEntry {
    pub(super) const SIZE: usize = 32;

    const VOLUME_ID: u8 = 0x08;
    pub(super) const DIRECTORY: u8 = 0x10;
    const LONG_FILE_NAME: u8 = 0x0f;
    const LONG_FILE_NAME_MASK: u8 = 0x3f;
}

impl From<[u8; 32]> for DirEntry {
    fn from(buf: [u8; 32]) -> Self {
        let status = buf[0];
        let attr = buf[11];

        if status == 0xe5 {
            Self::Unused
        } else if status == 0x00 {
            Self::UnusedTerminal
        } else if (attr & Self::LONG_FILE_NAME_MASK) == Self::LONG_FILE_NAME {
            Self::Lfn(LfnEntry::from(buf))
        } else {
            Self::Sfn(SfnEntry::from(buf))
        }
    }
}

/// Deserialized short-file-name record.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub(super) struct SfnEntry {
    name: [u8; 11],
    attr: u8,
    nt_res: u8,
    fst_clus_hi: u16,
    fst_clus_lo: u16,
    file_size: u32,
}

impl SfnEntry {
    /// Appends the 8.3 name: padding stripped, a `.` between basename and
    /// extension, the NT lowercase bits honoured.
    pub(super) fn put_name_into(&self, dest: &mut String<255>) {
        let mut put = |seq: &[u8], is_lower: bool| {
            for c in seq {
                let _ = match *c {
                    32 => break,
                    65..=90 if is_lower => dest.push((*c + 32) as char),
                    33..=126 => dest.push(*c as char),
                    _ => dest.push('\u{fffd}'),
                };
            }
        };
        put(&self.name[0..8], (self.nt_res & 0x08) == 0x08);
        if self.name[8] != 32 {
            put(&[b'.'], false);
        }
        put(&self.name[8..11], (self.nt_res & 0x10) == 0x10);
    }

    /// First cluster composed from the high and low 16-bit halves.
    pub(super) fn cluster_index(&self) -> u32 {
        self.fst_clus_lo as u32 | ((self.fst_clus_hi as u32) << 16)
    }

    pub(super) fn attr(&self) -> u8 {
        self.attr
    }

    pub(super) fn file_size(&self) -> u32 {
        self.file_size
    }

    pub(super) fn is_volume_id(&self) -> bool {
        (self.attr & DirEntry::VOLUME_ID) != 0
    }

    pub(super) fn is_directory(&self) -> bool {
        (self.attr & DirEntry::DIRECTORY) != 0
    }
}

impl From<[u8; 32]> for SfnEntry {
    fn from(buf: [u8; 32]) -> Self {
        Self {
            name: buf.array::<11>(0),
            attr: buf[11],
            nt_res: buf[12],
            fst_clus_hi: u16::from_le_bytes(buf.array::<2>(20)),
            fst_clus_lo: u16::from_le_bytes(buf.array::<2>(26)),
            file_size: u32::from_le_bytes(buf.array::<4>(28)),
        }
    }
}

/// Deserialized long-file-name record.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub(super) struct LfnEntry {
    ord: u8,
    name1: [u8; 10],
    name2: [u8; 12],
    name3: [u8; 4],
}

impl LfnEntry {
    const LAST_LONG_ENTRY: u8 = 0x40;

    pub(super) fn is_last_entry(&self) -> bool {
        (self.ord & Self::LAST_LONG_ENTRY) != 0
    }

    /// Position of this fragment, 1-based; bits 0..5 of the ordinal.
    pub(super) fn order(&self) -> usize {
        (self.ord & !Self::LAST_LONG_ENTRY) as usize
    }

    /// Copies the 13 name units, taking the low byte of each UCS-2 unit.
    pub(super) fn put_name_parts_into(&self, buf: &mut [u8; 13]) {
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = match i {
                0..=4 => self.name1[i * 2],
                5..=10 => self.name2[(i - 5) * 2],
                _ => self.name3[(i - 11) * 2],
            };
        }
    }
}

impl From<[u8; 32]> for LfnEntry {
    fn from(buf: [u8; 32]) -> Self {
        Self {
            ord: buf[0],
            name1: buf.array::<10>(1),
            name2: buf.array::<12>(14),
            name3: buf.array::<4>(28),
        }
    }
}

/// Accumulates long-name fragments as they appear on disk (highest index
/// first). The 0x40 ordinal bit marks the last fragment and resets the
/// accumulator; deleted and volume-label records invalidate it.
pub(super) struct LfnBuffer {
    buf: [u8; Self::CAP],
    valid: bool,
}

impl LfnBuffer {
    // 20 fragments of 13 units each
    const CAP: usize = 260;

    pub(super) fn new() -> Self {
        Self { buf: [0; Self::CAP], valid: false }
    }

    pub(super) fn reset(&mut self) {
        self.valid = false;
    }

    pub(super) fn push(&mut self, entry: &LfnEntry) {
        if entry.is_last_entry() {
            self.buf = [0; Self::CAP];
            self.valid = true;
        }
        let order = entry.order();
        if !self.valid || !(1..=20).contains(&order) {
            self.valid = false;
            return;
        }
        let mut part = [0u8; 13];
        entry.put_name_parts_into(&mut part);
        self.buf[(order - 1) * 13..order * 13].copy_from_slice(&part);
    }

    /// Moves the accumulated name into `dest`; false when no complete
    /// name was pending. The accumulator is consumed either way.
    pub(super) fn take_into(&mut self, dest: &mut String<255>) -> bool {
        let valid = self.valid;
        self.valid = false;
        if !valid {
            return false;
        }
        for &b in self.buf.iter() {
            // 0x0000-terminated, 0xffff-padded; only low bytes are kept
            if b == 0 {
                break;
            }
            if dest.push(b as char).is_err() {
                break;
            }
        }
        !dest.is_empty()
    }
}
