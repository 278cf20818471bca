//! Boot configuration: flat `key=value` lines over the boot medium.

use heapless::String;

/// Longest configuration file the loader reads.
pub const MAX_CONFIG_LEN: usize = 1024;
pub const MAX_PATH_LEN: usize = 128;

pub const DEFAULT_IMAGE: &str = "/boot/kernel.elf";

/// Options selected by the boot configuration file.
///
/// Unknown keys and malformed lines are skipped; a missing file leaves
/// the defaults in place.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct BootOptions {
    image: String<MAX_PATH_LEN>,
    fallback: Option<String<MAX_PATH_LEN>>,
    /// Re-read and compare every copied byte after loading.
    pub verify: bool,
    /// Reset instead of parking on the failure indication loop.
    pub reset_on_fail: bool,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            image: path_of(DEFAULT_IMAGE).unwrap_or_default(),
            fallback: None,
            verify: false,
            reset_on_fail: false,
        }
    }
}

impl BootOptions {
    /// Primary image path.
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Consulted once when the primary path is absent.
    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    pub fn parse(text: &str) -> Self {
        let mut options = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some(kv) => kv,
                None => continue,
            };
            match (key.trim(), value.trim()) {
                ("image", value) => {
                    if let Some(path) = path_of(value) {
                        options.image = path;
                    }
                }
                ("fallback", value) => options.fallback = path_of(value),
                ("verify", value) => options.verify = flag(value),
                ("reset_on_fail", value) => options.reset_on_fail = flag(value),
                _ => {}
            }
        }
        options
    }

    /// As [`parse`], from raw file bytes; non-UTF-8 input yields defaults.
    ///
    /// [`parse`]: BootOptions::parse
    pub fn parse_bytes(bytes: &[u8]) -> Self {
        match core::str::from_utf8(bytes) {
            Ok(text) => Self::parse(text),
            Err(_) => Self::default(),
        }
    }
}

fn path_of(value: &str) -> Option<String<MAX_PATH_LEN>> {
    if value.is_empty() {
        return None;
    }
    let mut path = String::new();
    path.push_str(value).ok()?;
    Some(path)
}

fn flag(value: &str) -> bool {
    matches!(value, "1" | "true" | "yes" | "on")
}
