//! # Executable images
//!
//! ```text
//!  0        4                          28           32
//!  ┌────────┬──────────────────────────┬────────────┬───────────────┐
//!  │ "YXE1" │ entry symbol, NUL padded │ payload_len│ payload ...   │
//!  └────────┴──────────────────────────┴────────────┴───────────────┘
//! ```
//!
//! The whole image is loaded at `PROG_BASE`, so the payload starts at
//! `PROG_ENTRY`. The entry symbol names the code to run; it is resolved
//! through the kernel's [`EntryTable`].

use kernel_info::memory::{IMAGE_HEADER_SIZE, PROG_MAX_SIZE};
use std::collections::BTreeMap;
use stdlib::{Program, ProgramMain};
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"YXE1";

/// Bytes reserved for the entry symbol.
pub const ENTRY_FIELD: usize = 24;

pub const HEADER_SIZE: usize = IMAGE_HEADER_SIZE as usize;

const ENTRY_AT: usize = MAGIC.len();
const LEN_AT: usize = ENTRY_AT + ENTRY_FIELD;

const _: () = assert!(LEN_AT + 4 == HEADER_SIZE);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("image is shorter than its {HEADER_SIZE} byte header")]
    Truncated,
    #[error("bad magic")]
    BadMagic,
    #[error("entry symbol is not UTF-8")]
    EntryNotUtf8,
    #[error("entry symbol is empty")]
    EmptyEntry,
    #[error("entry symbol is longer than {ENTRY_FIELD} bytes")]
    EntryTooLong,
    #[error("header declares {declared} payload bytes but {actual} follow")]
    PayloadLength { declared: usize, actual: usize },
    #[error("image of {0} bytes exceeds {max} bytes", max = PROG_MAX_SIZE)]
    TooLarge(usize),
}

/// A parsed image, borrowing from the loaded bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Image<'a> {
    pub entry: &'a str,
    pub payload: &'a [u8],
}

/// Build the image bytes for `entry` with `payload` as initialized data.
///
/// # Errors
/// The entry symbol is empty or too long, or the image would not fit the
/// image window.
pub fn encode(entry: &str, payload: &[u8]) -> Result<Vec<u8>, ImageError> {
    if entry.is_empty() {
        return Err(ImageError::EmptyEntry);
    }
    if entry.len() > ENTRY_FIELD {
        return Err(ImageError::EntryTooLong);
    }
    let total = HEADER_SIZE + payload.len();
    let declared = u32::try_from(payload.len()).map_err(|_| ImageError::TooLarge(total))?;
    if total > PROG_MAX_SIZE as usize {
        return Err(ImageError::TooLarge(total));
    }

    let mut bytes = Vec::with_capacity(total);
    bytes.extend_from_slice(MAGIC);
    let mut field = [0u8; ENTRY_FIELD];
    field[..entry.len()].copy_from_slice(entry.as_bytes());
    bytes.extend_from_slice(&field);
    bytes.extend_from_slice(&declared.to_le_bytes());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Validate the header of `bytes`.
///
/// Trailing bytes past the declared payload are rejected, as are images
/// whose payload is cut short.
///
/// # Errors
/// See [`ImageError`].
pub fn parse(bytes: &[u8]) -> Result<Image<'_>, ImageError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ImageError::Truncated);
    }
    if &bytes[..ENTRY_AT] != MAGIC {
        return Err(ImageError::BadMagic);
    }

    let field = &bytes[ENTRY_AT..LEN_AT];
    let end = field.iter().position(|&b| b == 0).unwrap_or(ENTRY_FIELD);
    let entry = core::str::from_utf8(&field[..end]).map_err(|_| ImageError::EntryNotUtf8)?;
    if entry.is_empty() {
        return Err(ImageError::EmptyEntry);
    }

    let mut raw_len = [0u8; 4];
    raw_len.copy_from_slice(&bytes[LEN_AT..HEADER_SIZE]);
    let declared = u32::from_le_bytes(raw_len) as usize;
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != declared {
        return Err(ImageError::PayloadLength {
            declared,
            actual: payload.len(),
        });
    }
    Ok(Image { entry, payload })
}

/// Maps entry symbols to the code they name.
#[derive(Default, Clone)]
pub struct EntryTable {
    entries: BTreeMap<&'static str, ProgramMain>,
}

impl EntryTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, program: &Program) {
        self.entries.insert(program.name, program.main);
    }

    #[must_use]
    pub fn resolve(&self, entry: &str) -> Option<ProgramMain> {
        self.entries.get(entry).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl core::fmt::Debug for EntryTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use stdlib::{SyscallPort, UserResult};

    #[allow(clippy::unnecessary_wraps)]
    fn nop(_: &mut dyn SyscallPort) -> UserResult<i32> {
        Ok(0)
    }

    #[test]
    fn encoded_images_parse_back() {
        let bytes = encode("hello", b"Hello!\n").unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 7);
        let image = parse(&bytes).unwrap();
        assert_eq!(image.entry, "hello");
        assert_eq!(image.payload, b"Hello!\n");
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let good = encode("sh", &[1, 2, 3]).unwrap();

        assert_eq!(parse(&good[..HEADER_SIZE - 1]), Err(ImageError::Truncated));

        let mut bad_magic = good.clone();
        bad_magic[0] = b'Z';
        assert_eq!(parse(&bad_magic), Err(ImageError::BadMagic));

        let mut no_entry = good.clone();
        no_entry[ENTRY_AT..LEN_AT].fill(0);
        assert_eq!(parse(&no_entry), Err(ImageError::EmptyEntry));

        let mut not_utf8 = good.clone();
        not_utf8[ENTRY_AT] = 0xFF;
        assert_eq!(parse(&not_utf8), Err(ImageError::EntryNotUtf8));

        assert_eq!(
            parse(&good[..good.len() - 1]),
            Err(ImageError::PayloadLength {
                declared: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn entry_symbols_are_bounded() {
        assert_eq!(encode("", b""), Err(ImageError::EmptyEntry));
        assert_eq!(encode(&"x".repeat(25), b""), Err(ImageError::EntryTooLong));
        // Exactly filling the field leaves no NUL, which is allowed.
        let full = "y".repeat(ENTRY_FIELD);
        assert_eq!(parse(&encode(&full, b"").unwrap()).unwrap().entry, full);
        assert!(matches!(
            encode("big", &vec![0; PROG_MAX_SIZE as usize]),
            Err(ImageError::TooLarge(_))
        ));
    }

    #[test]
    fn entries_resolve_by_name() {
        let mut table = EntryTable::new();
        table.insert(&Program {
            name: "nop",
            main: nop,
            data: &[],
        });
        assert!(table.resolve("nop").is_some());
        assert!(table.resolve("sh").is_none());
        assert_eq!(table.len(), 1);
    }
}
