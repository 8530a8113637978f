//! Reader for the sysroot archive that seeds the virtual filesystem.
//!
//! The archive is a sequence of 512-byte blocks in the GNU flavour of the
//! tar format. Only regular files (`'0'`) and directories (`'5'`) are
//! supported; anything else is an assertion failure.

use crate::error::{Error, Result};
use crate::memory::decode;

const BLOCK_SIZE: usize = 512;
const MAGIC: &[u8] = b"ustar  ";

// Header field layout: (offset, length).
const NAME: (usize, usize) = (0, 100);
const SIZE: (usize, usize) = (124, 12);
const TYPEFLAG: (usize, usize) = (156, 1);
const MAGIC_FIELD: (usize, usize) = (257, 8);
const PREFIX: (usize, usize) = (345, 155);

/// Type tag of an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
}

/// One parsed entry. Contents borrow from the archive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry<'a> {
    pub name: String,
    pub kind: EntryKind,
    pub size: usize,
    pub contents: &'a [u8],
}

/// Destination for an unpacked directory tree.
pub trait TreeBuilder {
    fn add_directory(&mut self, path: &str) -> Result<()>;
    fn add_file(&mut self, path: &str, contents: &[u8]) -> Result<()>;
}

/// Sequential reader over an archive buffer.
pub struct Archive<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Archive<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Parse the next entry.
    ///
    /// Returns `None` once fewer than 512 bytes remain or a header's magic
    /// marker does not match, which is how the trailing zero blocks end an
    /// archive.
    pub fn next_entry(&mut self) -> Result<Option<ArchiveEntry<'a>>> {
        if self.offset + BLOCK_SIZE > self.bytes.len() {
            return Ok(None);
        }

        let header = &self.bytes[self.offset..self.offset + BLOCK_SIZE];
        if field_bytes(header, MAGIC_FIELD) != MAGIC {
            return Ok(None);
        }

        let mut name = field_str(header, NAME);
        let prefix = field_str(header, PREFIX);
        if !prefix.is_empty() {
            name = format!("{prefix}/{name}");
        }
        let size = parse_octal(header, SIZE)?;
        let typeflag = header[TYPEFLAG.0];
        self.offset += BLOCK_SIZE;

        let kind = match typeflag {
            b'0' => EntryKind::Regular,
            b'5' => EntryKind::Directory,
            other => {
                return Err(Error::assertion(format!(
                    "unsupported archive entry type {:?} for `{name}`",
                    char::from(other)
                )))
            }
        };

        let contents = match kind {
            EntryKind::Regular => {
                let end = self.offset + size;
                let contents = self.bytes.get(self.offset..end).ok_or_else(|| {
                    Error::assertion(format!("archive entry `{name}` is truncated"))
                })?;
                self.offset = align_up(end);
                contents
            }
            EntryKind::Directory => &[][..],
        };

        Ok(Some(ArchiveEntry {
            name,
            kind,
            size,
            contents,
        }))
    }

    /// Feed every entry into `tree`. Returns the number of entries seen.
    pub fn untar(mut self, tree: &mut impl TreeBuilder) -> Result<usize> {
        let mut count = 0;
        while let Some(entry) = self.next_entry()? {
            match entry.kind {
                EntryKind::Regular => tree.add_file(&entry.name, entry.contents)?,
                EntryKind::Directory => tree.add_directory(&entry.name)?,
            }
            count += 1;
        }
        Ok(count)
    }
}

fn align_up(offset: usize) -> usize {
    (offset + BLOCK_SIZE - 1) & !(BLOCK_SIZE - 1)
}

fn field_bytes(header: &[u8], (offset, len): (usize, usize)) -> &[u8] {
    let field = &header[offset..offset + len];
    let end = field.iter().position(|&b| b == 0).unwrap_or(len);
    &field[..end]
}

fn field_str(header: &[u8], field: (usize, usize)) -> String {
    decode(field_bytes(header, field))
}

fn parse_octal(header: &[u8], field: (usize, usize)) -> Result<usize> {
    let text = field_str(header, field);
    let digits = text.trim_matches(|c: char| c == ' ' || c == '\0');
    if digits.is_empty() {
        return Ok(0);
    }
    usize::from_str_radix(digits, 8)
        .map_err(|_| Error::assertion(format!("malformed octal field {text:?}")))
}
