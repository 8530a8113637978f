//! Typed access to a module's linear memory.
//!
//! A linear memory can grow whenever control is inside sandboxed code, and
//! growing may move the backing buffer. [`GuestMemory`] is the owning handle;
//! it never caches a pointer. Every access goes through [`GuestMemory::view`],
//! which re-resolves the live buffer and hands out a [`MemoryView`] that
//! mutably borrows the store. Because calling back into sandboxed code also
//! needs the store, a view can never be held across a call that might grow
//! the memory.

use std::ops::Range;

use wasmtime::{AsContext, AsContextMut, Memory, StoreContextMut};

use crate::error::{Error, Result};

/// Decode bytes as text, one character per byte.
pub fn decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Encode text one byte per character. Characters above U+00FF keep only
/// their low byte.
pub fn encode(text: &str) -> Vec<u8> {
    text.chars().map(|c| c as u8).collect()
}

/// Owning handle to one module's linear memory.
#[derive(Debug, Clone, Copy)]
pub struct GuestMemory(Memory);

impl GuestMemory {
    pub fn new(memory: Memory) -> Self {
        Self(memory)
    }

    /// Resolve the current buffer and borrow it for typed access.
    pub fn view<'a, T: 'static>(&self, store: impl Into<StoreContextMut<'a, T>>) -> MemoryView<'a> {
        MemoryView::new(self.0.data_mut(store))
    }

    /// Like [`view`](Self::view), but also hands back the store's data.
    pub fn view_with_data<'a, T: 'static>(
        &self,
        store: impl Into<StoreContextMut<'a, T>>,
    ) -> (MemoryView<'a>, &'a mut T) {
        let (bytes, data) = self.0.data_and_store_mut(store);
        (MemoryView::new(bytes), data)
    }

    /// Read-only access to `[offset, offset + len)`.
    pub fn slice<'a, T: 'static>(
        &self,
        store: impl Into<wasmtime::StoreContext<'a, T>>,
        offset: u32,
        len: u32,
    ) -> Result<&'a [u8]> {
        let bytes = self.0.data(store);
        let range = checked_range(bytes.len(), offset, len)?;
        Ok(&bytes[range])
    }

    /// Current size of the memory in bytes.
    pub fn size(&self, store: impl AsContext) -> usize {
        self.0.data_size(store)
    }

    /// Grow by whole pages until the memory holds at least `size` bytes.
    pub fn grow_to(&self, mut store: impl AsContextMut, size: usize) -> Result<()> {
        let current = self.0.data_size(&store);
        if size > current {
            let page = self.0.page_size(&store);
            self.0.grow(&mut store, ((size - current) as u64).div_ceil(page))?;
        }
        Ok(())
    }
}

/// A borrowed, bounds-checked view over linear memory.
///
/// Offsets are byte offsets. 32-bit accessors address the aligned word that
/// contains `offset`, as a `u32` array view over the same buffer would.
/// Multi-byte values are little-endian.
pub struct MemoryView<'a> {
    bytes: &'a mut [u8],
}

impl<'a> MemoryView<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn read8(&self, offset: u32) -> Result<u8> {
        let range = checked_range(self.bytes.len(), offset, 1)?;
        Ok(self.bytes[range.start])
    }

    pub fn read32(&self, offset: u32) -> Result<u32> {
        let range = checked_range(self.bytes.len(), offset & !3, 4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.bytes[range]);
        Ok(u32::from_le_bytes(word))
    }

    pub fn write8(&mut self, offset: u32, value: u8) -> Result<()> {
        let range = checked_range(self.bytes.len(), offset, 1)?;
        self.bytes[range.start] = value;
        Ok(())
    }

    pub fn write32(&mut self, offset: u32, value: u32) -> Result<()> {
        let range = checked_range(self.bytes.len(), offset & !3, 4)?;
        self.bytes[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Write a 64-bit value given as its low and high words.
    pub fn write64(&mut self, offset: u32, lo: u32, hi: u32) -> Result<()> {
        self.write32(offset, lo)?;
        self.write32(offset.wrapping_add(4), hi)
    }

    /// Decode a byte run as text, one character per byte.
    ///
    /// With `len` the run is `[offset, offset + len)`; without it the run
    /// extends to the end of memory. Either way decoding stops at the first
    /// zero byte.
    pub fn read_str(&self, offset: u32, len: Option<u32>) -> Result<String> {
        let range = match len {
            Some(len) => checked_range(self.bytes.len(), offset, len)?,
            None => {
                let start = checked_range(self.bytes.len(), offset, 0)?.start;
                start..self.bytes.len()
            }
        };
        let run = &self.bytes[range];
        let end = run.iter().position(|&b| b == 0).unwrap_or(run.len());
        Ok(decode(&run[..end]))
    }

    /// Write `text` one byte per character, followed by a zero byte.
    /// Returns the bytes written, terminator included.
    pub fn write_str(&mut self, offset: u32, text: &str) -> Result<u32> {
        let written = self.write(offset, &encode(text))?;
        self.write8(offset.wrapping_add(written), 0)?;
        Ok(written + 1)
    }

    /// Copy `src` to `offset`. Returns the number of bytes written.
    pub fn write(&mut self, offset: u32, src: &[u8]) -> Result<u32> {
        let len = u32::try_from(src.len()).map_err(|_| Error::OutOfBounds {
            offset: offset.into(),
            len: src.len() as u64,
            size: self.bytes.len(),
        })?;
        let range = checked_range(self.bytes.len(), offset, len)?;
        self.bytes[range].copy_from_slice(src);
        Ok(len)
    }

    /// Borrow `[offset, offset + len)`.
    pub fn bytes(&self, offset: u32, len: u32) -> Result<&[u8]> {
        let range = checked_range(self.bytes.len(), offset, len)?;
        Ok(&self.bytes[range])
    }
}

fn checked_range(size: usize, offset: u32, len: u32) -> Result<Range<usize>> {
    let start = offset as usize;
    match start.checked_add(len as usize) {
        Some(end) if end <= size => Ok(start..end),
        _ => Err(Error::OutOfBounds {
            offset: offset.into(),
            len: len.into(),
            size,
        }),
    }
}
