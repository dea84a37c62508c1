//! Flash devices and the bump-allocated regions carved out of them.
//!
//! Two regions exist at runtime: the execute-in-place partition that holds
//! streamed module code and read-only data, and the always-on internal flash
//! partition that holds resident copies and trampolines.

mod region;

pub use region::{FlashAlloc, FlashRegion};

use crate::Result;

/// Flash writes must start and end on this boundary.
pub const WRITE_ALIGN: usize = 4;
/// Value of an erased flash byte.
pub const ERASED_BYTE: u8 = 0xFF;

/// A NOR-style flash device.
///
/// Erases work on whole sectors and set every bit. Writes can only clear
/// bits, so a location must be erased before it is written again.
/// Offsets are relative to the start of the device.
pub trait FlashDevice {
    /// Total device size in bytes.
    fn size(&self) -> usize;

    /// Minimum erasable unit in bytes.
    fn sector_size(&self) -> usize;

    /// Value every byte holds after an erase.
    fn erased_value(&self) -> u8 {
        ERASED_BYTE
    }

    /// Reads `buf.len()` bytes starting at `offset`.
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Erases `len` bytes at `offset`. Both must be sector aligned.
    fn erase(&mut self, offset: usize, len: usize) -> Result<()>;

    /// Programs `data` at `offset`. Both must be [`WRITE_ALIGN`] aligned.
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()>;
}

impl<D: FlashDevice + ?Sized> FlashDevice for &mut D {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn sector_size(&self) -> usize {
        (**self).sector_size()
    }

    fn erased_value(&self) -> u8 {
        (**self).erased_value()
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        (**self).read(offset, buf)
    }

    fn erase(&mut self, offset: usize, len: usize) -> Result<()> {
        (**self).erase(offset, len)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        (**self).write(offset, data)
    }
}

#[inline]
pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}
