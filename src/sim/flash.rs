use crate::{
    Result,
    error::flash_error,
    flash::{ERASED_BYTE, FlashDevice, WRITE_ALIGN},
};
use alloc::{vec, vec::Vec};

/// Operation counters of a [`MemFlash`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlashStats {
    pub reads: usize,
    pub bytes_read: usize,
    pub erases: usize,
    pub sectors_erased: usize,
    pub writes: usize,
    pub bytes_written: usize,
}

/// An injected failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// The erase after `n` successful ones fails.
    Erase { after: usize },
    /// The write after `n` successful ones fails.
    Write { after: usize },
}

/// NOR flash in host memory.
///
/// Erases fill whole sectors with `0xFF`. Writes must be word aligned and
/// can only clear bits; programming a bit back to one is an error, which
/// catches writes to locations that were never erased.
pub struct MemFlash {
    data: Vec<u8>,
    sector: usize,
    stats: FlashStats,
    fault: Option<Fault>,
}

impl MemFlash {
    /// Creates an erased device of `size` bytes.
    pub fn new(size: usize, sector: usize) -> Self {
        Self {
            data: vec![ERASED_BYTE; size],
            sector,
            stats: FlashStats::default(),
            fault: None,
        }
    }

    /// Raw device contents.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    pub fn stats(&self) -> FlashStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = FlashStats::default();
    }

    /// Arms a one-shot failure.
    pub fn inject_fault(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }

    fn span(&self, offset: usize, len: usize) -> Result<core::ops::Range<usize>> {
        offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .map(|end| offset..end)
            .ok_or_else(|| {
                flash_error(alloc::format!(
                    "access {offset:#x}+{len:#x} outside {:#x} byte device",
                    self.data.len()
                ))
            })
    }
}

impl FlashDevice for MemFlash {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn sector_size(&self) -> usize {
        self.sector
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let range = self.span(offset, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        self.stats.reads += 1;
        self.stats.bytes_read += buf.len();
        Ok(())
    }

    fn erase(&mut self, offset: usize, len: usize) -> Result<()> {
        if offset % self.sector != 0 || len % self.sector != 0 {
            return Err(flash_error(alloc::format!(
                "erase {offset:#x}+{len:#x} is not sector aligned"
            )));
        }
        let range = self.span(offset, len)?;
        if let Some(Fault::Erase { after }) = self.fault {
            if self.stats.erases == after {
                self.fault = None;
                return Err(flash_error(alloc::format!("injected erase failure at {offset:#x}")));
            }
        }
        self.data[range].fill(ERASED_BYTE);
        self.stats.erases += 1;
        self.stats.sectors_erased += len / self.sector;
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        if offset % WRITE_ALIGN != 0 || data.len() % WRITE_ALIGN != 0 {
            return Err(flash_error(alloc::format!(
                "write {offset:#x}+{:#x} is not word aligned",
                data.len()
            )));
        }
        let range = self.span(offset, data.len())?;
        if let Some(Fault::Write { after }) = self.fault {
            if self.stats.writes == after {
                self.fault = None;
                return Err(flash_error(alloc::format!("injected write failure at {offset:#x}")));
            }
        }
        let target = &mut self.data[range];
        if let Some(at) = target.iter().zip(data).position(|(&old, &new)| old & new != new) {
            return Err(flash_error(alloc::format!(
                "write at {:#x} needs an erase first",
                offset + at
            )));
        }
        for (old, &new) in target.iter_mut().zip(data) {
            *old &= new;
        }
        self.stats.writes += 1;
        self.stats.bytes_written += data.len();
        Ok(())
    }
}
