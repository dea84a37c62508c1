use super::{FlashDevice, WRITE_ALIGN, align_up};
use crate::{Error, PartitionConfig, Result, TargetAddr, error::flash_error};

/// A span handed out by [`FlashRegion::alloc`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlashAlloc {
    /// Offset from the start of the region.
    pub offset: usize,
    /// Length in bytes, a whole number of sectors.
    pub len: usize,
    /// CPU-visible address of the first byte.
    pub addr: TargetAddr,
}

impl FlashAlloc {
    /// Whether `addr` falls inside this allocation.
    pub fn contains(&self, addr: TargetAddr) -> bool {
        addr >= self.addr && ((addr - self.addr) as usize) < self.len
    }
}

/// Bump allocator over one flash partition.
///
/// The next-free offset only ever grows in whole sectors. There is no
/// per-module free: [`reset`](Self::reset) empties the whole region.
pub struct FlashRegion<D> {
    name: &'static str,
    device: D,
    partition: PartitionConfig,
    sector: usize,
    next_free: usize,
}

impl<D: FlashDevice> FlashRegion<D> {
    /// Creates a region over `partition` of `device`.
    ///
    /// The partition must lie inside the device and start and end on sector
    /// boundaries.
    pub fn new(name: &'static str, device: D, partition: PartitionConfig) -> Result<Self> {
        let sector = device.sector_size();
        if sector == 0 || sector % WRITE_ALIGN != 0 {
            return Err(flash_error(alloc::format!(
                "{name}: unusable sector size {sector:#x}"
            )));
        }
        let end = partition.offset.checked_add(partition.size);
        if end.is_none_or(|end| end > device.size()) {
            return Err(flash_error(alloc::format!(
                "{name}: partition {:#x}+{:#x} exceeds device size {:#x}",
                partition.offset,
                partition.size,
                device.size()
            )));
        }
        if partition.offset % sector != 0 || partition.size % sector != 0 {
            return Err(flash_error(alloc::format!(
                "{name}: partition is not sector aligned"
            )));
        }
        debug!(
            "[{name}] region at {:#010x}, {:#x} bytes, sector {:#x}",
            partition.cpu_base, partition.size, sector
        );
        Ok(Self {
            name,
            device,
            partition,
            sector,
            next_free: 0,
        })
    }

    /// Reserves `size` bytes rounded up to whole sectors.
    ///
    /// Fails with [`Error::OutOfFlash`] without touching the region when the
    /// rounded size does not fit.
    pub fn alloc(&mut self, size: usize) -> Result<FlashAlloc> {
        let len = align_up(size, self.sector);
        let available = self.remaining();
        if len > available {
            return Err(Error::OutOfFlash {
                region: self.name,
                requested: len,
                available,
            });
        }
        let offset = self.next_free;
        self.next_free += len;
        trace!(
            "[{}] alloc {:#x} bytes at offset {:#x}",
            self.name, len, offset
        );
        Ok(FlashAlloc {
            offset,
            len,
            addr: self.cpu_addr(offset),
        })
    }

    /// Erases every sector of `alloc`.
    pub fn erase(&mut self, alloc: &FlashAlloc) -> Result<()> {
        if alloc.len == 0 {
            return Ok(());
        }
        self.check_span(alloc.offset, alloc.len)?;
        self.device
            .erase(self.partition.offset + alloc.offset, alloc.len)
    }

    /// Reserves and erases `size` bytes.
    pub fn alloc_erased(&mut self, size: usize) -> Result<FlashAlloc> {
        let alloc = self.alloc(size)?;
        self.erase(&alloc)?;
        Ok(alloc)
    }

    /// Programs `data` at region offset `offset`.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        if offset % WRITE_ALIGN != 0 || data.len() % WRITE_ALIGN != 0 {
            return Err(flash_error(alloc::format!(
                "{}: unaligned write of {:#x} bytes at {offset:#x}",
                self.name,
                data.len()
            )));
        }
        self.check_span(offset, data.len())?;
        self.device.write(self.partition.offset + offset, data)
    }

    /// Reads back bytes at region offset `offset`.
    pub fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check_span(offset, buf.len())?;
        self.device.read(self.partition.offset + offset, buf)
    }

    fn check_span(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.partition.size => Ok(()),
            _ => Err(flash_error(alloc::format!(
                "{}: access {offset:#x}+{len:#x} outside partition",
                self.name
            ))),
        }
    }

    /// CPU address of region offset `offset`.
    #[inline]
    pub fn cpu_addr(&self, offset: usize) -> TargetAddr {
        self.partition.cpu_base.wrapping_add(offset as u32)
    }

    /// Region offset of a CPU address inside this partition.
    pub fn offset_of(&self, addr: TargetAddr) -> Option<usize> {
        let offset = addr.wrapping_sub(self.partition.cpu_base) as usize;
        (addr >= self.partition.cpu_base && offset < self.partition.size).then_some(offset)
    }

    /// Whether `addr` lies inside the partition.
    pub fn contains(&self, addr: TargetAddr) -> bool {
        self.offset_of(addr).is_some()
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn sector_size(&self) -> usize {
        self.sector
    }

    #[inline]
    pub fn erased_value(&self) -> u8 {
        self.device.erased_value()
    }

    /// Offset of the first unallocated byte, always sector aligned.
    #[inline]
    pub fn next_free(&self) -> usize {
        self.next_free
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.partition.size - self.next_free
    }

    #[inline]
    pub fn partition(&self) -> &PartitionConfig {
        &self.partition
    }

    /// Empties the region. Everything allocated from it becomes invalid.
    pub fn reset(&mut self) {
        debug!("[{}] reset", self.name);
        self.next_free = 0;
    }

    /// Moves the bump offset back to a value taken earlier.
    pub(crate) fn rewind(&mut self, next_free: usize) {
        debug_assert!(next_free <= self.next_free && next_free % self.sector == 0);
        self.next_free = next_free;
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}
