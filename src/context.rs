//! State shared by every load of a session.
//!
//! The two flash regions, the RAM data pool and the trampoline pool are
//! plain values owned by a [`LoadContext`] and passed by reference through
//! each load. Only one module loads at a time; callers that can start loads
//! from more than one context must serialize them.

use crate::{
    Error, Result, TargetAddr,
    error::execution_error,
    flash::{FlashDevice, FlashRegion, align_up},
    image::RamRegion,
    residency::TrampolinePool,
    runtime::TargetMemory,
};
use alloc::{boxed::Box, vec};

/// Alignment of every data pool allocation, the target pointer size.
pub const POOL_ALIGN: usize = 4;

/// Bump allocator over the RAM block that holds module data and BSS.
pub struct DataPool {
    base: TargetAddr,
    mem: Box<[u8]>,
    next: usize,
}

impl DataPool {
    /// Creates a pool of `size` bytes that code sees at `base`.
    pub fn new(base: TargetAddr, size: usize) -> Self {
        Self {
            base,
            mem: vec![0u8; size].into_boxed_slice(),
            next: 0,
        }
    }

    /// Creates a pool whose target addresses are its real addresses.
    #[cfg(target_pointer_width = "32")]
    pub fn native(size: usize) -> Self {
        let mem = vec![0u8; size].into_boxed_slice();
        Self {
            base: mem.as_ptr() as usize as TargetAddr,
            mem,
            next: 0,
        }
    }

    /// Allocates `size` bytes aligned to at least [`POOL_ALIGN`].
    pub fn alloc(&mut self, size: usize, align: usize) -> Result<RamRegion> {
        let align = align.max(POOL_ALIGN);
        let offset = align_up(self.next, align);
        let available = self.mem.len().saturating_sub(offset);
        if size > available {
            return Err(Error::OutOfMemory {
                requested: size,
                available,
            });
        }
        self.next = offset + size;
        trace!("[pool] alloc {size:#x} bytes at offset {offset:#x}");
        Ok(RamRegion {
            offset,
            addr: self.base.wrapping_add(offset as u32),
            len: size,
        })
    }

    pub fn bytes(&self, region: &RamRegion) -> &[u8] {
        &self.mem[region.offset..region.offset + region.len]
    }

    pub fn bytes_mut(&mut self, region: &RamRegion) -> &mut [u8] {
        &mut self.mem[region.offset..region.offset + region.len]
    }

    /// Pool offset of a target address.
    pub fn offset_of(&self, addr: TargetAddr) -> Option<usize> {
        let offset = addr.wrapping_sub(self.base) as usize;
        (addr >= self.base && offset < self.mem.len()).then_some(offset)
    }

    fn span(&self, addr: TargetAddr, len: usize) -> Option<core::ops::Range<usize>> {
        let start = self.offset_of(addr)?;
        let end = start.checked_add(len)?;
        (end <= self.mem.len()).then_some(start..end)
    }

    #[inline]
    pub fn base(&self) -> TargetAddr {
        self.base
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.next
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.mem.len()
    }

    pub fn reset(&mut self) {
        self.next = 0;
        self.mem.fill(0);
    }
}

/// Snapshot of every bump offset in a [`LoadContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    xip: usize,
    iflash: usize,
    pool: usize,
    trampolines: TrampolinePool,
}

/// Everything a load session allocates from.
pub struct LoadContext<X, I> {
    pub(crate) xip: FlashRegion<X>,
    pub(crate) iflash: FlashRegion<I>,
    pub(crate) pool: DataPool,
    pub(crate) trampolines: TrampolinePool,
}

impl<X: FlashDevice, I: FlashDevice> LoadContext<X, I> {
    pub fn new(xip: FlashRegion<X>, iflash: FlashRegion<I>, pool: DataPool) -> Self {
        Self {
            xip,
            iflash,
            pool,
            trampolines: TrampolinePool::new(),
        }
    }

    /// The execute-in-place region.
    pub fn xip(&self) -> &FlashRegion<X> {
        &self.xip
    }

    pub fn xip_mut(&mut self) -> &mut FlashRegion<X> {
        &mut self.xip
    }

    /// The always-on internal flash region.
    pub fn iflash(&self) -> &FlashRegion<I> {
        &self.iflash
    }

    pub fn iflash_mut(&mut self) -> &mut FlashRegion<I> {
        &mut self.iflash
    }

    pub fn pool(&self) -> &DataPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut DataPool {
        &mut self.pool
    }

    pub fn trampolines(&self) -> &TrampolinePool {
        &self.trampolines
    }

    /// Records the current bump offsets.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            xip: self.xip.next_free(),
            iflash: self.iflash.next_free(),
            pool: self.pool.used(),
            trampolines: self.trampolines,
        }
    }

    /// Gives back everything allocated since `checkpoint`.
    ///
    /// Only valid while nothing allocated after the checkpoint is still in
    /// use, i.e. for a module whose load failed.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        debug!(
            "[context] rollback to xip {:#x}, iflash {:#x}, pool {:#x}",
            checkpoint.xip, checkpoint.iflash, checkpoint.pool
        );
        self.xip.rewind(checkpoint.xip);
        self.iflash.rewind(checkpoint.iflash);
        self.pool.next = checkpoint.pool;
        if self.trampolines != checkpoint.trampolines {
            // The shared sector may hold records written after the snapshot.
            self.trampolines = checkpoint.trampolines;
            self.trampolines.retire_sector();
        }
    }

    /// Full re-initialisation: empties both flash regions and the pool.
    pub fn reset(&mut self) {
        info!("[context] full reset");
        self.xip.reset();
        self.iflash.reset();
        self.pool.reset();
        self.trampolines = TrampolinePool::new();
    }
}

impl<X: FlashDevice, I: FlashDevice> TargetMemory for LoadContext<X, I> {
    fn read(&mut self, addr: TargetAddr, buf: &mut [u8]) -> Result<()> {
        if let Some(offset) = self.xip.offset_of(addr) {
            return self.xip.read(offset, buf);
        }
        if let Some(offset) = self.iflash.offset_of(addr) {
            return self.iflash.read(offset, buf);
        }
        match self.pool.span(addr, buf.len()) {
            Some(range) => {
                buf.copy_from_slice(&self.pool.mem[range]);
                Ok(())
            }
            None => Err(execution_error(alloc::format!(
                "read of {:#x} bytes from unmapped address {addr:#010x}",
                buf.len()
            ))),
        }
    }

    fn write(&mut self, addr: TargetAddr, data: &[u8]) -> Result<()> {
        if self.xip.contains(addr) || self.iflash.contains(addr) {
            return Err(execution_error(alloc::format!(
                "write to flash at {addr:#010x}"
            )));
        }
        match self.pool.span(addr, data.len()) {
            Some(range) => {
                self.pool.mem[range].copy_from_slice(data);
                Ok(())
            }
            None => Err(execution_error(alloc::format!(
                "write of {:#x} bytes to unmapped address {addr:#010x}",
                data.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_alignment_and_exhaustion() {
        let mut pool = DataPool::new(0x2000_0000, 64);
        let a = pool.alloc(3, 1).unwrap();
        let b = pool.alloc(8, 8).unwrap();
        assert_eq!(a.addr, 0x2000_0000);
        assert_eq!(b.offset, 8);
        assert_eq!(b.addr % 8, 0);
        assert!(matches!(
            pool.alloc(64, 4),
            Err(Error::OutOfMemory { requested: 64, .. })
        ));
        assert_eq!(pool.used(), 16);
    }

    #[test]
    fn pool_address_lookup() {
        let pool = DataPool::new(0x2000_0000, 64);
        assert_eq!(pool.offset_of(0x2000_0010), Some(0x10));
        assert_eq!(pool.offset_of(0x1fff_ffff), None);
        assert_eq!(pool.offset_of(0x2000_0040), None);
        assert!(pool.span(0x2000_003c, 4).is_some());
        assert!(pool.span(0x2000_003d, 4).is_none());
    }
}
