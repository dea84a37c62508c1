use crate::{
    Result, TargetAddr,
    arch::thumb::{TRAMPOLINE_SIZE, emit_trampoline},
    flash::{FlashAlloc, FlashDevice, FlashRegion},
};

/// Sector-packed trampoline records in internal flash.
///
/// Records are never freed one by one. A fresh sector is allocated and
/// erased whenever the current one is unset or full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrampolinePool {
    sector: Option<FlashAlloc>,
    used: usize,
    created: usize,
}

impl TrampolinePool {
    pub const fn new() -> Self {
        Self {
            sector: None,
            used: 0,
            created: 0,
        }
    }

    /// Emits a trampoline that loads `base` into the PIC base register and
    /// jumps to `target`, returning its address with the Thumb bit set.
    ///
    /// Every call allocates a new record; callers de-duplicate if they
    /// want to.
    pub fn make_trampoline<D: FlashDevice>(
        &mut self,
        region: &mut FlashRegion<D>,
        target: TargetAddr,
        base: TargetAddr,
    ) -> Result<TargetAddr> {
        let sector = match self.sector {
            Some(sector) if self.used + TRAMPOLINE_SIZE <= sector.len => sector,
            _ => {
                let sector = region.alloc_erased(region.sector_size())?;
                debug!("[trampoline] new sector at {:#010x}", sector.addr);
                self.sector = Some(sector);
                self.used = 0;
                sector
            }
        };
        region.write(sector.offset + self.used, &emit_trampoline(target, base))?;
        let addr = sector.addr.wrapping_add(self.used as u32);
        self.used += TRAMPOLINE_SIZE;
        self.created += 1;
        trace!("[trampoline] {addr:#010x}: r9 = {base:#010x}, jump {target:#010x}");
        Ok(addr | 1)
    }

    /// Stops packing into the current sector.
    pub(crate) fn retire_sector(&mut self) {
        self.sector = None;
        self.used = 0;
    }

    /// Records emitted since the pool was created.
    #[inline]
    pub fn created(&self) -> usize {
        self.created
    }

    /// Free bytes left in the current sector.
    pub fn free_in_sector(&self) -> usize {
        self.sector.map_or(0, |sector| sector.len - self.used)
    }
}
