//! Keeps selected functions callable while XIP flash is powered down.
//!
//! Sections named [`RESIDENT_SECTION`] are copied from XIP flash to
//! internal flash after a load. Every word in the module's data region
//! that points into such a section is then replaced by the address of a
//! trampoline that restores the module's GOT base in `r9` and jumps to the
//! internal flash copy. Code copied this way must not contain PC-relative
//! references out of its own section.

mod trampoline;

pub use trampoline::TrampolinePool;

use crate::{
    Result, TargetAddr,
    context::LoadContext,
    flash::{FlashDevice, WRITE_ALIGN, align_up},
    image::{ModuleImage, SectionClass},
    runtime::CacheControl,
};
use alloc::{string::String, vec::Vec};
use foldhash::fast::FixedState;
use hashbrown::HashMap;

/// Section name that marks code for internal flash.
pub const RESIDENT_SECTION: &str = ".text.iflash";

/// Bytes moved per flash read/write while copying a section.
const COPY_BLOCK: usize = 256;

/// One section copied to internal flash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResidentCopy {
    pub name: String,
    pub xip: TargetAddr,
    pub iflash: TargetAddr,
    pub size: usize,
}

/// What a residency pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResidencyReport {
    pub copies: Vec<ResidentCopy>,
    pub bytes_copied: usize,
    pub pointers_patched: usize,
    pub trampolines: usize,
}

impl ResidencyReport {
    /// Whether the module had nothing to make resident.
    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Internal flash address of `addr` if it lies in a copied section,
    /// Thumb bit preserved.
    pub fn resident_address(&self, addr: TargetAddr) -> Option<TargetAddr> {
        let bare = addr & !1;
        self.copies.iter().find_map(|copy| {
            let offset = bare.wrapping_sub(copy.xip);
            (bare >= copy.xip && (offset as usize) < copy.size)
                .then(|| copy.iflash.wrapping_add(offset) | (addr & 1))
        })
    }
}

/// Where a [`ResidencyPatcher`] is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchStage {
    /// Looking for the next tagged section, starting at `next`.
    Scanning { next: usize },
    /// Copying section `section` to internal flash.
    Copying { section: usize },
    /// Rewriting data words that point into the XIP copy of `section`.
    Patching {
        section: usize,
        xip: TargetAddr,
        iflash: TargetAddr,
        size: usize,
        cursor: usize,
    },
    Done,
}

/// Residency pass over one loaded module.
///
/// Each [`step`](Self::step) performs one state transition: find a tagged
/// section, copy it, or patch one pointer. Callers must not invoke
/// patched pointers before the patcher reaches [`PatchStage::Done`], which
/// is also when caches are maintained.
pub struct ResidencyPatcher<'m> {
    image: &'m ModuleImage,
    stage: PatchStage,
    report: ResidencyReport,
    made: HashMap<(TargetAddr, TargetAddr), TargetAddr, FixedState>,
}

impl<'m> ResidencyPatcher<'m> {
    pub fn new(image: &'m ModuleImage) -> Self {
        Self {
            image,
            stage: PatchStage::Scanning { next: 0 },
            report: ResidencyReport::default(),
            made: HashMap::with_hasher(FixedState::default()),
        }
    }

    #[inline]
    pub fn stage(&self) -> PatchStage {
        self.stage
    }

    #[inline]
    pub fn report(&self) -> &ResidencyReport {
        &self.report
    }

    /// Runs the pass to completion.
    pub fn run<X, I, C>(
        mut self,
        ctx: &mut LoadContext<X, I>,
        cache: &mut C,
    ) -> Result<ResidencyReport>
    where
        X: FlashDevice,
        I: FlashDevice,
        C: CacheControl + ?Sized,
    {
        while self.step(ctx, cache)? {}
        Ok(self.report)
    }

    /// Advances by one transition. Returns `false` once done.
    pub fn step<X, I, C>(&mut self, ctx: &mut LoadContext<X, I>, cache: &mut C) -> Result<bool>
    where
        X: FlashDevice,
        I: FlashDevice,
        C: CacheControl + ?Sized,
    {
        self.stage = match self.stage {
            PatchStage::Scanning { next } => self.scan(next, cache),
            PatchStage::Copying { section } => self.copy(ctx, section)?,
            PatchStage::Patching {
                section,
                xip,
                iflash,
                size,
                cursor,
            } => self.patch(ctx, section, xip, iflash, size, cursor)?,
            PatchStage::Done => return Ok(false),
        };
        Ok(self.stage != PatchStage::Done)
    }

    fn scan<C: CacheControl + ?Sized>(&mut self, next: usize, cache: &mut C) -> PatchStage {
        let sections = self.image.sections();
        match (next..sections.len()).find(|&i| {
            sections[i].name == RESIDENT_SECTION && sections[i].class == SectionClass::Text
        }) {
            Some(section) => PatchStage::Copying { section },
            None => {
                self.finish(cache);
                PatchStage::Done
            }
        }
    }

    fn copy<X, I>(&mut self, ctx: &mut LoadContext<X, I>, section: usize) -> Result<PatchStage>
    where
        X: FlashDevice,
        I: FlashDevice,
    {
        let placed = &self.image.sections()[section];
        let src = ctx.xip.offset_of(placed.addr).ok_or_else(|| {
            crate::error::flash_error(alloc::format!(
                "{} at {:#010x} is not in XIP flash",
                placed.name, placed.addr
            ))
        })?;
        let dest = ctx.iflash.alloc_erased(placed.size)?;
        let erased = ctx.iflash.erased_value();
        let mut block = [0u8; COPY_BLOCK];
        let mut done = 0;
        while done < placed.size {
            let len = (placed.size - done).min(COPY_BLOCK);
            let padded = align_up(len, WRITE_ALIGN);
            ctx.xip.read(src + done, &mut block[..len])?;
            block[len..padded].fill(erased);
            ctx.iflash.write(dest.offset + done, &block[..padded])?;
            done += len;
        }
        info!(
            "[residency] {}: {:#x} bytes {:#010x} -> {:#010x}",
            placed.name, placed.size, placed.addr, dest.addr
        );
        self.report.copies.push(ResidentCopy {
            name: placed.name.clone(),
            xip: placed.addr,
            iflash: dest.addr,
            size: placed.size,
        });
        self.report.bytes_copied += placed.size;
        Ok(PatchStage::Patching {
            section,
            xip: placed.addr,
            iflash: dest.addr,
            size: placed.size,
            cursor: 0,
        })
    }

    fn patch<X, I>(
        &mut self,
        ctx: &mut LoadContext<X, I>,
        section: usize,
        xip: TargetAddr,
        iflash: TargetAddr,
        size: usize,
        cursor: usize,
    ) -> Result<PatchStage>
    where
        X: FlashDevice,
        I: FlashDevice,
    {
        let next = PatchStage::Scanning { next: section + 1 };
        let Some(region) = self.image.data() else {
            warn!("[residency] no data region, nothing to patch");
            return Ok(next);
        };
        let words = region.len / 4;
        let found = {
            let data = ctx.pool.bytes(&region);
            (cursor..words).find_map(|i| {
                let word = u32::from_le_bytes([
                    data[i * 4],
                    data[i * 4 + 1],
                    data[i * 4 + 2],
                    data[i * 4 + 3],
                ]);
                let bare = word & !1;
                (bare >= xip && ((bare - xip) as usize) < size).then_some((i, word))
            })
        };
        let Some((index, word)) = found else {
            return Ok(next);
        };

        let target = iflash.wrapping_add((word & !1) - xip) | (word & 1);
        let base = self.image.got_base();
        let tramp = match self.made.get(&(target, base)) {
            Some(&tramp) => tramp,
            None => {
                let tramp = ctx
                    .trampolines
                    .make_trampoline(&mut ctx.iflash, target, base)?;
                self.made.insert((target, base), tramp);
                self.report.trampolines += 1;
                tramp
            }
        };
        ctx.pool.bytes_mut(&region)[index * 4..index * 4 + 4].copy_from_slice(&tramp.to_le_bytes());
        self.report.pointers_patched += 1;
        debug!(
            "[residency] data[{index}] {word:#010x} -> trampoline {tramp:#010x} -> {target:#010x}"
        );
        Ok(PatchStage::Patching {
            section,
            xip,
            iflash,
            size,
            cursor: index + 1,
        })
    }

    fn finish<C: CacheControl + ?Sized>(&mut self, cache: &mut C) {
        if self.report.is_empty() {
            debug!("[residency] {}: no {RESIDENT_SECTION} sections", self.image.name());
            return;
        }
        if let Some(region) = self.image.data() {
            cache.flush_data(region.addr, region.len);
        }
        cache.invalidate_instructions();
        info!(
            "[residency] {}: {} sections, {} pointers patched, {} trampolines",
            self.image.name(),
            self.report.copies.len(),
            self.report.pointers_patched,
            self.report.trampolines
        );
    }
}
