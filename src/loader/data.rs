//! Places mutable data and zero-initialized sections in the RAM pool.

use super::{Scratch, Session, layout::SectionInfo};
use crate::{
    Result,
    context::DataPool,
    exports::SymbolLookup,
    flash::align_up,
    image::RamRegion,
    input::ElfReader,
    relocation::{RelocStats, SectionPlacement, apply_chunk},
};
use alloc::vec::Vec;

/// Lays `sections` out back to back and allocates one pool block for all
/// of them, recording each section's address in `placement`.
pub(crate) fn place_block<'a>(
    pool: &mut DataPool,
    sections: impl Iterator<Item = &'a SectionInfo>,
    placement: &mut SectionPlacement,
) -> Result<Option<(RamRegion, Vec<(usize, usize)>)>> {
    let mut offsets = Vec::new();
    let mut size = 0;
    let mut align = 1;
    for section in sections {
        let at = align_up(size, section.shdr.align());
        offsets.push((section.index, at));
        size = at + section.size();
        align = align.max(section.shdr.align());
    }
    if offsets.is_empty() {
        return Ok(None);
    }
    let region = pool.alloc(size, align)?;
    for &(index, at) in &offsets {
        placement.set(index, region.addr.wrapping_add(at as u32));
    }
    trace!("[data] block of {size:#x} bytes at {:#010x}", region.addr);
    Ok(Some((region, offsets)))
}

impl<R: ElfReader, L: SymbolLookup + ?Sized> Session<'_, R, L> {
    /// Copies a data section into its pool block and relocates it in place.
    pub(crate) fn place_data(
        &mut self,
        scratch: &mut Scratch,
        pool: &mut DataPool,
        region: &RamRegion,
        section: &SectionInfo,
        at: usize,
    ) -> Result<RelocStats> {
        let size = section.size();
        let base = region.addr.wrapping_add(at as u32);
        let bytes = &mut pool.bytes_mut(region)[at..at + size];
        self.reader.read(bytes, section.shdr.offset())?;
        let mut stats = RelocStats::default();
        if let Some(table) = section.rels {
            let mut first = 0;
            while first < table.count {
                first += scratch.read_rels(&mut self.reader, table, first)?;
                let Self {
                    reader,
                    resolver,
                    placement,
                    exports,
                    strict,
                } = self;
                stats.merge(apply_chunk(
                    bytes,
                    0,
                    base,
                    &scratch.rels,
                    *strict,
                    |sym| resolver.resolve(reader, sym, placement, *exports),
                )?);
            }
        }
        debug!(
            "[data] {} -> {base:#010x}: {size:#x} bytes, {} relocations",
            section.name, stats.patched
        );
        Ok(stats)
    }
}

/// Zero-fills a BSS block.
pub(crate) fn zero_block(pool: &mut DataPool, region: &RamRegion) {
    pool.bytes_mut(region).fill(0);
    debug!("[data] bss {:#x} bytes at {:#010x}", region.len, region.addr);
}
