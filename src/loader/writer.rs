//! Streams flash sections from the source to XIP flash one chunk at a time.

use super::{Scratch, Session, layout::{RelTable, SectionInfo}};
use crate::{
    Result,
    elf::ElfRel,
    error::parse_error,
    exports::SymbolLookup,
    flash::{FlashAlloc, FlashDevice, FlashRegion, WRITE_ALIGN, align_up},
    input::ElfReader,
    relocation::{RelocStats, apply_chunk},
};

impl Scratch {
    /// Checks that every field of `table` lies inside a section of `size`
    /// bytes.
    pub(crate) fn check_rels<R: ElfReader + ?Sized>(
        &mut self,
        reader: &mut R,
        table: RelTable,
        size: usize,
    ) -> Result<()> {
        let mut first = 0;
        while first < table.count {
            first += self.read_rels(reader, table, first)?;
            let outside = |rel: &&ElfRel| rel.field_end().is_none_or(|end| end > size);
            if let Some(rel) = self.rels.iter().find(outside) {
                return Err(parse_error(alloc::format!(
                    "relocation at {:#x} is outside its {size:#x} byte section",
                    rel.r_offset()
                )));
            }
        }
        Ok(())
    }

    /// Moves `end` down until no relocated field straddles it.
    ///
    /// Chunk boundaries then never depend on the chunk size, so every chunk
    /// size commits the same bytes.
    fn chunk_end<R: ElfReader + ?Sized>(
        &mut self,
        reader: &mut R,
        table: RelTable,
        start: usize,
        mut end: usize,
    ) -> Result<usize> {
        loop {
            let mut lowest = end;
            let mut first = 0;
            while first < table.count {
                first += self.read_rels(reader, table, first)?;
                for rel in &self.rels {
                    let offset = rel.r_offset();
                    if offset < end && rel.field_end().is_none_or(|field_end| field_end > end) {
                        lowest = lowest.min(offset & !(WRITE_ALIGN - 1));
                    }
                }
            }
            if lowest == end {
                return Ok(end);
            }
            if lowest <= start {
                return Err(parse_error(alloc::format!(
                    "relocated fields overlap around offset {end:#x}"
                )));
            }
            trace!("[stream] chunk end {end:#x} -> {lowest:#x}");
            end = lowest;
        }
    }
}

impl<R: ElfReader, L: SymbolLookup + ?Sized> Session<'_, R, L> {
    /// Erases `alloc`, then reads, relocates and writes the section in
    /// chunks. At most one chunk and one relocation batch are held.
    pub(crate) fn stream<D: FlashDevice>(
        &mut self,
        scratch: &mut Scratch,
        section: &SectionInfo,
        region: &mut FlashRegion<D>,
        alloc: &FlashAlloc,
    ) -> Result<RelocStats> {
        region.erase(alloc)?;
        let size = section.size();
        let chunk = scratch.staging.len();
        let mut stats = RelocStats::default();
        let mut start = 0;
        let mut chunks = 0usize;
        while start < size {
            let mut end = (start + chunk).min(size);
            if let Some(table) = section.rels.filter(|_| end < size) {
                end = scratch.chunk_end(&mut self.reader, table, start, end)?;
            }
            let len = end - start;
            let padded = align_up(len, WRITE_ALIGN);
            scratch.staging[len..padded].fill(region.erased_value());
            self.reader
                .read(&mut scratch.staging[..len], section.shdr.offset() + start)?;
            if let Some(table) = section.rels {
                stats.merge(self.relocate_chunk(scratch, table, start, len, alloc)?);
            }
            region.write(alloc.offset + start, &scratch.staging[..padded])?;
            start = end;
            chunks += 1;
        }
        debug!(
            "[stream] {} -> {:#010x}: {size:#x} bytes in {chunks} chunks, {} relocations",
            section.name, alloc.addr, stats.patched
        );
        Ok(stats)
    }

    fn relocate_chunk(
        &mut self,
        scratch: &mut Scratch,
        table: RelTable,
        start: usize,
        len: usize,
        alloc: &FlashAlloc,
    ) -> Result<RelocStats> {
        let mut stats = RelocStats::default();
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
                &mut scratch.staging[..len],
                start,
                alloc.addr,
                &scratch.rels,
                *strict,
                |sym| resolver.resolve(reader, sym, placement, *exports),
            )?);
        }
        Ok(stats)
    }
}
