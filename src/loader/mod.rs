//! The streaming loader.
//!
//! A load runs in four passes over the source object:
//!
//! 1. parse the header and section table ([`layout`]),
//! 2. reserve flash and pool space for every placed section, so every
//!    symbol has an address before any relocation is applied,
//! 3. stream each code and read-only section to XIP flash ([`writer`]),
//! 4. copy and relocate mutable data and zero BSS in the pool ([`data`]).
//!
//! Peak memory is one chunk plus one relocation batch plus the two name
//! tables, whatever the module size.

mod data;
mod layout;
mod writer;

use crate::{
    Error, LoaderConfig, Result, TargetAddr,
    context::LoadContext,
    elf::{ElfRel, REL_SIZE},
    exports::SymbolLookup,
    flash::FlashDevice,
    image::{ModuleImage, PlacedSection, SectionClass},
    input::{ElfReader, IntoElfReader},
    relocation::{RelocStats, SectionPlacement, SymbolResolver},
};
use alloc::{string::{String, ToString}, vec, vec::Vec};
use layout::{RelTable, RelocatableObject};

/// Name of the section whose address becomes the GOT base.
pub const GOT_SECTION: &str = ".got";

/// Reusable scratch buffers, sized once from the configuration.
pub(crate) struct Scratch {
    staging: Vec<u8>,
    rel_bytes: Vec<u8>,
    rels: Vec<ElfRel>,
}

impl Scratch {
    fn new(config: &LoaderConfig) -> Self {
        Self {
            staging: vec![0u8; config.chunk_size],
            rel_bytes: vec![0u8; config.rel_batch * REL_SIZE],
            rels: Vec::with_capacity(config.rel_batch),
        }
    }

    /// Reads up to one batch of entries of `table` starting at `first`
    /// into `self.rels`, returning how many were read.
    pub(crate) fn read_rels<R: ElfReader + ?Sized>(
        &mut self,
        reader: &mut R,
        table: RelTable,
        first: usize,
    ) -> Result<usize> {
        let batch = self.rel_bytes.len() / REL_SIZE;
        let count = batch.min(table.count - first);
        let bytes = &mut self.rel_bytes[..count * REL_SIZE];
        reader.read(bytes, table.offset + first * REL_SIZE)?;
        self.rels.clear();
        self.rels.extend(
            bytes
                .chunks_exact(REL_SIZE)
                .filter_map(|entry| entry.try_into().ok())
                .map(ElfRel::parse),
        );
        Ok(count)
    }
}

/// Per-load linking state.
pub(crate) struct Session<'l, R, L: ?Sized> {
    reader: R,
    resolver: SymbolResolver,
    placement: SectionPlacement,
    exports: &'l L,
    strict: bool,
}

/// Loads relocatable modules into flash and the RAM pool.
///
/// One loader can be reused for any number of modules. It owns the
/// bounded scratch buffers; everything a module occupies afterwards lives
/// in the [`LoadContext`].
pub struct StreamLoader {
    config: LoaderConfig,
    scratch: Scratch,
}

impl StreamLoader {
    /// Creates a loader, validating `config`.
    pub fn new(config: LoaderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scratch: Scratch::new(&config),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Bytes of scratch memory the loader holds, independent of the
    /// modules it loads.
    pub fn scratch_bytes(&self) -> usize {
        self.scratch.staging.len() + self.scratch.rel_bytes.len()
            + self.scratch.rels.capacity() * core::mem::size_of::<ElfRel>()
    }

    /// Loads, links and places one module, returning its image.
    ///
    /// Undefined symbols resolve against `exports` only. `entry` names the
    /// symbol whose address becomes [`ModuleImage::entry`].
    ///
    /// On failure, allocations already made stay advanced; callers that
    /// want them back take a [`LoadContext::checkpoint`] first.
    ///
    /// The image is named after the source's file name.
    pub fn load<'a, X, I, L>(
        &mut self,
        ctx: &mut LoadContext<X, I>,
        object: impl IntoElfReader<'a>,
        exports: &L,
        entry: &str,
    ) -> Result<ModuleImage>
    where
        X: FlashDevice,
        I: FlashDevice,
        L: SymbolLookup + ?Sized,
    {
        let mut reader = object.into_reader()?;
        let name = reader.shortname().to_string();
        self.load_reader(ctx, reader, name, exports, entry)
    }

    /// Like [`load`](Self::load), but names the image `name`. Extension
    /// modules all share one file name, so the manager names them by id.
    pub fn load_as<'a, X, I, L>(
        &mut self,
        ctx: &mut LoadContext<X, I>,
        object: impl IntoElfReader<'a>,
        name: &str,
        exports: &L,
        entry: &str,
    ) -> Result<ModuleImage>
    where
        X: FlashDevice,
        I: FlashDevice,
        L: SymbolLookup + ?Sized,
    {
        let reader = object.into_reader()?;
        self.load_reader(ctx, reader, name.to_string(), exports, entry)
    }

    fn load_reader<X, I, R, L>(
        &mut self,
        ctx: &mut LoadContext<X, I>,
        mut reader: R,
        name: String,
        exports: &L,
        entry: &str,
    ) -> Result<ModuleImage>
    where
        X: FlashDevice,
        I: FlashDevice,
        R: ElfReader,
        L: SymbolLookup + ?Sized,
    {
        let object = RelocatableObject::parse(&mut reader, &self.config)?;
        object.log_summary(&name);
        let resolver = object.resolver(&mut reader, &self.config)?;
        for section in object.sections() {
            if let Some(table) = section.rels {
                self.scratch
                    .check_rels(&mut reader, table, section.size())?;
            }
        }

        let mut placement = SectionPlacement::new(object.sections().len());
        let mut flash = Vec::new();
        for section in object.flash_sections() {
            let alloc = ctx.xip.alloc(section.size())?;
            placement.set(section.index, alloc.addr);
            flash.push((section.index, alloc));
        }
        let data = data::place_block(
            &mut ctx.pool,
            object.of_class(SectionClass::Data),
            &mut placement,
        )?;
        let bss = data::place_block(
            &mut ctx.pool,
            object.of_class(SectionClass::Bss),
            &mut placement,
        )?;

        let mut session = Session {
            reader,
            resolver,
            placement,
            exports,
            strict: self.config.strict_relocations,
        };
        let mut stats = RelocStats::default();
        for (index, alloc) in &flash {
            let section = &object.sections()[*index];
            stats.merge(session.stream(&mut self.scratch, section, &mut ctx.xip, alloc)?);
        }
        if let Some((region, offsets)) = &data {
            for &(index, at) in offsets {
                let section = &object.sections()[index];
                stats.merge(session.place_data(
                    &mut self.scratch,
                    &mut ctx.pool,
                    region,
                    section,
                    at,
                )?);
            }
        }
        if let Some((region, _)) = &bss {
            data::zero_block(&mut ctx.pool, region);
        }

        let entry = session.entry_address(entry)?;
        let sections: Vec<PlacedSection> = object
            .sections()
            .iter()
            .filter_map(|s| {
                Some(PlacedSection {
                    index: s.index,
                    name: s.name.clone(),
                    class: s.class?,
                    size: s.size(),
                    addr: session.placement.get(s.index)?,
                })
            })
            .collect();
        let data = data.map(|(region, _)| region);
        let got_base = sections
            .iter()
            .find(|s| s.name == GOT_SECTION && s.class == SectionClass::Data)
            .map(|s| s.addr)
            .or(data.map(|region| region.addr))
            .unwrap_or(0);
        let cache = session.resolver.cache_stats();
        info!(
            "[load] {name}: {} flash bytes, {} relocations ({} skipped), entry {entry:#010x}, got {got_base:#010x}",
            flash.iter().map(|(_, alloc)| alloc.len).sum::<usize>(),
            stats.patched,
            stats.skipped
        );
        trace!("[load] symbol cache: {} hits, {} misses", cache.hits, cache.misses);
        Ok(ModuleImage {
            name,
            sections,
            data,
            bss: bss.map(|(region, _)| region),
            entry,
            got_base,
        })
    }
}

impl<R: ElfReader, L: SymbolLookup + ?Sized> Session<'_, R, L> {
    /// Address of the global, defined symbol `name`, Thumb bit set for
    /// functions.
    fn entry_address(&mut self, name: &str) -> Result<TargetAddr> {
        let not_found = || Error::EntryNotFound { name: name.into() };
        let (_, symbol) = self
            .resolver
            .find_global(&mut self.reader, name)?
            .ok_or_else(not_found)?;
        let addr = if symbol.is_abs() {
            symbol.st_value()
        } else {
            self.placement
                .get(symbol.st_shndx())
                .ok_or_else(not_found)?
                .wrapping_add(symbol.st_value())
        };
        Ok(if symbol.is_func() { addr | 1 } else { addr })
    }
}
