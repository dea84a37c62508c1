use crate::{
    Error, Result, TargetAddr,
    elf::{ElfSymbol, SYM_SIZE},
    error::invalid_symbol,
    exports::SymbolLookup,
    input::ElfReader,
};
use alloc::{vec, vec::Vec};

/// Runtime base address of every placed section, by section index.
///
/// A section without a placement (zero size, not allocated, or never
/// loaded) must never be dereferenced.
#[derive(Clone, Debug, Default)]
pub struct SectionPlacement {
    bases: Vec<Option<TargetAddr>>,
}

impl SectionPlacement {
    pub fn new(sections: usize) -> Self {
        Self {
            bases: vec![None; sections],
        }
    }

    pub fn set(&mut self, index: usize, base: TargetAddr) {
        if let Some(slot) = self.bases.get_mut(index) {
            *slot = Some(base);
        }
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<TargetAddr> {
        self.bases.get(index).copied().flatten()
    }
}

/// Hit and miss counters of a [`SymbolCache`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
}

/// Direct-mapped cache of resolved symbols, slot `index % N`.
///
/// A colliding symbol simply replaces the previous one; a miss only costs
/// another resolution.
pub struct SymbolCache {
    slots: Vec<Option<(usize, TargetAddr)>>,
    stats: CacheStats,
}

impl SymbolCache {
    pub fn new(slots: usize) -> Self {
        Self {
            slots: vec![None; slots.max(1)],
            stats: CacheStats::default(),
        }
    }

    pub fn get(&mut self, index: usize) -> Option<TargetAddr> {
        let slot = index % self.slots.len();
        match self.slots[slot] {
            Some((cached, addr)) if cached == index => {
                self.stats.hits += 1;
                Some(addr)
            }
            _ => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, index: usize, addr: TargetAddr) {
        let slot = index % self.slots.len();
        self.slots[slot] = Some((index, addr));
    }

    pub fn clear(&mut self) {
        self.slots.fill(None);
        self.stats = CacheStats::default();
    }

    #[inline]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

/// Maps symbol indices of one module to runtime addresses.
///
/// Symbols are read from the source one entry at a time. Only the string
/// table is buffered, truncated to the configured maximum.
pub struct SymbolResolver {
    symtab_offset: usize,
    count: usize,
    strtab: Vec<u8>,
    cache: SymbolCache,
}

impl SymbolResolver {
    pub(crate) fn new(symtab_offset: usize, count: usize, strtab: Vec<u8>, cache_slots: usize) -> Self {
        Self {
            symtab_offset,
            count,
            strtab,
            cache: SymbolCache::new(cache_slots),
        }
    }

    /// Number of entries in the symbol table.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Reads symbol `index` from the source.
    pub fn symbol<R: ElfReader + ?Sized>(&self, reader: &mut R, index: usize) -> Result<ElfSymbol> {
        if index >= self.count {
            return Err(invalid_symbol(index, "index past the end of the symbol table"));
        }
        let mut buf = [0u8; SYM_SIZE];
        reader.read(&mut buf, self.symtab_offset + index * SYM_SIZE)?;
        Ok(ElfSymbol::parse(&buf))
    }

    /// Name of symbol `index`, from the buffered string table.
    pub fn name(&self, index: usize, symbol: &ElfSymbol) -> Result<&str> {
        let start = symbol.st_name();
        let tail = self
            .strtab
            .get(start..)
            .ok_or_else(|| invalid_symbol(index, "name offset outside the string table"))?;
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| invalid_symbol(index, "name runs past the buffered string table"))?;
        core::str::from_utf8(&tail[..len]).map_err(|_| invalid_symbol(index, "name is not UTF-8"))
    }

    /// Resolves symbol `index` to its runtime address.
    ///
    /// Undefined symbols come from `exports`, absolute symbols are their
    /// value and defined symbols are their section's base plus value. The
    /// Thumb bit carried in a function's value is kept.
    pub fn resolve<R, L>(
        &mut self,
        reader: &mut R,
        index: usize,
        placement: &SectionPlacement,
        exports: &L,
    ) -> Result<TargetAddr>
    where
        R: ElfReader + ?Sized,
        L: SymbolLookup + ?Sized,
    {
        if index == 0 {
            return Ok(0);
        }
        if let Some(addr) = self.cache.get(index) {
            return Ok(addr);
        }
        let symbol = self.symbol(reader, index)?;
        let addr = if symbol.is_undef() {
            let name = self.name(index, &symbol)?;
            let addr = exports.lookup(name).ok_or_else(|| Error::UnresolvedSymbol {
                name: name.into(),
            })?;
            trace!("[resolve] {name} -> {addr:#010x}");
            addr
        } else if symbol.is_abs() {
            symbol.st_value()
        } else {
            let base = placement
                .get(symbol.st_shndx())
                .ok_or(Error::InvalidSection {
                    index: symbol.st_shndx(),
                })?;
            base.wrapping_add(symbol.st_value())
        };
        self.cache.insert(index, addr);
        Ok(addr)
    }

    /// First global, defined symbol called `name`.
    pub fn find_global<R: ElfReader + ?Sized>(
        &self,
        reader: &mut R,
        name: &str,
    ) -> Result<Option<(usize, ElfSymbol)>> {
        for index in 1..self.count {
            let symbol = self.symbol(reader, index)?;
            if !symbol.is_global() || symbol.is_undef() {
                continue;
            }
            if self.name(index, &symbol).is_ok_and(|n| n == name) {
                return Ok(Some((index, symbol)));
            }
        }
        Ok(None)
    }

    #[inline]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exports::HostExports;

    fn sym(name: u32, value: u32, info: u8, shndx: u16) -> [u8; SYM_SIZE] {
        let mut b = [0u8; SYM_SIZE];
        b[0..4].copy_from_slice(&name.to_le_bytes());
        b[4..8].copy_from_slice(&value.to_le_bytes());
        b[12] = info;
        b[14..16].copy_from_slice(&shndx.to_le_bytes());
        b
    }

    fn fixture() -> (Vec<u8>, SymbolResolver) {
        let strtab = b"\0host_fn\0local\0missing\0".to_vec();
        let mut symtab = Vec::new();
        symtab.extend_from_slice(&[0u8; SYM_SIZE]);
        symtab.extend_from_slice(&sym(1, 0, 0x12, 0)); // global func, undefined
        symtab.extend_from_slice(&sym(9, 0x21, 0x12, 2)); // global func in section 2
        symtab.extend_from_slice(&sym(15, 0, 0x10, 0)); // unresolvable
        symtab.extend_from_slice(&sym(0, 0x1234, 0x10, 0xfff1)); // absolute
        symtab.extend_from_slice(&sym(9, 0, 0x00, 7)); // unplaced section
        symtab.extend_from_slice(&sym(0x400, 0, 0x10, 0)); // bad name
        let resolver = SymbolResolver::new(0, symtab.len() / SYM_SIZE, strtab, 3);
        (symtab, resolver)
    }

    #[test]
    fn resolves_every_symbol_kind() {
        let (symtab, mut resolver) = fixture();
        let mut reader = symtab.as_slice();
        let exports = HostExports::from_table([("host_fn", 0x0800_0101)]);
        let mut placement = SectionPlacement::new(8);
        placement.set(2, 0x1000_2000);

        assert_eq!(resolver.resolve(&mut reader, 0, &placement, &exports).unwrap(), 0);
        assert_eq!(resolver.resolve(&mut reader, 1, &placement, &exports).unwrap(), 0x0800_0101);
        assert_eq!(resolver.resolve(&mut reader, 2, &placement, &exports).unwrap(), 0x1000_2021);
        assert_eq!(resolver.resolve(&mut reader, 4, &placement, &exports).unwrap(), 0x1234);
        assert!(matches!(
            resolver.resolve(&mut reader, 3, &placement, &exports),
            Err(Error::UnresolvedSymbol { name }) if name == "missing"
        ));
        assert!(matches!(
            resolver.resolve(&mut reader, 5, &placement, &exports),
            Err(Error::InvalidSection { index: 7 })
        ));
        assert!(matches!(
            resolver.resolve(&mut reader, 6, &placement, &exports),
            Err(Error::InvalidSymbol { index: 6, .. })
        ));
        assert!(matches!(
            resolver.resolve(&mut reader, 60, &placement, &exports),
            Err(Error::InvalidSymbol { index: 60, .. })
        ));
    }

    #[test]
    fn cache_serves_repeats() {
        let (symtab, mut resolver) = fixture();
        let mut reader = symtab.as_slice();
        let exports = HostExports::from_table([("host_fn", 0x0800_0101)]);
        let placement = SectionPlacement::new(8);
        for _ in 0..3 {
            resolver.resolve(&mut reader, 1, &placement, &exports).unwrap();
        }
        assert_eq!(resolver.cache_stats(), CacheStats { hits: 2, misses: 1 });
        // 4 maps to the same slot as 1 and evicts it
        resolver.resolve(&mut reader, 4, &placement, &exports).unwrap();
        resolver.resolve(&mut reader, 1, &placement, &exports).unwrap();
        assert_eq!(resolver.cache_stats().misses, 3);
    }

    #[test]
    fn finds_global_definitions_only() {
        let (symtab, resolver) = fixture();
        let mut reader = symtab.as_slice();
        let (index, symbol) = resolver.find_global(&mut reader, "local").unwrap().unwrap();
        assert_eq!(index, 2);
        assert!(symbol.is_func());
        assert!(resolver.find_global(&mut reader, "host_fn").unwrap().is_none());
    }
}
