use anyhow::Result;
use object::{
    Architecture, BinaryFormat, Endianness, SymbolFlags, SymbolKind, SymbolScope,
    elf::{R_ARM_ABS32, R_ARM_THM_PC22 as R_ARM_THM_CALL},
    write::{Object, Relocation, RelocationFlags, SectionId, Symbol, SymbolId, SymbolSection},
};
use std::collections::HashMap;

/// What a generated section holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionKind {
    Text,
    ReadOnly,
    Data,
    Bss,
}

impl From<SectionKind> for object::SectionKind {
    fn from(kind: SectionKind) -> Self {
        match kind {
            SectionKind::Text => object::SectionKind::Text,
            SectionKind::ReadOnly => object::SectionKind::ReadOnlyData,
            SectionKind::Data => object::SectionKind::Data,
            SectionKind::Bss => object::SectionKind::UninitializedData,
        }
    }
}

/// An ELF32 little-endian ARM relocatable object under construction.
///
/// Relocations are written as `SHT_REL`, so their addends live in the
/// section bytes; callers put the addend (or the `BL` placeholder) in the
/// data before adding the relocation.
pub struct ExtObject {
    obj: Object<'static>,
    undefined: HashMap<String, SymbolId>,
}

impl Default for ExtObject {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtObject {
    pub fn new() -> Self {
        Self {
            obj: Object::new(BinaryFormat::Elf, Architecture::Arm, Endianness::Little),
            undefined: HashMap::new(),
        }
    }

    pub fn section(&mut self, name: &str, kind: SectionKind) -> SectionId {
        self.obj
            .add_section(vec![], name.as_bytes().to_vec(), kind.into())
    }

    /// Appends `data` to `section`, returning its offset.
    pub fn append(&mut self, section: SectionId, data: &[u8], align: u64) -> u64 {
        self.obj.append_section_data(section, data, align)
    }

    pub fn append_bss(&mut self, section: SectionId, size: u64, align: u64) -> u64 {
        self.obj.append_section_bss(section, size, align)
    }

    fn defined(
        &mut self,
        name: &str,
        section: SectionId,
        value: u64,
        size: u64,
        kind: SymbolKind,
        global: bool,
    ) -> SymbolId {
        self.obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value,
            size,
            kind,
            scope: if global {
                SymbolScope::Linkage
            } else {
                SymbolScope::Compilation
            },
            weak: false,
            section: SymbolSection::Section(section),
            flags: SymbolFlags::None,
        })
    }

    /// Defines a Thumb function; its value carries the Thumb bit.
    pub fn function(
        &mut self,
        name: &str,
        section: SectionId,
        offset: u64,
        size: u64,
        global: bool,
    ) -> SymbolId {
        self.defined(name, section, offset | 1, size, SymbolKind::Text, global)
    }

    pub fn object(
        &mut self,
        name: &str,
        section: SectionId,
        offset: u64,
        size: u64,
        global: bool,
    ) -> SymbolId {
        self.defined(name, section, offset, size, SymbolKind::Data, global)
    }

    /// The undefined symbol `name`, created on first use.
    pub fn undefined(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.undefined.get(name) {
            return id;
        }
        let id = self.obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value: 0,
            size: 0,
            kind: SymbolKind::Unknown,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Undefined,
            flags: SymbolFlags::None,
        });
        self.undefined.insert(name.to_string(), id);
        id
    }

    /// Adds a relocation of raw ELF type `r_type`.
    pub fn reloc(
        &mut self,
        section: SectionId,
        offset: u64,
        symbol: SymbolId,
        r_type: u32,
    ) -> Result<()> {
        self.obj.add_relocation(
            section,
            Relocation {
                offset,
                symbol,
                addend: 0,
                flags: RelocationFlags::Elf { r_type },
            },
        )?;
        Ok(())
    }

    pub fn abs32(&mut self, section: SectionId, offset: u64, symbol: SymbolId) -> Result<()> {
        self.reloc(section, offset, symbol, R_ARM_ABS32)
    }

    pub fn thm_call(&mut self, section: SectionId, offset: u64, symbol: SymbolId) -> Result<()> {
        self.reloc(section, offset, symbol, R_ARM_THM_CALL)
    }

    pub fn write(self) -> Result<Vec<u8>> {
        Ok(self.obj.write()?)
    }
}
