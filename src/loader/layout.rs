//! Section table of a relocatable object and how each section is placed.

use crate::{
    LoaderConfig, Result,
    elf::{
        EHDR_SIZE, ElfHeader, ElfShdr, REL_SIZE, SHDR_SIZE, SHT_FINI_ARRAY, SHT_INIT_ARRAY,
        SHT_NOBITS, SHT_PREINIT_ARRAY, SHT_PROGBITS, SHT_REL, SHT_RELA, SHT_SYMTAB, SYM_SIZE,
        SectionFlags,
    },
    error::parse_error,
    image::SectionClass,
    input::ElfReader,
    relocation::SymbolResolver,
};
use alloc::{string::String, vec, vec::Vec};

/// Location of a REL table in the object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RelTable {
    pub offset: usize,
    pub count: usize,
}

/// One section header plus what the loader decided about it.
pub(crate) struct SectionInfo {
    pub index: usize,
    pub name: String,
    pub shdr: ElfShdr,
    /// `None` for sections that get no placement.
    pub class: Option<SectionClass>,
    pub rels: Option<RelTable>,
}

impl SectionInfo {
    #[inline]
    pub fn size(&self) -> usize {
        self.shdr.size()
    }
}

/// Parsed header metadata of one input module.
///
/// Lives only for the duration of a load.
pub(crate) struct RelocatableObject {
    sections: Vec<SectionInfo>,
    symtab: usize,
}

impl RelocatableObject {
    pub fn parse<R: ElfReader + ?Sized>(reader: &mut R, config: &LoaderConfig) -> Result<Self> {
        let mut buf = [0u8; EHDR_SIZE];
        reader.read(&mut buf, 0)?;
        let ehdr = ElfHeader::parse(&buf)?;
        let shnum = ehdr.shnum();
        if shnum == 0 {
            return Err(parse_error("object has no section headers"));
        }
        if shnum > config.max_sections {
            return Err(parse_error(alloc::format!(
                "{shnum} sections exceed the limit of {}",
                config.max_sections
            )));
        }

        let mut shdrs = Vec::with_capacity(shnum);
        for i in 0..shnum {
            let mut buf = [0u8; SHDR_SIZE];
            reader.read(&mut buf, ehdr.shoff() + i * SHDR_SIZE)?;
            shdrs.push(ElfShdr::parse(&buf));
        }

        let shstrndx = ehdr.shstrndx();
        let shstrtab = match shdrs.get(shstrndx) {
            Some(shdr) => read_table(reader, shdr, config.max_shstrtab)?,
            None => return Err(parse_error("section name table index out of range")),
        };

        let mut sections = Vec::with_capacity(shnum);
        let mut symtab = None;
        for (index, shdr) in shdrs.into_iter().enumerate() {
            let name = if index == 0 {
                String::new()
            } else {
                table_str(&shstrtab, shdr.sh_name as usize)
                    .ok_or_else(|| {
                        parse_error(alloc::format!("name of section {index} is not readable"))
                    })?
                    .into()
            };
            if shdr.sh_type == SHT_SYMTAB {
                if symtab.is_some() {
                    return Err(parse_error("more than one symbol table"));
                }
                if shdr.sh_entsize as usize != SYM_SIZE || shdr.size() % SYM_SIZE != 0 {
                    return Err(parse_error("unexpected symbol table entry size"));
                }
                symtab = Some(index);
            }
            let class = classify(&shdr);
            sections.push(SectionInfo {
                index,
                name,
                shdr,
                class,
                rels: None,
            });
        }
        let symtab = symtab.ok_or_else(|| parse_error("object has no symbol table"))?;
        let strtab = sections[symtab].shdr.sh_link as usize;
        if strtab == 0 || strtab >= shnum {
            return Err(parse_error("symbol table has no string table"));
        }

        Self::pair_relocations(&mut sections)?;
        Ok(Self { sections, symtab })
    }

    fn pair_relocations(sections: &mut [SectionInfo]) -> Result<()> {
        for i in 0..sections.len() {
            let shdr = &sections[i].shdr;
            let sh_type = shdr.sh_type;
            if sh_type != SHT_REL && sh_type != SHT_RELA {
                continue;
            }
            let target = shdr.sh_info as usize;
            let table = RelTable {
                offset: shdr.offset(),
                count: shdr.size() / REL_SIZE,
            };
            let entsize_ok = shdr.sh_entsize as usize == REL_SIZE && shdr.size() % REL_SIZE == 0;
            let Some(target_info) = sections.get(target) else {
                return Err(parse_error(alloc::format!(
                    "relocation section {i} targets missing section {target}"
                )));
            };
            if !target_info.shdr.flags().contains(SectionFlags::ALLOC) {
                continue;
            }
            if sh_type == SHT_RELA {
                return Err(parse_error(alloc::format!(
                    "RELA relocations for section {target} are not supported"
                )));
            }
            if !entsize_ok {
                return Err(parse_error("unexpected relocation entry size"));
            }
            if table.count == 0 {
                continue;
            }
            match target_info.class {
                Some(SectionClass::Bss) => {
                    return Err(parse_error(alloc::format!(
                        "relocations against zero-initialized section {target}"
                    )));
                }
                None => continue,
                Some(_) => {}
            }
            let target_info = &mut sections[target];
            if target_info.rels.is_some() {
                return Err(parse_error(alloc::format!(
                    "section {target} has more than one relocation section"
                )));
            }
            target_info.rels = Some(table);
        }
        Ok(())
    }

    #[inline]
    pub fn sections(&self) -> &[SectionInfo] {
        &self.sections
    }

    pub fn of_class(&self, class: SectionClass) -> impl Iterator<Item = &SectionInfo> {
        self.sections.iter().filter(move |s| s.class == Some(class))
    }

    pub fn flash_sections(&self) -> impl Iterator<Item = &SectionInfo> {
        self.sections
            .iter()
            .filter(|s| s.class.is_some_and(SectionClass::is_flash))
    }

    /// Builds the symbol resolver for this object.
    pub fn resolver<R: ElfReader + ?Sized>(
        &self,
        reader: &mut R,
        config: &LoaderConfig,
    ) -> Result<SymbolResolver> {
        let symtab = &self.sections[self.symtab].shdr;
        let strtab = &self.sections[symtab.sh_link as usize].shdr;
        let strings = read_table(reader, strtab, config.max_strtab)?;
        Ok(SymbolResolver::new(
            symtab.offset(),
            symtab.size() / SYM_SIZE,
            strings,
            config.sym_cache_slots,
        ))
    }

    /// Logs the section table.
    pub fn log_summary(&self, name: &str) {
        debug!("[parse] {name}: {} sections", self.sections.len());
        for s in &self.sections {
            if let Some(class) = s.class {
                debug!(
                    "[parse]   [{:2}] {:<20} {:?} size {:#x} align {} rels {}",
                    s.index,
                    s.name,
                    class,
                    s.size(),
                    s.shdr.align(),
                    s.rels.map_or(0, |r| r.count)
                );
            }
        }
    }
}

fn classify(shdr: &ElfShdr) -> Option<SectionClass> {
    let flags = shdr.flags();
    if !flags.contains(SectionFlags::ALLOC) || shdr.size() == 0 {
        return None;
    }
    match shdr.sh_type {
        SHT_PROGBITS if flags.contains(SectionFlags::EXECINSTR) => Some(SectionClass::Text),
        SHT_PROGBITS | SHT_INIT_ARRAY | SHT_FINI_ARRAY | SHT_PREINIT_ARRAY => {
            if flags.contains(SectionFlags::WRITE) {
                Some(SectionClass::Data)
            } else {
                Some(SectionClass::ReadOnly)
            }
        }
        SHT_NOBITS => Some(SectionClass::Bss),
        _ => None,
    }
}

/// Reads a string table, truncated to `max` bytes.
fn read_table<R: ElfReader + ?Sized>(reader: &mut R, shdr: &ElfShdr, max: usize) -> Result<Vec<u8>> {
    let len = shdr.size().min(max);
    if len < shdr.size() {
        warn!(
            "[parse] string table of {:#x} bytes truncated to {max:#x}",
            shdr.size()
        );
    }
    let mut table = vec![0u8; len];
    reader.read(&mut table, shdr.offset())?;
    Ok(table)
}

fn table_str(table: &[u8], offset: usize) -> Option<&str> {
    let tail = table.get(offset..)?;
    let len = tail.iter().position(|&b| b == 0)?;
    core::str::from_utf8(&tail[..len]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_sections() {
        fn shdr(sh_type: u32, flags: u32, size: u32) -> ElfShdr {
            let mut b = [0u8; SHDR_SIZE];
            b[4..8].copy_from_slice(&sh_type.to_le_bytes());
            b[8..12].copy_from_slice(&flags.to_le_bytes());
            b[20..24].copy_from_slice(&size.to_le_bytes());
            ElfShdr::parse(&b)
        }
        let (a, w, x) = (
            SectionFlags::ALLOC.bits(),
            SectionFlags::WRITE.bits(),
            SectionFlags::EXECINSTR.bits(),
        );
        assert_eq!(classify(&shdr(SHT_PROGBITS, a | x, 4)), Some(SectionClass::Text));
        assert_eq!(classify(&shdr(SHT_PROGBITS, a, 4)), Some(SectionClass::ReadOnly));
        assert_eq!(classify(&shdr(SHT_PROGBITS, a | w, 4)), Some(SectionClass::Data));
        assert_eq!(classify(&shdr(SHT_INIT_ARRAY, a | w, 4)), Some(SectionClass::Data));
        assert_eq!(classify(&shdr(SHT_NOBITS, a | w, 4)), Some(SectionClass::Bss));
        assert_eq!(classify(&shdr(SHT_PROGBITS, a | x, 0)), None);
        assert_eq!(classify(&shdr(SHT_PROGBITS, 0, 4)), None);
        // ARM exception index tables are not placed
        assert_eq!(classify(&shdr(0x7000_0001, a, 4)), None);
    }

    #[test]
    fn table_strings() {
        let table = b"\0.text\0.data\0bad";
        assert_eq!(table_str(table, 1), Some(".text"));
        assert_eq!(table_str(table, 7), Some(".data"));
        assert_eq!(table_str(table, 13), None);
        assert_eq!(table_str(table, 64), None);
    }
}
