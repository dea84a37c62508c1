//! ELF32 record definitions.
//!
//! Records are decoded field by field from little-endian bytes, so parsing
//! works the same on the 32-bit target and on a 64-bit development host.

use bitflags::bitflags;
use core::ops::Deref;
use elf::abi::{SHF_ALLOC, SHF_EXECINSTR, SHF_WRITE, SHN_ABS, SHN_UNDEF, STB_GLOBAL, STT_FUNC};

pub(crate) type Ehdr = elf::file::Elf32_Ehdr;
pub(crate) type Shdr = elf::section::Elf32_Shdr;
pub(crate) type Rel = elf::relocation::Elf32_Rel;

/// Size of the ELF32 file header.
pub const EHDR_SIZE: usize = 52;
/// Size of one ELF32 section header.
pub const SHDR_SIZE: usize = 40;
/// Size of one ELF32 symbol table entry.
pub const SYM_SIZE: usize = 16;
/// Size of one ELF32 REL entry.
pub const REL_SIZE: usize = 8;

#[inline]
pub(crate) fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

#[inline]
pub(crate) fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

bitflags! {
    /// The `sh_flags` bits the loader cares about.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        const WRITE = SHF_WRITE as u32;
        const ALLOC = SHF_ALLOC as u32;
        const EXECINSTR = SHF_EXECINSTR as u32;
    }
}

/// ELF section header.
#[derive(Debug)]
#[repr(transparent)]
pub struct ElfShdr {
    shdr: Shdr,
}

impl Clone for ElfShdr {
    fn clone(&self) -> Self {
        Self {
            shdr: Shdr {
                sh_name: self.sh_name,
                sh_type: self.sh_type,
                sh_flags: self.sh_flags,
                sh_addr: self.sh_addr,
                sh_offset: self.sh_offset,
                sh_size: self.sh_size,
                sh_link: self.sh_link,
                sh_info: self.sh_info,
                sh_addralign: self.sh_addralign,
                sh_entsize: self.sh_entsize,
            },
        }
    }
}

impl Deref for ElfShdr {
    type Target = Shdr;

    fn deref(&self) -> &Self::Target {
        &self.shdr
    }
}

impl ElfShdr {
    /// Decodes a section header from its on-disk bytes.
    pub fn parse(bytes: &[u8; SHDR_SIZE]) -> Self {
        Self {
            shdr: Shdr {
                sh_name: u32_at(bytes, 0),
                sh_type: u32_at(bytes, 4),
                sh_flags: u32_at(bytes, 8) as _,
                sh_addr: u32_at(bytes, 12) as _,
                sh_offset: u32_at(bytes, 16) as _,
                sh_size: u32_at(bytes, 20) as _,
                sh_link: u32_at(bytes, 24),
                sh_info: u32_at(bytes, 28),
                sh_addralign: u32_at(bytes, 32) as _,
                sh_entsize: u32_at(bytes, 36) as _,
            },
        }
    }

    #[inline]
    pub fn flags(&self) -> SectionFlags {
        SectionFlags::from_bits_truncate(self.shdr.sh_flags as u32)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.shdr.sh_size as usize
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.shdr.sh_offset as usize
    }

    /// Alignment requirement, never less than one.
    #[inline]
    pub fn align(&self) -> usize {
        (self.shdr.sh_addralign as usize).max(1)
    }
}

/// ELF REL relocation entry.
#[repr(transparent)]
pub struct ElfRel {
    rel: Rel,
}

impl Clone for ElfRel {
    fn clone(&self) -> Self {
        Self {
            rel: Rel {
                r_offset: self.rel.r_offset,
                r_info: self.rel.r_info,
            },
        }
    }
}

impl core::fmt::Debug for ElfRel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ElfRel")
            .field("r_offset", &self.r_offset())
            .field("r_type", &crate::arch::rel_type_to_str(self.r_type()))
            .field("r_symbol", &self.r_symbol())
            .finish()
    }
}

impl ElfRel {
    pub fn parse(bytes: &[u8; REL_SIZE]) -> Self {
        Self {
            rel: Rel {
                r_offset: u32_at(bytes, 0) as _,
                r_info: u32_at(bytes, 4) as _,
            },
        }
    }

    /// Returns the relocation type.
    #[inline]
    pub fn r_type(&self) -> u32 {
        self.rel.r_info as u32 & 0xff
    }

    /// Returns the symbol index.
    #[inline]
    pub fn r_symbol(&self) -> usize {
        (self.rel.r_info as u32 >> 8) as usize
    }

    /// Returns the offset of the relocated field within its section.
    #[inline]
    pub fn r_offset(&self) -> usize {
        self.rel.r_offset as usize
    }

    /// End of the 4-byte relocated field, `None` if it overflows.
    #[inline]
    pub fn field_end(&self) -> Option<usize> {
        self.r_offset().checked_add(4)
    }
}

#[allow(unused)]
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub(crate) struct Elf32Sym {
    pub st_name: u32,
    pub st_value: u32,
    pub st_size: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
}

/// ELF symbol table entry.
#[derive(Clone, Copy, Debug)]
#[repr(transparent)]
pub struct ElfSymbol {
    sym: Elf32Sym,
}

impl ElfSymbol {
    pub fn parse(bytes: &[u8; SYM_SIZE]) -> Self {
        Self {
            sym: Elf32Sym {
                st_name: u32_at(bytes, 0),
                st_value: u32_at(bytes, 4),
                st_size: u32_at(bytes, 8),
                st_info: bytes[12],
                st_other: bytes[13],
                st_shndx: u16_at(bytes, 14),
            },
        }
    }

    /// Offset of the name in the string table.
    #[inline]
    pub fn st_name(&self) -> usize {
        self.sym.st_name as usize
    }

    #[inline]
    pub fn st_value(&self) -> u32 {
        self.sym.st_value
    }

    #[inline]
    pub fn st_size(&self) -> usize {
        self.sym.st_size as usize
    }

    #[inline]
    pub fn st_bind(&self) -> u8 {
        self.sym.st_info >> 4
    }

    #[inline]
    pub fn st_type(&self) -> u8 {
        self.sym.st_info & 0xf
    }

    #[inline]
    pub fn st_shndx(&self) -> usize {
        self.sym.st_shndx as usize
    }

    #[inline]
    pub fn is_undef(&self) -> bool {
        self.sym.st_shndx == SHN_UNDEF as u16
    }

    #[inline]
    pub fn is_abs(&self) -> bool {
        self.sym.st_shndx == SHN_ABS as u16
    }

    #[inline]
    pub fn is_func(&self) -> bool {
        self.st_type() == STT_FUNC as u8
    }

    #[inline]
    pub fn is_global(&self) -> bool {
        self.st_bind() == STB_GLOBAL as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rel_info_split() {
        let mut raw = [0u8; REL_SIZE];
        raw[..4].copy_from_slice(&0x1234u32.to_le_bytes());
        raw[4..].copy_from_slice(&((7u32 << 8) | 10).to_le_bytes());
        let rel = ElfRel::parse(&raw);
        assert_eq!(rel.r_offset(), 0x1234);
        assert_eq!(rel.r_symbol(), 7);
        assert_eq!(rel.r_type(), 10);
    }

    #[test]
    fn symbol_fields() {
        let mut raw = [0u8; SYM_SIZE];
        raw[0..4].copy_from_slice(&5u32.to_le_bytes());
        raw[4..8].copy_from_slice(&0x21u32.to_le_bytes());
        raw[12] = (1 << 4) | 2;
        raw[14..16].copy_from_slice(&3u16.to_le_bytes());
        let sym = ElfSymbol::parse(&raw);
        assert_eq!(sym.st_name(), 5);
        assert_eq!(sym.st_value(), 0x21);
        assert!(sym.is_global());
        assert!(sym.is_func());
        assert_eq!(sym.st_shndx(), 3);
        assert!(!sym.is_undef() && !sym.is_abs());
    }
}
