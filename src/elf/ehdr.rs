//! ELF header parsing and validation.
//!
//! Only little-endian ELF32 relocatable objects for ARM are accepted.

use super::defs::{EHDR_SIZE, Ehdr, SHDR_SIZE, u16_at, u32_at};
use crate::{Result, arch::EM_ARCH, error::parse_error};
use core::ops::Deref;
use elf::abi::{
    EI_CLASS, EI_DATA, EI_NIDENT, EI_VERSION, ELFCLASS32, ELFDATA2LSB, ELFMAGIC, ET_REL,
    EV_CURRENT,
};

/// A validated ELF file header.
#[repr(transparent)]
pub struct ElfHeader {
    ehdr: Ehdr,
}

impl Deref for ElfHeader {
    type Target = Ehdr;

    fn deref(&self) -> &Self::Target {
        &self.ehdr
    }
}

impl ElfHeader {
    /// Parses and validates the first [`EHDR_SIZE`] bytes of an object.
    pub fn parse(data: &[u8; EHDR_SIZE]) -> Result<Self> {
        let mut e_ident = [0u8; EI_NIDENT];
        e_ident.copy_from_slice(&data[..EI_NIDENT]);
        let ehdr = ElfHeader {
            ehdr: Ehdr {
                e_ident,
                e_type: u16_at(data, 16),
                e_machine: u16_at(data, 18),
                e_version: u32_at(data, 20),
                e_entry: u32_at(data, 24) as _,
                e_phoff: u32_at(data, 28) as _,
                e_shoff: u32_at(data, 32) as _,
                e_flags: u32_at(data, 36),
                e_ehsize: u16_at(data, 40),
                e_phentsize: u16_at(data, 42),
                e_phnum: u16_at(data, 44),
                e_shentsize: u16_at(data, 46),
                e_shnum: u16_at(data, 48),
                e_shstrndx: u16_at(data, 50),
            },
        };
        ehdr.validate()?;
        Ok(ehdr)
    }

    fn validate(&self) -> Result<()> {
        if self.e_ident[0..4] != ELFMAGIC {
            return Err(parse_error("invalid ELF magic"));
        }
        if self.e_ident[EI_CLASS] != ELFCLASS32 {
            return Err(parse_error("not an ELF32 object"));
        }
        if self.e_ident[EI_DATA] != ELFDATA2LSB {
            return Err(parse_error("not a little-endian object"));
        }
        if self.e_ident[EI_VERSION] != EV_CURRENT {
            return Err(parse_error("invalid ELF version"));
        }
        if self.e_type != ET_REL {
            return Err(parse_error(alloc::format!(
                "expected a relocatable object, found e_type {}",
                self.e_type
            )));
        }
        if self.e_machine != EM_ARCH {
            return Err(parse_error(alloc::format!(
                "file arch mismatch: expected {}, found {}",
                EM_ARCH,
                self.e_machine
            )));
        }
        if self.e_shnum != 0 && self.e_shentsize as usize != SHDR_SIZE {
            return Err(parse_error("unexpected section header entry size"));
        }
        Ok(())
    }

    /// Number of section headers.
    #[inline]
    pub fn shnum(&self) -> usize {
        self.e_shnum as usize
    }

    /// File offset of the section header table.
    #[inline]
    pub fn shoff(&self) -> usize {
        self.e_shoff as usize
    }

    /// Index of the section-name string table.
    #[inline]
    pub fn shstrndx(&self) -> usize {
        self.e_shstrndx as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn header() -> [u8; EHDR_SIZE] {
        let mut h = [0u8; EHDR_SIZE];
        h[..4].copy_from_slice(&ELFMAGIC);
        h[EI_CLASS] = ELFCLASS32;
        h[EI_DATA] = ELFDATA2LSB;
        h[EI_VERSION] = EV_CURRENT;
        h[16..18].copy_from_slice(&ET_REL.to_le_bytes());
        h[18..20].copy_from_slice(&EM_ARCH.to_le_bytes());
        h[46..48].copy_from_slice(&(SHDR_SIZE as u16).to_le_bytes());
        h[48..50].copy_from_slice(&3u16.to_le_bytes());
        h[50..52].copy_from_slice(&2u16.to_le_bytes());
        h
    }

    #[test]
    fn accepts_arm_relocatable() {
        let ehdr = ElfHeader::parse(&header()).unwrap();
        assert_eq!(ehdr.shnum(), 3);
        assert_eq!(ehdr.shstrndx(), 2);
    }

    #[test]
    fn rejects_foreign_objects() {
        let mut h = header();
        h[18] = 0x3e; // EM_X86_64
        assert!(matches!(ElfHeader::parse(&h), Err(Error::Parse { .. })));

        let mut h = header();
        h[EI_CLASS] = 2;
        assert!(matches!(ElfHeader::parse(&h), Err(Error::Parse { .. })));

        let mut h = header();
        h[16] = 3; // ET_DYN
        assert!(matches!(ElfHeader::parse(&h), Err(Error::Parse { .. })));

        let mut h = header();
        h[0] = 0;
        assert!(matches!(ElfHeader::parse(&h), Err(Error::Parse { .. })));
    }
}
